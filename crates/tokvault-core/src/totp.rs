//! Time-based one-time passwords (RFC 6238 over HMAC-SHA1).
//!
//! Shared secrets are 16+ random bytes, handled as hex strings by callers.
//! An OTP is a pure function of `(secret, time_step)`; nothing here reads or
//! writes storage, and OTPs are never persisted.
//!
//! Verification compares codes in constant time via `subtle`. The drift
//! variant additionally accepts the codes of the neighbouring steps, which
//! absorbs up to one step of clock skew between authenticator and server.

use aes_gcm::aead::OsRng;
use aes_gcm::aead::rand_core::RngCore;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha1::Sha1;
use subtle::ConstantTimeEq;
use tracing::debug;
use zeroize::Zeroizing;

use crate::config::{DEFAULT_OTP_DIGITS, DEFAULT_OTP_STEP_SECS, TotpConfig};
use crate::error::{ConfigError, TotpError};

type HmacSha1 = Hmac<Sha1>;

/// Minimum decoded secret length (128 bits).
pub const MIN_SECRET_LEN: usize = 16;

/// Steps accepted on either side of the current one by the drift check.
const DRIFT_STEPS: u64 = 1;

/// Derives and verifies one-time codes for a fixed [`TotpConfig`].
#[derive(Debug, Clone, Copy)]
pub struct TotpEngine {
    config: TotpConfig,
}

impl Default for TotpEngine {
    fn default() -> Self {
        Self {
            config: TotpConfig::default(),
        }
    }
}

impl TotpEngine {
    /// Create an engine.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidSetting`] if `config` fails validation.
    pub fn new(config: TotpConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config })
    }

    /// The parameters this engine uses.
    #[must_use]
    pub fn config(&self) -> TotpConfig {
        self.config
    }

    /// Generate a new shared secret: 16 random bytes, hex-encoded.
    #[must_use]
    pub fn generate_secret_key() -> String {
        let mut bytes = Zeroizing::new([0u8; MIN_SECRET_LEN]);
        OsRng.fill_bytes(bytes.as_mut());
        hex::encode(bytes.as_ref())
    }

    /// The time step index containing `at`. Instants before the Unix epoch
    /// map to step 0.
    #[must_use]
    pub fn time_step_at(&self, at: DateTime<Utc>) -> u64 {
        u64::try_from(at.timestamp()).unwrap_or(0) / self.config.step_secs
    }

    /// Compute the OTP for `secret` at `time_step`.
    ///
    /// # Errors
    ///
    /// Returns [`TotpError::InvalidSecret`] if `secret` is not hex or
    /// decodes to fewer than [`MIN_SECRET_LEN`] bytes.
    pub fn compute_otp(&self, secret: &str, time_step: u64) -> Result<String, TotpError> {
        let key = decode_secret(secret)?;
        self.otp_for(&key, time_step)
    }

    /// Compute the OTP for the current time.
    ///
    /// # Errors
    ///
    /// See [`compute_otp`](Self::compute_otp).
    pub fn current_otp(&self, secret: &str) -> Result<String, TotpError> {
        self.compute_otp(secret, self.time_step_at(Utc::now()))
    }

    /// Check `candidate` against the code for the current step only.
    ///
    /// # Errors
    ///
    /// - [`TotpError::Validation`] if `candidate` is not exactly the
    ///   configured number of digits.
    /// - [`TotpError::InvalidSecret`] if `secret` is unusable.
    pub fn verify(&self, secret: &str, candidate: &str) -> Result<bool, TotpError> {
        self.verify_at(secret, candidate, Utc::now())
    }

    /// [`verify`](Self::verify) at an explicit instant.
    ///
    /// # Errors
    ///
    /// See [`verify`](Self::verify).
    pub fn verify_at(
        &self,
        secret: &str,
        candidate: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, TotpError> {
        self.check_format(candidate)?;
        let key = decode_secret(secret)?;
        self.matches_step(&key, candidate, self.time_step_at(at))
    }

    /// Check `candidate` against the current step and, failing that, the
    /// steps immediately before and after it.
    ///
    /// # Errors
    ///
    /// See [`verify`](Self::verify).
    pub fn verify_with_drift(&self, secret: &str, candidate: &str) -> Result<bool, TotpError> {
        self.verify_with_drift_at(secret, candidate, Utc::now())
    }

    /// [`verify_with_drift`](Self::verify_with_drift) at an explicit instant.
    ///
    /// # Errors
    ///
    /// See [`verify`](Self::verify).
    pub fn verify_with_drift_at(
        &self,
        secret: &str,
        candidate: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, TotpError> {
        self.check_format(candidate)?;
        let key = decode_secret(secret)?;
        let step = self.time_step_at(at);

        if self.matches_step(&key, candidate, step)? {
            return Ok(true);
        }

        for neighbour in [step.checked_sub(DRIFT_STEPS), step.checked_add(DRIFT_STEPS)]
            .into_iter()
            .flatten()
        {
            if self.matches_step(&key, candidate, neighbour)? {
                debug!(step, neighbour, "OTP accepted from adjacent time step");
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Build an `otpauth://` provisioning URI for authenticator apps.
    ///
    /// `issuer` and `account_name` are percent-encoded. Digits and period are
    /// appended only when they differ from the 6/30 defaults apps assume.
    #[must_use]
    pub fn enrollment_uri(&self, secret: &str, issuer: &str, account_name: &str) -> String {
        let issuer = urlencoding::encode(issuer);
        let account_name = urlencoding::encode(account_name);
        let mut uri =
            format!("otpauth://totp/{issuer}:{account_name}?secret={secret}&issuer={issuer}");
        if self.config.digits != DEFAULT_OTP_DIGITS {
            uri.push_str(&format!("&digits={}", self.config.digits));
        }
        if self.config.step_secs != DEFAULT_OTP_STEP_SECS {
            uri.push_str(&format!("&period={}", self.config.step_secs));
        }
        uri
    }

    fn check_format(&self, candidate: &str) -> Result<(), TotpError> {
        let well_formed = candidate.len() == self.config.digits as usize
            && candidate.bytes().all(|b| b.is_ascii_digit());
        if well_formed {
            Ok(())
        } else {
            Err(TotpError::Validation {
                digits: self.config.digits,
            })
        }
    }

    fn matches_step(&self, key: &[u8], candidate: &str, step: u64) -> Result<bool, TotpError> {
        let expected = self.otp_for(key, step)?;
        Ok(expected.as_bytes().ct_eq(candidate.as_bytes()).into())
    }

    /// HOTP (RFC 4226 §5.3) with `step` as the moving factor.
    fn otp_for(&self, key: &[u8], step: u64) -> Result<String, TotpError> {
        let mut mac = HmacSha1::new_from_slice(key).map_err(|e| TotpError::InvalidSecret {
            reason: e.to_string(),
        })?;
        mac.update(&step.to_be_bytes());
        let digest = Zeroizing::new(mac.finalize().into_bytes().to_vec());

        let code = dynamic_truncate(&digest).ok_or_else(|| TotpError::InvalidSecret {
            reason: "HMAC output too short".to_owned(),
        })?;
        let modulus = 10u32.pow(self.config.digits);
        Ok(format!(
            "{:0width$}",
            code % modulus,
            width = self.config.digits as usize
        ))
    }
}

/// Take four bytes at the offset named by the digest's low nibble and clear
/// the sign bit.
fn dynamic_truncate(digest: &[u8]) -> Option<u32> {
    let offset = usize::from(digest.last()? & 0x0f);
    let window: [u8; 4] = digest.get(offset..offset + 4)?.try_into().ok()?;
    Some(u32::from_be_bytes(window) & 0x7fff_ffff)
}

fn decode_secret(secret: &str) -> Result<Zeroizing<Vec<u8>>, TotpError> {
    let key = Zeroizing::new(hex::decode(secret).map_err(|_| TotpError::InvalidSecret {
        reason: "secret is not valid hex".to_owned(),
    })?);
    if key.len() < MIN_SECRET_LEN {
        return Err(TotpError::InvalidSecret {
            reason: format!(
                "secret must be at least {MIN_SECRET_LEN} bytes, got {}",
                key.len()
            ),
        });
    }
    Ok(key)
}
