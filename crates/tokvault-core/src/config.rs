//! Configuration values consumed by the vault and the TOTP engine.
//!
//! These types are plain data; loading them (from the environment, a file, or
//! flags) is the calling layer's job. Key material is configured separately
//! through [`EncryptionKey`](crate::crypto::EncryptionKey) and has no default.

use chrono::{Duration, Utc};

use crate::error::ConfigError;

/// Default lifetime of a token when the caller does not pick one.
pub const DEFAULT_TOKEN_TTL_DAYS: i64 = 30;

/// Default OTP length.
pub const DEFAULT_OTP_DIGITS: u32 = 6;

/// Default TOTP time step in seconds.
pub const DEFAULT_OTP_STEP_SECS: u64 = 30;

/// Vault lifecycle policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultConfig {
    /// Lifetime applied by `Expiry::Default`. `None` means such tokens never
    /// expire.
    pub default_ttl: Option<Duration>,
    /// Report revoked tokens as not found from `detokenize`, so callers do not
    /// learn that a token once existed.
    pub conceal_revoked: bool,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            default_ttl: Some(Duration::days(DEFAULT_TOKEN_TTL_DAYS)),
            conceal_revoked: false,
        }
    }
}

impl VaultConfig {
    /// Check the policy for values that would make every token unusable.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidSetting`] if `default_ttl` is zero,
    /// negative, or so large that `now + ttl` is not a representable instant.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidSetting {
            name: "default_ttl".to_owned(),
            reason: reason.to_owned(),
        };
        match self.default_ttl {
            Some(ttl) if ttl <= Duration::zero() => Err(invalid(
                "must be positive (use no TTL for tokens that never expire)",
            )),
            Some(ttl) if Utc::now().checked_add_signed(ttl).is_none() => {
                Err(invalid("too large to compute an expiry date"))
            }
            _ => Ok(()),
        }
    }
}

/// TOTP parameters shared by generator and verifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TotpConfig {
    /// Number of decimal digits in an OTP.
    pub digits: u32,
    /// Length of one time step in seconds.
    pub step_secs: u64,
}

impl Default for TotpConfig {
    fn default() -> Self {
        Self {
            digits: DEFAULT_OTP_DIGITS,
            step_secs: DEFAULT_OTP_STEP_SECS,
        }
    }
}

impl TotpConfig {
    /// Check that the parameters describe a usable TOTP scheme.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidSetting`] if `digits` is outside `6..=8`
    /// or `step_secs` is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(6..=8).contains(&self.digits) {
            return Err(ConfigError::InvalidSetting {
                name: "otp_digits".to_owned(),
                reason: format!("must be between 6 and 8, got {}", self.digits),
            });
        }
        if self.step_secs == 0 {
            return Err(ConfigError::InvalidSetting {
                name: "otp_step".to_owned(),
                reason: "must be at least one second".to_owned(),
            });
        }
        Ok(())
    }
}
