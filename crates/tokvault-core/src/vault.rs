//! Token vault for `tokvault`.
//!
//! Exchanges sensitive payloads for opaque tokens and back. The payload is
//! encrypted by the [`CryptoCodec`] before it reaches the repository; the
//! repository only ever sees ciphertext.
//!
//! # Lifecycle
//!
//! ```text
//! Active --(expires_at elapses)--> expired (still stored, still revocable)
//! Active --revoke()--> Revoked (terminal)
//! expired --revoke()--> Revoked (terminal)
//! ```
//!
//! A token may be detokenized iff it is `Active` and its `expires_at` is
//! absent or in the future. Expiry is evaluated on read, never enforced by
//! deleting records.

use std::sync::Arc;

use aes_gcm::aead::OsRng;
use aes_gcm::aead::rand_core::RngCore;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokvault_storage::{TokenRecord, TokenRepository, TokenStatus};
use tracing::{debug, info, warn};

use crate::config::VaultConfig;
use crate::crypto::CryptoCodec;
use crate::error::{ConfigError, CryptoError, VaultError};

/// Token length in hex characters (128 bits).
pub const TOKEN_LEN: usize = 32;

/// How `tokenize` picks `expires_at`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Expiry {
    /// Creation time plus the vault's configured default TTL.
    #[default]
    Default,
    /// An explicit instant. A past instant yields an already-expired token.
    At(DateTime<Utc>),
    /// The token never expires.
    Never,
}

/// Everything about a token except its ciphertext.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TokenMetadata {
    pub token: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub status: TokenStatus,
    pub usage_count: u64,
    /// Whether `expires_at` had passed when the metadata was read.
    pub expired: bool,
}

/// Manages token creation, lookup, expiry, and revocation.
pub struct Vault {
    repo: Arc<dyn TokenRepository>,
    codec: CryptoCodec,
    config: VaultConfig,
}

impl Vault {
    /// Create a vault over the given repository and codec.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `config` fails validation.
    pub fn new(
        repo: Arc<dyn TokenRepository>,
        codec: CryptoCodec,
        config: VaultConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            repo,
            codec,
            config,
        })
    }

    /// The policy this vault was built with.
    #[must_use]
    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    /// Encrypt `payload`, store it under a fresh token, and return the token.
    ///
    /// Either a complete record is stored and the token returned, or nothing
    /// is stored and an error is returned.
    ///
    /// # Errors
    ///
    /// - [`VaultError::Validation`] if `payload` is empty or the default TTL
    ///   pushes `expires_at` past the representable range.
    /// - [`VaultError::Crypto`] if encryption fails.
    /// - [`VaultError::Storage`] if the insert fails, including the
    ///   (astronomically unlikely) case of a token collision.
    pub async fn tokenize(&self, payload: &str, expiry: Expiry) -> Result<String, VaultError> {
        if payload.is_empty() {
            return Err(VaultError::Validation {
                reason: "payload must not be empty".to_owned(),
            });
        }

        let token = generate_token();
        let ciphertext = self.codec.encrypt(payload.as_bytes())?;
        let created_at = Utc::now();
        let expires_at = match expiry {
            Expiry::Default => match self.config.default_ttl {
                Some(ttl) => Some(created_at.checked_add_signed(ttl).ok_or_else(|| {
                    VaultError::Validation {
                        reason: "default TTL overflows the expiry date".to_owned(),
                    }
                })?),
                None => None,
            },
            Expiry::At(at) => Some(at),
            Expiry::Never => None,
        };

        let record = TokenRecord {
            token: token.clone(),
            ciphertext,
            created_at,
            expires_at,
            status: TokenStatus::Active,
            usage_count: 0,
        };
        self.repo.insert(&record).await?;

        info!(
            token_prefix = token_prefix(&token),
            data_length = payload.len(),
            expires_at = ?expires_at,
            cipher = %self.codec.mode(),
            "token created"
        );

        Ok(token)
    }

    /// Return the payload behind `token` and count the use.
    ///
    /// # Errors
    ///
    /// - [`VaultError::Validation`] if `token` is not 32 lowercase hex chars.
    /// - [`VaultError::NotFound`] if no record exists, the record is revoked
    ///   and the vault conceals revocation, or the record vanished before its
    ///   use could be counted. The payload is not returned in that case.
    /// - [`VaultError::Revoked`] if the token was revoked.
    /// - [`VaultError::Expired`] if `expires_at` has passed.
    /// - [`VaultError::Crypto`] if the ciphertext cannot be decrypted.
    /// - [`VaultError::Storage`] if the repository fails.
    pub async fn detokenize(&self, token: &str) -> Result<String, VaultError> {
        let record = self.fetch(token).await?;

        if record.status == TokenStatus::Revoked {
            info!(token_prefix = token_prefix(token), "detokenize refused: revoked");
            return Err(if self.config.conceal_revoked {
                VaultError::NotFound
            } else {
                VaultError::Revoked
            });
        }

        if record.is_expired_at(Utc::now()) {
            let expired_at = record
                .expires_at
                .map(|at| at.to_rfc3339())
                .unwrap_or_default();
            info!(token_prefix = token_prefix(token), %expired_at, "detokenize refused: expired");
            return Err(VaultError::Expired { expired_at });
        }

        let plaintext = self.codec.decrypt(&record.ciphertext).inspect_err(|e| {
            warn!(token_prefix = token_prefix(token), error = %e, "stored ciphertext failed to decrypt");
        })?;
        let payload = String::from_utf8(plaintext.to_vec())
            .map_err(|_| VaultError::Crypto(CryptoError::Decryption))?;

        if !self.repo.increment_usage(token).await? {
            warn!(
                token_prefix = token_prefix(token),
                "record disappeared before its use was counted"
            );
            return Err(VaultError::NotFound);
        }

        info!(
            token_prefix = token_prefix(token),
            data_length = payload.len(),
            "token detokenized"
        );

        Ok(payload)
    }

    /// Whether `token` is past its expiry. Does not consider revocation.
    ///
    /// # Errors
    ///
    /// - [`VaultError::Validation`] if `token` is malformed.
    /// - [`VaultError::NotFound`] if no record exists.
    /// - [`VaultError::Storage`] if the repository fails.
    pub async fn is_expired(&self, token: &str) -> Result<bool, VaultError> {
        let record = self.fetch(token).await?;
        Ok(record.is_expired_at(Utc::now()))
    }

    /// Revoke `token`. Idempotent.
    ///
    /// Returns `true` if this call changed the token to revoked; `false` if it
    /// was already revoked or does not exist. Expired tokens can still be
    /// revoked.
    ///
    /// # Errors
    ///
    /// - [`VaultError::Validation`] if `token` is malformed.
    /// - [`VaultError::Storage`] if the repository fails.
    pub async fn revoke(&self, token: &str) -> Result<bool, VaultError> {
        validate_token(token)?;
        let changed = self.repo.update_status(token, TokenStatus::Revoked).await?;
        if changed {
            info!(token_prefix = token_prefix(token), "token revoked");
        } else {
            debug!(token_prefix = token_prefix(token), "revoke was a no-op");
        }
        Ok(changed)
    }

    /// Count one use of `token` without reading its payload.
    ///
    /// # Errors
    ///
    /// - [`VaultError::Validation`] if `token` is malformed.
    /// - [`VaultError::NotFound`] if no record exists.
    /// - [`VaultError::Storage`] if the repository fails.
    pub async fn track_usage(&self, token: &str) -> Result<(), VaultError> {
        validate_token(token)?;
        if !self.repo.increment_usage(token).await? {
            return Err(VaultError::NotFound);
        }
        debug!(token_prefix = token_prefix(token), "token usage tracked");
        Ok(())
    }

    /// Read everything about `token` except its ciphertext.
    ///
    /// # Errors
    ///
    /// - [`VaultError::Validation`] if `token` is malformed.
    /// - [`VaultError::NotFound`] if no record exists.
    /// - [`VaultError::Storage`] if the repository fails.
    pub async fn inspect(&self, token: &str) -> Result<TokenMetadata, VaultError> {
        let record = self.fetch(token).await?;
        let expired = record.is_expired_at(Utc::now());
        Ok(TokenMetadata {
            token: record.token,
            created_at: record.created_at,
            expires_at: record.expires_at,
            status: record.status,
            usage_count: record.usage_count,
            expired,
        })
    }

    /// Whether a record exists for `token`, regardless of its state.
    ///
    /// # Errors
    ///
    /// - [`VaultError::Validation`] if `token` is malformed.
    /// - [`VaultError::Storage`] if the repository fails.
    pub async fn exists(&self, token: &str) -> Result<bool, VaultError> {
        validate_token(token)?;
        Ok(self.repo.find_by_token(token).await?.is_some())
    }

    async fn fetch(&self, token: &str) -> Result<TokenRecord, VaultError> {
        validate_token(token)?;
        self.repo
            .find_by_token(token)
            .await?
            .ok_or(VaultError::NotFound)
    }
}

impl std::fmt::Debug for Vault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vault")
            .field("cipher", &self.codec.mode())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Whether `token` has the shape of a vault token: 32 lowercase hex chars.
#[must_use]
pub fn is_valid_token(token: &str) -> bool {
    token.len() == TOKEN_LEN
        && token
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

fn validate_token(token: &str) -> Result<(), VaultError> {
    if is_valid_token(token) {
        Ok(())
    } else {
        Err(VaultError::Validation {
            reason: format!("token must be {TOKEN_LEN} lowercase hex characters"),
        })
    }
}

/// 16 random bytes from the OS CSPRNG, hex-encoded.
fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_LEN / 2];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Enough of a token to correlate log lines without printing all of it.
fn token_prefix(token: &str) -> &str {
    token.get(..8).unwrap_or(token)
}
