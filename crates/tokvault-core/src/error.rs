//! Error types for `tokvault-core`.
//!
//! Each error variant carries enough context to diagnose the problem without
//! a debugger. No variant ever includes key material, payloads, OTP secrets,
//! or candidate codes.

use tokvault_storage::StorageError;

/// Errors from the crypto codec.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// The cipher rejected the encryption request.
    #[error("encryption failed: {reason}")]
    Encryption { reason: String },

    /// The blob is not valid base64, lacks the separator, or carries an IV of
    /// the wrong size.
    #[error("malformed ciphertext blob: {reason}")]
    Decode { reason: String },

    /// Decryption failed (wrong key, corrupted ciphertext, or tampered tag).
    ///
    /// Deliberately carries no detail: padding and tag failures must look
    /// identical to callers.
    #[error("decryption failed")]
    Decryption,
}

/// Errors from loading or validating configuration.
///
/// These are fatal at startup; nothing should serve requests after one.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required setting was not supplied.
    #[error("missing required setting '{name}'")]
    Missing { name: String },

    /// The encryption key could not be decoded or has the wrong length.
    #[error("invalid encryption key: {reason}")]
    InvalidKey { reason: String },

    /// A setting has a value outside its allowed range or format.
    #[error("invalid setting '{name}': {reason}")]
    InvalidSetting { name: String, reason: String },
}

/// Errors from vault operations.
#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    /// Malformed token or payload supplied by the caller.
    #[error("invalid input: {reason}")]
    Validation { reason: String },

    /// No record exists for the token.
    #[error("token not found")]
    NotFound,

    /// The token exists but its expiry has passed.
    #[error("token expired at {expired_at}")]
    Expired { expired_at: String },

    /// The token exists but has been revoked.
    #[error("token has been revoked")]
    Revoked,

    /// The stored ciphertext could not be decoded or decrypted.
    #[error("token crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// The repository returned an error.
    #[error("token storage error: {0}")]
    Storage(#[from] StorageError),
}

impl VaultError {
    /// Whether this error means "the token cannot be used".
    ///
    /// Callers that must not reveal why a token failed should collapse every
    /// error for which this returns `true` into one response. Decryption
    /// failures belong here so the vault cannot be used as a padding oracle.
    #[must_use]
    pub fn is_token_invalid(&self) -> bool {
        matches!(
            self,
            Self::NotFound | Self::Expired { .. } | Self::Revoked | Self::Crypto(_)
        )
    }
}

/// Errors from the TOTP engine.
#[derive(Debug, thiserror::Error)]
pub enum TotpError {
    /// The candidate code is not exactly the configured number of digits.
    #[error("invalid OTP format: expected {digits} numeric digits")]
    Validation { digits: u32 },

    /// The shared secret is not hex or is shorter than the minimum.
    #[error("invalid TOTP secret: {reason}")]
    InvalidSecret { reason: String },
}
