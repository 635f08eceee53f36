//! Core library for `tokvault`.
//!
//! Contains the crypto codec (AES-256 encryption of payloads into opaque
//! blobs), the token vault (tokenize, detokenize, revoke, expiry, usage
//! tracking), and the TOTP engine. This crate depends on `tokvault-storage`
//! for the repository trait and knows nothing about concrete backends,
//! environment variables, or command-line handling.

pub mod config;
pub mod crypto;
pub mod error;
pub mod totp;
pub mod vault;

pub use config::{TotpConfig, VaultConfig};
pub use crypto::{CipherMode, CryptoCodec, EncryptionKey};
pub use error::{ConfigError, CryptoError, TotpError, VaultError};
pub use totp::TotpEngine;
pub use vault::{Expiry, TokenMetadata, Vault};
