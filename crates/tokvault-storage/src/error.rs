//! Storage error types.
//!
//! Every variant carries enough context to diagnose the problem without a
//! debugger. Ciphertext and payloads never appear in error messages; tokens
//! are opaque public identifiers and may.

/// Errors that can occur during repository operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Failed to open or connect to the backend.
    #[error("failed to open storage at '{path}': {reason}")]
    Open { path: String, reason: String },

    /// Failed to read a record.
    #[error("failed to read token '{token}': {reason}")]
    Read { token: String, reason: String },

    /// Failed to write a record.
    #[error("failed to write token '{token}': {reason}")]
    Write { token: String, reason: String },

    /// Failed to begin or commit a transaction.
    #[error("transaction failed: {reason}")]
    Transaction { reason: String },

    /// A stored record could not be encoded or decoded.
    #[error("record serialization failed for token '{token}': {reason}")]
    Serialization { token: String, reason: String },

    /// A record with this token already exists.
    #[error("token '{token}' already exists")]
    Duplicate { token: String },
}
