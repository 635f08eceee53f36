//! Persistence port for `tokvault`.
//!
//! This crate defines the [`TokenRepository`] trait (the narrow record store
//! the vault talks to) together with the [`TokenRecord`] shape it persists.
//! It knows nothing about encryption: the `ciphertext` column is an opaque
//! string produced by the crypto codec in `tokvault-core`.
//!
//! Three implementations are provided:
//!
//! - [`RedbRepository`]: embedded default, backed by redb (feature `redb-backend`)
//! - [`PostgresRepository`]: shared database backend (feature `postgres-backend`)
//! - [`MemoryRepository`]: in-memory, for tests and throwaway sessions
//!
//! Uniqueness of tokens and atomicity of the status/usage updates are the
//! backend's responsibility; every implementation here provides both.

mod error;
mod memory;
#[cfg(feature = "postgres-backend")]
mod postgres_backend;
mod record;
#[cfg(feature = "redb-backend")]
mod redb_backend;

pub use error::StorageError;
pub use memory::MemoryRepository;
#[cfg(feature = "postgres-backend")]
pub use postgres_backend::PostgresRepository;
pub use record::{TokenRecord, TokenStatus};
#[cfg(feature = "redb-backend")]
pub use redb_backend::RedbRepository;

/// A pluggable store of [`TokenRecord`]s keyed by their token.
///
/// Implementations must be safe to share across async tasks (`Send + Sync`)
/// and must make each method atomic with respect to concurrent callers.
#[async_trait::async_trait]
pub trait TokenRepository: Send + Sync + 'static {
    /// Persist a new record.
    ///
    /// This is create-only: an existing record with the same token is left
    /// untouched.
    ///
    /// # Errors
    ///
    /// - [`StorageError::Duplicate`] if the token already exists.
    /// - [`StorageError::Write`] if the underlying backend fails.
    async fn insert(&self, record: &TokenRecord) -> Result<(), StorageError>;

    /// Fetch a record by token.
    ///
    /// Returns `Ok(None)` if the token does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Read`] if the underlying backend fails.
    async fn find_by_token(&self, token: &str) -> Result<Option<TokenRecord>, StorageError>;

    /// Set the status of a record.
    ///
    /// Returns `true` only if the stored status actually changed; `false` if
    /// the token is absent or already has `status`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Write`] if the underlying backend fails.
    async fn update_status(&self, token: &str, status: TokenStatus) -> Result<bool, StorageError>;

    /// Add one to the record's usage counter.
    ///
    /// Returns `false` if the token is absent.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Write`] if the underlying backend fails.
    async fn increment_usage(&self, token: &str) -> Result<bool, StorageError>;
}
