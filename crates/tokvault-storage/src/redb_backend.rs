//! Pure-Rust redb token repository.
//!
//! The embedded default for single-node deployments. Feature-gated behind
//! `redb-backend`.
//!
//! Records are stored JSON-encoded in a single `tokens` table keyed by token.
//! Every mutation (insert, status change, usage increment) is a
//! read-check-write inside one redb write transaction, so concurrent callers
//! never observe or produce a partial update.

use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use redb::{Database, ReadableTable, TableDefinition};
use tracing::debug;

use crate::{StorageError, TokenRecord, TokenRepository, TokenStatus};

const TOKENS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("tokens");

/// A token repository backed by redb (pure Rust, B-tree based).
///
/// Thread-safe via `Arc<Database>`. Blocking redb calls are offloaded to the
/// Tokio blocking thread pool.
///
/// # Examples
///
/// ```no_run
/// # use tokvault_storage::RedbRepository;
/// let repo = RedbRepository::open("/var/lib/tokvault/tokens.redb").unwrap();
/// ```
#[derive(Clone)]
pub struct RedbRepository {
    db: Arc<Database>,
    path: PathBuf,
}

impl std::fmt::Debug for RedbRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbRepository")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl RedbRepository {
    /// Open or create a redb database at the given path.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Open`] if redb fails to open or create the
    /// database file, or [`StorageError::Transaction`] if the `tokens` table
    /// cannot be created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref();
        let open_err = |e: &dyn Display| StorageError::Open {
            path: path.display().to_string(),
            reason: e.to_string(),
        };
        let db = Database::create(path).map_err(|e| open_err(&e))?;

        // Opening the table in a write txn creates it if missing.
        let txn = db.begin_write().map_err(txn_err)?;
        txn.open_table(TOKENS_TABLE).map_err(|e| open_err(&e))?;
        txn.commit().map_err(txn_err)?;
        debug!(path = %path.display(), "redb token store opened");

        Ok(Self {
            db: Arc::new(db),
            path: path.to_path_buf(),
        })
    }

    /// Return the filesystem path of this database.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Apply `apply` to the stored record inside one write transaction.
    ///
    /// `apply` returns whether it changed the record; only then is the record
    /// written back. Returns `false` when the token is absent.
    async fn modify<F>(&self, token: &str, apply: F) -> Result<bool, StorageError>
    where
        F: FnOnce(&mut TokenRecord) -> bool + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        let token = token.to_owned();
        tokio::task::spawn_blocking(move || {
            let txn = db.begin_write().map_err(txn_err)?;
            let changed = {
                let mut table = txn.open_table(TOKENS_TABLE).map_err(txn_err)?;
                let current = table
                    .get(token.as_str())
                    .map_err(|e| read_err(&token, e))?
                    .map(|v| v.value().to_vec());

                match current {
                    None => false,
                    Some(bytes) => {
                        let mut record = decode(&token, &bytes)?;
                        if apply(&mut record) {
                            let encoded = encode(&record)?;
                            table
                                .insert(token.as_str(), encoded.as_slice())
                                .map_err(|e| write_err(&token, e))?;
                            true
                        } else {
                            false
                        }
                    }
                }
            };
            txn.commit().map_err(txn_err)?;
            Ok(changed)
        })
        .await
        .map_err(|e| StorageError::Write {
            token: String::new(),
            reason: format!("blocking task panicked: {e}"),
        })?
    }
}

#[async_trait::async_trait]
impl TokenRepository for RedbRepository {
    async fn insert(&self, record: &TokenRecord) -> Result<(), StorageError> {
        let db = Arc::clone(&self.db);
        let token = record.token.clone();
        let encoded = encode(record)?;
        tokio::task::spawn_blocking(move || {
            let txn = db.begin_write().map_err(txn_err)?;
            {
                let mut table = txn.open_table(TOKENS_TABLE).map_err(txn_err)?;
                let exists = table
                    .get(token.as_str())
                    .map_err(|e| read_err(&token, e))?
                    .is_some();
                if exists {
                    return Err(StorageError::Duplicate { token });
                }
                table
                    .insert(token.as_str(), encoded.as_slice())
                    .map_err(|e| write_err(&token, e))?;
            }
            txn.commit().map_err(txn_err)?;
            Ok(())
        })
        .await
        .map_err(|e| StorageError::Write {
            token: String::new(),
            reason: format!("blocking task panicked: {e}"),
        })?
    }

    async fn find_by_token(&self, token: &str) -> Result<Option<TokenRecord>, StorageError> {
        let db = Arc::clone(&self.db);
        let token = token.to_owned();
        tokio::task::spawn_blocking(move || {
            let txn = db.begin_read().map_err(txn_err)?;
            let table = txn.open_table(TOKENS_TABLE).map_err(txn_err)?;
            let bytes = table
                .get(token.as_str())
                .map_err(|e| read_err(&token, e))?
                .map(|v| v.value().to_vec());
            bytes.map(|b| decode(&token, &b)).transpose()
        })
        .await
        .map_err(|e| StorageError::Read {
            token: String::new(),
            reason: format!("blocking task panicked: {e}"),
        })?
    }

    async fn update_status(&self, token: &str, status: TokenStatus) -> Result<bool, StorageError> {
        self.modify(token, move |record| {
            if record.status == status {
                false
            } else {
                record.status = status;
                true
            }
        })
        .await
    }

    async fn increment_usage(&self, token: &str) -> Result<bool, StorageError> {
        self.modify(token, |record| {
            record.usage_count = record.usage_count.saturating_add(1);
            true
        })
        .await
    }
}

fn encode(record: &TokenRecord) -> Result<Vec<u8>, StorageError> {
    serde_json::to_vec(record).map_err(|e| StorageError::Serialization {
        token: record.token.clone(),
        reason: e.to_string(),
    })
}

fn decode(token: &str, bytes: &[u8]) -> Result<TokenRecord, StorageError> {
    serde_json::from_slice(bytes).map_err(|e| StorageError::Serialization {
        token: token.to_owned(),
        reason: e.to_string(),
    })
}

fn txn_err<E: Display>(e: E) -> StorageError {
    StorageError::Transaction {
        reason: e.to_string(),
    }
}

fn read_err<E: Display>(token: &str, e: E) -> StorageError {
    StorageError::Read {
        token: token.to_owned(),
        reason: e.to_string(),
    }
}

fn write_err<E: Display>(token: &str, e: E) -> StorageError {
    StorageError::Write {
        token: token.to_owned(),
        reason: e.to_string(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn record(token: &str) -> TokenRecord {
        TokenRecord {
            token: token.to_owned(),
            ciphertext: "c2VjcmV0".to_owned(),
            created_at: Utc::now(),
            expires_at: Some(Utc::now()),
            status: TokenStatus::Active,
            usage_count: 0,
        }
    }

    fn open_temp() -> (tempfile::TempDir, RedbRepository) {
        let dir = tempfile::tempdir().unwrap();
        let repo = RedbRepository::open(dir.path().join("tokens.redb")).unwrap();
        (dir, repo)
    }

    #[tokio::test]
    async fn insert_and_find_roundtrip() {
        let (_dir, repo) = open_temp();
        let rec = record("aa");
        repo.insert(&rec).await.unwrap();
        assert_eq!(repo.find_by_token("aa").await.unwrap(), Some(rec));
        assert_eq!(repo.find_by_token("bb").await.unwrap(), None);
    }

    #[tokio::test]
    async fn duplicate_insert_is_rejected() {
        let (_dir, repo) = open_temp();
        repo.insert(&record("aa")).await.unwrap();
        let result = repo.insert(&record("aa")).await;
        assert!(matches!(result, Err(StorageError::Duplicate { token }) if token == "aa"));
    }

    #[tokio::test]
    async fn status_and_usage_updates_persist() {
        let (_dir, repo) = open_temp();
        repo.insert(&record("aa")).await.unwrap();

        assert!(repo.update_status("aa", TokenStatus::Revoked).await.unwrap());
        assert!(!repo.update_status("aa", TokenStatus::Revoked).await.unwrap());
        assert!(repo.increment_usage("aa").await.unwrap());
        assert!(!repo.increment_usage("zz").await.unwrap());

        let stored = repo.find_by_token("aa").await.unwrap().unwrap();
        assert_eq!(stored.status, TokenStatus::Revoked);
        assert_eq!(stored.usage_count, 1);
        assert_eq!(stored.ciphertext, "c2VjcmV0");
    }

    #[tokio::test]
    async fn reopen_reads_existing_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.redb");
        {
            let repo = RedbRepository::open(&path).unwrap();
            repo.insert(&record("aa")).await.unwrap();
        }
        let repo = RedbRepository::open(&path).unwrap();
        assert!(repo.find_by_token("aa").await.unwrap().is_some());
        assert_eq!(repo.path(), path.as_path());
    }
}
