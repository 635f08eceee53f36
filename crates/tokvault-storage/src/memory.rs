//! In-memory token repository for testing.
//!
//! Records live in a `BTreeMap` behind a `RwLock`. Nothing is persisted; all
//! data is lost when the process exits. Every method takes the write (or read)
//! lock for its whole duration, which makes each one atomic.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::{StorageError, TokenRecord, TokenRepository, TokenStatus};

/// An in-memory repository backed by a `BTreeMap`.
///
/// Cloning yields a handle to the same underlying map.
///
/// # Examples
///
/// ```
/// # use tokvault_storage::{MemoryRepository, TokenRepository};
/// # #[tokio::main]
/// # async fn main() {
/// let repo = MemoryRepository::new();
/// assert!(repo.find_by_token("missing").await.unwrap().is_none());
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryRepository {
    records: Arc<RwLock<BTreeMap<String, TokenRecord>>>,
}

impl MemoryRepository {
    /// Create a new empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// Whether the repository holds no records.
    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait::async_trait]
impl TokenRepository for MemoryRepository {
    async fn insert(&self, record: &TokenRecord) -> Result<(), StorageError> {
        let mut records = self.records.write().await;
        match records.entry(record.token.clone()) {
            Entry::Occupied(_) => Err(StorageError::Duplicate {
                token: record.token.clone(),
            }),
            Entry::Vacant(slot) => {
                slot.insert(record.clone());
                Ok(())
            }
        }
    }

    async fn find_by_token(&self, token: &str) -> Result<Option<TokenRecord>, StorageError> {
        let records = self.records.read().await;
        Ok(records.get(token).cloned())
    }

    async fn update_status(&self, token: &str, status: TokenStatus) -> Result<bool, StorageError> {
        let mut records = self.records.write().await;
        match records.get_mut(token) {
            Some(record) if record.status != status => {
                record.status = status;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn increment_usage(&self, token: &str) -> Result<bool, StorageError> {
        let mut records = self.records.write().await;
        Ok(records.get_mut(token).is_some_and(|record| {
            record.usage_count = record.usage_count.saturating_add(1);
            true
        }))
    }
}
