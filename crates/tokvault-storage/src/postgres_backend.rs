//! PostgreSQL token repository.
//!
//! Stores records in a single `tokens` table. The primary key on `token`
//! enforces uniqueness, and status/usage changes are single `UPDATE`
//! statements, so the database provides the per-record atomicity the vault
//! relies on.
//!
//! Feature-gated behind `postgres-backend`. Uses `sqlx` with the Tokio
//! runtime for fully async operations, so no `spawn_blocking` is needed.

use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use tracing::debug;

use crate::{StorageError, TokenRecord, TokenRepository, TokenStatus};

/// A token repository backed by PostgreSQL.
///
/// Thread-safe via `PgPool` (connection pool).
///
/// # Examples
///
/// ```no_run
/// # use tokvault_storage::PostgresRepository;
/// # #[tokio::main]
/// # async fn main() {
/// let repo = PostgresRepository::connect("postgres://localhost/tokvault").await.unwrap();
/// # }
/// ```
#[derive(Clone)]
pub struct PostgresRepository {
    pool: PgPool,
}

impl std::fmt::Debug for PostgresRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresRepository")
            .field("pool", &"[PgPool]")
            .finish_non_exhaustive()
    }
}

impl PostgresRepository {
    /// Connect to PostgreSQL and create the `tokens` table if needed.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Open`] if the connection or migration fails.
    /// The connection string is never echoed back, since it may carry a
    /// password.
    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(|e| StorageError::Open {
                path: "[postgres]".to_owned(),
                reason: e.to_string(),
            })?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS tokens (
                token       CHAR(32)    PRIMARY KEY,
                ciphertext  TEXT        NOT NULL,
                created_at  TIMESTAMPTZ NOT NULL,
                expires_at  TIMESTAMPTZ,
                status      TEXT        NOT NULL DEFAULT 'active',
                usage_count BIGINT      NOT NULL DEFAULT 0
            )",
        )
        .execute(&pool)
        .await
        .map_err(|e| StorageError::Open {
            path: "[postgres]".to_owned(),
            reason: format!("migration failed: {e}"),
        })?;
        debug!("postgres tokens table ready");

        Ok(Self { pool })
    }
}

#[async_trait::async_trait]
impl TokenRepository for PostgresRepository {
    async fn insert(&self, record: &TokenRecord) -> Result<(), StorageError> {
        let usage = i64::try_from(record.usage_count).unwrap_or(i64::MAX);
        sqlx::query(
            "INSERT INTO tokens (token, ciphertext, created_at, expires_at, status, usage_count)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(&record.token)
        .bind(&record.ciphertext)
        .bind(record.created_at)
        .bind(record.expires_at)
        .bind(record.status.as_str())
        .bind(usage)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            let duplicate = e
                .as_database_error()
                .is_some_and(|db| db.is_unique_violation());
            if duplicate {
                StorageError::Duplicate {
                    token: record.token.clone(),
                }
            } else {
                StorageError::Write {
                    token: record.token.clone(),
                    reason: e.to_string(),
                }
            }
        })?;
        Ok(())
    }

    async fn find_by_token(&self, token: &str) -> Result<Option<TokenRecord>, StorageError> {
        let row = sqlx::query(
            "SELECT token, ciphertext, created_at, expires_at, status, usage_count
             FROM tokens WHERE token = $1",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::Read {
            token: token.to_owned(),
            reason: e.to_string(),
        })?;

        row.map(|r| record_from_row(token, &r)).transpose()
    }

    async fn update_status(&self, token: &str, status: TokenStatus) -> Result<bool, StorageError> {
        let result = sqlx::query("UPDATE tokens SET status = $2 WHERE token = $1 AND status <> $2")
            .bind(token)
            .bind(status.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Write {
                token: token.to_owned(),
                reason: e.to_string(),
            })?;
        Ok(result.rows_affected() > 0)
    }

    async fn increment_usage(&self, token: &str) -> Result<bool, StorageError> {
        let result = sqlx::query("UPDATE tokens SET usage_count = usage_count + 1 WHERE token = $1")
            .bind(token)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Write {
                token: token.to_owned(),
                reason: e.to_string(),
            })?;
        Ok(result.rows_affected() > 0)
    }
}

fn record_from_row(token: &str, row: &PgRow) -> Result<TokenRecord, StorageError> {
    let malformed = |reason: String| StorageError::Serialization {
        token: token.to_owned(),
        reason,
    };
    let get_err = |e: sqlx::Error| malformed(e.to_string());

    let status: String = row.try_get("status").map_err(get_err)?;
    let usage: i64 = row.try_get("usage_count").map_err(get_err)?;

    Ok(TokenRecord {
        token: row.try_get("token").map_err(get_err)?,
        ciphertext: row.try_get("ciphertext").map_err(get_err)?,
        created_at: row.try_get("created_at").map_err(get_err)?,
        expires_at: row.try_get("expires_at").map_err(get_err)?,
        status: status.parse().map_err(malformed)?,
        usage_count: u64::try_from(usage).map_err(|e| malformed(e.to_string()))?,
    })
}
