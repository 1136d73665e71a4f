//! Durable metadata for stored objects.
//!
//! [`MetadataStore`] is the seam between the object API and the engine
//! holding the records. Production uses [`SqliteMetadataStore`] (WAL journal,
//! so the sweeper and request handlers read concurrently); tests can swap in
//! the in-memory fake.

use crate::{
    models::object::ObjectRecord,
    services::object_store::{StoreError, StoreResult},
};
use async_trait::async_trait;
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
};
use std::{str::FromStr, time::Duration};
use tracing::debug;

/// Schema applied at start-up and by `--migrate`.
const INIT_SQL: &str = include_str!("../../migrations/0001_init.sql");

const OBJECT_COLUMNS: &str =
    "id, display_name, storage_key, size_bytes, content_type, created_at, expires_at";

/// Record-level persistence. One row per object id.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Insert a new record. Fails with `DuplicateId` if the id is taken.
    async fn insert(&self, record: &ObjectRecord) -> StoreResult<()>;

    /// Fetch a record regardless of liveness.
    async fn get(&self, id: &str) -> StoreResult<Option<ObjectRecord>>;

    /// All records with `expires_at <= now`, oldest first.
    async fn expired(&self, now: i64) -> StoreResult<Vec<ObjectRecord>>;

    /// Remove a record. Returns whether a row was actually deleted.
    async fn delete(&self, id: &str) -> StoreResult<bool>;

    /// Number of stored rows, expired-but-unswept ones included.
    async fn count(&self) -> StoreResult<u64>;

    /// Cheap connectivity check for the readiness endpoint.
    async fn ping(&self) -> StoreResult<()>;
}

/// SQLite-backed [`MetadataStore`].
#[derive(Clone, Debug)]
pub struct SqliteMetadataStore {
    db: SqlitePool,
}

impl SqliteMetadataStore {
    /// Open (creating if missing) the database at `database_url`.
    ///
    /// The journal runs in WAL mode and writers wait up to five seconds for
    /// a lock instead of failing with `SQLITE_BUSY`.
    pub async fn connect(database_url: &str) -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let db = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        Ok(Self { db })
    }

    /// Apply the embedded schema. Idempotent.
    pub async fn migrate(&self) -> StoreResult<usize> {
        let statements = INIT_SQL
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        for stmt in &statements {
            debug!("Executing migration SQL: {}", stmt);
            sqlx::query(stmt).execute(&self.db).await?;
        }

        Ok(statements.len())
    }
}

#[async_trait]
impl MetadataStore for SqliteMetadataStore {
    async fn insert(&self, record: &ObjectRecord) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO objects (
                id, display_name, storage_key, size_bytes, content_type, created_at, expires_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.id)
        .bind(&record.display_name)
        .bind(&record.storage_key)
        .bind(record.size_bytes)
        .bind(record.content_type.as_deref())
        .bind(record.created_at)
        .bind(record.expires_at)
        .execute(&self.db)
        .await
        .map_err(|err| {
            if is_unique_violation(&err) {
                StoreError::DuplicateId(record.id.clone())
            } else {
                StoreError::Sqlx(err)
            }
        })?;

        Ok(())
    }

    async fn get(&self, id: &str) -> StoreResult<Option<ObjectRecord>> {
        let sql = format!("SELECT {OBJECT_COLUMNS} FROM objects WHERE id = ?");
        let record = sqlx::query_as::<_, ObjectRecord>(&sql)
            .bind(id)
            .fetch_optional(&self.db)
            .await?;
        Ok(record)
    }

    async fn expired(&self, now: i64) -> StoreResult<Vec<ObjectRecord>> {
        let sql = format!(
            "SELECT {OBJECT_COLUMNS} FROM objects WHERE expires_at <= ? ORDER BY expires_at ASC"
        );
        let records = sqlx::query_as::<_, ObjectRecord>(&sql)
            .bind(now)
            .fetch_all(&self.db)
            .await?;
        Ok(records)
    }

    async fn delete(&self, id: &str) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM objects WHERE id = ?")
            .bind(id)
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn count(&self) -> StoreResult<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM objects")
            .fetch_one(&self.db)
            .await?;
        Ok(count.max(0) as u64)
    }

    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.db).await?;
        Ok(())
    }
}

/// Return true if SQLx error indicates a unique constraint violation.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.is_unique_violation()
            || db_err.message().to_ascii_lowercase().contains("unique")
    )
}
