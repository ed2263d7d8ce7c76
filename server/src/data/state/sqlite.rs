//! SQLite state store
//!
//! Durable backend for registry and estuary state. Single-writer semantics
//! come from the actor layer, so the pool stays small and every statement is
//! a plain upsert/delete. WAL mode keeps loads cheap while actors write.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};

use super::error::StateError;
use super::store::{
    EstuaryIdentity, EstuaryRecord, EstuarySourceRow, SourceRecord, StateStore, SubscriberRow,
};
use crate::core::constants::{
    SQLITE_BUSY_TIMEOUT_SECS, SQLITE_DB_FILENAME, SQLITE_MAX_CONNECTIONS,
};
use crate::core::storage::{AppStorage, DataSubdir};
use crate::domain::keys::StreamKey;

/// Current schema version
const SCHEMA_VERSION: i32 = 1;

/// Initial schema
const SCHEMA: &str = r#"
CREATE TABLE schema_version (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    version INTEGER NOT NULL
);

CREATE TABLE source_subscribers (
    source_key TEXT NOT NULL,
    estuary_id TEXT NOT NULL,
    subscribed_at INTEGER NOT NULL,
    PRIMARY KEY (source_key, estuary_id)
);

CREATE TABLE source_sequences (
    source_key TEXT PRIMARY KEY,
    next_fanout_seq INTEGER NOT NULL
);

CREATE TABLE estuary_sources (
    estuary_key TEXT NOT NULL,
    stream_id TEXT NOT NULL,
    subscribed_at INTEGER NOT NULL,
    PRIMARY KEY (estuary_key, stream_id)
);

CREATE TABLE estuary_identity (
    estuary_key TEXT PRIMARY KEY,
    project_id TEXT NOT NULL,
    estuary_id TEXT NOT NULL,
    expires_at INTEGER
);

CREATE INDEX idx_estuary_sources_recent
    ON estuary_sources (estuary_key, subscribed_at DESC);
"#;

/// SQLite-backed state store
pub struct SqliteStateStore {
    pool: SqlitePool,
}

impl SqliteStateStore {
    /// Initialize the store in the application data directory
    pub async fn init(storage: &AppStorage) -> Result<Self, StateError> {
        let db_path = storage.subdir(DataSubdir::Sqlite).join(SQLITE_DB_FILENAME);
        Self::connect(&db_path).await
    }

    /// Open (or create) the database at an explicit path
    pub async fn connect(db_path: &Path) -> Result<Self, StateError> {
        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(SQLITE_BUSY_TIMEOUT_SECS));

        let pool = SqlitePoolOptions::new()
            .max_connections(SQLITE_MAX_CONNECTIONS)
            .connect_with(options)
            .await?;

        run_migrations(&pool).await?;

        tracing::debug!(path = %db_path.display(), "SQLite state store initialized");
        Ok(Self { pool })
    }

    /// Close the connection pool gracefully
    pub async fn close(&self) {
        self.pool.close().await;
        tracing::debug!("SQLite state pool closed");
    }
}

/// Apply the schema if missing; bail on newer-than-supported databases
async fn run_migrations(pool: &SqlitePool) -> Result<(), StateError> {
    let table_exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='schema_version'",
    )
    .fetch_one(pool)
    .await?;

    if !table_exists {
        tracing::debug!("Initializing state schema version {}", SCHEMA_VERSION);
        let mut tx = pool.begin().await?;
        sqlx::query(SCHEMA).execute(&mut *tx).await?;
        sqlx::query("INSERT INTO schema_version (id, version) VALUES (1, ?)")
            .bind(SCHEMA_VERSION)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        return Ok(());
    }

    let current: i32 = sqlx::query_scalar("SELECT version FROM schema_version WHERE id = 1")
        .fetch_optional(pool)
        .await?
        .unwrap_or(0);

    if current > SCHEMA_VERSION {
        return Err(StateError::Migration(format!(
            "database schema version {current} is newer than supported {SCHEMA_VERSION}"
        )));
    }

    tracing::debug!("State schema is up to date (version {})", current);
    Ok(())
}

#[async_trait]
impl StateStore for SqliteStateStore {
    async fn load_source(&self, key: &StreamKey) -> Result<SourceRecord, StateError> {
        let path = key.as_path();

        let next_fanout_seq: Option<i64> =
            sqlx::query_scalar("SELECT next_fanout_seq FROM source_sequences WHERE source_key = ?")
                .bind(&path)
                .fetch_optional(&self.pool)
                .await?;

        let rows: Vec<(String, i64)> = sqlx::query_as(
            r#"
            SELECT estuary_id, subscribed_at
            FROM source_subscribers
            WHERE source_key = ?
            ORDER BY estuary_id
            "#,
        )
        .bind(&path)
        .fetch_all(&self.pool)
        .await?;

        Ok(SourceRecord {
            subscribers: rows
                .into_iter()
                .map(|(estuary_id, subscribed_at)| SubscriberRow {
                    estuary_id,
                    subscribed_at,
                })
                .collect(),
            next_fanout_seq: next_fanout_seq.unwrap_or(0).max(0) as u64,
        })
    }

    async fn insert_subscriber(
        &self,
        key: &StreamKey,
        estuary_id: &str,
        subscribed_at: i64,
    ) -> Result<bool, StateError> {
        let result = sqlx::query(
            r#"
            INSERT INTO source_subscribers (source_key, estuary_id, subscribed_at)
            VALUES (?, ?, ?)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(key.as_path())
        .bind(estuary_id)
        .bind(subscribed_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_subscribers(
        &self,
        key: &StreamKey,
        estuary_ids: &[String],
    ) -> Result<u64, StateError> {
        if estuary_ids.is_empty() {
            return Ok(0);
        }

        // Single atomic statement; the id list is bounded by the fanout batch size
        let placeholders = vec!["?"; estuary_ids.len()].join(", ");
        let sql = format!(
            "DELETE FROM source_subscribers WHERE source_key = ? AND estuary_id IN ({placeholders})"
        );

        let mut query = sqlx::query(&sql).bind(key.as_path());
        for id in estuary_ids {
            query = query.bind(id);
        }

        let result = query.execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn save_next_fanout_seq(&self, key: &StreamKey, next: u64) -> Result<(), StateError> {
        sqlx::query(
            r#"
            INSERT INTO source_sequences (source_key, next_fanout_seq)
            VALUES (?, ?)
            ON CONFLICT (source_key) DO UPDATE SET next_fanout_seq = excluded.next_fanout_seq
            "#,
        )
        .bind(key.as_path())
        .bind(next as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_estuary(&self, key: &StreamKey) -> Result<EstuaryRecord, StateError> {
        let path = key.as_path();

        let identity: Option<(String, String, Option<i64>)> = sqlx::query_as(
            "SELECT project_id, estuary_id, expires_at FROM estuary_identity WHERE estuary_key = ?",
        )
        .bind(&path)
        .fetch_optional(&self.pool)
        .await?;

        let rows: Vec<(String, i64)> = sqlx::query_as(
            r#"
            SELECT stream_id, subscribed_at
            FROM estuary_sources
            WHERE estuary_key = ?
            ORDER BY subscribed_at DESC, stream_id
            "#,
        )
        .bind(&path)
        .fetch_all(&self.pool)
        .await?;

        Ok(EstuaryRecord {
            sources: rows
                .into_iter()
                .map(|(stream_id, subscribed_at)| EstuarySourceRow {
                    stream_id,
                    subscribed_at,
                })
                .collect(),
            identity: identity.map(|(project_id, estuary_id, expires_at)| EstuaryIdentity {
                project_id,
                estuary_id,
                expires_at,
            }),
        })
    }

    async fn insert_estuary_source(
        &self,
        key: &StreamKey,
        stream_id: &str,
        subscribed_at: i64,
    ) -> Result<bool, StateError> {
        let result = sqlx::query(
            r#"
            INSERT INTO estuary_sources (estuary_key, stream_id, subscribed_at)
            VALUES (?, ?, ?)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(key.as_path())
        .bind(stream_id)
        .bind(subscribed_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_estuary_source(
        &self,
        key: &StreamKey,
        stream_id: &str,
    ) -> Result<bool, StateError> {
        let result =
            sqlx::query("DELETE FROM estuary_sources WHERE estuary_key = ? AND stream_id = ?")
                .bind(key.as_path())
                .bind(stream_id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn save_estuary_identity(
        &self,
        key: &StreamKey,
        identity: &EstuaryIdentity,
    ) -> Result<(), StateError> {
        sqlx::query(
            r#"
            INSERT INTO estuary_identity (estuary_key, project_id, estuary_id, expires_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (estuary_key) DO UPDATE SET
                project_id = excluded.project_id,
                estuary_id = excluded.estuary_id,
                expires_at = excluded.expires_at
            "#,
        )
        .bind(key.as_path())
        .bind(&identity.project_id)
        .bind(&identity.estuary_id)
        .bind(identity.expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn clear_estuary(&self, key: &StreamKey) -> Result<(), StateError> {
        let path = key.as_path();
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM estuary_sources WHERE estuary_key = ?")
            .bind(&path)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM estuary_identity WHERE estuary_key = ?")
            .bind(&path)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "sqlite"
    }
}
