use crate::directory::NodeId;
use crate::dispatch::{RelayRequest, RequestId};
use crate::offline::QueuedRelay;
use crate::store::error::{StoreError, StoreResult};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;

/// Durable home of privacy preferences and offline-queue entries
#[derive(Clone)]
pub struct RelayStore {
    pool: SqlitePool,
}

impl RelayStore {
    /// Open (or create) the store. Every commit is fsynced.
    pub async fn connect(database_url: &str) -> StoreResult<Self> {
        let in_memory = database_url.contains(":memory:");

        let mut options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .synchronous(SqliteSynchronous::Full);
        if !in_memory {
            options = options.journal_mode(SqliteJournalMode::Wal);
        }

        // An in-memory database lives and dies with its single connection
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(4)
        };

        let pool = pool_options.connect_with(options).await?;
        let store = Self { pool };
        store.init_schema().await?;

        tracing::debug!(database_url, "relay store opened");
        Ok(store)
    }

    /// In-memory database (for testing)
    pub async fn new_in_memory() -> StoreResult<Self> {
        Self::connect("sqlite::memory:").await
    }

    async fn init_schema(&self) -> StoreResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS privacy_preferences (
                node_id INTEGER PRIMARY KEY,
                opted_out INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS offline_queue (
                request_id TEXT PRIMARY KEY,
                recipient_id INTEGER NOT NULL,
                request TEXT NOT NULL,
                enqueued_at INTEGER NOT NULL,
                expires_at INTEGER NOT NULL,
                attempts_remaining INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_offline_recipient ON offline_queue(recipient_id, enqueued_at)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // ── Privacy preferences ──────────────────────────────────────────────────

    pub async fn save_privacy(
        &self,
        node_id: NodeId,
        opted_out: bool,
        at: DateTime<Utc>,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO privacy_preferences (node_id, opted_out, updated_at)
            VALUES (?, ?, ?)
            "#,
        )
        .bind(node_id.as_u32() as i64)
        .bind(opted_out)
        .bind(at.timestamp_millis())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn load_privacy(&self, node_id: NodeId) -> StoreResult<Option<bool>> {
        let row = sqlx::query("SELECT opted_out FROM privacy_preferences WHERE node_id = ?")
            .bind(node_id.as_u32() as i64)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(row.try_get::<bool, _>("opted_out")?)),
            None => Ok(None),
        }
    }

    /// Every node currently opted out
    pub async fn load_opted_out(&self) -> StoreResult<Vec<NodeId>> {
        let rows = sqlx::query("SELECT node_id FROM privacy_preferences WHERE opted_out = 1")
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| node_id_column(row, "node_id"))
            .collect()
    }

    // ── Offline queue ────────────────────────────────────────────────────────

    /// Insert or overwrite an entry, deleting `evicted` in the same transaction
    pub async fn put_queued(&self, entry: &QueuedRelay, evicted: &[RequestId]) -> StoreResult<()> {
        let request_json = serde_json::to_string(&entry.request)?;
        let mut tx = self.pool.begin().await?;

        for request_id in evicted {
            sqlx::query("DELETE FROM offline_queue WHERE request_id = ?")
                .bind(request_id.to_string())
                .execute(&mut *tx)
                .await?;
        }

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO offline_queue
            (request_id, recipient_id, request, enqueued_at, expires_at, attempts_remaining)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(entry.request_id().to_string())
        .bind(entry.recipient_id.as_u32() as i64)
        .bind(request_json)
        .bind(entry.enqueued_at.timestamp_millis())
        .bind(entry.expires_at.timestamp_millis())
        .bind(entry.attempts_remaining as i64)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Record a spent attempt on an entry that is out for re-delivery
    pub async fn set_attempts(&self, request_id: RequestId, attempts: u32) -> StoreResult<bool> {
        let result =
            sqlx::query("UPDATE offline_queue SET attempts_remaining = ? WHERE request_id = ?")
                .bind(attempts as i64)
                .bind(request_id.to_string())
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn delete_queued(&self, request_ids: &[RequestId]) -> StoreResult<u64> {
        if request_ids.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut deleted = 0;
        for request_id in request_ids {
            let result = sqlx::query("DELETE FROM offline_queue WHERE request_id = ?")
                .bind(request_id.to_string())
                .execute(&mut *tx)
                .await?;
            deleted += result.rows_affected();
        }
        tx.commit().await?;

        Ok(deleted)
    }

    /// All persisted entries, oldest first per recipient
    pub async fn load_queue(&self) -> StoreResult<Vec<QueuedRelay>> {
        let rows = sqlx::query(
            "SELECT * FROM offline_queue ORDER BY recipient_id, enqueued_at, rowid",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let request: RelayRequest =
                serde_json::from_str(&row.try_get::<String, _>("request")?)?;
            let attempts: i64 = row.try_get("attempts_remaining")?;

            entries.push(QueuedRelay {
                recipient_id: node_id_column(&row, "recipient_id")?,
                request,
                enqueued_at: timestamp_column(&row, "enqueued_at")?,
                expires_at: timestamp_column(&row, "expires_at")?,
                attempts_remaining: u32::try_from(attempts.max(0)).unwrap_or(0),
            });
        }

        Ok(entries)
    }

    pub async fn count_queued(&self) -> StoreResult<i64> {
        let row = sqlx::query("SELECT COUNT(*) as count FROM offline_queue")
            .fetch_one(&self.pool)
            .await?;

        Ok(row.try_get("count")?)
    }

    pub async fn queued_attempts(&self, request_id: RequestId) -> StoreResult<Option<u32>> {
        let row = sqlx::query("SELECT attempts_remaining FROM offline_queue WHERE request_id = ?")
            .bind(request_id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let attempts: i64 = row.try_get("attempts_remaining")?;
                Ok(Some(u32::try_from(attempts.max(0)).unwrap_or(0)))
            }
            None => Ok(None),
        }
    }

    /// Close database connection
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn node_id_column(row: &sqlx::sqlite::SqliteRow, column: &str) -> StoreResult<NodeId> {
    let raw: i64 = row.try_get(column)?;
    u32::try_from(raw)
        .map(NodeId)
        .map_err(|_| StoreError::InvalidRecord(format!("{column} out of range: {raw}")))
}

fn timestamp_column(row: &sqlx::sqlite::SqliteRow, column: &str) -> StoreResult<DateTime<Utc>> {
    let millis: i64 = row.try_get(column)?;
    DateTime::<Utc>::from_timestamp_millis(millis)
        .ok_or_else(|| StoreError::InvalidRecord(format!("{column} out of range: {millis}")))
}
