//! Outbox rows

use super::{millis_to_datetime, now_millis, LocalDatabase, SqlValue, Table};
use crate::error::{SyncError, SyncResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Executor, Row, Sqlite};
use std::fmt;
use std::str::FromStr;

/// Operation type in sync queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OperationType {
    Create,
    Update,
    Delete,
}

impl OperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::Create => "CREATE",
            OperationType::Update => "UPDATE",
            OperationType::Delete => "DELETE",
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationType {
    type Err = SyncError;

    fn from_str(s: &str) -> SyncResult<Self> {
        match s {
            "CREATE" => Ok(OperationType::Create),
            "UPDATE" => Ok(OperationType::Update),
            "DELETE" => Ok(OperationType::Delete),
            _ => Err(SyncError::InvalidPayload(format!("Unknown operation type: {}", s))),
        }
    }
}

/// Sync queue entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncQueueItem {
    pub id: i64,
    /// Row in `table_name` the mutation originated from
    pub local_id: Option<i64>,
    pub table_name: String,
    /// Stored as text so rows written by other versions still load
    pub operation: String,
    /// Serialized payload
    pub data: Option<String>,
    pub created_at: DateTime<Utc>,
    pub retry_count: i64,
    pub last_error: Option<String>,
}

/// Sync queue entry before it is stored
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSyncQueueItem {
    pub local_id: Option<i64>,
    pub table_name: String,
    pub operation: OperationType,
    pub data: Option<String>,
}

const SELECT_COLUMNS: &str =
    "SELECT id, local_id, table_name, operation, data, created_at, retry_count, last_error FROM sync_queue";

fn from_row(row: &SqliteRow) -> SyncResult<SyncQueueItem> {
    Ok(SyncQueueItem {
        id: row.try_get("id")?,
        local_id: row.try_get("local_id")?,
        table_name: row.try_get("table_name")?,
        operation: row.try_get("operation")?,
        data: row.try_get("data")?,
        created_at: millis_to_datetime(row.try_get("created_at")?)?,
        retry_count: row.try_get("retry_count")?,
        last_error: row.try_get("last_error")?,
    })
}

pub(crate) async fn insert<'e, E>(executor: E, item: &NewSyncQueueItem) -> SyncResult<i64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        r#"
        INSERT INTO sync_queue (local_id, table_name, operation, data, created_at, retry_count)
        VALUES (?, ?, ?, ?, ?, 0)
        "#,
    )
    .bind(item.local_id)
    .bind(&item.table_name)
    .bind(item.operation.as_str())
    .bind(item.data.as_deref())
    .bind(now_millis())
    .execute(executor)
    .await?;

    Ok(result.last_insert_rowid())
}

pub(crate) async fn delete<'e, E>(executor: E, id: i64) -> SyncResult<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query("DELETE FROM sync_queue WHERE id = ?")
        .bind(id)
        .execute(executor)
        .await?;
    Ok(())
}

impl LocalDatabase {
    /// Append an entry to the outbox
    pub async fn insert_sync_item(&self, item: &NewSyncQueueItem) -> SyncResult<i64> {
        let id = insert(self.pool().await?, item).await?;

        tracing::debug!(
            queue_id = id,
            table = %item.table_name,
            operation = %item.operation,
            local_id = ?item.local_id,
            "Queued operation for sync"
        );

        Ok(id)
    }

    /// All outbox entries, oldest first
    pub async fn sync_queue(&self) -> SyncResult<Vec<SyncQueueItem>> {
        let sql = format!("{} ORDER BY created_at ASC, id ASC", SELECT_COLUMNS);
        let rows = sqlx::query(&sql).fetch_all(self.pool().await?).await?;
        rows.iter().map(from_row).collect()
    }

    pub async fn sync_item(&self, id: i64) -> SyncResult<Option<SyncQueueItem>> {
        let sql = format!("{} WHERE id = ?", SELECT_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(self.pool().await?)
            .await?;
        row.as_ref().map(from_row).transpose()
    }

    pub async fn pending_sync_count(&self) -> SyncResult<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM sync_queue")
            .fetch_one(self.pool().await?)
            .await?;
        Ok(row.try_get("count")?)
    }

    /// Store a failed attempt's retry count and error
    pub async fn record_sync_failure(&self, id: i64, retry_count: i64, error: &str) -> SyncResult<()> {
        self.update_by_id(
            Table::SyncQueue,
            id,
            &[
                ("retry_count", SqlValue::Integer(retry_count)),
                ("last_error", SqlValue::Text(error.to_string())),
            ],
        )
        .await?;

        tracing::warn!(queue_id = id, retry_count, error, "Operation sync failed");

        Ok(())
    }

    pub async fn delete_sync_item(&self, id: i64) -> SyncResult<()> {
        self.delete_by_id(Table::SyncQueue, id).await?;
        Ok(())
    }
}
