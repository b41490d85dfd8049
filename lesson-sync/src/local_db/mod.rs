//! Local SQLite store for offline-first operation
//!
//! Provides:
//! - Chapter content cache
//! - Sync queue (outbox) for pending remote mutations
//! - Append-only quiz result ledger
//! - Stage completion progress
//!
//! The store is opened lazily. Concurrent first callers share one open
//! attempt; an attempt that fails leaves the store unopened so the next call
//! tries again instead of running against a half-built schema.

pub mod chapters;
pub mod progress;
pub mod quiz_results;
pub mod sync_queue;

use crate::config::LocalDbConfig;
use crate::error::{SyncError, SyncResult};
use chrono::{DateTime, Utc};
use sqlx::query::Query;
use sqlx::sqlite::{
    SqliteArguments, SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions,
    SqliteRow,
};
use sqlx::{Sqlite, Transaction};
use std::str::FromStr;
use tokio::sync::OnceCell;

pub use sync_queue::{NewSyncQueueItem, OperationType, SyncQueueItem};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS sync_queue (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        local_id INTEGER,
        table_name TEXT NOT NULL,
        operation TEXT NOT NULL,
        data TEXT,
        created_at INTEGER NOT NULL,
        retry_count INTEGER NOT NULL DEFAULT 0,
        last_error TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS chapters (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        chapter_id TEXT NOT NULL UNIQUE,
        chapter_name TEXT NOT NULL,
        chapter_order INTEGER NOT NULL,
        subject_id TEXT NOT NULL,
        subject_name TEXT NOT NULL,
        total_topics INTEGER NOT NULL,
        content_json TEXT NOT NULL,
        fetched_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS quiz_results (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        client_ref TEXT NOT NULL UNIQUE,
        quiz_id TEXT NOT NULL,
        topic_id TEXT NOT NULL,
        chapter_id TEXT NOT NULL,
        selected_option INTEGER NOT NULL,
        is_correct INTEGER NOT NULL,
        time_taken_ms INTEGER,
        attempted_at INTEGER NOT NULL,
        is_synced INTEGER NOT NULL DEFAULT 0,
        remote_id TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS topic_progress (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        chapter_id TEXT NOT NULL,
        stage_id TEXT NOT NULL UNIQUE,
        source_topic_id TEXT NOT NULL,
        stage_order INTEGER NOT NULL,
        stage_type TEXT NOT NULL,
        is_completed INTEGER NOT NULL DEFAULT 0,
        completed_at INTEGER,
        updated_at INTEGER NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_sync_queue_created ON sync_queue(created_at)",
    "CREATE INDEX IF NOT EXISTS idx_sync_queue_local ON sync_queue(table_name, local_id)",
    "CREATE INDEX IF NOT EXISTS idx_quiz_results_quiz_id ON quiz_results(quiz_id)",
    "CREATE INDEX IF NOT EXISTS idx_quiz_results_synced ON quiz_results(is_synced)",
    "CREATE INDEX IF NOT EXISTS idx_topic_progress_chapter ON topic_progress(chapter_id)",
];

/// Tables the generic row operations may address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    SyncQueue,
    Chapters,
    QuizResults,
    TopicProgress,
}

impl Table {
    pub fn as_str(&self) -> &'static str {
        match self {
            Table::SyncQueue => "sync_queue",
            Table::Chapters => "chapters",
            Table::QuizResults => "quiz_results",
            Table::TopicProgress => "topic_progress",
        }
    }
}

/// Bind parameter for the generic statement API
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        SqlValue::Integer(value)
    }
}

impl From<bool> for SqlValue {
    fn from(value: bool) -> Self {
        SqlValue::Integer(i64::from(value))
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        SqlValue::Text(value.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        SqlValue::Text(value)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(SqlValue::Null, Into::into)
    }
}

/// One parameterized statement of a batch
#[derive(Debug, Clone)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

impl Statement {
    pub fn new(sql: impl Into<String>, params: Vec<SqlValue>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }
}

/// Local database handle
pub struct LocalDatabase {
    config: LocalDbConfig,
    pool: OnceCell<SqlitePool>,
}

impl LocalDatabase {
    /// Create a handle; the database is opened on first use
    pub fn new(config: LocalDbConfig) -> Self {
        Self {
            config,
            pool: OnceCell::new(),
        }
    }

    /// Create a handle and open the database immediately
    pub async fn open(config: LocalDbConfig) -> SyncResult<Self> {
        let db = Self::new(config);
        db.init().await?;
        Ok(db)
    }

    /// Open the database and create the schema if that has not happened yet
    pub async fn init(&self) -> SyncResult<()> {
        self.pool().await.map(|_| ())
    }

    pub fn is_initialized(&self) -> bool {
        self.pool.initialized()
    }

    /// Get the connection pool, opening the database on first call
    pub async fn pool(&self) -> SyncResult<&SqlitePool> {
        self.pool.get_or_try_init(|| self.connect()).await
    }

    async fn connect(&self) -> SyncResult<SqlitePool> {
        let journal_mode = if self.config.enable_wal {
            SqliteJournalMode::Wal
        } else {
            SqliteJournalMode::Delete
        };

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", self.config.db_path))?
            .create_if_missing(true)
            .journal_mode(journal_mode)
            .foreign_keys(true)
            .busy_timeout(self.config.busy_timeout);

        let pool = SqlitePoolOptions::new()
            .max_connections(self.config.max_connections.max(1))
            .connect_with(options)
            .await
            .map_err(|e| {
                tracing::error!(db_path = %self.config.db_path, error = %e, "Database open failed");
                e
            })?;

        if let Err(e) = Self::initialize_schema(&pool).await {
            tracing::error!(db_path = %self.config.db_path, error = %e, "Database schema creation failed");
            pool.close().await;
            return Err(e);
        }

        tracing::info!(db_path = %self.config.db_path, "Database initialized");
        Ok(pool)
    }

    /// Create all tables and indexes in one transaction
    async fn initialize_schema(pool: &SqlitePool) -> SyncResult<()> {
        let mut tx = pool.begin().await?;
        for statement in SCHEMA {
            sqlx::query(statement).execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Start a transaction for a multi-statement write
    pub async fn begin(&self) -> SyncResult<Transaction<'static, Sqlite>> {
        Ok(self.pool().await?.begin().await?)
    }

    /// Run a non-select statement, returning the affected row count
    pub async fn execute(&self, sql: &str, params: &[SqlValue]) -> SyncResult<u64> {
        let pool = self.pool().await?;
        let result = bind_all(sqlx::query(sql), params).execute(pool).await?;
        Ok(result.rows_affected())
    }

    /// Run statements in one transaction; any failure rolls back all of them
    pub async fn execute_batch(&self, statements: &[Statement]) -> SyncResult<()> {
        let mut tx = self.begin().await?;
        for statement in statements {
            bind_all(sqlx::query(&statement.sql), &statement.params)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Run a parameterized select
    pub async fn query(&self, sql: &str, params: &[SqlValue]) -> SyncResult<Vec<SqliteRow>> {
        let pool = self.pool().await?;
        Ok(bind_all(sqlx::query(sql), params).fetch_all(pool).await?)
    }

    /// Insert a row and return its id
    pub async fn insert(&self, table: Table, columns: &[(&str, SqlValue)]) -> SyncResult<i64> {
        if columns.is_empty() {
            return Err(SyncError::InvalidPayload("insert requires at least one column".into()));
        }
        let names = column_list(columns)?;
        let placeholders = vec!["?"; columns.len()].join(", ");
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            table.as_str(),
            names.join(", "),
            placeholders
        );

        let pool = self.pool().await?;
        let params: Vec<SqlValue> = columns.iter().map(|(_, value)| value.clone()).collect();
        let result = bind_all(sqlx::query(&sql), &params).execute(pool).await?;
        Ok(result.last_insert_rowid())
    }

    /// Update columns of the row with the given id
    pub async fn update_by_id(
        &self,
        table: Table,
        id: i64,
        columns: &[(&str, SqlValue)],
    ) -> SyncResult<u64> {
        if columns.is_empty() {
            return Ok(0);
        }
        let set_clause = column_list(columns)?
            .iter()
            .map(|name| format!("{} = ?", name))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!("UPDATE {} SET {} WHERE id = ?", table.as_str(), set_clause);

        let mut params: Vec<SqlValue> = columns.iter().map(|(_, value)| value.clone()).collect();
        params.push(SqlValue::Integer(id));
        self.execute(&sql, &params).await
    }

    /// Delete the row with the given id
    pub async fn delete_by_id(&self, table: Table, id: i64) -> SyncResult<u64> {
        let sql = format!("DELETE FROM {} WHERE id = ?", table.as_str());
        self.execute(&sql, &[SqlValue::Integer(id)]).await
    }

    /// Close database connection
    pub async fn close(&self) {
        if let Some(pool) = self.pool.get() {
            pool.close().await;
        }
    }
}

fn column_list<'a>(columns: &[(&'a str, SqlValue)]) -> SyncResult<Vec<&'a str>> {
    columns
        .iter()
        .map(|(name, _)| {
            if is_identifier(name) {
                Ok(*name)
            } else {
                Err(SyncError::InvalidPayload(format!("Invalid column name: {}", name)))
            }
        })
        .collect()
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn bind_all<'q>(
    mut query: Query<'q, Sqlite, SqliteArguments<'q>>,
    params: &'q [SqlValue],
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    for param in params {
        query = match param {
            SqlValue::Null => query.bind(None::<i64>),
            SqlValue::Integer(value) => query.bind(*value),
            SqlValue::Real(value) => query.bind(*value),
            SqlValue::Text(value) => query.bind(value.as_str()),
        };
    }
    query
}

pub(crate) fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

pub(crate) fn millis_to_datetime(millis: i64) -> SyncResult<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(millis)
        .ok_or_else(|| SyncError::Internal(format!("Invalid timestamp: {}", millis)))
}
