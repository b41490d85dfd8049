//! Append-only quiz result ledger

use super::{millis_to_datetime, now_millis, LocalDatabase, SqlValue, Table};
use crate::error::{SyncError, SyncResult};
use crate::models::{NewQuizResult, QuizResult};
use sqlx::sqlite::SqliteRow;
use sqlx::{Executor, Row, Sqlite};
use uuid::Uuid;

pub const TABLE_NAME: &str = "quiz_results";

const SELECT_COLUMNS: &str = r#"
    SELECT id, client_ref, quiz_id, topic_id, chapter_id, selected_option, is_correct,
           time_taken_ms, attempted_at, is_synced, remote_id
    FROM quiz_results
"#;

fn from_row(row: &SqliteRow) -> SyncResult<QuizResult> {
    let client_ref: String = row.try_get("client_ref")?;
    let is_correct: i64 = row.try_get("is_correct")?;
    let is_synced: i64 = row.try_get("is_synced")?;

    Ok(QuizResult {
        id: row.try_get("id")?,
        client_ref: Uuid::parse_str(&client_ref)
            .map_err(|e| SyncError::Internal(format!("Invalid UUID: {}", e)))?,
        quiz_id: row.try_get("quiz_id")?,
        topic_id: row.try_get("topic_id")?,
        chapter_id: row.try_get("chapter_id")?,
        selected_option: row.try_get("selected_option")?,
        is_correct: is_correct != 0,
        time_taken_ms: row.try_get("time_taken_ms")?,
        attempted_at: millis_to_datetime(row.try_get("attempted_at")?)?,
        is_synced: is_synced != 0,
        remote_id: row.try_get("remote_id")?,
    })
}

pub(crate) async fn insert<'e, E>(executor: E, input: &NewQuizResult) -> SyncResult<QuizResult>
where
    E: Executor<'e, Database = Sqlite>,
{
    let client_ref = Uuid::new_v4();
    let attempted_at = now_millis();

    let result = sqlx::query(
        r#"
        INSERT INTO quiz_results (
            client_ref, quiz_id, topic_id, chapter_id, selected_option,
            is_correct, time_taken_ms, attempted_at, is_synced
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, 0)
        "#,
    )
    .bind(client_ref.to_string())
    .bind(&input.quiz_id)
    .bind(&input.topic_id)
    .bind(&input.chapter_id)
    .bind(input.selected_option)
    .bind(i64::from(input.is_correct))
    .bind(input.time_taken_ms)
    .bind(attempted_at)
    .execute(executor)
    .await?;

    Ok(QuizResult {
        id: result.last_insert_rowid(),
        client_ref,
        quiz_id: input.quiz_id.clone(),
        topic_id: input.topic_id.clone(),
        chapter_id: input.chapter_id.clone(),
        selected_option: input.selected_option,
        is_correct: input.is_correct,
        time_taken_ms: input.time_taken_ms,
        attempted_at: millis_to_datetime(attempted_at)?,
        is_synced: false,
        remote_id: None,
    })
}

pub(crate) async fn mark_synced<'e, E>(
    executor: E,
    id: i64,
    remote_id: Option<&str>,
) -> SyncResult<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        UPDATE quiz_results
        SET is_synced = 1,
            remote_id = COALESCE(?, remote_id)
        WHERE id = ?
        "#,
    )
    .bind(remote_id)
    .bind(id)
    .execute(executor)
    .await?;
    Ok(())
}

impl LocalDatabase {
    /// Insert a ledger row on its own, without an outbox entry
    pub async fn insert_quiz_result(&self, input: &NewQuizResult) -> SyncResult<QuizResult> {
        insert(self.pool().await?, input).await
    }

    pub async fn quiz_result(&self, id: i64) -> SyncResult<Option<QuizResult>> {
        let sql = format!("{} WHERE id = ?", SELECT_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(self.pool().await?)
            .await?;
        row.as_ref().map(from_row).transpose()
    }

    /// Results newest first, optionally for one quiz
    pub async fn quiz_results(&self, quiz_id: Option<&str>) -> SyncResult<Vec<QuizResult>> {
        let rows = match quiz_id {
            Some(quiz_id) => {
                let sql = format!(
                    "{} WHERE quiz_id = ? ORDER BY attempted_at DESC, id DESC",
                    SELECT_COLUMNS
                );
                self.query(&sql, &[SqlValue::from(quiz_id)]).await?
            }
            None => {
                let sql = format!("{} ORDER BY attempted_at DESC, id DESC", SELECT_COLUMNS);
                self.query(&sql, &[]).await?
            }
        };
        rows.iter().map(from_row).collect()
    }

    /// Unsynced results, oldest first
    pub async fn unsynced_quiz_results(&self) -> SyncResult<Vec<QuizResult>> {
        let sql = format!(
            "{} WHERE is_synced = 0 ORDER BY attempted_at ASC, id ASC",
            SELECT_COLUMNS
        );
        let rows = self.query(&sql, &[]).await?;
        rows.iter().map(from_row).collect()
    }

    /// Unsynced results that no outbox entry will deliver
    pub async fn unsynced_results_without_outbox(&self) -> SyncResult<Vec<QuizResult>> {
        let sql = format!(
            r#"{} WHERE is_synced = 0
                AND NOT EXISTS (
                    SELECT 1 FROM sync_queue
                    WHERE sync_queue.table_name = ? AND sync_queue.local_id = quiz_results.id
                )
                ORDER BY attempted_at ASC, id ASC"#,
            SELECT_COLUMNS
        );
        let rows = self.query(&sql, &[SqlValue::from(TABLE_NAME)]).await?;
        rows.iter().map(from_row).collect()
    }

    pub async fn unsynced_quiz_result_count(&self) -> SyncResult<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM quiz_results WHERE is_synced = 0")
            .fetch_one(self.pool().await?)
            .await?;
        Ok(row.try_get("count")?)
    }

    /// Flip the synced flag, keeping any remote id already stored
    pub async fn mark_quiz_result_synced(&self, id: i64, remote_id: Option<&str>) -> SyncResult<()> {
        match remote_id {
            Some(remote_id) => {
                self.update_by_id(
                    Table::QuizResults,
                    id,
                    &[("is_synced", SqlValue::from(true)), ("remote_id", SqlValue::from(remote_id))],
                )
                .await?;
            }
            None => {
                self.update_by_id(Table::QuizResults, id, &[("is_synced", SqlValue::from(true))])
                    .await?;
            }
        }

        tracing::debug!(result_id = id, remote_id = ?remote_id, "Marked quiz result as synced");
        Ok(())
    }
}
