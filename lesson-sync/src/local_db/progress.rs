//! Stage completion rows

use super::{millis_to_datetime, now_millis, LocalDatabase};
use crate::error::SyncResult;
use crate::models::TopicProgressRow;
use crate::stages::TopicStage;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

fn from_row(row: &SqliteRow) -> SyncResult<TopicProgressRow> {
    let is_completed: i64 = row.try_get("is_completed")?;
    let completed_at: Option<i64> = row.try_get("completed_at")?;

    Ok(TopicProgressRow {
        chapter_id: row.try_get("chapter_id")?,
        stage_id: row.try_get("stage_id")?,
        source_topic_id: row.try_get("source_topic_id")?,
        stage_order: row.try_get("stage_order")?,
        stage_type: row.try_get("stage_type")?,
        is_completed: is_completed != 0,
        completed_at: completed_at.map(millis_to_datetime).transpose()?,
        updated_at: millis_to_datetime(row.try_get("updated_at")?)?,
    })
}

impl LocalDatabase {
    /// Mark a stage complete. Completing it again keeps the first `completed_at`.
    pub async fn upsert_stage_completion(&self, chapter_id: &str, stage: &TopicStage) -> SyncResult<()> {
        let now = now_millis();
        let stage_order = i64::try_from(stage.stage_order).unwrap_or(i64::MAX);

        sqlx::query(
            r#"
            INSERT INTO topic_progress (
                chapter_id, stage_id, source_topic_id, stage_order, stage_type,
                is_completed, completed_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, 1, ?, ?)
            ON CONFLICT(stage_id) DO UPDATE SET
                chapter_id = excluded.chapter_id,
                source_topic_id = excluded.source_topic_id,
                stage_order = excluded.stage_order,
                stage_type = excluded.stage_type,
                is_completed = 1,
                completed_at = COALESCE(topic_progress.completed_at, excluded.completed_at),
                updated_at = excluded.updated_at
            "#,
        )
        .bind(chapter_id)
        .bind(&stage.stage_id)
        .bind(&stage.source_topic_id)
        .bind(stage_order)
        .bind(stage.stage_type.as_str())
        .bind(now)
        .bind(now)
        .execute(self.pool().await?)
        .await?;

        tracing::debug!(chapter_id, stage_id = %stage.stage_id, "Stage marked complete");
        Ok(())
    }

    /// Stored progress rows for a chapter in stage order
    pub async fn chapter_progress(&self, chapter_id: &str) -> SyncResult<Vec<TopicProgressRow>> {
        let rows = sqlx::query(
            r#"
            SELECT chapter_id, stage_id, source_topic_id, stage_order, stage_type,
                   is_completed, completed_at, updated_at
            FROM topic_progress
            WHERE chapter_id = ?
            ORDER BY stage_order ASC
            "#,
        )
        .bind(chapter_id)
        .fetch_all(self.pool().await?)
        .await?;

        rows.iter().map(from_row).collect()
    }
}
