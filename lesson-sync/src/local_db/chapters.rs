//! Cached chapter content

use super::{millis_to_datetime, now_millis, LocalDatabase};
use crate::error::SyncResult;
use crate::models::{ChapterInput, ChapterRow};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

const SELECT_COLUMNS: &str = r#"
    SELECT id, chapter_id, chapter_name, chapter_order, subject_id, subject_name,
           total_topics, content_json, fetched_at
    FROM chapters
"#;

fn from_row(row: &SqliteRow) -> SyncResult<ChapterRow> {
    Ok(ChapterRow {
        id: row.try_get("id")?,
        chapter_id: row.try_get("chapter_id")?,
        chapter_name: row.try_get("chapter_name")?,
        chapter_order: row.try_get("chapter_order")?,
        subject_id: row.try_get("subject_id")?,
        subject_name: row.try_get("subject_name")?,
        total_topics: row.try_get("total_topics")?,
        content_json: row.try_get("content_json")?,
        fetched_at: millis_to_datetime(row.try_get("fetched_at")?)?,
    })
}

impl LocalDatabase {
    /// Insert or wholesale replace the cache row for `input.chapter_id`.
    ///
    /// Every column is rewritten so `total_topics` and `content_json` always
    /// come from the same fetch.
    pub async fn upsert_chapter(&self, input: &ChapterInput) -> SyncResult<()> {
        let content_json = serde_json::to_string(&input.topics)?;

        sqlx::query(
            r#"
            INSERT INTO chapters (
                chapter_id, chapter_name, chapter_order, subject_id, subject_name,
                total_topics, content_json, fetched_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(chapter_id) DO UPDATE SET
                chapter_name = excluded.chapter_name,
                chapter_order = excluded.chapter_order,
                subject_id = excluded.subject_id,
                subject_name = excluded.subject_name,
                total_topics = excluded.total_topics,
                content_json = excluded.content_json,
                fetched_at = excluded.fetched_at
            "#,
        )
        .bind(&input.chapter_id)
        .bind(&input.chapter_name)
        .bind(input.chapter_order)
        .bind(&input.subject_id)
        .bind(&input.subject_name)
        .bind(input.total_topics)
        .bind(&content_json)
        .bind(now_millis())
        .execute(self.pool().await?)
        .await?;

        tracing::debug!(
            chapter_id = %input.chapter_id,
            total_topics = input.total_topics,
            "Cached chapter content"
        );

        Ok(())
    }

    pub async fn has_chapter(&self, chapter_id: &str) -> SyncResult<bool> {
        let row = sqlx::query("SELECT 1 FROM chapters WHERE chapter_id = ? LIMIT 1")
            .bind(chapter_id)
            .fetch_optional(self.pool().await?)
            .await?;
        Ok(row.is_some())
    }

    pub async fn get_chapter(&self, chapter_id: &str) -> SyncResult<Option<ChapterRow>> {
        let sql = format!("{} WHERE chapter_id = ?", SELECT_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(chapter_id)
            .fetch_optional(self.pool().await?)
            .await?;
        row.as_ref().map(from_row).transpose()
    }

    /// Cached chapters ordered by subject and chapter order
    pub async fn list_chapters(&self) -> SyncResult<Vec<ChapterRow>> {
        let sql = format!("{} ORDER BY subject_id ASC, chapter_order ASC", SELECT_COLUMNS);
        let rows = sqlx::query(&sql).fetch_all(self.pool().await?).await?;
        rows.iter().map(from_row).collect()
    }

    /// Remove a chapter from the cache, returning whether a row existed
    pub async fn delete_chapter(&self, chapter_id: &str) -> SyncResult<bool> {
        let result = sqlx::query("DELETE FROM chapters WHERE chapter_id = ?")
            .bind(chapter_id)
            .execute(self.pool().await?)
            .await?;

        let evicted = result.rows_affected() > 0;
        if evicted {
            tracing::debug!(chapter_id, "Evicted cached chapter");
        }
        Ok(evicted)
    }
}

#[cfg(test)]
mod tests {
    use crate::local_db::test_support::create_test_db;
    use crate::models::{ChapterInput, MicroLesson, Topic};

    fn chapter(chapter_id: &str, name: &str, topic_count: usize) -> ChapterInput {
        let topics: Vec<Topic> = (0..topic_count)
            .map(|i| Topic {
                topic_id: format!("{}-T{}", chapter_id, i),
                topic_order: i as i64,
                topic_name: None,
                microlessons: vec![MicroLesson {
                    id: format!("{}-M{}", chapter_id, i),
                    order: 1,
                    title: "Intro".into(),
                    content: vec!["..".into()],
                }],
                quizzes: vec![],
            })
            .collect();

        ChapterInput {
            chapter_id: chapter_id.to_string(),
            chapter_name: name.to_string(),
            chapter_order: 1,
            subject_id: "S1".to_string(),
            subject_name: "Maths".to_string(),
            total_topics: topic_count as i64,
            topics,
        }
    }

    #[tokio::test]
    async fn test_upsert_replaces_wholesale() {
        let (db, _dir) = create_test_db().await;

        db.upsert_chapter(&chapter("C1", "Fractions", 3)).await.unwrap();
        let first = db.get_chapter("C1").await.unwrap().unwrap();

        let mut second = chapter("C1", "Fractions (revised)", 1);
        second.subject_name = "Mathematics".to_string();
        second.chapter_order = 4;
        db.upsert_chapter(&second).await.unwrap();

        let chapters = db.list_chapters().await.unwrap();
        assert_eq!(chapters.len(), 1);

        let row = &chapters[0];
        assert_eq!(row.id, first.id);
        assert_eq!(row.chapter_name, "Fractions (revised)");
        assert_eq!(row.subject_name, "Mathematics");
        assert_eq!(row.chapter_order, 4);
        assert_eq!(row.total_topics, 1);
        assert_eq!(row.topics().unwrap(), second.topics);
    }

    #[tokio::test]
    async fn test_has_and_delete_chapter() {
        let (db, _dir) = create_test_db().await;

        assert!(!db.has_chapter("C1").await.unwrap());
        db.upsert_chapter(&chapter("C1", "Fractions", 1)).await.unwrap();
        assert!(db.has_chapter("C1").await.unwrap());

        assert!(db.delete_chapter("C1").await.unwrap());
        assert!(!db.has_chapter("C1").await.unwrap());
        assert!(!db.delete_chapter("C1").await.unwrap());
    }
}
