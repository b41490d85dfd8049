//! Quiz result ledger

use crate::error::{SyncError, SyncResult};
use crate::local_db::{self, LocalDatabase};
use crate::models::{NewQuizResult, QuizResult};
use crate::sync_queue::Mutation;
use std::sync::Arc;

pub struct QuizLedger {
    db: Arc<LocalDatabase>,
}

impl QuizLedger {
    pub fn new(db: Arc<LocalDatabase>) -> Self {
        Self { db }
    }

    /// Store an answer and queue it for the server in one transaction
    pub async fn record_answer(&self, answer: &NewQuizResult) -> SyncResult<QuizResult> {
        validate(answer)?;

        let mut tx = self.db.begin().await?;
        let stored = local_db::quiz_results::insert(&mut *tx, answer).await?;
        let item = Mutation::CreateQuizResult {
            local_id: stored.id,
            payload: stored.payload(),
        }
        .to_queue_item()?;
        let queue_id = local_db::sync_queue::insert(&mut *tx, &item).await?;
        tx.commit().await?;

        tracing::debug!(
            result_id = stored.id,
            queue_id,
            quiz_id = %stored.quiz_id,
            is_correct = stored.is_correct,
            "Recorded quiz answer"
        );
        Ok(stored)
    }

    pub async fn results(&self, quiz_id: Option<&str>) -> SyncResult<Vec<QuizResult>> {
        self.db.quiz_results(quiz_id).await
    }

    pub async fn result(&self, id: i64) -> SyncResult<Option<QuizResult>> {
        self.db.quiz_result(id).await
    }

    pub async fn unsynced(&self) -> SyncResult<Vec<QuizResult>> {
        self.db.unsynced_quiz_results().await
    }
}

fn validate(answer: &NewQuizResult) -> SyncResult<()> {
    for (field, value) in [
        ("quiz_id", &answer.quiz_id),
        ("topic_id", &answer.topic_id),
        ("chapter_id", &answer.chapter_id),
    ] {
        if value.trim().is_empty() {
            return Err(SyncError::InvalidPayload(format!("{} must not be empty", field)));
        }
    }
    if answer.selected_option < 0 {
        return Err(SyncError::InvalidPayload("selected_option must not be negative".into()));
    }
    if answer.time_taken_ms.is_some_and(|ms| ms < 0) {
        return Err(SyncError::InvalidPayload("time_taken_ms must not be negative".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local_db::test_support::create_test_db;

    fn answer() -> NewQuizResult {
        NewQuizResult {
            quiz_id: "Q1".into(),
            topic_id: "T1".into(),
            chapter_id: "C1".into(),
            selected_option: 3,
            is_correct: true,
            time_taken_ms: Some(900),
        }
    }

    #[tokio::test]
    async fn test_record_creates_ledger_row_and_outbox_entry() {
        let (db, _dir) = create_test_db().await;
        let db = Arc::new(db);
        let ledger = QuizLedger::new(db.clone());

        let stored = ledger.record_answer(&answer()).await.unwrap();

        assert_eq!(ledger.unsynced().await.unwrap(), vec![stored.clone()]);
        let queue = db.sync_queue().await.unwrap();
        assert_eq!(queue.len(), 1);
        assert_eq!(queue[0].local_id, Some(stored.id));
        assert_eq!(queue[0].table_name, "quiz_results");
        assert_eq!(queue[0].operation, "CREATE");
        assert!(queue[0].data.as_deref().unwrap().contains(&stored.client_ref.to_string()));
    }

    #[tokio::test]
    async fn test_invalid_answer_writes_nothing() {
        let (db, _dir) = create_test_db().await;
        let db = Arc::new(db);
        let ledger = QuizLedger::new(db.clone());

        let mut bad = answer();
        bad.quiz_id = " ".into();
        assert!(matches!(
            ledger.record_answer(&bad).await,
            Err(SyncError::InvalidPayload(_))
        ));
        assert!(ledger.results(None).await.unwrap().is_empty());
        assert_eq!(db.pending_sync_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_results_by_quiz() {
        let (db, _dir) = create_test_db().await;
        let ledger = QuizLedger::new(Arc::new(db));

        let first = ledger.record_answer(&answer()).await.unwrap();
        let mut other = answer();
        other.quiz_id = "Q2".into();
        ledger.record_answer(&other).await.unwrap();

        let q1 = ledger.results(Some("Q1")).await.unwrap();
        assert_eq!(q1.len(), 1);
        assert_eq!(ledger.result(first.id).await.unwrap(), Some(first));
    }
}
