//! Sync queue engine
//!
//! Local mutations are appended to the outbox and delivered to the remote
//! gateway by [`SyncQueue::drain`], strictly oldest first and one at a time.
//! Delivery is at-least-once: a crash between the remote call and the local
//! commit leaves the entry queued and it is sent again on the next pass.

use crate::config::SyncPolicy;
use crate::error::{SyncError, SyncResult};
use crate::gateway::RemoteGateway;
use crate::local_db::{self, LocalDatabase, NewSyncQueueItem, OperationType, SyncQueueItem};
use crate::models::QuizResultPayload;
use serde::Serialize;
use std::sync::Arc;

/// A local change waiting to be applied remotely
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    CreateQuizResult {
        local_id: i64,
        payload: QuizResultPayload,
    },
}

impl Mutation {
    pub fn table_name(&self) -> &'static str {
        match self {
            Mutation::CreateQuizResult { .. } => local_db::quiz_results::TABLE_NAME,
        }
    }

    pub fn operation(&self) -> OperationType {
        match self {
            Mutation::CreateQuizResult { .. } => OperationType::Create,
        }
    }

    pub fn local_id(&self) -> i64 {
        match self {
            Mutation::CreateQuizResult { local_id, .. } => *local_id,
        }
    }

    /// Outbox row for this mutation
    pub fn to_queue_item(&self) -> SyncResult<NewSyncQueueItem> {
        let data = match self {
            Mutation::CreateQuizResult { payload, .. } => serde_json::to_string(payload)?,
        };

        Ok(NewSyncQueueItem {
            local_id: Some(self.local_id()),
            table_name: self.table_name().to_string(),
            operation: self.operation(),
            data: Some(data),
        })
    }

    /// Rebuild the mutation a stored outbox row describes
    pub fn decode(item: &SyncQueueItem) -> SyncResult<Self> {
        let operation: OperationType = item.operation.parse()?;

        match (item.table_name.as_str(), operation) {
            (local_db::quiz_results::TABLE_NAME, OperationType::Create) => {
                let local_id = item.local_id.ok_or_else(|| {
                    SyncError::InvalidPayload(format!("queue entry {} has no local id", item.id))
                })?;
                let data = item.data.as_deref().ok_or_else(|| {
                    SyncError::InvalidPayload(format!("queue entry {} has no data", item.id))
                })?;
                let payload = serde_json::from_str(data)
                    .map_err(|e| SyncError::InvalidPayload(e.to_string()))?;

                Ok(Mutation::CreateQuizResult { local_id, payload })
            }
            (table, operation) => Err(SyncError::UnsupportedMutation {
                table: table.to_string(),
                operation: operation.to_string(),
            }),
        }
    }
}

/// Outcome of one outbox drain
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    pub synced: usize,
    pub failed: usize,
    pub abandoned: usize,
}

/// Outcome of pushing ledger rows that have no outbox entry
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LedgerReport {
    pub pushed: usize,
    pub failed: usize,
}

pub struct SyncQueue {
    db: Arc<LocalDatabase>,
    gateway: Arc<dyn RemoteGateway>,
    max_retries: i64,
}

impl SyncQueue {
    pub fn new(db: Arc<LocalDatabase>, gateway: Arc<dyn RemoteGateway>, policy: &SyncPolicy) -> Self {
        Self {
            db,
            gateway,
            max_retries: policy.max_retries.max(1),
        }
    }

    /// Append a mutation to the outbox
    pub async fn enqueue(&self, mutation: &Mutation) -> SyncResult<i64> {
        self.db.insert_sync_item(&mutation.to_queue_item()?).await
    }

    pub async fn pending(&self) -> SyncResult<Vec<SyncQueueItem>> {
        self.db.sync_queue().await
    }

    pub async fn pending_count(&self) -> SyncResult<i64> {
        self.db.pending_sync_count().await
    }

    /// Deliver every queued mutation, oldest first.
    ///
    /// A failing entry never stops the drain. Store errors while recording
    /// the failure do, since nothing further can be persisted.
    pub async fn drain(&self) -> SyncResult<DrainReport> {
        let entries = self.db.sync_queue().await?;
        let mut report = DrainReport::default();

        if entries.is_empty() {
            return Ok(report);
        }

        tracing::info!(pending = entries.len(), "Draining sync queue");

        for item in entries {
            match self.deliver(&item).await {
                Ok(()) => report.synced += 1,
                Err(err) => {
                    if self.record_failure(&item, &err).await? {
                        report.abandoned += 1;
                    } else {
                        report.failed += 1;
                    }
                }
            }
        }

        tracing::info!(
            synced = report.synced,
            failed = report.failed,
            abandoned = report.abandoned,
            "Sync queue drained"
        );

        Ok(report)
    }

    async fn deliver(&self, item: &SyncQueueItem) -> SyncResult<()> {
        match Mutation::decode(item)? {
            Mutation::CreateQuizResult { local_id, payload } => {
                if let Some(existing) = self.db.quiz_result(local_id).await? {
                    if existing.is_synced {
                        tracing::debug!(
                            queue_id = item.id,
                            result_id = local_id,
                            "Quiz result already synced, dropping queue entry"
                        );
                        self.db.delete_sync_item(item.id).await?;
                        return Ok(());
                    }
                }

                let receipt = self.gateway.submit_quiz_result(&payload).await?;

                let mut tx = self.db.begin().await?;
                local_db::quiz_results::mark_synced(&mut *tx, local_id, receipt.remote_id.as_deref())
                    .await?;
                local_db::sync_queue::delete(&mut *tx, item.id).await?;
                tx.commit().await?;

                tracing::debug!(
                    queue_id = item.id,
                    result_id = local_id,
                    remote_id = ?receipt.remote_id,
                    "Synced quiz result"
                );
                Ok(())
            }
        }
    }

    /// Count the failed attempt; returns true when the entry was abandoned
    async fn record_failure(&self, item: &SyncQueueItem, err: &SyncError) -> SyncResult<bool> {
        let retry_count = item.retry_count + 1;
        let message = err.to_string();

        self.db.record_sync_failure(item.id, retry_count, &message).await?;

        if retry_count >= self.max_retries {
            self.db.delete_sync_item(item.id).await?;
            tracing::warn!(
                queue_id = item.id,
                table = %item.table_name,
                operation = %item.operation,
                retry_count,
                error = %message,
                "Giving up on queued operation after max retries"
            );
            return Ok(true);
        }

        tracing::debug!(
            queue_id = item.id,
            retry_count,
            transient = err.is_transient(),
            "Queued operation will be retried"
        );
        Ok(false)
    }

    /// Submit unsynced ledger rows that the outbox does not own.
    ///
    /// A failed row is logged and stays unsynced for the next pass.
    pub async fn push_unqueued_results(&self) -> SyncResult<LedgerReport> {
        let rows = self.db.unsynced_results_without_outbox().await?;
        let mut report = LedgerReport::default();

        for row in rows {
            match self.gateway.submit_quiz_result(&row.payload()).await {
                Ok(receipt) => {
                    self.db
                        .mark_quiz_result_synced(row.id, receipt.remote_id.as_deref())
                        .await?;
                    report.pushed += 1;
                }
                Err(err) => {
                    tracing::warn!(result_id = row.id, error = %err, "Failed to push quiz result");
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::MockRemoteGateway;
    use crate::local_db::test_support::create_test_db;
    use crate::models::{NewQuizResult, SubmitReceipt};

    async fn stored_result(db: &LocalDatabase) -> crate::models::QuizResult {
        db.insert_quiz_result(&NewQuizResult {
            quiz_id: "Q1".into(),
            topic_id: "T1".into(),
            chapter_id: "C1".into(),
            selected_option: 1,
            is_correct: false,
            time_taken_ms: None,
        })
        .await
        .unwrap()
    }

    fn queue(db: Arc<LocalDatabase>, gateway: MockRemoteGateway) -> SyncQueue {
        SyncQueue::new(db, Arc::new(gateway), &SyncPolicy::default())
    }

    #[tokio::test]
    async fn test_successful_drain_marks_result_synced() {
        let (db, _dir) = create_test_db().await;
        let db = Arc::new(db);
        let result = stored_result(&db).await;

        let mut gateway = MockRemoteGateway::new();
        gateway
            .expect_submit_quiz_result()
            .times(1)
            .returning(|_| Ok(SubmitReceipt { remote_id: Some("srv-1".into()) }));

        let queue = queue(db.clone(), gateway);
        queue
            .enqueue(&Mutation::CreateQuizResult {
                local_id: result.id,
                payload: result.payload(),
            })
            .await
            .unwrap();

        let report = queue.drain().await.unwrap();
        assert_eq!(report, DrainReport { synced: 1, failed: 0, abandoned: 0 });
        assert_eq!(queue.pending_count().await.unwrap(), 0);

        let synced = db.quiz_result(result.id).await.unwrap().unwrap();
        assert!(synced.is_synced);
        assert_eq!(synced.remote_id.as_deref(), Some("srv-1"));
    }

    #[tokio::test]
    async fn test_failure_increments_retry_count() {
        let (db, _dir) = create_test_db().await;
        let db = Arc::new(db);
        let result = stored_result(&db).await;

        let mut gateway = MockRemoteGateway::new();
        gateway
            .expect_submit_quiz_result()
            .returning(|_| Err(SyncError::Network("connection reset".into())));

        let queue = queue(db.clone(), gateway);
        queue
            .enqueue(&Mutation::CreateQuizResult {
                local_id: result.id,
                payload: result.payload(),
            })
            .await
            .unwrap();

        let report = queue.drain().await.unwrap();
        assert_eq!(report.failed, 1);

        let pending = queue.pending().await.unwrap();
        assert_eq!(pending[0].retry_count, 1);
        assert!(pending[0].last_error.as_deref().unwrap().contains("connection reset"));
        assert!(!db.quiz_result(result.id).await.unwrap().unwrap().is_synced);
    }

    #[tokio::test]
    async fn test_entry_is_abandoned_at_max_retries() {
        let (db, _dir) = create_test_db().await;
        let db = Arc::new(db);
        let result = stored_result(&db).await;

        let mut gateway = MockRemoteGateway::new();
        gateway
            .expect_submit_quiz_result()
            .times(5)
            .returning(|_| Err(SyncError::RemoteStatus { status: 503, message: "down".into() }));

        let queue = queue(db.clone(), gateway);
        queue
            .enqueue(&Mutation::CreateQuizResult {
                local_id: result.id,
                payload: result.payload(),
            })
            .await
            .unwrap();

        for _ in 0..4 {
            assert_eq!(queue.drain().await.unwrap().failed, 1);
        }
        assert_eq!(queue.pending().await.unwrap()[0].retry_count, 4);

        let report = queue.drain().await.unwrap();
        assert_eq!(report.abandoned, 1);
        assert_eq!(queue.pending_count().await.unwrap(), 0);

        // Abandoned locally, the ledger row stays unsynced
        assert!(!db.quiz_result(result.id).await.unwrap().unwrap().is_synced);
    }

    #[tokio::test]
    async fn test_already_synced_row_skips_remote_call() {
        let (db, _dir) = create_test_db().await;
        let db = Arc::new(db);
        let result = stored_result(&db).await;
        db.mark_quiz_result_synced(result.id, None).await.unwrap();

        let mut gateway = MockRemoteGateway::new();
        gateway.expect_submit_quiz_result().never();

        let queue = queue(db.clone(), gateway);
        queue
            .enqueue(&Mutation::CreateQuizResult {
                local_id: result.id,
                payload: result.payload(),
            })
            .await
            .unwrap();

        assert_eq!(queue.drain().await.unwrap().synced, 1);
        assert_eq!(queue.pending_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unsupported_entry_fails_like_any_attempt() {
        let (db, _dir) = create_test_db().await;
        let db = Arc::new(db);
        db.insert_sync_item(&NewSyncQueueItem {
            local_id: Some(1),
            table_name: "items".into(),
            operation: OperationType::Delete,
            data: None,
        })
        .await
        .unwrap();

        let mut gateway = MockRemoteGateway::new();
        gateway.expect_submit_quiz_result().never();

        let queue = queue(db.clone(), gateway);
        assert_eq!(queue.drain().await.unwrap().failed, 1);

        let pending = queue.pending().await.unwrap();
        assert_eq!(pending[0].retry_count, 1);
        assert!(pending[0].last_error.as_deref().unwrap().contains("not supported"));
    }

    #[tokio::test]
    async fn test_push_unqueued_results_skips_outbox_rows() {
        let (db, _dir) = create_test_db().await;
        let db = Arc::new(db);
        let queued = stored_result(&db).await;
        let orphan = stored_result(&db).await;

        let orphan_ref = orphan.client_ref;
        let mut gateway = MockRemoteGateway::new();
        gateway
            .expect_submit_quiz_result()
            .withf(move |payload| payload.client_ref == orphan_ref)
            .times(1)
            .returning(|_| Ok(SubmitReceipt::default()));

        let queue = queue(db.clone(), gateway);
        queue
            .enqueue(&Mutation::CreateQuizResult {
                local_id: queued.id,
                payload: queued.payload(),
            })
            .await
            .unwrap();

        let report = queue.push_unqueued_results().await.unwrap();
        assert_eq!(report, LedgerReport { pushed: 1, failed: 0 });
        assert!(db.quiz_result(orphan.id).await.unwrap().unwrap().is_synced);
        assert!(!db.quiz_result(queued.id).await.unwrap().unwrap().is_synced);
    }

    #[test]
    fn test_decode_round_trips_queue_item() {
        let mutation = Mutation::CreateQuizResult {
            local_id: 3,
            payload: QuizResultPayload {
                client_ref: uuid::Uuid::new_v4(),
                quiz_id: "Q".into(),
                topic_id: "T".into(),
                chapter_id: "C".into(),
                selected_option: 0,
                is_correct: true,
                time_taken_ms: Some(10),
                attempted_at: chrono::Utc::now(),
            },
        };
        let new_item = mutation.to_queue_item().unwrap();
        let stored = SyncQueueItem {
            id: 1,
            local_id: new_item.local_id,
            table_name: new_item.table_name,
            operation: new_item.operation.to_string(),
            data: new_item.data,
            created_at: chrono::Utc::now(),
            retry_count: 0,
            last_error: None,
        };
        assert_eq!(Mutation::decode(&stored).unwrap(), mutation);
    }
}
