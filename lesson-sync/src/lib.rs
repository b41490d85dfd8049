//! Offline-first content cache and sync engine for a mobile learning app
//!
//! Provides:
//! - Local SQLite store for chapters, quiz results and stage progress
//! - Sync queue (outbox) with bounded retry
//! - Network-aware scheduler for throttled, mutually exclusive sync passes
//! - Chapter prefetch and eviction driven by learner progress
//! - Course structure catalog with a bundled fallback

#![cfg_attr(
    test,
    allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing, clippy::panic)
)]

pub mod config;
pub mod content;
pub mod course;
pub mod error;
pub mod gateway;
pub mod local_db;
pub mod models;
pub mod network;
pub mod progress;
pub mod quiz;
pub mod scheduler;
pub mod stages;
pub mod sync_queue;

pub use config::{ContentPolicy, EngineConfig, GatewayConfig, LocalDbConfig, SyncPolicy};
pub use content::{CompletionOutcome, ContentManager, PrefetchOutcome, TopicCompletion};
pub use course::{ContentSource, CourseCatalog, CourseData};
pub use error::{SyncError, SyncResult};
pub use gateway::{HttpGateway, RemoteGateway};
pub use local_db::{LocalDatabase, OperationType, SyncQueueItem};
pub use network::{CellularGeneration, NetworkAvailability, NetworkState, Transport};
pub use progress::{ProgressTracker, StageCompletion, StageProgress};
pub use quiz::QuizLedger;
pub use scheduler::{BackgroundSyncStatus, NetworkListener, SchedulerState, SyncReport, SyncScheduler};
pub use stages::{build_stages, StageType, TopicStage};
pub use sync_queue::{DrainReport, LedgerReport, Mutation, SyncQueue};

use std::path::Path;
use std::sync::Arc;

/// All engine components, wired once
pub struct SyncEngine {
    config: EngineConfig,
    db: Arc<LocalDatabase>,
    queue: Arc<SyncQueue>,
    scheduler: SyncScheduler,
    content: Arc<ContentManager>,
    quiz: QuizLedger,
    progress: ProgressTracker,
    course: CourseCatalog,
}

impl SyncEngine {
    /// Create an engine talking to the configured HTTP server
    pub fn new(config: EngineConfig) -> SyncResult<Self> {
        let gateway = Arc::new(HttpGateway::new(config.gateway.clone())?);
        Self::with_gateway(config, gateway)
    }

    /// Create an engine on top of any gateway implementation
    pub fn with_gateway(config: EngineConfig, gateway: Arc<dyn RemoteGateway>) -> SyncResult<Self> {
        let fallback = match config.content.fallback_course_path.as_deref() {
            Some(path) => CourseCatalog::read_fallback(Path::new(path))?,
            None => Vec::new(),
        };

        let db = Arc::new(LocalDatabase::new(config.database.clone()));
        let availability = NetworkAvailability::default();
        let queue = Arc::new(SyncQueue::new(db.clone(), gateway.clone(), &config.sync));
        let scheduler = SyncScheduler::new(
            queue.clone(),
            db.clone(),
            config.sync.clone(),
            availability.clone(),
        );
        let content = Arc::new(ContentManager::new(
            db.clone(),
            gateway.clone(),
            availability,
            config.content.clone(),
        ));
        scheduler.register_listener(content.clone());

        Ok(Self {
            quiz: QuizLedger::new(db.clone()),
            progress: ProgressTracker::new(db.clone(), config.content.stage_chunk_size),
            course: CourseCatalog::new(gateway, fallback),
            config,
            db,
            queue,
            scheduler,
            content,
        })
    }

    /// Open the local store now instead of on first use
    pub async fn init(&self) -> SyncResult<()> {
        self.db.init().await
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn local_db(&self) -> &LocalDatabase {
        &self.db
    }

    pub fn sync_queue(&self) -> &SyncQueue {
        &self.queue
    }

    pub fn scheduler(&self) -> &SyncScheduler {
        &self.scheduler
    }

    pub fn content(&self) -> &ContentManager {
        &self.content
    }

    pub fn quiz(&self) -> &QuizLedger {
        &self.quiz
    }

    pub fn progress(&self) -> &ProgressTracker {
        &self.progress
    }

    pub fn course(&self) -> &CourseCatalog {
        &self.course
    }

    /// Mark a stage complete and, when that finishes a topic, run the
    /// chapter prefetch/eviction policy with neighbours from the catalog.
    pub async fn complete_stage(
        &self,
        chapter_id: &str,
        stage_id: &str,
    ) -> SyncResult<(StageCompletion, Option<CompletionOutcome>)> {
        let completion = self.progress.complete_stage(chapter_id, stage_id).await?;
        if !completion.topic_completed {
            return Ok((completion, None));
        }

        let (prev, next) = match self.course.chapter_neighbours(chapter_id).await {
            Ok(neighbours) => neighbours,
            Err(SyncError::NotFound(_)) => {
                tracing::debug!(chapter_id, "Chapter not in course structure, no neighbours");
                (None, None)
            }
            Err(e) => return Err(e),
        };

        let report = ProgressTracker::topic_completion(chapter_id, &completion, prev, next);
        let outcome = self.content.on_topic_completed(&report).await?;
        Ok((completion, Some(outcome)))
    }

    /// Stop background work and close the store
    pub async fn shutdown(&self) {
        self.scheduler.stop_monitoring();
        self.db.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::MockRemoteGateway;

    #[tokio::test]
    async fn test_sync_engine_creation() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = EngineConfig::default();
        config.database.db_path = dir.path().join("engine.db").to_str().unwrap().to_string();

        let engine = SyncEngine::with_gateway(config, Arc::new(MockRemoteGateway::new())).unwrap();
        assert!(!engine.local_db().is_initialized());

        engine.init().await.unwrap();
        assert!(engine.local_db().is_initialized());
        assert_eq!(engine.scheduler().state(), SchedulerState::Stopped);

        engine.shutdown().await;
    }

    #[test]
    fn test_missing_fallback_file_is_a_config_error() {
        let mut config = EngineConfig::default();
        config.content.fallback_course_path = Some("/nonexistent/course.json".into());

        let result = SyncEngine::with_gateway(config, Arc::new(MockRemoteGateway::new()));
        assert!(matches!(result, Err(SyncError::Config(_))));
    }
}
