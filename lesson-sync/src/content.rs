//! Content lifecycle
//!
//! Keeps a sliding window of chapters on the device: the current one, the
//! next one once the learner is far enough along, and never the previous one
//! for long. Progress is compared as exact integers, `completed * 100 >=
//! threshold * total`, so 69.5% never rounds up into a prefetch.

use crate::config::ContentPolicy;
use crate::error::{SyncError, SyncResult};
use crate::gateway::RemoteGateway;
use crate::local_db::LocalDatabase;
use crate::models::{ChapterContent, ChapterInput, ChapterRow, Topic};
use crate::network::NetworkAvailability;
use crate::scheduler::NetworkListener;
use crate::stages::{build_stages, TopicStage};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Progress report sent after the learner finishes a topic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicCompletion {
    pub current_chapter_id: String,
    pub completed_topics: u32,
    pub total_topics: u32,
    #[serde(default)]
    pub next_chapter_id: Option<String>,
    #[serde(default)]
    pub prev_chapter_id: Option<String>,
}

impl TopicCompletion {
    fn reached(&self, threshold_percent: u32) -> bool {
        u64::from(self.completed_topics) * 100
            >= u64::from(threshold_percent) * u64::from(self.total_topics)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PrefetchOutcome {
    NotNeeded,
    AlreadyCached,
    Fetched,
    /// Waiting for the network to become available
    Deferred,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompletionOutcome {
    pub prefetch: PrefetchOutcome,
    pub evicted: bool,
}

impl CompletionOutcome {
    fn noop() -> Self {
        Self {
            prefetch: PrefetchOutcome::NotNeeded,
            evicted: false,
        }
    }
}

pub struct ContentManager {
    db: Arc<LocalDatabase>,
    gateway: Arc<dyn RemoteGateway>,
    availability: NetworkAvailability,
    policy: ContentPolicy,
    deferred_prefetch: Mutex<Option<String>>,
}

impl ContentManager {
    pub fn new(
        db: Arc<LocalDatabase>,
        gateway: Arc<dyn RemoteGateway>,
        availability: NetworkAvailability,
        policy: ContentPolicy,
    ) -> Self {
        Self {
            db,
            gateway,
            availability,
            policy,
            deferred_prefetch: Mutex::new(None),
        }
    }

    /// Download the first chapter when a subject is opened for the first time
    pub async fn download_first_chapter(
        &self,
        subject_id: &str,
        first_chapter_id: &str,
    ) -> SyncResult<ChapterRow> {
        self.ensure_chapter_cached(subject_id, first_chapter_id).await
    }

    /// Return the cached chapter, fetching and caching it first if absent
    pub async fn ensure_chapter_cached(&self, subject_id: &str, chapter_id: &str) -> SyncResult<ChapterRow> {
        if let Some(row) = self.db.get_chapter(chapter_id).await? {
            return Ok(row);
        }

        let content = self.gateway.fetch_chapter_content(chapter_id).await?;
        self.store(content, Some(subject_id)).await
    }

    /// Apply the prefetch and eviction policy after a topic is completed
    pub async fn on_topic_completed(&self, completion: &TopicCompletion) -> SyncResult<CompletionOutcome> {
        if completion.total_topics == 0 {
            return Ok(CompletionOutcome::noop());
        }

        let mut outcome = CompletionOutcome::noop();

        if let Some(next) = completion.next_chapter_id.as_deref() {
            if completion.reached(self.policy.prefetch_threshold_percent) {
                outcome.prefetch = self.prefetch_or_defer(next).await?;
            }
        }

        if let Some(prev) = completion.prev_chapter_id.as_deref() {
            if completion.reached(self.policy.evict_threshold_percent) {
                outcome.evicted = self.db.delete_chapter(prev).await?;
            }
        }

        tracing::debug!(
            chapter_id = %completion.current_chapter_id,
            completed = completion.completed_topics,
            total = completion.total_topics,
            prefetch = ?outcome.prefetch,
            evicted = outcome.evicted,
            "Topic completion handled"
        );

        Ok(outcome)
    }

    async fn prefetch_or_defer(&self, chapter_id: &str) -> SyncResult<PrefetchOutcome> {
        if self.db.has_chapter(chapter_id).await? {
            return Ok(PrefetchOutcome::AlreadyCached);
        }
        if !self.availability.is_available() {
            self.defer(chapter_id);
            return Ok(PrefetchOutcome::Deferred);
        }

        match self.prefetch_chapter_if_needed(chapter_id).await {
            Ok(outcome) => Ok(outcome),
            Err(e @ SyncError::Database(_)) => Err(e),
            Err(e) => {
                tracing::warn!(chapter_id, error = %e, "Chapter prefetch failed, deferring");
                self.defer(chapter_id);
                Ok(PrefetchOutcome::Deferred)
            }
        }
    }

    /// Fetch and cache a chapter unless it is already cached
    pub async fn prefetch_chapter_if_needed(&self, chapter_id: &str) -> SyncResult<PrefetchOutcome> {
        if self.db.has_chapter(chapter_id).await? {
            return Ok(PrefetchOutcome::AlreadyCached);
        }

        let content = self.gateway.fetch_chapter_content(chapter_id).await?;
        self.store(content, None).await?;
        tracing::info!(chapter_id, "Prefetched chapter");
        Ok(PrefetchOutcome::Fetched)
    }

    fn defer(&self, chapter_id: &str) {
        *self.deferred_prefetch.lock() = Some(chapter_id.to_string());
    }

    /// Chapter waiting for the network, if any
    pub fn deferred_prefetch(&self) -> Option<String> {
        self.deferred_prefetch.lock().clone()
    }

    async fn store(&self, content: ChapterContent, subject_id: Option<&str>) -> SyncResult<ChapterRow> {
        let input = ChapterInput::from_content(content, subject_id);
        self.db.upsert_chapter(&input).await?;
        self.db
            .get_chapter(&input.chapter_id)
            .await?
            .ok_or_else(|| SyncError::NotFound(format!("chapter {}", input.chapter_id)))
    }

    pub async fn cached_chapter(&self, chapter_id: &str) -> SyncResult<Option<ChapterRow>> {
        self.db.get_chapter(chapter_id).await
    }

    /// Topics of a cached chapter
    pub async fn chapter_topics(&self, chapter_id: &str) -> SyncResult<Vec<Topic>> {
        self.db
            .get_chapter(chapter_id)
            .await?
            .ok_or_else(|| SyncError::NotFound(format!("chapter {} is not cached", chapter_id)))?
            .topics()
    }

    /// Stages of a cached chapter, chunked per the content policy
    pub async fn chapter_stages(&self, chapter_id: &str) -> SyncResult<Vec<TopicStage>> {
        let topics = self.chapter_topics(chapter_id).await?;
        Ok(build_stages(&topics, self.policy.stage_chunk_size))
    }
}

#[async_trait]
impl NetworkListener for ContentManager {
    async fn on_network_available(&self) {
        let pending = self.deferred_prefetch.lock().take();
        let Some(chapter_id) = pending else {
            return;
        };

        match self.prefetch_chapter_if_needed(&chapter_id).await {
            Ok(outcome) => tracing::debug!(chapter_id = %chapter_id, ?outcome, "Deferred prefetch finished"),
            Err(e) => {
                tracing::warn!(chapter_id = %chapter_id, error = %e, "Deferred prefetch failed");
                // Keep it for the next time unless something newer was deferred meanwhile
                self.deferred_prefetch.lock().get_or_insert(chapter_id);
            }
        }
    }
}
