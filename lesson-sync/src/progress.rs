//! Stage progress tracking for cached chapters

use crate::content::TopicCompletion;
use crate::error::{SyncError, SyncResult};
use crate::local_db::LocalDatabase;
use crate::models::Topic;
use crate::stages::{build_stages, TopicStage};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// A stage with its stored completion state
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageProgress {
    #[serde(flatten)]
    pub stage: TopicStage,
    pub is_completed: bool,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StageCompletion {
    /// Whether every stage of the stage's topic is now complete
    pub topic_completed: bool,
    pub completed_topics: u32,
    pub total_topics: u32,
}

pub struct ProgressTracker {
    db: Arc<LocalDatabase>,
    chunk_size: usize,
}

impl ProgressTracker {
    pub fn new(db: Arc<LocalDatabase>, chunk_size: usize) -> Self {
        Self { db, chunk_size }
    }

    async fn topics(&self, chapter_id: &str) -> SyncResult<Vec<Topic>> {
        self.db
            .get_chapter(chapter_id)
            .await?
            .ok_or_else(|| SyncError::NotFound(format!("chapter {} is not cached", chapter_id)))?
            .topics()
    }

    async fn completed_stage_ids(&self, chapter_id: &str) -> SyncResult<HashMap<String, Option<DateTime<Utc>>>> {
        Ok(self
            .db
            .chapter_progress(chapter_id)
            .await?
            .into_iter()
            .filter(|row| row.is_completed)
            .map(|row| (row.stage_id, row.completed_at))
            .collect())
    }

    /// Stages of a cached chapter with their completion flags
    pub async fn stage_view(&self, chapter_id: &str) -> SyncResult<Vec<StageProgress>> {
        let stages = build_stages(&self.topics(chapter_id).await?, self.chunk_size);
        let completed = self.completed_stage_ids(chapter_id).await?;

        Ok(stages
            .into_iter()
            .map(|stage| {
                let completed_at = completed.get(&stage.stage_id).copied();
                StageProgress {
                    is_completed: completed_at.is_some(),
                    completed_at: completed_at.flatten(),
                    stage,
                }
            })
            .collect())
    }

    /// Mark a stage complete and report topic-level progress
    pub async fn complete_stage(&self, chapter_id: &str, stage_id: &str) -> SyncResult<StageCompletion> {
        let topics = self.topics(chapter_id).await?;
        let stages = build_stages(&topics, self.chunk_size);

        let stage = stages
            .iter()
            .find(|stage| stage.stage_id == stage_id)
            .ok_or_else(|| SyncError::NotFound(format!("stage {} in chapter {}", stage_id, chapter_id)))?;

        self.db.upsert_stage_completion(chapter_id, stage).await?;

        let completed: HashSet<String> = self.completed_stage_ids(chapter_id).await?.into_keys().collect();
        let topic_done = |topic_id: &str| {
            stages
                .iter()
                .filter(|s| s.source_topic_id == topic_id)
                .all(|s| completed.contains(&s.stage_id))
        };

        let completed_topics = topics.iter().filter(|t| topic_done(&t.topic_id)).count();
        let result = StageCompletion {
            topic_completed: topic_done(&stage.source_topic_id),
            completed_topics: u32::try_from(completed_topics).unwrap_or(u32::MAX),
            total_topics: u32::try_from(topics.len()).unwrap_or(u32::MAX),
        };

        tracing::debug!(
            chapter_id,
            stage_id,
            topic_completed = result.topic_completed,
            completed_topics = result.completed_topics,
            total_topics = result.total_topics,
            "Stage completed"
        );

        Ok(result)
    }

    /// Progress report for the content lifecycle policy
    pub fn topic_completion(
        chapter_id: &str,
        completion: &StageCompletion,
        prev_chapter_id: Option<String>,
        next_chapter_id: Option<String>,
    ) -> TopicCompletion {
        TopicCompletion {
            current_chapter_id: chapter_id.to_string(),
            completed_topics: completion.completed_topics,
            total_topics: completion.total_topics,
            next_chapter_id,
            prev_chapter_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local_db::test_support::create_test_db;
    use crate::models::{ChapterInput, MicroLesson, Quiz};

    fn chapter() -> ChapterInput {
        let lesson = |id: &str| MicroLesson {
            id: id.into(),
            order: 0,
            title: id.into(),
            content: vec![],
        };
        let quiz = |id: &str| Quiz {
            id: id.into(),
            question: "?".into(),
            options: vec!["a".into(), "b".into()],
            correct: 1,
            explanation: None,
        };

        ChapterInput {
            chapter_id: "C1".into(),
            chapter_name: "Fractions".into(),
            chapter_order: 1,
            subject_id: "S1".into(),
            subject_name: "Maths".into(),
            total_topics: 2,
            topics: vec![
                Topic {
                    topic_id: "T1".into(),
                    topic_order: 1,
                    topic_name: None,
                    microlessons: vec![lesson("M1")],
                    quizzes: vec![quiz("Q1")],
                },
                Topic {
                    topic_id: "T2".into(),
                    topic_order: 2,
                    topic_name: None,
                    microlessons: vec![lesson("M2")],
                    quizzes: vec![],
                },
            ],
        }
    }

    async fn tracker() -> (ProgressTracker, tempfile::TempDir) {
        let (db, dir) = create_test_db().await;
        db.upsert_chapter(&chapter()).await.unwrap();
        (ProgressTracker::new(Arc::new(db), 5), dir)
    }

    #[tokio::test]
    async fn test_topic_completes_when_all_stages_are_done() {
        let (tracker, _dir) = tracker().await;

        let first = tracker.complete_stage("C1", "T1:microlesson:1").await.unwrap();
        assert!(!first.topic_completed);
        assert_eq!(first.completed_topics, 0);
        assert_eq!(first.total_topics, 2);

        let second = tracker.complete_stage("C1", "T1:quiz:1").await.unwrap();
        assert!(second.topic_completed);
        assert_eq!(second.completed_topics, 1);

        // Completing again changes nothing
        let again = tracker.complete_stage("C1", "T1:quiz:1").await.unwrap();
        assert_eq!(again, second);
    }

    #[tokio::test]
    async fn test_stage_view_merges_completion() {
        let (tracker, _dir) = tracker().await;
        tracker.complete_stage("C1", "T2:microlesson:1").await.unwrap();

        let view = tracker.stage_view("C1").await.unwrap();
        let flags: Vec<(&str, bool)> = view
            .iter()
            .map(|p| (p.stage.stage_id.as_str(), p.is_completed))
            .collect();
        assert_eq!(
            flags,
            vec![
                ("T1:microlesson:1", false),
                ("T1:quiz:1", false),
                ("T2:microlesson:1", true),
            ]
        );
        assert!(view[2].completed_at.is_some());
    }

    #[tokio::test]
    async fn test_unknown_stage_is_not_found() {
        let (tracker, _dir) = tracker().await;
        assert!(matches!(
            tracker.complete_stage("C1", "T9:quiz:1").await,
            Err(SyncError::NotFound(_))
        ));
        assert!(matches!(
            tracker.stage_view("missing").await,
            Err(SyncError::NotFound(_))
        ));
    }
}
