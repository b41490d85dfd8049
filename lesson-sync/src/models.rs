//! Content, ledger and course-structure types shared across the engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One slide-deck style lesson inside a topic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MicroLesson {
    #[serde(alias = "_id")]
    pub id: String,
    #[serde(default, alias = "microlesson_number")]
    pub order: i64,
    #[serde(default, alias = "microlesson_title")]
    pub title: String,
    #[serde(default, alias = "microlesson_content")]
    pub content: Vec<String>,
}

/// Multiple-choice question attached to a topic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quiz {
    #[serde(alias = "_id")]
    pub id: String,
    pub question: String,
    #[serde(default)]
    pub options: Vec<String>,
    /// Index into `options`
    pub correct: usize,
    #[serde(default)]
    pub explanation: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topic {
    #[serde(alias = "_id")]
    pub topic_id: String,
    #[serde(default, alias = "topic_number")]
    pub topic_order: i64,
    #[serde(default)]
    pub topic_name: Option<String>,
    #[serde(default)]
    pub microlessons: Vec<MicroLesson>,
    #[serde(default)]
    pub quizzes: Vec<Quiz>,
}

/// Chapter payload returned by the remote content endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChapterContent {
    pub chapter_id: String,
    pub chapter_name: String,
    #[serde(default)]
    pub chapter_order: i64,
    #[serde(default)]
    pub subject_id: String,
    #[serde(default)]
    pub subject_name: String,
    pub total_topics: i64,
    #[serde(default)]
    pub topics: Vec<Topic>,
}

/// Input for a wholesale chapter cache write
#[derive(Debug, Clone, PartialEq)]
pub struct ChapterInput {
    pub chapter_id: String,
    pub chapter_name: String,
    pub chapter_order: i64,
    pub subject_id: String,
    pub subject_name: String,
    pub total_topics: i64,
    pub topics: Vec<Topic>,
}

impl ChapterInput {
    /// Build a cache row input, attributing the chapter to `subject_id`
    pub fn from_content(content: ChapterContent, subject_id: Option<&str>) -> Self {
        Self {
            subject_id: subject_id.map_or(content.subject_id, str::to_string),
            chapter_id: content.chapter_id,
            chapter_name: content.chapter_name,
            chapter_order: content.chapter_order,
            subject_name: content.subject_name,
            total_topics: content.total_topics,
            topics: content.topics,
        }
    }
}

/// Cached chapter row
#[derive(Debug, Clone, PartialEq)]
pub struct ChapterRow {
    pub id: i64,
    pub chapter_id: String,
    pub chapter_name: String,
    pub chapter_order: i64,
    pub subject_id: String,
    pub subject_name: String,
    pub total_topics: i64,
    pub content_json: String,
    pub fetched_at: DateTime<Utc>,
}

impl ChapterRow {
    /// Decode the cached topic list
    pub fn topics(&self) -> crate::SyncResult<Vec<Topic>> {
        Ok(serde_json::from_str(&self.content_json)?)
    }
}

/// A single answered quiz question, before it is stored
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewQuizResult {
    pub quiz_id: String,
    pub topic_id: String,
    pub chapter_id: String,
    pub selected_option: i64,
    pub is_correct: bool,
    pub time_taken_ms: Option<i64>,
}

/// Immutable ledger row for one answered question
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizResult {
    pub id: i64,
    pub client_ref: Uuid,
    pub quiz_id: String,
    pub topic_id: String,
    pub chapter_id: String,
    pub selected_option: i64,
    pub is_correct: bool,
    pub time_taken_ms: Option<i64>,
    pub attempted_at: DateTime<Utc>,
    pub is_synced: bool,
    pub remote_id: Option<String>,
}

impl QuizResult {
    pub fn payload(&self) -> QuizResultPayload {
        QuizResultPayload {
            client_ref: self.client_ref,
            quiz_id: self.quiz_id.clone(),
            topic_id: self.topic_id.clone(),
            chapter_id: self.chapter_id.clone(),
            selected_option: self.selected_option,
            is_correct: self.is_correct,
            time_taken_ms: self.time_taken_ms,
            attempted_at: self.attempted_at,
        }
    }
}

/// Body of a "create quiz result" request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizResultPayload {
    /// Client-generated key the server may use to drop duplicate creates
    pub client_ref: Uuid,
    pub quiz_id: String,
    pub topic_id: String,
    pub chapter_id: String,
    pub selected_option: i64,
    pub is_correct: bool,
    #[serde(default)]
    pub time_taken_ms: Option<i64>,
    pub attempted_at: DateTime<Utc>,
}

/// Server acknowledgement of a created result
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitReceipt {
    #[serde(default, alias = "_id")]
    pub remote_id: Option<String>,
}

/// Persisted completion state for one stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicProgressRow {
    pub chapter_id: String,
    pub stage_id: String,
    pub source_topic_id: String,
    pub stage_order: i64,
    pub stage_type: String,
    pub is_completed: bool,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

// Course structure tree, used to discover ids only

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicSummary {
    #[serde(alias = "_id")]
    pub id: String,
    #[serde(default)]
    pub topic_number: Option<i64>,
    #[serde(default)]
    pub order: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterSummary {
    #[serde(alias = "_id")]
    pub id: String,
    pub chapter_name: String,
    #[serde(default)]
    pub chapter_number: Option<i64>,
    #[serde(default)]
    pub order: Option<i64>,
    #[serde(default)]
    pub topics: Vec<TopicSummary>,
}

impl ChapterSummary {
    /// Position of the chapter within its subject
    pub fn position(&self) -> Option<i64> {
        self.chapter_number.or(self.order)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    #[serde(alias = "_id")]
    pub id: String,
    pub subject_name: String,
    #[serde(default)]
    pub chapters: Vec<ChapterSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Language {
    #[serde(alias = "_id")]
    pub id: String,
    pub language_name: String,
    #[serde(default)]
    pub subjects: Vec<Subject>,
}
