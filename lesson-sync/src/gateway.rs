//! Remote gateway
//!
//! The engine only talks to the server through [`RemoteGateway`]. The HTTP
//! implementation applies a per-operation timeout so a stalled request never
//! holds the sync slot indefinitely.

use crate::config::GatewayConfig;
use crate::error::{SyncError, SyncResult};
use crate::models::{ChapterContent, Language, QuizResultPayload, SubmitReceipt};
use async_trait::async_trait;
use serde::de::DeserializeOwned;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RemoteGateway: Send + Sync {
    /// Create a quiz result on the server
    async fn submit_quiz_result(&self, payload: &QuizResultPayload) -> SyncResult<SubmitReceipt>;

    /// Fetch the full content of one chapter
    async fn fetch_chapter_content(&self, chapter_id: &str) -> SyncResult<ChapterContent>;

    /// Fetch the language/subject/chapter tree
    async fn fetch_course_structure(&self) -> SyncResult<Vec<Language>>;
}

/// JSON-over-HTTP gateway
pub struct HttpGateway {
    config: GatewayConfig,
    base_url: String,
    client: reqwest::Client,
}

impl HttpGateway {
    pub fn new(config: GatewayConfig) -> SyncResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("lesson-sync/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            config,
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> SyncResult<T> {
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(SyncError::RemoteStatus {
                status: status.as_u16(),
                message,
            });
        }

        let body = response.bytes().await?;
        if body.is_empty() {
            // Some endpoints acknowledge with an empty body
            return Ok(serde_json::from_str("null")?);
        }
        Ok(serde_json::from_slice(&body)?)
    }
}

#[async_trait]
impl RemoteGateway for HttpGateway {
    async fn submit_quiz_result(&self, payload: &QuizResultPayload) -> SyncResult<SubmitReceipt> {
        let response = self
            .client
            .post(self.url("quiz-results"))
            .timeout(self.config.submit_timeout)
            .json(payload)
            .send()
            .await?;

        let receipt: Option<SubmitReceipt> = Self::read_json(response).await?;
        let receipt = receipt.unwrap_or_default();

        tracing::debug!(
            client_ref = %payload.client_ref,
            remote_id = ?receipt.remote_id,
            "Quiz result submitted"
        );
        Ok(receipt)
    }

    async fn fetch_chapter_content(&self, chapter_id: &str) -> SyncResult<ChapterContent> {
        let response = self
            .client
            .get(self.url(&format!("chapters/{}/content", chapter_id)))
            .timeout(self.config.chapter_timeout)
            .send()
            .await?;

        let content: Option<ChapterContent> = Self::read_json(response).await?;
        content.ok_or_else(|| SyncError::NotFound(format!("chapter {}", chapter_id)))
    }

    async fn fetch_course_structure(&self) -> SyncResult<Vec<Language>> {
        let response = self
            .client
            .get(self.url("course-structure"))
            .timeout(self.config.course_timeout)
            .send()
            .await?;

        let languages: Option<Vec<Language>> = Self::read_json(response).await?;
        Ok(languages.unwrap_or_default())
    }
}
