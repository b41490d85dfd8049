//! Course structure catalog
//!
//! Loaded from the server at most once per process. When the server cannot
//! be reached the bundled fallback structure is served instead and the next
//! load tries the server again.

use crate::error::{SyncError, SyncResult};
use crate::gateway::RemoteGateway;
use crate::models::{ChapterSummary, Language};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentSource {
    Api,
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CourseData {
    pub languages: Vec<Language>,
    pub source: ContentSource,
}

pub struct CourseCatalog {
    gateway: Arc<dyn RemoteGateway>,
    fallback: Vec<Language>,
    // Held across the fetch so concurrent loads share one request
    cache: Mutex<Option<CourseData>>,
}

impl CourseCatalog {
    pub fn new(gateway: Arc<dyn RemoteGateway>, fallback: Vec<Language>) -> Self {
        Self {
            gateway,
            fallback,
            cache: Mutex::new(None),
        }
    }

    /// Read a fallback structure from a JSON file
    pub fn read_fallback(path: &Path) -> SyncResult<Vec<Language>> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| SyncError::Config(format!("{}: {}", path.display(), e)))?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub async fn load(&self) -> SyncResult<CourseData> {
        let mut cache = self.cache.lock().await;
        if let Some(cached) = cache.as_ref() {
            return Ok(cached.clone());
        }

        match self.gateway.fetch_course_structure().await {
            Ok(languages) if !languages.is_empty() => {
                tracing::info!(languages = languages.len(), "Loaded course structure from server");
                let data = CourseData {
                    languages,
                    source: ContentSource::Api,
                };
                *cache = Some(data.clone());
                Ok(data)
            }
            Ok(_) => {
                tracing::warn!("Server returned an empty course structure, using fallback");
                Ok(self.fallback_data())
            }
            Err(e) => {
                tracing::warn!(error = %e, "Course structure fetch failed, using fallback");
                Ok(self.fallback_data())
            }
        }
    }

    fn fallback_data(&self) -> CourseData {
        CourseData {
            languages: self.fallback.clone(),
            source: ContentSource::Fallback,
        }
    }

    /// Drop the cached structure so the next load asks the server again
    pub async fn invalidate(&self) {
        *self.cache.lock().await = None;
    }

    /// Previous and next chapter ids within the chapter's subject
    pub async fn chapter_neighbours(&self, chapter_id: &str) -> SyncResult<(Option<String>, Option<String>)> {
        let data = self.load().await?;

        for subject in data.languages.iter().flat_map(|l| &l.subjects) {
            let ordered = ordered_chapters(&subject.chapters);
            if let Some(index) = ordered.iter().position(|c| c.id == chapter_id) {
                let prev = index
                    .checked_sub(1)
                    .and_then(|i| ordered.get(i))
                    .map(|c| c.id.clone());
                let next = ordered.get(index + 1).map(|c| c.id.clone());
                return Ok((prev, next));
            }
        }

        Err(SyncError::NotFound(format!("chapter {} in course structure", chapter_id)))
    }

    /// First chapter of a subject in course order
    pub async fn first_chapter(&self, subject_id: &str) -> SyncResult<Option<String>> {
        let data = self.load().await?;
        Ok(data
            .languages
            .iter()
            .flat_map(|l| &l.subjects)
            .find(|s| s.id == subject_id)
            .and_then(|s| ordered_chapters(&s.chapters).first().map(|c| c.id.clone())))
    }
}

/// Chapters by number/order; unnumbered ones keep their listed position
fn ordered_chapters(chapters: &[ChapterSummary]) -> Vec<&ChapterSummary> {
    let mut ordered: Vec<(i64, &ChapterSummary)> = chapters
        .iter()
        .enumerate()
        .map(|(index, chapter)| {
            let listed = i64::try_from(index).unwrap_or(i64::MAX).saturating_add(1);
            (chapter.position().unwrap_or(listed), chapter)
        })
        .collect();
    ordered.sort_by_key(|(position, _)| *position);
    ordered.into_iter().map(|(_, chapter)| chapter).collect()
}
