//! Engine configuration
//!
//! Layered as: built-in defaults, then an optional file (YAML, TOML or JSON),
//! then `LESSON_SYNC_*` environment variables with `__` separating nested
//! keys, e.g. `LESSON_SYNC_GATEWAY__BASE_URL`.

use crate::error::SyncResult;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const ENV_PREFIX: &str = "LESSON_SYNC";

/// Top-level configuration for [`crate::SyncEngine`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub database: LocalDbConfig,
    pub gateway: GatewayConfig,
    pub sync: SyncPolicy,
    pub content: ContentPolicy,
}

/// Configuration for local database
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalDbConfig {
    /// Path to the database file
    pub db_path: String,
    /// Maximum number of connections in the pool
    pub max_connections: u32,
    /// Whether to enable WAL mode
    pub enable_wal: bool,
    /// How long a statement waits on a locked database
    #[serde(with = "duration_ms")]
    pub busy_timeout: Duration,
}

impl Default for LocalDbConfig {
    fn default() -> Self {
        Self {
            db_path: "lesson_sync.db".to_string(),
            max_connections: 4,
            enable_wal: true,
            busy_timeout: Duration::from_secs(5),
        }
    }
}

/// Remote gateway endpoints and per-operation timeouts
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub base_url: String,
    #[serde(with = "duration_ms")]
    pub submit_timeout: Duration,
    #[serde(with = "duration_ms")]
    pub chapter_timeout: Duration,
    #[serde(with = "duration_ms")]
    pub course_timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: "http://10.0.2.2:8080/v1".to_string(),
            submit_timeout: Duration::from_secs(30),
            chapter_timeout: Duration::from_secs(15),
            course_timeout: Duration::from_secs(12),
        }
    }
}

/// Outbox retry and scheduler throttling
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncPolicy {
    /// Attempts after which an outbox entry is abandoned
    pub max_retries: i64,
    /// Minimum gap after a successful pass before an unforced pass may run
    #[serde(with = "duration_ms")]
    pub min_sync_interval: Duration,
    /// Period of the background pending-work check
    #[serde(with = "duration_ms")]
    pub background_check_interval: Duration,
}

impl Default for SyncPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            min_sync_interval: Duration::from_secs(30),
            background_check_interval: Duration::from_secs(5),
        }
    }
}

/// Stage chunking and the prefetch/eviction window
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContentPolicy {
    pub stage_chunk_size: usize,
    pub prefetch_threshold_percent: u32,
    pub evict_threshold_percent: u32,
    /// JSON course structure served when the server cannot be reached
    pub fallback_course_path: Option<String>,
}

impl Default for ContentPolicy {
    fn default() -> Self {
        Self {
            stage_chunk_size: crate::stages::DEFAULT_CHUNK_SIZE,
            prefetch_threshold_percent: 70,
            evict_threshold_percent: 50,
            fallback_course_path: None,
        }
    }
}

impl EngineConfig {
    /// Load configuration from defaults, an optional file and the environment
    pub fn load(path: Option<&Path>) -> SyncResult<Self> {
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&Self::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let config = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }
}

// Serialize Duration as milliseconds
mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
