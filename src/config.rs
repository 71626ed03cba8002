//! Configuration types for chapterflow

use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

use crate::error::{Error, Result};

/// Windowed reader behavior
///
/// Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReaderConfig {
    /// Maximum number of chapters materialized at once once settled (default: 3)
    #[serde(default = "default_window_max")]
    pub window_max: usize,

    /// Fraction of the trailing chapter that must be passed before appending (default: 0.7)
    #[serde(default = "default_append_threshold")]
    pub append_threshold: f64,

    /// Distance from the top of the content, in pixels, that triggers a prepend (default: 200)
    #[serde(default = "default_prepend_threshold_px")]
    pub prepend_threshold_px: f64,

    /// How long to wait for the remembered page to render on resume (default: 5 seconds)
    #[serde(default = "default_resume_timeout", with = "duration_millis_serde")]
    pub resume_timeout: Duration,

    /// Interval between resume polls in the reader driver (default: 100 ms)
    #[serde(default = "default_resume_poll_interval", with = "duration_millis_serde")]
    pub resume_poll_interval: Duration,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            window_max: default_window_max(),
            append_threshold: default_append_threshold(),
            prepend_threshold_px: default_prepend_threshold_px(),
            resume_timeout: default_resume_timeout(),
            resume_poll_interval: default_resume_poll_interval(),
        }
    }
}

/// Pagination resolver behavior
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Ceiling on linear traversal fetches once estimation misses (default: 5)
    #[serde(default = "default_max_traversal_attempts")]
    pub max_traversal_attempts: u32,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            max_traversal_attempts: default_max_traversal_attempts(),
        }
    }
}

/// Acquisition pipeline behavior (concurrency, batching, storage)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AcquisitionConfig {
    /// Maximum concurrently executing chapter downloads (default: 3)
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_downloads: usize,

    /// Pages fetched together as one concurrent group (default: 5)
    #[serde(default = "default_page_batch_size")]
    pub page_batch_size: usize,

    /// Directory archives are written to (default: "./library")
    #[serde(default = "default_library_dir")]
    pub library_dir: PathBuf,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            max_concurrent_downloads: default_max_concurrent(),
            page_batch_size: default_page_batch_size(),
            library_dir: default_library_dir(),
        }
    }
}

/// HTTP behavior shared by source adapters and page fetching
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Per-request timeout (default: 10 seconds)
    #[serde(default = "default_http_timeout", with = "duration_serde")]
    pub timeout: Duration,

    /// Fallback user agent when an adapter's request profile does not set one
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Retry behavior for listing and search requests
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: default_http_timeout(),
            user_agent: default_user_agent(),
            retry: RetryConfig::default(),
        }
    }
}

/// Retry configuration for transient failures
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (default: 2)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay before first retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_millis_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 8 seconds)
    #[serde(default = "default_max_delay", with = "duration_millis_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

/// Data storage for reading progress and library metadata
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// SQLite database path (default: "./chapterflow.db")
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

/// Main configuration for chapterflow
///
/// Every sub-config has working defaults, so `Config::default()` is usable as-is.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Windowed reader settings
    #[serde(default)]
    pub reader: ReaderConfig,

    /// Pagination resolver settings
    #[serde(default)]
    pub resolver: ResolverConfig,

    /// Acquisition pipeline settings
    #[serde(default)]
    pub acquisition: AcquisitionConfig,

    /// HTTP settings for sources
    #[serde(default)]
    pub http: HttpConfig,

    /// Persistence settings
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

impl Config {
    /// Reject values that would stall or break the reader or pipeline.
    pub fn validate(&self) -> Result<()> {
        if self.reader.window_max == 0 {
            return Err(config_error("window_max must be at least 1", "reader.window_max"));
        }
        if !(0.0..=1.0).contains(&self.reader.append_threshold) {
            return Err(config_error(
                "append_threshold must be between 0.0 and 1.0",
                "reader.append_threshold",
            ));
        }
        if self.acquisition.max_concurrent_downloads == 0 {
            return Err(config_error(
                "max_concurrent_downloads must be at least 1",
                "acquisition.max_concurrent_downloads",
            ));
        }
        if self.acquisition.page_batch_size == 0 {
            return Err(config_error(
                "page_batch_size must be at least 1",
                "acquisition.page_batch_size",
            ));
        }
        Ok(())
    }

    /// Library directory archives are written to
    pub fn library_dir(&self) -> &PathBuf {
        &self.acquisition.library_dir
    }
}

fn config_error(message: &str, key: &str) -> Error {
    Error::Config {
        message: message.to_string(),
        key: Some(key.to_string()),
    }
}

fn default_window_max() -> usize {
    3
}

fn default_append_threshold() -> f64 {
    0.7
}

fn default_prepend_threshold_px() -> f64 {
    200.0
}

fn default_resume_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_resume_poll_interval() -> Duration {
    Duration::from_millis(100)
}

fn default_max_traversal_attempts() -> u32 {
    5
}

fn default_max_concurrent() -> usize {
    3
}

fn default_page_batch_size() -> usize {
    5
}

fn default_library_dir() -> PathBuf {
    PathBuf::from("library")
}

fn default_http_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string()
}

fn default_max_attempts() -> u32 {
    2
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(8)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_database_path() -> PathBuf {
    PathBuf::from("chapterflow.db")
}

fn default_true() -> bool {
    true
}

// Duration serialization helper (whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// Duration serialization helper (milliseconds)
mod duration_millis_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
