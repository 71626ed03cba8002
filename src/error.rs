//! Error types for chapterflow
//!
//! The taxonomy follows how failures are treated by callers:
//! - `NotFound` - a search or discovery yielded nothing (expected, non-fatal)
//! - `TransientFetch` - a single page or listing fetch failed; aborts the current task
//! - `ContractViolation` - the caller handed the reader inconsistent inputs
//! - `PersistenceDeferred` - archival failed after a successful remote read
//!
//! Everything else (I/O, database, HTTP plumbing) is wrapped so it can be propagated
//! with `?` and reduced to a user-facing message via [`Error::user_message`].

use std::path::PathBuf;
use thiserror::Error;

use crate::types::{ChapterId, ChapterKey};

/// Result type alias for chapterflow operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for chapterflow
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "reader.window_max")
        key: Option<String>,
    },

    /// Search, listing, or discovery yielded nothing
    #[error("not found: {0}")]
    NotFound(String),

    /// Network or parse failure on a single page or listing page
    #[error("fetch failed for {locator}: {reason}")]
    TransientFetch {
        /// The page or listing locator that failed
        locator: String,
        /// The reason the fetch failed
        reason: String,
    },

    /// The caller supplied inputs that contradict each other
    #[error("contract violation: {0}")]
    ContractViolation(String),

    /// Archival failed after the content was read remotely
    #[error("persistence deferred for chapter {chapter_id}: {reason}")]
    PersistenceDeferred {
        /// The chapter that stays remote-only
        chapter_id: ChapterId,
        /// The reason archival failed
        reason: String,
    },

    /// The source explicitly reported itself as unavailable (stops retry loops)
    #[error("source {origin} unavailable: {reason}")]
    SourceUnavailable {
        /// Origin name of the source adapter
        origin: String,
        /// Reason reported by the adapter
        reason: String,
    },

    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// SQLx database error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Acquisition (download) error
    #[error("download error: {0}")]
    Download(#[from] DownloadError),

    /// Reader session error
    #[error("reader error: {0}")]
    Reader(#[from] ReaderError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Archive (zip) error
    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    /// Shutdown in progress - not accepting new work
    #[error("shutdown in progress: not accepting new downloads")]
    ShuttingDown,

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),
}

/// Acquisition pipeline errors, scoped to a single task
#[derive(Debug, Error)]
pub enum DownloadError {
    /// The source resolved the chapter to zero pages
    #[error("no pages found for {key}")]
    NoPages {
        /// The chapter whose pages could not be resolved
        key: ChapterKey,
    },

    /// A page fetch failed; the whole task is aborted
    #[error("page {index} of {key} failed: {reason}")]
    PageFetchFailed {
        /// The chapter being downloaded
        key: ChapterKey,
        /// Zero-based page index that failed
        index: usize,
        /// The reason the fetch failed
        reason: String,
    },

    /// The task ended in failure; `reason` carries the task's own error
    #[error("download of {key} failed: {reason}")]
    TaskFailed {
        /// The chapter that was being downloaded
        key: ChapterKey,
        /// The reason reported by the task
        reason: String,
    },

    /// Writing the archive to durable storage failed
    #[error("failed to persist archive {path}: {reason}")]
    PersistFailed {
        /// Destination path of the archive
        path: PathBuf,
        /// The reason the write failed
        reason: String,
    },
}

/// Reader session errors
#[derive(Debug, Error)]
pub enum ReaderError {
    /// The chapter's content could not be resolved to any page
    #[error("chapter {0} has no pages")]
    EmptyChapter(ChapterId),

    /// An operation was attempted on a closed session
    #[error("reader session is closed")]
    Closed,
}

impl Error {
    /// Reduce an error to one of the user-visible failure messages.
    ///
    /// Each message corresponds to an operation the user can simply retry.
    pub fn user_message(&self) -> &'static str {
        match self {
            Error::NotFound(_) | Error::SourceUnavailable { .. } => "chapter not found",
            Error::Download(_) | Error::PersistenceDeferred { .. } | Error::ShuttingDown => {
                "download failed"
            }
            _ => "failed to load chapter",
        }
    }

    /// Whether this error is the expected "nothing there" outcome.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}
