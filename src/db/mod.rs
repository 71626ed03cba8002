//! Database layer for chapterflow
//!
//! SQLite persistence for a series' known chapters and reading progress. The database is
//! the single durable writer: the reader only proposes changes, and every proposal is
//! merged idempotently (chapter upsert by id, completion insert-or-ignore, progress last
//! write wins).
//!
//! ## Submodules
//!
//! Methods on [`Database`] are organized by domain:
//! - [`migrations`] - Database lifecycle, schema migrations
//! - [`library`] - Chapter list and reading progress
//! - [`writer`] - Proposal writer task feeding the database

use sqlx::{FromRow, sqlite::SqlitePool};

use crate::types::{ChapterLocator, ChapterRef, LocalRef};

mod library;
mod migrations;
mod writer;

pub use writer::ProposalWriter;

/// Chapter metadata to merge into a series' chapter list
#[derive(Debug, Clone)]
pub struct NewChapter {
    /// Chapter id
    pub id: String,
    /// Display title
    pub title: String,
    /// Ordinal used for ordering
    pub ordinal: f64,
    /// Local archive reference, once archived
    pub local_ref: Option<String>,
    /// Remote locator, for chapters that are only available online
    pub remote_url: Option<String>,
}

impl From<&ChapterRef> for NewChapter {
    fn from(chapter: &ChapterRef) -> Self {
        let (local_ref, remote_url) = match &chapter.locator {
            ChapterLocator::Local { local_ref } => (Some(local_ref.0.clone()), None),
            ChapterLocator::Remote { url } => (None, Some(url.clone())),
        };
        Self {
            id: chapter.id.0.clone(),
            title: chapter.title.clone(),
            ordinal: chapter.ordinal,
            local_ref,
            remote_url,
        }
    }
}

/// Chapter record from database
#[derive(Debug, Clone, FromRow)]
pub struct StoredChapter {
    /// Series the chapter belongs to
    pub series_id: String,
    /// Chapter id
    pub chapter_id: String,
    /// Display title
    pub title: String,
    /// Ordinal used for ordering
    pub ordinal: f64,
    /// Local archive reference
    pub local_ref: Option<String>,
    /// Remote locator
    pub remote_url: Option<String>,
    /// Unix timestamp of the last merge
    pub updated_at: i64,
}

impl StoredChapter {
    /// Convert to a chapter reference, preferring the local archive
    ///
    /// Returns `None` for a row that has neither a local nor a remote locator.
    pub fn to_chapter_ref(&self) -> Option<ChapterRef> {
        let locator = match (&self.local_ref, &self.remote_url) {
            (Some(local_ref), _) => ChapterLocator::local(LocalRef(local_ref.clone())),
            (None, Some(url)) => ChapterLocator::remote(url.clone()),
            (None, None) => return None,
        };
        Some(
            ChapterRef::new(self.chapter_id.as_str(), self.title.clone(), locator)
                .with_ordinal(self.ordinal),
        )
    }
}

/// Database handle for chapterflow
pub struct Database {
    pool: SqlitePool,
}
