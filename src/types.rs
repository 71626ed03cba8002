//! Core types and events for chapterflow

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::ordinal::parse_ordinal;

/// Raw chapter identifier as issued by a source (or by the local library)
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChapterId(pub String);

impl ChapterId {
    /// Borrow the raw identifier
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ChapterId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ChapterId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for ChapterId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Name of the origin a source adapter talks to (e.g. "webtoon", "mangadex")
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceKind(pub String);

impl SourceKind {
    /// Create a new source kind
    pub fn new(kind: impl Into<String>) -> Self {
        Self(kind.into())
    }

    /// Borrow the origin name
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Stable local reference to an archived chapter
///
/// Issued by the acquisition pipeline; never the source's own id.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocalRef(pub String);

impl LocalRef {
    /// Borrow the reference
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for LocalRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of a chapter: the pair (source, id)
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChapterKey {
    /// Origin the chapter belongs to
    pub source: SourceKind,
    /// Raw chapter id within that origin
    pub chapter_id: ChapterId,
}

impl ChapterKey {
    /// Create a key from a source name and chapter id
    pub fn new(source: impl Into<String>, chapter_id: impl Into<String>) -> Self {
        Self {
            source: SourceKind::new(source),
            chapter_id: ChapterId(chapter_id.into()),
        }
    }
}

impl std::fmt::Display for ChapterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.source, self.chapter_id)
    }
}

/// Where a chapter's content can be obtained from
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChapterLocator {
    /// Archived locally; pages come from the content-resolution collaborator
    Local {
        /// Local archive reference
        local_ref: LocalRef,
    },
    /// Only available at the source; pages come from the adapter
    Remote {
        /// Source-specific locator (usually the chapter URL or API id)
        url: String,
    },
}

impl ChapterLocator {
    /// Build a remote locator
    pub fn remote(url: impl Into<String>) -> Self {
        ChapterLocator::Remote { url: url.into() }
    }

    /// Build a local locator
    pub fn local(local_ref: LocalRef) -> Self {
        ChapterLocator::Local { local_ref }
    }
}

/// A reference to one chapter in a series listing
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChapterRef {
    /// Raw id (identity together with the source)
    pub id: ChapterId,
    /// Title as displayed by the source
    pub title: String,
    /// Numeric key derived from the title, for sort/compare only
    pub ordinal: f64,
    /// Where to obtain the chapter's pages
    pub locator: ChapterLocator,
}

impl ChapterRef {
    /// Create a chapter reference, deriving the ordinal from the title.
    ///
    /// Titles without any numeric token sort as ordinal 0.
    pub fn new(id: impl Into<ChapterId>, title: impl Into<String>, locator: ChapterLocator) -> Self {
        let title = title.into();
        let ordinal = parse_ordinal(&title).unwrap_or(0.0);
        Self {
            id: id.into(),
            title,
            ordinal,
            locator,
        }
    }

    /// Override the derived ordinal with one the source reports explicitly
    pub fn with_ordinal(mut self, ordinal: f64) -> Self {
        self.ordinal = ordinal;
        self
    }
}

/// A series as returned by a source search
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesRef {
    /// Source-specific series id
    pub id: String,
    /// Display title
    pub title: String,
    /// Canonical series URL, when the source has one
    pub url: Option<String>,
    /// Cover image URL
    pub cover_url: Option<String>,
}

impl SeriesRef {
    /// Create a series reference with only id and title
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            url: None,
            cover_url: None,
        }
    }
}

/// Location of one page image
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PageLocator {
    /// Page image hosted by the source
    Remote {
        /// Image URL
        url: String,
    },
    /// Page image stored inside a local archive
    Archived {
        /// Archive holding the page
        local_ref: LocalRef,
        /// Entry name within the archive
        entry: String,
    },
}

impl PageLocator {
    /// Build a remote page locator
    pub fn remote(url: impl Into<String>) -> Self {
        PageLocator::Remote { url: url.into() }
    }
}

impl std::fmt::Display for PageLocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PageLocator::Remote { url } => f.write_str(url),
            PageLocator::Archived { local_ref, entry } => write!(f, "{local_ref}#{entry}"),
        }
    }
}

/// Load status of a chapter inside the reader window
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentStatus {
    /// Known but not requested yet
    Pending,
    /// Pages are being resolved
    Loading,
    /// Pages are available
    Loaded,
    /// Resolution failed
    Error,
}

/// The materialized content of one chapter
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChapterContent {
    /// Chapter this content belongs to
    pub chapter_id: ChapterId,
    /// Pages in reading order
    pub pages: Vec<PageLocator>,
    /// Load status
    pub status: ContentStatus,
}

impl ChapterContent {
    /// A chapter whose pages have been resolved
    pub fn loaded(chapter_id: ChapterId, pages: Vec<PageLocator>) -> Self {
        Self {
            chapter_id,
            pages,
            status: ContentStatus::Loaded,
        }
    }

    /// A chapter whose pages are being resolved
    pub fn loading(chapter_id: ChapterId) -> Self {
        Self {
            chapter_id,
            pages: Vec::new(),
            status: ContentStatus::Loading,
        }
    }

    /// Index of the last page, if any
    pub fn last_page(&self) -> Option<u32> {
        (self.pages.len() as u32).checked_sub(1)
    }
}

/// Durable reading progress for one series, as owned by the persistence collaborator
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadingProgress {
    /// Chapter the reader was last positioned in
    pub last_chapter_id: Option<ChapterId>,
    /// Page within that chapter
    pub last_page: u32,
    /// Chapters marked complete
    pub completed_chapter_ids: BTreeSet<ChapterId>,
}

/// A proposal from the reader to the persistence collaborator
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Proposal {
    /// The reader is now positioned at this chapter/page
    Progress {
        /// Chapter in view
        chapter_id: ChapterId,
        /// Page in view
        page: u32,
    },
    /// A chapter was finished; carries the new position atomically
    Completion {
        /// Chapter that was completed
        completed_id: ChapterId,
        /// Chapter that is now current
        current_chapter_id: ChapterId,
        /// Page within the current chapter
        page: u32,
    },
    /// A chapter was discovered online and archived locally
    NewChapter {
        /// Chapter id
        id: ChapterId,
        /// Chapter title
        title: String,
        /// Ordinal the reader sorted the chapter by
        ordinal: f64,
        /// Local archive reference
        local_ref: LocalRef,
    },
}

/// One chapter queued or running in the acquisition pipeline
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DownloadTask {
    /// Identity of the chapter being acquired
    pub key: ChapterKey,
    /// Chapter reference handed to the source adapter
    pub chapter: ChapterRef,
    /// Origin the chapter is fetched from
    pub source_kind: SourceKind,
    /// Series title used for archive naming
    pub target_title: String,
    /// Progress fraction (0.0 to 1.0)
    pub progress: f32,
}

/// Whether a task is waiting or executing
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    /// Waiting for a concurrency slot
    Queued,
    /// Executing
    Active,
}

/// Point-in-time view of the pipeline's task sets
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PipelineSnapshot {
    /// Queued tasks in FIFO order
    pub queued: Vec<DownloadTask>,
    /// Executing tasks
    pub active: Vec<DownloadTask>,
}

/// Event emitted by the acquisition pipeline
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Task added to the queue
    Queued {
        /// Chapter identity
        key: ChapterKey,
        /// Chapter title
        title: String,
    },

    /// Task removed from the queue before it started
    Removed {
        /// Chapter identity
        key: ChapterKey,
    },

    /// Task acquired a concurrency slot
    Started {
        /// Chapter identity
        key: ChapterKey,
    },

    /// Page download progress
    Progress {
        /// Chapter identity
        key: ChapterKey,
        /// Overall progress fraction (0.0 to 1.0)
        progress: f32,
        /// Pages fetched so far
        pages_done: usize,
        /// Total pages
        pages_total: usize,
    },

    /// All pages fetched, packing the archive
    Assembling {
        /// Chapter identity
        key: ChapterKey,
    },

    /// Archive packed, writing to durable storage
    Persisting {
        /// Chapter identity
        key: ChapterKey,
    },

    /// Archive written
    Complete {
        /// Chapter identity
        key: ChapterKey,
        /// Reference the rest of the system uses from now on
        local_ref: LocalRef,
    },

    /// Task failed; nothing was persisted
    Failed {
        /// Chapter identity
        key: ChapterKey,
        /// Error message
        error: String,
    },
}

impl Event {
    /// The chapter this event concerns
    pub fn key(&self) -> &ChapterKey {
        match self {
            Event::Queued { key, .. }
            | Event::Removed { key }
            | Event::Started { key }
            | Event::Progress { key, .. }
            | Event::Assembling { key }
            | Event::Persisting { key }
            | Event::Complete { key, .. }
            | Event::Failed { key, .. } => key,
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chapter_ref_derives_ordinal_from_title() {
        let chapter = ChapterRef::new("abc", "Episode 42 - The Return", ChapterLocator::remote("u"));
        assert_eq!(chapter.ordinal, 42.0);

        let untitled = ChapterRef::new("abc", "Prologue", ChapterLocator::remote("u"));
        assert_eq!(untitled.ordinal, 0.0);
    }

    #[test]
    fn explicit_ordinal_overrides_title() {
        let chapter =
            ChapterRef::new("x", "Special", ChapterLocator::remote("u")).with_ordinal(12.5);
        assert_eq!(chapter.ordinal, 12.5);
    }

    #[test]
    fn last_page_of_empty_content_is_none() {
        let content = ChapterContent::loaded(ChapterId::from("1"), vec![]);
        assert_eq!(content.last_page(), None);

        let content = ChapterContent::loaded(
            ChapterId::from("1"),
            vec![PageLocator::remote("a"), PageLocator::remote("b")],
        );
        assert_eq!(content.last_page(), Some(1));
    }

    #[test]
    fn event_serializes_with_type_tag() {
        let event = Event::Complete {
            key: ChapterKey::new("webtoon", "7"),
            local_ref: LocalRef("1_series_ep7.cbz".into()),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "complete");
        assert_eq!(json["local_ref"], "1_series_ep7.cbz");
    }
}
