//! Source adapters: per-origin clients for search, listing, and page resolution.
//!
//! Every adapter implements [`SourceAdapter`] plus exactly one listing capability:
//! - [`FlatListing`] for origins that return the whole chapter list at once
//! - [`PaginatedListing`] for origins with newest-first, page-bucketed listings
//!
//! Callers hold a [`Source`], which carries the capability shape as a variant.
//!
//! ## Failure policy
//!
//! Network and parse failures are logged and reported as empty results. The only error
//! an adapter lets through is [`Error::SourceUnavailable`](crate::error::Error), which
//! callers use to stop retrying.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use crate::error::Result;
use crate::types::{ChapterRef, PageLocator, SeriesRef, SourceKind};

mod http;
mod mangadex;
mod webtoon;

pub use http::{RequestProfile, SourceHttp};
pub use mangadex::MangaDexSource;
pub use webtoon::WebtoonSource;

/// Operations every origin supports
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Origin name, used as the source half of a chapter's identity
    fn kind(&self) -> SourceKind;

    /// Identification headers for requests to this origin
    fn request_profile(&self) -> &RequestProfile;

    /// Best-effort fuzzy search. Empty on failure.
    async fn search(&self, query: &str) -> Vec<SeriesRef>;

    /// Resolve a chapter to its ordered page images.
    ///
    /// Returns an empty list on network or parse failure.
    async fn resolve_pages(&self, chapter: &ChapterRef) -> Result<Vec<PageLocator>>;
}

/// Origins that list every chapter in one (possibly internally paged) call
#[async_trait]
pub trait FlatListing: SourceAdapter {
    /// All chapters of the series in reading order. Empty on failure.
    async fn list_chapters(&self, series: &SeriesRef) -> Result<Vec<ChapterRef>>;
}

/// One page of a newest-first listing
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ListingPage {
    /// Chapters on this page, newest first
    pub chapters: Vec<ChapterRef>,
    /// Page the origin actually served (may differ from the one requested after redirects)
    pub current_page: u32,
    /// Lower bound on the number of pages; never smaller than a previous call reported
    pub max_page_known: u32,
}

/// Origins whose listings are newest-first and split into pages
#[async_trait]
pub trait PaginatedListing: SourceAdapter {
    /// Fetch one listing page (1-based). Empty chapters on failure.
    async fn list_page(&self, series: &SeriesRef, page: u32) -> Result<ListingPage>;
}

/// A source adapter tagged with its listing capability
#[derive(Clone)]
pub enum Source {
    /// Flat chapter listing
    Flat(Arc<dyn FlatListing>),
    /// Paginated newest-first listing
    Paginated(Arc<dyn PaginatedListing>),
}

impl Source {
    /// Origin name
    pub fn kind(&self) -> SourceKind {
        match self {
            Source::Flat(adapter) => adapter.kind(),
            Source::Paginated(adapter) => adapter.kind(),
        }
    }

    /// Identification headers for this origin
    pub fn request_profile(&self) -> &RequestProfile {
        match self {
            Source::Flat(adapter) => adapter.request_profile(),
            Source::Paginated(adapter) => adapter.request_profile(),
        }
    }

    /// Search the origin, de-duplicating results by series id
    pub async fn search(&self, query: &str) -> Vec<SeriesRef> {
        let results = match self {
            Source::Flat(adapter) => adapter.search(query).await,
            Source::Paginated(adapter) => adapter.search(query).await,
        };
        dedupe_series(results)
    }

    /// Resolve a chapter's page images
    pub async fn resolve_pages(&self, chapter: &ChapterRef) -> Result<Vec<PageLocator>> {
        match self {
            Source::Flat(adapter) => adapter.resolve_pages(chapter).await,
            Source::Paginated(adapter) => adapter.resolve_pages(chapter).await,
        }
    }
}

impl std::fmt::Debug for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Source::Flat(adapter) => f.debug_tuple("Flat").field(&adapter.kind()).finish(),
            Source::Paginated(adapter) => f.debug_tuple("Paginated").field(&adapter.kind()).finish(),
        }
    }
}

/// A series bound to the origin it can be read from online
#[derive(Clone, Debug)]
pub struct SourceBinding {
    /// The origin
    pub source: Source,
    /// The series at that origin
    pub series: SeriesRef,
}

/// Keep the first result for each series id, preserving order
pub fn dedupe_series(results: Vec<SeriesRef>) -> Vec<SeriesRef> {
    let mut seen = HashSet::new();
    results
        .into_iter()
        .filter(|series| seen.insert(series.id.clone()))
        .collect()
}

/// Per-series monotone lower bound on a paginated listing's page count
#[derive(Debug, Default)]
pub struct MaxPageBound {
    bounds: Mutex<HashMap<String, u32>>,
}

impl MaxPageBound {
    /// Create an empty bound table
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold a reported bound in and return the bound to expose (never smaller than before)
    pub fn observe(&self, series_id: &str, reported: u32) -> u32 {
        let mut bounds = self.bounds.lock().unwrap_or_else(|e| e.into_inner());
        let entry = bounds.entry(series_id.to_string()).or_insert(1);
        *entry = (*entry).max(reported);
        *entry
    }

    /// The bound known so far (1 when nothing was observed)
    pub fn current(&self, series_id: &str) -> u32 {
        let bounds = self.bounds.lock().unwrap_or_else(|e| e.into_inner());
        bounds.get(series_id).copied().unwrap_or(1)
    }
}
