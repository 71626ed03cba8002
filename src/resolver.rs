//! Pagination resolver: locate a chapter ordinal inside a newest-first paged listing.
//!
//! Paginated listings have no "jump to chapter N" operation. The resolver fetches page 1,
//! estimates the target page from the observed spacing, checks the last known page, and
//! then walks the page bound forward a bounded number of times. Every page is fetched at
//! most once per resolution.

use std::collections::{BTreeMap, BTreeSet};

use crate::config::ResolverConfig;
use crate::error::Result;
use crate::ordinal::{find_by_ordinal, same_ordinal, sort_reading_order};
use crate::source::{FlatListing, ListingPage, PaginatedListing, Source};
use crate::types::{ChapterRef, SeriesRef};

/// Lazily populated cache over one paginated listing
///
/// Lives for a single resolution. Page 1 always holds the newest chapter.
#[derive(Debug, Default)]
pub struct PaginatedIndex {
    pages: BTreeMap<u32, Vec<ChapterRef>>,
    visited: BTreeSet<u32>,
    max_page_known: u32,
}

impl PaginatedIndex {
    /// Empty index with a page bound of 1
    pub fn new() -> Self {
        Self {
            max_page_known: 1,
            ..Self::default()
        }
    }

    /// Whether `page` was already requested
    pub fn is_visited(&self, page: u32) -> bool {
        self.visited.contains(&page)
    }

    /// Best page bound seen so far
    pub fn max_page_known(&self) -> u32 {
        self.max_page_known
    }

    /// Number of pages requested
    pub fn fetch_count(&self) -> usize {
        self.visited.len()
    }

    /// Chapters cached for `page`
    pub fn page(&self, page: u32) -> Option<&[ChapterRef]> {
        self.pages.get(&page).map(Vec::as_slice)
    }

    /// Record a fetched page. Returns true if the page bound grew.
    pub fn record(&mut self, requested: u32, listing: ListingPage) -> bool {
        self.visited.insert(requested);
        self.visited.insert(listing.current_page);
        let grew = listing.max_page_known > self.max_page_known;
        self.max_page_known = self
            .max_page_known
            .max(listing.max_page_known)
            .max(listing.current_page);
        self.pages.insert(listing.current_page, listing.chapters);
        grew
    }

    /// Look the ordinal up across every cached page
    pub fn find(&self, ordinal: f64) -> Option<&ChapterRef> {
        find_by_ordinal(self.pages.values().flatten(), ordinal)
    }
}

/// Estimate which page of a newest-first listing holds `target`
///
/// ```
/// use chapterflow::resolver::estimate_page;
///
/// // 500 chapters, 50 per page: chapter 237 lives on page 6
/// assert_eq!(estimate_page(500.0, 237.0, 50, 10), 6);
/// // clamped to the known bound
/// assert_eq!(estimate_page(500.0, 1.0, 50, 4), 4);
/// ```
pub fn estimate_page(latest_ordinal: f64, target: f64, items_per_page: usize, max_page: u32) -> u32 {
    if items_per_page == 0 {
        return 1;
    }
    let offset = ((latest_ordinal - target) / items_per_page as f64).floor();
    let page = 1.0 + offset.max(0.0);
    (page.min(f64::from(max_page.max(1)))) as u32
}

/// Locates chapters by ordinal in flat or paginated listings
#[derive(Clone, Debug)]
pub struct PaginationResolver {
    max_traversal_attempts: u32,
}

impl Default for PaginationResolver {
    fn default() -> Self {
        Self::new(&ResolverConfig::default())
    }
}

impl PaginationResolver {
    /// Create a resolver from config
    pub fn new(config: &ResolverConfig) -> Self {
        Self {
            max_traversal_attempts: config.max_traversal_attempts,
        }
    }

    /// Find the chapter with `ordinal`.
    ///
    /// `Ok(None)` is the normal not-found outcome. Errors only surface when the source
    /// reports itself unavailable.
    pub async fn resolve(
        &self,
        source: &Source,
        series: &SeriesRef,
        ordinal: f64,
    ) -> Result<Option<ChapterRef>> {
        match source {
            Source::Flat(listing) => {
                let chapters = listing.list_chapters(series).await?;
                Ok(find_by_ordinal(&chapters, ordinal).cloned())
            }
            Source::Paginated(listing) => self.resolve_paginated(listing.as_ref(), series, ordinal).await,
        }
    }

    /// Find the chapter that follows `after` in reading order.
    ///
    /// Flat listings pick the smallest ordinal greater than `after`. Paginated listings
    /// resolve the next whole ordinal.
    pub async fn resolve_next(
        &self,
        source: &Source,
        series: &SeriesRef,
        after: f64,
    ) -> Result<Option<ChapterRef>> {
        match source {
            Source::Flat(listing) => next_in_flat(listing.as_ref(), series, after).await,
            Source::Paginated(listing) => {
                self.resolve_paginated(listing.as_ref(), series, after.floor() + 1.0)
                    .await
            }
        }
    }

    /// Estimation plus bounded traversal over a paginated listing
    pub async fn resolve_paginated(
        &self,
        listing: &dyn PaginatedListing,
        series: &SeriesRef,
        ordinal: f64,
    ) -> Result<Option<ChapterRef>> {
        let mut index = PaginatedIndex::new();

        // Page 1
        fetch_into(listing, series, 1, &mut index).await?;
        if let Some(found) = index.find(ordinal) {
            return Ok(Some(found.clone()));
        }

        let (latest_ordinal, items_per_page) = match index.page(1).and_then(|p| p.first().map(|c| (c.ordinal, p.len()))) {
            Some(observed) => observed,
            None => {
                tracing::debug!(series_id = %series.id, "First listing page is empty");
                return Ok(None);
            }
        };

        if ordinal > latest_ordinal && !same_ordinal(ordinal, latest_ordinal) {
            tracing::debug!(
                series_id = %series.id,
                ordinal,
                latest_ordinal,
                "Target is newer than the newest listed chapter"
            );
            return Ok(None);
        }

        if index.max_page_known() <= 1 {
            return Ok(None);
        }

        // Estimated page
        let estimated = estimate_page(latest_ordinal, ordinal, items_per_page, index.max_page_known());
        if !index.is_visited(estimated) {
            fetch_into(listing, series, estimated, &mut index).await?;
            if let Some(found) = index.find(ordinal) {
                log_resolved(series, ordinal, &index);
                return Ok(Some(found.clone()));
            }
        }

        // Last known page
        let last = index.max_page_known();
        if !index.is_visited(last) {
            fetch_into(listing, series, last, &mut index).await?;
            if let Some(found) = index.find(ordinal) {
                log_resolved(series, ordinal, &index);
                return Ok(Some(found.clone()));
            }
        }

        // Bounded traversal: follow the bound forward while it keeps growing
        let mut attempts = 0;
        while attempts < self.max_traversal_attempts {
            let next = index.max_page_known();
            if index.is_visited(next) {
                break;
            }
            attempts += 1;
            fetch_into(listing, series, next, &mut index).await?;
            if let Some(found) = index.find(ordinal) {
                log_resolved(series, ordinal, &index);
                return Ok(Some(found.clone()));
            }
        }

        tracing::info!(
            series_id = %series.id,
            ordinal,
            pages_fetched = index.fetch_count(),
            traversal_attempts = attempts,
            "Chapter not found in paginated listing"
        );
        Ok(None)
    }
}

async fn fetch_into(
    listing: &dyn PaginatedListing,
    series: &SeriesRef,
    page: u32,
    index: &mut PaginatedIndex,
) -> Result<()> {
    let fetched = listing.list_page(series, page).await?;
    let grew = index.record(page, fetched);
    tracing::debug!(
        series_id = %series.id,
        page,
        max_page_known = index.max_page_known(),
        bound_grew = grew,
        "Listing page cached"
    );
    Ok(())
}

fn log_resolved(series: &SeriesRef, ordinal: f64, index: &PaginatedIndex) {
    tracing::debug!(
        series_id = %series.id,
        ordinal,
        pages_fetched = index.fetch_count(),
        "Resolved chapter in paginated listing"
    );
}

async fn next_in_flat(
    listing: &dyn FlatListing,
    series: &SeriesRef,
    after: f64,
) -> Result<Option<ChapterRef>> {
    let mut chapters = listing.list_chapters(series).await?;
    sort_reading_order(&mut chapters);
    Ok(chapters
        .into_iter()
        .find(|c| c.ordinal > after && !same_ordinal(c.ordinal, after)))
}
