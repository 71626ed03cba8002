//! Reader session state machine.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::ProgressSink;
use super::surface::{ReadingSurface, ScrollAnchor};
use super::window::ReaderWindow;
use crate::config::ReaderConfig;
use crate::error::{Error, ReaderError, Result};
use crate::ordinal::sort_reading_order;
use crate::types::{
    ChapterContent, ChapterId, ChapterLocator, ChapterRef, LocalRef, PageLocator, Proposal,
};

/// Reader lifecycle state
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReaderState {
    /// Not opened yet
    Idle,
    /// Loading the requested chapter
    InitialLoad,
    /// Tracking position; no load in flight
    Steady,
    /// Loading the chapter before the window
    Prepending,
    /// Loading the chapter after the window
    Appending,
    /// Looking for the next chapter at the online source
    DiscoveringOnline,
    /// Closed; content released
    Closed,
}

/// Where a session should position itself once the initial chapter is loaded
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResumeTarget {
    /// Top of the chapter
    #[default]
    Start,
    /// A remembered page
    Page(u32),
    /// End of the chapter
    LastPage,
}

impl ResumeTarget {
    /// Target for a remembered page; page 0 is the start
    pub fn page(page: u32) -> Self {
        if page == 0 {
            ResumeTarget::Start
        } else {
            ResumeTarget::Page(page)
        }
    }
}

/// Where a fetched chapter goes in the window
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Placement {
    /// The chapter the session was opened on
    Initial,
    /// After the trailing chapter
    Append,
    /// Before the first chapter
    Prepend,
}

/// Work the session asks its driver to perform
#[derive(Clone, Debug, PartialEq)]
pub enum LoadJob {
    /// Resolve the pages of a known chapter
    Fetch {
        /// Chapter to load
        chapter: ChapterRef,
        /// Where it goes once loaded
        placement: Placement,
    },
    /// Look for the chapter after `after` at the online source
    Discover {
        /// Trailing known chapter
        after: ChapterRef,
    },
}

/// Result of a [`LoadJob`]
#[derive(Debug)]
pub enum LoadOutcome {
    /// A known chapter's pages were resolved
    Fetched {
        /// The chapter
        chapter: ChapterRef,
        /// Where it goes
        placement: Placement,
        /// Its pages
        pages: Vec<PageLocator>,
    },
    /// A new chapter was found online and its pages resolved
    Discovered {
        /// The new chapter, remote-only for now
        chapter: ChapterRef,
        /// Its pages
        pages: Vec<PageLocator>,
    },
    /// Discovery found nothing
    NotFound,
    /// The job failed
    Failed {
        /// The job that failed
        job: LoadJob,
        /// Why
        error: Error,
    },
}

/// One reading session over a series' known chapters
///
/// All window mutations and position decisions happen through `&mut self`, so the
/// owner serializes them. Proposals go to the [`ProgressSink`] as they arise.
pub struct ReaderSession {
    config: ReaderConfig,
    known: Vec<ChapterRef>,
    window: ReaderWindow,
    state: ReaderState,
    origin: Option<ChapterId>,
    active: Option<ChapterId>,
    position: Option<(ChapterId, u32)>,
    completed: HashSet<ChapterId>,
    failed: HashSet<ChapterId>,
    discovery_attempted: bool,
    online: bool,
    requested_resume: ResumeTarget,
    pending_resume: Option<ResumeTarget>,
    sink: Arc<dyn ProgressSink>,
}

impl std::fmt::Debug for ReaderSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReaderSession")
            .field("state", &self.state)
            .field("window", &self.window.ids())
            .field("active", &self.active)
            .field("position", &self.position)
            .finish_non_exhaustive()
    }
}

impl ReaderSession {
    /// New session over `chapters` (sorted into reading order)
    pub fn new(config: ReaderConfig, mut chapters: Vec<ChapterRef>, sink: Arc<dyn ProgressSink>) -> Self {
        sort_reading_order(&mut chapters);
        Self {
            window: ReaderWindow::new(config.window_max),
            config,
            known: chapters,
            state: ReaderState::Idle,
            origin: None,
            active: None,
            position: None,
            completed: HashSet::new(),
            failed: HashSet::new(),
            discovery_attempted: false,
            online: false,
            requested_resume: ResumeTarget::Start,
            pending_resume: None,
            sink,
        }
    }

    /// Allow discovery past the last known chapter
    pub fn set_online(&mut self, online: bool) {
        self.online = online;
    }

    /// Current state
    pub fn state(&self) -> ReaderState {
        self.state
    }

    /// Whether a load is in flight
    pub fn is_loading(&self) -> bool {
        matches!(
            self.state,
            ReaderState::InitialLoad
                | ReaderState::Appending
                | ReaderState::Prepending
                | ReaderState::DiscoveringOnline
        )
    }

    /// Whether scroll tracking is suspended until the remembered page renders
    pub fn is_resuming(&self) -> bool {
        self.pending_resume.is_some()
    }

    /// Loaded chapters
    pub fn window(&self) -> &ReaderWindow {
        &self.window
    }

    /// Chapter in view
    pub fn active_chapter(&self) -> Option<&ChapterId> {
        self.active.as_ref()
    }

    /// Last tracked (chapter, page)
    pub fn position(&self) -> Option<(&ChapterId, u32)> {
        self.position.as_ref().map(|(id, page)| (id, *page))
    }

    /// Known chapters in reading order
    pub fn known_chapters(&self) -> &[ChapterRef] {
        &self.known
    }

    /// Chapters completed during this session
    pub fn completed(&self) -> &HashSet<ChapterId> {
        &self.completed
    }

    /// Start the session on `chapter_id`.
    ///
    /// The id must be in the known chapter list.
    pub fn open(&mut self, chapter_id: &ChapterId, resume: ResumeTarget) -> Result<LoadJob> {
        if self.state != ReaderState::Idle {
            return Err(Error::ContractViolation(format!(
                "reader session already opened (state {:?})",
                self.state
            )));
        }
        let chapter = self.known_chapter(chapter_id).cloned().ok_or_else(|| {
            Error::ContractViolation(format!(
                "chapter {} is not in the known chapter list",
                chapter_id
            ))
        })?;

        tracing::info!(chapter_id = %chapter_id, resume = ?resume, "Opening reader");
        self.state = ReaderState::InitialLoad;
        self.origin = Some(chapter_id.clone());
        self.active = Some(chapter_id.clone());
        self.requested_resume = resume;
        Ok(LoadJob::Fetch {
            chapter,
            placement: Placement::Initial,
        })
    }

    /// React to a scroll position change.
    ///
    /// Emits at most one proposal and returns the next load to start, if any.
    pub fn on_scroll(&mut self, surface: &dyn ReadingSurface) -> Option<LoadJob> {
        if matches!(
            self.state,
            ReaderState::Idle | ReaderState::InitialLoad | ReaderState::Closed
        ) || self.is_resuming()
        {
            return None;
        }

        self.track_position(surface);

        if self.is_loading() {
            return None;
        }
        self.next_job(surface)
    }

    /// Apply a finished load.
    ///
    /// A failed or empty initial load is returned as an error and closes the session;
    /// later failures are logged and leave the window as it was.
    pub fn complete_load(&mut self, surface: &mut dyn ReadingSurface, outcome: LoadOutcome) -> Result<()> {
        if self.state == ReaderState::Closed {
            tracing::debug!("Load finished after close; discarding");
            return Ok(());
        }

        match outcome {
            LoadOutcome::Fetched {
                chapter,
                placement,
                pages,
            } => {
                if pages.is_empty() {
                    let error = Error::Reader(ReaderError::EmptyChapter(chapter.id.clone()));
                    return self.load_failed(LoadJob::Fetch { chapter, placement }, error);
                }
                let content = ChapterContent::loaded(chapter.id.clone(), pages);
                match placement {
                    Placement::Initial => self.place_initial(surface, content),
                    Placement::Append => self.append(surface, content),
                    Placement::Prepend => self.prepend(surface, content),
                }
                Ok(())
            }
            LoadOutcome::Discovered { chapter, pages } => {
                if pages.is_empty() {
                    tracing::debug!(chapter_id = %chapter.id, "Discovered chapter has no pages");
                    self.state = ReaderState::Steady;
                    return Ok(());
                }
                tracing::info!(
                    chapter_id = %chapter.id,
                    title = %chapter.title,
                    "Discovered next chapter online"
                );
                let content = ChapterContent::loaded(chapter.id.clone(), pages);
                self.learn_chapter(chapter);
                self.append(surface, content);
                Ok(())
            }
            LoadOutcome::NotFound => {
                tracing::debug!("No further chapter found online");
                self.state = ReaderState::Steady;
                Ok(())
            }
            LoadOutcome::Failed { job, error } => self.load_failed(job, error),
        }
    }

    /// Perform the corrective scroll once the remembered page has rendered.
    ///
    /// Returns true when no resume is pending afterwards.
    pub fn try_resume(&mut self, surface: &mut dyn ReadingSurface) -> bool {
        let Some(target) = self.pending_resume else {
            return true;
        };
        let Some(origin) = self.origin.clone() else {
            self.pending_resume = None;
            return true;
        };

        let pages = surface.page_extents(&origin);
        let offset = match target {
            ResumeTarget::Start => Some(0.0),
            ResumeTarget::Page(page) => pages.get(page as usize).map(|extent| extent.top),
            ResumeTarget::LastPage => {
                if pages.is_empty() {
                    None
                } else {
                    surface
                        .chapter_extent(&origin)
                        .map(|extent| (extent.bottom() - surface.viewport_height()).max(extent.top))
                }
            }
        };

        match offset {
            Some(offset) => {
                surface.set_scroll_offset(offset);
                self.pending_resume = None;
                tracing::debug!(chapter_id = %origin, target = ?target, offset, "Resumed reading position");
                true
            }
            None => false,
        }
    }

    /// Stop waiting for the remembered page and resume normal tracking
    pub fn abandon_resume(&mut self) {
        if let Some(target) = self.pending_resume.take() {
            tracing::warn!(target = ?target, "Remembered page did not render in time");
        }
    }

    /// Point a known chapter at its local archive
    pub fn rebind_local(&mut self, chapter_id: &ChapterId, local_ref: LocalRef) {
        if let Some(chapter) = self.known.iter_mut().find(|c| &c.id == chapter_id) {
            chapter.locator = ChapterLocator::local(local_ref);
        }
    }

    /// Release all content. Further signals are ignored.
    pub fn close(&mut self, surface: &mut dyn ReadingSurface) {
        if self.state == ReaderState::Closed {
            return;
        }
        tracing::info!(
            active = ?self.active,
            completed = self.completed.len(),
            "Closing reader"
        );
        self.state = ReaderState::Closed;
        self.window.clear();
        self.pending_resume = None;
        surface.render(&[]);
    }

    fn known_index(&self, chapter_id: &ChapterId) -> Option<usize> {
        self.known.iter().position(|c| &c.id == chapter_id)
    }

    fn known_chapter(&self, chapter_id: &ChapterId) -> Option<&ChapterRef> {
        self.known.iter().find(|c| &c.id == chapter_id)
    }

    fn known_after(&self, chapter_id: &ChapterId) -> Option<&ChapterRef> {
        self.known_index(chapter_id)
            .and_then(|i| self.known.get(i + 1))
    }

    fn known_before(&self, chapter_id: &ChapterId) -> Option<&ChapterRef> {
        self.known_index(chapter_id)
            .and_then(|i| i.checked_sub(1))
            .and_then(|i| self.known.get(i))
    }

    fn learn_chapter(&mut self, chapter: ChapterRef) {
        if self.known_index(&chapter.id).is_none() {
            self.known.push(chapter);
            sort_reading_order(&mut self.known);
        }
    }

    /// Centered chapter and page for the current viewport
    fn centered(&self, surface: &dyn ReadingSurface) -> Option<(ChapterId, u32)> {
        let top = surface.scroll_offset();
        let bottom = top + surface.viewport_height();
        let center = (top + bottom) / 2.0;

        let extents: Vec<_> = self
            .window
            .chapters()
            .iter()
            .filter_map(|c| surface.chapter_extent(&c.chapter_id).map(|e| (&c.chapter_id, e)))
            .collect();

        let chapter_id = extents
            .iter()
            .find(|(_, extent)| extent.contains(center))
            .or_else(|| {
                extents
                    .iter()
                    .filter(|(_, extent)| extent.overlap(top, bottom) > 0.0)
                    .max_by(|a, b| a.1.overlap(top, bottom).total_cmp(&b.1.overlap(top, bottom)))
            })
            .map(|(id, _)| (*id).clone())?;

        let page = surface
            .page_extents(&chapter_id)
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| {
                (a.center() - center)
                    .abs()
                    .total_cmp(&(b.center() - center).abs())
            })
            .map(|(i, _)| i as u32)
            .unwrap_or(0);

        Some((chapter_id, page))
    }

    fn track_position(&mut self, surface: &dyn ReadingSurface) {
        let Some((chapter_id, page)) = self.centered(surface) else {
            return;
        };
        if self
            .position
            .as_ref()
            .is_some_and(|(id, p)| id == &chapter_id && *p == page)
        {
            return;
        }

        if self.active.as_ref() != Some(&chapter_id) {
            tracing::debug!(from = ?self.active, to = %chapter_id, "Active chapter changed");
            self.active = Some(chapter_id.clone());
            self.discovery_attempted = false;
            self.failed.clear();
        }
        self.position = Some((chapter_id.clone(), page));

        let last_page = self.window.get(&chapter_id).and_then(ChapterContent::last_page);
        let proposal = if last_page == Some(page) && self.completed.insert(chapter_id.clone()) {
            let (current_chapter_id, page) = match self.known_after(&chapter_id) {
                Some(next) => (next.id.clone(), 0),
                None => (chapter_id.clone(), page),
            };
            tracing::info!(chapter_id = %chapter_id, "Chapter completed");
            Proposal::Completion {
                completed_id: chapter_id,
                current_chapter_id,
                page,
            }
        } else {
            Proposal::Progress { chapter_id, page }
        };
        self.sink.propose(proposal);
    }

    fn next_job(&mut self, surface: &dyn ReadingSurface) -> Option<LoadJob> {
        let top = surface.scroll_offset();
        let bottom = top + surface.viewport_height();

        if let Some(last) = self.window.last()
            && let Some(extent) = surface.chapter_extent(&last.chapter_id)
            && extent.height > 0.0
            && (bottom - extent.top) / extent.height >= self.config.append_threshold
        {
            let last_id = last.chapter_id.clone();
            match self.known_after(&last_id) {
                Some(next) if !self.window.contains(&next.id) && !self.failed.contains(&next.id) => {
                    let chapter = next.clone();
                    tracing::debug!(chapter_id = %chapter.id, "Appending chapter");
                    self.state = ReaderState::Appending;
                    return Some(LoadJob::Fetch {
                        chapter,
                        placement: Placement::Append,
                    });
                }
                Some(_) => {}
                None if self.online && !self.discovery_attempted => {
                    if let Some(after) = self.known_chapter(&last_id).cloned() {
                        tracing::debug!(after = %after.id, "Reached the end of known chapters");
                        self.discovery_attempted = true;
                        self.state = ReaderState::DiscoveringOnline;
                        return Some(LoadJob::Discover { after });
                    }
                }
                None => {}
            }
        }

        if top <= self.config.prepend_threshold_px
            && let Some(first) = self.window.first()
            && let Some(previous) = self.known_before(&first.chapter_id)
            && !self.window.contains(&previous.id)
            && !self.failed.contains(&previous.id)
        {
            let chapter = previous.clone();
            tracing::debug!(chapter_id = %chapter.id, "Prepending chapter");
            self.state = ReaderState::Prepending;
            return Some(LoadJob::Fetch {
                chapter,
                placement: Placement::Prepend,
            });
        }

        None
    }

    fn place_initial(&mut self, surface: &mut dyn ReadingSurface, content: ChapterContent) {
        let active = self.active.clone();
        self.window.push_back(content, active.as_ref());
        surface.render(self.window.chapters());
        surface.set_scroll_offset(0.0);
        self.state = ReaderState::Steady;
        self.pending_resume = match self.requested_resume {
            ResumeTarget::Start => None,
            target => Some(target),
        };
    }

    fn append(&mut self, surface: &mut dyn ReadingSurface, content: ChapterContent) {
        let active = self.active.clone();
        let chapter_id = content.chapter_id.clone();
        let evicted = self.window.push_back(content, active.as_ref());

        // Heights come from the layout before the eviction is rendered
        let evicted_height: f64 = evicted
            .iter()
            .filter_map(|c| surface.chapter_extent(&c.chapter_id))
            .map(|extent| extent.height)
            .sum();

        let offset = surface.scroll_offset();
        surface.render(self.window.chapters());
        surface.set_scroll_offset(offset - evicted_height);
        self.state = ReaderState::Steady;

        tracing::debug!(
            chapter_id = %chapter_id,
            evicted = evicted.len(),
            window = self.window.len(),
            "Appended chapter"
        );
    }

    fn prepend(&mut self, surface: &mut dyn ReadingSurface, content: ChapterContent) {
        let active = self.active.clone();
        let chapter_id = content.chapter_id.clone();
        let anchor = self
            .window
            .first()
            .and_then(|first| ScrollAnchor::capture(surface, &first.chapter_id));

        let evicted = self.window.push_front(content, active.as_ref());
        surface.render(self.window.chapters());
        if let Some(anchor) = anchor {
            anchor.restore(surface);
        }
        self.state = ReaderState::Steady;

        tracing::debug!(
            chapter_id = %chapter_id,
            evicted = evicted.len(),
            window = self.window.len(),
            "Prepended chapter"
        );
    }

    fn load_failed(&mut self, job: LoadJob, error: Error) -> Result<()> {
        match job {
            LoadJob::Fetch {
                chapter,
                placement: Placement::Initial,
            } => {
                tracing::error!(chapter_id = %chapter.id, error = %error, "Failed to load chapter");
                self.state = ReaderState::Closed;
                Err(error)
            }
            LoadJob::Fetch { chapter, placement } => {
                tracing::warn!(
                    chapter_id = %chapter.id,
                    placement = ?placement,
                    error = %error,
                    "Failed to load adjacent chapter"
                );
                self.failed.insert(chapter.id);
                self.state = ReaderState::Steady;
                Ok(())
            }
            LoadJob::Discover { after } => {
                tracing::warn!(after = %after.id, error = %error, "Online discovery failed");
                self.state = ReaderState::Steady;
                Ok(())
            }
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
