//! Layout oracle for the reader, scroll anchors, and a headless stacked surface.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::types::{ChapterContent, ChapterId};

/// Vertical extent of a rendered element, in content coordinates
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Extent {
    /// Offset of the element's top edge from the top of the content
    pub top: f64,
    /// Rendered height
    pub height: f64,
}

impl Extent {
    /// Create an extent
    pub fn new(top: f64, height: f64) -> Self {
        Self { top, height }
    }

    /// Offset of the bottom edge
    pub fn bottom(&self) -> f64 {
        self.top + self.height
    }

    /// Vertical midpoint
    pub fn center(&self) -> f64 {
        self.top + self.height / 2.0
    }

    /// Whether `y` lies within the extent (top inclusive, bottom exclusive)
    pub fn contains(&self, y: f64) -> bool {
        y >= self.top && y < self.bottom()
    }

    /// Length of the overlap with `[top, bottom)`
    pub fn overlap(&self, top: f64, bottom: f64) -> f64 {
        (self.bottom().min(bottom) - self.top.max(top)).max(0.0)
    }
}

/// What the reader needs to know about the rendered content
///
/// Implemented by the presentation layer. Chapters render stacked vertically in window
/// order; every coordinate is measured from the top of the content.
pub trait ReadingSurface: Send {
    /// Height of the visible viewport
    fn viewport_height(&self) -> f64;

    /// Content offset at the top of the viewport
    fn scroll_offset(&self) -> f64;

    /// Scroll so that `offset` is at the top of the viewport
    fn set_scroll_offset(&mut self, offset: f64);

    /// Lay out the window's chapters. Does not adjust the scroll offset.
    fn render(&mut self, chapters: &[ChapterContent]);

    /// Extent of a rendered chapter
    fn chapter_extent(&self, chapter_id: &ChapterId) -> Option<Extent>;

    /// Extents of a rendered chapter's page elements, in page order
    ///
    /// Pages that have not rendered yet are absent from the tail.
    fn page_extents(&self, chapter_id: &ChapterId) -> Vec<Extent>;
}

/// Element position saved across a structural mutation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScrollAnchor {
    /// Anchored chapter
    pub chapter_id: ChapterId,
    /// Distance from the top of the viewport to the chapter's top edge
    pub offset_from_viewport_top: f64,
}

impl ScrollAnchor {
    /// Record where `chapter_id` currently sits in the viewport
    pub fn capture(surface: &dyn ReadingSurface, chapter_id: &ChapterId) -> Option<Self> {
        let extent = surface.chapter_extent(chapter_id)?;
        Some(Self {
            chapter_id: chapter_id.clone(),
            offset_from_viewport_top: extent.top - surface.scroll_offset(),
        })
    }

    /// Scroll so the anchored chapter is back at its recorded viewport offset.
    ///
    /// Consumes the anchor. Returns the scroll delta applied, or `None` if the chapter
    /// is no longer rendered.
    pub fn restore(self, surface: &mut dyn ReadingSurface) -> Option<f64> {
        let extent = surface.chapter_extent(&self.chapter_id)?;
        let before = surface.scroll_offset();
        surface.set_scroll_offset(extent.top - self.offset_from_viewport_top);
        Some(surface.scroll_offset() - before)
    }
}

/// Headless surface laying pages out as a plain vertical stack
///
/// Every page has a fixed height unless overridden per chapter. Scrolling is clamped
/// to the content.
#[derive(Clone, Debug)]
pub struct StackedSurface {
    viewport_height: f64,
    scroll_offset: f64,
    default_page_height: f64,
    page_heights: HashMap<ChapterId, Vec<f64>>,
    layout: Vec<RenderedChapter>,
}

#[derive(Clone, Debug)]
struct RenderedChapter {
    chapter_id: ChapterId,
    extent: Extent,
    pages: Vec<Extent>,
}

impl StackedSurface {
    /// Surface with the given viewport height and uniform page height
    pub fn new(viewport_height: f64, default_page_height: f64) -> Self {
        Self {
            viewport_height,
            scroll_offset: 0.0,
            default_page_height,
            page_heights: HashMap::new(),
            layout: Vec::new(),
        }
    }

    /// Override the page heights of one chapter
    pub fn with_page_heights(mut self, chapter_id: impl Into<ChapterId>, heights: Vec<f64>) -> Self {
        self.page_heights.insert(chapter_id.into(), heights);
        self
    }

    /// Total rendered height
    pub fn content_height(&self) -> f64 {
        self.layout.last().map(|c| c.extent.bottom()).unwrap_or(0.0)
    }

    /// Largest valid scroll offset
    pub fn max_scroll(&self) -> f64 {
        (self.content_height() - self.viewport_height).max(0.0)
    }

    /// Rendered chapters in layout order
    pub fn rendered_ids(&self) -> Vec<ChapterId> {
        self.layout.iter().map(|c| c.chapter_id.clone()).collect()
    }

    fn page_height(&self, chapter_id: &ChapterId, index: usize) -> f64 {
        self.page_heights
            .get(chapter_id)
            .and_then(|heights| heights.get(index))
            .copied()
            .unwrap_or(self.default_page_height)
    }

    fn rendered(&self, chapter_id: &ChapterId) -> Option<&RenderedChapter> {
        self.layout.iter().find(|c| &c.chapter_id == chapter_id)
    }
}

impl ReadingSurface for StackedSurface {
    fn viewport_height(&self) -> f64 {
        self.viewport_height
    }

    fn scroll_offset(&self) -> f64 {
        self.scroll_offset
    }

    fn set_scroll_offset(&mut self, offset: f64) {
        self.scroll_offset = offset.clamp(0.0, self.max_scroll());
    }

    fn render(&mut self, chapters: &[ChapterContent]) {
        let mut top = 0.0;
        let mut layout = Vec::with_capacity(chapters.len());
        for chapter in chapters {
            let chapter_top = top;
            let pages: Vec<Extent> = (0..chapter.pages.len())
                .map(|i| {
                    let extent = Extent::new(top, self.page_height(&chapter.chapter_id, i));
                    top = extent.bottom();
                    extent
                })
                .collect();
            layout.push(RenderedChapter {
                chapter_id: chapter.chapter_id.clone(),
                extent: Extent::new(chapter_top, top - chapter_top),
                pages,
            });
        }
        self.layout = layout;
    }

    fn chapter_extent(&self, chapter_id: &ChapterId) -> Option<Extent> {
        self.rendered(chapter_id).map(|c| c.extent)
    }

    fn page_extents(&self, chapter_id: &ChapterId) -> Vec<Extent> {
        self.rendered(chapter_id)
            .map(|c| c.pages.clone())
            .unwrap_or_default()
    }
}
