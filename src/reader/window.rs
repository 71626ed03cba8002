//! Bounded window of loaded chapters.

use crate::types::{ChapterContent, ChapterId};

/// Loaded chapters in reading order, at most `max` once settled
///
/// Inserting at one end evicts from the other end, except that the active chapter is
/// never evicted. A window may therefore hold one chapter too many until the active
/// chapter moves.
#[derive(Clone, Debug)]
pub struct ReaderWindow {
    chapters: Vec<ChapterContent>,
    max: usize,
}

impl ReaderWindow {
    /// Empty window holding at most `max` chapters
    pub fn new(max: usize) -> Self {
        Self {
            chapters: Vec::with_capacity(max + 1),
            max,
        }
    }

    /// Settled capacity
    pub fn max(&self) -> usize {
        self.max
    }

    /// Number of loaded chapters
    pub fn len(&self) -> usize {
        self.chapters.len()
    }

    /// True if nothing is loaded
    pub fn is_empty(&self) -> bool {
        self.chapters.is_empty()
    }

    /// Loaded chapters in reading order
    pub fn chapters(&self) -> &[ChapterContent] {
        &self.chapters
    }

    /// Ids of loaded chapters in reading order
    pub fn ids(&self) -> Vec<ChapterId> {
        self.chapters.iter().map(|c| c.chapter_id.clone()).collect()
    }

    /// Whether `id` is loaded
    pub fn contains(&self, id: &ChapterId) -> bool {
        self.chapters.iter().any(|c| &c.chapter_id == id)
    }

    /// Content of a loaded chapter
    pub fn get(&self, id: &ChapterId) -> Option<&ChapterContent> {
        self.chapters.iter().find(|c| &c.chapter_id == id)
    }

    /// First loaded chapter
    pub fn first(&self) -> Option<&ChapterContent> {
        self.chapters.first()
    }

    /// Trailing loaded chapter
    pub fn last(&self) -> Option<&ChapterContent> {
        self.chapters.last()
    }

    /// Append a chapter, evicting from the front. Returns evicted chapters.
    pub fn push_back(
        &mut self,
        content: ChapterContent,
        active: Option<&ChapterId>,
    ) -> Vec<ChapterContent> {
        if self.contains(&content.chapter_id) {
            tracing::debug!(chapter_id = %content.chapter_id, "Chapter already in window");
            return Vec::new();
        }
        self.chapters.push(content);

        let mut evicted = Vec::new();
        while self.chapters.len() > self.max {
            if active.is_some_and(|id| self.chapters[0].chapter_id == *id) {
                break;
            }
            evicted.push(self.chapters.remove(0));
        }
        evicted
    }

    /// Prepend a chapter, evicting from the back. Returns evicted chapters.
    pub fn push_front(
        &mut self,
        content: ChapterContent,
        active: Option<&ChapterId>,
    ) -> Vec<ChapterContent> {
        if self.contains(&content.chapter_id) {
            tracing::debug!(chapter_id = %content.chapter_id, "Chapter already in window");
            return Vec::new();
        }
        self.chapters.insert(0, content);

        let mut evicted = Vec::new();
        while self.chapters.len() > self.max {
            let Some(back) = self.chapters.last() else {
                break;
            };
            if active.is_some_and(|id| back.chapter_id == *id) {
                break;
            }
            if let Some(content) = self.chapters.pop() {
                evicted.push(content);
            }
        }
        evicted
    }

    /// Release every loaded chapter
    pub fn clear(&mut self) {
        self.chapters.clear();
    }
}
