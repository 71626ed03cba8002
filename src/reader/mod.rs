//! Windowed continuous reader
//!
//! The reader keeps a bounded window of loaded chapters on a vertically scrolling
//! surface. [`ReaderSession`] is the synchronous state machine: it turns scroll
//! positions into progress proposals and load jobs, and applies load outcomes to the
//! window while keeping the visible frame still. [`ReaderDriver`] runs a session on a
//! single sequential signal loop and executes its load jobs as background tasks.
//!
//! ## Submodules
//!
//! - [`window`] - Bounded chapter window with eviction
//! - [`surface`] - Layout oracle trait, scroll anchors, and a headless surface
//! - [`session`] - Reader state machine
//! - [`driver`] - Async signal loop, online discovery, and background archival

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{LocalRef, PageLocator, Proposal};

mod driver;
mod session;
mod surface;
mod window;

pub use driver::{ReaderDriver, ReaderHandle, ReaderSignal, ReaderView};
pub use session::{LoadJob, LoadOutcome, Placement, ReaderSession, ReaderState, ResumeTarget};
pub use surface::{Extent, ReadingSurface, ScrollAnchor, StackedSurface};
pub use window::ReaderWindow;

/// Resolves a locally archived chapter to its pages
#[async_trait]
pub trait ContentResolver: Send + Sync {
    /// Pages of the archive in reading order
    async fn chapter_pages(&self, local_ref: &LocalRef) -> Result<Vec<PageLocator>>;
}

/// Receives the reader's proposals; the implementor owns durable state
pub trait ProgressSink: Send + Sync {
    /// Hand one proposal over. Must not block.
    fn propose(&self, proposal: Proposal);
}
