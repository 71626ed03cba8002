//! # chapterflow
//!
//! Library for reading sequential image-based chapters from web sources as one
//! continuous, memory-bounded scroll, and archiving them locally in the background.
//!
//! ## Design Philosophy
//!
//! chapterflow is designed to be:
//! - **Bounded** - The reader keeps at most a few chapters in memory; downloads run
//!   under a fixed concurrency limit
//! - **Source-agnostic** - Every origin is a [`source::Source`] with either a flat or a
//!   paginated listing
//! - **Library-first** - No CLI or UI; the presentation layer implements
//!   [`reader::ReadingSurface`]
//! - **Event-driven** - Consumers subscribe to pipeline events, no polling required
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use chapterflow::{
//!     AcquisitionPipeline, ArchiveLibrary, Config, Database, HttpPageFetcher, ProposalWriter,
//!     ReaderDriver, ResumeTarget, StackedSurface,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!     config.validate()?;
//!
//!     let db = Arc::new(Database::new(&config.persistence.database_path).await?);
//!     let library = ArchiveLibrary::new(config.library_dir());
//!     let fetcher = Arc::new(HttpPageFetcher::new(&config.http, library.clone())?);
//!     let pipeline = AcquisitionPipeline::new(config.acquisition.clone(), fetcher, library.clone());
//!
//!     // Subscribe to download events
//!     let mut events = pipeline.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let chapters = db.list_chapters("my-series").await?;
//!     let progress = db.load_progress("my-series").await?;
//!     let (writer, _writer_task) = ProposalWriter::spawn(db.clone(), "my-series");
//!
//!     if let Some(chapter_id) = progress.last_chapter_id {
//!         let handle = ReaderDriver::new(
//!             config.reader.clone(),
//!             chapters,
//!             StackedSurface::new(800.0, 1200.0),
//!             Arc::new(library),
//!             Arc::new(writer),
//!         )
//!         .with_pipeline(pipeline.clone())
//!         .open(&chapter_id, ResumeTarget::page(progress.last_page))?;
//!
//!         handle.scroll_to(600.0)?;
//!         handle.close().await?;
//!     }
//!
//!     pipeline.shutdown().await;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Bounded-concurrency chapter downloads and the archive library
pub mod acquisition;
/// Configuration types
pub mod config;
/// Database persistence layer
pub mod db;
/// Error types
pub mod error;
/// Chapter ordinals and reading order
pub mod ordinal;
/// Windowed continuous reader
pub mod reader;
/// Locating chapters in paginated listings
pub mod resolver;
/// Retry logic with exponential backoff
pub mod retry;
/// Source adapters
pub mod source;
/// Core types and events
pub mod types;

// Re-export commonly used types
pub use acquisition::{
    AcquisitionPipeline, AcquisitionRequest, ArchiveLibrary, HttpPageFetcher, PageFetcher,
};
pub use config::Config;
pub use db::{Database, ProposalWriter};
pub use error::{DatabaseError, DownloadError, Error, ReaderError, Result};
pub use reader::{
    ContentResolver, ProgressSink, ReaderDriver, ReaderHandle, ReaderSession, ReadingSurface,
    ResumeTarget, StackedSurface,
};
pub use resolver::PaginationResolver;
pub use source::{MangaDexSource, Source, SourceAdapter, SourceBinding, WebtoonSource};
pub use types::{
    ChapterContent, ChapterId, ChapterKey, ChapterLocator, ChapterRef, Event, LocalRef,
    PageLocator, Proposal, ReadingProgress, SeriesRef,
};
