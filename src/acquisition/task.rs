//! Execution of a single acquisition task.
//!
//! Phases:
//! 1. Resolve the chapter's pages through its source
//! 2. Fetch pages in fixed-size concurrent batches (0% - 80%)
//! 3. Pack the archive (90%)
//! 4. Persist it to the library (100%)

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures::future::try_join_all;
use tokio::sync::{Mutex, broadcast};

use super::archive::{ArchiveLibrary, archive_file_name, entry_name, pack_cbz, page_extension};
use super::fetcher::PageFetcher;
use super::TaskSets;
use crate::error::{DownloadError, Error, Result};
use crate::source::Source;
use crate::types::{ChapterKey, DownloadTask, Event, LocalRef, PageLocator};

/// Share of progress covered by page fetching
const FETCH_PROGRESS_SHARE: f32 = 0.8;
/// Progress once the archive is assembled
const ASSEMBLED_PROGRESS: f32 = 0.9;

/// Shared context for a single task, reducing parameter passing between phases
pub(crate) struct TaskContext {
    pub(crate) task: DownloadTask,
    pub(crate) source: Source,
    pub(crate) fetcher: Arc<dyn PageFetcher>,
    pub(crate) library: ArchiveLibrary,
    pub(crate) event_tx: broadcast::Sender<Event>,
    pub(crate) tasks: Arc<Mutex<TaskSets>>,
    pub(crate) page_batch_size: usize,
}

impl TaskContext {
    fn key(&self) -> &ChapterKey {
        &self.task.key
    }

    fn emit(&self, event: Event) {
        self.event_tx.send(event).ok();
    }

    async fn set_progress(&self, progress: f32, pages_done: usize, pages_total: usize) {
        {
            let mut tasks = self.tasks.lock().await;
            if let Some(active) = tasks.active.iter_mut().find(|t| &t.key == self.key()) {
                active.progress = progress;
            }
        }
        self.emit(Event::Progress {
            key: self.key().clone(),
            progress,
            pages_done,
            pages_total,
        });
    }

    /// Remove this task from the active set.
    async fn remove_from_active(&self) {
        let mut tasks = self.tasks.lock().await;
        tasks.active.retain(|t| &t.key != self.key());
    }
}

/// Run one task to completion or failure; the outcome is reported through events.
pub(crate) async fn run_download_task(ctx: TaskContext) {
    let key = ctx.key().clone();
    tracing::info!(key = %key, title = %ctx.task.chapter.title, "Download started");
    ctx.emit(Event::Started { key: key.clone() });

    let outcome = execute(&ctx).await;
    ctx.remove_from_active().await;

    match outcome {
        Ok(local_ref) => {
            tracing::info!(key = %key, local_ref = %local_ref, "Download complete");
            ctx.emit(Event::Complete { key, local_ref });
        }
        Err(e) => {
            tracing::error!(key = %key, error = %e, "Download failed");
            ctx.emit(Event::Failed {
                key,
                error: e.to_string(),
            });
        }
    }
}

async fn execute(ctx: &TaskContext) -> Result<LocalRef> {
    let key = ctx.key();

    let pages = ctx.source.resolve_pages(&ctx.task.chapter).await?;
    if pages.is_empty() {
        return Err(DownloadError::NoPages { key: key.clone() }.into());
    }

    let fetched = fetch_pages(ctx, &pages).await?;

    ctx.emit(Event::Assembling { key: key.clone() });
    let archive = tokio::task::spawn_blocking(move || pack_cbz(&fetched))
        .await
        .map_err(|e| Error::Other(format!("archive assembly task failed: {}", e)))??;
    ctx.set_progress(ASSEMBLED_PROGRESS, pages.len(), pages.len()).await;

    ctx.emit(Event::Persisting { key: key.clone() });
    let file_name = archive_file_name(
        &ctx.task.target_title,
        &ctx.task.chapter.title,
        chrono::Utc::now().timestamp_millis(),
    );
    let local_ref = ctx.library.write_archive(&file_name, archive).await?;
    ctx.set_progress(1.0, pages.len(), pages.len()).await;

    Ok(local_ref)
}

/// Fetch every page, one concurrent batch at a time; the first failure aborts.
async fn fetch_pages(ctx: &TaskContext, pages: &[PageLocator]) -> Result<Vec<(String, Vec<u8>)>> {
    let total = pages.len();
    let completed = AtomicUsize::new(0);
    let profile = ctx.source.request_profile();
    let batch_size = ctx.page_batch_size.max(1);
    let mut fetched = Vec::with_capacity(total);

    for (batch_index, batch) in pages.chunks(batch_size).enumerate() {
        let offset = batch_index * batch_size;
        let batch_results = try_join_all(batch.iter().enumerate().map(|(i, page)| {
            let index = offset + i;
            let completed = &completed;
            async move {
                let bytes = ctx.fetcher.fetch_page(page, profile).await.map_err(|e| {
                    DownloadError::PageFetchFailed {
                        key: ctx.key().clone(),
                        index,
                        reason: e.to_string(),
                    }
                })?;
                let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                let progress = done as f32 / total as f32 * FETCH_PROGRESS_SHARE;
                ctx.set_progress(progress, done, total).await;
                Ok::<_, DownloadError>((entry_name(index, total, page_extension_of(page)), bytes))
            }
        }))
        .await?;

        fetched.extend(batch_results);
    }

    Ok(fetched)
}

fn page_extension_of(page: &PageLocator) -> &'static str {
    match page {
        PageLocator::Remote { url } => page_extension(url),
        PageLocator::Archived { entry, .. } => page_extension(entry),
    }
}
