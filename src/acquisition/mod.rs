//! Bounded-concurrency acquisition pipeline.
//!
//! Chapters are submitted FIFO. At most `max_concurrent_downloads` tasks execute at once;
//! each resolves its pages, fetches them in fixed-size concurrent batches, packs one CBZ
//! archive, and writes it to the [`ArchiveLibrary`]. Any page failure aborts the task and
//! nothing is persisted. Retrying is the caller's decision.
//!
//! Submodules:
//! - [`archive`] - Archive assembly, naming, and the local content library
//! - [`fetcher`] - Page fetching seam
//! - `task` - Execution of a single task

mod archive;
mod fetcher;
mod task;


pub use archive::{
    ArchiveLibrary, archive_file_name, entry_name, natural_cmp, pack_cbz, page_extension,
    sanitize_title,
};
pub use fetcher::{HttpPageFetcher, PageFetcher};

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{Mutex, Notify, Semaphore, broadcast};
use tokio_util::sync::CancellationToken;

use crate::config::AcquisitionConfig;
use crate::error::{DownloadError, Error, Result};
use crate::source::Source;
use crate::types::{
    ChapterKey, ChapterRef, DownloadTask, Event, LocalRef, PipelineSnapshot, TaskState,
};

use task::TaskContext;

/// Capacity of the event broadcast channel
const EVENT_CHANNEL_CAPACITY: usize = 1000;

/// A chapter to acquire
#[derive(Clone, Debug)]
pub struct AcquisitionRequest {
    /// Chapter to download
    pub chapter: ChapterRef,
    /// Origin to resolve and fetch its pages from
    pub source: Source,
    /// Series title used for archive naming
    pub target_title: String,
}

impl AcquisitionRequest {
    /// Build a request
    pub fn new(chapter: ChapterRef, source: Source, target_title: impl Into<String>) -> Self {
        Self {
            chapter,
            source,
            target_title: target_title.into(),
        }
    }

    /// Identity of the requested chapter
    pub fn key(&self) -> ChapterKey {
        ChapterKey {
            source: self.source.kind(),
            chapter_id: self.chapter.id.clone(),
        }
    }
}

pub(crate) struct QueuedTask {
    pub(crate) task: DownloadTask,
    pub(crate) source: Source,
}

/// Queued and active task sets, guarded together as one critical section
#[derive(Default)]
pub(crate) struct TaskSets {
    pub(crate) queued: VecDeque<QueuedTask>,
    pub(crate) active: Vec<DownloadTask>,
}

impl TaskSets {
    fn contains(&self, key: &ChapterKey) -> bool {
        self.queued.iter().any(|q| &q.task.key == key) || self.active.iter().any(|t| &t.key == key)
    }

    fn state_of(&self, key: &ChapterKey) -> Option<TaskState> {
        if self.active.iter().any(|t| &t.key == key) {
            Some(TaskState::Active)
        } else if self.queued.iter().any(|q| &q.task.key == key) {
            Some(TaskState::Queued)
        } else {
            None
        }
    }
}

/// Queue state shared between the pipeline handle, the processor, and running tasks
#[derive(Clone)]
pub(crate) struct QueueState {
    pub(crate) tasks: Arc<Mutex<TaskSets>>,
    /// Limits concurrently executing tasks
    pub(crate) concurrent_limit: Arc<Semaphore>,
    /// Wakes the processor when work is submitted
    pub(crate) queue_notify: Arc<Notify>,
    /// Set to false during shutdown
    pub(crate) accepting_new: Arc<AtomicBool>,
    /// Stops the queue processor
    pub(crate) shutdown_token: CancellationToken,
}

/// Handle to the acquisition pipeline (cloneable - all fields are Arc-wrapped)
#[derive(Clone)]
pub struct AcquisitionPipeline {
    pub(crate) queue_state: QueueState,
    pub(crate) event_tx: broadcast::Sender<Event>,
    pub(crate) config: Arc<AcquisitionConfig>,
    pub(crate) fetcher: Arc<dyn PageFetcher>,
    pub(crate) library: ArchiveLibrary,
}

impl AcquisitionPipeline {
    /// Create the pipeline and start its queue processor.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(
        config: AcquisitionConfig,
        fetcher: Arc<dyn PageFetcher>,
        library: ArchiveLibrary,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let queue_state = QueueState {
            tasks: Arc::new(Mutex::new(TaskSets::default())),
            concurrent_limit: Arc::new(Semaphore::new(config.max_concurrent_downloads)),
            queue_notify: Arc::new(Notify::new()),
            accepting_new: Arc::new(AtomicBool::new(true)),
            shutdown_token: CancellationToken::new(),
        };

        let pipeline = Self {
            queue_state,
            event_tx,
            config: Arc::new(config),
            fetcher,
            library,
        };
        pipeline.start_queue_processor();
        pipeline
    }

    /// Subscribe to pipeline events
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// The archive library tasks write into
    pub fn library(&self) -> &ArchiveLibrary {
        &self.library
    }

    /// Enqueue a chapter.
    ///
    /// Returns `Ok(false)` when the chapter is already queued or active.
    pub async fn submit(&self, request: AcquisitionRequest) -> Result<bool> {
        if !self.queue_state.accepting_new.load(Ordering::SeqCst) {
            return Err(Error::ShuttingDown);
        }

        let key = request.key();
        let title = request.chapter.title.clone();
        {
            let mut tasks = self.queue_state.tasks.lock().await;
            if tasks.contains(&key) {
                tracing::debug!(key = %key, "Chapter already queued or active");
                return Ok(false);
            }
            tasks.queued.push_back(QueuedTask {
                task: DownloadTask {
                    key: key.clone(),
                    source_kind: request.source.kind(),
                    chapter: request.chapter,
                    target_title: request.target_title,
                    progress: 0.0,
                },
                source: request.source,
            });
        }

        tracing::info!(key = %key, "Chapter queued for download");
        self.emit_event(Event::Queued { key, title });
        self.queue_state.queue_notify.notify_one();
        Ok(true)
    }

    /// Submit a chapter and wait until its archive is written.
    ///
    /// If the chapter is already in flight, waits for that task instead.
    pub async fn persist(&self, request: AcquisitionRequest) -> Result<LocalRef> {
        let key = request.key();
        let mut events = self.subscribe();
        self.submit(request).await?;

        loop {
            match events.recv().await {
                Ok(Event::Complete { key: k, local_ref }) if k == key => return Ok(local_ref),
                Ok(Event::Failed { key: k, error }) if k == key => {
                    return Err(DownloadError::TaskFailed { key, reason: error }.into());
                }
                Ok(Event::Removed { key: k }) if k == key => {
                    return Err(Error::Download(DownloadError::PersistFailed {
                        path: self.library.root().to_path_buf(),
                        reason: format!("{} was removed from the queue", key),
                    }));
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(key = %key, skipped, "Pipeline event receiver lagged");
                    if self.state_of(&key).await.is_none() {
                        return Err(DownloadError::TaskFailed {
                            key,
                            reason: "outcome lost after missing events".to_string(),
                        }
                        .into());
                    }
                }
                Err(broadcast::error::RecvError::Closed) => return Err(Error::ShuttingDown),
            }
        }
    }

    /// Remove a queued task. Active tasks run to completion.
    ///
    /// Returns true if the task was queued and has been removed.
    pub async fn cancel(&self, key: &ChapterKey) -> bool {
        let removed = {
            let mut tasks = self.queue_state.tasks.lock().await;
            let before = tasks.queued.len();
            tasks.queued.retain(|q| &q.task.key != key);
            tasks.queued.len() < before
        };

        if removed {
            tracing::info!(key = %key, "Queued download removed");
            self.emit_event(Event::Removed { key: key.clone() });
        }
        removed
    }

    /// Whether a chapter is queued, active, or neither
    pub async fn state_of(&self, key: &ChapterKey) -> Option<TaskState> {
        self.queue_state.tasks.lock().await.state_of(key)
    }

    /// Point-in-time copy of the queued and active task sets
    pub async fn snapshot(&self) -> PipelineSnapshot {
        let tasks = self.queue_state.tasks.lock().await;
        PipelineSnapshot {
            queued: tasks.queued.iter().map(|q| q.task.clone()).collect(),
            active: tasks.active.clone(),
        }
    }

    /// Stop accepting work, drop queued tasks, and wait for active tasks to finish
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down acquisition pipeline");
        self.queue_state.accepting_new.store(false, Ordering::SeqCst);
        self.queue_state.shutdown_token.cancel();

        let dropped: Vec<ChapterKey> = {
            let mut tasks = self.queue_state.tasks.lock().await;
            tasks.queued.drain(..).map(|q| q.task.key).collect()
        };
        for key in dropped {
            self.emit_event(Event::Removed { key });
        }

        let permits = self.config.max_concurrent_downloads as u32;
        match self.queue_state.concurrent_limit.acquire_many(permits).await {
            Ok(_all) => tracing::info!("All active downloads finished"),
            Err(_) => tracing::debug!("Concurrency limiter already closed"),
        }
        self.queue_state.concurrent_limit.close();
    }

    fn emit_event(&self, event: Event) {
        self.event_tx.send(event).ok();
    }

    /// Start the queue processor task
    ///
    /// Loops until shutdown:
    /// 1. Acquires a permit from the concurrency limiter
    /// 2. Moves the oldest queued task into the active set (one critical section)
    /// 3. Spawns the task, which holds the permit until it finishes
    fn start_queue_processor(&self) -> tokio::task::JoinHandle<()> {
        let queue_state = self.queue_state.clone();
        let pipeline = self.clone();

        tokio::spawn(async move {
            let shutdown = queue_state.shutdown_token.clone();
            loop {
                let permit = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    permit = queue_state.concurrent_limit.clone().acquire_owned() => match permit {
                        Ok(p) => p,
                        Err(_) => break,
                    },
                };

                let next = loop {
                    let popped = {
                        let mut tasks = queue_state.tasks.lock().await;
                        let popped = tasks.queued.pop_front();
                        if let Some(queued) = &popped {
                            tasks.active.push(queued.task.clone());
                        }
                        popped
                    };
                    if popped.is_some() {
                        break popped;
                    }
                    tokio::select! {
                        _ = shutdown.cancelled() => break None,
                        _ = queue_state.queue_notify.notified() => {}
                    }
                };

                let Some(queued) = next else {
                    break;
                };

                let ctx = TaskContext {
                    task: queued.task,
                    source: queued.source,
                    fetcher: Arc::clone(&pipeline.fetcher),
                    library: pipeline.library.clone(),
                    event_tx: pipeline.event_tx.clone(),
                    tasks: Arc::clone(&queue_state.tasks),
                    page_batch_size: pipeline.config.page_batch_size,
                };

                tokio::spawn(async move {
                    let _permit = permit;
                    task::run_download_task(ctx).await;
                });
            }
            tracing::debug!("Queue processor stopped");
        })
    }
}
