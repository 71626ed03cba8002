//! Async driver: one sequential signal loop per reading session.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::session::{LoadJob, LoadOutcome, ReaderSession, ReaderState, ResumeTarget};
use super::surface::ReadingSurface;
use super::{ContentResolver, ProgressSink};
use crate::acquisition::{AcquisitionPipeline, AcquisitionRequest};
use crate::config::ReaderConfig;
use crate::error::{Error, ReaderError, Result};
use crate::resolver::PaginationResolver;
use crate::source::SourceBinding;
use crate::types::{ChapterId, ChapterLocator, ChapterRef, LocalRef, PageLocator, Proposal};

/// Input to the reader loop
#[derive(Debug)]
pub enum ReaderSignal {
    /// The presentation layer scrolled to `offset`
    Scrolled {
        /// New offset at the top of the viewport
        offset: f64,
    },
    /// A load job finished
    LoadFinished(LoadOutcome),
    /// A discovered chapter has been archived locally
    ArchiveReady {
        /// The chapter
        chapter_id: ChapterId,
        /// Its archive
        local_ref: LocalRef,
    },
    /// Time to check on a pending resume
    ResumeTick,
    /// Stop the session
    Close,
}

/// Snapshot of the session published after every signal
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReaderView {
    /// Lifecycle state
    pub state: ReaderState,
    /// Loaded chapters in reading order
    pub window: Vec<ChapterId>,
    /// Chapter in view
    pub active: Option<ChapterId>,
    /// Tracked position
    pub position: Option<(ChapterId, u32)>,
    /// Scroll offset after the last mutation
    pub scroll_offset: f64,
    /// Whether the remembered page is still being waited for
    pub resuming: bool,
    /// Known chapters that have no local archive yet
    pub remote_only: Vec<ChapterId>,
}

impl ReaderView {
    fn of(session: &ReaderSession, surface: &dyn ReadingSurface) -> Self {
        Self {
            state: session.state(),
            window: session.window().ids(),
            active: session.active_chapter().cloned(),
            position: session.position().map(|(id, page)| (id.clone(), page)),
            scroll_offset: surface.scroll_offset(),
            resuming: session.is_resuming(),
            remote_only: session
                .known_chapters()
                .iter()
                .filter(|c| matches!(c.locator, ChapterLocator::Remote { .. }))
                .map(|c| c.id.clone())
                .collect(),
        }
    }
}

/// Handle to a running reader
///
/// Dropping the handle without closing stops the loop once in-flight loads settle.
pub struct ReaderHandle {
    signals: mpsc::UnboundedSender<ReaderSignal>,
    view: watch::Receiver<ReaderView>,
    task: JoinHandle<Result<()>>,
}

impl ReaderHandle {
    /// Report a scroll position
    pub fn scroll_to(&self, offset: f64) -> Result<()> {
        self.signals
            .send(ReaderSignal::Scrolled { offset })
            .map_err(|_| Error::Reader(ReaderError::Closed))
    }

    /// Latest published view
    pub fn view(&self) -> ReaderView {
        self.view.borrow().clone()
    }

    /// Wait until the published view satisfies `predicate`
    pub async fn wait_for(&mut self, predicate: impl Fn(&ReaderView) -> bool) -> Result<ReaderView> {
        loop {
            {
                let view = self.view.borrow_and_update();
                if predicate(&view) {
                    return Ok(view.clone());
                }
            }
            self.view
                .changed()
                .await
                .map_err(|_| Error::Reader(ReaderError::Closed))?;
        }
    }

    /// Close the session and wait for the loop to finish.
    ///
    /// Returns the loop's error if the initial load failed.
    pub async fn close(self) -> Result<()> {
        self.signals.send(ReaderSignal::Close).ok();
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(Error::Other(format!("reader task failed: {}", e))),
        }
    }
}

/// Builds and runs a reading session
pub struct ReaderDriver<S> {
    config: ReaderConfig,
    chapters: Vec<ChapterRef>,
    surface: S,
    content: Arc<dyn ContentResolver>,
    sink: Arc<dyn ProgressSink>,
    online: Option<Online>,
    pipeline: Option<AcquisitionPipeline>,
}

#[derive(Clone)]
struct Online {
    binding: SourceBinding,
    resolver: Arc<PaginationResolver>,
}

impl<S: ReadingSurface + 'static> ReaderDriver<S> {
    /// Driver over a series' known chapters
    pub fn new(
        config: ReaderConfig,
        chapters: Vec<ChapterRef>,
        surface: S,
        content: Arc<dyn ContentResolver>,
        sink: Arc<dyn ProgressSink>,
    ) -> Self {
        Self {
            config,
            chapters,
            surface,
            content,
            sink,
            online: None,
            pipeline: None,
        }
    }

    /// Bind the series to an online source so the reader can discover new chapters
    pub fn with_source(mut self, binding: SourceBinding, resolver: Arc<PaginationResolver>) -> Self {
        self.online = Some(Online { binding, resolver });
        self
    }

    /// Archive discovered chapters in the background
    pub fn with_pipeline(mut self, pipeline: AcquisitionPipeline) -> Self {
        self.pipeline = Some(pipeline);
        self
    }

    /// Open the session on `chapter_id` and start the loop.
    ///
    /// Fails immediately if the chapter is not in the known list.
    pub fn open(self, chapter_id: &ChapterId, resume: ResumeTarget) -> Result<ReaderHandle> {
        let mut session = ReaderSession::new(self.config.clone(), self.chapters, self.sink.clone());
        session.set_online(self.online.is_some());
        let first_job = session.open(chapter_id, resume)?;

        let (tx, rx) = mpsc::unbounded_channel();
        let (view_tx, view_rx) = watch::channel(ReaderView::of(&session, &self.surface));

        let event_loop = EventLoop {
            session,
            surface: self.surface,
            content: self.content,
            sink: self.sink,
            online: self.online,
            pipeline: self.pipeline,
            signals: tx.downgrade(),
            view: view_tx,
            resume_ticker: None,
            resume_deadline: None,
            config: self.config,
        };
        let task = tokio::spawn(event_loop.run(rx, first_job));

        Ok(ReaderHandle {
            signals: tx,
            view: view_rx,
            task,
        })
    }
}

struct EventLoop<S> {
    session: ReaderSession,
    surface: S,
    content: Arc<dyn ContentResolver>,
    sink: Arc<dyn ProgressSink>,
    online: Option<Online>,
    pipeline: Option<AcquisitionPipeline>,
    signals: mpsc::WeakUnboundedSender<ReaderSignal>,
    view: watch::Sender<ReaderView>,
    resume_ticker: Option<CancellationToken>,
    resume_deadline: Option<Instant>,
    config: ReaderConfig,
}

impl<S: ReadingSurface + 'static> EventLoop<S> {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<ReaderSignal>, first_job: LoadJob) -> Result<()> {
        self.dispatch(first_job);

        let result = loop {
            let Some(signal) = rx.recv().await else {
                tracing::debug!("Reader handle dropped");
                break Ok(());
            };

            match signal {
                ReaderSignal::Scrolled { offset } => {
                    self.surface.set_scroll_offset(offset);
                    self.track();
                }
                ReaderSignal::LoadFinished(outcome) => {
                    let discovered = match &outcome {
                        LoadOutcome::Discovered { chapter, pages } if !pages.is_empty() => {
                            Some(chapter.clone())
                        }
                        _ => None,
                    };
                    let initial = self.session.state() == ReaderState::InitialLoad;

                    if let Err(e) = self.session.complete_load(&mut self.surface, outcome) {
                        self.publish();
                        break Err(e);
                    }
                    if let Some(chapter) = discovered {
                        self.persist_in_background(chapter);
                    }
                    if initial && !self.session.try_resume(&mut self.surface) {
                        self.start_resume_ticker();
                    }
                    self.track();
                }
                ReaderSignal::ArchiveReady {
                    chapter_id,
                    local_ref,
                } => {
                    tracing::debug!(chapter_id = %chapter_id, local_ref = %local_ref, "Chapter archived");
                    self.session.rebind_local(&chapter_id, local_ref);
                }
                ReaderSignal::ResumeTick => self.resume_tick(),
                ReaderSignal::Close => {
                    self.session.close(&mut self.surface);
                    self.publish();
                    break Ok(());
                }
            }
            self.publish();
        };

        self.stop_resume_ticker();
        result
    }

    /// Run position tracking and start whatever load it asks for
    fn track(&mut self) {
        if let Some(job) = self.session.on_scroll(&self.surface) {
            self.dispatch(job);
        }
    }

    fn publish(&self) {
        self.view
            .send_replace(ReaderView::of(&self.session, &self.surface));
    }

    fn dispatch(&self, job: LoadJob) {
        let Some(tx) = self.signals.upgrade() else {
            return;
        };
        let content = self.content.clone();
        let online = self.online.clone();

        tokio::spawn(async move {
            let outcome = execute(job, content.as_ref(), online.as_ref()).await;
            tx.send(ReaderSignal::LoadFinished(outcome)).ok();
        });
    }

    /// Fire-and-forget archival of a chapter found online
    fn persist_in_background(&self, chapter: ChapterRef) {
        let (Some(pipeline), Some(online)) = (self.pipeline.clone(), self.online.as_ref()) else {
            tracing::debug!(chapter_id = %chapter.id, "No pipeline; chapter stays remote-only");
            return;
        };
        let request = AcquisitionRequest::new(
            chapter.clone(),
            online.binding.source.clone(),
            online.binding.series.title.clone(),
        );
        let sink = self.sink.clone();
        let signals = self.signals.clone();

        tokio::spawn(async move {
            match pipeline.persist(request).await {
                Ok(local_ref) => {
                    sink.propose(Proposal::NewChapter {
                        id: chapter.id.clone(),
                        title: chapter.title.clone(),
                        ordinal: chapter.ordinal,
                        local_ref: local_ref.clone(),
                    });
                    if let Some(tx) = signals.upgrade() {
                        tx.send(ReaderSignal::ArchiveReady {
                            chapter_id: chapter.id,
                            local_ref,
                        })
                        .ok();
                    }
                }
                Err(e) => {
                    let deferred = Error::PersistenceDeferred {
                        chapter_id: chapter.id,
                        reason: e.to_string(),
                    };
                    tracing::warn!(error = %deferred, "Chapter stays remote-only");
                }
            }
        });
    }

    fn start_resume_ticker(&mut self) {
        let Some(tx) = self.signals.upgrade() else {
            return;
        };
        let token = CancellationToken::new();
        let child = token.clone();
        let interval = self.config.resume_poll_interval;

        self.resume_deadline = Some(Instant::now() + self.config.resume_timeout);
        self.resume_ticker = Some(token);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = child.cancelled() => break,
                    _ = ticker.tick() => {
                        if tx.send(ReaderSignal::ResumeTick).is_err() {
                            break;
                        }
                    }
                }
            }
        });
    }

    fn stop_resume_ticker(&mut self) {
        if let Some(token) = self.resume_ticker.take() {
            token.cancel();
        }
        self.resume_deadline = None;
    }

    fn resume_tick(&mut self) {
        if !self.session.is_resuming() {
            self.stop_resume_ticker();
            return;
        }
        if self.session.try_resume(&mut self.surface) {
            self.stop_resume_ticker();
            self.track();
        } else if self.resume_deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            self.session.abandon_resume();
            self.stop_resume_ticker();
            self.track();
        }
    }
}

/// Resolve a load job against the content resolver or the online source
async fn execute(job: LoadJob, content: &dyn ContentResolver, online: Option<&Online>) -> LoadOutcome {
    match &job {
        LoadJob::Fetch { chapter, placement } => match fetch_pages(chapter, content, online).await {
            Ok(pages) => LoadOutcome::Fetched {
                chapter: chapter.clone(),
                placement: *placement,
                pages,
            },
            Err(error) => LoadOutcome::Failed {
                job: job.clone(),
                error,
            },
        },
        LoadJob::Discover { after } => {
            let Some(online) = online else {
                return LoadOutcome::NotFound;
            };
            let source = &online.binding.source;
            let found = online
                .resolver
                .resolve_next(source, &online.binding.series, after.ordinal)
                .await;
            match found {
                Ok(Some(chapter)) => match source.resolve_pages(&chapter).await {
                    Ok(pages) if !pages.is_empty() => LoadOutcome::Discovered { chapter, pages },
                    Ok(_) => LoadOutcome::NotFound,
                    Err(error) => LoadOutcome::Failed {
                        job: job.clone(),
                        error,
                    },
                },
                Ok(None) => LoadOutcome::NotFound,
                Err(error) => LoadOutcome::Failed {
                    job: job.clone(),
                    error,
                },
            }
        }
    }
}

async fn fetch_pages(
    chapter: &ChapterRef,
    content: &dyn ContentResolver,
    online: Option<&Online>,
) -> Result<Vec<PageLocator>> {
    match &chapter.locator {
        ChapterLocator::Local { local_ref } => content.chapter_pages(local_ref).await,
        ChapterLocator::Remote { .. } => match online {
            Some(online) => online.binding.source.resolve_pages(chapter).await,
            None => Err(Error::ContractViolation(format!(
                "chapter {} is remote-only but the series has no online source",
                chapter.id
            ))),
        },
    }
}
