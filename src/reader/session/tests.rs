use super::*;
use crate::reader::surface::StackedSurface;
use std::sync::Mutex;

#[derive(Default)]
struct RecordingSink(Mutex<Vec<Proposal>>);

impl RecordingSink {
    fn take(&self) -> Vec<Proposal> {
        std::mem::take(&mut *self.0.lock().unwrap())
    }
}

impl ProgressSink for RecordingSink {
    fn propose(&self, proposal: Proposal) {
        self.0.lock().unwrap().push(proposal);
    }
}

fn known(range: std::ops::RangeInclusive<u32>) -> Vec<ChapterRef> {
    range
        .map(|n| {
            ChapterRef::new(
                n.to_string(),
                format!("Chapter {n}"),
                ChapterLocator::remote(format!("https://w.example/ep/{n}")),
            )
        })
        .collect()
}

fn session(chapters: Vec<ChapterRef>) -> (ReaderSession, Arc<RecordingSink>) {
    let sink = Arc::new(RecordingSink::default());
    let session = ReaderSession::new(ReaderConfig::default(), chapters, sink.clone());
    (session, sink)
}

fn pages(id: &ChapterId, n: usize) -> Vec<PageLocator> {
    (0..n).map(|i| PageLocator::remote(format!("https://img.example/{id}/{i}.jpg"))).collect()
}

/// Complete a fetch job with `n` pages
fn fetched(job: LoadJob, n: usize) -> LoadOutcome {
    match job {
        LoadJob::Fetch { chapter, placement } => LoadOutcome::Fetched {
            pages: pages(&chapter.id, n),
            chapter,
            placement,
        },
        other => panic!("expected a fetch job, got {other:?}"),
    }
}

fn id(s: &str) -> ChapterId {
    ChapterId::from(s)
}

fn window_ids(session: &ReaderSession) -> Vec<String> {
    session.window().ids().into_iter().map(|id| id.0).collect()
}

fn viewport_offset(surface: &StackedSurface, chapter: &str) -> f64 {
    surface.chapter_extent(&id(chapter)).unwrap().top - surface.scroll_offset()
}

fn scroll(session: &mut ReaderSession, surface: &mut StackedSurface, offset: f64) -> Option<LoadJob> {
    surface.set_scroll_offset(offset);
    session.on_scroll(surface)
}

fn expect_fetch(job: Option<LoadJob>, chapter: &str, expected: Placement) -> LoadJob {
    match &job {
        Some(LoadJob::Fetch {
            chapter: c,
            placement,
        }) => {
            assert_eq!(c.id, id(chapter));
            assert_eq!(*placement, expected);
        }
        other => panic!("expected fetch of {chapter}, got {other:?}"),
    }
    job.unwrap()
}

#[test]
fn opening_an_unknown_chapter_is_a_contract_violation() {
    let (mut session, _sink) = session(known(1..=3));
    let err = session.open(&id("99"), ResumeTarget::Start).unwrap_err();
    assert!(matches!(err, Error::ContractViolation(_)));
    assert_eq!(session.state(), ReaderState::Idle);
}

#[test]
fn initial_load_failure_is_fatal() {
    let (mut session, _sink) = session(known(1..=3));
    let mut surface = StackedSurface::new(800.0, 100.0);
    let job = session.open(&id("2"), ResumeTarget::Start).unwrap();

    let outcome = LoadOutcome::Failed {
        job,
        error: Error::TransientFetch {
            locator: "https://w.example/ep/2".into(),
            reason: "connection reset".into(),
        },
    };
    assert!(session.complete_load(&mut surface, outcome).is_err());
    assert_eq!(session.state(), ReaderState::Closed);
}

#[test]
fn empty_initial_chapter_is_an_error() {
    let (mut session, _sink) = session(known(1..=3));
    let mut surface = StackedSurface::new(800.0, 100.0);
    let job = session.open(&id("2"), ResumeTarget::Start).unwrap();

    let err = session.complete_load(&mut surface, fetched(job, 0)).unwrap_err();
    assert!(matches!(err, Error::Reader(ReaderError::EmptyChapter(_))));
}

#[test]
fn progress_is_proposed_once_per_position_change() {
    let (mut session, sink) = session(known(1..=3));
    let mut surface = StackedSurface::new(200.0, 100.0);
    let job = session.open(&id("1"), ResumeTarget::Start).unwrap();
    session.complete_load(&mut surface, fetched(job, 10)).unwrap();
    assert_eq!(session.state(), ReaderState::Steady);

    for offset in [240.0, 250.0, 260.0, 400.0] {
        assert!(scroll(&mut session, &mut surface, offset).is_none());
    }

    assert_eq!(
        sink.take(),
        vec![
            Proposal::Progress {
                chapter_id: id("1"),
                page: 3
            },
            Proposal::Progress {
                chapter_id: id("1"),
                page: 4
            },
        ]
    );
}

#[test]
fn completion_is_proposed_once_per_session() {
    let (mut session, sink) = session(known(1..=3));
    let mut surface = StackedSurface::new(200.0, 100.0);
    let job = session.open(&id("1"), ResumeTarget::Start).unwrap();
    session.complete_load(&mut surface, fetched(job, 10)).unwrap();

    let job = scroll(&mut session, &mut surface, 760.0);
    let job = expect_fetch(job, "2", Placement::Append);
    session.complete_load(&mut surface, fetched(job, 10)).unwrap();
    sink.take();

    // Jitter around the last page of chapter 1
    for offset in [880.0, 760.0, 880.0, 760.0, 880.0] {
        assert!(scroll(&mut session, &mut surface, offset).is_none());
    }

    let proposals = sink.take();
    let completions: Vec<_> = proposals
        .iter()
        .filter(|p| matches!(p, Proposal::Completion { .. }))
        .collect();
    assert_eq!(
        completions,
        vec![&Proposal::Completion {
            completed_id: id("1"),
            current_chapter_id: id("2"),
            page: 0,
        }]
    );
    assert_eq!(proposals.len(), 5);
    assert!(session.completed().contains(&id("1")));
}

#[test]
fn completing_the_last_known_chapter_keeps_it_current() {
    let (mut session, sink) = session(known(1..=1));
    let mut surface = StackedSurface::new(100.0, 100.0);
    let job = session.open(&id("1"), ResumeTarget::Start).unwrap();
    session.complete_load(&mut surface, fetched(job, 3)).unwrap();

    scroll(&mut session, &mut surface, 200.0);
    assert_eq!(
        sink.take().last(),
        Some(&Proposal::Completion {
            completed_id: id("1"),
            current_chapter_id: id("1"),
            page: 2,
        })
    );
}

#[test]
fn no_new_load_starts_while_one_is_in_flight() {
    let (mut session, _sink) = session(known(1..=3));
    let mut surface = StackedSurface::new(800.0, 100.0);
    let job = session.open(&id("1"), ResumeTarget::Start).unwrap();
    session.complete_load(&mut surface, fetched(job, 10)).unwrap();

    let first = scroll(&mut session, &mut surface, 0.0);
    expect_fetch(first, "2", Placement::Append);
    assert!(session.is_loading());
    assert!(scroll(&mut session, &mut surface, 150.0).is_none());
    assert!(scroll(&mut session, &mut surface, 200.0).is_none());
}

#[test]
fn append_eviction_keeps_the_visible_frame_still() {
    let (mut session, _sink) = session(known(1..=6));
    let mut surface = StackedSurface::new(200.0, 100.0);
    let job = session.open(&id("1"), ResumeTarget::Start).unwrap();
    session.complete_load(&mut surface, fetched(job, 10)).unwrap();

    let job = expect_fetch(scroll(&mut session, &mut surface, 760.0), "2", Placement::Append);
    session.complete_load(&mut surface, fetched(job, 10)).unwrap();
    let job = expect_fetch(scroll(&mut session, &mut surface, 1760.0), "3", Placement::Append);
    session.complete_load(&mut surface, fetched(job, 10)).unwrap();
    assert_eq!(window_ids(&session), vec!["1", "2", "3"]);

    let job = expect_fetch(scroll(&mut session, &mut surface, 2760.0), "4", Placement::Append);
    let before = viewport_offset(&surface, "3");
    session.complete_load(&mut surface, fetched(job, 10)).unwrap();

    assert_eq!(window_ids(&session), vec!["2", "3", "4"]);
    assert_eq!(viewport_offset(&surface, "3"), before);
    assert_eq!(surface.scroll_offset(), 1760.0);
    assert_eq!(session.active_chapter(), Some(&id("3")));
}

#[test]
fn prepend_at_top_evicts_trailing_chapter_without_moving_the_view() {
    let (mut session, _sink) = session(known(10..=15));
    let mut surface = StackedSurface::new(800.0, 100.0);
    let job = session.open(&id("13"), ResumeTarget::Start).unwrap();
    session.complete_load(&mut surface, fetched(job, 10)).unwrap();

    let job = expect_fetch(scroll(&mut session, &mut surface, 0.0), "14", Placement::Append);
    session.complete_load(&mut surface, fetched(job, 10)).unwrap();

    let job = expect_fetch(session.on_scroll(&surface), "12", Placement::Prepend);
    session.complete_load(&mut surface, fetched(job, 1)).unwrap();
    assert_eq!(surface.scroll_offset(), 100.0);
    assert_eq!(window_ids(&session), vec!["12", "13", "14"]);
    assert_eq!(session.active_chapter(), Some(&id("13")));

    // Scrolled near the top with 13 still centered
    let job = expect_fetch(session.on_scroll(&surface), "11", Placement::Prepend);
    let before_13 = viewport_offset(&surface, "13");
    let before_12 = viewport_offset(&surface, "12");
    session.complete_load(&mut surface, fetched(job, 10)).unwrap();

    assert_eq!(window_ids(&session), vec!["11", "12", "13"]);
    assert_eq!(session.active_chapter(), Some(&id("13")));
    assert_eq!(viewport_offset(&surface, "13"), before_13);
    assert_eq!(viewport_offset(&surface, "12"), before_12);
}

#[test]
fn window_is_bounded_while_reading_straight_through() {
    let (mut session, _sink) = session(known(1..=12));
    let mut surface = StackedSurface::new(300.0, 100.0);
    let job = session.open(&id("1"), ResumeTarget::Start).unwrap();
    session.complete_load(&mut surface, fetched(job, 10)).unwrap();

    for _ in 0..200 {
        let next = surface.scroll_offset() + 120.0;
        if let Some(job) = scroll(&mut session, &mut surface, next) {
            session.complete_load(&mut surface, fetched(job, 10)).unwrap();
        }
        assert!(session.window().len() <= 3, "window {:?}", window_ids(&session));
        let active = session.active_chapter().unwrap();
        assert!(session.window().contains(active));
    }
    assert_eq!(session.active_chapter(), Some(&id("12")));
}

#[test]
fn discovery_is_attempted_once_per_chapter() {
    let (mut session, _sink) = session(known(1..=1));
    session.set_online(true);
    let mut surface = StackedSurface::new(800.0, 100.0);
    let job = session.open(&id("1"), ResumeTarget::Start).unwrap();
    session.complete_load(&mut surface, fetched(job, 10)).unwrap();

    let job = scroll(&mut session, &mut surface, 0.0);
    assert!(matches!(job, Some(LoadJob::Discover { ref after }) if after.id == id("1")));
    assert_eq!(session.state(), ReaderState::DiscoveringOnline);
    session.complete_load(&mut surface, LoadOutcome::NotFound).unwrap();

    for offset in [10.0, 150.0, 200.0, 120.0] {
        assert!(scroll(&mut session, &mut surface, offset).is_none());
    }
}

#[test]
fn discovered_chapter_is_spliced_in_and_becomes_known() {
    let (mut session, _sink) = session(known(1..=1));
    session.set_online(true);
    let mut surface = StackedSurface::new(800.0, 100.0);
    let job = session.open(&id("1"), ResumeTarget::Start).unwrap();
    session.complete_load(&mut surface, fetched(job, 10)).unwrap();
    scroll(&mut session, &mut surface, 0.0);

    let chapter = ChapterRef::new("2", "Chapter 2", ChapterLocator::remote("https://w.example/ep/2"));
    let outcome = LoadOutcome::Discovered {
        pages: pages(&chapter.id, 8),
        chapter,
    };
    session.complete_load(&mut surface, outcome).unwrap();

    assert_eq!(window_ids(&session), vec!["1", "2"]);
    assert_eq!(session.known_chapters().len(), 2);
    assert_eq!(session.state(), ReaderState::Steady);

    session.rebind_local(&id("2"), LocalRef("1_series_chapter_2.cbz".into()));
    assert_eq!(
        session.known_chapters()[1].locator,
        ChapterLocator::local(LocalRef("1_series_chapter_2.cbz".into()))
    );
}

#[test]
fn failed_adjacent_load_is_not_retried_until_the_chapter_changes() {
    let (mut session, _sink) = session(known(1..=2));
    let mut surface = StackedSurface::new(800.0, 100.0);
    let job = session.open(&id("1"), ResumeTarget::Start).unwrap();
    session.complete_load(&mut surface, fetched(job, 10)).unwrap();

    let job = expect_fetch(scroll(&mut session, &mut surface, 0.0), "2", Placement::Append);
    let outcome = LoadOutcome::Failed {
        job,
        error: Error::NotFound("episode 2".into()),
    };
    session.complete_load(&mut surface, outcome).unwrap();
    assert_eq!(session.state(), ReaderState::Steady);
    assert_eq!(window_ids(&session), vec!["1"]);

    assert!(scroll(&mut session, &mut surface, 150.0).is_none());
}

#[test]
fn resume_suppresses_tracking_until_the_page_renders() {
    let (mut session, sink) = session(known(1..=2));
    let mut surface = StackedSurface::new(300.0, 100.0);
    let job = session.open(&id("1"), ResumeTarget::page(5)).unwrap();
    session.complete_load(&mut surface, fetched(job, 10)).unwrap();

    assert!(session.is_resuming());
    assert!(session.on_scroll(&surface).is_none());
    assert!(sink.take().is_empty());

    assert!(session.try_resume(&mut surface));
    assert_eq!(surface.scroll_offset(), 500.0);
    assert!(!session.is_resuming());

    session.on_scroll(&surface);
    assert_eq!(sink.take().len(), 1);
}

#[test]
fn resume_to_last_page_scrolls_to_chapter_end() {
    let (mut session, _sink) = session(known(1..=2));
    let mut surface = StackedSurface::new(300.0, 100.0);
    let job = session.open(&id("1"), ResumeTarget::LastPage).unwrap();
    session.complete_load(&mut surface, fetched(job, 10)).unwrap();

    assert!(session.try_resume(&mut surface));
    assert_eq!(surface.scroll_offset(), 700.0);
}

#[test]
fn resume_waits_for_missing_page_until_abandoned() {
    let (mut session, _sink) = session(known(1..=2));
    let mut surface = StackedSurface::new(300.0, 100.0);
    let job = session.open(&id("1"), ResumeTarget::page(40)).unwrap();
    session.complete_load(&mut surface, fetched(job, 10)).unwrap();

    assert!(!session.try_resume(&mut surface));
    assert!(session.is_resuming());
    session.abandon_resume();
    assert!(!session.is_resuming());
    assert_eq!(surface.scroll_offset(), 0.0);
}

#[test]
fn close_releases_content_and_ignores_late_signals() {
    let (mut session, sink) = session(known(1..=3));
    let mut surface = StackedSurface::new(800.0, 100.0);
    let job = session.open(&id("1"), ResumeTarget::Start).unwrap();
    session.complete_load(&mut surface, fetched(job, 10)).unwrap();
    let pending = scroll(&mut session, &mut surface, 0.0).unwrap();
    sink.take();

    session.close(&mut surface);
    assert!(session.window().is_empty());
    assert!(surface.rendered_ids().is_empty());

    session.complete_load(&mut surface, fetched(pending, 10)).unwrap();
    assert!(session.window().is_empty());
    assert!(session.on_scroll(&surface).is_none());
    assert!(sink.take().is_empty());
}
