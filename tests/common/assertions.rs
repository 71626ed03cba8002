//! Custom test assertions for integration tests

use std::future::Future;
use std::path::Path;
use std::time::Duration;
use chapterflow::{AcquisitionPipeline, ChapterKey, Event};

/// Result of waiting for a task to finish
#[derive(Debug)]
pub enum WaitResult {
    /// Archive written
    Completed(chapterflow::LocalRef),
    /// Task failed with error
    Failed(String),
    /// Timeout waiting for completion
    Timeout,
    /// Channel closed unexpectedly
    ChannelClosed,
}

/// Wait for a task to reach a terminal state (Complete or Failed)
pub async fn wait_for_completion(
    pipeline: &AcquisitionPipeline,
    key: &ChapterKey,
    timeout: Duration,
) -> WaitResult {
    let mut events = pipeline.subscribe();

    let result = tokio::time::timeout(timeout, async {
        loop {
            match events.recv().await {
                Ok(Event::Complete { key: k, local_ref }) if &k == key => {
                    return WaitResult::Completed(local_ref);
                }
                Ok(Event::Failed { key: k, error }) if &k == key => {
                    return WaitResult::Failed(error);
                }
                Ok(_) => continue,
                Err(_) => return WaitResult::ChannelClosed,
            }
        }
    })
    .await;

    result.unwrap_or(WaitResult::Timeout)
}

/// Collect events until `stop` matches one (inclusive) or the timeout elapses
pub async fn collect_events_until<F>(
    events: &mut tokio::sync::broadcast::Receiver<Event>,
    timeout: Duration,
    stop: F,
) -> Vec<Event>
where
    F: Fn(&Event) -> bool,
{
    let mut collected = Vec::new();
    let _ = tokio::time::timeout(timeout, async {
        while let Ok(event) = events.recv().await {
            let done = stop(&event);
            collected.push(event);
            if done {
                break;
            }
        }
    })
    .await;
    collected
}

/// Poll `check` until it returns true or the timeout elapses
pub async fn eventually<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Archive files (complete or partial) in the library directory
pub fn archive_files(dir: &Path) -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut names: Vec<String> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}
