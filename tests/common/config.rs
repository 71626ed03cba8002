//! Test configuration helpers for building an isolated chapterflow stack

use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use chapterflow::config::{AcquisitionConfig, HttpConfig, PersistenceConfig, RetryConfig};
use chapterflow::{AcquisitionPipeline, ArchiveLibrary, Config, Database, HttpPageFetcher};

/// Configuration rooted in `temp_dir` with fast retries and short resume polling
pub fn test_config(temp_dir: &TempDir) -> Config {
    let mut config = Config {
        acquisition: AcquisitionConfig {
            library_dir: temp_dir.path().join("library"),
            ..Default::default()
        },
        http: HttpConfig {
            timeout: Duration::from_secs(5),
            retry: RetryConfig {
                max_attempts: 1,
                initial_delay: Duration::from_millis(10),
                max_delay: Duration::from_millis(50),
                jitter: false,
                ..Default::default()
            },
            ..Default::default()
        },
        persistence: PersistenceConfig {
            database_path: temp_dir.path().join("chapterflow.db"),
        },
        ..Default::default()
    };
    config.reader.resume_poll_interval = Duration::from_millis(10);
    config.reader.resume_timeout = Duration::from_millis(500);
    config
}

/// Everything a test needs: database, archive library, and an HTTP-backed pipeline
pub struct TestStack {
    /// Configuration the stack was built from
    pub config: Config,
    /// Library database
    pub db: Arc<Database>,
    /// Archive library
    pub library: ArchiveLibrary,
    /// Acquisition pipeline fetching pages over HTTP
    pub pipeline: AcquisitionPipeline,
    /// Keeps the temporary directory alive
    pub temp_dir: TempDir,
}

/// Build a stack in a fresh temporary directory
pub async fn create_test_stack() -> TestStack {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let config = test_config(&temp_dir);

    let db = Arc::new(
        Database::new(&config.persistence.database_path)
            .await
            .expect("Failed to open database"),
    );
    let library = ArchiveLibrary::new(config.library_dir());
    let fetcher = Arc::new(
        HttpPageFetcher::new(&config.http, library.clone()).expect("Failed to build fetcher"),
    );
    let pipeline = AcquisitionPipeline::new(config.acquisition.clone(), fetcher, library.clone());

    TestStack {
        config,
        db,
        library,
        pipeline,
        temp_dir,
    }
}
