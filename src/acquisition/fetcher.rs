//! Page fetching: the seam between the pipeline and the network.

use async_trait::async_trait;

use super::archive::ArchiveLibrary;
use crate::config::HttpConfig;
use crate::error::Result;
use crate::source::{RequestProfile, SourceHttp};
use crate::types::PageLocator;

/// Abstraction over page image retrieval, enabling testability.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Fetch one page's bytes using the origin's identification headers
    async fn fetch_page(&self, page: &PageLocator, profile: &RequestProfile) -> Result<Vec<u8>>;
}

/// Production [`PageFetcher`]: remote pages over HTTP, archived pages from the library
#[derive(Clone, Debug)]
pub struct HttpPageFetcher {
    http: SourceHttp,
    library: ArchiveLibrary,
}

impl HttpPageFetcher {
    /// Create a fetcher sharing the pipeline's archive library
    pub fn new(config: &HttpConfig, library: ArchiveLibrary) -> Result<Self> {
        Ok(Self {
            http: SourceHttp::new(config, "pages")?,
            library,
        })
    }
}

#[async_trait]
impl PageFetcher for HttpPageFetcher {
    async fn fetch_page(&self, page: &PageLocator, profile: &RequestProfile) -> Result<Vec<u8>> {
        match page {
            PageLocator::Remote { url } => self.http.get_bytes(url, profile).await,
            PageLocator::Archived { local_ref, entry } => {
                self.library.read_page(local_ref, entry).await
            }
        }
    }
}
