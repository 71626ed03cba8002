//! MangaDex adapter: flat chapter listing over the public JSON API.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;

use super::{FlatListing, RequestProfile, SourceAdapter, SourceHttp};
use crate::config::HttpConfig;
use crate::error::{Error, Result};
use crate::ordinal::sort_reading_order;
use crate::types::{ChapterLocator, ChapterRef, PageLocator, SeriesRef, SourceKind};

const DEFAULT_API_URL: &str = "https://api.mangadex.org";
const FEED_PAGE_SIZE: u32 = 100;
const SEARCH_LIMIT: &str = "10";

#[derive(Debug, Deserialize)]
struct Collection<T> {
    data: Vec<T>,
    #[serde(default)]
    total: u32,
}

#[derive(Debug, Deserialize)]
struct MangaData {
    id: String,
    attributes: MangaAttributes,
}

#[derive(Debug, Deserialize)]
struct MangaAttributes {
    #[serde(default)]
    title: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct ChapterData {
    id: String,
    attributes: ChapterAttributes,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChapterAttributes {
    chapter: Option<String>,
    title: Option<String>,
    external_url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AtHomeServer {
    base_url: String,
    chapter: AtHomeChapter,
}

#[derive(Debug, Deserialize)]
struct AtHomeChapter {
    hash: String,
    data: Vec<String>,
}

/// MangaDex source adapter
#[derive(Debug)]
pub struct MangaDexSource {
    http: SourceHttp,
    api_url: String,
    profile: RequestProfile,
}

impl MangaDexSource {
    /// Adapter for the public API
    pub fn new(config: &HttpConfig) -> Result<Self> {
        Self::with_api_url(config, DEFAULT_API_URL)
    }

    /// Adapter against a different API root (tests)
    pub fn with_api_url(config: &HttpConfig, api_url: impl Into<String>) -> Result<Self> {
        Ok(Self {
            http: SourceHttp::new(config, "mangadex")?,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            profile: RequestProfile::default().user_agent(config.user_agent.clone()),
        })
    }

    async fn fetch_feed(&self, series: &SeriesRef) -> Result<Vec<ChapterData>> {
        let url = format!("{}/manga/{}/feed", self.api_url, series.id);
        let limit = FEED_PAGE_SIZE.to_string();
        let mut chapters = Vec::new();
        let mut offset = 0u32;

        loop {
            let offset_param = offset.to_string();
            let query = [
                ("translatedLanguage[]", "en"),
                ("order[chapter]", "asc"),
                ("limit", limit.as_str()),
                ("offset", offset_param.as_str()),
            ];
            let batch: Collection<ChapterData> =
                self.http.get_json(&url, &query, &self.profile).await?;
            let received = batch.data.len() as u32;
            chapters.extend(batch.data);
            offset += FEED_PAGE_SIZE;

            tracing::debug!(
                series_id = %series.id,
                fetched = chapters.len(),
                total = batch.total,
                "Fetched MangaDex feed batch"
            );

            if received == 0 || offset >= batch.total {
                return Ok(chapters);
            }
        }
    }
}

fn pick_title(titles: &HashMap<String, String>) -> String {
    titles
        .get("en")
        .or_else(|| titles.values().next())
        .cloned()
        .unwrap_or_else(|| "Untitled".to_string())
}

fn chapter_ref(data: ChapterData) -> ChapterRef {
    let number = data.attributes.chapter.as_deref().map(str::trim);
    let title = match (number, data.attributes.title.as_deref()) {
        (Some(n), Some(t)) if !t.trim().is_empty() => format!("Chapter {}: {}", n, t.trim()),
        (Some(n), _) => format!("Chapter {}", n),
        (None, Some(t)) => t.trim().to_string(),
        (None, None) => "Oneshot".to_string(),
    };
    let chapter = ChapterRef::new(data.id.clone(), title, ChapterLocator::remote(data.id));
    match number.and_then(|n| n.parse::<f64>().ok()) {
        Some(ordinal) => chapter.with_ordinal(ordinal),
        None => chapter,
    }
}

#[async_trait]
impl SourceAdapter for MangaDexSource {
    fn kind(&self) -> SourceKind {
        SourceKind::new("mangadex")
    }

    fn request_profile(&self) -> &RequestProfile {
        &self.profile
    }

    async fn search(&self, query: &str) -> Vec<SeriesRef> {
        let url = format!("{}/manga", self.api_url);
        let params = [
            ("title", query),
            ("limit", SEARCH_LIMIT),
            ("order[relevance]", "desc"),
        ];
        match self
            .http
            .get_json::<Collection<MangaData>>(&url, &params, &self.profile)
            .await
        {
            Ok(results) => results
                .data
                .into_iter()
                .map(|manga| SeriesRef {
                    title: pick_title(&manga.attributes.title),
                    url: Some(format!("https://mangadex.org/title/{}", manga.id)),
                    id: manga.id,
                    cover_url: None,
                })
                .collect(),
            Err(e) => {
                tracing::warn!(query, error = %e, "MangaDex search failed");
                Vec::new()
            }
        }
    }

    async fn resolve_pages(&self, chapter: &ChapterRef) -> Result<Vec<PageLocator>> {
        let chapter_id = match &chapter.locator {
            ChapterLocator::Remote { url } => url,
            ChapterLocator::Local { local_ref } => {
                return Err(Error::ContractViolation(format!(
                    "chapter {} is archived as {}; resolve it locally",
                    chapter.id, local_ref
                )));
            }
        };

        let url = format!("{}/at-home/server/{}", self.api_url, chapter_id);
        match self
            .http
            .get_json::<AtHomeServer>(&url, &[], &self.profile)
            .await
        {
            Ok(server) => Ok(server
                .chapter
                .data
                .iter()
                .map(|file| {
                    PageLocator::remote(format!(
                        "{}/data/{}/{}",
                        server.base_url, server.chapter.hash, file
                    ))
                })
                .collect()),
            Err(e @ Error::SourceUnavailable { .. }) => Err(e),
            Err(e) => {
                tracing::warn!(chapter_id = %chapter.id, error = %e, "Failed to resolve MangaDex pages");
                Ok(Vec::new())
            }
        }
    }
}

#[async_trait]
impl FlatListing for MangaDexSource {
    async fn list_chapters(&self, series: &SeriesRef) -> Result<Vec<ChapterRef>> {
        match self.fetch_feed(series).await {
            Ok(feed) => {
                let mut chapters: Vec<ChapterRef> = feed
                    .into_iter()
                    .filter(|c| c.attributes.external_url.is_none())
                    .map(chapter_ref)
                    .collect();
                sort_reading_order(&mut chapters);
                Ok(chapters)
            }
            Err(e @ Error::SourceUnavailable { .. }) => Err(e),
            Err(e) => {
                // A partial feed would hide chapters; report nothing instead
                tracing::warn!(series_id = %series.id, error = %e, "MangaDex feed fetch failed");
                Ok(Vec::new())
            }
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn source(server: &MockServer) -> MangaDexSource {
        MangaDexSource::with_api_url(&HttpConfig::default(), server.uri()).unwrap()
    }

    fn feed_entry(id: &str, chapter: &str) -> serde_json::Value {
        json!({
            "id": id,
            "attributes": { "chapter": chapter, "title": null, "externalUrl": null }
        })
    }

    #[tokio::test]
    async fn feed_batches_are_merged_and_sorted() {
        let server = MockServer::start().await;
        let first: Vec<_> = (0..100)
            .map(|i| feed_entry(&format!("c{}", 150 - i), &(150 - i).to_string()))
            .collect();
        let second: Vec<_> = (100..150)
            .map(|i| feed_entry(&format!("c{}", 150 - i), &(150 - i).to_string()))
            .collect();

        Mock::given(method("GET"))
            .and(path("/manga/m1/feed"))
            .and(query_param("offset", "0"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": first, "total": 150 })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/manga/m1/feed"))
            .and(query_param("offset", "100"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": second, "total": 150 })))
            .expect(1)
            .mount(&server)
            .await;

        let chapters = source(&server)
            .list_chapters(&SeriesRef::new("m1", "Series"))
            .await
            .unwrap();
        assert_eq!(chapters.len(), 150);
        assert_eq!(chapters[0].ordinal, 1.0);
        assert_eq!(chapters[149].title, "Chapter 150");
    }

    #[tokio::test]
    async fn external_chapters_are_skipped() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/manga/m1/feed"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [
                    feed_entry("a", "1"),
                    { "id": "b", "attributes": { "chapter": "2", "title": "Elsewhere", "externalUrl": "https://x" } }
                ],
                "total": 2
            })))
            .mount(&server)
            .await;

        let chapters = source(&server)
            .list_chapters(&SeriesRef::new("m1", "Series"))
            .await
            .unwrap();
        assert_eq!(chapters.len(), 1);
        assert_eq!(chapters[0].id.as_str(), "a");
    }

    #[tokio::test]
    async fn at_home_server_builds_page_urls() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/at-home/server/ch-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "baseUrl": "https://cdn.example",
                "chapter": { "hash": "h4sh", "data": ["1.png", "2.png"] }
            })))
            .mount(&server)
            .await;

        let chapter = ChapterRef::new("ch-1", "Chapter 1", ChapterLocator::remote("ch-1"));
        let pages = source(&server).resolve_pages(&chapter).await.unwrap();
        assert_eq!(
            pages,
            vec![
                PageLocator::remote("https://cdn.example/data/h4sh/1.png"),
                PageLocator::remote("https://cdn.example/data/h4sh/2.png"),
            ]
        );
    }

    #[tokio::test]
    async fn malformed_search_response_is_empty() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/manga"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        assert!(source(&server).search("tower").await.is_empty());
    }

    #[test]
    fn titles_prefer_english() {
        let mut titles = HashMap::new();
        titles.insert("ja".to_string(), "塔".to_string());
        titles.insert("en".to_string(), "Tower".to_string());
        assert_eq!(pick_title(&titles), "Tower");
    }
}
