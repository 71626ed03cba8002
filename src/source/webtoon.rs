//! Webtoon adapter: paginated newest-first HTML listings.
//!
//! HTML is parsed in synchronous helpers so no `scraper::Html` (which is `!Send`) is ever
//! held across an await point.

use async_trait::async_trait;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::sync::LazyLock;

use super::http::absolutize;
use super::{ListingPage, MaxPageBound, PaginatedListing, RequestProfile, SourceAdapter, SourceHttp};
use crate::config::HttpConfig;
use crate::error::{Error, Result};
use crate::ordinal::parse_ordinal;
use crate::types::{ChapterLocator, ChapterRef, PageLocator, SeriesRef, SourceKind};

const DEFAULT_BASE_URL: &str = "https://www.webtoons.com/en";
const REFERER: &str = "https://www.webtoons.com/";

#[allow(clippy::expect_used)]
static SEARCH_CARDS: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("li .card_item, li ._card_item, a._card_item").expect("valid selector")
});
#[allow(clippy::expect_used)]
static TITLE_LINKS: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"a[href*="title_no="]"#).expect("valid selector"));
#[allow(clippy::expect_used)]
static CARD_TITLE: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("strong, .subj").expect("valid selector"));
#[allow(clippy::expect_used)]
static LINK: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a").expect("valid selector"));
#[allow(clippy::expect_used)]
static IMG: LazyLock<Selector> = LazyLock::new(|| Selector::parse("img").expect("valid selector"));
#[allow(clippy::expect_used)]
static EPISODE_ROWS: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("#_listUl li").expect("valid selector"));
#[allow(clippy::expect_used)]
static EPISODE_TITLE: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(".subj span").expect("valid selector"));
#[allow(clippy::expect_used)]
static EPISODE_SUBJ: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(".subj").expect("valid selector"));
#[allow(clippy::expect_used)]
static PAGINATE_LINKS: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(".paginate a").expect("valid selector"));
#[allow(clippy::expect_used)]
static PAGINATE_ACTIVE: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(".paginate .on").expect("valid selector"));
#[allow(clippy::expect_used)]
static VIEWER_IMAGES: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(".viewer_img img").expect("valid selector"));
#[allow(clippy::expect_used)]
static PAGE_PARAM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:[?&]|&amp;)page=(\d+)").expect("page parameter pattern is valid")
});

/// Webtoon source adapter
#[derive(Debug)]
pub struct WebtoonSource {
    http: SourceHttp,
    base_url: String,
    profile: RequestProfile,
    bounds: MaxPageBound,
}

impl WebtoonSource {
    /// Adapter for the public English site
    pub fn new(config: &HttpConfig) -> Result<Self> {
        Self::with_base_url(config, DEFAULT_BASE_URL)
    }

    /// Adapter against a different base URL (mirrors, tests)
    pub fn with_base_url(config: &HttpConfig, base_url: impl Into<String>) -> Result<Self> {
        Ok(Self {
            http: SourceHttp::new(config, "webtoon")?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            profile: RequestProfile::with_referer(REFERER).user_agent(config.user_agent.clone()),
            bounds: MaxPageBound::new(),
        })
    }

    fn list_url(&self, series: &SeriesRef) -> String {
        match series.url.as_deref() {
            Some(url) => url.split_once('?').map_or(url, |(path, _)| path).to_string(),
            None => format!("{}/genre/title/list", self.base_url),
        }
    }
}

#[async_trait]
impl SourceAdapter for WebtoonSource {
    fn kind(&self) -> SourceKind {
        SourceKind::new("webtoon")
    }

    fn request_profile(&self) -> &RequestProfile {
        &self.profile
    }

    async fn search(&self, query: &str) -> Vec<SeriesRef> {
        let url = format!("{}/search", self.base_url);
        match self
            .http
            .get_text(&url, &[("keyword", query)], &self.profile)
            .await
        {
            Ok(html) => parse_search(&html, &url),
            Err(e) => {
                tracing::warn!(query, error = %e, "Webtoon search failed");
                Vec::new()
            }
        }
    }

    async fn resolve_pages(&self, chapter: &ChapterRef) -> Result<Vec<PageLocator>> {
        let url = match &chapter.locator {
            ChapterLocator::Remote { url } => url,
            ChapterLocator::Local { local_ref } => {
                return Err(Error::ContractViolation(format!(
                    "chapter {} is archived as {}; resolve it locally",
                    chapter.id, local_ref
                )));
            }
        };

        match self.http.get_text(url, &[], &self.profile).await {
            Ok(html) => Ok(parse_viewer(&html)),
            Err(e @ Error::SourceUnavailable { .. }) => Err(e),
            Err(e) => {
                tracing::warn!(chapter_id = %chapter.id, error = %e, "Failed to resolve Webtoon pages");
                Ok(Vec::new())
            }
        }
    }
}

#[async_trait]
impl PaginatedListing for WebtoonSource {
    async fn list_page(&self, series: &SeriesRef, page: u32) -> Result<ListingPage> {
        let url = self.list_url(series);
        let page_param = page.to_string();
        let query = [("title_no", series.id.as_str()), ("page", page_param.as_str())];

        match self.http.get_text(&url, &query, &self.profile).await {
            Ok(html) => {
                let parsed = parse_listing(&html, page, &url);
                let max_page_known = self.bounds.observe(&series.id, parsed.max_page);
                tracing::debug!(
                    series_id = %series.id,
                    page,
                    current_page = parsed.current_page,
                    chapters = parsed.chapters.len(),
                    max_page_known,
                    "Fetched Webtoon listing page"
                );
                Ok(ListingPage {
                    chapters: parsed.chapters,
                    current_page: parsed.current_page,
                    max_page_known,
                })
            }
            Err(e @ Error::SourceUnavailable { .. }) => Err(e),
            Err(e) => {
                tracing::warn!(series_id = %series.id, page, error = %e, "Webtoon listing fetch failed");
                Ok(ListingPage {
                    chapters: Vec::new(),
                    current_page: page,
                    max_page_known: self.bounds.current(&series.id),
                })
            }
        }
    }
}

struct ParsedListing {
    chapters: Vec<ChapterRef>,
    current_page: u32,
    max_page: u32,
}

fn text_of(element: ElementRef<'_>) -> String {
    element.text().collect::<String>().trim().to_string()
}

fn query_value(url: &str, key: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    parsed
        .query_pairs()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.into_owned())
        .filter(|v| !v.is_empty())
}

fn parse_search(html: &str, page_url: &str) -> Vec<SeriesRef> {
    let document = Html::parse_document(html);

    let mut cards: Vec<ElementRef<'_>> = document.select(&SEARCH_CARDS).collect();
    if cards.is_empty() {
        cards = document.select(&TITLE_LINKS).collect();
    }

    let mut results = Vec::new();
    for card in cards {
        let link = if card.value().name() == "a" {
            Some(card)
        } else {
            card.select(&LINK).next()
        };
        let Some(href) = link.and_then(|a| a.value().attr("href")) else {
            continue;
        };
        let href = absolutize(page_url, href);
        let Some(id) = query_value(&href, "title_no") else {
            continue;
        };

        let title = card
            .select(&CARD_TITLE)
            .next()
            .map(text_of)
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| "Unknown Title".to_string());
        let cover_url = card
            .select(&IMG)
            .next()
            .and_then(|img| img.value().attr("src"))
            .map(str::to_string);

        results.push(SeriesRef {
            id,
            title,
            url: Some(href),
            cover_url,
        });
    }
    results
}

fn parse_listing(html: &str, requested_page: u32, page_url: &str) -> ParsedListing {
    let document = Html::parse_document(html);

    let mut chapters = Vec::new();
    for row in document.select(&EPISODE_ROWS) {
        let Some(href) = row.select(&LINK).next().and_then(|a| a.value().attr("href")) else {
            continue;
        };
        let href = absolutize(page_url, href);
        let Some(episode_no) = query_value(&href, "episode_no") else {
            continue;
        };

        let title = row
            .select(&EPISODE_TITLE)
            .next()
            .or_else(|| row.select(&EPISODE_SUBJ).next())
            .map(text_of)
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| format!("Episode {}", episode_no));

        let mut chapter =
            ChapterRef::new(episode_no.as_str(), title, ChapterLocator::remote(href));
        if parse_ordinal(&chapter.title).is_none()
            && let Ok(number) = episode_no.parse::<f64>()
        {
            chapter = chapter.with_ordinal(number);
        }
        chapters.push(chapter);
    }

    let mut max_page = 1;
    for link in document.select(&PAGINATE_LINKS) {
        if let Some(page) = link.value().attr("href").and_then(|h| {
            PAGE_PARAM
                .captures(h)
                .and_then(|c| c.get(1))
                .and_then(|m| m.as_str().parse::<u32>().ok())
        }) {
            max_page = max_page.max(page);
        }
        if let Ok(page) = text_of(link).parse::<u32>() {
            max_page = max_page.max(page);
        }
    }
    for caps in PAGE_PARAM.captures_iter(html) {
        if let Some(page) = caps.get(1).and_then(|m| m.as_str().parse::<u32>().ok()) {
            max_page = max_page.max(page);
        }
    }

    let current_page = document
        .select(&PAGINATE_ACTIVE)
        .next()
        .and_then(|el| text_of(el).parse::<u32>().ok())
        .unwrap_or(requested_page);

    ParsedListing {
        chapters,
        current_page,
        max_page: max_page.max(current_page),
    }
}

fn parse_viewer(html: &str) -> Vec<PageLocator> {
    let document = Html::parse_document(html);
    document
        .select(&VIEWER_IMAGES)
        .filter_map(|img| img.value().attr("data-url"))
        .map(PageLocator::remote)
        .collect()
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn listing_html(base: &str, episodes: &[u32], active: u32, links: &[u32]) -> String {
        let rows: String = episodes
            .iter()
            .map(|ep| {
                format!(
                    r#"<li><a href="{base}/viewer?title_no=95&episode_no={ep}"><span class="subj"><span>Episode {ep}</span></span><span class="date">Jan 1</span></a></li>"#
                )
            })
            .collect();
        let pages: String = links
            .iter()
            .map(|p| format!(r#"<a href="?title_no=95&amp;page={p}">{p}</a>"#))
            .collect();
        format!(
            r#"<html><body><ul id="_listUl">{rows}</ul><div class="paginate"><span class="on">{active}</span>{pages}</div></body></html>"#
        )
    }

    fn source(server: &MockServer) -> WebtoonSource {
        WebtoonSource::with_base_url(&HttpConfig::default(), server.uri()).unwrap()
    }

    #[test]
    fn listing_parses_rows_and_pagination() {
        let html = listing_html("https://w.example", &[120, 119, 118], 1, &[2, 3, 4]);
        let parsed = parse_listing(&html, 1, "https://w.example/list");

        let ids: Vec<_> = parsed.chapters.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["120", "119", "118"]);
        assert_eq!(parsed.chapters[0].ordinal, 120.0);
        assert_eq!(parsed.current_page, 1);
        assert_eq!(parsed.max_page, 4);
    }

    #[test]
    fn untitled_episodes_fall_back_to_episode_number() {
        let html = r#"<ul id="_listUl"><li><a href="https://w.example/v?episode_no=7"><span class="subj"><span>The Gate</span></span></a></li></ul>"#;
        let parsed = parse_listing(html, 3, "https://w.example/list");
        assert_eq!(parsed.chapters[0].ordinal, 7.0);
        assert_eq!(parsed.current_page, 3);
        assert_eq!(parsed.max_page, 3);
    }

    #[test]
    fn viewer_uses_lazy_load_urls_in_order() {
        let html = r#"<div class="viewer_img"><img data-url="https://img/1.jpg"><img src="x.gif"><img data-url="https://img/2.jpg"></div>"#;
        assert_eq!(
            parse_viewer(html),
            vec![
                PageLocator::remote("https://img/1.jpg"),
                PageLocator::remote("https://img/2.jpg")
            ]
        );
    }

    #[test]
    fn search_falls_back_to_title_links() {
        let html = r#"<div><a href="https://w.example/en/fantasy/tower/list?title_no=95"><strong>Tower</strong><img src="c.jpg"></a></div>"#;
        let results = parse_search(html, "https://w.example/en/search");
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "95");
        assert_eq!(results[0].title, "Tower");
        assert_eq!(results[0].cover_url.as_deref(), Some("c.jpg"));
    }

    #[tokio::test]
    async fn reported_bound_never_shrinks_across_calls() {
        let server = MockServer::start().await;
        let base = server.uri();
        Mock::given(method("GET"))
            .and(path("/genre/title/list"))
            .and(query_param("page", "1"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string(listing_html(&base, &[50, 49], 1, &[2, 3, 9])),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/genre/title/list"))
            .and(query_param("page", "2"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string(listing_html(&base, &[48, 47], 2, &[1, 3])),
            )
            .mount(&server)
            .await;

        let webtoon = source(&server);
        let series = SeriesRef::new("95", "Tower");

        let first = webtoon.list_page(&series, 1).await.unwrap();
        assert_eq!(first.max_page_known, 9);
        let second = webtoon.list_page(&series, 2).await.unwrap();
        assert_eq!(second.current_page, 2);
        assert_eq!(second.max_page_known, 9);
        assert_eq!(second.chapters.len(), 2);
    }

    #[tokio::test]
    async fn failed_listing_is_empty_not_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let page = source(&server)
            .list_page(&SeriesRef::new("95", "Tower"), 4)
            .await
            .unwrap();
        assert!(page.chapters.is_empty());
        assert_eq!(page.current_page, 4);
        assert_eq!(page.max_page_known, 1);
    }

    #[tokio::test]
    async fn blocked_listing_surfaces_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let result = source(&server)
            .list_page(&SeriesRef::new("95", "Tower"), 1)
            .await;
        assert!(matches!(result, Err(Error::SourceUnavailable { .. })));
    }

    #[tokio::test]
    async fn resolve_pages_fetches_the_chapter_url() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/viewer"))
            .and(query_param("episode_no", "3"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<div class="viewer_img"><img data-url="https://img/a.jpg"></div>"#,
            ))
            .mount(&server)
            .await;

        let chapter = ChapterRef::new(
            "3",
            "Episode 3",
            ChapterLocator::remote(format!("{}/viewer?title_no=95&episode_no=3", server.uri())),
        );
        let pages = source(&server).resolve_pages(&chapter).await.unwrap();
        assert_eq!(pages, vec![PageLocator::remote("https://img/a.jpg")]);
    }
}
