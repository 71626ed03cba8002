//! Webtoon-style HTML fixtures and mock server setup

use wiremock::matchers::{method, path, path_regex, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Series id used by every fixture
pub const SERIES_ID: &str = "95";

/// Series title used by every fixture
pub const SERIES_TITLE: &str = "Tower of Tests";

/// Bytes served for page `index` of episode `episode`
pub fn page_bytes(episode: u32, index: usize) -> Vec<u8> {
    format!("JPEG:{episode}:{index}").into_bytes()
}

/// Viewer URL of an episode on the mock server
pub fn viewer_url(base: &str, episode: u32) -> String {
    format!("{base}/viewer?title_no={SERIES_ID}&episode_no={episode}")
}

/// One listing page, newest first, linking to `page_links`
pub fn listing_html(base: &str, episodes: &[u32], active: u32, page_links: &[u32]) -> String {
    let rows: String = episodes
        .iter()
        .map(|ep| {
            format!(
                r#"<li><a href="{}"><span class="subj"><span>Episode {ep}</span></span><span class="date">Mar 3, 2024</span></a></li>"#,
                viewer_url(base, *ep)
            )
        })
        .collect();
    let links: String = page_links
        .iter()
        .map(|p| format!(r#"<a href="?title_no={SERIES_ID}&amp;page={p}">{p}</a>"#))
        .collect();
    format!(
        r#"<html><body><ul id="_listUl">{rows}</ul><div class="paginate"><span class="on">{active}</span>{links}</div></body></html>"#
    )
}

/// Viewer page with `pages` lazy-loaded images
pub fn viewer_html(base: &str, episode: u32, pages: usize) -> String {
    let images: String = (0..pages)
        .map(|i| format!(r#"<img src="bg.gif" data-url="{base}/img/{episode}/{i}.jpg">"#))
        .collect();
    format!(r#"<html><body><div class="viewer_img">{images}</div></body></html>"#)
}

/// Mount a listing of `total` episodes, `per_page` per page, newest first.
///
/// Every page links to every other page.
pub async fn mount_listing(server: &MockServer, total: u32, per_page: u32) {
    let base = server.uri();
    let pages = total.div_ceil(per_page);
    let all_pages: Vec<u32> = (1..=pages).collect();

    for page in 1..=pages {
        let newest = total - (page - 1) * per_page;
        let oldest = newest.saturating_sub(per_page - 1).max(1);
        let episodes: Vec<u32> = (oldest..=newest).rev().collect();
        Mock::given(method("GET"))
            .and(path("/genre/title/list"))
            .and(query_param("title_no", SERIES_ID))
            .and(query_param("page", page.to_string()))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(listing_html(&base, &episodes, page, &all_pages)),
            )
            .mount(server)
            .await;
    }
}

/// Mount viewers and page images for episodes `1..=total`
pub async fn mount_episodes(server: &MockServer, total: u32, pages_per_episode: usize) {
    let base = server.uri();
    for episode in 1..=total {
        Mock::given(method("GET"))
            .and(path("/viewer"))
            .and(query_param("episode_no", episode.to_string()))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(viewer_html(&base, episode, pages_per_episode)),
            )
            .mount(server)
            .await;

        for index in 0..pages_per_episode {
            Mock::given(method("GET"))
                .and(path(format!("/img/{episode}/{index}.jpg")))
                .respond_with(ResponseTemplate::new(200).set_body_bytes(page_bytes(episode, index)))
                .mount(server)
                .await;
        }
    }
}

/// Make every image of `episode` fail with a server error
pub async fn mount_broken_images(server: &MockServer, episode: u32) {
    Mock::given(method("GET"))
        .and(path_regex(format!(r"^/img/{episode}/\d+\.jpg$")))
        .respond_with(ResponseTemplate::new(500))
        .with_priority(1)
        .mount(server)
        .await;
}

/// Number of listing page requests the server has seen
pub async fn listing_requests(server: &MockServer) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.url.path() == "/genre/title/list")
        .count()
}
