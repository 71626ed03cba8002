//! Shared HTTP plumbing for source adapters and page fetching.

use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;

use crate::config::{HttpConfig, RetryConfig};
use crate::error::{Error, Result};
use crate::retry::fetch_with_retry;

/// Per-origin identification headers
///
/// Each adapter carries one of these; page fetches for that adapter's chapters reuse it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RequestProfile {
    /// Referer header sent with every request
    pub referer: Option<String>,
    /// User agent; falls back to [`HttpConfig::user_agent`] when unset
    pub user_agent: Option<String>,
    /// Additional headers
    pub headers: Vec<(String, String)>,
}

impl RequestProfile {
    /// Profile that only sets a referer
    pub fn with_referer(referer: impl Into<String>) -> Self {
        Self {
            referer: Some(referer.into()),
            ..Self::default()
        }
    }

    /// Set the user agent
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Add an extra header
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    fn apply(&self, mut request: RequestBuilder, fallback_user_agent: &str) -> RequestBuilder {
        let user_agent = self.user_agent.as_deref().unwrap_or(fallback_user_agent);
        request = request.header(reqwest::header::USER_AGENT, user_agent);
        if let Some(referer) = &self.referer {
            request = request.header(reqwest::header::REFERER, referer);
        }
        for (name, value) in &self.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        request
    }
}

/// HTTP client bound to one origin
///
/// Text and JSON requests are retried with backoff on transient failures.
/// Byte fetches are single-shot.
#[derive(Clone, Debug)]
pub struct SourceHttp {
    client: Client,
    origin: String,
    user_agent: String,
    retry: RetryConfig,
}

impl SourceHttp {
    /// Build a client for `origin` from the HTTP settings
    pub fn new(config: &HttpConfig, origin: impl Into<String>) -> Result<Self> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            client,
            origin: origin.into(),
            user_agent: config.user_agent.clone(),
            retry: config.retry.clone(),
        })
    }

    /// Origin name used in errors and logs
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// GET a URL and return the body as text
    pub async fn get_text(
        &self,
        url: &str,
        query: &[(&str, &str)],
        profile: &RequestProfile,
    ) -> Result<String> {
        fetch_with_retry(&self.retry, || async {
            let response = self.send(url, query, profile).await?;
            Ok(response.text().await?)
        })
        .await
    }

    /// GET a URL and deserialize the JSON body
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
        profile: &RequestProfile,
    ) -> Result<T> {
        let body = self.get_text(url, query, profile).await?;
        serde_json::from_str(&body).map_err(|e| Error::TransientFetch {
            locator: url.to_string(),
            reason: format!("invalid JSON: {}", e),
        })
    }

    /// GET a URL once and return the raw body
    pub async fn get_bytes(&self, url: &str, profile: &RequestProfile) -> Result<Vec<u8>> {
        let response = self.send(url, &[], profile).await?;
        let bytes = response.bytes().await.map_err(|e| Error::TransientFetch {
            locator: url.to_string(),
            reason: e.to_string(),
        })?;
        Ok(bytes.to_vec())
    }

    async fn send(
        &self,
        url: &str,
        query: &[(&str, &str)],
        profile: &RequestProfile,
    ) -> Result<reqwest::Response> {
        let mut request = self.client.get(url);
        if !query.is_empty() {
            request = request.query(query);
        }
        let request = profile.apply(request, &self.user_agent);

        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        tracing::debug!(origin = %self.origin, url, status = status.as_u16(), "Source returned error status");
        Err(classify_status(&self.origin, url, status))
    }
}

/// Map a non-success status to the error taxonomy
///
/// Blocking and rate-limit responses are surfaced as `SourceUnavailable` so retry loops stop.
fn classify_status(origin: &str, url: &str, status: StatusCode) -> Error {
    match status {
        StatusCode::FORBIDDEN | StatusCode::TOO_MANY_REQUESTS | StatusCode::SERVICE_UNAVAILABLE => {
            Error::SourceUnavailable {
                origin: origin.to_string(),
                reason: format!("HTTP {}", status.as_u16()),
            }
        }
        StatusCode::NOT_FOUND | StatusCode::GONE => Error::NotFound(url.to_string()),
        _ => Error::TransientFetch {
            locator: url.to_string(),
            reason: format!("HTTP {}", status.as_u16()),
        },
    }
}

/// Resolve a possibly relative href against a base URL
pub(crate) fn absolutize(base: &str, href: &str) -> String {
    match url::Url::parse(base).and_then(|b| b.join(href)) {
        Ok(resolved) => resolved.to_string(),
        Err(_) => href.to_string(),
    }
}
