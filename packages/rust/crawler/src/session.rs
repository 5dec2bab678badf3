//! Shared HTTP session used for discovery and article fetches.

use std::time::Duration;

use reqwest::Client;
use tracing::debug;
use url::Url;

use newscrawl_shared::{FetchError, NewsCrawlError, PipelineConfig, Result};

/// Default User-Agent string for crawl requests.
pub const USER_AGENT: &str = concat!("newscrawl/", env!("CARGO_PKG_VERSION"));

/// A fetched document body.
#[derive(Debug, Clone)]
pub struct FetchedDocument {
    /// The URL that was requested.
    pub url: Url,
    /// The URL after redirects.
    pub final_url: Url,
    pub status: u16,
    pub html: String,
}

/// HTTP client with a fixed per-request timeout.
///
/// Cheap to clone; clones share the underlying connection pool.
#[derive(Debug, Clone)]
pub struct HttpSession {
    client: Client,
    timeout: Duration,
}

impl HttpSession {
    /// Build a session with the given User-Agent and per-request timeout.
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(user_agent)
            .redirect(reqwest::redirect::Policy::limited(5))
            .connect_timeout(timeout)
            .build()
            .map_err(|e| {
                NewsCrawlError::Transport(FetchError::Request(format!(
                    "failed to build HTTP client: {e}"
                )))
            })?;

        Ok(Self { client, timeout })
    }

    /// Session configured from the pipeline settings.
    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        let user_agent = if config.user_agent.is_empty() {
            USER_AGENT
        } else {
            config.user_agent.as_str()
        };
        Self::new(user_agent, config.fetch_timeout)
    }

    /// GET `url` and read the body as text.
    ///
    /// The whole exchange (connect, headers, body) is bounded by the session
    /// timeout. Non-2xx responses are errors.
    pub async fn get(&self, url: &Url) -> std::result::Result<FetchedDocument, FetchError> {
        match url.scheme() {
            "http" | "https" => {}
            other => return Err(FetchError::InvalidUrl(format!("{url}: scheme {other}"))),
        }

        match tokio::time::timeout(self.timeout, self.get_inner(url)).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout),
        }
    }

    async fn get_inner(&self, url: &Url) -> std::result::Result<FetchedDocument, FetchError> {
        debug!(%url, "fetching");

        let response = self
            .client
            .get(url.as_str())
            .send()
            .await
            .map_err(classify_send_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus(status.as_u16()));
        }

        let final_url = response.url().clone();
        let html = response.text().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout
            } else {
                FetchError::Body(e.to_string())
            }
        })?;

        Ok(FetchedDocument {
            url: url.clone(),
            final_url,
            status: status.as_u16(),
            html,
        })
    }
}

fn classify_send_error(e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout
    } else if e.is_connect() {
        FetchError::Connect(e.to_string())
    } else if let Some(status) = e.status() {
        FetchError::HttpStatus(status.as_u16())
    } else {
        FetchError::Request(e.to_string())
    }
}
