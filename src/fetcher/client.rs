use crate::config::PipelineConfig;
use crate::fetcher::{
    errors::FetchError,
    pipeline::decode_page,
    types::{FeedResponse, PageResponse},
};
use bytes::Bytes;
use chrono::Utc;
use reqwest::{
    Client, ClientBuilder, StatusCode,
    header::{ACCEPT, ACCEPT_LANGUAGE, CONTENT_TYPE, HeaderMap, HeaderValue},
};
use std::time::Duration;
use tracing::{debug, instrument};
use url::Url;

const MAX_BODY_SIZE: u64 = 5 * 1024 * 1024; // 5MB

/// Plain bot user agents get served captchas by a lot of publishers.
pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

const PAGE_ACCEPT: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8";
const FEED_ACCEPT: &str = "application/rss+xml,application/atom+xml,application/feed+json,application/xml;q=0.9,text/xml;q=0.9,*/*;q=0.8";

/// Shared HTTP client for feed documents and article pages.
///
/// Cloning is cheap; clones share the connection pool.
#[derive(Clone, Debug)]
pub struct HttpFetcher {
    client: Client,
    page_timeout: Duration,
    feed_timeout: Duration,
}

struct RawResponse {
    url_final: Url,
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

impl HttpFetcher {
    pub fn new(page_timeout: Duration, feed_timeout: Duration) -> Result<Self, FetchError> {
        let client = ClientBuilder::new()
            .connect_timeout(Duration::from_secs(10))
            .user_agent(BROWSER_USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(10))
            .default_headers({
                let mut headers = HeaderMap::new();
                headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.5"));
                headers
            })
            .build()
            .map_err(|e| FetchError::Transport(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            page_timeout,
            feed_timeout,
        })
    }

    pub fn from_config(config: &PipelineConfig) -> Result<Self, FetchError> {
        Self::new(config.page_timeout, config.feed_timeout)
    }

    /// Fetch an article page and decode it to UTF-8.
    #[instrument(skip_all, fields(url = %url))]
    pub async fn fetch_page(&self, url: &str) -> Result<PageResponse, FetchError> {
        let raw = self.get(url, PAGE_ACCEPT, self.page_timeout).await?;

        let content_type = raw
            .headers
            .get(CONTENT_TYPE)
            .and_then(|ct| ct.to_str().ok())
            .unwrap_or("text/html")
            .to_string();

        if !content_type.contains("text/html") && !content_type.contains("application/xhtml") {
            return Err(FetchError::NotHtml(content_type));
        }

        Ok(decode_page(raw.url_final, raw.status, &raw.body, &content_type))
    }

    /// Fetch a feed document without interpreting it.
    #[instrument(skip_all, fields(url = %url))]
    pub async fn fetch_feed(&self, url: &str) -> Result<FeedResponse, FetchError> {
        let raw = self.get(url, FEED_ACCEPT, self.feed_timeout).await?;

        let content_type = raw
            .headers
            .get(CONTENT_TYPE)
            .and_then(|ct| ct.to_str().ok())
            .map(str::to_string);

        Ok(FeedResponse {
            url_final: raw.url_final,
            status: raw.status,
            content_type,
            body: raw.body,
            fetched_at: Utc::now(),
        })
    }

    async fn get(
        &self,
        url: &str,
        accept: &'static str,
        timeout: Duration,
    ) -> Result<RawResponse, FetchError> {
        let parsed_url = Url::parse(url)?;

        let response = self
            .client
            .get(parsed_url)
            .header(ACCEPT, accept)
            .timeout(timeout)
            .send()
            .await?;

        if let Some(declared) = response.content_length()
            && declared > MAX_BODY_SIZE
        {
            return Err(FetchError::TooLarge {
                bytes: declared,
                limit: MAX_BODY_SIZE,
            });
        }

        let url_final = response.url().clone();
        let status = response.status();
        let headers = response.headers().clone();

        if !status.is_success() {
            return Err(FetchError::Status(status));
        }

        let body = response.bytes().await?;

        // chunked responses carry no Content-Length
        if body.len() as u64 > MAX_BODY_SIZE {
            return Err(FetchError::TooLarge {
                bytes: body.len() as u64,
                limit: MAX_BODY_SIZE,
            });
        }

        debug!(status = %status, bytes = body.len(), "fetched");

        Ok(RawResponse {
            url_final,
            status,
            headers,
            body,
        })
    }
}
