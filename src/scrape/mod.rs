//! Session-aware scrape client resolving share links to video bytes.
//!
//! A fetch is a short pipeline: load the share page with browser-shaped
//! headers, follow its canonical link when one is declared, extract the
//! direct video URL from the page, then stream the video itself. Session
//! cookies handed out along the way are echoed back within the same fetch
//! and dropped before the next one.

mod error;
mod extract;
mod session;

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{StreamExt, TryStreamExt};
use reqwest::header::{HeaderName, HeaderValue, CONTENT_TYPE, COOKIE};
use tracing::{debug, instrument};

pub use error::ScrapeError;
pub use extract::{canonical_url, ensure_not_challenge, video_file_url};
pub use session::CookieSession;

use crate::model::{ContentType, MaterializedVideo, PendingEntry};

/// Headers sent with share-page requests, shaped like a desktop browser.
const PAGE_HEADERS: &[(&str, &str)] = &[
    ("Origin", "https://www.tiktok.com"),
    ("Referer", "https://www.tiktok.com/"),
    ("Sec-Fetch-Dest", "empty"),
    ("Sec-Fetch-Mode", "cors"),
    ("Sec-Fetch-Site", "cross-site"),
    (
        "User-Agent",
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 \
         (KHTML, like Gecko) Chrome/85.0.4183.121 Safari/537.36",
    ),
];

/// Headers sent with the video request itself.
const VIDEO_HEADERS: &[(&str, &str)] = &[
    ("Accept", "*/*"),
    ("Accept-Encoding", "identity;q=1, *;q=0"),
    (
        "Accept-Language",
        "en-US,en;q=0.9,hu-HU;q=0.8,hu;q=0.7,ro;q=0.6",
    ),
    ("Connection", "keep-alive"),
    ("Range", "bytes=0-"),
    ("Referer", "https://www.tiktok.com/"),
    ("Sec-Fetch-Dest", "video"),
    ("Sec-Fetch-Mode", "no-cors"),
    ("Sec-Fetch-Site", "cross-site"),
    (
        "User-Agent",
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 \
         (KHTML, like Gecko) Chrome/85.0.4183.121 Safari/537.36",
    ),
];

/// Resolves a pending entry to a materialized video.
#[async_trait]
pub trait VideoFetcher: Send + Sync {
    /// Fetches the video behind `entry`.
    async fn fetch(&self, entry: &PendingEntry) -> Result<MaterializedVideo, ScrapeError>;
}

/// [`VideoFetcher`] scraping the share site directly.
pub struct ScrapeClient {
    http: reqwest::Client,
    session: CookieSession,
    pre_request_delay: Duration,
}

impl ScrapeClient {
    /// Builds a client that pauses `pre_request_delay` before every request.
    ///
    /// The delay keeps request cadence below the rate that triggers the
    /// site's challenge page.
    ///
    /// # Errors
    ///
    /// Returns [`ScrapeError::Client`] when the HTTP client cannot be
    /// constructed.
    pub fn new(pre_request_delay: Duration) -> Result<Self, ScrapeError> {
        let http = reqwest::Client::builder()
            .gzip(true)
            .connect_timeout(Duration::from_secs(10))
            .read_timeout(Duration::from_secs(30))
            .build()
            .map_err(ScrapeError::Client)?;
        Ok(Self {
            http,
            session: CookieSession::new(),
            pre_request_delay,
        })
    }

    /// Issues a GET with the given header set plus the session cookie,
    /// absorbing any cookies the response hands back.
    async fn get(
        &self,
        url: &str,
        headers: &[(&str, &str)],
    ) -> Result<reqwest::Response, ScrapeError> {
        tokio::time::sleep(self.pre_request_delay).await;

        let mut request = self.http.get(url);
        for (name, value) in headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::try_from(*name),
                HeaderValue::try_from(*value),
            ) {
                request = request.header(name, value);
            }
        }
        if let Some(cookie) = self.session.header_value()
            && let Ok(value) = HeaderValue::try_from(cookie)
        {
            request = request.header(COOKIE, value);
        }

        let response = request
            .send()
            .await
            .map_err(|source| ScrapeError::network(url, source))?;
        self.session.absorb(response.headers());

        let status = response.status();
        if !status.is_success() {
            return Err(ScrapeError::http_status(url, status));
        }
        Ok(response)
    }

    async fn page_text(&self, url: &str) -> Result<String, ScrapeError> {
        self.get(url, PAGE_HEADERS)
            .await?
            .text()
            .await
            .map_err(|source| ScrapeError::network(url, source))
    }
}

#[async_trait]
impl VideoFetcher for ScrapeClient {
    #[instrument(skip(self), fields(id = %entry.id))]
    async fn fetch(&self, entry: &PendingEntry) -> Result<MaterializedVideo, ScrapeError> {
        self.session.clear();

        let mut page = self.page_text(&entry.url).await?;
        ensure_not_challenge(&page)?;

        if let Some(canonical) = canonical_url(&page) {
            debug!(url = %canonical, "following canonical link");
            page = self.page_text(&canonical).await?;
        }

        let video_url = video_file_url(&page)?;
        debug!(url = %video_url, "video address resolved");

        let response = self.get(&video_url, VIDEO_HEADERS).await?;
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .and_then(ContentType::from_header);

        Ok(MaterializedVideo {
            id: entry.id.clone(),
            url: entry.url.clone(),
            content_type,
            bytes: response
                .bytes_stream()
                .map_err(std::io::Error::other)
                .boxed(),
        })
    }
}
