//! Errors raised while resolving and fetching a video.

use thiserror::Error;

/// Errors from the scrape client and extraction routines.
#[derive(Debug, Error)]
pub enum ScrapeError {
    /// A request could not be completed at the transport level.
    #[error("network error requesting {url}: {source}")]
    Network {
        /// The URL that was being requested.
        url: String,
        /// The underlying client error.
        #[source]
        source: reqwest::Error,
    },

    /// The server answered with a non-success status.
    #[error("unexpected HTTP status {status} from {url}")]
    HttpStatus {
        /// The URL that was being requested.
        url: String,
        /// The status code received.
        status: reqwest::StatusCode,
    },

    /// The HTTP client itself could not be constructed.
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    /// A page was fetched but the expected markers were not found.
    #[error("failed to parse page: {context}")]
    Parsing {
        /// Which extraction step failed.
        context: &'static str,
    },

    /// The site served a captcha challenge instead of content.
    #[error("captcha challenge detected: {reason}")]
    CaptchaRequired {
        /// What identified the response as a challenge.
        reason: &'static str,
    },
}

impl ScrapeError {
    /// Creates a network error with URL context.
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            url: url.into(),
            source,
        }
    }

    /// Creates a status error with URL context.
    pub fn http_status(url: impl Into<String>, status: reqwest::StatusCode) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
        }
    }
}
