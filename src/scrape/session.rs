//! Manual cookie session scoped to a single fetch.
//!
//! The site hands out session cookies on the first page request and expects
//! them back on the follow-up requests of the same fetch. Cookies are not
//! carried across fetches; the processor clears the session before each one.

use std::sync::Mutex;

use reqwest::header::{HeaderMap, SET_COOKIE};

/// Accumulated `Cookie` header value for the fetch in progress.
#[derive(Debug, Default)]
pub struct CookieSession {
    cookie: Mutex<Option<String>>,
}

impl CookieSession {
    /// Creates an empty session.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops any accumulated cookies.
    pub fn clear(&self) {
        let mut cookie = self
            .cookie
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *cookie = None;
    }

    /// Absorbs `Set-Cookie` headers from a response.
    ///
    /// Each value is truncated at its first `;` (attributes are dropped),
    /// duplicates are ignored, and the surviving pairs replace the session
    /// value joined with `"; "`. Responses without cookies leave the
    /// session untouched.
    pub fn absorb(&self, headers: &HeaderMap) {
        let mut pairs: Vec<String> = Vec::new();
        for value in headers.get_all(SET_COOKIE) {
            let Ok(text) = value.to_str() else {
                continue;
            };
            let pair = text.split(';').next().unwrap_or(text).trim();
            if !pair.is_empty() && !pairs.iter().any(|seen| seen == pair) {
                pairs.push(pair.to_string());
            }
        }
        if pairs.is_empty() {
            return;
        }

        let mut cookie = self
            .cookie
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *cookie = Some(pairs.join("; "));
    }

    /// Returns the current `Cookie` header value, if any.
    #[must_use]
    pub fn header_value(&self) -> Option<String> {
        self.cookie
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}
