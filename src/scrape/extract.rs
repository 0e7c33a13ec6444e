//! Marker-based extraction from fetched share pages.
//!
//! The pages are not parsed as HTML; the relevant values sit behind stable
//! string markers and are cut out with plain scanning, which has proven far
//! more resilient to page churn than structural parsing.

use super::error::ScrapeError;

/// Script reference present on challenge interstitials.
const CAPTCHA_MARKER: &str = "captcha.js";

/// Link element pointing at the canonical share page.
const CANONICAL_MARKER: &str = "rel=\"canonical\" href=\"";

/// JSON key carrying the direct video address in the embedded player state.
const PLAY_ADDR_MARKER: &str = "\"playAddr\"";

/// Rejects challenge responses.
///
/// A challenge is an empty body or one referencing the captcha script.
///
/// # Errors
///
/// Returns [`ScrapeError::CaptchaRequired`] naming what was detected.
pub fn ensure_not_challenge(html: &str) -> Result<(), ScrapeError> {
    if html.is_empty() {
        return Err(ScrapeError::CaptchaRequired {
            reason: "empty page body",
        });
    }
    if html.contains(CAPTCHA_MARKER) {
        return Err(ScrapeError::CaptchaRequired {
            reason: "page references the captcha script",
        });
    }
    Ok(())
}

/// Extracts the canonical page URL, when the page declares one.
///
/// Share links usually redirect through a shortened form; the canonical
/// link carries the full page that actually embeds the player state.
#[must_use]
pub fn canonical_url(html: &str) -> Option<String> {
    let (_, rest) = html.split_once(CANONICAL_MARKER)?;
    let url = rest.split_once('"').map_or(rest, |(url, _)| url);
    Some(url.to_string())
}

/// Extracts the direct video file URL from a share page.
///
/// Tries the embedded player state first (`"playAddr"`), then falls back
/// to the `src` of a `<video>` element. Extracted values have their JSON
/// unicode escapes for `/` and `&` decoded.
///
/// # Errors
///
/// Returns [`ScrapeError::CaptchaRequired`] for challenge pages and
/// [`ScrapeError::Parsing`] when neither strategy yields a URL.
pub fn video_file_url(html: &str) -> Result<String, ScrapeError> {
    ensure_not_challenge(html)?;

    if let Some(url) = play_addr_url(html).or_else(|| video_tag_url(html)) {
        return Ok(unescape(&url));
    }
    Err(ScrapeError::Parsing {
        context: "neither playAddr nor <video> source present",
    })
}

/// The value between the next two quotes after the `"playAddr"` key.
fn play_addr_url(html: &str) -> Option<String> {
    let (_, rest) = html.split_once(PLAY_ADDR_MARKER)?;
    let (_, value) = rest.split_once('"')?;
    let url = value.split_once('"').map_or(value, |(url, _)| url);
    Some(url.to_string())
}

/// The quoted `src` attribute of the first `<video>` element.
fn video_tag_url(html: &str) -> Option<String> {
    let (_, rest) = html.split_once("<video")?;
    let fragment = rest.split_once("</video>").map_or(rest, |(tag, _)| tag);
    let (_, after_src) = fragment.split_once("src")?;
    let after_equals = &after_src[after_src.find('=')? + 1..];
    let after_quote = &after_equals[after_equals.find('"')? + 1..];
    let url = after_quote
        .split_once('"')
        .map_or(after_quote, |(url, _)| url);
    Some(url.to_string())
}

fn unescape(value: &str) -> String {
    value.replace("\\u002F", "/").replace("\\u0026", "&")
}
