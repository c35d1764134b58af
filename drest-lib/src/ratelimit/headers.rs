//! Handle rate limiting headers and `429` bodies.

use http::{HeaderMap, HeaderValue};
use serde::Deserialize;
use std::time::{Duration, SystemTime};
use thiserror::Error;

const BUCKET: &str = "x-ratelimit-bucket";
const REMAINING: &str = "x-ratelimit-remaining";
const LIMIT: &str = "x-ratelimit-limit";
const RESET_AFTER: &str = "x-ratelimit-reset-after";
const GLOBAL: &str = "x-ratelimit-global";
const SCOPE: &str = "x-ratelimit-scope";

#[derive(Debug, Error, PartialEq, Eq)]
pub(crate) enum RetryAfterParseError {
    #[error("Unable to parse value '{0}'")]
    ValueError(String),

    #[error("Header value contains invalid chars")]
    HeaderValueError,
}

/// Parse the "Retry-After" header as specified per
/// [RFC 7231 section 7.1.3](https://www.rfc-editor.org/rfc/rfc7231#section-7.1.3).
///
/// Fractional seconds are accepted as well, since the API sends those.
pub(crate) fn parse_retry_after(value: &HeaderValue) -> Result<Duration, RetryAfterParseError> {
    let value = value
        .to_str()
        .map_err(|_| RetryAfterParseError::HeaderValueError)?;

    // RFC 7231: Retry-After = HTTP-date / delay-seconds
    parse_seconds(value).map_or_else(
        || {
            httpdate::parse_http_date(value)
                .map(|s| {
                    s.duration_since(SystemTime::now())
                        // if date is in the past, we can use ZERO
                        .unwrap_or(Duration::ZERO)
                })
                .map_err(|_| RetryAfterParseError::ValueError(value.into()))
        },
        Ok,
    )
}

/// Parse non-negative, possibly fractional seconds, rounded up to whole
/// milliseconds.
///
/// The decimal digits are evaluated exactly, so `1.337` is 1337ms and not
/// whatever the nearest float would round to.
pub(crate) fn parse_seconds(value: &str) -> Option<Duration> {
    let (whole, fraction) = value.trim().split_once('.').unwrap_or((value.trim(), ""));
    if whole.is_empty() && fraction.is_empty() {
        return None;
    }
    if !whole.bytes().chain(fraction.bytes()).all(|b| b.is_ascii_digit()) {
        return None;
    }

    let seconds = if whole.is_empty() { 0 } else { whole.parse::<u64>().ok()? };
    let mut millis = 0;
    for (i, digit) in fraction.bytes().enumerate() {
        let digit = u64::from(digit - b'0');
        if i < 3 {
            millis = millis * 10 + digit;
        } else if digit > 0 {
            millis += 1;
            break;
        }
    }
    for _ in fraction.len()..3 {
        millis *= 10;
    }
    Some(Duration::from_secs(seconds) + Duration::from_millis(millis))
}

/// The rate limit fields of a response.
///
/// Every field is optional: error responses and unmetered routes carry
/// only some of them, or none.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct RateLimitHeaders {
    /// Server-assigned bucket id
    pub(crate) bucket: Option<String>,
    /// Calls left in the current window
    pub(crate) remaining: Option<u32>,
    /// Calls per window
    pub(crate) limit: Option<u32>,
    /// Time until the window resets
    pub(crate) reset_after: Option<Duration>,
    /// Set on 429s caused by the global limit
    pub(crate) global: bool,
    /// `user`, `global` or `shared`
    pub(crate) scope: Option<String>,
}

impl RateLimitHeaders {
    pub(crate) fn parse(headers: &HeaderMap) -> Self {
        Self {
            bucket: header_str(headers, BUCKET)
                .filter(|bucket| !bucket.is_empty())
                .map(str::to_string),
            remaining: parse_header_value(headers, REMAINING),
            limit: parse_header_value(headers, LIMIT),
            reset_after: header_str(headers, RESET_AFTER).and_then(parse_seconds),
            global: header_str(headers, GLOBAL).is_some_and(|v| v.eq_ignore_ascii_case("true")),
            scope: header_str(headers, SCOPE).map(str::to_ascii_lowercase),
        }
    }

    /// Whether the response carried any rate limit information at all
    pub(crate) const fn is_empty(&self) -> bool {
        self.bucket.is_none()
            && self.remaining.is_none()
            && self.limit.is_none()
            && self.reset_after.is_none()
    }

    /// Whether the limit that was hit is the global one.
    pub(crate) fn is_global(&self) -> bool {
        self.global || self.scope.as_deref() == Some("global")
    }
}

/// The JSON body of a `429 Too Many Requests` response
#[derive(Debug, Deserialize)]
struct RateLimitedBody {
    retry_after: f64,
    #[serde(default)]
    global: bool,
}

/// Extract `retry_after` and the `global` flag from a `429` body.
pub(crate) fn parse_rate_limited_body(body: &[u8]) -> Option<(Duration, bool)> {
    let parsed: RateLimitedBody = serde_json::from_slice(body).ok()?;
    let retry_after = parse_seconds(&parsed.retry_after.to_string())?;
    Some((retry_after, parsed.global))
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok()).map(str::trim)
}

/// Helper method to parse numeric header values
fn parse_header_value(headers: &HeaderMap, header_name: &str) -> Option<u32> {
    if let Some(value) = header_str(headers, header_name)
        && let Ok(number) = value.parse::<u32>()
    {
        return Some(number);
    }
    None
}
