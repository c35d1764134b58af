use std::fmt::Display;

use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use serde::de::DeserializeOwned;

use crate::{ErrorKind, Result, retry::RetryExt};

/// A fully received HTTP response.
///
/// Non-2xx statuses are ordinary values here. Use [`Response::error_for_status`]
/// to turn them into errors at the call site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Status code from the status line
    pub status: StatusCode,
    /// Response headers, looked up case-insensitively
    pub headers: HeaderMap,
    /// Reassembled body, without any chunk framing
    pub body: Bytes,
}

impl Response {
    /// Whether repeating the same call later might succeed.
    #[must_use]
    pub fn retry_warranted(&self) -> bool {
        self.status.should_retry()
    }

    /// Whether the status is `2xx`.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Whether the server asked to close the connection after this response.
    #[must_use]
    pub fn closes_connection(&self) -> bool {
        self.headers
            .get(http::header::CONNECTION)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.eq_ignore_ascii_case("close"))
    }

    /// Body as (lossy) UTF-8 text.
    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Deserialize the body as JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the body is not valid JSON for `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body).map_err(ErrorKind::InvalidJson)
    }

    /// Return `self` for `2xx` statuses, an error otherwise.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::RejectedStatusCode`] for any non-2xx status.
    pub fn error_for_status(self) -> Result<Self> {
        if self.status.is_success() {
            Ok(self)
        } else {
            Err(ErrorKind::RejectedStatusCode(self.status))
        }
    }
}

impl Display for Response {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({} bytes)", self.status, self.body.len())
    }
}
