use std::time::Duration;

use http::{HeaderMap, StatusCode};
use serde::{Serialize, Serializer};
use thiserror::Error;

use crate::Route;

/// Possible errors when talking to the REST API through `drest_lib`
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ErrorKind {
    /// DNS lookup, TCP connect, TLS handshake or socket I/O failed.
    ///
    /// All of these are reported alike; the message tells them apart.
    #[error("Connection to {peer} failed: {reason}")]
    Connection {
        /// `host:port` of the remote end
        peer: String,
        /// What went wrong
        reason: String,
        /// Underlying I/O error, if any
        #[source]
        source: Option<std::io::Error>,
    },

    /// The peer sent bytes that do not form a valid HTTP/1.1 response
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// The server kept answering `429 Too Many Requests`
    #[error("Rate limit on route `{route}` still exceeded after {retries} retries (last retry-after: {retry_after:?})")]
    RateLimitExceeded {
        /// Route that was rate limited
        route: Route,
        /// Number of retries performed
        retries: u64,
        /// Last wait time advised by the server
        retry_after: Duration,
        /// Headers of the last 429 response
        headers: HeaderMap,
    },

    /// The call did not finish within its deadline
    #[error("Request on route `{route}` timed out after {deadline:?}")]
    Timeout {
        /// Route of the call
        route: Route,
        /// The deadline that elapsed
        deadline: Duration,
    },

    /// A header value could not be parsed
    #[error("Header value could not be parsed")]
    InvalidHeader(#[from] http::header::InvalidHeaderValue),

    /// A header name could not be parsed
    #[error("Header name could not be parsed")]
    InvalidHeaderName(#[from] http::header::InvalidHeaderName),

    /// No trusted root certificate is configured
    #[error("No trusted root certificates configured. TLS connections cannot be verified")]
    MissingTrustedRoots,

    /// The configured trust store could not be loaded
    #[error("Cannot load trust store: {0}")]
    InvalidTrustStore(String),

    /// The configured host is not a valid TLS server name
    #[error("Invalid TLS server name `{0}`")]
    InvalidServerName(String),

    /// The caller asked for a non-2xx status to be treated as an error
    #[error("Rejected status code: {0}")]
    RejectedStatusCode(StatusCode),

    /// The response body is not the expected JSON
    #[error("Cannot parse response body as JSON")]
    InvalidJson(#[source] serde_json::Error),
}

impl ErrorKind {
    /// Shorthand for a [`ErrorKind::Connection`] error.
    pub(crate) fn connection(
        peer: impl Into<String>,
        reason: impl Into<String>,
        source: Option<std::io::Error>,
    ) -> Self {
        Self::Connection {
            peer: peer.into(),
            reason: reason.into(),
            source,
        }
    }

    /// Whether this error is a connection failure.
    #[must_use]
    pub const fn is_connection(&self) -> bool {
        matches!(self, Self::Connection { .. })
    }

    /// Whether this error is a timeout.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// The route this error is about, if it carries one.
    #[must_use]
    pub const fn route(&self) -> Option<Route> {
        match self {
            Self::RateLimitExceeded { route, .. } | Self::Timeout { route, .. } => Some(*route),
            _ => None,
        }
    }

    /// The underlying I/O error, if any
    #[must_use]
    pub const fn io_error(&self) -> Option<&std::io::Error> {
        match self {
            Self::Connection {
                source: Some(e), ..
            } => Some(e),
            _ => None,
        }
    }
}

impl Serialize for ErrorKind {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}
