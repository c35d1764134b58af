use std::{fmt::Display, time::Duration};

use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method};

use crate::{Result, Route};

/// Boundary used for multipart form payloads.
pub const MULTIPART_BOUNDARY: &str = "boundary25";

/// How the body of a [`Request`] is encoded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PayloadType {
    /// `application/json`
    #[default]
    Json,
    /// `multipart/form-data`, delimited by [`MULTIPART_BOUNDARY`]
    MultipartForm,
}

impl PayloadType {
    /// The `Content-Type` value announced for this payload.
    #[must_use]
    pub fn content_type(self) -> HeaderValue {
        match self {
            Self::Json => HeaderValue::from_static("application/json"),
            Self::MultipartForm => {
                HeaderValue::from_static("multipart/form-data; boundary=boundary25")
            }
        }
    }
}

/// A single outbound REST call.
///
/// The body is expected to be serialized already; this layer never looks
/// inside it. A request is consumed by [`crate::Client::execute`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Logical endpoint, used for bucket and connection lookup
    pub route: Route,
    /// HTTP method
    pub method: Method,
    /// Path relative to the API base, e.g. `/channels/123/messages`
    pub path: String,
    /// Header overrides, applied after the standard headers
    pub headers: HeaderMap,
    /// Serialized body, if any
    pub body: Option<Bytes>,
    /// Encoding of `body`
    pub payload_type: PayloadType,
    /// Free-form label that shows up in logs and errors
    pub trace: String,
    /// Overall deadline for this call; falls back to the client default
    pub timeout: Option<Duration>,
}

impl Request {
    /// Create a request without body or header overrides.
    #[must_use]
    pub fn new(route: Route, method: Method, path: impl Into<String>) -> Self {
        Request {
            route,
            method,
            path: path.into(),
            headers: HeaderMap::new(),
            body: None,
            payload_type: PayloadType::Json,
            trace: route.to_string(),
            timeout: None,
        }
    }

    /// Attach a JSON body.
    #[must_use]
    pub fn with_json(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self.payload_type = PayloadType::Json;
        self
    }

    /// Attach a multipart form body, delimited by [`MULTIPART_BOUNDARY`].
    #[must_use]
    pub fn with_multipart(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self.payload_type = PayloadType::MultipartForm;
        self
    }

    /// Add or replace a header override.
    ///
    /// # Errors
    ///
    /// Returns an error if the name or value is not a valid header.
    pub fn with_header(mut self, name: &str, value: &str) -> Result<Self> {
        let name = HeaderName::from_bytes(name.as_bytes())?;
        let value = HeaderValue::from_str(value)?;
        self.headers.insert(name, value);
        Ok(self)
    }

    /// Label this request for logs.
    #[must_use]
    pub fn with_trace(mut self, trace: impl Into<String>) -> Self {
        self.trace = trace.into();
        self
    }

    /// Impose a deadline on the whole call, including rate-limit waits.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Length of the body in bytes.
    #[must_use]
    pub fn body_len(&self) -> usize {
        self.body.as_ref().map_or(0, Bytes::len)
    }
}

impl Display for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} ({})", self.method, self.path, self.trace)
    }
}
