use bytes::{BufMut, Bytes, BytesMut};
use http::{
    HeaderMap, HeaderValue, Method,
    header::{AUTHORIZATION, CONNECTION, CONTENT_LENGTH, CONTENT_TYPE, HOST, USER_AGENT},
};
use secrecy::{ExposeSecret, SecretString};

use crate::{Request, Result};

/// Port for which the `Host` header carries no explicit port
const DEFAULT_HTTPS_PORT: u16 = 443;

/// Serializes [`Request`]s into HTTP/1.1 wire format.
///
/// Every request gets the same standard headers, in this order:
/// `Host`, `Authorization` (if a token is set), `User-Agent` and
/// `Connection: keep-alive`. Body headers follow, then the caller's
/// overrides. An override replaces a standard header in place.
#[derive(Debug, Clone)]
pub struct RequestEncoder {
    api_base: String,
    standard_headers: HeaderMap,
}

impl RequestEncoder {
    /// Create an encoder for the API at `host:port` under `api_base`.
    ///
    /// # Errors
    ///
    /// Fails if the host, token or user agent are not valid header values.
    pub fn new(
        host: &str,
        port: u16,
        api_base: &str,
        token: Option<&SecretString>,
        user_agent: &str,
    ) -> Result<Self> {
        let mut standard_headers = HeaderMap::new();

        let host = if port == DEFAULT_HTTPS_PORT {
            HeaderValue::from_str(host)?
        } else {
            HeaderValue::from_str(&format!("{host}:{port}"))?
        };
        standard_headers.insert(HOST, host);

        if let Some(token) = token {
            let mut authorization =
                HeaderValue::from_str(&format!("Bot {}", token.expose_secret()))?;
            authorization.set_sensitive(true);
            standard_headers.insert(AUTHORIZATION, authorization);
        }
        standard_headers.insert(USER_AGENT, HeaderValue::from_str(user_agent)?);
        standard_headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));

        Ok(Self {
            api_base: api_base.trim_end_matches('/').to_string(),
            standard_headers,
        })
    }

    /// The path prefix put in front of every request path
    #[must_use]
    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    /// Encode `request` into the exact bytes to put on the wire.
    #[must_use]
    pub fn encode(&self, request: &Request) -> Bytes {
        let headers = self.headers_for(request);
        let body_len = request.body.as_ref().map_or(0, Bytes::len);

        let mut out = BytesMut::with_capacity(256 + body_len);
        out.put_slice(request.method.as_str().as_bytes());
        out.put_u8(b' ');
        out.put_slice(self.api_base.as_bytes());
        if !request.path.starts_with('/') {
            out.put_u8(b'/');
        }
        out.put_slice(request.path.as_bytes());
        out.put_slice(b" HTTP/1.1\r\n");

        for (name, value) in &headers {
            put_title_case(&mut out, name.as_str());
            out.put_slice(b": ");
            out.put_slice(value.as_bytes());
            out.put_slice(b"\r\n");
        }
        out.put_slice(b"\r\n");

        if let Some(body) = &request.body {
            out.put_slice(body);
        }
        out.freeze()
    }

    fn headers_for(&self, request: &Request) -> HeaderMap {
        let mut headers = self.standard_headers.clone();

        match &request.body {
            Some(body) => {
                headers.insert(CONTENT_TYPE, request.payload_type.content_type());
                headers.insert(CONTENT_LENGTH, HeaderValue::from(body.len()));
            }
            None if expects_body(&request.method) => {
                headers.insert(CONTENT_LENGTH, HeaderValue::from_static("0"));
            }
            None => {}
        }

        for name in request.headers.keys() {
            let mut values = request.headers.get_all(name).iter();
            if let Some(first) = values.next() {
                headers.insert(name.clone(), first.clone());
            }
            for value in values {
                headers.append(name.clone(), value.clone());
            }
        }
        headers
    }
}

/// Methods for which servers expect a `Content-Length` even without a body
fn expects_body(method: &Method) -> bool {
    *method == Method::POST || *method == Method::PUT || *method == Method::PATCH
}

/// Write a lowercase header name as `Title-Case`.
fn put_title_case(out: &mut BytesMut, name: &str) {
    let mut upper = true;
    for b in name.bytes() {
        out.put_u8(if upper { b.to_ascii_uppercase() } else { b });
        upper = b == b'-';
    }
}
