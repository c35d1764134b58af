use bytes::BytesMut;
use http::{
    HeaderMap, HeaderName, HeaderValue, StatusCode,
    header::{CONTENT_LENGTH, TRANSFER_ENCODING},
};

use crate::{ErrorKind, Response, Result};

/// Upper bound for the status line plus all header lines of one response
const MAX_HEAD_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum State {
    #[default]
    StatusLine,
    Headers,
    Body(Body),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Body {
    /// Bytes still missing from a `Content-Length` body
    Length(usize),
    Chunked(Chunk),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Chunk {
    Size,
    Data(usize),
    DataCrlf,
    Trailers,
}

/// Incremental HTTP/1.1 response parser.
///
/// Bytes are fed in as they arrive, split at arbitrary points. Once a full
/// response is available it is returned and the decoder is ready for the next
/// one. Bytes past the end of a response stay buffered for it.
#[derive(Debug, Default)]
pub struct ResponseDecoder {
    buffer: BytesMut,
    state: State,
    head_size: usize,
    status: Option<StatusCode>,
    headers: HeaderMap,
    body: BytesMut,
}

impl ResponseDecoder {
    /// Create an empty decoder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume `data` and return the next response once it is complete.
    ///
    /// Call with an empty slice to check whether buffered bytes already hold
    /// a complete response.
    ///
    /// # Errors
    ///
    /// Fails with [`ErrorKind::MalformedResponse`] if the bytes are not a valid
    /// HTTP/1.x response. The decoder is unusable afterwards until
    /// [`ResponseDecoder::reset`] is called.
    pub fn feed(&mut self, data: &[u8]) -> Result<Option<Response>> {
        self.buffer.extend_from_slice(data);
        loop {
            match self.state {
                State::StatusLine => {
                    let Some(line) = self.take_head_line()? else {
                        return Ok(None);
                    };
                    self.status = Some(parse_status_line(&line)?);
                    self.state = State::Headers;
                }
                State::Headers => {
                    let Some(line) = self.take_head_line()? else {
                        return Ok(None);
                    };
                    if !line.is_empty() {
                        let (name, value) = parse_header_line(&line)?;
                        self.headers.append(name, value);
                        continue;
                    }

                    let status = self.status.unwrap_or_default();
                    if status.is_informational() {
                        // `100 Continue` and friends precede the real response
                        self.start_head();
                        continue;
                    }
                    self.state = State::Body(body_framing(status, &self.headers)?);
                }
                State::Body(Body::Length(0)) => return Ok(Some(self.finish())),
                State::Body(Body::Length(missing)) => {
                    let n = self.take_body(missing);
                    if n == 0 {
                        return Ok(None);
                    }
                    self.state = State::Body(Body::Length(missing - n));
                }
                State::Body(Body::Chunked(Chunk::Size)) => {
                    let Some(line) = self.take_line()? else {
                        return Ok(None);
                    };
                    let size = parse_chunk_size(&line)?;
                    let next = if size == 0 { Chunk::Trailers } else { Chunk::Data(size) };
                    self.state = State::Body(Body::Chunked(next));
                }
                State::Body(Body::Chunked(Chunk::Data(0))) => {
                    self.state = State::Body(Body::Chunked(Chunk::DataCrlf));
                }
                State::Body(Body::Chunked(Chunk::Data(missing))) => {
                    let n = self.take_body(missing);
                    if n == 0 {
                        return Ok(None);
                    }
                    self.state = State::Body(Body::Chunked(Chunk::Data(missing - n)));
                }
                State::Body(Body::Chunked(Chunk::DataCrlf)) => {
                    if self.buffer.len() < 2 {
                        return Ok(None);
                    }
                    if &self.buffer[..2] != b"\r\n" {
                        return Err(malformed("chunk data not followed by CRLF"));
                    }
                    let _ = self.buffer.split_to(2);
                    self.state = State::Body(Body::Chunked(Chunk::Size));
                }
                State::Body(Body::Chunked(Chunk::Trailers)) => {
                    let Some(line) = self.take_line()? else {
                        return Ok(None);
                    };
                    // Trailer fields are skipped
                    if line.is_empty() {
                        return Ok(Some(self.finish()));
                    }
                }
            }
        }
    }

    /// Whether the decoder sits between responses with nothing buffered.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.state == State::StatusLine && self.buffer.is_empty()
    }

    /// Whether part of a response has been consumed already.
    #[must_use]
    pub fn in_progress(&self) -> bool {
        !self.is_idle()
    }

    /// Drop all buffered bytes and any partial response.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.start_head();
    }

    fn start_head(&mut self) {
        self.state = State::StatusLine;
        self.head_size = 0;
        self.status = None;
        self.headers.clear();
        self.body.clear();
    }

    fn finish(&mut self) -> Response {
        let response = Response {
            status: self.status.take().unwrap_or_default(),
            headers: std::mem::take(&mut self.headers),
            body: self.body.split().freeze(),
        };
        self.start_head();
        response
    }

    /// Move up to `missing` buffered bytes into the body.
    fn take_body(&mut self, missing: usize) -> usize {
        let n = missing.min(self.buffer.len());
        if n > 0 {
            let chunk = self.buffer.split_to(n);
            self.body.extend_from_slice(&chunk);
        }
        n
    }

    /// Like [`Self::take_line`], but also counts towards the header limit.
    fn take_head_line(&mut self) -> Result<Option<BytesMut>> {
        let line = self.take_line()?;
        if let Some(line) = &line {
            self.head_size += line.len() + 2;
            if self.head_size > MAX_HEAD_SIZE {
                return Err(malformed("response head too large"));
            }
        }
        Ok(line)
    }

    /// Split off the next line, without its line terminator.
    fn take_line(&mut self) -> Result<Option<BytesMut>> {
        let Some(end) = self.buffer.iter().position(|&b| b == b'\n') else {
            if self.head_size + self.buffer.len() > MAX_HEAD_SIZE {
                return Err(malformed("line too long"));
            }
            return Ok(None);
        };
        let mut line = self.buffer.split_to(end + 1);
        line.truncate(end);
        if line.last() == Some(&b'\r') {
            line.truncate(end - 1);
        }
        Ok(Some(line))
    }
}

fn malformed(reason: impl Into<String>) -> ErrorKind {
    ErrorKind::MalformedResponse(reason.into())
}

/// Parse `HTTP/1.1 200 OK`. The reason phrase is optional and ignored.
fn parse_status_line(line: &[u8]) -> Result<StatusCode> {
    let text = std::str::from_utf8(line).map_err(|_| malformed("status line is not UTF-8"))?;
    let mut parts = text.splitn(3, ' ');

    let version = parts.next().unwrap_or_default();
    if !version.starts_with("HTTP/1.") || version.len() != "HTTP/1.1".len() {
        return Err(malformed(format!("unsupported protocol `{version}`")));
    }

    let code = parts.next().unwrap_or_default();
    if code.len() != 3 || !code.bytes().all(|b| b.is_ascii_digit()) {
        return Err(malformed(format!("invalid status code `{code}`")));
    }
    StatusCode::from_bytes(code.as_bytes())
        .map_err(|_| malformed(format!("invalid status code `{code}`")))
}

/// Split a header line at its first colon.
fn parse_header_line(line: &[u8]) -> Result<(HeaderName, HeaderValue)> {
    let colon = line
        .iter()
        .position(|&b| b == b':')
        .ok_or_else(|| malformed("header line without colon"))?;
    let name = HeaderName::from_bytes(&line[..colon])
        .map_err(|_| malformed(format!("invalid header name `{}`", String::from_utf8_lossy(&line[..colon]))))?;
    let value = HeaderValue::from_bytes(line[colon + 1..].trim_ascii())
        .map_err(|_| malformed(format!("invalid value for header `{name}`")))?;
    Ok((name, value))
}

/// Decide how the body of a response is delimited.
fn body_framing(status: StatusCode, headers: &HeaderMap) -> Result<Body> {
    if status == StatusCode::NO_CONTENT || status == StatusCode::NOT_MODIFIED {
        return Ok(Body::Length(0));
    }

    let chunked = headers.get_all(TRANSFER_ENCODING).iter().any(|value| {
        value
            .to_str()
            .is_ok_and(|v| v.to_ascii_lowercase().contains("chunked"))
    });
    if chunked {
        return Ok(Body::Chunked(Chunk::Size));
    }

    let mut length = None;
    for value in headers.get_all(CONTENT_LENGTH) {
        let parsed = value
            .to_str()
            .ok()
            .and_then(|v| v.trim().parse::<usize>().ok())
            .ok_or_else(|| malformed("invalid Content-Length"))?;
        if length.is_some_and(|l| l != parsed) {
            return Err(malformed("conflicting Content-Length headers"));
        }
        length = Some(parsed);
    }
    Ok(Body::Length(length.unwrap_or(0)))
}

/// Parse a hex chunk size, ignoring chunk extensions.
fn parse_chunk_size(line: &[u8]) -> Result<usize> {
    let size = line.split(|&b| b == b';').next().unwrap_or_default().trim_ascii();
    let size = std::str::from_utf8(size).map_err(|_| malformed("chunk size is not UTF-8"))?;
    if size.is_empty() {
        return Err(malformed("missing chunk size"));
    }
    usize::from_str_radix(size, 16).map_err(|_| malformed(format!("invalid chunk size `{size}`")))
}
