//! HTTP/1.1 framing on top of a [`crate::transport::Transport`].
//!
//! Only what the REST API needs is supported: requests with an optional,
//! already serialized body and responses delimited by `Content-Length` or
//! chunked transfer encoding.

mod decode;
mod encode;

pub use decode::ResponseDecoder;
pub use encode::RequestEncoder;
