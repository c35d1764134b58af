//! `drest` is a rate-limited transport for the Discord REST API.
//!
//! It keeps one HTTP/1.1 connection per route, learns the rate limit buckets
//! the API advertises and makes calls wait for their bucket instead of
//! running into `429 Too Many Requests`. When a `429` happens anyway, the
//! call is retried after the advised wait.
//!
//! ```no_run
//! use drest_lib::{ClientBuilder, Request, Result, Route};
//! use http::Method;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!   let client = ClientBuilder::builder()
//!       .token(Some(std::env::var("DISCORD_TOKEN").unwrap_or_default().into()))
//!       .build()
//!       .client()?;
//!   let request = Request::new(Route::GetGatewayBot, Method::GET, "/gateway/bot");
//!   let response = client.execute(request).await?;
//!   println!("{}", response.text());
//!   Ok(())
//! }
//! ```
//!
//! The building blocks are public as well: [`transport`] for TLS connections,
//! [`codec`] for HTTP/1.1 framing, [`ratelimit`] for bucket bookkeeping and
//! [`pool`] for per-route connections.

mod client;
mod retry;
mod types;

pub mod codec;
pub mod pool;
pub mod quirks;
pub mod ratelimit;
pub mod transport;

#[cfg(test)]
pub(crate) mod test_utils;

pub use client::{
    Client, ClientBuilder, DEFAULT_API_BASE, DEFAULT_HOST, DEFAULT_PORT, DEFAULT_READ_TIMEOUT,
    DEFAULT_TIMEOUT_SECS, DEFAULT_USER_AGENT,
};
pub use types::*;
