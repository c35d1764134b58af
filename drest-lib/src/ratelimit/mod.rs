//! Per-bucket rate limiting.
//!
//! The API groups routes into buckets and advertises each bucket's quota in
//! response headers. This module keeps track of those quotas and makes calls
//! on the same bucket take turns.
//!
//! # Architecture
//!
//! - [`BucketTracker`]: maps routes to buckets and hands out [`Turn`]s
//! - [`BucketState`]: one bucket's [`Quota`] behind an async gate
//! - [`RateLimitConfig`]: how `429` responses are retried
//! - [`RouteStats`]: counters for the calls made on a route

mod config;
mod headers;
mod stats;
mod tracker;
mod window;

pub use config::{DEFAULT_MAX_RETRIES, DEFAULT_RETRY_WAIT_TIME_SECS, RateLimitConfig};
pub(crate) use headers::{RateLimitHeaders, parse_rate_limited_body, parse_retry_after};
pub use stats::{RouteStats, RouteStatsMap};
pub use tracker::{BucketId, BucketState, BucketTracker, Quota, Turn};
pub use window::Window;
