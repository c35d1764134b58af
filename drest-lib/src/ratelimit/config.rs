use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default number of times a rate limited call is repeated
pub const DEFAULT_MAX_RETRIES: u64 = 3;

/// Default wait after a `429` that does not say how long to wait
pub const DEFAULT_RETRY_WAIT_TIME_SECS: usize = 1;

/// Default upper bound for a single wait after a `429`
const DEFAULT_MAX_RETRY_WAIT: Duration = Duration::from_secs(60);

/// How `429 Too Many Requests` responses are retried
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RateLimitConfig {
    /// How often a rate limited call is sent again before giving up
    #[serde(default = "default_max_retries")]
    pub max_retries: u64,

    /// Wait time used when the server sends neither a body nor a
    /// `Retry-After` header
    #[serde(default = "default_retry_wait", with = "humantime_serde")]
    pub default_retry_wait: Duration,

    /// Waits advised by the server are capped to this
    #[serde(default = "default_max_retry_wait", with = "humantime_serde")]
    pub max_retry_wait: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            default_retry_wait: default_retry_wait(),
            max_retry_wait: default_max_retry_wait(),
        }
    }
}

const fn default_max_retries() -> u64 {
    DEFAULT_MAX_RETRIES
}

const fn default_retry_wait() -> Duration {
    Duration::from_secs(DEFAULT_RETRY_WAIT_TIME_SECS as u64)
}

const fn default_max_retry_wait() -> Duration {
    DEFAULT_MAX_RETRY_WAIT
}

impl RateLimitConfig {
    /// Create a `RateLimitConfig` from CLI options, using defaults for missing values
    #[must_use]
    pub fn from_options(
        max_retries: Option<u64>,
        default_retry_wait: Option<Duration>,
        max_retry_wait: Option<Duration>,
    ) -> Self {
        let defaults = Self::default();
        Self {
            max_retries: max_retries.unwrap_or(defaults.max_retries),
            default_retry_wait: default_retry_wait.unwrap_or(defaults.default_retry_wait),
            max_retry_wait: max_retry_wait.unwrap_or(defaults.max_retry_wait),
        }
    }

    /// Clamp a server-advised wait to [`Self::max_retry_wait`].
    #[must_use]
    pub fn cap(&self, wait: Duration) -> Duration {
        wait.min(self.max_retry_wait)
    }
}
