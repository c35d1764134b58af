use std::{fmt, num::NonZeroU32, sync::Arc, time::Duration};

use governor::{DefaultDirectRateLimiter, Quota as GovernorQuota, RateLimiter};

use crate::Route;

/// Editing and deleting messages is limited to 5 calls per 5 seconds per
/// channel, but the headers only ever show the shared message bucket.
const MESSAGE_MUTATION_PERIOD: Duration = Duration::from_millis(1250);

/// Bulk deletion of messages older than two weeks is far stricter.
const OLD_MESSAGE_DELETION_PERIOD: Duration = Duration::from_secs(4);

/// Minimum spacing for a set of routes whose real limit the server does not
/// advertise.
#[derive(Clone)]
pub struct Quirk {
    routes: Vec<Route>,
    period: Duration,
    limiter: Arc<DefaultDirectRateLimiter>,
}

impl Quirk {
    /// Space calls on `routes` at least `period` apart. A zero period yields
    /// `None`.
    #[must_use]
    pub fn new(routes: impl Into<Vec<Route>>, period: Duration) -> Option<Self> {
        let quota = GovernorQuota::with_period(period)?.allow_burst(NonZeroU32::MIN);
        Some(Self {
            routes: routes.into(),
            period,
            limiter: Arc::new(RateLimiter::direct(quota)),
        })
    }

    fn matches(&self, route: Route) -> bool {
        self.routes.contains(&route)
    }
}

impl fmt::Debug for Quirk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Quirk")
            .field("routes", &self.routes)
            .field("period", &self.period)
            .finish_non_exhaustive()
    }
}

/// Extra pacing on top of the server's rate limit headers.
#[derive(Debug, Clone)]
pub struct Quirks {
    quirks: Vec<Quirk>,
}

impl Default for Quirks {
    fn default() -> Self {
        let quirks = [
            Quirk::new(
                [Route::PatchMessage, Route::DeleteMessage],
                MESSAGE_MUTATION_PERIOD,
            ),
            Quirk::new([Route::DeleteMessageOld], OLD_MESSAGE_DELETION_PERIOD),
        ];
        Self {
            quirks: quirks.into_iter().flatten().collect(),
        }
    }
}

impl Quirks {
    /// No extra pacing at all
    #[must_use]
    pub const fn none() -> Self {
        Self { quirks: Vec::new() }
    }

    /// Add a quirk. Quirks are checked in insertion order.
    #[must_use]
    pub fn with(mut self, quirk: Quirk) -> Self {
        self.quirks.push(quirk);
        self
    }

    /// Wait until a call on `route` is allowed by every matching quirk.
    pub(crate) async fn apply(&self, route: Route) {
        for quirk in self.quirks.iter().filter(|quirk| quirk.matches(route)) {
            if quirk.limiter.check().is_err() {
                log::debug!(
                    "Pacing `{route}`: at most one call every {}ms",
                    quirk.period.as_millis()
                );
                quirk.limiter.until_ready().await;
            }
        }
    }
}
