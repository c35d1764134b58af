use std::{
    fmt::Display,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use dashmap::{DashMap, mapref::entry::Entry};
use http::HeaderMap;
use tokio::{
    sync::{Mutex as AsyncMutex, OwnedMutexGuard},
    time::{Instant, sleep_until},
};

use super::headers::RateLimitHeaders;
use crate::Route;

/// Identifies a rate limit bucket.
///
/// A route starts out on a [`BucketId::Pending`] bucket of its own. Once the
/// server names the real bucket, the route moves to the
/// [`BucketId::Assigned`] one, which other routes may share.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BucketId {
    /// Placeholder until the server reveals the bucket of this route
    Pending(Route),
    /// Bucket id as sent by the server in `x-ratelimit-bucket`
    Assigned(String),
}

impl Display for BucketId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending(route) => write!(f, "pending:{route}"),
            Self::Assigned(id) => f.write_str(id),
        }
    }
}

/// What is known about the calls left in a bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quota {
    /// Calls left before `reset_at`
    pub remaining: u32,
    /// Calls per window, once known
    pub limit: Option<u32>,
    /// When the window resets, once known
    pub reset_at: Option<Instant>,
}

impl Default for Quota {
    /// Unknown buckets admit one call at a time until the server says more.
    fn default() -> Self {
        Self {
            remaining: 1,
            limit: None,
            reset_at: None,
        }
    }
}

impl Quota {
    fn apply(&mut self, headers: &RateLimitHeaders, now: Instant) {
        if let Some(limit) = headers.limit {
            self.limit = Some(limit);
        }
        if let Some(remaining) = headers.remaining {
            self.remaining = remaining;
        }
        if let Some(reset_after) = headers.reset_after {
            self.reset_at = Some(now + reset_after);
        }
    }

    /// Start a new window.
    fn replenish(&mut self) {
        self.remaining = self.limit.unwrap_or(1).max(1);
        self.reset_at = None;
    }

    /// Mark the bucket exhausted until at least `until`.
    fn exhaust_until(&mut self, until: Instant) {
        self.remaining = 0;
        self.reset_at = Some(self.reset_at.map_or(until, |reset_at| reset_at.max(until)));
    }
}

/// One rate limit bucket and the gate serializing calls on it.
#[derive(Debug, Clone)]
pub struct BucketState {
    id: BucketId,
    gate: Arc<AsyncMutex<Quota>>,
}

impl BucketState {
    fn new(id: BucketId, quota: Quota) -> Self {
        Self {
            id,
            gate: Arc::new(AsyncMutex::new(quota)),
        }
    }

    #[must_use]
    pub const fn id(&self) -> &BucketId {
        &self.id
    }

    /// Current quota, unless a call holds the gate right now
    #[must_use]
    pub fn quota(&self) -> Option<Quota> {
        self.gate.try_lock().ok().map(|quota| *quota)
    }
}

/// Tracks rate limit buckets and which route uses which bucket.
///
/// Calls on the same bucket take turns: [`BucketTracker::await_turn`] hands
/// out a [`Turn`] only while no other call holds the bucket, and only when
/// the bucket has calls left.
#[derive(Debug, Default)]
pub struct BucketTracker {
    routes: DashMap<Route, BucketId>,
    buckets: DashMap<BucketId, BucketState>,
    global_pause: Mutex<Option<Instant>>,
}

impl BucketTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The bucket `route` currently maps to
    #[must_use]
    pub fn bucket_of(&self, route: Route) -> BucketId {
        self.routes
            .get(&route)
            .map_or(BucketId::Pending(route), |id| id.value().clone())
    }

    /// The state of the bucket `route` currently maps to, if it exists yet
    #[must_use]
    pub fn bucket_state(&self, route: Route) -> Option<BucketState> {
        let id = self.bucket_of(route);
        self.buckets.get(&id).map(|state| state.value().clone())
    }

    /// Number of buckets created so far, pending ones included
    #[must_use]
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Until when all calls are paused, if they are
    #[must_use]
    pub fn global_pause(&self) -> Option<Instant> {
        let pause = *self
            .global_pause
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        pause.filter(|until| *until > Instant::now())
    }

    /// Pause all calls on all buckets until `until`.
    pub fn pause_globally(&self, until: Instant) {
        let mut pause = self
            .global_pause
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *pause = Some(pause.map_or(until, |current| current.max(until)));
    }

    /// Wait until a call on `route` may be sent.
    ///
    /// The returned [`Turn`] holds the bucket's gate until it is dropped.
    /// If the bucket has no calls left, this waits for its reset while
    /// holding the gate, so later callers queue behind.
    pub async fn await_turn(&self, route: Route) -> Turn<'_> {
        loop {
            while let Some(until) = self.global_pause() {
                log::debug!("Global rate limit active, `{route}` waits until it lifts");
                sleep_until(until).await;
            }

            let id = self.bucket_of(route);
            let gate = self.bucket(&id).gate;
            let mut quota = gate.lock_owned().await;

            let current = self.bucket_of(route);
            if current != id {
                log::debug!("Route `{route}` moved from bucket {id} to {current} while waiting");
                continue;
            }

            // A global limit may have been hit while this call was queued
            if self.global_pause().is_some() {
                drop(quota);
                continue;
            }

            if quota.remaining == 0 {
                if let Some(reset_at) = quota.reset_at
                    && reset_at > Instant::now()
                {
                    log::debug!(
                        "Bucket {id} exhausted, `{route}` waits {}ms for the reset",
                        (reset_at - Instant::now()).as_millis()
                    );
                    sleep_until(reset_at).await;
                }
                quota.replenish();
            }
            quota.remaining = quota.remaining.saturating_sub(1);

            return Turn {
                tracker: self,
                route,
                bucket: id,
                quota,
            };
        }
    }

    /// Get or create the state of bucket `id`.
    fn bucket(&self, id: &BucketId) -> BucketState {
        self.buckets
            .entry(id.clone())
            .or_insert_with(|| BucketState::new(id.clone(), Quota::default()))
            .value()
            .clone()
    }
}

/// Permission to send one call, holding the gate of its bucket.
///
/// Dropping the turn releases the gate, whatever happened to the call.
#[derive(Debug)]
pub struct Turn<'a> {
    tracker: &'a BucketTracker,
    route: Route,
    bucket: BucketId,
    quota: OwnedMutexGuard<Quota>,
}

impl Turn<'_> {
    #[must_use]
    pub const fn route(&self) -> Route {
        self.route
    }

    /// The bucket whose gate is held
    #[must_use]
    pub const fn bucket(&self) -> &BucketId {
        &self.bucket
    }

    /// Quota of the held bucket, as seen by this call
    #[must_use]
    pub fn quota(&self) -> Quota {
        *self.quota
    }

    /// Learn from the rate limit headers of the response.
    ///
    /// If the server names a bucket other than the held one, the route is
    /// remapped to it and the headers are applied there. Calls already
    /// charged to the held bucket stay charged.
    pub fn complete(&mut self, headers: &HeaderMap) {
        let headers = RateLimitHeaders::parse(headers);
        if headers.is_empty() {
            return;
        }
        let now = Instant::now();

        let Some(server_id) = headers.bucket.clone().map(BucketId::Assigned) else {
            self.quota.apply(&headers, now);
            return;
        };
        if server_id == self.bucket {
            self.quota.apply(&headers, now);
            return;
        }

        match self.tracker.buckets.entry(server_id.clone()) {
            Entry::Vacant(entry) => {
                let mut quota = Quota::default();
                quota.apply(&headers, now);
                entry.insert(BucketState::new(server_id.clone(), quota));
            }
            Entry::Occupied(entry) => {
                let state = entry.get().clone();
                drop(entry);
                match state.gate.try_lock() {
                    Ok(mut quota) => quota.apply(&headers, now),
                    // The holder will learn the same from its own response
                    Err(_) => log::debug!("Bucket {server_id} busy, not updating it"),
                }
            }
        }

        let previous = self.tracker.routes.insert(self.route, server_id.clone());
        if previous.as_ref() != Some(&server_id) {
            log::debug!(
                "Route `{}` now uses bucket {server_id} (was {})",
                self.route,
                previous.unwrap_or(BucketId::Pending(self.route))
            );
        }
    }

    /// Record a `429`: the held bucket (or, for a global limit, every
    /// bucket) admits no calls for `retry_after`.
    pub fn rate_limited(&mut self, retry_after: Duration, global: bool) {
        let until = Instant::now() + retry_after;
        if global {
            log::warn!(
                "Global rate limit hit on `{}`, pausing all calls for {}ms",
                self.route,
                retry_after.as_millis()
            );
            self.tracker.pause_globally(until);
        } else {
            log::warn!(
                "Rate limit hit on `{}` (bucket {}), retrying in {}ms",
                self.route,
                self.bucket,
                retry_after.as_millis()
            );
            self.quota.exhaust_until(until);

            // The response may have moved the route to another bucket
            let current = self.tracker.bucket_of(self.route);
            if current != self.bucket
                && let Some(state) = self.tracker.buckets.get(&current).map(|s| s.value().clone())
            {
                match state.gate.try_lock() {
                    Ok(mut quota) => quota.exhaust_until(until),
                    Err(_) => log::debug!("Bucket {current} busy, not marking it exhausted"),
                }
            }
        }
    }
}
