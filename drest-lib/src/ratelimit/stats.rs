use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use serde::Serialize;
use serde::ser::SerializeStruct;
use tokio::time::Instant;

use super::window::Window;
use crate::Route;

/// How long after a `429` a route still counts as rate limited
const RECENT_RATE_LIMIT: Duration = Duration::from_secs(60);

/// A map from routes to their [`RouteStats`], ordered by route
#[derive(Debug, Default, Clone, Serialize)]
pub struct RouteStatsMap(BTreeMap<Route, RouteStats>);

impl RouteStatsMap {
    /// Routes by number of requests, busiest first
    #[must_use]
    pub fn sorted(&self) -> Vec<(Route, RouteStats)> {
        let mut sorted: Vec<_> = self.0.clone().into_iter().collect();
        sorted.sort_by_key(|(_, stats)| std::cmp::Reverse(stats.total_requests));
        sorted
    }

    #[must_use]
    pub fn get(&self, route: Route) -> Option<&RouteStats> {
        self.0.get(&route)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(Route, RouteStats)> for RouteStatsMap {
    fn from_iter<I: IntoIterator<Item = (Route, RouteStats)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Counters for the calls made on one [`Route`]
#[derive(Debug, Clone, Default)]
pub struct RouteStats {
    /// Responses received, including `429`s that were retried
    pub total_requests: u64,
    /// `2xx` responses
    pub successful_requests: u64,
    /// `429` responses
    pub rate_limited: u64,
    /// `4xx` responses other than `429`
    pub client_errors: u64,
    /// `5xx` responses
    pub server_errors: u64,
    /// Connections opened again after the previous one went stale
    pub reconnects: u64,
    /// Calls that failed without a response
    pub failures: u64,
    /// When the route last received a `429`
    pub last_rate_limit: Option<Instant>,
    /// Most recent round trip times
    pub request_times: Window<Duration>,
    /// Responses per status code
    pub status_codes: HashMap<u16, u64>,
}

impl RouteStats {
    /// Record a response and how long the round trip took
    pub fn record_response(&mut self, status_code: u16, request_time: Duration) {
        self.total_requests += 1;
        *self.status_codes.entry(status_code).or_insert(0) += 1;

        match status_code {
            200..=299 => self.successful_requests += 1,
            429 => {
                self.rate_limited += 1;
                self.last_rate_limit = Some(Instant::now());
            }
            400..=499 => self.client_errors += 1,
            500..=599 => self.server_errors += 1,
            _ => {}
        }

        self.request_times.push(request_time);
    }

    /// Record a call that ended in an error instead of a response
    pub const fn record_failure(&mut self) {
        self.failures += 1;
    }

    /// Record a reconnect
    pub const fn record_reconnect(&mut self) {
        self.reconnects += 1;
    }

    #[must_use]
    pub fn median_request_time(&self) -> Option<Duration> {
        let times = self.request_times.sorted();
        if times.is_empty() {
            return None;
        }

        let mid = times.len() / 2;
        if times.len().is_multiple_of(2) {
            Some((times[mid - 1] + times[mid]) / 2)
        } else {
            Some(times[mid])
        }
    }

    #[must_use]
    pub fn average_request_time(&self) -> Option<Duration> {
        if self.request_times.is_empty() {
            return None;
        }
        let total: Duration = self.request_times.iter().sum();
        #[allow(clippy::cast_possible_truncation)]
        Some(total / (self.request_times.len() as u32))
    }

    /// Share of `2xx` responses (0.0 to 1.0); 1.0 while nothing was sent
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            return 1.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let rate = self.successful_requests as f64 / self.total_requests as f64;
        rate
    }

    /// Whether the route received a `429` within the last minute
    #[must_use]
    pub fn is_currently_rate_limited(&self) -> bool {
        self.last_rate_limit
            .is_some_and(|at| at.elapsed() < RECENT_RATE_LIMIT)
    }

    /// One-line human-readable summary
    #[must_use]
    pub fn summary(&self) -> String {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let success_pct = (self.success_rate() * 100.0).round() as u64;
        let median = self
            .median_request_time()
            .map_or_else(|| "N/A".to_string(), |d| format!("{}ms", d.as_millis()));

        format!(
            "{} requests ({}% success, {} rate limited, {} reconnects), median: {}",
            self.total_requests, success_pct, self.rate_limited, self.reconnects, median
        )
    }
}

impl Serialize for RouteStats {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let median_request_time_ms = self.median_request_time().map(|d| d.as_millis());

        let mut s = serializer.serialize_struct("RouteStats", 9)?;
        s.serialize_field("total_requests", &self.total_requests)?;
        s.serialize_field("successful_requests", &self.successful_requests)?;
        s.serialize_field("success_rate", &self.success_rate())?;
        s.serialize_field("rate_limited", &self.rate_limited)?;
        s.serialize_field("client_errors", &self.client_errors)?;
        s.serialize_field("server_errors", &self.server_errors)?;
        s.serialize_field("reconnects", &self.reconnects)?;
        s.serialize_field("median_request_time_ms", &median_request_time_ms)?;
        s.serialize_field("status_codes", &self.status_codes)?;
        s.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_responses() {
        let mut stats = RouteStats::default();
        assert!((stats.success_rate() - 1.0).abs() < f64::EPSILON);

        stats.record_response(200, Duration::from_millis(100));
        stats.record_response(429, Duration::from_millis(200));
        stats.record_response(404, Duration::from_millis(150));
        stats.record_response(502, Duration::from_millis(120));

        assert_eq!(stats.total_requests, 4);
        assert_eq!(stats.successful_requests, 1);
        assert_eq!(stats.rate_limited, 1);
        assert_eq!(stats.client_errors, 1);
        assert_eq!(stats.server_errors, 1);
        assert_eq!(stats.status_codes.get(&429), Some(&1));
        assert!((stats.success_rate() - 0.25).abs() < f64::EPSILON);
        assert_eq!(
            stats.median_request_time(),
            Some(Duration::from_millis(135))
        );
        assert_eq!(
            stats.average_request_time(),
            Some(Duration::from_micros(142_500))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_recently() {
        let mut stats = RouteStats::default();
        assert!(!stats.is_currently_rate_limited());

        stats.record_response(429, Duration::from_millis(10));
        assert!(stats.is_currently_rate_limited());

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(!stats.is_currently_rate_limited());
    }

    #[test]
    fn test_summary() {
        let mut stats = RouteStats::default();
        stats.record_response(200, Duration::from_millis(150));
        stats.record_response(200, Duration::from_millis(250));
        stats.record_reconnect();

        assert_eq!(
            stats.summary(),
            "2 requests (100% success, 0 rate limited, 1 reconnects), median: 200ms"
        );
    }

    #[test]
    fn test_sorted_by_traffic() {
        let mut busy = RouteStats::default();
        busy.record_response(200, Duration::ZERO);
        busy.record_response(200, Duration::ZERO);
        let mut quiet = RouteStats::default();
        quiet.record_response(200, Duration::ZERO);

        let map: RouteStatsMap = [(Route::GetUser, quiet), (Route::PostMessage, busy)]
            .into_iter()
            .collect();
        let order: Vec<Route> = map.sorted().into_iter().map(|(route, _)| route).collect();
        assert_eq!(order, vec![Route::PostMessage, Route::GetUser]);
    }
}
