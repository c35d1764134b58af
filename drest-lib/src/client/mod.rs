//! Sending calls to the REST API.
//!
//! This module defines two structs, [`Client`] and [`ClientBuilder`].
//! `Client` sends [`Request`]s and returns [`Response`]s, taking care of
//! rate limits, connection reuse and retries on `429 Too Many Requests`.
//! `ClientBuilder` exposes a finer level of granularity for building
//! a `Client`.
#![allow(clippy::module_name_repetitions)]
use std::{sync::Arc, time::Duration};

use dashmap::DashMap;
use http::StatusCode;
use secrecy::SecretString;
use tokio::time::Instant;
use typed_builder::TypedBuilder;

use crate::{
    ErrorKind, Request, Response, Result, Route,
    codec::RequestEncoder,
    pool::ConnectionPool,
    quirks::Quirks,
    ratelimit::{
        BucketId, BucketTracker, RateLimitConfig, RateLimitHeaders, RouteStats, RouteStatsMap,
        parse_rate_limited_body, parse_retry_after,
    },
    retry::RetryExt,
    transport::{Connector, TcpConnector, TlsConnector, TrustStore},
};

/// Default API host, `discord.com`.
pub const DEFAULT_HOST: &str = "discord.com";
/// Default port, 443.
pub const DEFAULT_PORT: u16 = 443;
/// Default path prefix of all calls, `/api/v10`.
pub const DEFAULT_API_BASE: &str = "/api/v10";
/// Default deadline in seconds for a call, retries included, 30.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
/// Default time to wait for more response bytes, 4.5s.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(4500);
/// Default user agent, in the format the API asks bots to use.
pub const DEFAULT_USER_AGENT: &str = concat!(
    "DiscordBot (https://crates.io/crates/drest-lib, ",
    env!("CARGO_PKG_VERSION"),
    ")"
);

/// A timeout for only the connect phase (TCP and TLS handshake).
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Builder for [`Client`].
///
/// ```
/// use drest_lib::ClientBuilder;
///
/// # fn main() -> drest_lib::Result<()> {
/// let _client = ClientBuilder::builder()
///     .token(Some("my-bot-token".into()))
///     .plaintext(true)
///     .build()
///     .client()?;
/// # Ok(())
/// # }
/// ```
#[derive(TypedBuilder, Debug, Clone)]
#[builder(field_defaults(default, setter(into)))]
#[builder(builder_method(doc = "
Create a builder for building `ClientBuilder`.

On the builder call, call methods with same name as its fields to set their values.

Finally, call `.build()` to create the instance of `ClientBuilder`.
"))]
pub struct ClientBuilder {
    /// Bot token, sent as `Authorization: Bot <token>`.
    ///
    /// Without a token only unauthenticated routes work.
    token: Option<SecretString>,

    /// Host all calls go to.
    #[builder(default_code = "String::from(DEFAULT_HOST)")]
    host: String,

    /// Port of [`ClientBuilder::host`].
    #[builder(default = DEFAULT_PORT)]
    port: u16,

    /// Prefix put in front of every request path.
    #[builder(default_code = "String::from(DEFAULT_API_BASE)")]
    api_base: String,

    /// User-agent sent with every call.
    #[builder(default_code = "String::from(DEFAULT_USER_AGENT)")]
    user_agent: String,

    /// Deadline for a whole call, rate limit waits and retries included.
    ///
    /// [`Request::timeout`] overrides this per call.
    #[builder(default = Duration::from_secs(DEFAULT_TIMEOUT_SECS))]
    timeout: Duration,

    /// How long to wait for more bytes of a response before giving up on
    /// the connection.
    #[builder(default = DEFAULT_READ_TIMEOUT)]
    read_timeout: Duration,

    /// Timeout for connecting, TLS handshake included.
    #[builder(default = CONNECT_TIMEOUT)]
    connect_timeout: Duration,

    /// Root certificates to verify the server against.
    trust_store: TrustStore,

    /// Talk plain HTTP instead of HTTPS, e.g. to a local proxy that does
    /// TLS itself.
    plaintext: bool,

    /// Use this connector instead of building one from
    /// [`ClientBuilder::trust_store`] and [`ClientBuilder::plaintext`].
    #[builder(setter(strip_option))]
    connector: Option<Arc<dyn Connector>>,

    /// Share bucket state with other clients talking to the same API with
    /// the same token.
    #[builder(setter(strip_option))]
    tracker: Option<Arc<BucketTracker>>,

    /// Extra pacing for routes with limits the server does not advertise.
    quirks: Quirks,

    /// How `429` responses are retried.
    rate_limit: RateLimitConfig,
}

impl Default for ClientBuilder {
    #[inline]
    fn default() -> Self {
        Self::builder().build()
    }
}

impl ClientBuilder {
    /// Instantiates a [`Client`].
    ///
    /// # Errors
    ///
    /// Returns an `Err` if:
    /// - The host, token or user-agent are not valid header values.
    /// - The trust store cannot be loaded or is empty.
    pub fn client(self) -> Result<Client> {
        let connector: Arc<dyn Connector> = match self.connector {
            Some(connector) => connector,
            None if self.plaintext => Arc::new(TcpConnector::new(self.connect_timeout)),
            None => Arc::new(TlsConnector::new(&self.trust_store, self.connect_timeout)?),
        };

        let encoder = RequestEncoder::new(
            &self.host,
            self.port,
            &self.api_base,
            self.token.as_ref(),
            &self.user_agent,
        )?;

        Ok(Client {
            encoder,
            pool: Arc::new(ConnectionPool::new(connector, self.host, self.port)),
            tracker: self.tracker.unwrap_or_default(),
            quirks: self.quirks,
            rate_limit: self.rate_limit,
            timeout: self.timeout,
            read_timeout: self.read_timeout,
            stats: Arc::new(DashMap::new()),
        })
    }
}

/// Sends calls to the REST API.
///
/// Cloning is cheap; clones share connections, bucket state and statistics.
/// See [`ClientBuilder`] for the configuration options.
#[derive(Debug, Clone)]
pub struct Client {
    /// Turns requests into bytes, standard headers included
    encoder: RequestEncoder,
    /// One connection per route
    pool: Arc<ConnectionPool>,
    /// Rate limit buckets
    tracker: Arc<BucketTracker>,
    /// Extra pacing for some routes
    quirks: Quirks,
    /// Retry policy for `429`s
    rate_limit: RateLimitConfig,
    /// Default deadline for a call
    timeout: Duration,
    /// Deadline for each wait on response bytes
    read_timeout: Duration,
    /// Per-route counters
    stats: Arc<DashMap<Route, RouteStats>>,
}

impl Client {
    /// Send `request` and wait for its response.
    ///
    /// Waits for the route's rate limit bucket first. A `429` is retried
    /// after the advised wait, up to [`RateLimitConfig::max_retries`] times.
    /// Any other status, including `4xx` and `5xx`, is returned as a normal
    /// response.
    ///
    /// # Errors
    ///
    /// This returns an `Err` if
    /// - connecting fails, or the connection breaks mid-call,
    /// - the server does not speak HTTP/1.1,
    /// - the call is still rate limited after all retries,
    /// - the deadline elapses.
    pub async fn execute(&self, request: Request) -> Result<Response> {
        let route = request.route;
        let deadline = request.timeout.unwrap_or(self.timeout);

        let result = tokio::time::timeout(deadline, self.execute_with_retries(&request))
            .await
            .unwrap_or(Err(ErrorKind::Timeout { route, deadline }));

        if let Err(e) = &result {
            log::debug!("{request} failed: {e}");
            self.stats.entry(route).or_default().record_failure();
        }
        result
    }

    async fn execute_with_retries(&self, request: &Request) -> Result<Response> {
        let route = request.route;
        let bytes = self.encoder.encode(request);
        let mut retries = 0;

        loop {
            let mut turn = self.tracker.await_turn(route).await;
            self.quirks.apply(route).await;

            let start = Instant::now();
            let response = self.send(route, turn.bucket(), &bytes).await?;
            turn.complete(&response.headers);
            self.stats
                .entry(route)
                .or_default()
                .record_response(response.status.as_u16(), start.elapsed());
            log::debug!("{request} -> {}", response.status);

            if response.status != StatusCode::TOO_MANY_REQUESTS {
                return Ok(response);
            }

            let (retry_after, global) = self.retry_after(&response);
            turn.rate_limited(retry_after, global);
            drop(turn);

            if retries >= self.rate_limit.max_retries {
                return Err(ErrorKind::RateLimitExceeded {
                    route,
                    retries,
                    retry_after,
                    headers: response.headers,
                });
            }
            retries += 1;
            tokio::time::sleep(retry_after).await;
        }
    }

    /// One round trip, reconnecting once if a reused connection turns out
    /// to be dead.
    async fn send(&self, route: Route, bucket: &BucketId, bytes: &[u8]) -> Result<Response> {
        let mut connection = self.pool.acquire(route).await?;

        let response = match connection.round_trip(bytes, self.read_timeout).await {
            Ok(response) => response,
            Err(e) if e.should_retry() && connection.is_reused() && !connection.received_any() => {
                log::debug!("Connection for `{route}` went stale ({e}), reconnecting");
                self.stats.entry(route).or_default().record_reconnect();
                drop(connection);
                connection = self.pool.connect(route).await?;
                connection.round_trip(bytes, self.read_timeout).await?
            }
            Err(e) => return Err(e),
        };

        connection.set_bucket(bucket.clone());
        if response.closes_connection() {
            log::debug!("Server closes the connection for `{route}`");
        } else {
            self.pool.release(connection);
        }
        Ok(response)
    }

    /// How long to wait after a `429`, and whether the global limit was hit
    fn retry_after(&self, response: &Response) -> (Duration, bool) {
        let headers = RateLimitHeaders::parse(&response.headers);
        let (wait, global) = if let Some((wait, global)) = parse_rate_limited_body(&response.body) {
            (wait, global || headers.is_global())
        } else if let Some(wait) = response
            .headers
            .get(http::header::RETRY_AFTER)
            .and_then(|value| parse_retry_after(value).ok())
        {
            (wait, headers.is_global())
        } else {
            (self.rate_limit.default_retry_wait, headers.is_global())
        };
        (self.rate_limit.cap(wait), global)
    }

    /// The bucket tracker, e.g. to share it with another client
    #[must_use]
    pub fn tracker(&self) -> &Arc<BucketTracker> {
        &self.tracker
    }

    /// Counters for the calls on `route`
    #[must_use]
    pub fn route_stats(&self, route: Route) -> Option<RouteStats> {
        self.stats.get(&route).map(|stats| stats.value().clone())
    }

    /// Counters for every route that was called
    #[must_use]
    pub fn all_route_stats(&self) -> RouteStatsMap {
        self.stats
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect()
    }

    /// Close all idle connections.
    pub async fn shutdown(&self) {
        self.pool.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use http::Method;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::test_utils::{Script, ScriptedConnector, rate_limited, response};

    fn client(connector: &Arc<ScriptedConnector>, rate_limit: RateLimitConfig) -> Client {
        ClientBuilder::builder()
            .token(Some(SecretString::from("t0ken")))
            .connector(connector.clone() as Arc<dyn Connector>)
            .quirks(Quirks::none())
            .rate_limit(rate_limit)
            .build()
            .client()
            .unwrap()
    }

    fn get_user() -> Request {
        Request::new(Route::GetUser, Method::GET, "/users/@me")
    }

    fn ok() -> Vec<u8> {
        response(200, &[], r#"{"id":"1"}"#)
    }

    #[test]
    fn test_default_builder() {
        let builder = format!("{:?}", ClientBuilder::default());
        assert!(builder.contains(&format!("host: {DEFAULT_HOST:?}")));
        assert!(builder.contains(&format!("api_base: {DEFAULT_API_BASE:?}")));
        assert!(builder.contains("plaintext: false"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute() {
        let connector = Arc::new(ScriptedConnector::new([Script::new().respond(ok())]));
        let client = client(&connector, RateLimitConfig::default());

        let response = client.execute(get_user()).await.unwrap();
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.text(), r#"{"id":"1"}"#);

        let sent = &connector.requests()[0].text;
        assert!(sent.starts_with("GET /api/v10/users/@me HTTP/1.1\r\n"));
        assert!(sent.contains("Authorization: Bot t0ken\r\n"));
        assert!(sent.contains(&format!("User-Agent: {DEFAULT_USER_AGENT}\r\n")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_statuses_are_responses() {
        let connector = Arc::new(ScriptedConnector::new([
            Script::new().respond(response(404, &[], "")).respond(response(503, &[], "")),
        ]));
        let client = client(&connector, RateLimitConfig::default());

        assert_eq!(
            client.execute(get_user()).await.unwrap().status,
            StatusCode::NOT_FOUND
        );
        let response = client.execute(get_user()).await.unwrap();
        assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(response.retry_warranted());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connection_is_reused() {
        let connector = Arc::new(ScriptedConnector::new([Script::new().respond(ok()).respond(ok())]));
        let client = client(&connector, RateLimitConfig::default());

        client.execute(get_user()).await.unwrap();
        client.execute(get_user()).await.unwrap();
        assert_eq!(connector.connections(), 1);
        assert_eq!(client.route_stats(Route::GetUser).unwrap().total_requests, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_connection_is_transparent() {
        // The first connection is closed by the server after one response
        let connector = Arc::new(ScriptedConnector::new([
            Script::new().respond(ok()),
            Script::new().respond(ok()),
        ]));
        let client = client(&connector, RateLimitConfig::default());

        client.execute(get_user()).await.unwrap();
        let response = client.execute(get_user()).await.unwrap();
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(connector.connections(), 2);

        let stats = client.route_stats(Route::GetUser).unwrap();
        assert_eq!(stats.reconnects, 1);
        assert_eq!(stats.failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connection_close_is_honored() {
        let connector = Arc::new(ScriptedConnector::new([
            Script::new()
                .respond(response(200, &[("Connection", "close")], ""))
                .respond(ok()),
            Script::new().respond(ok()),
        ]));
        let client = client(&connector, RateLimitConfig::default());

        client.execute(get_user()).await.unwrap();
        client.execute(get_user()).await.unwrap();
        let requests = connector.requests();
        assert_eq!(requests[0].connection, 0);
        assert_eq!(requests[1].connection, 1);
        assert_eq!(client.route_stats(Route::GetUser).unwrap().reconnects, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_header() {
        let connector = Arc::new(ScriptedConnector::new([Script::new()
            .respond(response(429, &[("Retry-After", "2")], ""))
            .respond(ok())]));
        let client = client(&connector, RateLimitConfig::default());

        let response = client.execute(get_user()).await.unwrap();
        assert_eq!(response.status, StatusCode::OK);

        let requests = connector.requests();
        assert_eq!(requests.len(), 2);
        assert!(requests[1].at - requests[0].at >= Duration::from_secs(2));
        assert_eq!(client.route_stats(Route::GetUser).unwrap().rate_limited, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_body_wins_over_header() {
        let mut limited = rate_limited("0.5", false);
        // Splice a header in front of the existing ones
        let at = limited.iter().position(|&b| b == b'\n').unwrap() + 1;
        limited.splice(at..at, b"Retry-After: 5\r\n".iter().copied());

        let connector = Arc::new(ScriptedConnector::new([Script::new()
            .respond(limited)
            .respond(ok())]));
        let client = client(&connector, RateLimitConfig::default());

        client.execute(get_user()).await.unwrap();
        let requests = connector.requests();
        let waited = requests[1].at - requests[0].at;
        assert!(waited >= Duration::from_millis(500));
        assert!(waited < Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_wait_is_capped() {
        let connector = Arc::new(ScriptedConnector::new([Script::new()
            .respond(rate_limited("3600", false))
            .respond(ok())]));
        let config = RateLimitConfig::from_options(None, None, Some(Duration::from_secs(1)));
        let client = client(&connector, config);

        client.execute(get_user()).await.unwrap();
        let requests = connector.requests();
        assert_eq!(requests[1].at - requests[0].at, Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_exhausted() {
        let connector = Arc::new(ScriptedConnector::new([Script::new()
            .respond(rate_limited("1", false))
            .respond(rate_limited("1", false))
            .respond(rate_limited("1", false))]));
        let config = RateLimitConfig::from_options(Some(2), None, None);
        let client = client(&connector, config);

        let err = client.execute(get_user()).await.unwrap_err();
        match err {
            ErrorKind::RateLimitExceeded {
                route,
                retries,
                retry_after,
                ..
            } => {
                assert_eq!(route, Route::GetUser);
                assert_eq!(retries, 2);
                assert_eq!(retry_after, Duration::from_secs(1));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(connector.requests().len(), 3);
        assert_eq!(client.route_stats(Route::GetUser).unwrap().failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_global_limit_pauses_other_routes() {
        let connector = Arc::new(ScriptedConnector::new([
            Script::new().respond(rate_limited("1", true)),
            Script::new().respond(ok()),
        ]));
        let config = RateLimitConfig::from_options(Some(0), None, None);
        let client = client(&connector, config);

        assert!(client.execute(get_user()).await.is_err());
        assert!(client.tracker().global_pause().is_some());

        let guild = Request::new(Route::GetGuild, Method::GET, "/guilds/1");
        client.execute(guild).await.unwrap();
        let requests = connector.requests();
        assert!(requests[1].at - requests[0].at >= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_bucket_is_learned_and_respected() {
        let exhausted = response(
            200,
            &[
                ("X-RateLimit-Bucket", "b1"),
                ("X-RateLimit-Limit", "1"),
                ("X-RateLimit-Remaining", "0"),
                ("X-RateLimit-Reset-After", "3"),
            ],
            "",
        );
        let connector = Arc::new(ScriptedConnector::new([Script::new()
            .respond(exhausted)
            .respond(ok())]));
        let client = client(&connector, RateLimitConfig::default());

        client.execute(get_user()).await.unwrap();
        assert_eq!(
            client.tracker().bucket_of(Route::GetUser),
            BucketId::Assigned("b1".into())
        );
        client.execute(get_user()).await.unwrap();

        let requests = connector.requests();
        assert!(requests[1].at - requests[0].at >= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_releases_bucket() {
        let connector = Arc::new(ScriptedConnector::new([
            Script::new().stall(),
            Script::new().respond(ok()),
        ]));
        let client = client(&connector, RateLimitConfig::default());

        let err = client
            .execute(get_user().with_timeout(Duration::from_secs(1)))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ErrorKind::Timeout { route: Route::GetUser, deadline } if deadline == Duration::from_secs(1)
        ));

        // Neither the gate nor the stalled connection are held on to
        client.execute(get_user()).await.unwrap();
        assert_eq!(connector.connections(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_while_waiting_for_bucket() {
        let exhausted = response(
            200,
            &[
                ("X-RateLimit-Bucket", "b1"),
                ("X-RateLimit-Limit", "1"),
                ("X-RateLimit-Remaining", "0"),
                ("X-RateLimit-Reset-After", "60"),
            ],
            "",
        );
        let connector = Arc::new(ScriptedConnector::new([
            Script::new().respond(exhausted).respond(ok()),
            Script::new().respond(ok()),
        ]));
        let client = client(&connector, RateLimitConfig::default());
        client.execute(get_user()).await.unwrap();

        // One call sleeps for the reset holding the gate, the other queues
        let (sleeping, queued) = tokio::join!(
            client.execute(get_user().with_timeout(Duration::from_secs(2))),
            client.execute(get_user().with_timeout(Duration::from_secs(1))),
        );
        for err in [sleeping.unwrap_err(), queued.unwrap_err()] {
            assert!(matches!(err, ErrorKind::Timeout { route: Route::GetUser, .. }));
        }
        assert_eq!(connector.requests().len(), 1);

        // Other routes are not held back
        let start = Instant::now();
        let guild = Request::new(Route::GetGuild, Method::GET, "/guilds/1");
        client.execute(guild).await.unwrap();
        assert_eq!(start.elapsed(), Duration::ZERO);

        // The route itself proceeds once the bucket resets
        client.execute(get_user()).await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(57));
        assert_eq!(connector.requests().len(), 3);
        assert_eq!(client.route_stats(Route::GetUser).unwrap().failures, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_timeout() {
        let connector = Arc::new(ScriptedConnector::new([
            Script::new().respond_after(Duration::from_secs(4), ok()),
            Script::new().respond_after(Duration::from_secs(5), ok()),
        ]));
        let client = client(&connector, RateLimitConfig::default());

        // Slow, but within the read timeout
        client.execute(get_user()).await.unwrap();

        let guild = Request::new(Route::GetGuild, Method::GET, "/guilds/1");
        let err = client.execute(guild).await.unwrap_err();
        assert!(err.is_connection());
        assert_eq!(
            err.io_error().map(std::io::Error::kind),
            Some(std::io::ErrorKind::TimedOut)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_response_discards_connection() {
        let connector = Arc::new(ScriptedConnector::new([
            Script::new().respond(b"HTTP/9.9 200 OK\r\n\r\n").respond(ok()),
            Script::new().respond(ok()),
        ]));
        let client = client(&connector, RateLimitConfig::default());

        let err = client.execute(get_user()).await.unwrap_err();
        assert!(matches!(err, ErrorKind::MalformedResponse(_)));

        client.execute(get_user()).await.unwrap();
        assert_eq!(connector.connections(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_failure() {
        let connector = Arc::new(ScriptedConnector::new([Script::refuse(), Script::refuse()]));
        let client = client(&connector, RateLimitConfig::default());

        let err = client.execute(get_user()).await.unwrap_err();
        assert!(err.is_connection());
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_route_stats() {
        let connector = Arc::new(ScriptedConnector::new([
            Script::new().respond(ok()),
            Script::new().respond(ok()).respond(ok()),
        ]));
        let client = client(&connector, RateLimitConfig::default());

        client.execute(get_user()).await.unwrap();
        let guild = || Request::new(Route::GetGuild, Method::GET, "/guilds/1");
        client.execute(guild()).await.unwrap();
        client.execute(guild()).await.unwrap();

        let stats = client.all_route_stats();
        assert_eq!(stats.len(), 2);
        assert_eq!(stats.get(Route::GetGuild).unwrap().total_requests, 2);
        assert_eq!(stats.get(Route::GetUser).unwrap().successful_requests, 1);
        client.shutdown().await;
    }

    #[test]
    fn test_missing_trust_store() {
        let result = ClientBuilder::builder()
            .trust_store(TrustStore::Certificates(vec![]))
            .build()
            .client();
        assert!(matches!(result, Err(ErrorKind::MissingTrustedRoots)));
    }
}
