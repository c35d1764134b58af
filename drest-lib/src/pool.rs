use std::{
    collections::HashMap,
    fmt, io,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use crate::{
    ErrorKind, Response, Result, Route,
    codec::ResponseDecoder,
    ratelimit::BucketId,
    transport::{Connector, ReadOutcome, Transport},
};

/// A connection checked out for the calls on one route.
#[derive(Debug)]
pub struct RouteConnection {
    route: Route,
    transport: Transport,
    decoder: ResponseDecoder,
    bucket: Option<BucketId>,
    uses: u64,
    received: bool,
}

impl RouteConnection {
    fn new(route: Route, transport: Transport) -> Self {
        Self {
            route,
            transport,
            decoder: ResponseDecoder::new(),
            bucket: None,
            uses: 0,
            received: false,
        }
    }

    #[must_use]
    pub const fn route(&self) -> Route {
        self.route
    }

    /// Bucket of the last call made over this connection
    #[must_use]
    pub const fn bucket(&self) -> Option<&BucketId> {
        self.bucket.as_ref()
    }

    pub(crate) fn set_bucket(&mut self, bucket: BucketId) {
        self.bucket = Some(bucket);
    }

    /// Completed round trips
    #[must_use]
    pub const fn uses(&self) -> u64 {
        self.uses
    }

    /// Whether this connection served a call before
    #[must_use]
    pub const fn is_reused(&self) -> bool {
        self.uses > 0
    }

    /// Whether the last round trip received any byte
    #[must_use]
    pub const fn received_any(&self) -> bool {
        self.received
    }

    /// Send an encoded request and read the response.
    ///
    /// `read_timeout` bounds each wait for more bytes, not the whole response.
    ///
    /// # Errors
    ///
    /// Fails with [`ErrorKind::Connection`] on I/O errors, read stalls and
    /// premature EOF, and with [`ErrorKind::MalformedResponse`] if the bytes
    /// are not HTTP. The connection must not be reused after an error.
    pub async fn round_trip(&mut self, request: &[u8], read_timeout: Duration) -> Result<Response> {
        self.received = false;
        self.transport.write(request).await?;

        loop {
            let outcome = tokio::time::timeout(read_timeout, self.transport.read_available())
                .await
                .map_err(|_| {
                    ErrorKind::connection(
                        self.transport.peer(),
                        format!("no data within {}ms", read_timeout.as_millis()),
                        Some(io::Error::from(io::ErrorKind::TimedOut)),
                    )
                })??;

            match outcome {
                ReadOutcome::Data(bytes) => {
                    self.received = true;
                    if let Some(response) = self.decoder.feed(&bytes)? {
                        self.uses += 1;
                        return Ok(response);
                    }
                }
                ReadOutcome::Eof => {
                    let reason = if self.received {
                        "connection closed in the middle of a response"
                    } else {
                        "connection closed before any response"
                    };
                    return Err(ErrorKind::connection(
                        self.transport.peer(),
                        reason,
                        Some(io::Error::from(io::ErrorKind::UnexpectedEof)),
                    ));
                }
            }
        }
    }

    /// Whether the connection sits cleanly between responses
    fn is_clean(&self) -> bool {
        self.decoder.is_idle()
    }

    async fn close(self) {
        self.transport.close().await;
    }
}

/// One reusable connection per route, all to the same host.
///
/// Connections are checked out with [`ConnectionPool::acquire`] and only come
/// back through [`ConnectionPool::release`]. A connection that is never
/// released (error, timeout, cancelled call) is simply dropped, which closes
/// it, and the next call on the route connects anew.
pub struct ConnectionPool {
    connector: Arc<dyn Connector>,
    host: String,
    port: u16,
    idle: Mutex<HashMap<Route, RouteConnection>>,
}

impl ConnectionPool {
    #[must_use]
    pub fn new(connector: Arc<dyn Connector>, host: impl Into<String>, port: u16) -> Self {
        Self {
            connector,
            host: host.into(),
            port,
            idle: Mutex::new(HashMap::new()),
        }
    }

    /// Check out the idle connection for `route`, or open a new one.
    ///
    /// # Errors
    ///
    /// Fails with [`ErrorKind::Connection`] if connecting fails twice in a row.
    pub async fn acquire(&self, route: Route) -> Result<RouteConnection> {
        let idle = self.lock().remove(&route);
        if let Some(connection) = idle {
            log::debug!(
                "Reusing connection for `{route}` ({} calls so far)",
                connection.uses
            );
            return Ok(connection);
        }
        self.connect(route).await
    }

    /// Open a new connection for `route`, trying twice.
    ///
    /// # Errors
    ///
    /// Fails with the error of the second attempt.
    pub async fn connect(&self, route: Route) -> Result<RouteConnection> {
        let transport = match self.connector.connect(&self.host, self.port).await {
            Ok(transport) => transport,
            Err(e) if e.is_connection() => {
                log::debug!("Connecting for `{route}` failed ({e}), trying once more");
                self.connector.connect(&self.host, self.port).await?
            }
            Err(e) => return Err(e),
        };
        log::debug!("Opened connection to {} for `{route}`", transport.peer());
        Ok(RouteConnection::new(route, transport))
    }

    /// Return a connection after a clean round trip.
    ///
    /// Connections with unread bytes are dropped instead.
    pub fn release(&self, connection: RouteConnection) {
        if !connection.is_clean() {
            log::debug!(
                "Dropping connection for `{}`: unexpected extra bytes",
                connection.route
            );
            return;
        }
        // A concurrent call on the same route may have parked its own
        // connection meanwhile; the replaced one is closed on drop.
        self.lock().insert(connection.route, connection);
    }

    /// Drop the idle connection of `route`. Returns whether there was one.
    pub fn evict(&self, route: Route) -> bool {
        self.lock().remove(&route).is_some()
    }

    /// Number of idle connections
    #[must_use]
    pub fn idle_count(&self) -> usize {
        self.lock().len()
    }

    /// Close all idle connections gracefully.
    pub async fn shutdown(&self) {
        let idle: Vec<_> = self.lock().drain().map(|(_, connection)| connection).collect();
        for connection in idle {
            connection.close().await;
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Route, RouteConnection>> {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("connector", &self.connector)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("idle", &self.idle_count())
            .finish()
    }
}
