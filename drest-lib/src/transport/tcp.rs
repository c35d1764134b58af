use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;

use super::{Connector, Transport};
use crate::{ErrorKind, Result};

/// Plaintext connector, for local proxies and test servers.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    connect_timeout: Duration,
}

impl TcpConnector {
    /// Create a connector that gives up after `connect_timeout`.
    #[must_use]
    pub const fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, host: &str, port: u16) -> Result<Transport> {
        let peer = format!("{host}:{port}");
        let stream = connect_tcp(&peer, host, port, self.connect_timeout).await?;
        Ok(Transport::new(peer, stream))
    }
}

/// Resolve `host` and open a TCP connection within `timeout`.
pub(super) async fn connect_tcp(
    peer: &str,
    host: &str,
    port: u16,
    timeout: Duration,
) -> Result<TcpStream> {
    let stream = tokio::time::timeout(timeout, TcpStream::connect((host, port)))
        .await
        .map_err(|_| ErrorKind::connection(peer, format!("connect timed out after {timeout:?}"), None))?
        .map_err(|e| ErrorKind::connection(peer, format!("cannot connect: {e}"), Some(e)))?;

    if let Err(e) = stream.set_nodelay(true) {
        log::debug!("Cannot disable Nagle's algorithm for {peer}: {e}");
    }
    Ok(stream)
}
