//! Byte pipes to the API host.
//!
//! A [`Transport`] owns one established connection (plain TCP or TCP plus a
//! TLS session) and knows nothing about HTTP. Transports are produced by a
//! [`Connector`], which is the seam between the connection pool and the
//! network: [`TlsConnector`] is used in production, [`TcpConnector`] talks
//! plaintext to local proxies and mock servers.

mod tcp;
mod tls;

use std::fmt;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::FutureExt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub use tcp::TcpConnector;
pub use tls::{TlsConnector, TrustStore};

use crate::{ErrorKind, Result};

/// Size of a single socket read
const READ_CHUNK_SIZE: usize = 16 * 1024;

/// Upper bound on what a single [`Transport::read_available`] call returns
const MAX_READ_AVAILABLE: usize = 256 * 1024;

/// Anything a [`Transport`] can run over.
pub trait Stream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> Stream for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

/// Establishes connections to a host.
#[async_trait]
pub trait Connector: Send + Sync + fmt::Debug {
    /// Open a new connection to `host:port`.
    ///
    /// # Errors
    ///
    /// Every failure (name resolution, refused connection, handshake,
    /// certificate verification) is reported as [`ErrorKind::Connection`].
    async fn connect(&self, host: &str, port: u16) -> Result<Transport>;
}

/// Result of [`Transport::read_available`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// At least one byte arrived
    Data(Bytes),
    /// The peer closed the connection
    Eof,
}

/// One open connection.
///
/// Dropping a transport closes the socket. Use [`Transport::close`] to also
/// say goodbye at the TLS level.
pub struct Transport {
    peer: String,
    stream: Box<dyn Stream>,
    scratch: Box<[u8]>,
}

impl Transport {
    /// Wrap an established stream.
    pub fn new(peer: impl Into<String>, stream: impl Stream + 'static) -> Self {
        Self {
            peer: peer.into(),
            stream: Box::new(stream),
            scratch: vec![0; READ_CHUNK_SIZE].into_boxed_slice(),
        }
    }

    /// `host:port` of the remote end
    #[must_use]
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Send all of `bytes`.
    ///
    /// # Errors
    ///
    /// Fails with [`ErrorKind::Connection`] unless every byte was written and
    /// flushed.
    pub async fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.stream
            .write_all(bytes)
            .await
            .map_err(|e| ErrorKind::connection(&self.peer, "write failed", Some(e)))?;
        self.stream
            .flush()
            .await
            .map_err(|e| ErrorKind::connection(&self.peer, "flush failed", Some(e)))
    }

    /// Wait for bytes from the peer.
    ///
    /// Blocks until at least one byte arrives, then also drains whatever else
    /// is already buffered without waiting again.
    ///
    /// # Errors
    ///
    /// Fails with [`ErrorKind::Connection`] if the socket reports an error.
    /// A clean close is not an error but [`ReadOutcome::Eof`].
    pub async fn read_available(&mut self) -> Result<ReadOutcome> {
        let n = self
            .stream
            .read(&mut self.scratch)
            .await
            .map_err(|e| ErrorKind::connection(&self.peer, "read failed", Some(e)))?;
        if n == 0 {
            return Ok(ReadOutcome::Eof);
        }

        let mut data = BytesMut::from(&self.scratch[..n]);
        while data.len() < MAX_READ_AVAILABLE {
            // Reads are cancel safe, so a pending read can simply be dropped
            match self.stream.read(&mut self.scratch).now_or_never() {
                Some(Ok(n)) if n > 0 => data.extend_from_slice(&self.scratch[..n]),
                _ => break,
            }
        }
        Ok(ReadOutcome::Data(data.freeze()))
    }

    /// Shut the connection down: TLS `close_notify` (if any), then close.
    pub async fn close(mut self) {
        if let Err(e) = self.stream.shutdown().await {
            log::debug!("Error while closing connection to {}: {e}", self.peer);
        }
    }
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport")
            .field("peer", &self.peer)
            .finish_non_exhaustive()
    }
}
