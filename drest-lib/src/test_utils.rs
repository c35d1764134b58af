//! In-memory servers for exercising the client without a network.

use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use bytes::BytesMut;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt, DuplexStream, duplex},
    time::Instant,
};

use crate::{
    ErrorKind, Result,
    transport::{Connector, Transport},
};

/// What the fake server does with the next request on a connection
#[derive(Debug, Clone)]
enum Step {
    /// Reply with these raw bytes
    Respond(Vec<u8>),
    /// Reply after a delay
    RespondAfter(Duration, Vec<u8>),
    /// Read the request, then hang up
    Close,
    /// Read the request, then never answer
    Stall,
}

/// The behavior of one fake connection
#[derive(Debug, Clone, Default)]
pub(crate) struct Script {
    refuse: bool,
    steps: Vec<Step>,
}

impl Script {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// A connection attempt that fails
    pub(crate) fn refuse() -> Self {
        Self {
            refuse: true,
            steps: vec![],
        }
    }

    pub(crate) fn respond(mut self, bytes: impl AsRef<[u8]>) -> Self {
        self.steps.push(Step::Respond(bytes.as_ref().to_vec()));
        self
    }

    pub(crate) fn respond_after(mut self, delay: Duration, bytes: impl AsRef<[u8]>) -> Self {
        self.steps
            .push(Step::RespondAfter(delay, bytes.as_ref().to_vec()));
        self
    }

    pub(crate) fn close(mut self) -> Self {
        self.steps.push(Step::Close);
        self
    }

    pub(crate) fn stall(mut self) -> Self {
        self.steps.push(Step::Stall);
        self
    }
}

/// A request as seen by the fake server
#[derive(Debug, Clone)]
pub(crate) struct RecordedRequest {
    /// Which connection (in connect order, from 0) carried it
    pub(crate) connection: usize,
    pub(crate) at: Instant,
    pub(crate) text: String,
}

/// Hands out in-memory connections, each following the next [`Script`].
///
/// Once the steps of a script are used up, the server side hangs up, like
/// a keep-alive connection the server closed while it sat idle.
#[derive(Debug, Default)]
pub(crate) struct ScriptedConnector {
    scripts: Mutex<VecDeque<Script>>,
    connections: AtomicUsize,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl ScriptedConnector {
    pub(crate) fn new(scripts: impl IntoIterator<Item = Script>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into_iter().collect()),
            ..Self::default()
        }
    }

    /// Number of connection attempts so far
    pub(crate) fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Requests received so far, in arrival order
    pub(crate) fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(&self, host: &str, port: u16) -> Result<Transport> {
        let peer = format!("{host}:{port}");
        let connection = self.connections.fetch_add(1, Ordering::SeqCst);
        let script = self.scripts.lock().unwrap().pop_front();
        let Some(script) = script else {
            return Err(ErrorKind::connection(peer, "no scripted connection left", None));
        };
        if script.refuse {
            return Err(ErrorKind::connection(peer, "connection refused", None));
        }

        let (client, server) = duplex(64 * 1024);
        let requests = Arc::clone(&self.requests);
        tokio::spawn(serve(server, connection, script.steps, requests));
        Ok(Transport::new(peer, client))
    }
}

async fn serve(
    mut stream: DuplexStream,
    connection: usize,
    steps: Vec<Step>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
) {
    let mut buffer = BytesMut::new();
    for step in steps {
        let Some(text) = read_request(&mut stream, &mut buffer).await else {
            return;
        };
        requests.lock().unwrap().push(RecordedRequest {
            connection,
            at: Instant::now(),
            text,
        });

        let written = match step {
            Step::Respond(bytes) => stream.write_all(&bytes).await,
            Step::RespondAfter(delay, bytes) => {
                tokio::time::sleep(delay).await;
                stream.write_all(&bytes).await
            }
            Step::Close => return,
            Step::Stall => {
                std::future::pending::<()>().await;
                return;
            }
        };
        if written.is_err() {
            return;
        }
    }
}

/// Read one request: head plus `Content-Length` bytes of body.
async fn read_request(stream: &mut DuplexStream, buffer: &mut BytesMut) -> Option<String> {
    loop {
        if let Some(end) = buffer.windows(4).position(|w| w == b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&buffer[..end]).to_ascii_lowercase();
            let body_len = head
                .lines()
                .find_map(|line| line.strip_prefix("content-length:"))
                .and_then(|len| len.trim().parse::<usize>().ok())
                .unwrap_or(0);
            let total = end + 4 + body_len;
            if buffer.len() >= total {
                let request = buffer.split_to(total);
                return Some(String::from_utf8_lossy(&request).into_owned());
            }
        }

        let mut chunk = [0; 4096];
        match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => return None,
            Ok(n) => buffer.extend_from_slice(&chunk[..n]),
        }
    }
}

/// A complete `Content-Length` response
pub(crate) fn response(status: u16, headers: &[(&str, &str)], body: &str) -> Vec<u8> {
    let mut out = format!("HTTP/1.1 {status} X\r\n");
    for (name, value) in headers {
        out.push_str(&format!("{name}: {value}\r\n"));
    }
    out.push_str(&format!("Content-Length: {}\r\n\r\n{body}", body.len()));
    out.into_bytes()
}

/// A `429` naming its wait time in the body
pub(crate) fn rate_limited(retry_after: &str, global: bool) -> Vec<u8> {
    response(
        429,
        &[("Content-Type", "application/json")],
        &format!(
            r#"{{"message": "You are being rate limited.", "retry_after": {retry_after}, "global": {global}}}"#
        ),
    )
}
