//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use upstream_relay::config::{RelayBehaviorConfig, UpstreamConfig};
use upstream_relay::control::{OperationId, OutboundMessage, Outbox};
use upstream_relay::dispatcher::Dispatcher;
use upstream_relay::operations::OperationRegistry;
use upstream_relay::relay::ResponseRelay;
use upstream_relay::upstream::{HttpUpstream, RequestExecutor};

/// What the mock backend sends for one request.
#[derive(Debug, Clone)]
pub struct MockResponse {
    pub status: u16,
    pub content_type: String,
    pub chunks: Vec<Vec<u8>>,
    pub chunk_delay: Duration,
    /// Delay before the status line is written.
    pub head_delay: Duration,
}

impl MockResponse {
    pub fn text(status: u16, content_type: &str, body: &str) -> Self {
        Self {
            status,
            content_type: content_type.to_string(),
            chunks: vec![body.as_bytes().to_vec()],
            chunk_delay: Duration::ZERO,
            head_delay: Duration::ZERO,
        }
    }

    pub fn chunked(content_type: &str, chunks: &[&str], delay: Duration) -> Self {
        Self {
            status: 200,
            content_type: content_type.to_string(),
            chunks: chunks.iter().map(|c| c.as_bytes().to_vec()).collect(),
            chunk_delay: delay,
            head_delay: Duration::ZERO,
        }
    }

    pub fn binary(content_type: &str, bytes: &[u8]) -> Self {
        Self {
            status: 200,
            content_type: content_type.to_string(),
            chunks: vec![bytes.to_vec()],
            chunk_delay: Duration::ZERO,
            head_delay: Duration::ZERO,
        }
    }

    /// Holds the response back for `delay` before answering 200.
    pub fn stalled(delay: Duration) -> Self {
        Self {
            head_delay: delay,
            ..Self::text(200, "application/json", "{}")
        }
    }
}

/// A request as seen by the mock backend.
#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub method: String,
    /// Path plus query string.
    pub target: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl CapturedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

pub struct MockBackend {
    pub addr: SocketAddr,
    requests: Arc<Mutex<Vec<CapturedRequest>>>,
    hits: Arc<AtomicUsize>,
}

impl MockBackend {
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<CapturedRequest> {
        self.requests.lock().unwrap().clone()
    }
}

/// Start a programmable HTTP/1.1 backend on an ephemeral port.
///
/// `f` receives the zero-based index of the call and returns the response.
pub async fn start_programmable_backend<F, Fut>(f: F) -> MockBackend
where
    F: Fn(usize) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = MockResponse> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let requests = Arc::new(Mutex::new(Vec::new()));
    let hits = Arc::new(AtomicUsize::new(0));
    let f = Arc::new(f);

    let captured = requests.clone();
    let counter = hits.clone();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let f = f.clone();
            let captured = captured.clone();
            let counter = counter.clone();
            tokio::spawn(async move {
                let Some(request) = read_request(&mut socket).await else {
                    return;
                };
                captured.lock().unwrap().push(request);
                let index = counter.fetch_add(1, Ordering::SeqCst);
                let response = f(index).await;
                let _ = write_response(&mut socket, response).await;
            });
        }
    });

    MockBackend { addr, requests, hits }
}

/// Backend that always answers with the same response.
pub async fn start_mock_backend(response: MockResponse) -> MockBackend {
    start_programmable_backend(move |_| {
        let response = response.clone();
        async move { response }
    })
    .await
}

async fn read_request(socket: &mut TcpStream) -> Option<CapturedRequest> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    let head_end = loop {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos;
        }
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).to_string();
    let mut lines = head.split("\r\n");
    let request_line = lines.next()?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next()?.to_string();
    let target = parts.next()?.to_string();

    let headers: Vec<(String, String)> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(name, value)| (name.trim().to_string(), value.trim().to_string()))
        .collect();

    let content_length = headers
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, v)| v.parse::<usize>().ok())
        .unwrap_or(0);

    let mut body = buf[head_end + 4..].to_vec();
    while body.len() < content_length {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..n]);
    }

    Some(CapturedRequest {
        method,
        target,
        headers,
        body: String::from_utf8_lossy(&body).to_string(),
    })
}

async fn write_response(socket: &mut TcpStream, response: MockResponse) -> std::io::Result<()> {
    tokio::time::sleep(response.head_delay).await;

    let reason = match response.status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        _ => "Unknown",
    };
    let head = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nTransfer-Encoding: chunked\r\nConnection: close\r\n\r\n",
        response.status, reason, response.content_type
    );
    socket.write_all(head.as_bytes()).await?;
    socket.flush().await?;

    for (i, chunk) in response.chunks.iter().enumerate() {
        if i > 0 {
            tokio::time::sleep(response.chunk_delay).await;
        }
        if chunk.is_empty() {
            continue;
        }
        socket.write_all(format!("{:x}\r\n", chunk.len()).as_bytes()).await?;
        socket.write_all(chunk).await?;
        socket.write_all(b"\r\n").await?;
        socket.flush().await?;
    }

    socket.write_all(b"0\r\n\r\n").await?;
    socket.shutdown().await
}

/// Outbox that records every message it is given.
#[derive(Debug)]
pub struct RecordingOutbox {
    messages: Mutex<Vec<OutboundMessage>>,
    connected: AtomicBool,
}

impl RecordingOutbox {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            messages: Mutex::new(Vec::new()),
            connected: AtomicBool::new(true),
        })
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn messages(&self) -> Vec<OutboundMessage> {
        self.messages.lock().unwrap().clone()
    }

    pub fn for_request(&self, id: &str) -> Vec<OutboundMessage> {
        let id = OperationId::from(id);
        self.messages()
            .into_iter()
            .filter(|m| m.request_id() == &id)
            .collect()
    }

    pub fn chunks(&self, id: &str) -> Vec<String> {
        self.for_request(id)
            .into_iter()
            .filter_map(|m| match m {
                OutboundMessage::Chunk { data, .. } => Some(data),
                _ => None,
            })
            .collect()
    }

    /// Poll until the operation has a terminal message, or panic after `timeout`.
    pub async fn wait_for_terminal(&self, id: &str, timeout: Duration) -> Vec<OutboundMessage> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let messages = self.for_request(id);
            if messages.iter().any(OutboundMessage::is_terminal) {
                return messages;
            }
            if tokio::time::Instant::now() >= deadline {
                panic!("no terminal message for {id} within {timeout:?}: {messages:?}");
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

impl Outbox for RecordingOutbox {
    fn transmit(&self, message: &OutboundMessage) -> bool {
        if !self.connected.load(Ordering::SeqCst) {
            return false;
        }
        self.messages.lock().unwrap().push(message.clone());
        true
    }
}

/// Upstream settings tuned for fast tests.
pub fn upstream_config(base_url: &str) -> UpstreamConfig {
    UpstreamConfig {
        base_url: base_url.to_string(),
        retry_delay_ms: 20,
        ..UpstreamConfig::default()
    }
}

/// Dispatcher wired to the real HTTP client and a recording outbox.
pub fn build_dispatcher(config: &UpstreamConfig, outbox: Arc<RecordingOutbox>) -> Arc<Dispatcher> {
    let client = Arc::new(HttpUpstream::new().unwrap());
    let executor = RequestExecutor::new(client, config).unwrap();
    let relay = ResponseRelay::new(outbox.clone(), &RelayBehaviorConfig::default());
    Arc::new(Dispatcher::new(
        Arc::new(OperationRegistry::new()),
        executor,
        relay,
        outbox,
    ))
}

/// A start message as the controller would send it.
pub fn start_message(id: &str, method: &str, path: &str, mode: &str) -> String {
    serde_json::json!({
        "request_id": id,
        "method": method,
        "path": path,
        "headers": { "content-type": "application/json", "host": "controller.local" },
        "body": "{\"contents\":[]}",
        "streaming_mode": mode,
    })
    .to_string()
}

pub fn cancel_message(id: &str) -> String {
    serde_json::json!({ "event_type": "cancel_request", "request_id": id }).to_string()
}

pub fn kind(message: &OutboundMessage) -> &'static str {
    match message {
        OutboundMessage::ResponseHeaders { .. } => "response_headers",
        OutboundMessage::Chunk { .. } => "chunk",
        OutboundMessage::StreamClose { .. } => "stream_close",
        OutboundMessage::Error { .. } => "error",
    }
}
