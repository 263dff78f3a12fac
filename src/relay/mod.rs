//! Response relay.
//!
//! # Responsibilities
//! - Forward upstream status and headers to the controller
//! - Stream the body line by line (real mode) or as one chunk (fake mode)
//! - Wrap binary image bodies as a base64 candidate
//! - Close every successful relay with `stream_close`
//!
//! # Data Flow
//! ```text
//! Execution ──▶ response_headers
//!     ├─ content-type image/*  → buffer → base64 → 1 chunk
//!     ├─ real mode             → decode → lines  → N chunks
//!     └─ fake mode             → decode → normalize → 1 chunk
//!                          ──▶ stream_close
//! ```
//!
//! # Design Decisions
//! - Empty chunks are never sent
//! - Every body read races the operation's token, so cancel and idle timeout
//!   interrupt a stalled body just like a stalled connect
//! - The watchdog is disarmed by the first data chunk in real mode and as
//!   soon as buffering starts otherwise

pub mod decode;
pub mod lines;
pub mod normalize;

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::config::RelayBehaviorConfig;
use crate::control::{OperationId, OutboundMessage, Outbox, StreamingMode};
use crate::error::{RelayError, RelayResult};
use crate::observability::metrics;
use crate::resilience::IdleWatchdog;
use crate::upstream::{BodyStream, Execution};

pub use decode::Utf8Decoder;
pub use lines::LineSplitter;
pub use normalize::Normalizer;

/// Turns an upstream response into outbound protocol messages.
pub struct ResponseRelay {
    outbox: Arc<dyn Outbox>,
    normalizer: Normalizer,
}

impl std::fmt::Debug for ResponseRelay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseRelay")
            .field("normalizer", &self.normalizer)
            .finish_non_exhaustive()
    }
}

impl ResponseRelay {
    pub fn new(outbox: Arc<dyn Outbox>, config: &RelayBehaviorConfig) -> Self {
        Self {
            outbox,
            normalizer: Normalizer::new(config.inline_data_min_len),
        }
    }

    /// Relay one response. On success the last message sent is `stream_close`.
    pub async fn relay(
        &self,
        id: &OperationId,
        mode: StreamingMode,
        execution: Execution,
        token: &CancellationToken,
    ) -> RelayResult<()> {
        let Execution { response, mut watchdog } = execution;
        let content_type = response.content_type().to_string();
        let mut body = response.body;

        self.emit(OutboundMessage::ResponseHeaders {
            request_id: id.clone(),
            status: response.status,
            headers: response.headers,
        });

        if content_type.starts_with("image/") {
            watchdog.disarm();
            let bytes = read_to_end(&mut body, token, &watchdog).await?;
            tracing::info!(
                request_id = %id,
                content_type = %content_type,
                bytes = bytes.len(),
                "Wrapping binary image response"
            );
            let line = normalize::wrap_binary_image(&content_type, BASE64.encode(&bytes));
            self.emit_chunk(id, line);
        } else {
            match mode {
                StreamingMode::Real => self.stream_lines(id, &mut body, token, &mut watchdog).await?,
                StreamingMode::Fake => {
                    watchdog.disarm();
                    let bytes = read_to_end(&mut body, token, &watchdog).await?;
                    let mut decoder = Utf8Decoder::new();
                    let mut text = decoder.decode(&bytes);
                    text.push_str(&decoder.finish());
                    self.emit_chunk(id, self.normalizer.apply(text));
                }
            }
        }

        self.emit(OutboundMessage::StreamClose {
            request_id: id.clone(),
        });
        Ok(())
    }

    async fn stream_lines(
        &self,
        id: &OperationId,
        body: &mut BodyStream,
        token: &CancellationToken,
        watchdog: &mut IdleWatchdog,
    ) -> RelayResult<()> {
        let mut decoder = Utf8Decoder::new();
        let mut splitter = LineSplitter::new();

        while let Some(chunk) = next_chunk(body, token, watchdog).await? {
            watchdog.disarm();
            for line in splitter.push(&decoder.decode(&chunk)) {
                self.emit_chunk(id, line);
            }
        }

        for line in splitter.push(&decoder.finish()) {
            self.emit_chunk(id, line);
        }
        if let Some(rest) = splitter.finish() {
            self.emit_chunk(id, rest);
        }
        Ok(())
    }

    fn emit_chunk(&self, id: &OperationId, data: String) {
        if data.is_empty() {
            return;
        }
        metrics::record_chunk();
        self.emit(OutboundMessage::Chunk {
            request_id: id.clone(),
            data,
        });
    }

    fn emit(&self, message: OutboundMessage) {
        if !self.outbox.transmit(&message) {
            tracing::debug!(request_id = %message.request_id(), "Control channel down, message dropped");
        }
    }
}

async fn next_chunk(
    body: &mut BodyStream,
    token: &CancellationToken,
    watchdog: &IdleWatchdog,
) -> RelayResult<Option<Bytes>> {
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(watchdog.interruption()),
        next = body.next() => match next {
            Some(Ok(chunk)) => Ok(Some(chunk)),
            Some(Err(e)) => Err(RelayError::Network(e)),
            None => Ok(None),
        },
    }
}

async fn read_to_end(
    body: &mut BodyStream,
    token: &CancellationToken,
    watchdog: &IdleWatchdog,
) -> RelayResult<Vec<u8>> {
    let mut buffer = Vec::new();
    while let Some(chunk) = next_chunk(body, token, watchdog).await? {
        buffer.extend_from_slice(&chunk);
    }
    Ok(buffer)
}
