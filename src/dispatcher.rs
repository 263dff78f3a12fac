//! Control message dispatch.
//!
//! # Responsibilities
//! - Route start and cancel messages from the control channel
//! - Run each operation as its own task: execute, then relay
//! - Report every failure to the controller as exactly one `error` message
//! - Abort all in-flight operations when the control channel drops
//!
//! # Data Flow
//! ```text
//! ChannelEvent::Message ─▶ InboundMessage::parse
//!     ├─ Cancel ─▶ registry.cancel
//!     └─ Start  ─▶ registry.register ─▶ spawn(process)
//!                    process: cancelled? ─▶ execute ─▶ cancelled? ─▶ relay
//!                             └─ Err ─▶ error message
//! ChannelEvent::Disconnected ─▶ registry.cancel_all
//! ```
//!
//! # Design Decisions
//! - A start for an id that is already in flight is ignored
//! - The operation guard lives for the whole task, so registry cleanup
//!   happens on every exit path

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::control::{ChannelEvent, InboundMessage, OperationId, OutboundMessage, Outbox, RequestSpec};
use crate::error::{RelayError, RelayResult};
use crate::observability::metrics;
use crate::operations::{OperationGuard, OperationRegistry, OperationState};
use crate::relay::ResponseRelay;
use crate::upstream::RequestExecutor;

/// Connects the control channel to the execution pipeline.
pub struct Dispatcher {
    registry: Arc<OperationRegistry>,
    executor: RequestExecutor,
    relay: ResponseRelay,
    outbox: Arc<dyn Outbox>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("in_flight", &self.registry.len())
            .field("executor", &self.executor)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    pub fn new(
        registry: Arc<OperationRegistry>,
        executor: RequestExecutor,
        relay: ResponseRelay,
        outbox: Arc<dyn Outbox>,
    ) -> Self {
        Self {
            registry,
            executor,
            relay,
            outbox,
        }
    }

    pub fn registry(&self) -> &Arc<OperationRegistry> {
        &self.registry
    }

    /// Consume channel events until the channel ends or shutdown fires.
    ///
    /// In-flight operations are aborted on the way out.
    pub async fn run(
        self: Arc<Self>,
        mut events: mpsc::UnboundedReceiver<ChannelEvent>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("Dispatcher shutting down");
                    break;
                }
                event = events.recv() => match event {
                    Some(event) => {
                        self.handle_event(event);
                    }
                    None => break,
                },
            }
        }

        let aborted = self.registry.cancel_all();
        if aborted > 0 {
            tracing::info!(aborted, "Aborted in-flight operations on shutdown");
        }
    }

    /// Handle one channel event. Returns the operation task if one was started.
    pub fn handle_event(self: &Arc<Self>, event: ChannelEvent) -> Option<JoinHandle<()>> {
        match event {
            ChannelEvent::Connected => {
                tracing::debug!("Dispatcher observed control channel connect");
                None
            }
            ChannelEvent::Disconnected => {
                let aborted = self.registry.cancel_all();
                tracing::warn!(aborted, "Control channel lost, aborting in-flight operations");
                None
            }
            ChannelEvent::Message(raw) => self.handle_message(&raw),
        }
    }

    /// Handle one text frame from the controller.
    pub fn handle_message(self: &Arc<Self>, raw: &str) -> Option<JoinHandle<()>> {
        match InboundMessage::parse(raw) {
            Ok(InboundMessage::Cancel { request_id }) => {
                self.registry.cancel(&request_id);
                None
            }
            Ok(InboundMessage::Start(spec)) => self.start(spec),
            Err(e) => {
                tracing::error!(error = %e, "Failed to decode control message");
                if let Some(request_id) = e.request_id {
                    let err = RelayError::InvalidRequest(e.source.to_string());
                    self.report_error(&request_id, &err);
                }
                None
            }
        }
    }

    fn start(self: &Arc<Self>, spec: RequestSpec) -> Option<JoinHandle<()>> {
        let guard = match self.registry.register(spec.request_id.clone()) {
            Ok(guard) => guard,
            Err(e) => {
                tracing::warn!(error = %e, "Ignoring duplicate start request");
                return None;
            }
        };

        metrics::record_operation_started();
        tracing::info!(
            request_id = %spec.request_id,
            method = %spec.method,
            path = %spec.path,
            mode = ?spec.streaming_mode,
            "Operation started"
        );

        let this = Arc::clone(self);
        Some(tokio::spawn(async move { this.process(spec, guard).await }))
    }

    async fn process(&self, spec: RequestSpec, guard: OperationGuard) {
        let id = guard.id().clone();

        match self.pipeline(&spec, &guard).await {
            Ok(()) => {
                guard.set_state(OperationState::Done);
                metrics::record_operation_finished("success");
                tracing::info!(request_id = %id, "Operation completed");
            }
            Err(err) => {
                if err.is_abort() {
                    guard.set_state(OperationState::Cancelled);
                    tracing::info!(request_id = %id, "Operation aborted");
                } else {
                    guard.set_state(OperationState::Failed);
                    tracing::warn!(request_id = %id, status = err.status(), error = %err, "Operation failed");
                }
                metrics::record_operation_finished(err.outcome());
                self.report_error(&id, &err);
            }
        }
    }

    async fn pipeline(&self, spec: &RequestSpec, guard: &OperationGuard) -> RelayResult<()> {
        if guard.is_cancelled() {
            return Err(RelayError::Aborted);
        }

        guard.set_state(OperationState::Executing);
        let execution = self.executor.execute(spec, guard.token()).await?;

        if guard.is_cancelled() {
            return Err(RelayError::Aborted);
        }

        guard.set_state(OperationState::Relaying);
        self.relay
            .relay(guard.id(), spec.streaming_mode, execution, guard.token())
            .await
    }

    fn report_error(&self, id: &OperationId, err: &RelayError) {
        let message = OutboundMessage::Error {
            request_id: id.clone(),
            status: err.status(),
            message: format!("relay error: {err}"),
        };
        if !self.outbox.transmit(&message) {
            tracing::debug!(request_id = %id, "Control channel down, error report dropped");
        }
    }
}
