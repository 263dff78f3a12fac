//! Request executor.
//!
//! # Responsibilities
//! - Shape the request (URL, headers, body) once per operation
//! - Issue the upstream call with bounded, fixed-delay retries
//! - Race the attempt sequence against the idle watchdog
//! - Stop immediately with an abort when the operation is cancelled
//!
//! # Data Flow
//! ```text
//! RequestSpec → request.rs (shape) → attempt 1..=max ─┬─▶ 2xx response → Execution
//!                                                     ├─▶ retryable → sleep → next attempt
//!                                                     └─▶ terminal → RelayError
//! token.cancelled() (cancel / channel loss / watchdog) ──▶ Aborted | Timeout
//! ```
//!
//! # Design Decisions
//! - Retryable failures never leave this module individually
//! - The watchdog is handed to the caller still armed; the relay disarms it
//!   once response data flows

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use url::Url;

use crate::config::UpstreamConfig;
use crate::control::RequestSpec;
use crate::error::{RelayError, RelayResult};
use crate::observability::metrics;
use crate::resilience::{IdleWatchdog, RetryPolicy};
use crate::upstream::client::{UpstreamClient, UpstreamRequest, UpstreamResponse};
use crate::upstream::request::build_request;

const LOG_SUMMARY_CHARS: usize = 200;

/// A successful execution: a live response plus its still-armed watchdog.
#[derive(Debug)]
pub struct Execution {
    pub response: UpstreamResponse,
    pub watchdog: IdleWatchdog,
}

/// Performs upstream calls for operations.
pub struct RequestExecutor {
    client: Arc<dyn UpstreamClient>,
    base_url: Url,
    policy: RetryPolicy,
    idle_timeout: Duration,
}

impl std::fmt::Debug for RequestExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestExecutor")
            .field("base_url", &self.base_url.as_str())
            .field("policy", &self.policy)
            .field("idle_timeout", &self.idle_timeout)
            .finish()
    }
}

impl RequestExecutor {
    pub fn new(client: Arc<dyn UpstreamClient>, config: &UpstreamConfig) -> Result<Self, url::ParseError> {
        Ok(Self {
            client,
            base_url: Url::parse(&config.base_url)?,
            policy: RetryPolicy::from_config(config),
            idle_timeout: config.idle_timeout(),
        })
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Execute the request for one operation.
    ///
    /// Cancelling `token` interrupts the in-flight attempt or the retry wait
    /// and suppresses further attempts.
    pub async fn execute(&self, spec: &RequestSpec, token: &CancellationToken) -> RelayResult<Execution> {
        let request = build_request(&self.base_url, spec)?;
        let watchdog = IdleWatchdog::arm(self.idle_timeout, token.clone());

        let outcome = tokio::select! {
            biased;
            _ = token.cancelled() => Err(watchdog.interruption()),
            result = self.attempt_all(spec, request) => result,
        };

        outcome.map(|response| Execution { response, watchdog })
    }

    async fn attempt_all(&self, spec: &RequestSpec, request: UpstreamRequest) -> RelayResult<UpstreamResponse> {
        let max_attempts = self.policy.max_attempts();
        let mut attempt = 0;

        loop {
            attempt += 1;
            tracing::info!(
                request_id = %spec.request_id,
                attempt,
                max_attempts,
                method = %spec.method,
                path = %spec.path,
                "Executing upstream request"
            );

            let err = match self.client.send(request.clone()).await {
                Ok(response) if response.is_success() => {
                    metrics::record_upstream_attempt("success");
                    return Ok(response);
                }
                Ok(response) => {
                    metrics::record_upstream_attempt("status");
                    let status = response.status;
                    let reason = response.reason.clone();
                    let body = match response.text().await {
                        Ok(body) => body,
                        Err(e) => {
                            tracing::debug!(
                                request_id = %spec.request_id,
                                status,
                                error = %e,
                                "Failed to read upstream error body"
                            );
                            String::new()
                        }
                    };
                    RelayError::Upstream { status, reason, body }
                }
                Err(e) => {
                    metrics::record_upstream_attempt("network");
                    RelayError::Network(e)
                }
            };

            if !self.policy.should_retry(attempt, &err) {
                return Err(err);
            }

            let summary: String = err.to_string().chars().take(LOG_SUMMARY_CHARS).collect();
            tracing::warn!(
                request_id = %spec.request_id,
                attempt,
                delay = ?self.policy.delay(),
                error = %summary,
                "Upstream attempt failed, retrying"
            );
            metrics::record_retry();
            tokio::time::sleep(self.policy.delay()).await;
        }
    }
}
