//! Per-operation error taxonomy.

use thiserror::Error;

/// Status reported to the controller when a failure carries none of its own.
pub const DEFAULT_ERROR_STATUS: u16 = 504;

/// Connection-level failure reaching the upstream API.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct TransportError(pub String);

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        Self(err.to_string())
    }
}

/// Errors that terminate a single relayed operation.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Upstream answered with a non-2xx status.
    #[error("upstream returned {status} {reason}: {body}")]
    Upstream {
        status: u16,
        reason: String,
        body: String,
    },

    /// Upstream could not be reached or the body stream broke.
    #[error("network error: {0}")]
    Network(#[from] TransportError),

    /// Idle watchdog fired before any response data arrived.
    #[error("timed out: no data received within {0} seconds")]
    Timeout(u64),

    /// Cancelled by the controller or by control channel loss.
    #[error("the operation was aborted")]
    Aborted,

    /// The request description could not be turned into an upstream call.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl RelayError {
    /// Status reported in the outgoing `error` message.
    pub fn status(&self) -> u16 {
        match self {
            RelayError::Upstream { status, .. } => *status,
            _ => DEFAULT_ERROR_STATUS,
        }
    }

    pub fn is_abort(&self) -> bool {
        matches!(self, RelayError::Aborted)
    }

    /// Outcome label for logs and metrics.
    pub fn outcome(&self) -> &'static str {
        match self {
            RelayError::Aborted => "aborted",
            RelayError::Timeout(_) => "timeout",
            _ => "error",
        }
    }
}

/// Result type for relayed operations.
pub type RelayResult<T> = Result<T, RelayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_defaults_to_gateway_timeout() {
        assert_eq!(RelayError::Aborted.status(), 504);
        assert_eq!(RelayError::Timeout(600).status(), 504);
        assert_eq!(
            RelayError::Network(TransportError("connection refused".into())).status(),
            504
        );
        let err = RelayError::Upstream {
            status: 429,
            reason: "Too Many Requests".into(),
            body: "{}".into(),
        };
        assert_eq!(err.status(), 429);
    }

    #[test]
    fn test_abort_and_timeout_are_distinguishable() {
        let abort = RelayError::Aborted.to_string();
        let timeout = RelayError::Timeout(600).to_string();
        assert!(abort.contains("aborted"));
        assert!(timeout.contains("timed out"));
        assert!(timeout.contains("600"));
        assert_ne!(RelayError::Aborted.outcome(), RelayError::Timeout(1).outcome());
        assert!(RelayError::Aborted.is_abort());
        assert!(!RelayError::Timeout(1).is_abort());
    }
}
