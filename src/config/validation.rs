//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate endpoint schemes and value ranges
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: RelayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;
use thiserror::Error;
use url::Url;

use crate::config::schema::RelayConfig;

/// A single semantic problem found in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("control.endpoint '{0}' must be a ws:// or wss:// URL")]
    ControlEndpoint(String),

    #[error("upstream.base_url '{0}' must be an http:// or https:// URL")]
    UpstreamBaseUrl(String),

    #[error("upstream.max_attempts must be at least 1")]
    ZeroAttempts,

    #[error("upstream.idle_timeout_secs must be greater than 0")]
    ZeroIdleTimeout,

    #[error("upstream.retryable_statuses contains invalid status {0}")]
    RetryableStatus(u16),

    #[error("observability.metrics_address '{0}' is not a socket address")]
    MetricsAddress(String),
}

/// Validate a configuration, collecting every violation.
pub fn validate_config(config: &RelayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if !has_scheme(&config.control.endpoint, &["ws", "wss"]) {
        errors.push(ValidationError::ControlEndpoint(config.control.endpoint.clone()));
    }

    if !has_scheme(&config.upstream.base_url, &["http", "https"]) {
        errors.push(ValidationError::UpstreamBaseUrl(config.upstream.base_url.clone()));
    }

    if config.upstream.max_attempts == 0 {
        errors.push(ValidationError::ZeroAttempts);
    }

    if config.upstream.idle_timeout_secs == 0 {
        errors.push(ValidationError::ZeroIdleTimeout);
    }

    for status in &config.upstream.retryable_statuses {
        if !(100..=599).contains(status) {
            errors.push(ValidationError::RetryableStatus(*status));
        }
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::MetricsAddress(
            config.observability.metrics_address.clone(),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn has_scheme(raw: &str, schemes: &[&str]) -> bool {
    Url::parse(raw)
        .map(|url| schemes.contains(&url.scheme()))
        .unwrap_or(false)
}
