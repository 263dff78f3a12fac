//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the relay.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration for the relay.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct RelayConfig {
    /// Control channel (controller connection) settings.
    pub control: ControlConfig,

    /// Upstream API settings: target, retries, idle timeout.
    pub upstream: UpstreamConfig,

    /// Response relay settings.
    pub relay: RelayBehaviorConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Control channel configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ControlConfig {
    /// WebSocket endpoint of the controller (e.g., "ws://127.0.0.1:9998").
    pub endpoint: String,

    /// Delay before reconnecting after a disconnect, in milliseconds.
    pub reconnect_delay_ms: u64,

    /// Delay between initial connection attempts at startup, in milliseconds.
    pub connect_retry_delay_ms: u64,
}

impl ControlConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn connect_retry_delay(&self) -> Duration {
        Duration::from_millis(self.connect_retry_delay_ms)
    }
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            endpoint: "ws://127.0.0.1:9998".to_string(),
            reconnect_delay_ms: 5000,
            connect_retry_delay_ms: 1000,
        }
    }
}

/// Upstream API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Base URL of the single fixed upstream API.
    pub base_url: String,

    /// Total attempts per operation (first try included).
    pub max_attempts: u32,

    /// Fixed wait between attempts in milliseconds.
    pub retry_delay_ms: u64,

    /// Upstream statuses that trigger another attempt.
    pub retryable_statuses: Vec<u16>,

    /// Idle watchdog window in seconds. Fires when no response data
    /// has arrived within this window.
    pub idle_timeout_secs: u64,
}

impl UpstreamConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: "https://generativelanguage.googleapis.com".to_string(),
            max_attempts: 3,
            retry_delay_ms: 2000,
            retryable_statuses: vec![500, 502, 503, 504],
            idle_timeout_secs: 600,
        }
    }
}

/// Response relay configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RelayBehaviorConfig {
    /// Minimum length of a top-level `data` string before fake-mode
    /// normalization treats it as an embedded image.
    pub inline_data_min_len: usize,
}

impl Default for RelayBehaviorConfig {
    fn default() -> Self {
        Self {
            inline_data_min_len: 100,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
