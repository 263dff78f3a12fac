//! Upstream relay
//!
//! Connects out to a controller, receives request descriptions, performs
//! them against the upstream API and streams the responses back.
//!
//! # Architecture Overview
//!
//! ```text
//!   Controller                               RELAY
//!  ┌──────────┐  start / cancel   ┌─────────────────────────────────────────┐
//!  │          │──────────────────▶│ control::channel ─▶ dispatcher          │
//!  │          │                   │                        │                │
//!  │          │                   │             operations::registry        │
//!  │          │                   │                        │                │
//!  │          │                   │          upstream::executor ──────────────────▶ Upstream API
//!  │          │  headers / chunk  │                        │                │          │
//!  │          │◀──────────────────│      relay (stream / normalize) ◀─────────────────┘
//!  └──────────┘  close / error    └─────────────────────────────────────────┘
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use upstream_relay::config::loader::{load_config, ConfigError};
use upstream_relay::config::validation::validate_config;
use upstream_relay::config::RelayConfig;
use upstream_relay::control::{ControlChannel, Outbox};
use upstream_relay::dispatcher::Dispatcher;
use upstream_relay::lifecycle::{wait_for_signal, Shutdown};
use upstream_relay::observability::{logging, metrics};
use upstream_relay::operations::OperationRegistry;
use upstream_relay::relay::ResponseRelay;
use upstream_relay::upstream::{HttpUpstream, RequestExecutor};

#[derive(Debug, Parser)]
#[command(name = "upstream-relay", version, about = "Relay upstream API calls for a remote controller")]
struct Args {
    /// Path to a TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Control channel endpoint (overrides the config file).
    #[arg(long)]
    endpoint: Option<String>,

    /// Log level for this crate (overrides the config file).
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => RelayConfig::default(),
    };
    if let Some(endpoint) = args.endpoint {
        config.control.endpoint = endpoint;
    }
    if let Some(level) = args.log_level {
        config.observability.log_level = level;
    }
    validate_config(&config).map_err(ConfigError::Validation)?;

    logging::init_logging(&config.observability)?;
    tracing::info!("upstream-relay v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        endpoint = %config.control.endpoint,
        upstream = %config.upstream.base_url,
        max_attempts = config.upstream.max_attempts,
        idle_timeout_secs = config.upstream.idle_timeout_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        let addr: SocketAddr = config.observability.metrics_address.parse()?;
        metrics::init_metrics(addr)?;
    }

    let shutdown = Shutdown::new();
    let (channel, events) = ControlChannel::new(config.control.clone());
    let outbox: Arc<dyn Outbox> = Arc::new(channel.clone());

    let executor = RequestExecutor::new(Arc::new(HttpUpstream::new()?), &config.upstream)?;
    let relay = ResponseRelay::new(outbox.clone(), &config.relay);
    let dispatcher = Arc::new(Dispatcher::new(
        Arc::new(OperationRegistry::new()),
        executor,
        relay,
        outbox,
    ));
    let dispatch_task = tokio::spawn(dispatcher.run(events, shutdown.subscribe()));

    let established = tokio::select! {
        result = channel.establish() => {
            result?;
            true
        }
        result = wait_for_signal() => {
            result?;
            false
        }
    };

    if established {
        tracing::info!(endpoint = %config.control.endpoint, "Relay ready");
        wait_for_signal().await?;
    }

    shutdown.trigger();
    channel.close();
    dispatch_task.await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
