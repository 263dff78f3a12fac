//! Upstream relay library.
//!
//! Executes HTTP requests against an upstream API on behalf of a remote
//! controller, streaming results back over a WebSocket control channel.

pub mod config;
pub mod control;
pub mod dispatcher;
pub mod error;
pub mod lifecycle;
pub mod observability;
pub mod operations;
pub mod relay;
pub mod resilience;
pub mod upstream;

pub use config::RelayConfig;
pub use control::ControlChannel;
pub use dispatcher::Dispatcher;
pub use error::{RelayError, RelayResult};
pub use lifecycle::Shutdown;
