//! Upstream API subsystem.
//!
//! # Data Flow
//! ```text
//! RequestSpec
//!     → request.rs (URL rewrite, header sanitization, body fixups)
//!     → executor.rs (retries, idle watchdog, cancellation)
//!     → client.rs (UpstreamClient: one HTTP call per attempt)
//!     → Execution { response, watchdog } → relay
//! ```

pub mod client;
pub mod executor;
pub mod request;

pub use client::{BodyStream, HttpUpstream, UpstreamClient, UpstreamRequest, UpstreamResponse};
pub use executor::{Execution, RequestExecutor};
