//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Upstream call:
//!     → timeouts.rs (idle watchdog armed for the whole attempt sequence)
//!     → On failure: retries.rs (check if retryable, wait fixed delay)
//!     → First response data: watchdog disarmed by the relay
//! ```
//!
//! # Design Decisions
//! - Every operation has a deadline until data flows
//! - Timeout errors are distinct from aborts and upstream failures

pub mod retries;
pub mod timeouts;

pub use retries::RetryPolicy;
pub use timeouts::IdleWatchdog;
