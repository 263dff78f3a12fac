//! Operation tracking subsystem.
//!
//! # Data Flow
//! ```text
//! start message → registry.register(id) → OperationGuard (token, state)
//! cancel message → registry.cancel(id) → cancellation set + token.cancel()
//! channel loss → registry.cancel_all()
//! guard dropped → registry + cancellation set entries removed
//! ```

pub mod registry;

pub use registry::{OperationGuard, OperationRegistry, OperationState, RegistryError};
