//! Control channel subsystem.
//!
//! # Data Flow
//! ```text
//! Controller (WebSocket server)
//!     ⇅ channel.rs (connect, reconnect, frame pump)
//!     → protocol.rs (InboundMessage::parse)
//!     → Dispatcher
//!     → protocol.rs (OutboundMessage) → Outbox → channel.rs
//! ```

pub mod channel;
pub mod protocol;

pub use channel::{ChannelError, ChannelEvent, ConnectionState, ControlChannel, Outbox};
pub use protocol::{
    HttpMethod, InboundMessage, OperationId, OutboundMessage, ProtocolError, RequestSpec,
    StreamingMode,
};
