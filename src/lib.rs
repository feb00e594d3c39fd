//! Uplink client protocol layer.
//!
//! A client-side session that multiplexes multiple independent logical data
//! channels (tool execution, documentation fetch, control messages) over a
//! single underlying byte stream, with a handshake protocol, request/response
//! correlation, and fail-fast error propagation.
//!
//! # Architecture
//!
//! The crate is layered bottom-up:
//!
//! 1. **Protocol layer** (`protocol`) - message framing, typed wire
//!    entities, entity <-> message block conversion
//! 2. **Network layer** (`net`) - low-level protocol wrapper owning the
//!    stream: handshake, receive loop, serialized sends
//! 3. **Channel layer** (`channel`) - per-channel endpoints for control,
//!    documentation, and tool execution exchanges
//! 4. **Session layer** (`session`) - the public session API binding
//!    wrapper, response mapper, and endpoints together

pub mod channel;
pub mod config;
pub mod error;
pub mod metrics;
pub mod net;
pub mod protocol;
pub mod session;

pub use error::{Error, ProtocolErrorType, Result};
pub use session::{ClientSession, SessionEventHandler, SessionState, ToolExecutionSetup};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
