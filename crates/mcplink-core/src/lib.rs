//! Session plumbing shared by MCP client components:
//! - In-memory duplex message channel
//! - Request multiplexer with the pending-request correlation table
//! - Session error taxonomy and configuration
//! - Tracing initialization

pub mod channel;
pub mod config;
pub mod error;
pub mod mux;
pub mod tracing_init;

pub use channel::{MessageChannel, memory_channel_pair};
pub use config::SessionConfig;
pub use error::{Result, SessionError};
pub use mux::{InboundMessage, InboundRequest, RequestMultiplexer};
