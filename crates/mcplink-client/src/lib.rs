//! MCP client session layer.
//!
//! [`ClientSession`] drives the lifecycle of one protocol session over a
//! duplex message channel:
//! - the capability-negotiating handshake, gating all other traffic
//! - a typed request facade over the request multiplexer
//! - dispatch of server-initiated requests with a single-response guarantee

pub mod context;
mod dispatch;
pub mod handler;
pub mod session;

pub use context::{ProgressReporter, RequestContext};
pub use handler::{ListRootsHandler, SamplingHandler};
pub use session::ClientSession;
