//! Wire types for the MCP JSON-RPC protocol.
//!
//! Everything a session needs to speak the protocol on the wire:
//! - JSON-RPC 2.0 envelope types and error codes
//! - Request/result payload types for every protocol operation
//! - Named method-string constants

pub mod jsonrpc;
pub mod methods;
pub mod types;

pub use jsonrpc::{
    ErrorData, JsonRpcErrorResponse, JsonRpcMessage, JsonRpcNotification, JsonRpcRequest,
    JsonRpcResponse, RequestId,
};

/// Newest protocol version this implementation speaks.
pub const LATEST_PROTOCOL_VERSION: &str = "2024-11-05";

/// Protocol versions this implementation accepts from a server.
pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] = &["2024-10-07", "2024-11-05"];
