//! JSON-RPC 2.0 envelope types.
//!
//! Both directions of a session use the same envelope: requests carry an id
//! and expect exactly one response, notifications carry no id and expect
//! nothing back.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Protocol identifier carried by every JSON-RPC 2.0 message.
pub const JSONRPC_VERSION: &str = "2.0";

/// Invalid JSON was received by the peer.
pub const PARSE_ERROR: i64 = -32700;
/// The request is not a valid protocol request.
pub const INVALID_REQUEST: i64 = -32600;
/// The method does not exist or is not available.
pub const METHOD_NOT_FOUND: i64 = -32601;
/// The request parameters are invalid for the method.
pub const INVALID_PARAMS: i64 = -32602;
/// Internal error while handling the request.
pub const INTERNAL_ERROR: i64 = -32603;

/// Correlation identifier for one outstanding request.
///
/// Outbound requests always use integer ids; inbound ids are accepted in
/// either form the peer chose and echoed back verbatim in the response.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s}"),
        }
    }
}

impl From<i64> for RequestId {
    fn from(id: i64) -> Self {
        Self::Number(id)
    }
}

impl From<String> for RequestId {
    fn from(id: String) -> Self {
        Self::String(id)
    }
}

/// The error object carried by a JSON-RPC error response.
///
/// Application-level failures (declined or unsupported requests, handler
/// errors) use the same encoding as protocol-level failures; only the code
/// and message distinguish them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorData {
    /// Error code. Negative values in the -32xxx range are reserved for
    /// protocol-level errors.
    pub code: i64,
    /// Short human-readable description.
    pub message: String,
    /// Optional additional data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ErrorData {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }
}

/// A request expecting exactly one response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: RequestId,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: RequestId, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_owned(),
            id,
            method: method.into(),
            params,
        }
    }
}

/// A one-way message. No id, no reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_owned(),
            method: method.into(),
            params,
        }
    }
}

/// A successful response to a request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: RequestId,
    pub result: Value,
}

impl JsonRpcResponse {
    pub fn new(id: RequestId, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_owned(),
            id,
            result,
        }
    }
}

/// An error response to a request.
///
/// The id is optional on the wire (a peer that cannot parse a request replies
/// with a null id), but every error this implementation emits carries one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcErrorResponse {
    pub jsonrpc: String,
    pub id: Option<RequestId>,
    pub error: ErrorData,
}

impl JsonRpcErrorResponse {
    pub fn new(id: RequestId, error: ErrorData) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_owned(),
            id: Some(id),
            error,
        }
    }
}

/// Any message that can appear on the channel.
///
/// Deserialization is structural: an id plus a method is a request, a method
/// alone is a notification, a `result` is a response, an `error` object is an
/// error response. Variant order matters for the untagged match.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JsonRpcMessage {
    Request(JsonRpcRequest),
    Notification(JsonRpcNotification),
    Response(JsonRpcResponse),
    Error(JsonRpcErrorResponse),
}
