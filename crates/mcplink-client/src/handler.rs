//! Handler seams for server-initiated requests.
//!
//! Registering a handler is what advertises the corresponding capability
//! during the handshake; a session without a handler answers the request
//! with a structured "not supported" error instead.

use async_trait::async_trait;

use mcplink_proto::jsonrpc::ErrorData;
use mcplink_proto::types::{CreateMessageParams, CreateMessageResult, ListRootsResult};

use crate::context::RequestContext;

/// Services `sampling/createMessage` requests from the server.
///
/// An `Err` travels to the peer as an application-level error response; it is
/// indistinguishable on the wire from "not implemented" except by its text.
#[async_trait]
pub trait SamplingHandler: Send + Sync {
    async fn create_message(
        &self,
        ctx: RequestContext,
        params: CreateMessageParams,
    ) -> Result<CreateMessageResult, ErrorData>;
}

/// Services `roots/list` requests from the server.
#[async_trait]
pub trait ListRootsHandler: Send + Sync {
    async fn list_roots(&self, ctx: RequestContext) -> Result<ListRootsResult, ErrorData>;
}
