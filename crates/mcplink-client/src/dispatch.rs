//! Dispatch of server-initiated requests.
//!
//! Every request that reaches the dispatcher produces exactly one response.
//! The [`Responder`] carries that obligation: replying consumes it, so a
//! second response is unrepresentable, and dropping it unanswered (handler
//! panic, early return) emits a default internal-error response so the peer's
//! correlation table always clears.

use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use mcplink_core::mux::InboundRequest;
use mcplink_proto::jsonrpc::{
    self, ErrorData, JsonRpcErrorResponse, JsonRpcMessage, JsonRpcResponse, RequestId,
};
use mcplink_proto::methods;
use mcplink_proto::types::EmptyResult;

use crate::context::RequestContext;
use crate::session::ClientSession;

/// Obligation to answer one inbound request.
pub(crate) struct Responder {
    id: RequestId,
    outgoing: mpsc::Sender<JsonRpcMessage>,
    answered: bool,
}

impl Responder {
    pub(crate) fn new(id: RequestId, outgoing: mpsc::Sender<JsonRpcMessage>) -> Self {
        Self {
            id,
            outgoing,
            answered: false,
        }
    }

    /// Send the single success response.
    async fn respond<R: Serialize>(mut self, result: &R) {
        self.answered = true;
        let message = match serde_json::to_value(result) {
            Ok(value) => JsonRpcMessage::Response(JsonRpcResponse::new(self.id.clone(), value)),
            Err(error) => {
                warn!(id = %self.id, %error, "failed to encode response; answering with internal error");
                error_message(
                    self.id.clone(),
                    ErrorData::new(jsonrpc::INTERNAL_ERROR, "response encoding failed"),
                )
            }
        };
        if self.outgoing.send(message).await.is_err() {
            debug!(id = %self.id, "peer gone before response could be sent");
        }
    }

    /// Send the single error response.
    async fn respond_err(mut self, error: ErrorData) {
        self.answered = true;
        let message = error_message(self.id.clone(), error);
        if self.outgoing.send(message).await.is_err() {
            debug!(id = %self.id, "peer gone before error response could be sent");
        }
    }
}

impl Drop for Responder {
    fn drop(&mut self) {
        if self.answered {
            return;
        }
        // Reached when a handler panicked or dispatch bailed out early: the
        // obligation is released with a default internal error so the peer
        // never waits on an id that will not resolve.
        let message = error_message(
            self.id.clone(),
            ErrorData::new(jsonrpc::INTERNAL_ERROR, "internal error"),
        );
        if self.outgoing.try_send(message).is_err() {
            warn!(id = %self.id, "abandoning response obligation: channel unavailable");
        }
    }
}

fn error_message(id: RequestId, error: ErrorData) -> JsonRpcMessage {
    JsonRpcMessage::Error(JsonRpcErrorResponse::new(id, error))
}

fn decode_params<P: DeserializeOwned>(params: Option<&Value>) -> Result<P, ErrorData> {
    let value = params.cloned().unwrap_or(Value::Null);
    serde_json::from_value(value)
        .map_err(|error| ErrorData::new(jsonrpc::INVALID_PARAMS, format!("Invalid params: {error}")))
}

fn request_context(
    session: &Arc<ClientSession>,
    id: RequestId,
    params: Option<&Value>,
) -> RequestContext {
    let meta = params
        .and_then(|p| p.get("_meta"))
        .and_then(|m| serde_json::from_value(m.clone()).ok());
    RequestContext {
        request_id: id,
        meta,
        session: Arc::clone(session),
    }
}

/// Route one server-initiated request to its handler and answer it.
///
/// Runs on its own task, so a panicking handler unwinds through the
/// responder's drop path without taking the session loop down with it.
pub(crate) async fn dispatch_request(session: &Arc<ClientSession>, request: InboundRequest) {
    let InboundRequest { id, method, params } = request;
    debug!(%id, method, "dispatching server request");
    let responder = Responder::new(id.clone(), session.multiplexer().sender());

    match method.as_str() {
        // Liveness check: answered directly, independent of any registered
        // capability.
        methods::PING => responder.respond(&EmptyResult::default()).await,

        methods::SAMPLING_CREATE_MESSAGE => match session.sampling_handler() {
            Some(handler) => {
                let handler = Arc::clone(handler);
                match decode_params(params.as_ref()) {
                    Ok(decoded) => {
                        let ctx = request_context(session, id, params.as_ref());
                        match handler.create_message(ctx, decoded).await {
                            Ok(result) => responder.respond(&result).await,
                            Err(error) => responder.respond_err(error).await,
                        }
                    }
                    Err(error) => responder.respond_err(error).await,
                }
            }
            None => {
                responder
                    .respond_err(ErrorData::new(
                        jsonrpc::INVALID_REQUEST,
                        "Sampling not supported",
                    ))
                    .await;
            }
        },

        methods::ROOTS_LIST => match session.roots_handler() {
            Some(handler) => {
                let handler = Arc::clone(handler);
                let ctx = request_context(session, id, params.as_ref());
                match handler.list_roots(ctx).await {
                    Ok(result) => responder.respond(&result).await,
                    Err(error) => responder.respond_err(error).await,
                }
            }
            None => {
                responder
                    .respond_err(ErrorData::new(
                        jsonrpc::INVALID_REQUEST,
                        "List roots not supported",
                    ))
                    .await;
            }
        },

        other => {
            warn!(%id, method = other, "unrecognized server request");
            responder
                .respond_err(ErrorData::new(
                    jsonrpc::METHOD_NOT_FOUND,
                    format!("Method not found: {other}"),
                ))
                .await;
        }
    }
}
