//! Request multiplexer: correlates outbound requests with their responses.
//!
//! The multiplexer owns the outgoing half of the channel and the table of
//! pending requests, keyed by correlation id. The session serve loop is the
//! only reader of the incoming half; it feeds every received message through
//! [`RequestMultiplexer::route`], which either resolves a pending call or
//! hands the message back as inbound traffic for the dispatcher.
//!
//! The pending table is the single concurrently-mutated structure in the
//! session; every touch happens under one mutex held for a few map
//! operations, never across an await.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use mcplink_proto::jsonrpc::{
    JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, RequestId,
};

use crate::error::{Result, SessionError};

/// A server-initiated request surfaced by [`RequestMultiplexer::route`].
#[derive(Debug)]
pub struct InboundRequest {
    pub id: RequestId,
    pub method: String,
    pub params: Option<Value>,
}

/// Inbound traffic that is not a response to a pending request.
#[derive(Debug)]
pub enum InboundMessage {
    Request(InboundRequest),
    Notification(JsonRpcNotification),
}

type PendingSender = oneshot::Sender<Result<Value>>;
type PendingMap = HashMap<RequestId, PendingSender>;

/// Correlates outbound requests with their asynchronously arriving responses.
///
/// Each request registers a waiter before its frame is sent, so a response
/// racing back cannot miss it. Waiters resolve exactly once: with the peer's
/// result or error, with a timeout, or with a connection failure when the
/// channel goes away.
pub struct RequestMultiplexer {
    outgoing: mpsc::Sender<JsonRpcMessage>,
    pending: Mutex<PendingMap>,
    next_id: AtomicI64,
    read_timeout: Option<Duration>,
}

/// Removes the pending entry when a call is cancelled or times out, so the
/// table never accumulates waiters that nothing will resolve.
struct PendingGuard<'a> {
    mux: &'a RequestMultiplexer,
    id: RequestId,
    armed: bool,
}

impl PendingGuard<'_> {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if self.mux.lock_pending().remove(&self.id).is_some() {
            debug!(id = %self.id, "request abandoned; removed pending waiter");
        }
    }
}

impl RequestMultiplexer {
    pub fn new(outgoing: mpsc::Sender<JsonRpcMessage>, read_timeout: Option<Duration>) -> Self {
        Self {
            outgoing,
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicI64::new(1),
            read_timeout,
        }
    }

    /// Clone of the outgoing sender, for parts of the session that push
    /// messages without correlation (inbound-request responders).
    pub fn sender(&self) -> mpsc::Sender<JsonRpcMessage> {
        self.outgoing.clone()
    }

    fn lock_pending(&self) -> MutexGuard<'_, PendingMap> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_request_id(&self) -> RequestId {
        RequestId::Number(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Number of requests currently awaiting a response (for diagnostics).
    pub fn pending_len(&self) -> usize {
        self.lock_pending().len()
    }

    /// Send a request and suspend until the matching response arrives.
    ///
    /// Concurrent calls are independent; each gets its own correlation id and
    /// waiter. Fails with [`SessionError::ConnectionClosed`] when the channel
    /// is unusable, [`SessionError::Timeout`] when a read timeout is
    /// configured and elapses, or [`SessionError::Remote`] with the peer's
    /// declared error.
    pub async fn request<P, R>(&self, method: &str, params: Option<P>) -> Result<R>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let params = params.map(serde_json::to_value).transpose()?;
        let id = self.next_request_id();

        // Register the waiter before sending so a fast response cannot race
        // past the table.
        let (tx, rx) = oneshot::channel();
        self.lock_pending().insert(id.clone(), tx);
        let mut guard = PendingGuard {
            mux: self,
            id: id.clone(),
            armed: true,
        };

        let request = JsonRpcRequest::new(id.clone(), method, params);
        debug!(%id, method, "sending request");
        if self
            .outgoing
            .send(JsonRpcMessage::Request(request))
            .await
            .is_err()
        {
            return Err(SessionError::ConnectionClosed);
        }

        let outcome = match self.read_timeout {
            Some(timeout) => match tokio::time::timeout(timeout, rx).await {
                Ok(received) => received,
                Err(_) => {
                    warn!(%id, method, timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX), "request timed out");
                    return Err(SessionError::Timeout(timeout));
                }
            },
            None => rx.await,
        };
        guard.disarm();

        match outcome {
            Ok(Ok(result)) => Ok(serde_json::from_value(result)?),
            Ok(Err(error)) => Err(error),
            // The waiter was dropped without being resolved; the multiplexer
            // itself is going away.
            Err(_) => Err(SessionError::ConnectionClosed),
        }
    }

    /// Send a one-way notification. No reply is awaited, but a failure to
    /// hand the message to the channel propagates immediately.
    pub async fn notify<P: Serialize>(&self, method: &str, params: Option<P>) -> Result<()> {
        let params = params.map(serde_json::to_value).transpose()?;
        let notification = JsonRpcNotification::new(method, params);
        debug!(method, "sending notification");
        self.outgoing
            .send(JsonRpcMessage::Notification(notification))
            .await
            .map_err(|_| SessionError::ConnectionClosed)
    }

    /// Route one incoming message.
    ///
    /// Responses resolve their pending call and are consumed; requests and
    /// notifications come back to the caller for dispatch. A response whose
    /// id matches no pending call is dropped with a warning rather than
    /// crashing the loop.
    pub fn route(&self, message: JsonRpcMessage) -> Option<InboundMessage> {
        match message {
            JsonRpcMessage::Response(response) => {
                match self.lock_pending().remove(&response.id) {
                    Some(tx) => {
                        debug!(id = %response.id, "resolving pending request");
                        let _ = tx.send(Ok(response.result));
                    }
                    None => {
                        warn!(id = %response.id, "response with no pending request; dropping");
                    }
                }
                None
            }
            JsonRpcMessage::Error(error) => {
                let waiter = error
                    .id
                    .as_ref()
                    .and_then(|id| self.lock_pending().remove(id));
                match waiter {
                    Some(tx) => {
                        debug!(code = error.error.code, "resolving pending request with remote error");
                        let _ = tx.send(Err(SessionError::from(error.error)));
                    }
                    None => {
                        warn!(id = ?error.id, code = error.error.code, "error response with no pending request; dropping");
                    }
                }
                None
            }
            JsonRpcMessage::Request(request) => Some(InboundMessage::Request(InboundRequest {
                id: request.id,
                method: request.method,
                params: request.params,
            })),
            JsonRpcMessage::Notification(notification) => {
                Some(InboundMessage::Notification(notification))
            }
        }
    }

    /// Resolve every outstanding call with a connection failure.
    ///
    /// Called when the channel closes or the session shuts down, so no caller
    /// hangs forever on a response that can no longer arrive.
    pub fn fail_pending(&self) {
        let drained: Vec<(RequestId, PendingSender)> = self.lock_pending().drain().collect();
        for (id, tx) in drained {
            debug!(%id, "failing pending request: connection closed");
            let _ = tx.send(Err(SessionError::ConnectionClosed));
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
#[path = "mux_tests.rs"]
mod tests;
