//! Per-request context handed to inbound request handlers.

use std::sync::Arc;

use mcplink_core::Result;
use mcplink_proto::jsonrpc::RequestId;
use mcplink_proto::types::{ProgressToken, RequestMeta};

use crate::session::ClientSession;

/// Context for one handler invocation. Lives exactly as long as the
/// invocation itself.
#[derive(Clone)]
pub struct RequestContext {
    /// Correlation id of the request being handled.
    pub request_id: RequestId,
    /// Metadata from the request's `_meta` field, when present.
    pub meta: Option<RequestMeta>,
    /// The session, for handlers that need to issue further calls.
    pub session: Arc<ClientSession>,
}

impl RequestContext {
    /// Progress reporter bound to this request's progress token, or `None`
    /// when the request carried no `_meta.progressToken`.
    pub fn progress_reporter(&self, total: Option<f64>) -> Option<ProgressReporter> {
        let token = self.meta.as_ref()?.progress_token.clone()?;
        Some(ProgressReporter {
            session: Arc::clone(&self.session),
            token,
            total,
            current: 0.0,
        })
    }
}

/// Emits `notifications/progress` for one long-running request.
pub struct ProgressReporter {
    session: Arc<ClientSession>,
    token: ProgressToken,
    total: Option<f64>,
    current: f64,
}

impl ProgressReporter {
    /// Advance the accumulated progress by `amount` and notify the peer.
    pub async fn advance(&mut self, amount: f64) -> Result<()> {
        self.current += amount;
        self.session
            .send_progress_notification(self.token.clone(), self.current, self.total)
            .await
    }

    /// Progress reported so far.
    pub const fn current(&self) -> f64 {
        self.current
    }
}
