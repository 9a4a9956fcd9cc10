//! Client session: handshake, typed request facade, and the serve loop.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use url::Url;

use mcplink_core::channel::MessageChannel;
use mcplink_core::mux::{InboundMessage, RequestMultiplexer};
use mcplink_core::{Result, SessionConfig, SessionError};
use mcplink_proto::jsonrpc::{JsonRpcMessage, JsonRpcNotification};
use mcplink_proto::types::{
    CallToolParams, CallToolResult, ClientCapabilities, CompleteParams, CompleteResult,
    CompletionArgument, CompletionReference, EmptyResult, GetPromptParams, GetPromptResult,
    Implementation, InitializeParams, InitializeResult, ListPromptsResult,
    ListResourceTemplatesResult, ListResourcesResult, ListToolsResult, LoggingLevel,
    LoggingMessageParams, ProgressParams, ProgressToken, ReadResourceParams, ReadResourceResult,
    ResourceUpdatedParams, RootsCapability, SamplingCapability, SetLevelParams, SubscribeParams,
    UnsubscribeParams,
};
use mcplink_proto::{LATEST_PROTOCOL_VERSION, SUPPORTED_PROTOCOL_VERSIONS, methods};

use crate::dispatch;
use crate::handler::{ListRootsHandler, SamplingHandler};

/// One MCP client session over a duplex message channel.
///
/// Construction wires the multiplexer to the channel. Handlers are attached
/// with the `set_*` methods before the session is shared; they are read-only
/// afterwards. [`ClientSession::run`] must be spawned before
/// [`ClientSession::initialize`] so responses can be routed, and `initialize`
/// must complete before any other protocol method is used.
///
/// ```ignore
/// let mut session = ClientSession::new(channel, SessionConfig::default());
/// session.set_sampling_handler(my_handler);
/// let session = Arc::new(session);
///
/// let (shutdown_tx, shutdown_rx) = watch::channel(false);
/// tokio::spawn({
///     let session = Arc::clone(&session);
///     async move { session.run(shutdown_rx).await }
/// });
///
/// let negotiated = session.initialize().await?;
/// let tools = session.list_tools().await?;
/// ```
pub struct ClientSession {
    mux: RequestMultiplexer,
    /// Incoming half of the channel; taken exactly once by `run`.
    incoming: Mutex<Option<mpsc::Receiver<JsonRpcMessage>>>,
    sampling_handler: Option<Arc<dyn SamplingHandler>>,
    roots_handler: Option<Arc<dyn ListRootsHandler>>,
    client_info: Implementation,
    handshake_started: AtomicBool,
    handshake_complete: AtomicBool,
}

impl ClientSession {
    /// Create a session over `channel`.
    pub fn new(channel: MessageChannel, config: SessionConfig) -> Self {
        let (tx, rx) = channel.into_split();
        Self {
            mux: RequestMultiplexer::new(tx, config.read_timeout),
            incoming: Mutex::new(Some(rx)),
            sampling_handler: None,
            roots_handler: None,
            client_info: Implementation {
                name: config.client_name,
                version: config.client_version,
            },
            handshake_started: AtomicBool::new(false),
            handshake_complete: AtomicBool::new(false),
        }
    }

    /// Attach a handler for `sampling/createMessage`. Its presence advertises
    /// the sampling capability during the handshake.
    pub fn set_sampling_handler(&mut self, handler: Arc<dyn SamplingHandler>) {
        self.sampling_handler = Some(handler);
    }

    /// Attach a handler for `roots/list`. Its presence advertises the roots
    /// capability during the handshake.
    pub fn set_roots_handler(&mut self, handler: Arc<dyn ListRootsHandler>) {
        self.roots_handler = Some(handler);
    }

    pub(crate) fn multiplexer(&self) -> &RequestMultiplexer {
        &self.mux
    }

    pub(crate) fn sampling_handler(&self) -> Option<&Arc<dyn SamplingHandler>> {
        self.sampling_handler.as_ref()
    }

    pub(crate) fn roots_handler(&self) -> Option<&Arc<dyn ListRootsHandler>> {
        self.roots_handler.as_ref()
    }

    /// Capabilities advertised during the handshake, derived solely from
    /// which handlers were attached. The `listChanged` flag is always `true`
    /// when a roots handler is present.
    fn local_capabilities(&self) -> ClientCapabilities {
        ClientCapabilities {
            experimental: None,
            sampling: self
                .sampling_handler
                .is_some()
                .then(SamplingCapability::default),
            roots: self.roots_handler.is_some().then(|| RootsCapability {
                list_changed: Some(true),
            }),
        }
    }

    // -----------------------------------------------------------------------
    // Serve loop
    // -----------------------------------------------------------------------

    /// Serve the session until the channel closes or `shutdown` signals.
    ///
    /// The loop is the single reader of the incoming channel half. Responses
    /// resolve their pending calls through the multiplexer; server-initiated
    /// requests are dispatched on their own tasks so a slow or faulty handler
    /// never stalls routing. On exit, every pending outbound call resolves
    /// with a connection failure instead of hanging.
    ///
    /// Callable once per session; keep the shutdown sender alive for the
    /// session's lifetime.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut incoming = self
            .incoming
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(SessionError::AlreadyRunning)?;
        debug!("session loop started");

        loop {
            tokio::select! {
                maybe = incoming.recv() => {
                    match maybe {
                        Some(message) => Self::handle_message(&self, message),
                        None => {
                            info!("channel closed by peer");
                            break;
                        }
                    }
                }
                _ = shutdown.changed() => {
                    info!("session shutdown requested");
                    break;
                }
            }
        }

        self.mux.fail_pending();
        Ok(())
    }

    fn handle_message(session: &Arc<Self>, message: JsonRpcMessage) {
        match session.mux.route(message) {
            Some(InboundMessage::Request(request)) => {
                let session = Arc::clone(session);
                tokio::spawn(async move {
                    dispatch::dispatch_request(&session, request).await;
                });
            }
            Some(InboundMessage::Notification(notification)) => {
                Self::handle_notification(&notification);
            }
            None => {}
        }
    }

    /// Notifications carry no reply obligation; known ones are decoded and
    /// logged, unknown ones only logged.
    fn handle_notification(notification: &JsonRpcNotification) {
        let params = notification.params.clone().unwrap_or(Value::Null);
        match notification.method.as_str() {
            methods::NOTIFICATIONS_PROGRESS => {
                match serde_json::from_value::<ProgressParams>(params) {
                    Ok(progress) => debug!(
                        token = %progress.progress_token,
                        progress = progress.progress,
                        total = progress.total,
                        "progress notification"
                    ),
                    Err(error) => warn!(%error, "malformed progress notification"),
                }
            }
            methods::NOTIFICATIONS_MESSAGE => {
                match serde_json::from_value::<LoggingMessageParams>(params) {
                    Ok(log) => debug!(
                        level = ?log.level,
                        logger = log.logger.as_deref().unwrap_or("server"),
                        data = %log.data,
                        "server log message"
                    ),
                    Err(error) => warn!(%error, "malformed log notification"),
                }
            }
            methods::NOTIFICATIONS_RESOURCES_UPDATED => {
                match serde_json::from_value::<ResourceUpdatedParams>(params) {
                    Ok(updated) => debug!(uri = %updated.uri, "resource updated"),
                    Err(error) => warn!(%error, "malformed resource-updated notification"),
                }
            }
            methods::NOTIFICATIONS_RESOURCES_LIST_CHANGED
            | methods::NOTIFICATIONS_TOOLS_LIST_CHANGED
            | methods::NOTIFICATIONS_PROMPTS_LIST_CHANGED => {
                debug!(method = %notification.method, "server list changed");
            }
            other => debug!(method = other, "unrecognized server notification"),
        }
    }

    // -----------------------------------------------------------------------
    // Handshake
    // -----------------------------------------------------------------------

    /// Run the `initialize` exchange. Callable exactly once per session.
    ///
    /// Sends the client's protocol version, capability descriptor, and
    /// identity, validates the server's negotiated version, and confirms
    /// with a `notifications/initialized` notification. A version outside
    /// the supported set fails fatally without sending the confirmation;
    /// the session cannot be reused afterwards.
    pub async fn initialize(&self) -> Result<InitializeResult> {
        if self.handshake_started.swap(true, Ordering::SeqCst) {
            return Err(SessionError::AlreadyInitialized);
        }

        let params = InitializeParams {
            protocol_version: LATEST_PROTOCOL_VERSION.to_owned(),
            capabilities: self.local_capabilities(),
            client_info: self.client_info.clone(),
        };
        let result: InitializeResult = self.mux.request(methods::INITIALIZE, Some(params)).await?;

        if !SUPPORTED_PROTOCOL_VERSIONS.contains(&result.protocol_version.as_str()) {
            return Err(SessionError::UnsupportedProtocolVersion(
                result.protocol_version,
            ));
        }

        self.mux
            .notify(methods::NOTIFICATIONS_INITIALIZED, None::<Value>)
            .await?;
        self.handshake_complete.store(true, Ordering::SeqCst);
        info!(
            protocol_version = %result.protocol_version,
            server = %result.server_info.name,
            "session initialized"
        );
        Ok(result)
    }

    fn ensure_initialized(&self) -> Result<()> {
        if self.handshake_complete.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(SessionError::NotInitialized)
        }
    }

    // -----------------------------------------------------------------------
    // Typed request facade
    // -----------------------------------------------------------------------

    /// Send a `ping` request.
    pub async fn send_ping(&self) -> Result<EmptyResult> {
        self.ensure_initialized()?;
        self.mux.request(methods::PING, None::<Value>).await
    }

    /// Send a `notifications/progress` notification.
    pub async fn send_progress_notification(
        &self,
        progress_token: ProgressToken,
        progress: f64,
        total: Option<f64>,
    ) -> Result<()> {
        self.ensure_initialized()?;
        self.mux
            .notify(
                methods::NOTIFICATIONS_PROGRESS,
                Some(ProgressParams {
                    progress_token,
                    progress,
                    total,
                }),
            )
            .await
    }

    /// Send a `logging/setLevel` request.
    pub async fn set_logging_level(&self, level: LoggingLevel) -> Result<EmptyResult> {
        self.ensure_initialized()?;
        self.mux
            .request(methods::LOGGING_SET_LEVEL, Some(SetLevelParams { level }))
            .await
    }

    /// Send a `resources/list` request.
    pub async fn list_resources(&self) -> Result<ListResourcesResult> {
        self.ensure_initialized()?;
        self.mux.request(methods::RESOURCES_LIST, None::<Value>).await
    }

    /// Send a `resources/templates/list` request.
    pub async fn list_resource_templates(&self) -> Result<ListResourceTemplatesResult> {
        self.ensure_initialized()?;
        self.mux
            .request(methods::RESOURCES_TEMPLATES_LIST, None::<Value>)
            .await
    }

    /// Send a `resources/read` request.
    pub async fn read_resource(&self, uri: Url) -> Result<ReadResourceResult> {
        self.ensure_initialized()?;
        self.mux
            .request(methods::RESOURCES_READ, Some(ReadResourceParams { uri }))
            .await
    }

    /// Send a `resources/subscribe` request.
    pub async fn subscribe_resource(&self, uri: Url) -> Result<EmptyResult> {
        self.ensure_initialized()?;
        self.mux
            .request(methods::RESOURCES_SUBSCRIBE, Some(SubscribeParams { uri }))
            .await
    }

    /// Send a `resources/unsubscribe` request.
    pub async fn unsubscribe_resource(&self, uri: Url) -> Result<EmptyResult> {
        self.ensure_initialized()?;
        self.mux
            .request(
                methods::RESOURCES_UNSUBSCRIBE,
                Some(UnsubscribeParams { uri }),
            )
            .await
    }

    /// Send a `tools/call` request.
    pub async fn call_tool(
        &self,
        name: impl Into<String>,
        arguments: Option<Value>,
    ) -> Result<CallToolResult> {
        self.ensure_initialized()?;
        self.mux
            .request(
                methods::TOOLS_CALL,
                Some(CallToolParams {
                    name: name.into(),
                    arguments,
                }),
            )
            .await
    }

    /// Send a `tools/list` request.
    pub async fn list_tools(&self) -> Result<ListToolsResult> {
        self.ensure_initialized()?;
        self.mux.request(methods::TOOLS_LIST, None::<Value>).await
    }

    /// Send a `prompts/list` request.
    pub async fn list_prompts(&self) -> Result<ListPromptsResult> {
        self.ensure_initialized()?;
        self.mux.request(methods::PROMPTS_LIST, None::<Value>).await
    }

    /// Send a `prompts/get` request.
    pub async fn get_prompt(
        &self,
        name: impl Into<String>,
        arguments: Option<HashMap<String, String>>,
    ) -> Result<GetPromptResult> {
        self.ensure_initialized()?;
        self.mux
            .request(
                methods::PROMPTS_GET,
                Some(GetPromptParams {
                    name: name.into(),
                    arguments,
                }),
            )
            .await
    }

    /// Send a `completion/complete` request.
    pub async fn complete(
        &self,
        reference: CompletionReference,
        argument: CompletionArgument,
    ) -> Result<CompleteResult> {
        self.ensure_initialized()?;
        self.mux
            .request(
                methods::COMPLETION_COMPLETE,
                Some(CompleteParams {
                    reference,
                    argument,
                }),
            )
            .await
    }

    /// Send a `notifications/roots/list_changed` notification.
    pub async fn send_roots_list_changed(&self) -> Result<()> {
        self.ensure_initialized()?;
        self.mux
            .notify(methods::NOTIFICATIONS_ROOTS_LIST_CHANGED, None::<Value>)
            .await
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
#[path = "session_tests.rs"]
mod tests;
