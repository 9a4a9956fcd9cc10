use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::task::JoinHandle;

use mcplink_core::channel::memory_channel_pair;
use mcplink_proto::jsonrpc::{
    ErrorData, INTERNAL_ERROR, INVALID_PARAMS, INVALID_REQUEST, JsonRpcRequest, JsonRpcResponse,
    METHOD_NOT_FOUND, RequestId,
};
use mcplink_proto::types::{
    Content, CreateMessageParams, CreateMessageResult, ListRootsResult, Role, Root,
};

use crate::context::RequestContext;

use super::*;

// ---------------------------------------------------------------------------
// SessionTestBuilder - shared setup for all session tests
// ---------------------------------------------------------------------------

struct SessionTestBuilder {
    sampling: Option<Arc<dyn SamplingHandler>>,
    roots: Option<Arc<dyn ListRootsHandler>>,
    read_timeout: Option<Duration>,
}

/// A session under test plus the scripted peer on the far end of the channel.
struct SessionTestHarness {
    session: Arc<ClientSession>,
    /// Peer's sending half (server -> client). `None` once dropped to
    /// simulate the peer going away.
    peer_tx: Option<mpsc::Sender<JsonRpcMessage>>,
    /// Peer's receiving half (client -> server).
    peer_rx: mpsc::Receiver<JsonRpcMessage>,
    shutdown_tx: watch::Sender<bool>,
    run_handle: JoinHandle<Result<()>>,
}

impl SessionTestBuilder {
    fn new() -> Self {
        Self {
            sampling: None,
            roots: None,
            read_timeout: None,
        }
    }

    fn with_sampling(mut self, handler: Arc<dyn SamplingHandler>) -> Self {
        self.sampling = Some(handler);
        self
    }

    fn with_roots(mut self, handler: Arc<dyn ListRootsHandler>) -> Self {
        self.roots = Some(handler);
        self
    }

    fn build(self) -> SessionTestHarness {
        let (client_end, server_end) = memory_channel_pair(16);

        let mut config = SessionConfig::default();
        config.read_timeout = self.read_timeout;

        let mut session = ClientSession::new(client_end, config);
        if let Some(handler) = self.sampling {
            session.set_sampling_handler(handler);
        }
        if let Some(handler) = self.roots {
            session.set_roots_handler(handler);
        }
        let session = Arc::new(session);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let run_handle = tokio::spawn({
            let session = Arc::clone(&session);
            async move { session.run(shutdown_rx).await }
        });

        let (peer_tx, peer_rx) = server_end.into_split();
        SessionTestHarness {
            session,
            peer_tx: Some(peer_tx),
            peer_rx,
            shutdown_tx,
            run_handle,
        }
    }
}

impl SessionTestHarness {
    async fn recv_from_client(&mut self) -> JsonRpcMessage {
        tokio::time::timeout(Duration::from_secs(1), self.peer_rx.recv())
            .await
            .expect("timed out waiting for a client message")
            .expect("client channel closed")
    }

    async fn recv_request(&mut self) -> JsonRpcRequest {
        match self.recv_from_client().await {
            JsonRpcMessage::Request(request) => request,
            other => panic!("expected request, got {other:?}"),
        }
    }

    async fn recv_notification(&mut self) -> JsonRpcNotification {
        match self.recv_from_client().await {
            JsonRpcMessage::Notification(notification) => notification,
            other => panic!("expected notification, got {other:?}"),
        }
    }

    async fn recv_response(&mut self) -> JsonRpcResponse {
        match self.recv_from_client().await {
            JsonRpcMessage::Response(response) => response,
            other => panic!("expected response, got {other:?}"),
        }
    }

    async fn recv_error(&mut self) -> (Option<RequestId>, ErrorData) {
        match self.recv_from_client().await {
            JsonRpcMessage::Error(error) => (error.id, error.error),
            other => panic!("expected error response, got {other:?}"),
        }
    }

    async fn send_to_client(&self, message: JsonRpcMessage) {
        self.peer_tx
            .as_ref()
            .expect("peer sender already dropped")
            .send(message)
            .await
            .expect("session dropped its channel");
    }

    async fn send_request(&self, id: RequestId, method: &str, params: Option<Value>) {
        self.send_to_client(JsonRpcMessage::Request(JsonRpcRequest::new(
            id, method, params,
        )))
        .await;
    }

    async fn respond(&self, id: RequestId, result: Value) {
        self.send_to_client(JsonRpcMessage::Response(JsonRpcResponse::new(id, result)))
            .await;
    }

    /// Drop the peer's sending half, closing the client's incoming stream.
    fn drop_peer_sender(&mut self) {
        self.peer_tx.take();
    }

    /// Drive a full handshake from the peer side.
    async fn handshake(&mut self) -> InitializeResult {
        let init_task = tokio::spawn({
            let session = Arc::clone(&self.session);
            async move { session.initialize().await }
        });

        let request = self.recv_request().await;
        assert_eq!(request.method, methods::INITIALIZE);
        self.respond(request.id, server_init_result()).await;

        let notification = self.recv_notification().await;
        assert_eq!(notification.method, methods::NOTIFICATIONS_INITIALIZED);

        init_task.await.expect("initialize task panicked").expect("handshake failed")
    }
}

fn server_init_result() -> Value {
    json!({
        "protocolVersion": LATEST_PROTOCOL_VERSION,
        "capabilities": {},
        "serverInfo": {"name": "mock-server", "version": "0.1.0"},
        "instructions": "The server instructions."
    })
}

// ---------------------------------------------------------------------------
// Test handlers
// ---------------------------------------------------------------------------

fn fixed_sampling_result() -> CreateMessageResult {
    CreateMessageResult {
        role: Role::Assistant,
        content: Content::Text {
            text: "ok".to_owned(),
        },
        model: "test-model".to_owned(),
        stop_reason: Some("endTurn".to_owned()),
    }
}

/// Returns a fixed result and records the params it was invoked with.
#[derive(Default)]
struct FixedSamplingHandler {
    seen_params: Mutex<Option<CreateMessageParams>>,
}

#[async_trait]
impl SamplingHandler for FixedSamplingHandler {
    async fn create_message(
        &self,
        _ctx: RequestContext,
        params: CreateMessageParams,
    ) -> std::result::Result<CreateMessageResult, ErrorData> {
        *self
            .seen_params
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(params);
        Ok(fixed_sampling_result())
    }
}

/// Declines every request with an application-level error value.
struct DecliningSamplingHandler;

#[async_trait]
impl SamplingHandler for DecliningSamplingHandler {
    async fn create_message(
        &self,
        _ctx: RequestContext,
        _params: CreateMessageParams,
    ) -> std::result::Result<CreateMessageResult, ErrorData> {
        Err(ErrorData::new(-1, "declined"))
    }
}

/// Panics mid-request; the responder must still answer.
struct PanickingSamplingHandler;

#[async_trait]
impl SamplingHandler for PanickingSamplingHandler {
    async fn create_message(
        &self,
        _ctx: RequestContext,
        _params: CreateMessageParams,
    ) -> std::result::Result<CreateMessageResult, ErrorData> {
        panic!("sampling handler exploded");
    }
}

/// Reports progress through the request context before answering.
struct ProgressSamplingHandler;

#[async_trait]
impl SamplingHandler for ProgressSamplingHandler {
    async fn create_message(
        &self,
        ctx: RequestContext,
        _params: CreateMessageParams,
    ) -> std::result::Result<CreateMessageResult, ErrorData> {
        let mut reporter = ctx
            .progress_reporter(Some(2.0))
            .ok_or_else(|| ErrorData::new(INVALID_PARAMS, "no progress token"))?;
        for _ in 0..2 {
            reporter
                .advance(0.5)
                .await
                .map_err(|error| ErrorData::new(INTERNAL_ERROR, error.to_string()))?;
        }
        Ok(fixed_sampling_result())
    }
}

/// Serves a fixed workspace root.
struct StaticRootsHandler;

#[async_trait]
impl ListRootsHandler for StaticRootsHandler {
    async fn list_roots(
        &self,
        _ctx: RequestContext,
    ) -> std::result::Result<ListRootsResult, ErrorData> {
        Ok(ListRootsResult {
            roots: vec![Root {
                uri: Url::parse("file:///workspace").expect("static url"),
                name: Some("workspace".to_owned()),
            }],
        })
    }
}

// ---------------------------------------------------------------------------
// Handshake
// ---------------------------------------------------------------------------

#[tokio::test]
async fn initialize_negotiates_and_confirms() {
    let mut harness = SessionTestBuilder::new().build();

    let init_task = tokio::spawn({
        let session = Arc::clone(&harness.session);
        async move { session.initialize().await }
    });

    let request = harness.recv_request().await;
    assert_eq!(request.method, methods::INITIALIZE);
    let params = request.params.clone().unwrap();
    assert_eq!(params["protocolVersion"], LATEST_PROTOCOL_VERSION);
    assert_eq!(params["capabilities"], json!({}));
    assert_eq!(params["clientInfo"]["name"], "mcplink");

    harness.respond(request.id, server_init_result()).await;

    // The confirmation must arrive only after the result was accepted.
    let notification = harness.recv_notification().await;
    assert_eq!(notification.method, methods::NOTIFICATIONS_INITIALIZED);

    let result = init_task.await.unwrap().unwrap();
    assert_eq!(result.protocol_version, LATEST_PROTOCOL_VERSION);
    assert_eq!(result.server_info.name, "mock-server");
    assert_eq!(
        result.instructions.as_deref(),
        Some("The server instructions.")
    );
}

#[tokio::test]
async fn advertised_capabilities_track_registered_handlers() {
    let combos: [(bool, bool, Value); 4] = [
        (false, false, json!({})),
        (true, false, json!({"sampling": {}})),
        (false, true, json!({"roots": {"listChanged": true}})),
        (
            true,
            true,
            json!({"sampling": {}, "roots": {"listChanged": true}}),
        ),
    ];

    for (with_sampling, with_roots, expected) in combos {
        let mut builder = SessionTestBuilder::new();
        if with_sampling {
            builder = builder.with_sampling(Arc::new(FixedSamplingHandler::default()));
        }
        if with_roots {
            builder = builder.with_roots(Arc::new(StaticRootsHandler));
        }
        let mut harness = builder.build();

        let init_task = tokio::spawn({
            let session = Arc::clone(&harness.session);
            async move { session.initialize().await }
        });

        let request = harness.recv_request().await;
        assert_eq!(
            request.params.unwrap()["capabilities"], expected,
            "sampling={with_sampling} roots={with_roots}"
        );
        drop(init_task);
    }
}

#[tokio::test]
async fn unsupported_server_version_aborts_without_confirmation() {
    let mut harness = SessionTestBuilder::new().build();

    let init_task = tokio::spawn({
        let session = Arc::clone(&harness.session);
        async move { session.initialize().await }
    });

    let request = harness.recv_request().await;
    let mut result = server_init_result();
    result["protocolVersion"] = json!("1830-01-01");
    harness.respond(request.id, result).await;

    let error = init_task.await.unwrap().unwrap_err();
    match error {
        SessionError::UnsupportedProtocolVersion(version) => assert_eq!(version, "1830-01-01"),
        other => panic!("expected version error, got {other:?}"),
    }

    // No `notifications/initialized` may have been sent.
    assert!(harness.peer_rx.try_recv().is_err());

    // The session is spent: a second attempt is rejected outright.
    let error = harness.session.initialize().await.unwrap_err();
    assert!(matches!(error, SessionError::AlreadyInitialized));
}

#[tokio::test]
async fn facade_is_gated_until_the_handshake_completes() {
    let harness = SessionTestBuilder::new().build();
    let error = harness.session.send_ping().await.unwrap_err();
    assert!(matches!(error, SessionError::NotInitialized));
}

#[tokio::test]
async fn initialize_is_callable_exactly_once() {
    let mut harness = SessionTestBuilder::new().build();
    harness.handshake().await;

    let error = harness.session.initialize().await.unwrap_err();
    assert!(matches!(error, SessionError::AlreadyInitialized));
}

// ---------------------------------------------------------------------------
// Inbound dispatch
// ---------------------------------------------------------------------------

#[tokio::test]
async fn ping_is_answered_empty_with_no_handlers_registered() {
    let mut harness = SessionTestBuilder::new().build();
    harness.handshake().await;

    harness
        .send_request(RequestId::String("srv-1".to_owned()), methods::PING, None)
        .await;

    let response = harness.recv_response().await;
    assert_eq!(response.id, RequestId::String("srv-1".to_owned()));
    assert_eq!(response.result, json!({}));
}

#[tokio::test]
async fn roots_list_without_handler_yields_unsupported_error() {
    let mut harness = SessionTestBuilder::new().build();
    let negotiated = harness.handshake().await;
    assert_eq!(negotiated.protocol_version, LATEST_PROTOCOL_VERSION);

    harness
        .send_request(RequestId::Number(40), methods::ROOTS_LIST, None)
        .await;

    let (id, error) = harness.recv_error().await;
    assert_eq!(id, Some(RequestId::Number(40)));
    assert_eq!(error.code, INVALID_REQUEST);
    assert_eq!(error.message, "List roots not supported");

    // The session is still alive and serving.
    harness
        .send_request(RequestId::Number(41), methods::PING, None)
        .await;
    let response = harness.recv_response().await;
    assert_eq!(response.id, RequestId::Number(41));
}

#[tokio::test]
async fn sampling_without_handler_yields_unsupported_error() {
    let mut harness = SessionTestBuilder::new().build();
    harness.handshake().await;

    harness
        .send_request(
            RequestId::Number(42),
            methods::SAMPLING_CREATE_MESSAGE,
            Some(json!({"messages": [], "maxTokens": 1})),
        )
        .await;

    let (id, error) = harness.recv_error().await;
    assert_eq!(id, Some(RequestId::Number(42)));
    assert_eq!(error.code, INVALID_REQUEST);
    assert_eq!(error.message, "Sampling not supported");
}

#[tokio::test]
async fn sampling_handler_gets_decoded_params_and_its_result_is_echoed() {
    let handler = Arc::new(FixedSamplingHandler::default());
    let mut harness = SessionTestBuilder::new()
        .with_sampling(Arc::clone(&handler) as Arc<dyn SamplingHandler>)
        .build();
    harness.handshake().await;

    harness
        .send_request(
            RequestId::Number(11),
            methods::SAMPLING_CREATE_MESSAGE,
            Some(json!({
                "messages": [
                    {"role": "user", "content": {"type": "text", "text": "hi"}}
                ],
                "systemPrompt": "be brief",
                "maxTokens": 10
            })),
        )
        .await;

    let response = harness.recv_response().await;
    assert_eq!(response.id, RequestId::Number(11));
    assert_eq!(
        response.result,
        json!({
            "role": "assistant",
            "content": {"type": "text", "text": "ok"},
            "model": "test-model",
            "stopReason": "endTurn"
        })
    );

    let seen = handler
        .seen_params
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .take()
        .expect("handler was not invoked");
    assert_eq!(seen.max_tokens, 10);
    assert_eq!(seen.system_prompt.as_deref(), Some("be brief"));
    assert_eq!(seen.messages.len(), 1);
    assert_eq!(seen.messages[0].role, Role::User);
}

#[tokio::test]
async fn roots_handler_result_is_sent_back() {
    let mut harness = SessionTestBuilder::new()
        .with_roots(Arc::new(StaticRootsHandler))
        .build();
    harness.handshake().await;

    harness
        .send_request(RequestId::Number(12), methods::ROOTS_LIST, None)
        .await;

    let response = harness.recv_response().await;
    assert_eq!(response.id, RequestId::Number(12));
    assert_eq!(
        response.result,
        json!({"roots": [{"uri": "file:///workspace", "name": "workspace"}]})
    );
}

#[tokio::test]
async fn handler_error_value_becomes_an_error_response() {
    let mut harness = SessionTestBuilder::new()
        .with_sampling(Arc::new(DecliningSamplingHandler))
        .build();
    harness.handshake().await;

    harness
        .send_request(
            RequestId::Number(13),
            methods::SAMPLING_CREATE_MESSAGE,
            Some(json!({"messages": [], "maxTokens": 1})),
        )
        .await;

    let (id, error) = harness.recv_error().await;
    assert_eq!(id, Some(RequestId::Number(13)));
    assert_eq!(error.code, -1);
    assert_eq!(error.message, "declined");
}

#[tokio::test]
async fn panicking_handler_still_produces_exactly_one_response() {
    let mut harness = SessionTestBuilder::new()
        .with_sampling(Arc::new(PanickingSamplingHandler))
        .build();
    harness.handshake().await;

    harness
        .send_request(
            RequestId::Number(21),
            methods::SAMPLING_CREATE_MESSAGE,
            Some(json!({"messages": [], "maxTokens": 1})),
        )
        .await;

    let (id, error) = harness.recv_error().await;
    assert_eq!(id, Some(RequestId::Number(21)));
    assert_eq!(error.code, INTERNAL_ERROR);

    // Subsequent requests are still served.
    harness
        .send_request(RequestId::Number(22), methods::PING, None)
        .await;
    let response = harness.recv_response().await;
    assert_eq!(response.id, RequestId::Number(22));
    assert_eq!(response.result, json!({}));
}

#[tokio::test]
async fn undecodable_params_yield_invalid_params_without_invoking_the_handler() {
    let handler = Arc::new(FixedSamplingHandler::default());
    let mut harness = SessionTestBuilder::new()
        .with_sampling(Arc::clone(&handler) as Arc<dyn SamplingHandler>)
        .build();
    harness.handshake().await;

    harness
        .send_request(
            RequestId::Number(23),
            methods::SAMPLING_CREATE_MESSAGE,
            Some(json!({"maxTokens": "many"})),
        )
        .await;

    let (id, error) = harness.recv_error().await;
    assert_eq!(id, Some(RequestId::Number(23)));
    assert_eq!(error.code, INVALID_PARAMS);
    assert!(
        handler
            .seen_params
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    );
}

#[tokio::test]
async fn unknown_server_request_gets_method_not_found() {
    let mut harness = SessionTestBuilder::new().build();
    harness.handshake().await;

    harness
        .send_request(RequestId::Number(31), "sessions/hijack", None)
        .await;

    let (id, error) = harness.recv_error().await;
    assert_eq!(id, Some(RequestId::Number(31)));
    assert_eq!(error.code, METHOD_NOT_FOUND);
}

#[tokio::test]
async fn server_notifications_are_consumed_without_a_reply() {
    let mut harness = SessionTestBuilder::new().build();
    harness.handshake().await;

    harness
        .send_to_client(JsonRpcMessage::Notification(JsonRpcNotification::new(
            methods::NOTIFICATIONS_TOOLS_LIST_CHANGED,
            None,
        )))
        .await;

    // The next message out of the client is the ping answer, not anything
    // prompted by the notification.
    harness
        .send_request(RequestId::Number(50), methods::PING, None)
        .await;
    let response = harness.recv_response().await;
    assert_eq!(response.id, RequestId::Number(50));
}

#[tokio::test]
async fn progress_reporter_emits_progress_notifications() {
    let mut harness = SessionTestBuilder::new()
        .with_sampling(Arc::new(ProgressSamplingHandler))
        .build();
    harness.handshake().await;

    harness
        .send_request(
            RequestId::Number(60),
            methods::SAMPLING_CREATE_MESSAGE,
            Some(json!({
                "_meta": {"progressToken": "op-1"},
                "messages": [],
                "maxTokens": 1
            })),
        )
        .await;

    let first = harness.recv_notification().await;
    assert_eq!(first.method, methods::NOTIFICATIONS_PROGRESS);
    assert_eq!(
        first.params.unwrap(),
        json!({"progressToken": "op-1", "progress": 0.5, "total": 2.0})
    );

    let second = harness.recv_notification().await;
    assert_eq!(
        second.params.unwrap(),
        json!({"progressToken": "op-1", "progress": 1.0, "total": 2.0})
    );

    let response = harness.recv_response().await;
    assert_eq!(response.id, RequestId::Number(60));
}

// ---------------------------------------------------------------------------
// Outbound facade
// ---------------------------------------------------------------------------

#[tokio::test]
async fn concurrent_facade_calls_resolve_out_of_order() {
    let mut harness = SessionTestBuilder::new().build();
    harness.handshake().await;

    let tools_task = tokio::spawn({
        let session = Arc::clone(&harness.session);
        async move { session.list_tools().await }
    });
    let tools_request = harness.recv_request().await;
    assert_eq!(tools_request.method, methods::TOOLS_LIST);

    let resources_task = tokio::spawn({
        let session = Arc::clone(&harness.session);
        async move { session.list_resources().await }
    });
    let resources_request = harness.recv_request().await;
    assert_eq!(resources_request.method, methods::RESOURCES_LIST);

    // Answer in reverse order; each call must receive its own typed result.
    harness
        .respond(resources_request.id, json!({"resources": []}))
        .await;
    harness
        .respond(
            tools_request.id,
            json!({"tools": [{"name": "echo", "inputSchema": {"type": "object"}}]}),
        )
        .await;

    let resources = resources_task.await.unwrap().unwrap();
    assert!(resources.resources.is_empty());

    let tools = tools_task.await.unwrap().unwrap();
    assert_eq!(tools.tools.len(), 1);
    assert_eq!(tools.tools[0].name, "echo");
}

#[tokio::test]
async fn facade_methods_send_their_wire_method_names() {
    let mut harness = SessionTestBuilder::new().build();
    harness.handshake().await;

    let read_task = tokio::spawn({
        let session = Arc::clone(&harness.session);
        async move {
            session
                .read_resource(Url::parse("memory://test").expect("static url"))
                .await
        }
    });
    let request = harness.recv_request().await;
    assert_eq!(request.method, methods::RESOURCES_READ);
    assert_eq!(request.params.unwrap(), json!({"uri": "memory://test"}));
    harness
        .respond(
            request.id,
            json!({"contents": [{"uri": "memory://test", "text": "body"}]}),
        )
        .await;
    let result = read_task.await.unwrap().unwrap();
    assert_eq!(result.contents.len(), 1);

    let notify_result = harness.session.send_roots_list_changed().await;
    assert!(notify_result.is_ok());
    let notification = harness.recv_notification().await;
    assert_eq!(
        notification.method,
        methods::NOTIFICATIONS_ROOTS_LIST_CHANGED
    );
}

#[tokio::test]
async fn remote_error_reaches_the_calling_facade_method() {
    let mut harness = SessionTestBuilder::new().build();
    harness.handshake().await;

    let call_task = tokio::spawn({
        let session = Arc::clone(&harness.session);
        async move { session.call_tool("missing", None).await }
    });
    let request = harness.recv_request().await;
    assert_eq!(request.method, methods::TOOLS_CALL);

    harness
        .send_to_client(JsonRpcMessage::Error(
            mcplink_proto::jsonrpc::JsonRpcErrorResponse::new(
                request.id,
                ErrorData::new(METHOD_NOT_FOUND, "Unknown tool: missing"),
            ),
        ))
        .await;

    let error = call_task.await.unwrap().unwrap_err();
    match error {
        SessionError::Remote { code, message, .. } => {
            assert_eq!(code, METHOD_NOT_FOUND);
            assert_eq!(message, "Unknown tool: missing");
        }
        other => panic!("expected remote error, got {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// Shutdown and failure
// ---------------------------------------------------------------------------

#[tokio::test]
async fn pending_calls_fail_when_the_peer_drops() {
    let mut harness = SessionTestBuilder::new().build();
    harness.handshake().await;

    let ping_task = tokio::spawn({
        let session = Arc::clone(&harness.session);
        async move { session.send_ping().await }
    });
    let _request = harness.recv_request().await;

    harness.drop_peer_sender();

    let error = ping_task.await.unwrap().unwrap_err();
    assert!(matches!(error, SessionError::ConnectionClosed));

    let run_result = harness.run_handle.await.unwrap();
    assert!(run_result.is_ok());
}

#[tokio::test]
async fn shutdown_signal_fails_pending_calls_and_stops_the_loop() {
    let mut harness = SessionTestBuilder::new().build();
    harness.handshake().await;

    let ping_task = tokio::spawn({
        let session = Arc::clone(&harness.session);
        async move { session.send_ping().await }
    });
    let _request = harness.recv_request().await;

    harness.shutdown_tx.send(true).unwrap();

    let error = ping_task.await.unwrap().unwrap_err();
    assert!(matches!(error, SessionError::ConnectionClosed));

    let run_result = harness.run_handle.await.unwrap();
    assert!(run_result.is_ok());
}

#[tokio::test]
async fn serve_loop_is_callable_exactly_once() {
    let (client_end, _server_end) = memory_channel_pair(4);
    let session = Arc::new(ClientSession::new(client_end, SessionConfig::default()));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let first = tokio::spawn({
        let session = Arc::clone(&session);
        async move { session.run(shutdown_rx).await }
    });
    // Let the first loop claim the incoming half.
    tokio::task::yield_now().await;

    let (_extra_tx, extra_rx) = watch::channel(false);
    let error = session.run(extra_rx).await.unwrap_err();
    assert!(matches!(error, SessionError::AlreadyRunning));

    shutdown_tx.send(true).unwrap();
    first.await.unwrap().unwrap();
}
