//! Duplex message channel endpoints.
//!
//! The protocol rides an ordered, reliable, bidirectional message channel.
//! [`MessageChannel`] is one endpoint of such a channel: an outgoing sender
//! plus an incoming receiver of already-decoded JSON-RPC messages. Byte-level
//! framing (stdio, WebSocket) lives behind whatever task feeds these halves.

use tokio::sync::mpsc;

use mcplink_proto::jsonrpc::JsonRpcMessage;

/// Default buffer size for in-memory channel endpoints.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// One endpoint of a duplex message channel.
#[derive(Debug)]
pub struct MessageChannel {
    tx: mpsc::Sender<JsonRpcMessage>,
    rx: mpsc::Receiver<JsonRpcMessage>,
}

impl MessageChannel {
    /// Assemble an endpoint from its two halves.
    pub const fn new(tx: mpsc::Sender<JsonRpcMessage>, rx: mpsc::Receiver<JsonRpcMessage>) -> Self {
        Self { tx, rx }
    }

    /// Split the endpoint into its outgoing and incoming halves.
    pub fn into_split(self) -> (mpsc::Sender<JsonRpcMessage>, mpsc::Receiver<JsonRpcMessage>) {
        (self.tx, self.rx)
    }

    /// Send a message to the peer.
    ///
    /// Fails when the peer's receiving half is gone, which the session layer
    /// treats as the connection being closed.
    pub async fn send(
        &self,
        message: JsonRpcMessage,
    ) -> Result<(), mpsc::error::SendError<JsonRpcMessage>> {
        self.tx.send(message).await
    }

    /// Receive the next message from the peer. `None` means the peer closed.
    pub async fn recv(&mut self) -> Option<JsonRpcMessage> {
        self.rx.recv().await
    }
}

/// Create a crossed pair of in-memory channel endpoints.
///
/// Everything sent on one endpoint arrives on the other, in order. Dropping
/// an endpoint closes the direction it was sending on. Used as the in-process
/// peer in tests and wherever client and server share a process.
pub fn memory_channel_pair(capacity: usize) -> (MessageChannel, MessageChannel) {
    let (a_tx, b_rx) = mpsc::channel(capacity);
    let (b_tx, a_rx) = mpsc::channel(capacity);
    (MessageChannel::new(a_tx, a_rx), MessageChannel::new(b_tx, b_rx))
}
