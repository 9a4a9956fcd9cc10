//! Session configuration.

use std::time::Duration;

/// Configuration for one client session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// How long an outbound request may wait for its response before failing
    /// with a timeout. `None` waits until the channel closes.
    pub read_timeout: Option<Duration>,
    /// Name reported in `clientInfo` during the handshake.
    pub client_name: String,
    /// Version reported in `clientInfo` during the handshake.
    pub client_version: String,
}

impl SessionConfig {
    pub fn new(client_name: impl Into<String>, client_version: impl Into<String>) -> Self {
        Self {
            read_timeout: None,
            client_name: client_name.into(),
            client_version: client_version.into(),
        }
    }

    /// Set the read timeout for outbound requests.
    #[must_use]
    pub const fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::new("mcplink", env!("CARGO_PKG_VERSION"))
    }
}
