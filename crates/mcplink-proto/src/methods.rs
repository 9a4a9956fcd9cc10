//! Named constants for the wire method strings used across the protocol.
//!
//! Shared between the outbound request facade and the inbound dispatcher so
//! that method names stay in sync without duplicating string literals. The
//! strings are part of the interoperability contract and must match the peer
//! byte for byte.

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

/// `initialize`
pub const INITIALIZE: &str = "initialize";

/// `notifications/initialized`
pub const NOTIFICATIONS_INITIALIZED: &str = "notifications/initialized";

/// `ping`
pub const PING: &str = "ping";

// ---------------------------------------------------------------------------
// Progress and logging
// ---------------------------------------------------------------------------

/// `notifications/progress`
pub const NOTIFICATIONS_PROGRESS: &str = "notifications/progress";

/// `logging/setLevel`
pub const LOGGING_SET_LEVEL: &str = "logging/setLevel";

/// `notifications/message`
pub const NOTIFICATIONS_MESSAGE: &str = "notifications/message";

// ---------------------------------------------------------------------------
// Resources
// ---------------------------------------------------------------------------

/// `resources/list`
pub const RESOURCES_LIST: &str = "resources/list";

/// `resources/templates/list`
pub const RESOURCES_TEMPLATES_LIST: &str = "resources/templates/list";

/// `resources/read`
pub const RESOURCES_READ: &str = "resources/read";

/// `resources/subscribe`
pub const RESOURCES_SUBSCRIBE: &str = "resources/subscribe";

/// `resources/unsubscribe`
pub const RESOURCES_UNSUBSCRIBE: &str = "resources/unsubscribe";

/// `notifications/resources/updated`
pub const NOTIFICATIONS_RESOURCES_UPDATED: &str = "notifications/resources/updated";

/// `notifications/resources/list_changed`
pub const NOTIFICATIONS_RESOURCES_LIST_CHANGED: &str = "notifications/resources/list_changed";

// ---------------------------------------------------------------------------
// Tools
// ---------------------------------------------------------------------------

/// `tools/list`
pub const TOOLS_LIST: &str = "tools/list";

/// `tools/call`
pub const TOOLS_CALL: &str = "tools/call";

/// `notifications/tools/list_changed`
pub const NOTIFICATIONS_TOOLS_LIST_CHANGED: &str = "notifications/tools/list_changed";

// ---------------------------------------------------------------------------
// Prompts
// ---------------------------------------------------------------------------

/// `prompts/list`
pub const PROMPTS_LIST: &str = "prompts/list";

/// `prompts/get`
pub const PROMPTS_GET: &str = "prompts/get";

/// `notifications/prompts/list_changed`
pub const NOTIFICATIONS_PROMPTS_LIST_CHANGED: &str = "notifications/prompts/list_changed";

// ---------------------------------------------------------------------------
// Completion
// ---------------------------------------------------------------------------

/// `completion/complete`
pub const COMPLETION_COMPLETE: &str = "completion/complete";

// ---------------------------------------------------------------------------
// Server-initiated
// ---------------------------------------------------------------------------

/// `sampling/createMessage`
pub const SAMPLING_CREATE_MESSAGE: &str = "sampling/createMessage";

/// `roots/list`
pub const ROOTS_LIST: &str = "roots/list";

/// `notifications/roots/list_changed`
pub const NOTIFICATIONS_ROOTS_LIST_CHANGED: &str = "notifications/roots/list_changed";
