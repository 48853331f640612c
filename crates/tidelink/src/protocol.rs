//! Wire protocol envelopes (JSON over WebSocket text frames by default).
//!
//! Client→server and server→client messages are separate tagged enums.
//! Payloads (`input`, `data`, patches) are opaque `serde_json::Value`s — the
//! schema layer owning a procedure validates them, this crate only routes.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Correlates a call or subscription to its responses. Client-assigned,
/// unique per client instance; calls and subscriptions share one namespace.
pub type MessageId = u64;

/// Client-local monotonic id assigned to each optimistic mutation.
/// Never reused within a coordinator's lifetime.
pub type ClientSeq = u64;

/// Server-assigned monotonic id ordering the delta stream. Signed so that
/// "nothing confirmed yet" can be represented as −1.
pub type ServerSeq = i64;

/// Key into the application's state store (e.g. a collection or query name).
pub type StateKey = String;

/// A single opaque patch. The application's state layer interprets it
/// (JSON Patch or similar); the sync core never looks inside.
pub type Patch = serde_json::Value;

/// Ordered list of patches for one state key.
pub type PatchList = Vec<Patch>;

/// Patches grouped by state key, in insertion order.
pub type PatchMap = IndexMap<StateKey, PatchList>;

/// Error payload carried in results and subscription errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorShape {
    /// Human-readable description.
    pub message: String,
    /// Optional machine-readable code (e.g. "TIMEOUT", "NOT_FOUND").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl ErrorShape {
    /// Build an error payload with a message only.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
        }
    }

    /// Build an error payload with a message and code.
    pub fn with_code(message: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: Some(code.into()),
        }
    }
}

impl std::fmt::Display for ErrorShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.code {
            Some(code) => write!(f, "{} ({})", self.message, code),
            None => write!(f, "{}", self.message),
        }
    }
}

/// A sequenced server-pushed change. `data` is either a patch set or a full
/// state snapshot — the coordinator forwards it without interpreting it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerDelta {
    /// Opaque delta payload.
    pub data: serde_json::Value,
    /// Position of this delta in the authoritative stream.
    pub server_seq: ServerSeq,
    /// The seq the server sent immediately before this one, for gap
    /// detection. Absent on streams that do not chain (e.g. first delta).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev_server_seq: Option<ServerSeq>,
}

/// Messages sent from the client to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// A query or mutation call expecting exactly one result.
    Call {
        /// Correlation id.
        id: MessageId,
        /// Procedure path (e.g. "todo.create").
        path: String,
        /// Procedure input, validated by the schema layer.
        input: serde_json::Value,
    },
    /// Start a subscription.
    Subscribe {
        /// Correlation id, also identifying the subscription itself.
        id: MessageId,
        /// Procedure path.
        path: String,
        /// Procedure input.
        input: serde_json::Value,
    },
    /// Stop a subscription. No reply is expected.
    SubscriptionStop {
        /// Id of the subscription to stop.
        id: MessageId,
    },
    /// Ask the server to re-deliver a missing delta range (both ends
    /// inclusive) after the client detected a gap.
    RequestMissing {
        /// Correlation id.
        id: MessageId,
        /// First missing seq.
        from_seq: ServerSeq,
        /// Last missing seq.
        to_seq: ServerSeq,
    },
}

impl ClientMessage {
    /// The correlation id of this message.
    pub fn id(&self) -> MessageId {
        match self {
            ClientMessage::Call { id, .. }
            | ClientMessage::Subscribe { id, .. }
            | ClientMessage::SubscriptionStop { id }
            | ClientMessage::RequestMissing { id, .. } => *id,
        }
    }
}

/// Messages pushed from the server to the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Reply to a `Call`. Exactly one of `data`/`error` is set.
    Result {
        /// Id of the call this answers.
        id: MessageId,
        /// Success payload.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<serde_json::Value>,
        /// Failure payload.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<ErrorShape>,
    },
    /// Server acknowledged an optimistic mutation and assigned it a place
    /// in the delta stream.
    Ack {
        /// The mutation's client-local seq.
        client_seq: ClientSeq,
        /// The server seq the mutation's effects were published under.
        server_seq: ServerSeq,
    },
    /// A sequenced data event for one subscription.
    SubscriptionData {
        /// Subscription id.
        id: MessageId,
        /// Opaque payload.
        data: serde_json::Value,
        /// Per-subscription strictly increasing seq.
        server_seq: ServerSeq,
        /// The previous seq sent for this subscription.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        prev_server_seq: Option<ServerSeq>,
    },
    /// Terminal subscription failure. No further events follow for this id.
    SubscriptionError {
        /// Subscription id.
        id: MessageId,
        /// What went wrong.
        error: ErrorShape,
    },
    /// Graceful subscription completion. No further events follow.
    SubscriptionEnd {
        /// Subscription id.
        id: MessageId,
    },
}
