//! Logical message model.
//!
//! Every frame that crosses the link decodes to exactly one `Message`.
//! The `action` tag is the on-wire discriminator; `MessageKind` is the
//! in-process tag the inbound queue filters on. `tether-link` routes by
//! kind and never inspects message bodies.

use serde::{Deserialize, Serialize};

/// Type tag for queue filtering and codec dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    /// Outbound key-exchange request ("staging").
    KeyExchangeRequest,
    /// Peer's key-exchange response carrying the sealed session key.
    KeyExchangeResponse,
    /// First steady-state message establishing the session identity.
    Checkin,
    /// Agent-produced tasking output (responses, delegates, relays).
    Tasking,
    /// Peer response — both the checkin reply and steady-state replies.
    Response,
}

/// A complete logical message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action")]
pub enum Message {
    #[serde(rename = "staging")]
    KeyExchangeRequest {
        /// Exported public key, transport-ready encoding.
        public_key: String,
        /// Locally chosen identifier for this exchange attempt.
        session_id: String,
    },
    #[serde(rename = "staging_response")]
    KeyExchangeResponse {
        /// Session key sealed with our public key, base64.
        session_key: String,
        /// Peer-assigned identity to adopt for subsequent traffic.
        identity: String,
    },
    #[serde(rename = "checkin")]
    Checkin(CheckinMessage),
    #[serde(rename = "tasking")]
    Tasking(TaskingMessage),
    #[serde(rename = "response")]
    Response(ResponseMessage),
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::KeyExchangeRequest { .. } => MessageKind::KeyExchangeRequest,
            Message::KeyExchangeResponse { .. } => MessageKind::KeyExchangeResponse,
            Message::Checkin(_) => MessageKind::Checkin,
            Message::Tasking(_) => MessageKind::Tasking,
            Message::Response(_) => MessageKind::Response,
        }
    }
}

/// Checkin — announces the agent to the peer and requests a session identity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckinMessage {
    /// Current session identity. Empty until one is assigned.
    pub identity: String,
    pub host: String,
    pub user: String,
    pub domain: String,
    pub pid: u32,
    pub os: String,
    pub architecture: String,
}

/// Tasking output produced by the agent between polls.
///
/// A tasking message with no deliverables is not worth sending; the
/// consumer loop checks `has_content` before enqueueing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskingMessage {
    /// Completed task output destined for the peer.
    pub responses: Vec<serde_json::Value>,
    /// Messages being forwarded on behalf of linked agents.
    pub delegates: Vec<serde_json::Value>,
    /// Relay stream frames (proxied connections).
    pub relays: Vec<serde_json::Value>,
}

impl TaskingMessage {
    pub fn has_content(&self) -> bool {
        !self.responses.is_empty() || !self.delegates.is_empty() || !self.relays.is_empty()
    }
}

/// Peer response — the checkin reply and every steady-state reply.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResponseMessage {
    /// Peer-assigned session identity. Present on the checkin reply.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity: Option<String>,
    /// New tasks for the agent to execute.
    pub tasks: Vec<serde_json::Value>,
    /// Acknowledgements for previously posted responses.
    pub responses: Vec<serde_json::Value>,
    /// Delegate traffic addressed to linked agents.
    pub delegates: Vec<serde_json::Value>,
}
