//! JSON-RPC wire shapes for the agent protocol.
//!
//! One JSON object per line in both directions. Inbound traffic is either a
//! **response** (bears an `id`) or a **notification** (bears a `method` and
//! no `id`); the presence of `method` with an absent `id` is exactly the
//! discriminator. [`classify`] performs that split, and
//! [`SessionUpdate::from_notification`] decodes the dynamic `session/update`
//! payload into a tagged variant.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{AppError, Result};

/// Update methods the agent streams while a request is in flight.
/// `session/notification` is a legacy alias still emitted by older agents.
pub const UPDATE_METHODS: [&str; 2] = ["session/update", "session/notification"];

/// Outgoing JSON-RPC request. `params` is omitted entirely when empty.
#[derive(Debug, Serialize)]
pub struct OutgoingRequest<'a> {
    /// Protocol version marker, always `"2.0"`.
    pub jsonrpc: &'static str,
    /// Request method name.
    pub method: &'a str,
    /// Monotonically increasing correlation id.
    pub id: u64,
    /// Method parameters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl<'a> OutgoingRequest<'a> {
    /// Build a request for `method` with the given `id`.
    #[must_use]
    pub fn new(method: &'a str, id: u64, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            method,
            id,
            params,
        }
    }

    /// Serialise to a single NDJSON line (no trailing newline).
    ///
    /// # Errors
    ///
    /// Returns `AppError::Acp` if serialisation fails.
    pub fn to_line(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|err| AppError::Acp(format!("failed to serialise request: {err}")))
    }
}

/// Agent-declared error object inside a response.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct RpcError {
    /// Numeric JSON-RPC error code.
    #[serde(default)]
    pub code: i64,
    /// Human-readable error description.
    #[serde(default)]
    pub message: String,
}

impl RpcError {
    /// Whether the error reports a session id as missing or expired.
    ///
    /// The agent does not use a dedicated code for this, so the check is a
    /// substring match on the message.
    #[must_use]
    pub fn is_session_not_found(&self) -> bool {
        let msg = self.message.to_lowercase();
        msg.contains("session")
            && (msg.contains("not found") || msg.contains("expired") || msg.contains("unknown"))
    }
}

/// A response correlated to an outgoing request by `id`.
#[derive(Debug, Clone)]
pub struct Response {
    /// Correlation id echoed by the agent.
    pub id: u64,
    /// Success payload; absent when `error` is set.
    pub result: Option<Value>,
    /// Agent-declared failure; absent when `result` is set.
    pub error: Option<RpcError>,
}

impl Response {
    /// Whether the response carries a success payload.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.result.is_some() && self.error.is_none()
    }
}

/// An unsolicited message observed while a request is pending.
#[derive(Debug, Clone)]
pub struct Notification {
    /// Notification method name.
    pub method: String,
    /// Notification payload.
    pub params: Value,
}

/// One parsed inbound line.
#[derive(Debug)]
pub enum Inbound {
    /// Bears an `id` — a reply to some request (not necessarily ours).
    Response(Response),
    /// Bears a `method` and no `id`.
    Notification(Notification),
}

/// Loose envelope used to discriminate inbound traffic.
#[derive(Debug, Deserialize)]
struct RawInbound {
    id: Option<u64>,
    method: Option<String>,
    #[serde(default)]
    params: Value,
    result: Option<Value>,
    error: Option<RpcError>,
}

/// Classify one inbound line as a response or a notification.
///
/// # Errors
///
/// Returns `AppError::Acp` for lines that are not valid JSON or fit neither
/// shape. Callers treat this as recoverable transport noise.
pub fn classify(line: &str) -> Result<Inbound> {
    let raw: RawInbound = serde_json::from_str(line)
        .map_err(|err| AppError::Acp(format!("malformed json: {err}")))?;

    if let Some(id) = raw.id {
        return Ok(Inbound::Response(Response {
            id,
            result: raw.result,
            error: raw.error,
        }));
    }

    match raw.method {
        Some(method) => Ok(Inbound::Notification(Notification {
            method,
            params: raw.params,
        })),
        None => Err(AppError::Acp(
            "message has neither id nor method".into(),
        )),
    }
}

// ── Session updates ───────────────────────────────────────────────────────────

/// Decoded `sessionUpdate` payload from a `session/update` notification.
///
/// The update object normally sits under `params.update`; some agents put it
/// directly in `params` (detected via a `sessionUpdate` key). Both camelCase
/// and snake_case discriminator spellings occur in the wild.
#[derive(Debug, Clone)]
pub enum SessionUpdate {
    /// Incremental fragment of the agent's textual reply.
    MessageChunk {
        /// The text fragment from `content.text`.
        text: String,
    },
    /// The agent started invoking a tool.
    ToolCall(Value),
    /// Progress on a previously announced tool invocation.
    ToolCallUpdate(Value),
    /// The agent reported an in-session error.
    Error(Value),
    /// The current prompt finished.
    Complete,
    /// Unrecognised discriminator, preserved for logging.
    Unknown(String),
}

impl SessionUpdate {
    /// Decode a notification into a session update.
    ///
    /// Returns `None` when the notification is not a session update at all
    /// (different method, or no recognisable update object).
    #[must_use]
    pub fn from_notification(notification: &Notification) -> Option<Self> {
        if !UPDATE_METHODS.contains(&notification.method.as_str()) {
            return None;
        }

        let params = &notification.params;
        // Fallback shape rule: prefer `params.update`, accept `params` itself
        // when it carries the discriminator.
        let update = match params.get("update") {
            Some(update) => update,
            None if params.get("sessionUpdate").is_some() => params,
            None => return None,
        };

        let kind = update.get("sessionUpdate").and_then(Value::as_str)?;
        let decoded = match kind {
            "agentMessageChunk" | "agent_message_chunk" => {
                let text = update
                    .get("content")
                    .and_then(|c| c.get("text"))
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_owned();
                Self::MessageChunk { text }
            }
            "toolCall" | "tool_call" => Self::ToolCall(update.clone()),
            "toolCallUpdate" | "tool_call_update" => Self::ToolCallUpdate(update.clone()),
            "error" => Self::Error(update.clone()),
            "complete" => Self::Complete,
            other => Self::Unknown(other.to_owned()),
        };
        Some(decoded)
    }
}
