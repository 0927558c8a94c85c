//! Wire model for the agent's stream-JSON protocol.
//!
//! Inbound frames are decoded into [`InboundMessage`]; outbound frames are
//! built by the free functions at the bottom of this module so every caller
//! produces byte-identical envelopes.

use serde::Deserialize;
use serde_json::{json, Value};

use crate::{AppError, Result};

/// A decoded line from the agent's stdout.
#[derive(Debug, Clone)]
pub struct InboundFrame {
    /// `isReplay: true` frames echo history and must not be acted upon.
    pub is_replay: bool,
    /// Typed message body.
    pub message: InboundMessage,
}

/// Inbound message discriminated by the top-level `type` field.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    /// Assistant output for the current turn.
    Assistant {
        /// Anthropic-style message body.
        message: AssistantBody,
    },
    /// Echoed user frame (tool results); carries nothing the relay needs.
    User {},
    /// Out-of-band request the agent expects an answer to.
    ControlRequest {
        /// Correlation id that must be echoed verbatim.
        request_id: String,
        /// Request payload.
        request: ControlRequest,
    },
    /// Answer to a request the relay sent (initialize, interrupt).
    ControlResponse {
        /// Response payload.
        response: ControlResponseBody,
    },
    /// Terminal frame of a turn.
    Result {
        /// `success` or an `error_*` subtype.
        #[serde(default)]
        subtype: String,
        /// Whether the agent considers the turn failed.
        #[serde(default)]
        is_error: bool,
        /// Final text as summarised by the agent.
        #[serde(default)]
        result: Option<String>,
        /// Session id the turn ran under.
        #[serde(default)]
        session_id: Option<String>,
    },
    /// System notifications; `init` carries the session id.
    System {
        /// Notification subtype.
        #[serde(default)]
        subtype: String,
        /// Session id (present on `init`).
        #[serde(default)]
        session_id: Option<String>,
    },
    /// Any other `type`.
    #[serde(other)]
    Unknown,
}

/// Body of an `assistant` frame.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AssistantBody {
    /// Content blocks; only `text` blocks are of interest.
    #[serde(default)]
    pub content: Vec<ContentBlock>,
}

impl AssistantBody {
    /// Concatenate every text block of this frame.
    ///
    /// Returns `None` when the frame carries no text at all.
    #[must_use]
    pub fn text(&self) -> Option<String> {
        let mut out: Option<String> = None;
        for block in &self.content {
            if let ContentBlock::Text { text } = block {
                out.get_or_insert_with(String::new).push_str(text);
            }
        }
        out
    }
}

/// A single assistant content block.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Plain text.
    Text {
        /// Text payload.
        text: String,
    },
    /// Tool use, thinking, images and anything else.
    #[serde(other)]
    Other,
}

/// Payload of an inbound `control_request`, discriminated by `subtype`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "subtype", rename_all = "snake_case")]
pub enum ControlRequest {
    /// Permission check before the agent runs a tool.
    CanUseTool {
        /// Tool name, possibly `mcp__<server>__<tool>`.
        tool_name: String,
        /// Structured tool input, echoed back on allow.
        #[serde(default)]
        input: Value,
    },
    /// Nested JSON-RPC 2.0 message for a virtual MCP server.
    McpMessage {
        /// Virtual server the message is addressed to.
        server_name: String,
        /// JSON-RPC envelope.
        message: Value,
    },
    /// Subtypes the relay does not serve.
    #[serde(other)]
    Unsupported,
}

/// Payload of an inbound `control_response`.
#[derive(Debug, Clone, Deserialize)]
pub struct ControlResponseBody {
    /// `success` or `error`.
    pub subtype: String,
    /// Correlation id of the relay's original request.
    pub request_id: String,
    /// Error description when `subtype == "error"`.
    #[serde(default)]
    pub error: Option<String>,
}

/// Parse a single NDJSON line into an [`InboundFrame`].
///
/// # Return value
///
/// - `Ok(Some(frame))`: a JSON object with a `type` field.
/// - `Ok(None)`: an empty or whitespace-only line.
///
/// # Errors
///
/// Returns [`AppError::Protocol`] if the line is not valid JSON or a known
/// `type` is missing required fields.
pub fn parse_inbound_line(line: &str) -> Result<Option<InboundFrame>> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    let value: Value = serde_json::from_str(trimmed)
        .map_err(|e| AppError::Protocol(format!("malformed json: {e}")))?;

    let is_replay = value
        .get("isReplay")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    let message: InboundMessage = serde_json::from_value(value)
        .map_err(|e| AppError::Protocol(format!("unrecognised frame: {e}")))?;

    Ok(Some(InboundFrame { is_replay, message }))
}

// ── Outbound builders ─────────────────────────────────────────────────────────

/// Build the `user` frame that opens a turn.
#[must_use]
pub fn user_message(session_id: &str, text: &str) -> Value {
    json!({
        "type": "user",
        "session_id": session_id,
        "message": { "role": "user", "content": text }
    })
}

/// Build a relay-originated `control_request`.
#[must_use]
pub fn control_request(request_id: &str, request: Value) -> Value {
    json!({
        "type": "control_request",
        "request_id": request_id,
        "request": request
    })
}

/// Build the `initialize` request declaring the virtual MCP servers.
#[must_use]
pub fn initialize_request(request_id: &str, mcp_servers: &[String]) -> Value {
    control_request(
        request_id,
        json!({
            "subtype": "initialize",
            "hooks": Value::Null,
            "sdkMcpServers": mcp_servers
        }),
    )
}

/// Build an `interrupt` request that stops the agent's current turn.
#[must_use]
pub fn interrupt_request(request_id: &str) -> Value {
    control_request(request_id, json!({ "subtype": "interrupt" }))
}

/// Build a successful `control_response` echoing `request_id`.
#[must_use]
pub fn control_success(request_id: &str, response: Value) -> Value {
    json!({
        "type": "control_response",
        "response": {
            "subtype": "success",
            "request_id": request_id,
            "response": response
        }
    })
}

/// Build an error `control_response` echoing `request_id`.
#[must_use]
pub fn control_error(request_id: &str, error: &str) -> Value {
    json!({
        "type": "control_response",
        "response": {
            "subtype": "error",
            "request_id": request_id,
            "error": error
        }
    })
}

/// Permission envelope allowing a tool with its original input.
#[must_use]
pub fn allow_envelope(input: &Value) -> Value {
    json!({ "behavior": "allow", "updatedInput": input })
}

/// Permission envelope denying a tool without interrupting the turn.
#[must_use]
pub fn deny_envelope(reason: &str) -> Value {
    json!({ "behavior": "deny", "message": reason, "interrupt": false })
}

/// Wrap a JSON-RPC response for transport inside a `control_response`.
#[must_use]
pub fn mcp_envelope(jsonrpc: Value) -> Value {
    json!({ "mcp_response": jsonrpc })
}
