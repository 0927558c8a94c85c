//! JSON-RPC 2.0 dispatch for the virtual MCP server.
//!
//! The agent reaches the relay's own tools through `mcp_message` control
//! requests. Each request carries one JSON-RPC envelope; the bridge answers
//! with exactly one JSON-RPC response, which the caller wraps in a
//! `control_response`.

use serde_json::{json, Value};
use tracing::{debug, info_span, warn, Instrument};

use crate::executor::{ToolExecutor, ToolOutput};
use crate::mcp::catalog;
use crate::models::tool::ToolInvocation;
use crate::responder::Responder;

/// MCP protocol revision the relay speaks.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// JSON-RPC: method not found.
pub const METHOD_NOT_FOUND: i64 = -32601;

/// JSON-RPC: invalid request.
pub const INVALID_REQUEST: i64 = -32600;

/// JSON-RPC: invalid params.
pub const INVALID_PARAMS: i64 = -32602;

/// Virtual MCP server backed by a [`ToolExecutor`].
#[derive(Debug, Clone)]
pub struct McpBridge {
    server_name: String,
    executor: ToolExecutor,
}

impl McpBridge {
    /// Serve `executor` under `server_name`.
    #[must_use]
    pub fn new(server_name: impl Into<String>, executor: ToolExecutor) -> Self {
        Self {
            server_name: server_name.into(),
            executor,
        }
    }

    /// Name the agent addresses this server by.
    #[must_use]
    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    /// The `--mcp-config` document declaring this server to the agent.
    #[must_use]
    pub fn mcp_config(&self) -> Value {
        json!({
            "mcpServers": {
                self.server_name.as_str(): { "type": "sdk", "name": self.server_name }
            }
        })
    }

    /// Answer a message that arrives before the handshake acknowledgment.
    ///
    /// Only the setup methods are served; `tools/call` is rejected because
    /// no turn (and no front-end) exists yet.
    #[must_use]
    pub fn handle_setup(&self, server_name: &str, message: &Value) -> Value {
        let id = message.get("id").cloned().unwrap_or(Value::Null);
        if server_name != self.server_name {
            warn!(server_name, "mcp message for unknown server, ignoring");
            return empty_success(id);
        }
        match method_of(message) {
            "tools/call" => rpc_error(
                id,
                INVALID_REQUEST,
                "tools/call is not available before the session is ready",
            ),
            method => self.respond_static(id, method),
        }
    }

    /// Answer a message that arrives during a turn.
    pub async fn handle(
        &self,
        server_name: &str,
        message: &Value,
        responder: &dyn Responder,
    ) -> Value {
        let id = message.get("id").cloned().unwrap_or(Value::Null);
        if server_name != self.server_name {
            warn!(server_name, "mcp message for unknown server, ignoring");
            return empty_success(id);
        }

        let method = method_of(message);
        if method != "tools/call" {
            return self.respond_static(id, method);
        }

        let params = message.get("params").cloned().unwrap_or(Value::Null);
        let Some(tool_name) = params.get("name").and_then(Value::as_str) else {
            return rpc_error(id, INVALID_PARAMS, "tools/call requires params.name");
        };
        let arguments = params.get("arguments").cloned().unwrap_or(Value::Null);
        let invocation = ToolInvocation::new(tool_name, arguments);

        let span = info_span!("mcp_tools_call", tool_name);
        let output = self
            .executor
            .execute(&invocation, responder)
            .instrument(span)
            .await;
        rpc_result(id, call_result(&output))
    }

    fn respond_static(&self, id: Value, method: &str) -> Value {
        debug!(method, "mcp request");
        match method {
            "initialize" => rpc_result(
                id,
                json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": { "tools": {} },
                    "serverInfo": {
                        "name": self.server_name,
                        "version": env!("CARGO_PKG_VERSION")
                    }
                }),
            ),
            "notifications/initialized" => rpc_result(id, json!({})),
            "tools/list" => rpc_result(id, json!({ "tools": catalog::tools() })),
            other => rpc_error(id, METHOD_NOT_FOUND, &format!("method not found: {other}")),
        }
    }
}

/// Wrap a tool result as MCP `content`.
#[must_use]
pub fn call_result(output: &ToolOutput) -> Value {
    json!({
        "content": [{ "type": "text", "text": output.text }],
        "isError": output.is_error
    })
}

fn method_of(message: &Value) -> &str {
    message.get("method").and_then(Value::as_str).unwrap_or("")
}

fn empty_success(id: Value) -> Value {
    rpc_result(id, json!({}))
}

fn rpc_result(id: Value, result: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

fn rpc_error(id: Value, code: i64, message: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": { "code": code, "message": message }
    })
}
