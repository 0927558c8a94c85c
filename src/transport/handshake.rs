//! `initialize` handshake.
//!
//! The relay sends one `initialize` control request declaring its virtual
//! MCP server, then reads frames until the agent acknowledges it or reports
//! its session id on a `system`/`init` frame. While waiting, the agent may
//! open the nested MCP connection (`initialize`, `notifications/initialized`,
//! `tools/list`); each of those requests is answered in place, so the loop
//! runs as many round-trips as the agent needs.

use std::time::Duration;

use futures_util::StreamExt;
use tokio::io::AsyncRead;
use tokio_util::codec::FramedRead;
use tracing::{debug, info, warn};

use crate::mcp::bridge::McpBridge;
use crate::models::protocol::{
    control_error, control_success, initialize_request, mcp_envelope, parse_inbound_line,
    ControlRequest, InboundMessage,
};
use crate::transport::codec::AgentCodec;
use crate::transport::Transport;
use crate::{AppError, Result};

/// Run the handshake over `framed`, writing through `transport`.
///
/// # Errors
///
/// - [`AppError::HandshakeTimeout`] if no acknowledgment arrives within
///   `timeout`.
/// - [`AppError::Spawn`] if the agent's stdout closes first.
/// - [`AppError::Protocol`] if the agent rejects `initialize`.
/// - Any error from writing to the agent.
pub async fn perform<R>(
    transport: &Transport,
    framed: &mut FramedRead<R, AgentCodec>,
    mcp: &McpBridge,
    timeout: Duration,
) -> Result<()>
where
    R: AsyncRead + Unpin + Send,
{
    let init_id = format!("init_{}", uuid::Uuid::new_v4());
    transport
        .send_json(&initialize_request(&init_id, &[mcp.server_name().to_owned()]))
        .await?;
    debug!(label = transport.label(), request_id = %init_id, "handshake: initialize sent");

    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let next = tokio::time::timeout_at(deadline, framed.next())
            .await
            .map_err(|_| {
                AppError::HandshakeTimeout(format!(
                    "no initialize acknowledgment within {}s",
                    timeout.as_secs_f64()
                ))
            })?;

        let line = match next {
            None => return Err(AppError::Spawn("agent exited during handshake".into())),
            Some(Err(err)) => {
                return Err(AppError::Spawn(format!("agent stdout failed during handshake: {err}")))
            }
            Some(Ok(line)) => line,
        };

        let frame = match parse_inbound_line(&line) {
            Ok(Some(frame)) => frame,
            Ok(None) => continue,
            Err(err) => {
                warn!(error = %err, raw_line = %line, "handshake: parse error, skipping line");
                continue;
            }
        };
        if frame.is_replay {
            continue;
        }

        match frame.message {
            InboundMessage::ControlResponse { response } if response.request_id == init_id => {
                if response.subtype == "error" {
                    return Err(AppError::Protocol(format!(
                        "initialize rejected: {}",
                        response.error.unwrap_or_default()
                    )));
                }
                info!(session_id = %transport.session_id(), "handshake: initialize acknowledged");
                return Ok(());
            }
            InboundMessage::System {
                subtype,
                session_id: Some(session_id),
            } if subtype == "init" => {
                transport.set_session_id(&session_id);
                info!(%session_id, "handshake: session initialised");
                return Ok(());
            }
            InboundMessage::ControlRequest {
                request_id,
                request: ControlRequest::McpMessage {
                    server_name,
                    message,
                },
            } => {
                let reply = mcp.handle_setup(&server_name, &message);
                transport
                    .send_json(&control_success(&request_id, mcp_envelope(reply)))
                    .await?;
            }
            InboundMessage::ControlRequest { request_id, .. } => {
                transport
                    .send_json(&control_error(
                        &request_id,
                        "control request not available during handshake",
                    ))
                    .await?;
            }
            other => debug!(frame = ?other, "handshake: skipping frame"),
        }
    }
}
