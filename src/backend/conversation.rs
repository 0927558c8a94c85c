//! Turn protocol over a stdio transport.
//!
//! One turn: send a `user` frame, then consume frames until the terminal
//! `result`. Along the way assistant text is accumulated and every
//! `control_request` is answered with a `control_response` carrying the same
//! `request_id`.
//!
//! A cancelled turn leaves the agent mid-answer. The backend sends an
//! `interrupt`, remembers that one `result` is still owed, and the next turn
//! first drains frames up to that `result` so stale output never leaks into
//! a fresh answer.

use std::path::Path;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use serde_json::Value;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::backend::gate::PermissionGate;
use crate::backend::{BackendFactory, SessionBackend};
use crate::config::GlobalConfig;
use crate::executor::{ExecutorConfig, ToolExecutor};
use crate::mcp::bridge::McpBridge;
use crate::models::protocol::{
    allow_envelope, control_error, control_success, deny_envelope, interrupt_request,
    mcp_envelope, user_message, ControlRequest, InboundMessage,
};
use crate::models::tool::ToolInvocation;
use crate::policy::evaluator::PermissionPolicy;
use crate::policy::roots::AllowedRoots;
use crate::responder::Responder;
use crate::skills::{DirSkillStore, SkillStore};
use crate::transport::spawner::SpawnOptions;
use crate::transport::{Inbound, Transport};
use crate::{AppError, Result};

/// Denial sent for control requests that belong to an abandoned turn.
const CANCELLED_REASON: &str = "turn was cancelled";

#[derive(Debug, Default)]
struct TurnState {
    /// Interrupted turns whose `result` has not been read yet.
    stale_turns: usize,
}

/// [`SessionBackend`] speaking the stream-JSON protocol.
pub struct ConversationBackend {
    transport: Arc<Transport>,
    gate: PermissionGate,
    mcp: McpBridge,
    turn: Mutex<TurnState>,
}

impl ConversationBackend {
    /// Drive an already handshaken `transport`.
    #[must_use]
    pub fn new(transport: Arc<Transport>, gate: PermissionGate, mcp: McpBridge) -> Self {
        Self {
            transport,
            gate,
            mcp,
            turn: Mutex::new(TurnState::default()),
        }
    }

    /// The underlying transport.
    #[must_use]
    pub fn transport(&self) -> &Arc<Transport> {
        &self.transport
    }

    async fn run_turn(
        &self,
        message: &str,
        responder: &dyn Responder,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let mut state = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(AppError::Cancelled { partial: String::new() }),
            state = self.turn.lock() => state,
        };
        let inbound = self.transport.receive().await;

        if state.stale_turns > 0 {
            self.drain_stale(&inbound, &mut state, cancel).await?;
        }

        self.transport
            .send_json(&user_message(&self.transport.session_id(), message))
            .await?;

        let mut texts: Vec<String> = Vec::new();
        loop {
            let frame = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(self.abandon(&mut state, &texts).await),
                frame = inbound.recv() => frame,
            };
            let Some(frame) = frame else {
                return Err(AppError::AgentExited(
                    "agent stream closed before the turn finished".into(),
                ));
            };
            if frame.is_replay {
                continue;
            }

            match frame.message {
                InboundMessage::Assistant { message } => {
                    if let Some(text) = message.text() {
                        texts.push(text);
                    }
                }
                InboundMessage::ControlRequest {
                    request_id,
                    request,
                } => {
                    let reply = tokio::select! {
                        biased;
                        () = cancel.cancelled() => {
                            self.send_best_effort(&control_error(&request_id, CANCELLED_REASON))
                                .await;
                            return Err(self.abandon(&mut state, &texts).await);
                        }
                        reply = self.answer_control(&request_id, request, responder) => reply,
                    };
                    self.transport.send_json(&reply).await?;
                }
                InboundMessage::Result {
                    subtype,
                    is_error,
                    result,
                    session_id,
                } => {
                    if let Some(id) = session_id {
                        self.transport.set_session_id(&id);
                    }
                    debug!(%subtype, is_error, frames = texts.len(), "turn complete");
                    return finish_turn(&texts, is_error, result, &subtype);
                }
                InboundMessage::System {
                    subtype,
                    session_id: Some(id),
                } if subtype == "init" => self.transport.set_session_id(&id),
                InboundMessage::ControlResponse { response } => {
                    debug!(request_id = %response.request_id, subtype = %response.subtype, "control response");
                }
                other => debug!(frame = ?other, "ignoring frame"),
            }
        }
    }

    async fn answer_control(
        &self,
        request_id: &str,
        request: ControlRequest,
        responder: &dyn Responder,
    ) -> Value {
        match request {
            ControlRequest::CanUseTool { tool_name, input } => {
                let invocation = ToolInvocation::new(&tool_name, input);
                let decision = self.gate.decide(request_id, &invocation, responder).await;
                info!(
                    request_id,
                    tool_name = %tool_name,
                    allowed = decision.allowed,
                    reason = %decision.reason,
                    "permission decided"
                );
                let envelope = if decision.allowed {
                    allow_envelope(&invocation.raw_input)
                } else {
                    deny_envelope(&decision.reason)
                };
                control_success(request_id, envelope)
            }
            ControlRequest::McpMessage {
                server_name,
                message,
            } => {
                let reply = self.mcp.handle(&server_name, &message, responder).await;
                control_success(request_id, mcp_envelope(reply))
            }
            ControlRequest::Unsupported => {
                warn!(request_id, "unsupported control request");
                control_error(request_id, "unsupported control request")
            }
        }
    }

    /// Consume frames of interrupted turns up to their `result`.
    async fn drain_stale(
        &self,
        inbound: &Inbound,
        state: &mut TurnState,
        cancel: &CancellationToken,
    ) -> Result<()> {
        debug!(stale_turns = state.stale_turns, "draining interrupted turns");
        while state.stale_turns > 0 {
            let frame = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(AppError::Cancelled { partial: String::new() }),
                frame = inbound.recv() => frame,
            };
            let Some(frame) = frame else {
                return Err(AppError::AgentExited(
                    "agent stream closed while draining an interrupted turn".into(),
                ));
            };
            if frame.is_replay {
                continue;
            }

            match frame.message {
                InboundMessage::ControlRequest {
                    request_id,
                    request,
                } => {
                    let reply = match request {
                        ControlRequest::CanUseTool { .. } => {
                            control_success(&request_id, deny_envelope(CANCELLED_REASON))
                        }
                        _ => control_error(&request_id, CANCELLED_REASON),
                    };
                    self.transport.send_json(&reply).await?;
                }
                InboundMessage::Result { session_id, .. } => {
                    if let Some(id) = session_id {
                        self.transport.set_session_id(&id);
                    }
                    state.stale_turns -= 1;
                }
                InboundMessage::System {
                    subtype,
                    session_id: Some(id),
                } if subtype == "init" => self.transport.set_session_id(&id),
                _ => {}
            }
        }
        Ok(())
    }

    /// Interrupt the agent and record the owed `result`.
    async fn abandon(&self, state: &mut TurnState, texts: &[String]) -> AppError {
        let request_id = format!("interrupt_{}", uuid::Uuid::new_v4());
        self.send_best_effort(&interrupt_request(&request_id)).await;
        state.stale_turns += 1;
        info!(request_id, "turn cancelled, interrupt sent");
        AppError::Cancelled {
            partial: texts.join("\n"),
        }
    }

    async fn send_best_effort(&self, value: &Value) {
        if let Err(err) = self.transport.send_json(value).await {
            debug!(error = %err, "best-effort send failed");
        }
    }
}

impl SessionBackend for ConversationBackend {
    fn session_id(&self) -> String {
        self.transport.session_id()
    }

    fn converse<'a>(
        &'a self,
        message: &'a str,
        responder: &'a dyn Responder,
        cancel: &'a CancellationToken,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<String>> + Send + 'a>> {
        let span = info_span!("converse", session_id = %self.transport.session_id());
        Box::pin(self.run_turn(message, responder, cancel).instrument(span))
    }

    fn close(&self) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send + '_>> {
        Box::pin(self.transport.close())
    }
}

impl std::fmt::Debug for ConversationBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationBackend")
            .field("transport", &self.transport)
            .finish_non_exhaustive()
    }
}

/// Final answer of a turn from its accumulated text and `result` frame.
fn finish_turn(
    texts: &[String],
    is_error: bool,
    result: Option<String>,
    subtype: &str,
) -> Result<String> {
    if !texts.is_empty() {
        return Ok(texts.join("\n"));
    }
    let result = result.unwrap_or_default();
    if is_error {
        let detail = if result.is_empty() { subtype } else { result.as_str() };
        return Err(AppError::Agent(format!("turn failed: {detail}")));
    }
    Ok(result)
}

/// [`BackendFactory`] that spawns the configured agent binary.
pub struct AgentBackendFactory {
    config: Arc<GlobalConfig>,
    skills: Option<Arc<dyn SkillStore>>,
    resume: StdMutex<Option<String>>,
}

impl AgentBackendFactory {
    /// Factory for `config`; serves skills from `tools.skills_dir` if set.
    #[must_use]
    pub fn new(config: Arc<GlobalConfig>) -> Self {
        let skills = config
            .tools
            .skills_dir
            .as_ref()
            .map(|dir| Arc::new(DirSkillStore::new(dir.clone())) as Arc<dyn SkillStore>);
        Self {
            config,
            skills,
            resume: StdMutex::new(None),
        }
    }

    /// Replace the skill store.
    #[must_use]
    pub fn with_skills(mut self, skills: Arc<dyn SkillStore>) -> Self {
        self.skills = Some(skills);
        self
    }

    /// Resume agent session `id` on the first backend created.
    #[must_use]
    pub fn with_resume(self, id: impl Into<String>) -> Self {
        *self.resume.lock().unwrap_or_else(PoisonError::into_inner) = Some(id.into());
        self
    }

    async fn build(&self, work_dir: &Path) -> Result<Arc<dyn SessionBackend>> {
        let config = &self.config;
        let resume = self
            .resume
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let roots = if config.allowed_roots.is_empty() {
            AllowedRoots::new([work_dir])?
        } else {
            AllowedRoots::new(&config.allowed_roots)?
        };
        let policy = PermissionPolicy::from_config(roots, work_dir.to_path_buf(), &config.permissions);
        let gate = PermissionGate::new(policy, config.permissions.interactive_approval);

        let mut executor = ToolExecutor::new(ExecutorConfig::from_global(config, work_dir));
        if let Some(skills) = &self.skills {
            executor = executor.with_skills(Arc::clone(skills));
        }
        let bridge = McpBridge::new(config.tools.mcp_server_name.clone(), executor);

        let options = SpawnOptions {
            program: config.agent_cli.clone(),
            leading_args: config.agent_args.clone(),
            work_dir: work_dir.to_path_buf(),
            resume,
            init_timeout: config.init_timeout(),
        };
        let transport = Transport::start(&options, &bridge).await?;
        info!(session_id = %transport.session_id(), "backend ready");
        Ok(Arc::new(ConversationBackend::new(Arc::new(transport), gate, bridge)))
    }
}

impl BackendFactory for AgentBackendFactory {
    fn create(
        &self,
        work_dir: &Path,
    ) -> std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Arc<dyn SessionBackend>>> + Send + '_>,
    > {
        let work_dir = work_dir.to_path_buf();
        Box::pin(async move { self.build(&work_dir).await })
    }
}

impl std::fmt::Debug for AgentBackendFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentBackendFactory")
            .field("agent_cli", &self.config.agent_cli)
            .field("skills", &self.skills.is_some())
            .finish_non_exhaustive()
    }
}
