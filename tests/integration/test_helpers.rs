//! Shared fixtures for integration tests.

use std::collections::VecDeque;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use agent_relay::backend::conversation::ConversationBackend;
use agent_relay::backend::gate::PermissionGate;
use agent_relay::backend::{BackendFactory, SessionBackend};
use agent_relay::config::PolicyMode;
use agent_relay::executor::{ExecutorConfig, ToolExecutor};
use agent_relay::mcp::bridge::McpBridge;
use agent_relay::policy::evaluator::PermissionPolicy;
use agent_relay::policy::roots::AllowedRoots;
use agent_relay::responder::{PermissionPrompt, Responder};
use agent_relay::transport::Transport;
use agent_relay::{AppError, Result};

/// How long a test waits for any single frame.
pub const FRAME_TIMEOUT: Duration = Duration::from_secs(5);

// ─── Responder ────────────────────────────────────────────────────────

/// Responder that records every call.
///
/// Permission prompts are answered with `approve`, or never answered when
/// `hold` is set. `asked` is notified for every prompt.
#[derive(Debug, Default)]
pub struct RecordingResponder {
    pub approve: bool,
    pub hold: bool,
    pub asked: Notify,
    pub posts: Mutex<Vec<String>>,
    pub typing: AtomicUsize,
    pub prompts: Mutex<Vec<PermissionPrompt>>,
}

impl RecordingResponder {
    pub fn approving() -> Self {
        Self {
            approve: true,
            ..Self::default()
        }
    }

    pub fn rejecting() -> Self {
        Self::default()
    }

    pub fn holding() -> Self {
        Self {
            hold: true,
            ..Self::default()
        }
    }

    pub fn posts(&self) -> Vec<String> {
        self.posts.lock().unwrap().clone()
    }

    pub fn prompt_count(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

impl Responder for RecordingResponder {
    fn send_typing(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        self.typing.fetch_add(1, Ordering::SeqCst);
        Box::pin(async { Ok(()) })
    }

    fn post_response(&self, text: &str) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        self.posts.lock().unwrap().push(text.to_owned());
        Box::pin(async { Ok(()) })
    }

    fn add_reaction(&self, _emoji: &str) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async { Ok(()) })
    }

    fn send_update(&self, _text: &str) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async { Ok(()) })
    }

    fn ask_permission(
        &self,
        prompt: &PermissionPrompt,
    ) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + '_>> {
        self.prompts.lock().unwrap().push(prompt.clone());
        self.asked.notify_one();
        let approve = self.approve;
        let hold = self.hold;
        Box::pin(async move {
            if hold {
                std::future::pending::<()>().await;
            }
            Ok(approve)
        })
    }
}

// ─── Fake agent over in-memory pipes ──────────────────────────────────

/// The agent's end of a duplex transport.
pub struct FakeAgent {
    out: DuplexStream,
    lines: Lines<BufReader<DuplexStream>>,
}

impl FakeAgent {
    /// Write one frame to the relay.
    pub async fn send(&mut self, frame: Value) {
        let mut bytes = serde_json::to_vec(&frame).unwrap();
        bytes.push(b'\n');
        self.out.write_all(&bytes).await.unwrap();
    }

    /// Write raw bytes to the relay.
    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.out.write_all(bytes).await.unwrap();
    }

    /// Next frame the relay wrote.
    pub async fn next_json(&mut self) -> Value {
        let line = tokio::time::timeout(FRAME_TIMEOUT, self.lines.next_line())
            .await
            .expect("timed out waiting for a frame from the relay")
            .unwrap()
            .expect("relay closed its output");
        serde_json::from_str(&line).unwrap()
    }

    /// `None` once the relay has closed its output.
    pub async fn next_line_or_eof(&mut self) -> Option<String> {
        tokio::time::timeout(FRAME_TIMEOUT, self.lines.next_line())
            .await
            .expect("timed out waiting for the relay")
            .unwrap()
    }

    /// Simulate the agent exiting: close its stdout.
    pub async fn hang_up(&mut self) {
        self.out.shutdown().await.unwrap();
    }
}

/// A transport wired to a [`FakeAgent`].
pub fn fake_transport() -> (Transport, FakeAgent) {
    let (agent_out, relay_in) = tokio::io::duplex(64 * 1024);
    let (relay_out, agent_in) = tokio::io::duplex(64 * 1024);
    let transport = Transport::from_parts("fake", relay_in, relay_out, None);
    let agent = FakeAgent {
        out: agent_out,
        lines: BufReader::new(agent_in).lines(),
    };
    (transport, agent)
}

/// Tool executor rooted at `work_dir`.
pub fn test_executor(work_dir: &Path) -> ToolExecutor {
    ToolExecutor::new(ExecutorConfig {
        work_dir: work_dir.to_path_buf(),
        max_output_bytes: 10_000,
        command_timeout: Duration::from_secs(10),
        http_timeout: Duration::from_secs(5),
        search_url: "http://127.0.0.1:9/".into(),
    })
}

/// Virtual MCP server named `relay`.
pub fn test_bridge(work_dir: &Path) -> McpBridge {
    McpBridge::new("relay", test_executor(work_dir))
}

/// Conversation backend over a fake agent, with `root` as the only root.
pub fn test_backend(root: &Path) -> (ConversationBackend, FakeAgent) {
    let root = root.canonicalize().unwrap();
    let (transport, agent) = fake_transport();
    let policy = PermissionPolicy::new(
        AllowedRoots::new([&root]).unwrap(),
        root.clone(),
        PolicyMode::DenyNonRead,
    );
    let backend = ConversationBackend::new(
        Arc::new(transport),
        PermissionGate::new(policy, true),
        test_bridge(&root),
    );
    (backend, agent)
}

// ─── Frame builders ───────────────────────────────────────────────────

pub fn assistant(text: &str) -> Value {
    serde_json::json!({
        "type": "assistant",
        "message": { "role": "assistant", "content": [{ "type": "text", "text": text }] }
    })
}

pub fn result(text: &str) -> Value {
    serde_json::json!({
        "type": "result",
        "subtype": "success",
        "is_error": false,
        "result": text
    })
}

pub fn can_use_tool(request_id: &str, tool: &str, input: Value) -> Value {
    serde_json::json!({
        "type": "control_request",
        "request_id": request_id,
        "request": { "subtype": "can_use_tool", "tool_name": tool, "input": input }
    })
}

pub fn mcp_message(request_id: &str, server: &str, message: Value) -> Value {
    serde_json::json!({
        "type": "control_request",
        "request_id": request_id,
        "request": { "subtype": "mcp_message", "server_name": server, "message": message }
    })
}

// ─── Fake backends for session and orchestrator tests ─────────────────

/// What a fake backend does with the next message.
#[derive(Debug, Clone)]
pub enum Reply {
    /// Answer `"<session id>: <message>"`.
    Echo,
    /// Sleep, then echo.
    Slow(Duration),
    /// Fail with this error.
    Fail(fn() -> AppError),
    /// Wait for cancellation, then return `Cancelled` with this partial.
    UntilCancelled(&'static str),
}

/// Shared script and event log for fake backends.
#[derive(Debug, Default)]
pub struct Script {
    pub replies: Mutex<VecDeque<Reply>>,
    pub events: Mutex<Vec<String>>,
    pub fail_next_create: Mutex<bool>,
    pub active: AtomicUsize,
    pub max_active: AtomicUsize,
}

impl Script {
    pub fn push(&self, reply: Reply) {
        self.replies.lock().unwrap().push_back(reply);
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    fn log(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }
}

pub struct FakeBackend {
    id: String,
    script: Arc<Script>,
}

impl SessionBackend for FakeBackend {
    fn session_id(&self) -> String {
        self.id.clone()
    }

    fn converse<'a>(
        &'a self,
        message: &'a str,
        _responder: &'a dyn Responder,
        cancel: &'a CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>> {
        Box::pin(async move {
            let now = self.script.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.script.max_active.fetch_max(now, Ordering::SeqCst);
            self.script.log(format!("converse {} {message}", self.id));

            let reply = self
                .script
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Reply::Echo);
            let outcome = match reply {
                Reply::Echo => Ok(format!("{}: {message}", self.id)),
                Reply::Slow(delay) => {
                    tokio::time::sleep(delay).await;
                    Ok(format!("{}: {message}", self.id))
                }
                Reply::Fail(make) => Err(make()),
                Reply::UntilCancelled(partial) => {
                    cancel.cancelled().await;
                    Err(AppError::Cancelled {
                        partial: partial.to_owned(),
                    })
                }
            };

            self.script.active.fetch_sub(1, Ordering::SeqCst);
            outcome
        })
    }

    fn close(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        self.script.log(format!("close {}", self.id));
        Box::pin(async {})
    }
}

/// Factory numbering its backends `s1`, `s2`, ...
#[derive(Debug, Default)]
pub struct FakeFactory {
    pub script: Arc<Script>,
    created: AtomicUsize,
}

impl FakeFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

impl BackendFactory for FakeFactory {
    fn create(
        &self,
        work_dir: &Path,
    ) -> Pin<Box<dyn Future<Output = Result<Arc<dyn SessionBackend>>> + Send + '_>> {
        let work_dir: PathBuf = work_dir.to_path_buf();
        Box::pin(async move {
            // Give concurrent callers a chance to race.
            tokio::task::yield_now().await;
            let fail = std::mem::take(&mut *self.script.fail_next_create.lock().unwrap());
            if fail {
                self.script.log(format!("create failed in {}", work_dir.display()));
                return Err(AppError::Spawn("fake spawn failure".into()));
            }
            let n = self.created.fetch_add(1, Ordering::SeqCst) + 1;
            let id = format!("s{n}");
            self.script.log(format!("create {id} in {}", work_dir.display()));
            Ok(Arc::new(FakeBackend {
                id,
                script: Arc::clone(&self.script),
            }) as Arc<dyn SessionBackend>)
        })
    }
}
