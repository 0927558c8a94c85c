//! Line-oriented console front-end.
//!
//! Writes everything the relay has to say to a single output stream and
//! resolves permission prompts through [`PendingApprovals`], so the operator
//! answers with `/approve <id>` or `/deny <id>` typed on the same console
//! while the turn keeps waiting.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

use crate::responder::approvals::PendingApprovals;
use crate::responder::{PermissionPrompt, Responder};
use crate::{AppError, Result};

type SharedOutput = Arc<Mutex<Box<dyn AsyncWrite + Send + Unpin>>>;

/// [`Responder`] that prints to a console stream.
#[derive(Clone)]
pub struct ConsoleResponder {
    out: SharedOutput,
    approvals: PendingApprovals,
}

impl ConsoleResponder {
    /// Responder printing to the process's stdout.
    #[must_use]
    pub fn stdout(approvals: PendingApprovals) -> Self {
        Self::new(tokio::io::stdout(), approvals)
    }

    /// Responder printing to an arbitrary stream.
    pub fn new<W>(out: W, approvals: PendingApprovals) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            out: Arc::new(Mutex::new(Box::new(out))),
            approvals,
        }
    }

    /// Registry the console's `/approve` and `/deny` commands resolve.
    #[must_use]
    pub fn approvals(&self) -> &PendingApprovals {
        &self.approvals
    }

    /// Write `text` followed by a newline as one unit.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the stream write fails.
    pub async fn write_line(&self, text: &str) -> Result<()> {
        let mut bytes = text.as_bytes().to_vec();
        bytes.push(b'\n');
        let mut out = self.out.lock().await;
        out.write_all(&bytes)
            .await
            .map_err(|e| AppError::Io(format!("console write failed: {e}")))?;
        out.flush()
            .await
            .map_err(|e| AppError::Io(format!("console flush failed: {e}")))
    }
}

impl Responder for ConsoleResponder {
    fn send_typing(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(self.write_line("… working"))
    }

    fn post_response(&self, text: &str) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let text = text.to_owned();
        Box::pin(async move { self.write_line(&text).await })
    }

    fn add_reaction(&self, emoji: &str) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let line = format!("[reaction :{}:]", emoji.trim_matches(':'));
        Box::pin(async move { self.write_line(&line).await })
    }

    fn send_update(&self, text: &str) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let line = format!("[update] {text}");
        Box::pin(async move { self.write_line(&line).await })
    }

    fn ask_permission(
        &self,
        prompt: &PermissionPrompt,
    ) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + '_>> {
        let prompt = prompt.clone();
        Box::pin(async move {
            let ticket = self.approvals.register(&prompt.request_id);
            self.write_line(&format!(
                "[approval {id}] {body}\nReply `/approve {id}` or `/deny {id}`.",
                id = prompt.request_id,
                body = prompt.render()
            ))
            .await?;
            ticket.wait().await
        })
    }
}

/// One line typed on the console.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    /// A message for the agent.
    Message(String),
    /// `/approve <id>`.
    Approve(String),
    /// `/deny <id>`.
    Deny(String),
    /// `/reset [dir]`.
    Reset(Option<PathBuf>),
    /// `/cancel`.
    Cancel,
    /// `/status`.
    Status,
    /// `/quit`.
    Quit,
    /// Blank line.
    Empty,
    /// A `/command` that is malformed or unknown; carries the usage hint.
    Invalid(String),
}

/// Usage shown for unknown commands.
pub const USAGE: &str =
    "commands: /approve <id>, /deny <id>, /reset [dir], /cancel, /status, /quit";

/// Parse one console line.
///
/// Lines not starting with `/` are messages; `//text` sends `/text` as a
/// message.
#[must_use]
pub fn parse_command(line: &str) -> ConsoleCommand {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return ConsoleCommand::Empty;
    }
    if let Some(escaped) = trimmed.strip_prefix("//") {
        return ConsoleCommand::Message(format!("/{escaped}"));
    }
    let Some(command) = trimmed.strip_prefix('/') else {
        return ConsoleCommand::Message(trimmed.to_owned());
    };

    let (name, arg) = match command.split_once(char::is_whitespace) {
        Some((name, rest)) => (name, rest.trim()),
        None => (command, ""),
    };
    match (name, arg) {
        ("approve", id) if !id.is_empty() => ConsoleCommand::Approve(id.to_owned()),
        ("deny", id) if !id.is_empty() => ConsoleCommand::Deny(id.to_owned()),
        ("approve" | "deny", _) => ConsoleCommand::Invalid(format!("usage: /{name} <id>")),
        ("reset", "") => ConsoleCommand::Reset(None),
        ("reset", dir) => ConsoleCommand::Reset(Some(PathBuf::from(dir))),
        ("cancel", _) => ConsoleCommand::Cancel,
        ("status", _) => ConsoleCommand::Status,
        ("quit" | "exit", _) => ConsoleCommand::Quit,
        _ => ConsoleCommand::Invalid(USAGE.to_owned()),
    }
}
