//! Conversation backends.
//!
//! A [`SessionBackend`] runs whole turns against one agent; a
//! [`BackendFactory`] creates backends for the session manager. The shipped
//! implementation is [`conversation::ConversationBackend`], driving the
//! agent over a [`Transport`](crate::transport::Transport).

pub mod conversation;
pub mod gate;

use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::responder::Responder;
use crate::Result;

/// One live conversation with an agent.
pub trait SessionBackend: Send + Sync {
    /// Agent-assigned session id.
    fn session_id(&self) -> String;

    /// Run one turn: send `message` and return the agent's answer.
    ///
    /// Turns on the same backend never overlap.
    ///
    /// # Errors
    ///
    /// - `AppError::Cancelled` carrying the partial text if `cancel` fires.
    /// - `AppError::AgentExited` if the agent stream ends mid-turn.
    /// - `AppError::Agent` if the agent reports a failed turn without text.
    /// - `AppError::Closed` / `AppError::Io` if the agent cannot be written to.
    fn converse<'a>(
        &'a self,
        message: &'a str,
        responder: &'a dyn Responder,
        cancel: &'a CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>>;

    /// Tear the backend down. Idempotent.
    fn close(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}

/// Creates backends for new sessions.
pub trait BackendFactory: Send + Sync {
    /// Start a backend whose agent runs in `work_dir`.
    ///
    /// # Errors
    ///
    /// Returns the spawn or handshake error; no process survives a failure.
    fn create(
        &self,
        work_dir: &Path,
    ) -> Pin<Box<dyn Future<Output = Result<Arc<dyn SessionBackend>>> + Send + '_>>;
}
