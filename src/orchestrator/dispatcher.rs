//! End-to-end handling of inbound messages.
//!
//! Whole turns are serialized by one lock: a second message waits until the
//! first has been answered, so the agent never sees interleaved turns and
//! every answer goes back to the front-end that asked.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};

use crate::models::session::SessionInfo;
use crate::orchestrator::session_manager::SessionManager;
use crate::responder::Responder;
use crate::{AppError, Result};

/// Appended to the partial answer of a cancelled turn.
pub const CANCELLED_NOTICE: &str = "[turn cancelled]";

/// Routes inbound messages to the live session.
#[derive(Debug)]
pub struct Orchestrator {
    sessions: Arc<SessionManager>,
    turn: Mutex<()>,
}

impl Orchestrator {
    /// Orchestrator over `sessions`.
    #[must_use]
    pub fn new(sessions: Arc<SessionManager>) -> Self {
        Self {
            sessions,
            turn: Mutex::new(()),
        }
    }

    /// The session manager.
    #[must_use]
    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// Answer `text` through `responder`.
    ///
    /// Failures are posted as `Error: <err>`; a cancelled turn posts its
    /// partial text followed by [`CANCELLED_NOTICE`]. A turn that ends
    /// because the agent died discards the session so the next message
    /// starts a fresh agent.
    ///
    /// # Errors
    ///
    /// Returns an error only if posting the answer itself fails.
    pub async fn handle_message(
        &self,
        text: &str,
        responder: &dyn Responder,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let correlation_id = uuid::Uuid::new_v4().to_string();
        let span = info_span!("handle_message", %correlation_id);
        async move {
            let _turn = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    return responder.post_response(CANCELLED_NOTICE).await;
                }
                guard = self.turn.lock() => guard,
            };

            if let Err(err) = responder.send_typing().await {
                warn!(error = %err, "typing indicator failed");
            }

            let outcome = match self.sessions.get_or_create_session().await {
                Ok(backend) => backend.converse(text, responder, cancel).await,
                Err(err) => Err(err),
            };

            let reply = match outcome {
                Ok(answer) => {
                    info!(bytes = answer.len(), "turn answered");
                    answer
                }
                Err(AppError::Cancelled { partial }) => {
                    info!("turn cancelled");
                    if partial.is_empty() {
                        CANCELLED_NOTICE.to_owned()
                    } else {
                        format!("{partial}\n\n{CANCELLED_NOTICE}")
                    }
                }
                Err(err) => {
                    error!(error = %err, "turn failed");
                    if err.is_fatal_to_session() {
                        self.sessions.discard().await;
                    }
                    format!("Error: {err}")
                }
            };

            responder.post_response(&reply).await
        }
        .instrument(span)
        .await
    }

    /// Replace the session, waiting for any turn in progress.
    ///
    /// `work_dir` defaults to the directory of the current session.
    ///
    /// # Errors
    ///
    /// Returns the error that prevented the new session from starting.
    pub async fn reset(&self, work_dir: Option<PathBuf>) -> Result<String> {
        let _turn = self.turn.lock().await;
        let dir = match work_dir {
            Some(dir) => dir,
            None => self.sessions.work_dir().await,
        };
        let info = self.sessions.new_session(&dir).await?;
        Ok(info.id)
    }

    /// Snapshot of the live session.
    pub async fn status(&self) -> Option<SessionInfo> {
        self.sessions.current().await
    }

    /// Close the live session.
    pub async fn shutdown(&self) {
        self.sessions.close().await;
    }
}
