//! Pending human approvals keyed by correlation id.
//!
//! A front-end registers a ticket when it asks a question and resolves it
//! later from an unrelated event (a button click, a `/approve` command). The
//! waiting side only holds the ticket, never a lock, so a slow human cannot
//! block anything but the turn that asked.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::oneshot;
use tracing::{debug, info};

use crate::{AppError, Result};

type PendingMap = HashMap<String, oneshot::Sender<bool>>;

/// Thread-safe registry of unanswered approval requests.
#[derive(Debug, Clone, Default)]
pub struct PendingApprovals {
    inner: Arc<Mutex<PendingMap>>,
}

impl PendingApprovals {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pending approval for `request_id`.
    ///
    /// A second registration under the same id replaces the first; the
    /// replaced ticket resolves as abandoned.
    #[must_use]
    pub fn register(&self, request_id: &str) -> ApprovalTicket {
        let (tx, rx) = oneshot::channel();
        self.lock().insert(request_id.to_owned(), tx);
        debug!(request_id, "approval registered");
        ApprovalTicket {
            request_id: request_id.to_owned(),
            rx,
            registry: self.clone(),
        }
    }

    /// Deliver a human decision for `request_id`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if no approval is pending under that id
    /// (already answered, cancelled, or never asked).
    pub fn resolve(&self, request_id: &str, approved: bool) -> Result<()> {
        let sender = self.lock().remove(request_id);
        let Some(sender) = sender else {
            return Err(AppError::NotFound(format!(
                "no pending approval for request_id '{request_id}'"
            )));
        };

        sender.send(approved).map_err(|_| {
            AppError::NotFound(format!("approval '{request_id}' was abandoned"))
        })?;
        info!(request_id, approved, "approval resolved");
        Ok(())
    }

    /// Ids of all approvals still waiting for an answer, sorted.
    #[must_use]
    pub fn pending_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PendingMap> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn forget(&self, request_id: &str) {
        let mut map = self.lock();
        if map.get(request_id).is_some_and(oneshot::Sender::is_closed) {
            map.remove(request_id);
        }
    }
}

/// Waiting side of a pending approval.
///
/// Dropping the ticket (for instance because the turn was cancelled)
/// unregisters it.
#[derive(Debug)]
pub struct ApprovalTicket {
    request_id: String,
    rx: oneshot::Receiver<bool>,
    registry: PendingApprovals,
}

impl ApprovalTicket {
    /// Correlation id this ticket waits on.
    #[must_use]
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Wait for the decision.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Closed` if the registration was replaced.
    pub async fn wait(mut self) -> Result<bool> {
        (&mut self.rx)
            .await
            .map_err(|_| AppError::Closed(format!("approval '{}' abandoned", self.request_id)))
    }
}

impl Drop for ApprovalTicket {
    fn drop(&mut self) {
        self.rx.close();
        self.registry.forget(&self.request_id);
    }
}
