//! Session domain model.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::backend::SessionBackend;

/// The single live conversation owned by the session manager.
pub struct Session {
    /// Identifier assigned by the agent at handshake.
    pub id: String,
    /// Working directory the agent process runs in.
    pub work_dir: PathBuf,
    /// Creation timestamp.
    pub started_at: DateTime<Utc>,
    /// Backend driving the agent process; owned exclusively by this session.
    pub backend: Arc<dyn SessionBackend>,
}

impl Session {
    /// Wrap a freshly created backend.
    #[must_use]
    pub fn new(work_dir: PathBuf, backend: Arc<dyn SessionBackend>) -> Self {
        Self {
            id: backend.session_id(),
            work_dir,
            started_at: Utc::now(),
            backend,
        }
    }

    /// Plain-data snapshot of this session.
    #[must_use]
    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.backend.session_id(),
            work_dir: self.work_dir.clone(),
            started_at: self.started_at,
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("work_dir", &self.work_dir)
            .field("started_at", &self.started_at)
            .finish_non_exhaustive()
    }
}

/// Snapshot of a session for status reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    /// Current session id (may have been refreshed by a `system/init` frame).
    pub id: String,
    /// Working directory.
    pub work_dir: PathBuf,
    /// Creation timestamp.
    pub started_at: DateTime<Utc>,
}
