//! Single-slot session arena.
//!
//! At most one session is live at a time. Every operation runs under one
//! exclusive lock, so creation, replacement and teardown never interleave
//! and two callers can never both spawn an agent.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{info, info_span, warn, Instrument};

use crate::backend::{BackendFactory, SessionBackend};
use crate::models::session::{Session, SessionInfo};
use crate::{AppError, Result};

struct Slot {
    session: Option<Session>,
    /// Directory the next session is created in.
    work_dir: PathBuf,
    closed: bool,
}

/// Owner of the live session.
pub struct SessionManager {
    factory: Arc<dyn BackendFactory>,
    slot: Mutex<Slot>,
}

impl SessionManager {
    /// Manager creating sessions in `work_dir` through `factory`.
    #[must_use]
    pub fn new(factory: Arc<dyn BackendFactory>, work_dir: PathBuf) -> Self {
        Self {
            factory,
            slot: Mutex::new(Slot {
                session: None,
                work_dir,
                closed: false,
            }),
        }
    }

    /// Backend of the live session, creating one if none exists.
    ///
    /// # Errors
    ///
    /// Returns the factory's error, or `AppError::Closed` after
    /// [`close`](Self::close).
    pub async fn get_or_create_session(&self) -> Result<Arc<dyn SessionBackend>> {
        let mut slot = self.slot.lock().await;
        if slot.closed {
            return Err(AppError::Closed("session manager is shut down".into()));
        }
        if let Some(session) = &slot.session {
            return Ok(Arc::clone(&session.backend));
        }

        let work_dir = slot.work_dir.clone();
        let backend = self
            .factory
            .create(&work_dir)
            .instrument(info_span!("create_session", work_dir = %work_dir.display()))
            .await?;
        let session = Session::new(work_dir, Arc::clone(&backend));
        info!(session_id = %session.id, "session created");
        slot.session = Some(session);
        Ok(backend)
    }

    /// Replace the live session with a fresh one in `work_dir`.
    ///
    /// The old backend is closed before the factory runs. If the factory
    /// fails the slot stays empty.
    ///
    /// # Errors
    ///
    /// Returns the factory's error, or `AppError::Closed` after
    /// [`close`](Self::close).
    pub async fn new_session(&self, work_dir: &Path) -> Result<SessionInfo> {
        let mut slot = self.slot.lock().await;
        if slot.closed {
            return Err(AppError::Closed("session manager is shut down".into()));
        }

        if let Some(old) = slot.session.take() {
            info!(session_id = %old.id, "closing session for replacement");
            old.backend.close().await;
        }
        slot.work_dir = work_dir.to_path_buf();

        let backend = self
            .factory
            .create(work_dir)
            .instrument(info_span!("create_session", work_dir = %work_dir.display()))
            .await
            .inspect_err(|err| warn!(error = %err, "replacement session failed to start"))?;
        let session = Session::new(work_dir.to_path_buf(), backend);
        let info = session.info();
        info!(session_id = %info.id, "session replaced");
        slot.session = Some(session);
        Ok(info)
    }

    /// Close and forget the live session, if any.
    pub async fn discard(&self) {
        let mut slot = self.slot.lock().await;
        if let Some(session) = slot.session.take() {
            warn!(session_id = %session.id, "discarding session");
            session.backend.close().await;
        }
    }

    /// Snapshot of the live session.
    pub async fn current(&self) -> Option<SessionInfo> {
        self.slot.lock().await.session.as_ref().map(Session::info)
    }

    /// Directory the next session will be created in.
    pub async fn work_dir(&self) -> PathBuf {
        self.slot.lock().await.work_dir.clone()
    }

    /// Close the live session and refuse new ones. Idempotent.
    pub async fn close(&self) {
        let mut slot = self.slot.lock().await;
        slot.closed = true;
        if let Some(session) = slot.session.take() {
            info!(session_id = %session.id, "closing session");
            session.backend.close().await;
        }
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager").finish_non_exhaustive()
    }
}
