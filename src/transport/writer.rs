//! Serialized line writer for the agent's stdin.
//!
//! Control responses, user frames and interrupt requests may be written from
//! different tasks; every line is written and flushed under one lock so lines
//! never interleave.

use std::time::Duration;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::{AppError, Result};

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Writer half of a transport. `None` once closed.
pub struct LineWriter {
    label: String,
    inner: Mutex<Option<BoxedWriter>>,
}

impl LineWriter {
    /// Wrap the agent's stdin.
    pub fn new<W>(label: &str, writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            label: label.to_owned(),
            inner: Mutex::new(Some(Box::new(writer))),
        }
    }

    /// Write `line` plus a trailing `\n` and flush.
    ///
    /// # Errors
    ///
    /// - [`AppError::Closed`] if the writer was closed.
    /// - [`AppError::Io`] if the write or flush fails.
    pub async fn send_line(&self, line: &[u8]) -> Result<()> {
        let mut bytes = Vec::with_capacity(line.len() + 1);
        bytes.extend_from_slice(line);
        bytes.push(b'\n');

        let mut guard = self.inner.lock().await;
        let Some(writer) = guard.as_mut() else {
            return Err(AppError::Closed(format!("{} stdin is closed", self.label)));
        };
        if let Err(err) = write_all_flush(writer, &bytes).await {
            warn!(label = %self.label, error = %err, "write to agent stdin failed");
            return Err(AppError::Io(format!("write failed: {err}")));
        }
        Ok(())
    }

    /// Shut down and drop the underlying stream. Idempotent.
    ///
    /// Gives up after `grace` if a write in progress holds the lock; killing
    /// the process then fails that write.
    pub async fn close(&self, grace: Duration) {
        let Ok(mut guard) = tokio::time::timeout(grace, self.inner.lock()).await else {
            warn!(label = %self.label, "stdin busy, not shutting it down");
            return;
        };
        let taken = guard.take();
        drop(guard);
        if let Some(mut writer) = taken {
            if let Err(err) = writer.shutdown().await {
                debug!(label = %self.label, error = %err, "stdin shutdown failed");
            }
        }
    }
}

async fn write_all_flush(writer: &mut BoxedWriter, bytes: &[u8]) -> std::io::Result<()> {
    writer.write_all(bytes).await?;
    writer.flush().await
}

impl std::fmt::Debug for LineWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LineWriter")
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}
