//! Stdio transport to one agent process.
//!
//! A [`Transport`] owns the agent's stdin (through [`writer::LineWriter`]),
//! its stdout (framed by [`codec::AgentCodec`]) and the child handle. The
//! stdout stream is read directly during the handshake; afterwards a single
//! background task started by [`Transport::receive`] owns it.

pub mod codec;
pub mod handshake;
pub mod reader;
pub mod spawner;
pub mod writer;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::Child;
use tokio::sync::{mpsc, Mutex};
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::mcp::bridge::McpBridge;
use crate::models::protocol::InboundFrame;
use crate::{AppError, Result};

use self::codec::AgentCodec;
use self::spawner::SpawnOptions;
use self::writer::LineWriter;

/// Session id used until the agent reports one.
pub const DEFAULT_SESSION_ID: &str = "default";

/// How long [`Transport::close`] waits for the process to exit.
pub const CLOSE_GRACE: Duration = Duration::from_secs(5);

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type Frames = FramedRead<BoxedReader, AgentCodec>;

/// Receiving end of the transport's frame channel.
///
/// Cloning yields another handle to the same channel.
#[derive(Debug, Clone)]
pub struct Inbound {
    rx: Arc<Mutex<mpsc::Receiver<InboundFrame>>>,
}

impl Inbound {
    fn new(rx: mpsc::Receiver<InboundFrame>) -> Self {
        Self {
            rx: Arc::new(Mutex::new(rx)),
        }
    }

    fn closed() -> Self {
        let (tx, rx) = mpsc::channel(1);
        drop(tx);
        Self::new(rx)
    }

    /// Next frame, or `None` once the channel has closed.
    pub async fn recv(&self) -> Option<InboundFrame> {
        self.rx.lock().await.recv().await
    }
}

enum ReaderSlot {
    /// Stdout not yet handed to the reader task.
    Idle(Frames),
    /// Reader task running.
    Running(Inbound),
    /// Transport closed.
    Closed,
}

/// Bidirectional NDJSON transport to the agent.
pub struct Transport {
    label: String,
    writer: LineWriter,
    reader: Mutex<ReaderSlot>,
    child: Mutex<Option<Child>>,
    cancel: CancellationToken,
    session_id: RwLock<String>,
    closed: AtomicBool,
}

impl Transport {
    /// Spawn the agent and complete the handshake.
    ///
    /// # Errors
    ///
    /// - [`AppError::Spawn`] if the process cannot be started or exits during
    ///   the handshake.
    /// - [`AppError::HandshakeTimeout`] if the agent does not answer in time.
    /// - [`AppError::Protocol`] if the agent rejects `initialize`.
    ///
    /// The process is killed before any error is returned.
    pub async fn start(options: &SpawnOptions, mcp: &McpBridge) -> Result<Self> {
        let span = info_span!("transport_start", work_dir = %options.work_dir.display());
        async move {
            let process = spawner::spawn_agent(options, &mcp.mcp_config())?;
            let label = format!("agent[{}]", process.child.id().unwrap_or_default());
            let transport =
                Self::from_parts(&label, process.stdout, process.stdin, Some(process.child));
            if let Some(id) = &options.resume {
                transport.set_session_id(id);
            }

            match transport.handshake(mcp, options.init_timeout).await {
                Ok(()) => Ok(transport),
                Err(err) => {
                    warn!(error = %err, "handshake failed, killing agent");
                    transport.close().await;
                    Err(err)
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Build a transport over arbitrary streams.
    ///
    /// `child`, when present, is killed by [`close`](Self::close).
    pub fn from_parts<R, W>(label: &str, reader: R, writer: W, child: Option<Child>) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let boxed: BoxedReader = Box::new(reader);
        Self {
            label: label.to_owned(),
            writer: LineWriter::new(label, writer),
            reader: Mutex::new(ReaderSlot::Idle(FramedRead::new(boxed, AgentCodec::new()))),
            child: Mutex::new(child),
            cancel: CancellationToken::new(),
            session_id: RwLock::new(DEFAULT_SESSION_ID.to_owned()),
            closed: AtomicBool::new(false),
        }
    }

    /// Label used in logs.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Current agent session id.
    #[must_use]
    pub fn session_id(&self) -> String {
        self.session_id
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Record the session id reported by the agent.
    pub fn set_session_id(&self, id: &str) {
        let mut current = self
            .session_id
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if *current != id {
            debug!(label = %self.label, old = %*current, new = id, "session id updated");
            id.clone_into(&mut *current);
        }
    }

    /// Whether [`close`](Self::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Perform the `initialize` handshake on the not-yet-consumed stdout.
    ///
    /// # Errors
    ///
    /// See [`handshake::perform`]; additionally [`AppError::Protocol`] if
    /// the reader task already owns stdout and [`AppError::Closed`] after
    /// teardown.
    pub async fn handshake(&self, mcp: &McpBridge, timeout: Duration) -> Result<()> {
        let mut slot = self.reader.lock().await;
        match &mut *slot {
            ReaderSlot::Idle(frames) => handshake::perform(self, frames, mcp, timeout).await,
            ReaderSlot::Running(_) => Err(AppError::Protocol(
                "handshake after the reader started".into(),
            )),
            ReaderSlot::Closed => Err(AppError::Closed(format!("{} is closed", self.label))),
        }
    }

    /// Write one raw line.
    ///
    /// # Errors
    ///
    /// [`AppError::Closed`] after teardown, [`AppError::Io`] on write failure.
    pub async fn send_line(&self, line: &[u8]) -> Result<()> {
        if self.is_closed() {
            return Err(AppError::Closed(format!("{} is closed", self.label)));
        }
        self.writer.send_line(line).await
    }

    /// Serialize `value` and write it as one line.
    ///
    /// # Errors
    ///
    /// Same as [`send_line`](Self::send_line).
    pub async fn send_json(&self, value: &Value) -> Result<()> {
        let bytes = serde_json::to_vec(value)
            .map_err(|e| AppError::Protocol(format!("failed to serialize frame: {e}")))?;
        self.send_line(&bytes).await
    }

    /// Handle to the inbound frame channel, starting the reader on first
    /// call. Every call returns the same channel; after close the handle is
    /// already closed.
    pub async fn receive(&self) -> Inbound {
        if self.is_closed() {
            return Inbound::closed();
        }
        let mut slot = self.reader.lock().await;
        match std::mem::replace(&mut *slot, ReaderSlot::Closed) {
            ReaderSlot::Idle(frames) => {
                let (tx, rx) = mpsc::channel(reader::CHANNEL_CAPACITY);
                tokio::spawn(reader::run_reader(
                    self.label.clone(),
                    frames,
                    tx,
                    self.cancel.clone(),
                ));
                debug!(label = %self.label, "reader task started");
                let inbound = Inbound::new(rx);
                *slot = ReaderSlot::Running(inbound.clone());
                inbound
            }
            ReaderSlot::Running(inbound) => {
                *slot = ReaderSlot::Running(inbound.clone());
                inbound
            }
            ReaderSlot::Closed => Inbound::closed(),
        }
    }

    /// Tear the transport down. Idempotent and bounded in time.
    ///
    /// Stops the reader (which unblocks pending receives), closes stdin,
    /// kills the process and waits up to [`CLOSE_GRACE`] for it to exit.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.cancel.cancel();

        // A handshake in progress holds the slot; it ends once the process dies.
        if let Ok(mut slot) = self.reader.try_lock() {
            *slot = ReaderSlot::Closed;
        }

        self.writer.close(Duration::from_secs(1)).await;

        let child = self.child.lock().await.take();
        if let Some(mut child) = child {
            if let Err(err) = child.start_kill() {
                debug!(label = %self.label, error = %err, "kill failed (already exited?)");
            }
            match tokio::time::timeout(CLOSE_GRACE, child.wait()).await {
                Ok(Ok(status)) => info!(label = %self.label, %status, "agent process exited"),
                Ok(Err(err)) => warn!(label = %self.label, error = %err, "wait for agent failed"),
                Err(_) => warn!(label = %self.label, "agent did not exit within grace period"),
            }
        }
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("label", &self.label)
            .field("session_id", &self.session_id())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
