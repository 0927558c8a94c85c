//! Error types shared across the application.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
///
/// Permission denials are not errors; they travel as
/// [`PermissionDecision`](crate::models::permission::PermissionDecision).
/// Tool failures are not errors either; they travel back to the agent as
/// [`ToolOutput`](crate::executor::ToolOutput) with `is_error` set.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// The agent process or its stdio pipes could not be started.
    Spawn(String),
    /// The agent did not acknowledge `initialize` within the deadline.
    HandshakeTimeout(String),
    /// Read or write failure on the agent's stdio or the local file system.
    Io(String),
    /// Malformed or unexpected protocol traffic.
    Protocol(String),
    /// The agent stream ended while a turn was in progress.
    AgentExited(String),
    /// The agent reported a failed turn without producing any text.
    Agent(String),
    /// Skill lookup failure.
    Skill(String),
    /// File system path failed validation against the allowed roots.
    PathViolation(String),
    /// Requested entity does not exist.
    NotFound(String),
    /// The transport or session has already been torn down.
    Closed(String),
    /// The caller cancelled the turn; `partial` holds the text gathered so far.
    Cancelled {
        /// Assistant text accumulated before cancellation.
        partial: String,
    },
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Spawn(msg) => write!(f, "spawn: {msg}"),
            Self::HandshakeTimeout(msg) => write!(f, "handshake timeout: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
            Self::Protocol(msg) => write!(f, "protocol: {msg}"),
            Self::AgentExited(msg) => write!(f, "agent exited: {msg}"),
            Self::Agent(msg) => write!(f, "agent: {msg}"),
            Self::Skill(msg) => write!(f, "skill: {msg}"),
            Self::PathViolation(msg) => write!(f, "path violation: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::Closed(msg) => write!(f, "closed: {msg}"),
            Self::Cancelled { .. } => write!(f, "cancelled"),
        }
    }
}

impl std::error::Error for AppError {}

impl AppError {
    /// Whether this error means the agent process can no longer be used.
    #[must_use]
    pub fn is_fatal_to_session(&self) -> bool {
        matches!(self, Self::AgentExited(_) | Self::Io(_) | Self::Closed(_))
    }
}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
