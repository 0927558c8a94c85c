//! Agent process spawner.
//!
//! Launches the agent binary with the fixed stream-JSON protocol flags, in
//! the session's working directory, with:
//! - `kill_on_drop(true)` so a dropped transport never leaks a process.
//! - `env_clear()` plus an allowlist, so secrets in the relay's own
//!   environment are not inherited by the agent.
//! - stderr drained into `tracing` at `DEBUG`.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tracing::{debug, info};

use crate::{AppError, Result};

/// Environment variables inherited by the agent process.
pub const ALLOWED_ENV_VARS: &[&str] = &[
    "PATH",
    "HOME",
    "USER",
    "LANG",
    "LC_ALL",
    "TERM",
    "TMPDIR",
    "SHELL",
    "RUST_LOG",
    "HTTP_PROXY",
    "HTTPS_PROXY",
    "NO_PROXY",
    // Windows-specific variables.
    "USERPROFILE",
    "SystemRoot",
    "TEMP",
    "TMP",
    "USERNAME",
    "APPDATA",
    "LOCALAPPDATA",
    "COMSPEC",
];

/// Variable prefixes inherited by the agent process (credentials and
/// settings of the agent itself).
pub const ALLOWED_ENV_PREFIXES: &[&str] = &["ANTHROPIC_", "CLAUDE_"];

/// Flags that put the agent into stream-JSON mode with permission prompts
/// routed over stdio.
pub const PROTOCOL_FLAGS: &[&str] = &[
    "--print",
    "--output-format",
    "stream-json",
    "--input-format",
    "stream-json",
    "--verbose",
    "--permission-prompt-tool",
    "stdio",
];

/// How to launch one agent process.
#[derive(Debug, Clone)]
pub struct SpawnOptions {
    /// Agent binary.
    pub program: String,
    /// Arguments placed before the protocol flags.
    pub leading_args: Vec<String>,
    /// Working directory of the process.
    pub work_dir: PathBuf,
    /// Agent session to resume, if any.
    pub resume: Option<String>,
    /// Deadline for the `initialize` handshake.
    pub init_timeout: Duration,
}

/// Stdio handles of a freshly spawned agent.
#[derive(Debug)]
pub struct AgentProcess {
    /// Child handle; killed on drop.
    pub child: Child,
    /// Agent stdin.
    pub stdin: ChildStdin,
    /// Agent stdout.
    pub stdout: ChildStdout,
}

/// Full argument list for `options`, `--mcp-config` carrying `mcp_config`.
#[must_use]
pub fn build_args(options: &SpawnOptions, mcp_config: &Value) -> Vec<String> {
    let mut args = options.leading_args.clone();
    args.extend(PROTOCOL_FLAGS.iter().map(|&f| f.to_owned()));
    args.push("--mcp-config".into());
    args.push(mcp_config.to_string());
    if let Some(id) = &options.resume {
        args.push("--resume".into());
        args.push(id.clone());
    }
    args
}

/// Spawn the agent process.
///
/// # Errors
///
/// Returns `AppError::Spawn` if the process cannot be started or its stdio
/// pipes cannot be captured. The process is killed before returning an
/// error.
pub fn spawn_agent(options: &SpawnOptions, mcp_config: &Value) -> Result<AgentProcess> {
    let mut cmd = Command::new(&options.program);
    cmd.args(build_args(options, mcp_config));

    cmd.env_clear();
    for (key, value) in std::env::vars_os() {
        let Some(name) = key.to_str() else { continue };
        if ALLOWED_ENV_VARS.contains(&name)
            || ALLOWED_ENV_PREFIXES.iter().any(|p| name.starts_with(p))
        {
            cmd.env(&key, value);
        }
    }

    cmd.current_dir(&options.work_dir)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|err| {
        AppError::Spawn(format!("failed to spawn {}: {err}", options.program))
    })?;

    let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
        child.start_kill().ok();
        return Err(AppError::Spawn("failed to capture agent stdio".into()));
    };
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(drain_stderr(stderr));
    }

    info!(
        program = %options.program,
        pid = child.id(),
        work_dir = %options.work_dir.display(),
        resume = options.resume.as_deref().unwrap_or(""),
        "agent process spawned"
    );

    Ok(AgentProcess {
        child,
        stdin,
        stdout,
    })
}

async fn drain_stderr(stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(target: "agent_stderr", "{line}");
    }
}
