#![forbid(unsafe_code)]

//! `agent-relay` binary: console front-end for one long-lived agent.
//!
//! Every stdin line is a message for the agent, handled on its own task;
//! slash commands resolve approvals and manage the session.

use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use agent_relay::backend::conversation::AgentBackendFactory;
use agent_relay::orchestrator::dispatcher::Orchestrator;
use agent_relay::orchestrator::session_manager::SessionManager;
use agent_relay::responder::approvals::PendingApprovals;
use agent_relay::responder::console::{parse_command, ConsoleCommand, ConsoleResponder};
use agent_relay::{AppError, GlobalConfig, Result};

/// How long in-flight turns get to wind down after `/quit`.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "agent-relay", about = "Relay a console to a long-lived coding agent", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Override the working directory of the first session.
    #[arg(long)]
    workspace: Option<PathBuf>,

    /// Resume an earlier agent session by id.
    #[arg(long)]
    resume: Option<String>,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("agent-relay bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let mut config = GlobalConfig::load_from_path(&args.config)?;
    if let Some(ws) = &args.workspace {
        config.set_work_dir(ws)?;
    }
    let config = Arc::new(config);
    info!(work_dir = %config.work_dir.display(), agent_cli = %config.agent_cli, "configuration loaded");

    // ── Build the session stack ─────────────────────────
    let mut factory = AgentBackendFactory::new(Arc::clone(&config));
    if let Some(id) = args.resume {
        factory = factory.with_resume(id);
    }
    let sessions = Arc::new(SessionManager::new(
        Arc::new(factory),
        config.work_dir.clone(),
    ));
    let orchestrator = Arc::new(Orchestrator::new(sessions));
    let approvals = PendingApprovals::new();
    let console = ConsoleResponder::stdout(approvals.clone());
    let turn_cancel = Arc::new(StdMutex::new(CancellationToken::new()));

    console
        .write_line("agent-relay ready. Type a message, or /status, /reset [dir], /cancel, /quit.")
        .await?;

    // ── Console loop ────────────────────────────────────
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut tasks = JoinSet::new();
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line,
            () = &mut shutdown => {
                info!("shutdown signal received");
                break;
            }
        };
        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => {
                info!("stdin closed");
                break;
            }
            Err(err) => {
                error!(%err, "failed to read stdin");
                break;
            }
        };

        match parse_command(&line) {
            ConsoleCommand::Empty => {}
            ConsoleCommand::Message(text) => {
                let cancel = turn_cancel
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .child_token();
                let orchestrator = Arc::clone(&orchestrator);
                let console = console.clone();
                tasks.spawn(async move {
                    if let Err(err) = orchestrator.handle_message(&text, &console, &cancel).await {
                        error!(%err, "failed to deliver answer");
                    }
                });
            }
            ConsoleCommand::Approve(id) => resolve(&console, &approvals, &id, true).await,
            ConsoleCommand::Deny(id) => resolve(&console, &approvals, &id, false).await,
            ConsoleCommand::Reset(dir) => {
                let dir = match dir.map(|d| d.canonicalize().map_err(|e| (d, e))).transpose() {
                    Ok(dir) => dir,
                    Err((d, err)) => {
                        say(&console, &format!("Error: invalid directory {}: {err}", d.display())).await;
                        continue;
                    }
                };
                let orchestrator = Arc::clone(&orchestrator);
                let console = console.clone();
                tasks.spawn(async move {
                    let line = match orchestrator.reset(dir).await {
                        Ok(id) => format!("session reset: {id}"),
                        Err(err) => format!("Error: {err}"),
                    };
                    say(&console, &line).await;
                });
            }
            ConsoleCommand::Cancel => {
                let previous = std::mem::replace(
                    &mut *turn_cancel.lock().unwrap_or_else(PoisonError::into_inner),
                    CancellationToken::new(),
                );
                previous.cancel();
                say(&console, "cancelling in-flight turns").await;
            }
            ConsoleCommand::Status => {
                let status = match orchestrator.status().await {
                    Some(info) => format!(
                        "session {} in {} since {}",
                        info.id,
                        info.work_dir.display(),
                        info.started_at.to_rfc3339()
                    ),
                    None => "no live session".to_owned(),
                };
                let pending = approvals.pending_ids();
                let line = if pending.is_empty() {
                    status
                } else {
                    format!("{status}\npending approvals: {}", pending.join(", "))
                };
                say(&console, &line).await;
            }
            ConsoleCommand::Quit => break,
            ConsoleCommand::Invalid(usage) => say(&console, &usage).await,
        }

        // Reap finished tasks so the set does not grow without bound.
        while tasks.try_join_next().is_some() {}
    }

    // ── Shutdown ────────────────────────────────────────
    turn_cancel
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .cancel();
    if tokio::time::timeout(SHUTDOWN_GRACE, async {
        while tasks.join_next().await.is_some() {}
    })
    .await
    .is_err()
    {
        warn!("in-flight turns did not finish in time, aborting");
        tasks.abort_all();
    }
    orchestrator.shutdown().await;
    info!("agent-relay shut down");
    Ok(())
}

async fn resolve(console: &ConsoleResponder, approvals: &PendingApprovals, id: &str, approved: bool) {
    let line = match approvals.resolve(id, approved) {
        Ok(()) if approved => format!("approved {id}"),
        Ok(()) => format!("denied {id}"),
        Err(err) => format!("Error: {err}"),
    };
    say(console, &line).await;
}

async fn say(console: &ConsoleResponder, line: &str) {
    if let Err(err) = console.write_line(line).await {
        warn!(%err, "console write failed");
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            error!(%err, "ctrl-c signal handler failed");
        }
    }
}
