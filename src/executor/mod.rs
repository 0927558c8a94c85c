//! Side-effecting tool operations.
//!
//! The executor never returns an error to its caller: every failure becomes a
//! [`ToolOutput`] with `is_error` set, which travels back to the agent as a
//! tool result.

pub mod shell;
pub mod util;
pub mod web;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tracing::{debug, info_span, Instrument};

use crate::config::GlobalConfig;
use crate::models::tool::{ToolInput, ToolInvocation, ToolKind};
use crate::responder::Responder;
use crate::skills::SkillStore;

use self::util::{truncate_output, truncate_output_with};

/// Text result of a tool call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    /// Output text, already truncated.
    pub text: String,
    /// Whether the tool failed.
    pub is_error: bool,
}

impl ToolOutput {
    /// Successful output.
    #[must_use]
    pub fn ok(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_error: false,
        }
    }

    /// Failed output.
    #[must_use]
    pub fn error(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_error: true,
        }
    }
}

/// Limits and endpoints the executor works with.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Directory `Bash` runs in and relative `Read` paths resolve against.
    pub work_dir: PathBuf,
    /// Maximum size of any textual output.
    pub max_output_bytes: usize,
    /// Wall-clock limit for one `Bash` command.
    pub command_timeout: Duration,
    /// Limit for one HTTP request.
    pub http_timeout: Duration,
    /// HTML search endpoint.
    pub search_url: String,
}

impl ExecutorConfig {
    /// Executor settings for a session rooted at `work_dir`.
    #[must_use]
    pub fn from_global(config: &GlobalConfig, work_dir: &Path) -> Self {
        Self {
            work_dir: work_dir.to_path_buf(),
            max_output_bytes: config.tools.max_output_bytes,
            command_timeout: Duration::from_secs(config.timeouts.command_seconds),
            http_timeout: Duration::from_secs(config.timeouts.http_seconds),
            search_url: config.tools.search_url.clone(),
        }
    }
}

/// Runs tool invocations that the relay serves itself.
#[derive(Clone)]
pub struct ToolExecutor {
    config: ExecutorConfig,
    http: reqwest::Client,
    skills: Option<Arc<dyn SkillStore>>,
}

impl ToolExecutor {
    /// Create an executor without a skill store.
    #[must_use]
    pub fn new(config: ExecutorConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .user_agent(concat!("agent-relay/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            config,
            http,
            skills: None,
        }
    }

    /// Attach a skill store used by `Skill` and `LoadSkillSupporting`.
    #[must_use]
    pub fn with_skills(mut self, skills: Arc<dyn SkillStore>) -> Self {
        self.skills = Some(skills);
        self
    }

    /// Executor settings.
    #[must_use]
    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Run `invocation`; the permission decision has already been made.
    pub async fn execute(
        &self,
        invocation: &ToolInvocation,
        responder: &dyn Responder,
    ) -> ToolOutput {
        let tool = invocation.display_name().to_owned();
        let span = info_span!("tool_execute", tool_name = %tool);
        async move {
            let input = match &invocation.input {
                Ok(input) => input,
                Err(err) => return ToolOutput::error(format!("invalid input for {tool}: {err}")),
            };

            let output = match invocation.kind {
                ToolKind::Read => self.read_file(input).await,
                ToolKind::Bash => match required(input.command.as_deref(), "command") {
                    Ok(command) => {
                        shell::run_command(
                            command,
                            &self.config.work_dir,
                            self.config.command_timeout,
                            self.config.max_output_bytes,
                        )
                        .await
                    }
                    Err(out) => out,
                },
                ToolKind::Fetch | ToolKind::WebFetch => {
                    web::fetch(&self.http, input, self.config.max_output_bytes).await
                }
                ToolKind::WebSearch => match required(input.query.as_deref(), "query") {
                    Ok(query) => {
                        web::search(
                            &self.http,
                            &self.config.search_url,
                            query,
                            self.config.max_output_bytes,
                        )
                        .await
                    }
                    Err(out) => out,
                },
                ToolKind::AddReaction => match required(input.emoji.as_deref(), "emoji") {
                    Ok(emoji) => match responder.add_reaction(emoji).await {
                        Ok(()) => ToolOutput::ok(format!("reacted with :{}:", emoji.trim_matches(':'))),
                        Err(err) => ToolOutput::error(format!("failed to add reaction: {err}")),
                    },
                    Err(out) => out,
                },
                ToolKind::SendUpdate => match required(input.text.as_deref(), "text") {
                    Ok(text) => match responder.send_update(text).await {
                        Ok(()) => ToolOutput::ok("update sent"),
                        Err(err) => ToolOutput::error(format!("failed to send update: {err}")),
                    },
                    Err(out) => out,
                },
                ToolKind::Skill => self.skill(input).await,
                ToolKind::LoadSkillSupporting => self.skill_supporting(input).await,
                ToolKind::Glob | ToolKind::Grep | ToolKind::Other => {
                    ToolOutput::error(format!("unknown tool: {tool}"))
                }
            };

            debug!(is_error = output.is_error, bytes = output.text.len(), "tool finished");
            output
        }
        .instrument(span)
        .await
    }

    async fn read_file(&self, input: &ToolInput) -> ToolOutput {
        let Some(raw) = input.file_path.as_deref().or(input.path.as_deref()) else {
            return ToolOutput::error("missing required argument: file_path");
        };
        let path = self.config.work_dir.join(raw);
        let max = self.config.max_output_bytes;

        let file = match tokio::fs::File::open(&path).await {
            Ok(file) => file,
            Err(err) => return ToolOutput::error(format!("failed to read {raw}: {err}")),
        };
        let size = file.metadata().await.map_or(0, |meta| meta.len());
        let mut kept = Vec::with_capacity(usize::try_from(size).unwrap_or(max).min(max + 1));
        if let Err(err) = file.take(max as u64 + 1).read_to_end(&mut kept).await {
            return ToolOutput::error(format!("failed to read {raw}: {err}"));
        }

        let mut dropped = 0;
        if kept.len() > max {
            dropped = size.max(kept.len() as u64) - max as u64;
            kept.truncate(max);
        }
        let end = match std::str::from_utf8(&kept) {
            Ok(_) => kept.len(),
            // A char cut in half by the limit is dropped whole.
            Err(err) if dropped > 0 && err.error_len().is_none() => err.valid_up_to(),
            Err(_) => return ToolOutput::error(format!("{raw} is not valid UTF-8")),
        };
        dropped += (kept.len() - end) as u64;
        kept.truncate(end);
        match String::from_utf8(kept) {
            Ok(text) => ToolOutput::ok(truncate_output_with(&text, max, dropped)),
            Err(_) => ToolOutput::error(format!("{raw} is not valid UTF-8")),
        }
    }

    async fn skill(&self, input: &ToolInput) -> ToolOutput {
        let Some(store) = &self.skills else {
            return ToolOutput::error("no skills are configured");
        };

        let Some(name) = input.skill.as_deref().filter(|n| !n.trim().is_empty()) else {
            return match store.list().await {
                Ok(skills) if skills.is_empty() => ToolOutput::ok("no skills available"),
                Ok(skills) => {
                    let listing = skills
                        .iter()
                        .map(|s| format!("- {}: {}", s.name, s.description))
                        .collect::<Vec<_>>()
                        .join("\n");
                    ToolOutput::ok(truncate_output(&listing, self.config.max_output_bytes))
                }
                Err(err) => ToolOutput::error(err.to_string()),
            };
        };

        match store.load(name).await {
            Ok(body) => ToolOutput::ok(truncate_output(&body, self.config.max_output_bytes)),
            Err(err) => ToolOutput::error(err.to_string()),
        }
    }

    async fn skill_supporting(&self, input: &ToolInput) -> ToolOutput {
        let Some(store) = &self.skills else {
            return ToolOutput::error("no skills are configured");
        };
        let name = match required(input.skill.as_deref(), "skill") {
            Ok(name) => name,
            Err(out) => return out,
        };
        let relative_path = match required(input.relative_path.as_deref(), "relative_path") {
            Ok(rel) => rel,
            Err(out) => return out,
        };

        match store.load_supporting(name, relative_path).await {
            Ok(body) => ToolOutput::ok(truncate_output(&body, self.config.max_output_bytes)),
            Err(err) => ToolOutput::error(err.to_string()),
        }
    }
}

impl std::fmt::Debug for ToolExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolExecutor")
            .field("config", &self.config)
            .field("skills", &self.skills.is_some())
            .finish_non_exhaustive()
    }
}

/// A non-blank required argument, or the error output naming it.
fn required<'a>(value: Option<&'a str>, field: &str) -> Result<&'a str, ToolOutput> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ToolOutput::error(format!("missing required argument: {field}")))
}
