//! Global configuration parsing and validation.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::{AppError, Result};

/// How the permission policy treats tools outside the read set.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PolicyMode {
    /// Deny with "requires approval"; the denial may be escalated.
    #[default]
    DenyNonRead,
    /// Deny everything outside the read set with no escalation.
    ReadOnly,
}

/// Permission policy settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct PermissionConfig {
    /// Policy mode for tools outside the read set.
    #[serde(default)]
    pub mode: PolicyMode,
    /// Ask a human before turning an escalatable denial into a final one.
    #[serde(default = "default_true")]
    pub interactive_approval: bool,
    /// Tool names that are always allowed (deny-non-read mode only).
    #[serde(default)]
    pub auto_allow_tools: Vec<String>,
    /// Regex patterns for `Bash` commands that are always allowed
    /// (deny-non-read mode only).
    #[serde(default)]
    pub auto_approve_commands: Vec<String>,
}

impl Default for PermissionConfig {
    fn default() -> Self {
        Self {
            mode: PolicyMode::default(),
            interactive_approval: true,
            auto_allow_tools: Vec::new(),
            auto_approve_commands: Vec::new(),
        }
    }
}

/// Timeout values in seconds.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TimeoutConfig {
    /// Deadline for the `initialize` handshake.
    #[serde(default = "default_init_seconds")]
    pub init_seconds: u64,
    /// Wall-clock limit for a single `Bash` invocation.
    #[serde(default = "default_command_seconds")]
    pub command_seconds: u64,
    /// Limit for a single HTTP request (`Fetch`, `WebSearch`).
    #[serde(default = "default_http_seconds")]
    pub http_seconds: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            init_seconds: default_init_seconds(),
            command_seconds: default_command_seconds(),
            http_seconds: default_http_seconds(),
        }
    }
}

/// Virtual tool settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ToolsConfig {
    /// Name of the virtual MCP server announced to the agent.
    #[serde(default = "default_mcp_server_name")]
    pub mcp_server_name: String,
    /// Maximum size of any textual tool output.
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,
    /// HTML search endpoint queried with `?q=`.
    #[serde(default = "default_search_url")]
    pub search_url: String,
    /// Directory holding `<name>/SKILL.md` skill folders.
    #[serde(default)]
    pub skills_dir: Option<PathBuf>,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            mcp_server_name: default_mcp_server_name(),
            max_output_bytes: default_max_output_bytes(),
            search_url: default_search_url(),
            skills_dir: None,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_init_seconds() -> u64 {
    60
}

fn default_command_seconds() -> u64 {
    120
}

fn default_http_seconds() -> u64 {
    30
}

fn default_mcp_server_name() -> String {
    "relay".into()
}

fn default_max_output_bytes() -> usize {
    50_000
}

fn default_search_url() -> String {
    "https://html.duckduckgo.com/html/".into()
}

fn default_agent_cli() -> String {
    "claude".into()
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Agent binary.
    #[serde(default = "default_agent_cli")]
    pub agent_cli: String,
    /// Leading arguments placed before the fixed protocol flags
    /// (for wrapper launchers such as `npx`).
    #[serde(default)]
    pub agent_args: Vec<String>,
    /// Working directory for new sessions.
    pub work_dir: PathBuf,
    /// Roots file-touching tools may access without approval.
    ///
    /// Empty means the working directory alone.
    #[serde(default)]
    pub allowed_roots: Vec<PathBuf>,
    /// Permission policy settings.
    #[serde(default)]
    pub permissions: PermissionConfig,
    /// Timeout settings.
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    /// Virtual tool settings.
    #[serde(default)]
    pub tools: ToolsConfig,
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string and normalize paths.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Replace the working directory, canonicalizing it.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the directory does not exist.
    pub fn set_work_dir(&mut self, dir: &Path) -> Result<()> {
        self.work_dir = dir
            .canonicalize()
            .map_err(|err| AppError::Config(format!("invalid work_dir {}: {err}", dir.display())))?;
        Ok(())
    }

    /// Allowed roots, falling back to the working directory.
    #[must_use]
    pub fn effective_roots(&self) -> Vec<PathBuf> {
        if self.allowed_roots.is_empty() {
            vec![self.work_dir.clone()]
        } else {
            self.allowed_roots.clone()
        }
    }

    /// Handshake deadline.
    #[must_use]
    pub fn init_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.init_seconds)
    }

    fn validate(&mut self) -> Result<()> {
        if self.agent_cli.trim().is_empty() {
            return Err(AppError::Config("agent_cli must not be empty".into()));
        }

        if self.tools.max_output_bytes == 0 {
            return Err(AppError::Config(
                "tools.max_output_bytes must be greater than zero".into(),
            ));
        }

        if self.timeouts.command_seconds == 0 || self.timeouts.init_seconds == 0 {
            return Err(AppError::Config(
                "timeouts must be greater than zero".into(),
            ));
        }

        if self.tools.mcp_server_name.trim().is_empty() || self.tools.mcp_server_name.contains("__")
        {
            return Err(AppError::Config(
                "tools.mcp_server_name must be non-empty and must not contain `__`".into(),
            ));
        }

        for root in &self.allowed_roots {
            if !root.is_absolute() {
                return Err(AppError::Config(format!(
                    "allowed root must be absolute: {}",
                    root.display()
                )));
            }
        }

        for pattern in &self.permissions.auto_approve_commands {
            regex::Regex::new(pattern).map_err(|err| {
                AppError::Config(format!("invalid auto_approve_commands pattern {pattern}: {err}"))
            })?;
        }

        let work_dir = self.work_dir.clone();
        self.set_work_dir(&work_dir)
    }
}
