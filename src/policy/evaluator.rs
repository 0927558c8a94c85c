//! Permission policy for tool invocations.
//!
//! A pure decision table: the same invocation, roots and settings always
//! produce the same [`PermissionDecision`]. Escalation to a human happens in
//! the backend, not here.

use std::path::PathBuf;

use regex::RegexSet;
use tracing::{debug, info_span, warn};

use crate::config::{PermissionConfig, PolicyMode};
use crate::models::permission::PermissionDecision;
use crate::models::tool::{ToolInvocation, ToolKind};
use crate::policy::roots::AllowedRoots;

/// Permission policy bound to a session's roots and working directory.
#[derive(Debug, Clone)]
pub struct PermissionPolicy {
    roots: AllowedRoots,
    base_dir: PathBuf,
    mode: PolicyMode,
    auto_allow_tools: Vec<String>,
    command_set: RegexSet,
    command_patterns: Vec<String>,
}

impl PermissionPolicy {
    /// Build a policy with no auto-approve rules.
    #[must_use]
    pub fn new(roots: AllowedRoots, base_dir: PathBuf, mode: PolicyMode) -> Self {
        Self {
            roots,
            base_dir,
            mode,
            auto_allow_tools: Vec::new(),
            command_set: RegexSet::empty(),
            command_patterns: Vec::new(),
        }
    }

    /// Build a policy from configuration.
    ///
    /// Invalid command patterns are skipped with a warning.
    #[must_use]
    pub fn from_config(roots: AllowedRoots, base_dir: PathBuf, config: &PermissionConfig) -> Self {
        let valid_patterns: Vec<String> = config
            .auto_approve_commands
            .iter()
            .filter(|p| {
                let ok = regex::Regex::new(p).is_ok();
                if !ok {
                    warn!(pattern = %p, "invalid regex in auto_approve_commands, skipping");
                }
                ok
            })
            .cloned()
            .collect();

        let command_set = RegexSet::new(&valid_patterns).unwrap_or_else(|_| RegexSet::empty());

        Self {
            roots,
            base_dir,
            mode: config.mode,
            auto_allow_tools: config.auto_allow_tools.clone(),
            command_set,
            command_patterns: valid_patterns,
        }
    }

    /// The roots this policy checks paths against.
    #[must_use]
    pub fn roots(&self) -> &AllowedRoots {
        &self.roots
    }

    /// Decide whether `invocation` may run. First matching rule wins.
    #[must_use]
    pub fn evaluate(&self, invocation: &ToolInvocation) -> PermissionDecision {
        let tool = invocation.display_name();
        let _span = info_span!("policy_evaluate", tool_name = %tool).entered();

        // ── 0. Undecodable input ─────────────────────────────
        let input = match &invocation.input {
            Ok(input) => input,
            Err(err) => {
                return PermissionDecision::deny_final(format!("malformed input for {tool}: {err}"));
            }
        };

        let is_get = input.http_method() == "GET";

        // ── 1. Read set: every path must be under a root ─────
        let read_set = match invocation.kind {
            ToolKind::Read | ToolKind::Glob | ToolKind::Grep | ToolKind::WebSearch => true,
            ToolKind::WebFetch | ToolKind::Fetch => is_get,
            _ => false,
        };
        if read_set {
            for (field, path) in input.paths() {
                if !self.roots.is_allowed(path, &self.base_dir) {
                    debug!(field, path, "path outside allowed roots");
                    return PermissionDecision::deny(format!(
                        "{tool}: path outside allowed roots: {path}"
                    ));
                }
            }
            return PermissionDecision::allow();
        }

        // ── 2. Skills ────────────────────────────────────────
        if matches!(
            invocation.kind,
            ToolKind::Skill | ToolKind::LoadSkillSupporting
        ) {
            return PermissionDecision::allow();
        }

        // ── 3. Mutating HTTP ─────────────────────────────────
        if matches!(invocation.kind, ToolKind::Fetch | ToolKind::WebFetch) {
            return PermissionDecision::deny(format!(
                "{tool} with method {} requires approval",
                input.http_method()
            ));
        }

        match self.mode {
            PolicyMode::ReadOnly => {
                PermissionDecision::deny_final(format!("read-only mode: {tool} not allowed"))
            }
            PolicyMode::DenyNonRead => {
                // ── 4. Configured tool allowlist ─────────────
                if self.auto_allow_tools.iter().any(|t| t == tool) {
                    debug!(matched_rule = %format!("tool:{tool}"), "auto-allowed");
                    return PermissionDecision::allow();
                }

                // ── 5. Configured command patterns ───────────
                if invocation.kind == ToolKind::Bash {
                    if let Some(rule) = input
                        .command
                        .as_deref()
                        .and_then(|cmd| self.match_command(cmd))
                    {
                        debug!(matched_rule = %rule, "auto-allowed via command rule");
                        return PermissionDecision::allow();
                    }
                }

                // ── 6. Everything else ───────────────────────
                PermissionDecision::deny(format!("{tool} requires approval"))
            }
        }
    }

    /// Return the first command pattern matching `command`, if any.
    fn match_command(&self, command: &str) -> Option<String> {
        self.command_set
            .matches(command.trim())
            .iter()
            .next()
            .map(|idx| format!("command:{}", self.command_patterns[idx]))
    }
}
