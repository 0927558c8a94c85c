//! Tool invocation model.
//!
//! The agent sends tool input as free-form JSON. The relay only ever looks at
//! a closed set of fields, so the input is decoded into [`ToolInput`] once and
//! every downstream consumer (policy, executor) works on typed data.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;

/// Prefix the agent puts in front of tools served by an MCP server.
const MCP_TOOL_PREFIX: &str = "mcp__";

/// Known tool families. Everything else is [`ToolKind::Other`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolKind {
    /// Read a file.
    Read,
    /// Match file names.
    Glob,
    /// Search file contents.
    Grep,
    /// Agent-native web fetch.
    WebFetch,
    /// Web search.
    WebSearch,
    /// Relay HTTP request with an arbitrary method.
    Fetch,
    /// Shell command.
    Bash,
    /// Load or list skills.
    Skill,
    /// Load a supporting file of a skill.
    LoadSkillSupporting,
    /// React to the inbound message.
    AddReaction,
    /// Post an interim update.
    SendUpdate,
    /// Any tool not listed above (Write, Edit, ...).
    Other,
}

impl ToolKind {
    /// Classify a tool by name, stripping any `mcp__<server>__` prefix.
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        match canonical_tool_name(name) {
            "Read" => Self::Read,
            "Glob" => Self::Glob,
            "Grep" => Self::Grep,
            "WebFetch" => Self::WebFetch,
            "WebSearch" => Self::WebSearch,
            "Fetch" => Self::Fetch,
            "Bash" => Self::Bash,
            "Skill" => Self::Skill,
            "LoadSkillSupporting" => Self::LoadSkillSupporting,
            "AddReaction" => Self::AddReaction,
            "SendUpdate" => Self::SendUpdate,
            _ => Self::Other,
        }
    }
}

/// Strip the `mcp__<server>__` prefix from a tool name, if present.
#[must_use]
pub fn canonical_tool_name(name: &str) -> &str {
    name.strip_prefix(MCP_TOOL_PREFIX)
        .and_then(|rest| rest.split_once("__"))
        .map_or(name, |(_, tool)| tool)
}

/// Alternate spellings of [`ToolInput`] fields, as `(alias, field)`.
///
/// When an input carries both spellings the field's own name wins and the
/// alias is ignored.
const FIELD_ALIASES: &[(&str, &str)] = &[("message", "text"), ("name", "skill")];

/// Closed set of tool input fields the relay understands.
///
/// Unknown fields are ignored. Build it through [`ToolInvocation::new`],
/// which folds the `message` and `name` aliases onto their fields first.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct ToolInput {
    /// File path (`Read`, `Write`, `Edit`).
    #[serde(default)]
    pub file_path: Option<String>,
    /// Search root (`Glob`, `Grep`) or generic path.
    #[serde(default)]
    pub path: Option<String>,
    /// Notebook path (`NotebookEdit`).
    #[serde(default)]
    pub notebook_path: Option<String>,
    /// Directory argument.
    #[serde(default)]
    pub directory: Option<String>,
    /// Shell command line.
    #[serde(default)]
    pub command: Option<String>,
    /// Request URL.
    #[serde(default)]
    pub url: Option<String>,
    /// HTTP method; absent means `GET`.
    #[serde(default)]
    pub method: Option<String>,
    /// HTTP request headers.
    #[serde(default)]
    pub headers: Option<BTreeMap<String, String>>,
    /// HTTP body: a string is sent verbatim, anything else as JSON.
    #[serde(default)]
    pub body: Option<Value>,
    /// Reaction emoji name.
    #[serde(default)]
    pub emoji: Option<String>,
    /// Message text; `message` is accepted as well.
    #[serde(default)]
    pub text: Option<String>,
    /// Search query.
    #[serde(default)]
    pub query: Option<String>,
    /// Skill name; `name` is accepted as well.
    #[serde(default)]
    pub skill: Option<String>,
    /// Path of a supporting file relative to the skill directory.
    #[serde(default)]
    pub relative_path: Option<String>,
}

/// Field names that carry file system paths, in extraction order.
pub const PATH_FIELDS: &[&str] = &["file_path", "path", "notebook_path", "directory"];

impl ToolInput {
    /// Every path-bearing field that is set, paired with its field name.
    #[must_use]
    pub fn paths(&self) -> Vec<(&'static str, &str)> {
        [
            (PATH_FIELDS[0], &self.file_path),
            (PATH_FIELDS[1], &self.path),
            (PATH_FIELDS[2], &self.notebook_path),
            (PATH_FIELDS[3], &self.directory),
        ]
        .into_iter()
        .filter_map(|(field, value)| value.as_deref().map(|v| (field, v)))
        .collect()
    }

    /// HTTP method, upper-cased; defaults to `GET`.
    #[must_use]
    pub fn http_method(&self) -> String {
        self.method
            .as_deref()
            .map_or_else(|| "GET".to_owned(), |m| m.trim().to_ascii_uppercase())
    }
}

/// A single tool call issued by the agent.
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    /// Name exactly as the agent sent it.
    pub name: String,
    /// Classified tool family.
    pub kind: ToolKind,
    /// Decoded input, or the decode error for malformed input.
    pub input: std::result::Result<ToolInput, String>,
    /// Original input, echoed back in the allow envelope.
    pub raw_input: Value,
}

impl ToolInvocation {
    /// Build an invocation from a tool name and raw JSON input.
    ///
    /// A `null` input is treated as an empty object.
    #[must_use]
    pub fn new(name: &str, raw_input: Value) -> Self {
        let input = if raw_input.is_null() {
            Ok(ToolInput::default())
        } else {
            decode_input(&raw_input)
        };

        Self {
            name: name.to_owned(),
            kind: ToolKind::from_name(name),
            input,
            raw_input,
        }
    }

    /// Tool name without any MCP server prefix.
    #[must_use]
    pub fn display_name(&self) -> &str {
        canonical_tool_name(&self.name)
    }
}

fn decode_input(raw: &Value) -> std::result::Result<ToolInput, String> {
    let mut value = raw.clone();
    if let Some(fields) = value.as_object_mut() {
        for (alias, field) in FIELD_ALIASES {
            if let Some(v) = fields.remove(*alias) {
                fields.entry(*field).or_insert(v);
            }
        }
    }
    serde_json::from_value(value).map_err(|e| e.to_string())
}
