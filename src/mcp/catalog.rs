//! Static tool catalog announced through `tools/list`.

use serde_json::{json, Value};

/// Every tool the virtual server offers, as MCP tool descriptors.
#[must_use]
pub fn tools() -> Vec<Value> {
    vec![
        tool(
            "Read",
            "Read a UTF-8 text file. Relative paths resolve against the session working directory.",
            json!({
                "file_path": { "type": "string", "description": "Absolute or relative file path" }
            }),
            &["file_path"],
        ),
        tool(
            "Bash",
            "Run a shell command in the session working directory with a hard timeout. \
             The whole process group is killed when the timeout expires.",
            json!({
                "command": { "type": "string" }
            }),
            &["command"],
        ),
        tool(
            "Fetch",
            "Perform an HTTP request. GET requests run freely; any other method needs approval.",
            json!({
                "url": { "type": "string" },
                "method": { "type": "string", "default": "GET" },
                "headers": { "type": "object", "additionalProperties": { "type": "string" } },
                "body": { "description": "String sent verbatim, anything else sent as JSON" }
            }),
            &["url"],
        ),
        tool(
            "WebSearch",
            "Search the web and return a numbered list of result links.",
            json!({
                "query": { "type": "string" }
            }),
            &["query"],
        ),
        tool(
            "AddReaction",
            "React to the message that started this turn.",
            json!({
                "emoji": { "type": "string", "description": "Emoji name without colons" }
            }),
            &["emoji"],
        ),
        tool(
            "SendUpdate",
            "Post an interim progress update before the final answer.",
            json!({
                "text": { "type": "string" }
            }),
            &["text"],
        ),
        tool(
            "Skill",
            "List available skills, or load one skill's instructions by name.",
            json!({
                "skill": { "type": "string", "description": "Skill to load; omit to list" }
            }),
            &[],
        ),
        tool(
            "LoadSkillSupporting",
            "Load a supporting file that lives inside a skill's folder.",
            json!({
                "skill": { "type": "string" },
                "relative_path": { "type": "string" }
            }),
            &["skill", "relative_path"],
        ),
    ]
}

fn tool(name: &str, description: &str, properties: Value, required: &[&str]) -> Value {
    json!({
        "name": name,
        "description": description,
        "inputSchema": {
            "type": "object",
            "properties": properties,
            "required": required
        }
    })
}
