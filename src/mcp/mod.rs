//! Virtual MCP server carried inside control messages.

pub mod bridge;
pub mod catalog;
