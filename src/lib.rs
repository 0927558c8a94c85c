#![forbid(unsafe_code)]

//! `agent-relay`: drive a long-lived coding agent over stdio.
//!
//! The relay spawns the agent, speaks its stream-JSON protocol, gates every
//! tool call through a permission policy (with optional human approval),
//! serves a small set of virtual tools over a nested MCP channel, and keeps
//! exactly one session alive for any number of front-ends.

pub mod backend;
pub mod config;
pub mod errors;
pub mod executor;
pub mod mcp;
pub mod models;
pub mod orchestrator;
pub mod policy;
pub mod responder;
pub mod skills;
pub mod transport;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
