//! Session ownership and message dispatch.

pub mod dispatcher;
pub mod session_manager;
