//! Domain models shared across the relay.

pub mod permission;
pub mod protocol;
pub mod session;
pub mod tool;
