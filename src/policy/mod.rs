//! Permission policy modules.
//!
//! Provides allowed-root containment checks and the ordered decision table
//! applied to every tool invocation the agent requests.

pub mod evaluator;
pub mod roots;
