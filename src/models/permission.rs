//! Permission decision model.

/// Outcome of evaluating a tool invocation against the permission policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionDecision {
    /// Whether the tool may run.
    pub allowed: bool,
    /// Human-readable denial reason; empty when allowed.
    pub reason: String,
    /// Whether a human may override a denial.
    pub escalatable: bool,
}

impl PermissionDecision {
    /// An allow decision.
    #[must_use]
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: String::new(),
            escalatable: false,
        }
    }

    /// A denial that may be escalated to interactive approval.
    #[must_use]
    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: reason.into(),
            escalatable: true,
        }
    }

    /// A denial no human approval can override.
    #[must_use]
    pub fn deny_final(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: reason.into(),
            escalatable: false,
        }
    }

    /// Whether this denial should be put to a human.
    #[must_use]
    pub fn needs_escalation(&self) -> bool {
        !self.allowed && self.escalatable
    }
}
