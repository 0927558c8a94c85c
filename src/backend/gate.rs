//! Permission gate: policy evaluation plus optional human escalation.

use tracing::{info, warn};

use crate::executor::util::truncate_output;
use crate::models::permission::PermissionDecision;
use crate::models::tool::ToolInvocation;
use crate::policy::evaluator::PermissionPolicy;
use crate::responder::{PermissionPrompt, Responder};

/// Longest tool input rendering shown in an approval prompt.
const INPUT_SUMMARY_BYTES: usize = 500;

/// Decides `can_use_tool` requests.
#[derive(Debug, Clone)]
pub struct PermissionGate {
    policy: PermissionPolicy,
    interactive: bool,
}

impl PermissionGate {
    /// Gate over `policy`; `interactive` enables escalation to a human.
    #[must_use]
    pub fn new(policy: PermissionPolicy, interactive: bool) -> Self {
        Self {
            policy,
            interactive,
        }
    }

    /// The underlying policy.
    #[must_use]
    pub fn policy(&self) -> &PermissionPolicy {
        &self.policy
    }

    /// Evaluate `invocation`, asking a human when the denial is escalatable.
    ///
    /// Approval turns the decision into an allow with an empty reason;
    /// rejection or a failed prompt keeps the policy's denial.
    pub async fn decide(
        &self,
        request_id: &str,
        invocation: &ToolInvocation,
        responder: &dyn Responder,
    ) -> PermissionDecision {
        let decision = self.policy.evaluate(invocation);
        if !decision.needs_escalation() || !self.interactive {
            return decision;
        }

        let prompt = PermissionPrompt {
            request_id: request_id.to_owned(),
            tool_name: invocation.display_name().to_owned(),
            reason: decision.reason.clone(),
            input_summary: truncate_output(&invocation.raw_input.to_string(), INPUT_SUMMARY_BYTES),
        };

        match responder.ask_permission(&prompt).await {
            Ok(true) => {
                info!(request_id, tool_name = %prompt.tool_name, "tool approved by operator");
                PermissionDecision::allow()
            }
            Ok(false) => {
                info!(request_id, tool_name = %prompt.tool_name, "tool rejected by operator");
                decision
            }
            Err(err) => {
                warn!(request_id, error = %err, "approval prompt failed, keeping denial");
                decision
            }
        }
    }
}
