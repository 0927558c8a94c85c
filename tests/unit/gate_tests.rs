//! Unit tests for policy evaluation with human escalation.

use std::path::Path;

use serde_json::json;

use agent_relay::backend::gate::PermissionGate;
use agent_relay::config::PolicyMode;
use agent_relay::models::tool::ToolInvocation;
use agent_relay::policy::evaluator::PermissionPolicy;
use agent_relay::policy::roots::AllowedRoots;

use super::support::RecordingResponder;

fn gate(root: &Path, mode: PolicyMode, interactive: bool) -> PermissionGate {
    let root = root.canonicalize().unwrap();
    let policy = PermissionPolicy::new(
        AllowedRoots::new([&root]).unwrap(),
        root.clone(),
        mode,
    );
    PermissionGate::new(policy, interactive)
}

#[tokio::test]
async fn allowed_tools_never_prompt() {
    let tmp = tempfile::tempdir().unwrap();
    let responder = RecordingResponder::rejecting();
    let inv = ToolInvocation::new("Read", json!({"file_path": "src/lib.rs"}));

    let decision = gate(tmp.path(), PolicyMode::DenyNonRead, true)
        .decide("r1", &inv, &responder)
        .await;
    assert!(decision.allowed);
    assert!(responder.prompts.lock().unwrap().is_empty());
}

#[tokio::test]
async fn approval_turns_denial_into_allow() {
    let tmp = tempfile::tempdir().unwrap();
    let responder = RecordingResponder::approving();
    let inv = ToolInvocation::new("Write", json!({"file_path": "a.txt", "content": "x"}));

    let decision = gate(tmp.path(), PolicyMode::DenyNonRead, true)
        .decide("r2", &inv, &responder)
        .await;
    assert!(decision.allowed);
    assert!(decision.reason.is_empty());

    let prompts = responder.prompts.lock().unwrap();
    assert_eq!(prompts.len(), 1);
    assert_eq!(prompts[0].request_id, "r2");
    assert_eq!(prompts[0].tool_name, "Write");
    assert_eq!(prompts[0].reason, "Write requires approval");
    assert!(prompts[0].input_summary.contains("a.txt"));
}

#[tokio::test]
async fn rejection_keeps_original_reason() {
    let tmp = tempfile::tempdir().unwrap();
    let responder = RecordingResponder::rejecting();
    let inv = ToolInvocation::new("Read", json!({"file_path": "/etc/shadow"}));

    let decision = gate(tmp.path(), PolicyMode::DenyNonRead, true)
        .decide("r3", &inv, &responder)
        .await;
    assert!(!decision.allowed);
    assert!(decision.reason.contains("path outside allowed roots: /etc/shadow"));
    assert_eq!(responder.prompts.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn final_denials_are_not_escalated() {
    let tmp = tempfile::tempdir().unwrap();
    let responder = RecordingResponder::approving();
    let inv = ToolInvocation::new("Bash", json!({"command": "ls"}));

    let decision = gate(tmp.path(), PolicyMode::ReadOnly, true)
        .decide("r4", &inv, &responder)
        .await;
    assert!(!decision.allowed);
    assert!(responder.prompts.lock().unwrap().is_empty());
}

#[tokio::test]
async fn non_interactive_gate_never_prompts() {
    let tmp = tempfile::tempdir().unwrap();
    let responder = RecordingResponder::approving();
    let inv = ToolInvocation::new("Bash", json!({"command": "ls"}));

    let decision = gate(tmp.path(), PolicyMode::DenyNonRead, false)
        .decide("r5", &inv, &responder)
        .await;
    assert_eq!(decision.reason, "Bash requires approval");
    assert!(responder.prompts.lock().unwrap().is_empty());
}

#[tokio::test]
async fn long_input_summary_is_truncated() {
    let tmp = tempfile::tempdir().unwrap();
    let responder = RecordingResponder::rejecting();
    let inv = ToolInvocation::new("Bash", json!({"command": "x".repeat(2_000)}));

    gate(tmp.path(), PolicyMode::DenyNonRead, true)
        .decide("r6", &inv, &responder)
        .await;
    let prompts = responder.prompts.lock().unwrap();
    assert!(prompts[0].input_summary.contains("[truncated"));
}
