//! Unit tests for the tool executor.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use agent_relay::executor::{ExecutorConfig, ToolExecutor, ToolOutput};
use agent_relay::models::tool::ToolInvocation;
use agent_relay::skills::DirSkillStore;

use super::support::RecordingResponder;

fn executor(work_dir: &Path) -> ToolExecutor {
    ToolExecutor::new(ExecutorConfig {
        work_dir: work_dir.to_path_buf(),
        max_output_bytes: 1_000,
        command_timeout: Duration::from_secs(10),
        http_timeout: Duration::from_secs(5),
        search_url: "http://127.0.0.1:9/search".into(),
    })
}

async fn run(executor: &ToolExecutor, name: &str, input: serde_json::Value) -> ToolOutput {
    let responder = RecordingResponder::approving();
    executor
        .execute(&ToolInvocation::new(name, input), &responder)
        .await
}

// ─── Read ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn read_resolves_relative_paths_against_work_dir() {
    let tmp = tempfile::tempdir().unwrap();
    std::fs::write(tmp.path().join("notes.txt"), "remember the milk").unwrap();

    let out = run(&executor(tmp.path()), "Read", json!({"file_path": "notes.txt"})).await;
    assert_eq!(out, ToolOutput::ok("remember the milk"));
}

#[tokio::test]
async fn read_missing_file_is_an_error_output() {
    let tmp = tempfile::tempdir().unwrap();
    let out = run(&executor(tmp.path()), "Read", json!({"file_path": "nope.txt"})).await;
    assert!(out.is_error);
    assert!(out.text.starts_with("failed to read nope.txt"));
}

#[tokio::test]
async fn read_output_is_truncated() {
    let tmp = tempfile::tempdir().unwrap();
    std::fs::write(tmp.path().join("big.txt"), "x".repeat(5_000)).unwrap();

    let out = run(&executor(tmp.path()), "Read", json!({"path": "big.txt"})).await;
    assert!(!out.is_error);
    assert!(out.text.ends_with("... [truncated 4000 bytes]"));
}

#[tokio::test]
async fn read_of_a_large_file_keeps_only_the_limit() {
    let tmp = tempfile::tempdir().unwrap();
    std::fs::write(tmp.path().join("huge.log"), "y".repeat(5_000_000)).unwrap();

    let out = run(&executor(tmp.path()), "Read", json!({"file_path": "huge.log"})).await;
    assert!(!out.is_error);
    assert_eq!(out.text, format!("{}\n... [truncated 4999000 bytes]", "y".repeat(1_000)));
}

#[tokio::test]
async fn read_does_not_split_a_char_at_the_limit() {
    let tmp = tempfile::tempdir().unwrap();
    // 999 ASCII bytes, then a two-byte char straddling the limit.
    let text = format!("{}é tail", "a".repeat(999));
    std::fs::write(tmp.path().join("accent.txt"), &text).unwrap();

    let out = run(&executor(tmp.path()), "Read", json!({"file_path": "accent.txt"})).await;
    assert!(!out.is_error);
    assert_eq!(out.text, format!("{}\n... [truncated 7 bytes]", "a".repeat(999)));
}

// ─── Argument validation ──────────────────────────────────────────────

#[tokio::test]
async fn missing_arguments_are_named() {
    let tmp = tempfile::tempdir().unwrap();
    let exec = executor(tmp.path());

    let cases = [
        ("Read", "file_path"),
        ("Bash", "command"),
        ("Fetch", "url"),
        ("WebSearch", "query"),
        ("AddReaction", "emoji"),
        ("SendUpdate", "text"),
    ];
    for (tool, field) in cases {
        let out = run(&exec, tool, json!({})).await;
        assert_eq!(
            out,
            ToolOutput::error(format!("missing required argument: {field}")),
            "tool {tool}"
        );
    }
}

#[tokio::test]
async fn malformed_input_is_reported() {
    let tmp = tempfile::tempdir().unwrap();
    let out = run(&executor(tmp.path()), "Bash", json!({"command": 7})).await;
    assert!(out.is_error);
    assert!(out.text.starts_with("invalid input for Bash"));
}

#[tokio::test]
async fn unknown_tools_are_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    let out = run(&executor(tmp.path()), "mcp__relay__Write", json!({})).await;
    assert_eq!(out, ToolOutput::error("unknown tool: Write"));
}

#[tokio::test]
async fn non_http_urls_are_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    let out = run(&executor(tmp.path()), "Fetch", json!({"url": "file:///etc/passwd"})).await;
    assert!(out.is_error);
    assert!(out.text.contains("unsupported url scheme"));
}

#[tokio::test]
async fn fetch_body_is_capped_while_streaming() {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    const BODY_LEN: usize = 3_000_000;
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = vec![0_u8; 4096];
        let _ = socket.read(&mut request).await.unwrap();
        let head = format!(
            "HTTP/1.1 200 OK\r\ncontent-type: text/plain\r\ncontent-length: {BODY_LEN}\r\nconnection: close\r\n\r\n"
        );
        socket.write_all(head.as_bytes()).await.unwrap();
        let block = vec![b'b'; 64 * 1024];
        let mut sent = 0;
        while sent < BODY_LEN {
            let n = block.len().min(BODY_LEN - sent);
            if socket.write_all(&block[..n]).await.is_err() {
                break;
            }
            sent += n;
        }
    });

    let tmp = tempfile::tempdir().unwrap();
    let out = run(
        &executor(tmp.path()),
        "WebFetch",
        json!({"url": format!("http://{addr}/big")}),
    )
    .await;
    server.await.unwrap();

    assert!(!out.is_error, "{}", out.text);
    assert!(out.text.starts_with("HTTP 200 OK\nbbbb"));
    // Everything past the first 1000 bytes of "HTTP 200 OK\n" + body is dropped.
    let dropped = "HTTP 200 OK\n".len() + BODY_LEN - 1_000;
    assert!(out.text.ends_with(&format!("... [truncated {dropped} bytes]")));
}

// ─── Front-end tools ──────────────────────────────────────────────────

#[tokio::test]
async fn reaction_and_update_reach_the_responder() {
    let tmp = tempfile::tempdir().unwrap();
    let exec = executor(tmp.path());
    let responder = RecordingResponder::approving();

    let out = exec
        .execute(
            &ToolInvocation::new("AddReaction", json!({"emoji": ":eyes:"})),
            &responder,
        )
        .await;
    assert_eq!(out, ToolOutput::ok("reacted with :eyes:"));

    let out = exec
        .execute(
            &ToolInvocation::new("mcp__relay__SendUpdate", json!({"message": "halfway"})),
            &responder,
        )
        .await;
    assert_eq!(out, ToolOutput::ok("update sent"));

    assert_eq!(*responder.reactions.lock().unwrap(), vec![":eyes:".to_owned()]);
    assert_eq!(*responder.updates.lock().unwrap(), vec!["halfway".to_owned()]);
}

// ─── Skills ───────────────────────────────────────────────────────────

#[tokio::test]
async fn skills_without_store_are_an_error() {
    let tmp = tempfile::tempdir().unwrap();
    let out = run(&executor(tmp.path()), "Skill", json!({})).await;
    assert_eq!(out, ToolOutput::error("no skills are configured"));
}

#[tokio::test]
async fn skill_listing_and_loading() {
    let tmp = tempfile::tempdir().unwrap();
    let skills = tmp.path().join("skills");
    std::fs::create_dir_all(skills.join("deploy")).unwrap();
    std::fs::write(skills.join("deploy/SKILL.md"), "# Ship to prod\nsteps").unwrap();
    std::fs::write(skills.join("deploy/checklist.md"), "- tag").unwrap();

    let exec = executor(tmp.path()).with_skills(Arc::new(DirSkillStore::new(&skills)));

    let listing = run(&exec, "Skill", json!({})).await;
    assert_eq!(listing, ToolOutput::ok("- deploy: Ship to prod"));

    let body = run(&exec, "Skill", json!({"skill": "deploy"})).await;
    assert_eq!(body, ToolOutput::ok("# Ship to prod\nsteps"));

    let support = run(
        &exec,
        "LoadSkillSupporting",
        json!({"skill": "deploy", "relative_path": "checklist.md"}),
    )
    .await;
    assert_eq!(support, ToolOutput::ok("- tag"));

    let escape = run(
        &exec,
        "LoadSkillSupporting",
        json!({"skill": "deploy", "relative_path": "../../secret"}),
    )
    .await;
    assert!(escape.is_error);
}

// ─── Bash ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn bash_runs_in_work_dir() {
    let tmp = tempfile::tempdir().unwrap();
    let out = run(&executor(tmp.path()), "Bash", json!({"command": "pwd"})).await;
    assert!(!out.is_error);
    let reported = Path::new(out.text.trim()).canonicalize().unwrap();
    assert_eq!(reported, tmp.path().canonicalize().unwrap());
}

#[tokio::test]
async fn bash_reports_stderr_and_exit_status() {
    let tmp = tempfile::tempdir().unwrap();
    let out = run(
        &executor(tmp.path()),
        "Bash",
        json!({"command": "echo out; echo err >&2; exit 3"}),
    )
    .await;
    assert!(out.is_error);
    assert_eq!(out.text, "out\n[stderr]\nerr\n[exit status: 3]");
}

#[tokio::test]
async fn bash_without_output_says_so() {
    let tmp = tempfile::tempdir().unwrap();
    let out = run(&executor(tmp.path()), "Bash", json!({"command": "true"})).await;
    assert_eq!(out, ToolOutput::ok("(no output)"));
}

#[tokio::test]
async fn bash_output_is_capped_while_draining() {
    let tmp = tempfile::tempdir().unwrap();
    let out = run(
        &executor(tmp.path()),
        "Bash",
        json!({"command": "head -c 5000000 /dev/zero | tr '\\0' a"}),
    )
    .await;
    assert!(!out.is_error, "{}", out.text);
    assert_eq!(out.text, format!("{}\n... [truncated 4999000 bytes]", "a".repeat(1_000)));
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn bash_timeout_kills_background_children() {
    let tmp = tempfile::tempdir().unwrap();
    let exec = ToolExecutor::new(ExecutorConfig {
        command_timeout: Duration::from_millis(500),
        ..executor(tmp.path()).config().clone()
    });

    let started = std::time::Instant::now();
    let out = run(
        &exec,
        "Bash",
        json!({"command": "sleep 30 & echo $! > child.pid; wait"}),
    )
    .await;
    assert!(out.is_error);
    assert!(out.text.starts_with("command timed out"), "{}", out.text);
    assert!(started.elapsed() < Duration::from_secs(10));

    let pid = std::fs::read_to_string(tmp.path().join("child.pid")).unwrap();
    let stat = format!("/proc/{}/stat", pid.trim());

    // The orphan is reaped by init shortly after the kill.
    let mut alive = true;
    for _ in 0..50 {
        alive = match std::fs::read_to_string(&stat) {
            Ok(contents) => !contents.contains(") Z"),
            Err(_) => false,
        };
        if !alive {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert!(!alive, "background sleep survived the timeout");
}
