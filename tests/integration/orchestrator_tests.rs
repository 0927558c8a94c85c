//! End-to-end message handling with fake backends.

use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use agent_relay::backend::BackendFactory;
use agent_relay::orchestrator::dispatcher::{Orchestrator, CANCELLED_NOTICE};
use agent_relay::orchestrator::session_manager::SessionManager;
use agent_relay::AppError;

use super::test_helpers::{FakeFactory, RecordingResponder, Reply};

fn orchestrator() -> (Arc<FakeFactory>, Arc<Orchestrator>) {
    let factory = Arc::new(FakeFactory::new());
    let sessions = Arc::new(SessionManager::new(
        Arc::clone(&factory) as Arc<dyn BackendFactory>,
        PathBuf::from("/work"),
    ));
    (factory, Arc::new(Orchestrator::new(sessions)))
}

#[tokio::test]
async fn answer_is_posted_to_the_asking_responder() {
    let (factory, orchestrator) = orchestrator();
    let responder = RecordingResponder::approving();

    orchestrator
        .handle_message("ping", &responder, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(responder.posts(), vec!["s1: ping"]);
    assert_eq!(responder.typing.load(Ordering::SeqCst), 1);
    assert_eq!(factory.created(), 1);
}

#[tokio::test]
async fn concurrent_messages_never_overlap() {
    let (factory, orchestrator) = orchestrator();
    factory.script.push(Reply::Slow(Duration::from_millis(100)));
    factory.script.push(Reply::Slow(Duration::from_millis(100)));

    let first = RecordingResponder::approving();
    let second = RecordingResponder::approving();
    let cancel = CancellationToken::new();
    let (a, b) = tokio::join!(
        orchestrator.handle_message("one", &first, &cancel),
        orchestrator.handle_message("two", &second, &cancel)
    );
    a.unwrap();
    b.unwrap();

    assert_eq!(factory.script.max_active.load(Ordering::SeqCst), 1);
    assert_eq!(first.posts(), vec!["s1: one"]);
    assert_eq!(second.posts(), vec!["s1: two"]);
    assert_eq!(factory.created(), 1);
}

#[tokio::test]
async fn turn_failure_is_posted_and_session_kept() {
    let (factory, orchestrator) = orchestrator();
    factory
        .script
        .push(Reply::Fail(|| AppError::Agent("turn failed: error_max_turns".into())));
    let responder = RecordingResponder::approving();
    let cancel = CancellationToken::new();

    orchestrator.handle_message("a", &responder, &cancel).await.unwrap();
    orchestrator.handle_message("b", &responder, &cancel).await.unwrap();

    assert_eq!(
        responder.posts(),
        vec!["Error: agent: turn failed: error_max_turns", "s1: b"]
    );
    assert_eq!(factory.created(), 1);
}

#[tokio::test]
async fn dead_agent_is_discarded_and_replaced() {
    let (factory, orchestrator) = orchestrator();
    factory
        .script
        .push(Reply::Fail(|| AppError::AgentExited("stream closed".into())));
    let responder = RecordingResponder::approving();
    let cancel = CancellationToken::new();

    orchestrator.handle_message("a", &responder, &cancel).await.unwrap();
    orchestrator.handle_message("b", &responder, &cancel).await.unwrap();

    assert_eq!(
        responder.posts(),
        vec!["Error: agent exited: stream closed", "s2: b"]
    );
    assert_eq!(
        factory.script.events(),
        vec![
            "create s1 in /work",
            "converse s1 a",
            "close s1",
            "create s2 in /work",
            "converse s2 b"
        ]
    );
}

#[tokio::test]
async fn spawn_failure_is_posted() {
    let (factory, orchestrator) = orchestrator();
    *factory.script.fail_next_create.lock().unwrap() = true;
    let responder = RecordingResponder::approving();

    orchestrator
        .handle_message("a", &responder, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(responder.posts(), vec!["Error: spawn: fake spawn failure"]);
    assert!(orchestrator.status().await.is_none());
}

#[tokio::test]
async fn cancelled_turn_posts_partial_text_and_notice() {
    let (factory, orchestrator) = orchestrator();
    factory.script.push(Reply::UntilCancelled("half done"));
    factory.script.push(Reply::UntilCancelled(""));
    let responder = RecordingResponder::approving();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });
    orchestrator.handle_message("a", &responder, &cancel).await.unwrap();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });
    orchestrator.handle_message("b", &responder, &cancel).await.unwrap();

    assert_eq!(
        responder.posts(),
        vec![format!("half done\n\n{CANCELLED_NOTICE}"), CANCELLED_NOTICE.to_owned()]
    );
    // Cancellation does not cost the session.
    assert_eq!(factory.created(), 1);
}

#[tokio::test]
async fn queued_message_cancelled_before_its_turn() {
    let (factory, orchestrator) = orchestrator();
    factory.script.push(Reply::Slow(Duration::from_millis(200)));
    let first = RecordingResponder::approving();
    let second = RecordingResponder::approving();

    let running = CancellationToken::new();
    let queued = CancellationToken::new();
    let trigger = queued.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let (a, b) = tokio::join!(
        orchestrator.handle_message("one", &first, &running),
        orchestrator.handle_message("two", &second, &queued)
    );
    a.unwrap();
    b.unwrap();

    assert_eq!(first.posts(), vec!["s1: one"]);
    assert_eq!(second.posts(), vec![CANCELLED_NOTICE]);
    assert_eq!(
        factory.script.events(),
        vec!["create s1 in /work", "converse s1 one"]
    );
}

#[tokio::test]
async fn reset_replaces_the_session() {
    let (factory, orchestrator) = orchestrator();
    let responder = RecordingResponder::approving();
    orchestrator
        .handle_message("hi", &responder, &CancellationToken::new())
        .await
        .unwrap();

    let id = orchestrator.reset(None).await.unwrap();
    assert_eq!(id, "s2");
    let id = orchestrator
        .reset(Some(PathBuf::from("/elsewhere")))
        .await
        .unwrap();
    assert_eq!(id, "s3");

    let status = orchestrator.status().await.unwrap();
    assert_eq!(status.work_dir, PathBuf::from("/elsewhere"));
    assert_eq!(
        factory.script.events(),
        vec![
            "create s1 in /work",
            "converse s1 hi",
            "close s1",
            "create s2 in /work",
            "close s2",
            "create s3 in /elsewhere"
        ]
    );

    orchestrator.shutdown().await;
    assert!(orchestrator.status().await.is_none());
}
