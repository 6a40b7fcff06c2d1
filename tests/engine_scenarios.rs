// End-to-end engine behaviour with the built-in step registry

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use recipes::{
    BuiltinRegistry, EngineBuilder, EngineSettings, EventDescriptor, OrchestrationEngine,
    RecipeError, Snapshot, StateValue, Step, Subscription,
};
use serde_json::Value;
use tempfile::TempDir;
use tokio::time::timeout;

fn engine_at(root: &Path) -> OrchestrationEngine {
    EngineBuilder::new(Arc::new(BuiltinRegistry::new()))
        .with_settings(EngineSettings {
            root: root.to_path_buf(),
            command_buffer: 8,
        })
        .spawn()
}

fn message(text: &str) -> Step {
    Step::new("Message").with_param("message", text)
}

fn confirm(event: &str) -> Step {
    Step::new("Confirm").with_param("event", event)
}

async fn next(subscription: &mut Subscription) -> Snapshot {
    timeout(Duration::from_secs(5), subscription.recv())
        .await
        .expect("timed out waiting for notification")
        .expect("notifier closed")
        .snapshot
        .clone()
}

async fn until_terminal(subscription: &mut Subscription) -> Snapshot {
    let mut last = next(subscription).await;
    while !last.value.is_terminal() {
        last = next(subscription).await;
    }
    last
}

async fn assert_quiet(subscription: &mut Subscription) {
    let outcome = timeout(Duration::from_millis(50), subscription.recv()).await;
    assert!(outcome.is_err(), "unexpected notification");
}

#[tokio::test]
async fn test_message_confirm_message_scenario() {
    let site = TempDir::new().unwrap();
    let engine = engine_at(site.path());
    let mut subscription = engine.subscribe();

    let id = engine
        .submit_plan(vec![message("A"), confirm("confirm"), message("C")])
        .await
        .unwrap();

    let first_three: Vec<(StateValue, usize)> = {
        let mut seen = Vec::new();
        for _ in 0..3 {
            let s = next(&mut subscription).await;
            assert_eq!(s.instance_id, id);
            seen.push((s.value, s.context.current_step));
        }
        seen
    };
    assert_eq!(
        first_three,
        vec![
            (StateValue::RunningStep, 0),
            (StateValue::RunningStep, 1),
            (StateValue::WaitingForEvent, 1),
        ]
    );
    assert_quiet(&mut subscription).await;

    let delivery = engine
        .send_event(EventDescriptor::new("confirm"))
        .await
        .unwrap();
    assert!(delivery.changed);
    assert_eq!(delivery.instance_id, id);

    let mut after_confirm = Vec::new();
    for _ in 0..5 {
        after_confirm.push(next(&mut subscription).await);
    }
    let last = after_confirm.last().unwrap();
    assert_eq!(last.value, StateValue::Completed);
    assert_eq!(last.context.current_step, 3);
    assert_eq!(last.context.results.len(), 3);
    assert_eq!(last.last_event.as_ref().map(|e| e.kind.as_str()), Some("ADVANCE"));
    assert_quiet(&mut subscription).await;
}

#[tokio::test]
async fn test_wrong_event_leaves_instance_waiting() {
    let site = TempDir::new().unwrap();
    let engine = engine_at(site.path());
    let mut subscription = engine.subscribe();

    engine.submit_plan(vec![confirm("CONTINUE")]).await.unwrap();
    assert_eq!(next(&mut subscription).await.value, StateValue::WaitingForEvent);

    let delivery = engine
        .send_event(EventDescriptor::new("SKIP"))
        .await
        .unwrap();
    assert!(!delivery.changed);
    assert_quiet(&mut subscription).await;

    let current = engine.current_snapshot().await.unwrap().unwrap();
    assert_eq!(current.value, StateValue::WaitingForEvent);
}

#[tokio::test]
async fn test_file_step_writes_under_site_root() {
    let site = TempDir::new().unwrap();
    let engine = engine_at(site.path());
    let mut subscription = engine.subscribe();

    engine
        .submit_plan(vec![Step::new("File")
            .with_param("path", "src/pages/index.md")
            .with_param("content", "# Hello")])
        .await
        .unwrap();

    let done = until_terminal(&mut subscription).await;
    assert_eq!(done.value, StateValue::Completed);
    let written = std::fs::read_to_string(site.path().join("src/pages/index.md")).unwrap();
    assert_eq!(written, "# Hello");
    assert_eq!(done.context.results[0].data["path"], Value::from("src/pages/index.md"));
}

#[tokio::test]
async fn test_failing_step_is_reported_through_notifications() {
    let site = TempDir::new().unwrap();
    // A regular file as the root makes every write fail
    let root = site.path().join("not-a-dir");
    std::fs::write(&root, "").unwrap();
    let engine = engine_at(&root);
    let mut subscription = engine.subscribe();

    engine
        .submit_plan(vec![
            message("before"),
            Step::new("File")
                .with_param("path", "out/page.md")
                .with_param("content", "x"),
            message("never"),
        ])
        .await
        .expect("step failures are not synchronous errors");

    let failed = until_terminal(&mut subscription).await;
    assert_eq!(failed.value, StateValue::Failed);
    assert_eq!(failed.context.current_step, 1);
    assert_eq!(failed.context.results.len(), 1);
    assert!(matches!(
        failed.failure(),
        Some(RecipeError::StepExecution { index: 1, .. })
    ));
}

#[tokio::test]
async fn test_new_plan_replaces_running_instance() {
    let site = TempDir::new().unwrap();
    let engine = engine_at(site.path());
    let mut subscription = engine.subscribe();

    let first = engine.submit_plan(vec![confirm("CONTINUE")]).await.unwrap();
    assert_eq!(next(&mut subscription).await.instance_id, first);

    let second = engine
        .submit_plan(vec![confirm("NEXT"), message("done")])
        .await
        .unwrap();
    assert_ne!(first, second);
    let waiting = next(&mut subscription).await;
    assert_eq!(waiting.instance_id, second);

    // The old instance's event no longer drives anything
    let stale = engine
        .send_event(EventDescriptor::new("CONTINUE"))
        .await
        .unwrap();
    assert_eq!(stale.instance_id, second);
    assert!(!stale.changed);

    engine.send_event(EventDescriptor::new("NEXT")).await.unwrap();
    let done = until_terminal(&mut subscription).await;
    assert_eq!(done.instance_id, second);
    assert_eq!(done.value, StateValue::Completed);
}

#[tokio::test]
async fn test_replacement_before_confirmation_is_not_misapplied() {
    let site = TempDir::new().unwrap();
    let engine = engine_at(site.path());
    let mut subscription = engine.subscribe();

    let first = engine
        .submit_plan(vec![message("A"), confirm("CONTINUE"), message("C")])
        .await
        .unwrap();
    let mut last = next(&mut subscription).await;
    while last.value != StateValue::WaitingForEvent {
        last = next(&mut subscription).await;
    }
    assert_eq!(last.instance_id, first);

    let second = engine.submit_plan(vec![message("P2")]).await.unwrap();
    let done = until_terminal(&mut subscription).await;
    assert_eq!(done.instance_id, second);
    assert_eq!(done.value, StateValue::Completed);

    let late = engine
        .send_event(EventDescriptor::new("CONTINUE"))
        .await
        .unwrap();
    assert_eq!(late.instance_id, second);
    assert!(!late.changed);
    assert_quiet(&mut subscription).await;

    let current = engine.current_snapshot().await.unwrap().unwrap();
    assert_eq!(current.instance_id, second);
    assert_eq!(current.context.current_step, 1);
}

#[tokio::test]
async fn test_every_subscriber_sees_the_same_sequence() {
    let site = TempDir::new().unwrap();
    let engine = engine_at(site.path());
    let mut first = engine.subscribe();
    let mut second = engine.subscribe();
    let dropped = engine.subscribe();
    assert_eq!(engine.notifier().subscriber_count(), 3);
    drop(dropped);
    assert_eq!(engine.notifier().subscriber_count(), 2);

    engine
        .submit_plan(vec![message("one"), message("two")])
        .await
        .unwrap();

    let mut seen_first = Vec::new();
    let mut seen_second = Vec::new();
    loop {
        let a = next(&mut first).await;
        let b = next(&mut second).await;
        seen_first.push((a.value, a.context.current_step, a.context.active_step));
        seen_second.push((b.value, b.context.current_step, b.context.active_step));
        if a.value.is_terminal() {
            break;
        }
    }
    assert_eq!(seen_first, seen_second);
    assert_eq!(seen_first.last().unwrap().0, StateValue::Completed);
}

#[tokio::test]
async fn test_late_subscriber_sees_only_later_changes() {
    let site = TempDir::new().unwrap();
    let engine = engine_at(site.path());
    let mut early = engine.subscribe();

    engine
        .submit_plan(vec![confirm("CONTINUE"), message("after")])
        .await
        .unwrap();
    assert_eq!(next(&mut early).await.value, StateValue::WaitingForEvent);

    let mut late = engine.subscribe();
    assert!(late.try_recv().is_none());

    engine
        .send_event(EventDescriptor::new("CONTINUE"))
        .await
        .unwrap();

    let mut seen_early = Vec::new();
    let mut seen_late = Vec::new();
    loop {
        let a = next(&mut early).await;
        let b = next(&mut late).await;
        assert_eq!(a.instance_id, b.instance_id);
        seen_early.push((a.value, a.context.current_step, a.context.active_step));
        seen_late.push((b.value, b.context.current_step, b.context.active_step));
        if a.value.is_terminal() {
            break;
        }
    }

    assert_eq!(seen_early, seen_late);
    assert_eq!(seen_late.first().unwrap().0, StateValue::RunningStep);
    assert_eq!(seen_late.last().unwrap(), &(StateValue::Completed, 2, None));
    assert_quiet(&mut early).await;
    assert_quiet(&mut late).await;
}

#[tokio::test]
async fn test_event_without_instance_is_rejected() {
    let site = TempDir::new().unwrap();
    let engine = engine_at(site.path());

    let err = engine
        .send_event(EventDescriptor::new("CONTINUE"))
        .await
        .unwrap_err();
    assert!(matches!(err, RecipeError::NoActiveInstance));
}

#[tokio::test]
async fn test_unknown_resource_fails_startup() {
    let site = TempDir::new().unwrap();
    let engine = engine_at(site.path());

    let err = engine
        .submit_plan(vec![Step::new("Deploy")])
        .await
        .unwrap_err();
    assert!(matches!(err, RecipeError::Startup { .. }));
}

#[tokio::test]
async fn test_empty_plan_completes_immediately() {
    let site = TempDir::new().unwrap();
    let engine = engine_at(site.path());
    let mut subscription = engine.subscribe();

    engine.submit_plan(Vec::new()).await.unwrap();
    let done = next(&mut subscription).await;
    assert_eq!(done.value, StateValue::Completed);
    assert_eq!(done.context.current_step, 0);
}
