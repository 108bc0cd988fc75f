// tests/operation_lifecycle.rs

use std::error::Error;
use std::time::Duration;

use toolwarden::bridge::{BridgeReceiver, Event, EventKind};
use toolwarden::exec::ProcessHandle;
use toolwarden::fs::mock::MockFileSystem;
use toolwarden::operation::{FailureReason, Operation, OperationSpec, OperationState};
use toolwarden_test_utils::builders::{bridged_context, detached_context};
use toolwarden_test_utils::{STOPPED_EXIT_CODE, Script, ScriptedBackend, init_tracing, with_timeout};

type TestResult = Result<(), Box<dyn Error>>;

fn drain(rx: &mut BridgeReceiver) -> Vec<Event> {
    let mut events = Vec::new();
    while let Some(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn natural_exit_completes_and_streams_in_order() -> TestResult {
    init_tracing();

    let backend = ScriptedBackend::new().on(
        "smartctl",
        Script::new()
            .stdout("SMART overall-health self-assessment test result: PASSED")
            .stderr("warning: sector size 4096")
            .stdout("done"),
    );
    let fs = MockFileSystem::new();
    let (ctx, mut rx) = bridged_context(backend.clone(), &fs, Duration::from_millis(100));

    let op = Operation::new(OperationSpec::single(
        "Health test",
        ProcessHandle::new("smartctl").args(["-H", "/dev/sdb"]),
    ));
    op.start(&ctx);

    assert_eq!(with_timeout(op.wait()).await, OperationState::Completed);

    let events = drain(&mut rx);
    let kinds: Vec<EventKind> = events.iter().map(|e| e.kind.clone()).collect();
    assert_eq!(
        kinds,
        vec![
            EventKind::StateChanged(OperationState::Running),
            EventKind::Stdout("SMART overall-health self-assessment test result: PASSED".into()),
            EventKind::Stderr("warning: sector size 4096".into()),
            EventKind::Stdout("done".into()),
            EventKind::Completed("exit code 0".into()),
        ]
    );
    assert!(events.windows(2).all(|w| w[0].seq < w[1].seq));
    assert!(events.iter().all(|e| e.op == op.id()));

    let result = op.result().ok_or("missing result")?;
    assert_eq!(result.exit_code, 0);
    assert_eq!(result.stdout.len(), 2);
    assert_eq!(result.stderr, vec!["warning: sector size 4096"]);
    assert!(!result.timed_out);
    assert!(op.elapsed().is_some());
    Ok(())
}

#[tokio::test]
async fn nonzero_exit_fails_with_code() -> TestResult {
    init_tracing();

    let backend = ScriptedBackend::new().on("badblocks", Script::new().stderr("bad block").exit(1));
    let fs = MockFileSystem::new();
    let (ctx, mut rx) = bridged_context(backend, &fs, Duration::from_millis(100));

    let op = Operation::new(OperationSpec::single("Verification", ProcessHandle::new("badblocks")));
    op.start(&ctx);

    assert_eq!(
        with_timeout(op.wait()).await,
        OperationState::Failed(FailureReason::NonZeroExit(1))
    );
    let last = drain(&mut rx).pop().ok_or("no events")?;
    assert_eq!(last.kind, EventKind::Failed(FailureReason::NonZeroExit(1)));
    Ok(())
}

#[tokio::test]
async fn spawn_error_is_reported_not_retried() -> TestResult {
    init_tracing();

    let backend = ScriptedBackend::new().on("missing-tool", Script::new().fail_spawn("not found in PATH"));
    let fs = MockFileSystem::new();
    let (ctx, mut rx) = bridged_context(backend.clone(), &fs, Duration::from_millis(100));

    let op = Operation::new(OperationSpec::single("Lookup", ProcessHandle::new("missing-tool")));
    op.start(&ctx);

    let state = with_timeout(op.wait()).await;
    assert!(matches!(state, OperationState::Failed(FailureReason::Spawn(ref msg)) if msg.contains("not found in PATH")));
    assert_eq!(backend.started_count(), 0);
    assert!(op.result().is_none());

    let terminal = drain(&mut rx).pop().ok_or("no events")?;
    assert!(matches!(terminal.kind, EventKind::Failed(FailureReason::Spawn(_))));
    Ok(())
}

#[tokio::test]
async fn watchdog_times_out_and_stops_the_process() -> TestResult {
    init_tracing();

    let backend = ScriptedBackend::new().on("badblocks", Script::new().stdout("Checking blocks").hang());
    let fs = MockFileSystem::new();
    fs.add_file("/tmp/scan.txt", "");
    let ctx = detached_context(backend.clone(), &fs);

    let op = Operation::new(
        OperationSpec::single(
            "Verification",
            ProcessHandle::new("badblocks").timeout(Duration::from_millis(100)),
        )
        .with_scratch("/tmp/scan.txt"),
    );
    op.start(&ctx);

    assert_eq!(
        with_timeout(op.wait()).await,
        OperationState::Failed(FailureReason::Timeout)
    );
    let result = op.result().ok_or("missing result")?;
    assert!(result.timed_out);
    assert_eq!(result.exit_code, STOPPED_EXIT_CODE);
    assert_eq!(result.stdout, vec!["Checking blocks"]);
    assert_eq!(backend.stop_count(), 1);
    assert_eq!(fs.removed(), vec![std::path::PathBuf::from("/tmp/scan.txt")]);
    Ok(())
}

#[tokio::test]
async fn operation_budget_caps_every_step() -> TestResult {
    init_tracing();

    let backend = ScriptedBackend::new()
        .on("first", Script::new().pause(Duration::from_millis(50)))
        .on("second", Script::new().hang());
    let fs = MockFileSystem::new();
    let ctx = detached_context(backend.clone(), &fs);

    let op = Operation::new(
        OperationSpec::new("Chained")
            .step(ProcessHandle::new("first"))
            .step(ProcessHandle::new("second").timeout(Duration::from_secs(60)))
            .with_timeout(Duration::from_millis(200)),
    );
    op.start(&ctx);

    assert_eq!(
        with_timeout(op.wait()).await,
        OperationState::Failed(FailureReason::Timeout)
    );
    let results = op.step_results();
    assert_eq!(results.len(), 2);
    assert!(results[0].success());
    assert!(results[1].timed_out);
    Ok(())
}

#[tokio::test]
async fn repeated_cancel_has_the_effect_of_one() -> TestResult {
    init_tracing();

    let backend = ScriptedBackend::new().on("badblocks", Script::new().hang());
    let fs = MockFileSystem::new();
    let (ctx, mut rx) = bridged_context(backend.clone(), &fs, Duration::from_millis(100));

    let op = Operation::new(OperationSpec::single("Verification", ProcessHandle::new("badblocks")));
    op.start(&ctx);
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert!(op.request_cancel());
    assert!(!op.request_cancel());
    assert!(op.is_cancel_requested());

    assert_eq!(with_timeout(op.wait()).await, OperationState::Cancelled);
    assert!(!op.request_cancel());
    assert_eq!(op.state(), OperationState::Cancelled);
    assert_eq!(backend.stop_count(), 1);

    let kinds: Vec<EventKind> = drain(&mut rx).into_iter().map(|e| e.kind).collect();
    let stopping = kinds
        .iter()
        .filter(|k| **k == EventKind::StateChanged(OperationState::Stopping))
        .count();
    assert_eq!(stopping, 1);
    assert_eq!(kinds.last(), Some(&EventKind::Failed(FailureReason::Cancelled)));
    assert_eq!(kinds.iter().filter(|k| k.is_terminal()).count(), 1);
    Ok(())
}

#[tokio::test]
async fn cancel_before_start_never_spawns() -> TestResult {
    init_tracing();

    let backend = ScriptedBackend::new();
    let fs = MockFileSystem::new();
    let ctx = detached_context(backend.clone(), &fs);

    let op = Operation::new(OperationSpec::single("Mount", ProcessHandle::new("mount")));
    assert!(op.request_cancel());
    assert_eq!(op.state(), OperationState::Idle);

    op.start(&ctx);
    assert_eq!(with_timeout(op.wait()).await, OperationState::Cancelled);
    assert_eq!(backend.started_count(), 0);
    Ok(())
}

#[tokio::test]
async fn starting_twice_is_rejected() -> TestResult {
    init_tracing();

    let backend = ScriptedBackend::new();
    let fs = MockFileSystem::new();
    let ctx = detached_context(backend.clone(), &fs);

    let op = Operation::new(OperationSpec::single("Noop", ProcessHandle::new("true")));
    let handle = op.start(&ctx).ok_or("first start rejected")?;
    assert!(op.start(&ctx).is_none());

    handle.await?;
    assert_eq!(op.state(), OperationState::Completed);
    assert_eq!(backend.started_count(), 1);
    Ok(())
}

#[tokio::test]
async fn elevated_operations_share_one_grant_at_a_time() -> TestResult {
    init_tracing();

    let backend = ScriptedBackend::new()
        .on("badblocks", Script::new().hang())
        .on("smartctl", Script::new().stdout("PASSED"));
    let fs = MockFileSystem::new();
    let ctx = detached_context(backend.clone(), &fs);

    let first = Operation::new(OperationSpec::single(
        "Verification",
        ProcessHandle::new("badblocks").elevated(),
    ));
    let second = Operation::new(OperationSpec::single(
        "Health test",
        ProcessHandle::new("smartctl").elevated(),
    ));

    first.start(&ctx);
    tokio::time::sleep(Duration::from_millis(20)).await;
    second.start(&ctx);
    tokio::time::sleep(Duration::from_millis(50)).await;

    // The second prompt is queued behind the first grant.
    assert_eq!(backend.started_count(), 1);
    assert_eq!(second.state(), OperationState::Running);

    first.request_cancel();
    assert_eq!(with_timeout(first.wait()).await, OperationState::Cancelled);
    assert_eq!(with_timeout(second.wait()).await, OperationState::Completed);

    let started = backend.started();
    assert_eq!(started[0], vec!["pkexec", "badblocks"]);
    assert_eq!(started[1], vec!["pkexec", "smartctl"]);
    Ok(())
}
