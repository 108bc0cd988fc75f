// tests/real_process.rs
//
// Exercises the real tokio::process backend against standard Unix tools.
#![cfg(unix)]

use std::error::Error;
use std::time::{Duration, Instant};

use toolwarden::bridge::EventKind;
use toolwarden::errors::WardenError;
use toolwarden::exec::{ProcessBackend, ProcessHandle, RealProcessBackend};
use toolwarden::fs::mock::MockFileSystem;
use toolwarden::operation::{FailureReason, Operation, OperationSpec, OperationState};
use toolwarden_test_utils::builders::bridged_context;
use toolwarden_test_utils::init_tracing;

type TestResult = Result<(), Box<dyn Error>>;

const ESCALATE_AFTER: Duration = Duration::from_millis(500);

fn process_alive(pid: u32) -> bool {
    // Signal 0 only checks for existence.
    unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
}

#[tokio::test]
async fn sleeping_process_times_out_and_is_gone_afterwards() -> TestResult {
    init_tracing();
    let fs = MockFileSystem::new();
    let (ctx, _rx) = bridged_context(RealProcessBackend::new(), &fs, ESCALATE_AFTER);

    let op = Operation::new(OperationSpec::single(
        "Sleep",
        ProcessHandle::new("sleep")
            .arg("10")
            .timeout(Duration::from_secs(2)),
    ));

    let started = Instant::now();
    op.start(&ctx);
    let state = tokio::time::timeout(Duration::from_secs(6), op.wait()).await?;
    let elapsed = started.elapsed();

    assert_eq!(state, OperationState::Failed(FailureReason::Timeout));
    assert!(elapsed >= Duration::from_millis(1900), "finished too early: {elapsed:?}");
    assert!(
        elapsed < Duration::from_secs(2) + ESCALATE_AFTER + Duration::from_millis(500),
        "finished too late: {elapsed:?}"
    );

    let pid = op.pid().ok_or("no pid recorded")?;
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(!process_alive(pid), "process {pid} still running");
    Ok(())
}

#[tokio::test]
async fn output_and_exit_code_are_captured() -> TestResult {
    init_tracing();
    let fs = MockFileSystem::new();
    let (ctx, mut rx) = bridged_context(RealProcessBackend::new(), &fs, ESCALATE_AFTER);

    let op = Operation::new(OperationSpec::single(
        "Shell",
        ProcessHandle::new("sh").args(["-c", "echo one; echo two; echo oops >&2; exit 3"]),
    ));
    op.start(&ctx);

    let state = tokio::time::timeout(Duration::from_secs(5), op.wait()).await?;
    assert_eq!(state, OperationState::Failed(FailureReason::NonZeroExit(3)));

    let result = op.result().ok_or("missing result")?;
    assert_eq!(result.stdout, vec!["one", "two"]);
    assert_eq!(result.stderr, vec!["oops"]);
    assert_eq!(result.exit_code, 3);

    let mut stdout_events = Vec::new();
    while let Some(event) = rx.try_recv() {
        if let EventKind::Stdout(line) = event.kind {
            stdout_events.push(line);
        }
    }
    assert_eq!(stdout_events, vec!["one", "two"]);
    Ok(())
}

#[tokio::test]
async fn background_descendant_holding_pipes_does_not_delay_completion() -> TestResult {
    init_tracing();
    let fs = MockFileSystem::new();
    let (ctx, _rx) = bridged_context(RealProcessBackend::new(), &fs, ESCALATE_AFTER);

    let script = "sleep 4 & echo hi; exit 0";
    let untimed = Operation::new(OperationSpec::single(
        "Detached child",
        ProcessHandle::new("sh").args(["-c", script]),
    ));
    let timed = Operation::new(OperationSpec::single(
        "Detached child",
        ProcessHandle::new("sh")
            .args(["-c", script])
            .timeout(Duration::from_secs(1)),
    ));

    let started = Instant::now();
    untimed.start(&ctx);
    timed.start(&ctx);

    let untimed_state = tokio::time::timeout(Duration::from_secs(6), untimed.wait()).await?;
    let timed_state = tokio::time::timeout(Duration::from_secs(6), timed.wait()).await?;

    assert_eq!(untimed_state, OperationState::Completed);
    assert_eq!(timed_state, OperationState::Completed);
    assert!(started.elapsed() < Duration::from_secs(2), "waited for the descendant: {:?}", started.elapsed());

    for op in [&untimed, &timed] {
        let result = op.result().ok_or("missing result")?;
        assert_eq!(result.exit_code, 0);
        assert!(!result.timed_out);
        assert_eq!(result.stdout, vec!["hi"]);
    }
    Ok(())
}

#[tokio::test]
async fn ignored_terminate_escalates_to_kill() -> TestResult {
    init_tracing();
    let fs = MockFileSystem::new();
    let (ctx, _rx) = bridged_context(RealProcessBackend::new(), &fs, ESCALATE_AFTER);

    let op = Operation::new(OperationSpec::single(
        "Stubborn",
        ProcessHandle::new("sh").args(["-c", "trap '' TERM; exec sleep 30"]),
    ));
    op.start(&ctx);
    tokio::time::sleep(Duration::from_millis(200)).await;

    let cancelled_at = Instant::now();
    op.request_cancel();
    let state = tokio::time::timeout(Duration::from_secs(5), op.wait()).await?;

    assert_eq!(state, OperationState::Cancelled);
    assert!(cancelled_at.elapsed() >= ESCALATE_AFTER);
    // 128 + SIGKILL
    assert_eq!(op.result().ok_or("missing result")?.exit_code, 137);
    Ok(())
}

#[tokio::test]
async fn missing_executable_and_bad_cwd_fail_before_spawning() {
    init_tracing();
    let backend = RealProcessBackend::new();

    let err = backend
        .start(&ProcessHandle::new("definitely-not-a-real-tool-xyz"))
        .err()
        .expect("spawn should fail");
    assert!(matches!(err, WardenError::Spawn { .. }));

    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("plain.txt");
    std::fs::write(&file, "not a directory").unwrap();

    let err = backend
        .start(&ProcessHandle::new("true").cwd(&file))
        .err()
        .expect("spawn should fail");
    assert!(err.to_string().contains("is not a directory"));

    let err = backend
        .start(&ProcessHandle::new("/no/such/dir/tool"))
        .err()
        .expect("spawn should fail");
    assert!(matches!(err, WardenError::Spawn { .. }));
}

#[tokio::test]
async fn working_directory_and_environment_are_applied() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let fs = MockFileSystem::new();
    let (ctx, _rx) = bridged_context(RealProcessBackend::new(), &fs, ESCALATE_AFTER);

    let op = Operation::new(OperationSpec::single(
        "Env",
        ProcessHandle::new("sh")
            .args(["-c", "pwd; echo \"$TOOLWARDEN_MARKER\""])
            .cwd(dir.path())
            .env("TOOLWARDEN_MARKER", "hello"),
    ));
    op.start(&ctx);

    let state = tokio::time::timeout(Duration::from_secs(5), op.wait()).await?;
    assert_eq!(state, OperationState::Completed);

    let result = op.result().ok_or("missing result")?;
    let expected_dir = dir.path().canonicalize()?;
    assert_eq!(std::path::PathBuf::from(&result.stdout[0]).canonicalize()?, expected_dir);
    assert_eq!(result.stdout[1], "hello");
    Ok(())
}
