// tests/fallback_chain.rs

use std::error::Error;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use toolwarden::bridge::{BridgeReceiver, EventKind};
use toolwarden::exec::{ProcessHandle, ProcessResult};
use toolwarden::fallback::{ChainError, DEADLINE_EXCEEDED, FallbackChain, Strategy};
use toolwarden::fs::mock::MockFileSystem;
use toolwarden::operation::{Cancellable, FailureReason, OperationSpec, OperationState};
use toolwarden_test_utils::builders::{bridged_context, detached_context};
use toolwarden_test_utils::{Script, ScriptedBackend, init_tracing, with_timeout};

type TestResult = Result<(), Box<dyn Error>>;

fn spec(program: &'static str) -> impl Fn() -> OperationSpec + Send + Sync + 'static {
    move || OperationSpec::single(program, ProcessHandle::new(program))
}

fn parse_number(result: &ProcessResult) -> Result<u32, String> {
    result
        .stdout_text()
        .trim()
        .parse()
        .map_err(|e| format!("not a number: {e}"))
}

#[tokio::test]
async fn first_success_wins_and_later_strategies_never_run() -> TestResult {
    init_tracing();

    let backend = ScriptedBackend::new()
        .on("alpha", Script::new().stderr("no such service").exit(1))
        .on("beta", Script::new().stdout("42"));
    let fs = MockFileSystem::new();
    let ctx = detached_context(backend.clone(), &fs);

    let c_calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&c_calls);
    let chain = FallbackChain::new()
        .strategy(Strategy::new("A", spec("alpha"), parse_number))
        .strategy(Strategy::new("B", spec("beta"), parse_number))
        .strategy(Strategy::new(
            "C",
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
                OperationSpec::single("gamma", ProcessHandle::new("gamma"))
            },
            parse_number,
        ));

    let (name, value) = with_timeout(chain.run(
        &ctx,
        Duration::from_secs(1),
        &CancellationToken::new(),
    ))
    .await?;

    assert_eq!(name, "B");
    assert_eq!(value, 42);
    assert_eq!(c_calls.load(Ordering::SeqCst), 0);
    assert_eq!(backend.started(), vec![vec!["alpha"], vec!["beta"]]);
    Ok(())
}

#[tokio::test]
async fn every_failure_is_reported_in_strategy_order() -> TestResult {
    init_tracing();

    let backend = ScriptedBackend::new()
        .on("alpha", Script::new().exit(1))
        .on("beta", Script::new().hang())
        .on("gamma", Script::new().stdout("not-a-number"));
    let fs = MockFileSystem::new();
    let ctx = detached_context(backend.clone(), &fs);

    let chain = FallbackChain::new()
        .strategy(Strategy::new("A", spec("alpha"), parse_number))
        .strategy(Strategy::new("B", spec("beta"), parse_number).with_timeout(Duration::from_millis(50)))
        .strategy(Strategy::new("C", spec("gamma"), parse_number));

    let err = with_timeout(chain.run(&ctx, Duration::from_secs(1), &CancellationToken::new()))
        .await
        .unwrap_err();

    let ChainError::NoStrategySucceeded(failures) = err else {
        return Err("expected NoStrategySucceeded".into());
    };
    assert_eq!(failures.len(), chain.len());
    let names: Vec<&str> = failures.iter().map(|f| f.strategy.as_str()).collect();
    assert_eq!(names, vec!["A", "B", "C"]);
    assert_eq!(failures[0].reason, "exited with code 1");
    assert_eq!(failures[1].reason, "timed out");
    assert!(failures[2].reason.starts_with("not a number"));
    Ok(())
}

#[tokio::test]
async fn chain_deadline_skips_the_remaining_strategies() -> TestResult {
    init_tracing();

    let backend = ScriptedBackend::new().on("alpha", Script::new().hang());
    let fs = MockFileSystem::new();
    let ctx = detached_context(backend.clone(), &fs);

    let chain = FallbackChain::new()
        .strategy(Strategy::new("A", spec("alpha"), parse_number))
        .strategy(Strategy::new("B", spec("beta"), parse_number))
        .with_deadline(Duration::from_millis(150));

    let started = tokio::time::Instant::now();
    let err = with_timeout(chain.run(&ctx, Duration::from_secs(10), &CancellationToken::new()))
        .await
        .unwrap_err();

    assert!(started.elapsed() < Duration::from_secs(2));
    let ChainError::NoStrategySucceeded(failures) = err else {
        return Err("expected NoStrategySucceeded".into());
    };
    assert_eq!(failures.len(), 2);
    assert_eq!(failures[0].reason, "timed out");
    assert_eq!(failures[1].reason, DEADLINE_EXCEEDED);
    assert_eq!(backend.started_count(), 1);
    Ok(())
}

#[tokio::test]
async fn cancelling_the_chain_stops_the_current_strategy() -> TestResult {
    init_tracing();

    let backend = ScriptedBackend::new().on("alpha", Script::new().hang());
    let fs = MockFileSystem::new();
    let ctx = detached_context(backend.clone(), &fs);

    let chain = FallbackChain::new()
        .strategy(Strategy::new("A", spec("alpha"), parse_number))
        .strategy(Strategy::new("B", spec("beta"), parse_number));

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let err = with_timeout(chain.run(&ctx, Duration::from_secs(10), &cancel))
        .await
        .unwrap_err();

    assert_eq!(err, ChainError::Cancelled);
    assert_eq!(backend.stop_count(), 1);
    assert_eq!(backend.started_count(), 1);
    Ok(())
}

fn event_kinds(rx: &mut BridgeReceiver) -> Vec<EventKind> {
    std::iter::from_fn(|| rx.try_recv()).map(|event| event.kind).collect()
}

#[tokio::test]
async fn cancelling_a_spawned_chain_reports_stopping_then_cancelled() -> TestResult {
    init_tracing();

    let backend = ScriptedBackend::new().on("alpha", Script::new().hang());
    let fs = MockFileSystem::new();
    let (ctx, mut rx) = bridged_context(backend.clone(), &fs, Duration::from_millis(100));

    let run = FallbackChain::new()
        .strategy(Strategy::new("A", spec("alpha"), parse_number))
        .spawn("Lookup", &ctx, Duration::from_secs(10), |name: &str, value: &u32| {
            format!("{value} via {name}")
        });

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(run.request_cancel());
    assert!(!run.request_cancel());
    with_timeout(run.join()).await;

    assert_eq!(run.state(), OperationState::Cancelled);
    assert_eq!(
        event_kinds(&mut rx),
        vec![
            EventKind::StateChanged(OperationState::Running),
            EventKind::StateChanged(OperationState::Stopping),
            EventKind::Failed(FailureReason::Cancelled),
        ]
    );
    assert_eq!(backend.stop_count(), 1);
    Ok(())
}

// The validator blocks its worker thread, so the cancel lands after the
// strategy already succeeded.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancel_during_validation_still_reports_cancelled() -> TestResult {
    init_tracing();

    let backend = ScriptedBackend::new().on("alpha", Script::new().stdout("7"));
    let fs = MockFileSystem::new();
    let (ctx, mut rx) = bridged_context(backend, &fs, Duration::from_millis(100));

    let slow_parse = |result: &ProcessResult| {
        std::thread::sleep(Duration::from_millis(300));
        parse_number(result)
    };
    let run = FallbackChain::new()
        .strategy(Strategy::new("A", spec("alpha"), slow_parse))
        .spawn("Lookup", &ctx, Duration::from_secs(10), |name: &str, value: &u32| {
            format!("{value} via {name}")
        });

    tokio::time::sleep(Duration::from_millis(100)).await;
    run.request_cancel();
    with_timeout(run.join()).await;

    assert_eq!(run.state(), OperationState::Cancelled);
    let kinds = event_kinds(&mut rx);
    assert_eq!(kinds.last(), Some(&EventKind::Failed(FailureReason::Cancelled)));
    assert!(!kinds.iter().any(|kind| matches!(kind, EventKind::Completed(_))));
    Ok(())
}

#[tokio::test]
async fn spawned_chain_reports_the_rendered_winner() -> TestResult {
    init_tracing();

    let backend = ScriptedBackend::new().on("beta", Script::new().stdout("42"));
    let fs = MockFileSystem::new();
    let (ctx, mut rx) = bridged_context(backend, &fs, Duration::from_millis(100));

    let run = FallbackChain::new()
        .strategy(Strategy::new("A", spec("alpha"), parse_number))
        .strategy(Strategy::new("B", spec("beta"), parse_number))
        .spawn("Lookup", &ctx, Duration::from_secs(1), |name: &str, value: &u32| {
            format!("{value} via {name}")
        });
    with_timeout(run.join()).await;

    assert_eq!(run.state(), OperationState::Completed);
    assert_eq!(
        event_kinds(&mut rx).last(),
        Some(&EventKind::Completed("42 via B".into()))
    );
    // A cancel after the terminal state changes nothing.
    run.request_cancel();
    assert_eq!(run.state(), OperationState::Completed);
    assert!(rx.try_recv().is_none());
    Ok(())
}
