// src/operation/driver.rs

//! Worker task that drives one Operation to its terminal state.
//!
//! For each step:
//!
//! - start the process through the context's backend (elevated steps wrapped
//!   through the session's single [`ElevationGrant`]);
//! - stream its lines into Events until both streams end or the process
//!   has exited;
//! - wait for exit;
//!
//! while racing every await against the cancel token and the watchdog. On
//! either interruption the process is stopped with terminate/kill escalation.
//! Terminal cleanup (scratch removal, terminal Event, done signal) runs on
//! every exit path.

use std::time::Duration;

use tokio::time::{Instant, sleep_until};
use tracing::{debug, info, trace, warn};

use crate::bridge::{Emitter, EventKind};
use crate::exec::{ElevationGrant, ExecContext, ProcessHandle, ProcessResult};
use crate::types::StreamKind;

use super::{FailureReason, Operation, OperationState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Interrupt {
    Cancelled,
    TimedOut,
}

pub(crate) async fn drive(op: Operation, ctx: ExecContext) {
    let emitter = op.emitter();
    let outcome = run_steps(&op, &ctx, &emitter).await;
    finish(&op, &ctx, &emitter, outcome);
}

async fn run_steps(
    op: &Operation,
    ctx: &ExecContext,
    emitter: &Emitter,
) -> Result<(), FailureReason> {
    let spec = op.spec();
    if spec.steps.is_empty() {
        return Err(FailureReason::Supervision("operation has no steps".into()));
    }

    let op_deadline = spec.timeout.map(|budget| Instant::now() + budget);
    let cancel = op.cancel_token().clone();
    let mut grant: Option<ElevationGrant> = None;

    for (index, step) in spec.steps.iter().enumerate() {
        if cancel.is_cancelled() {
            debug!(op = %op.id(), step = index, "cancelled before step start");
            return Err(FailureReason::Cancelled);
        }

        let handle = if step.elevate {
            if grant.is_none() {
                let acquired = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(FailureReason::Cancelled),
                    res = ctx.elevation.acquire() => res,
                };
                grant = Some(acquired.map_err(|e| FailureReason::Supervision(e.to_string()))?);
            }
            match &grant {
                Some(grant) => grant.wrap(step),
                None => step.clone(),
            }
        } else {
            step.clone()
        };

        let step_deadline = step
            .timeout
            .or(ctx.default_timeout)
            .map(|budget| Instant::now() + budget);
        let deadline = earliest(step_deadline, op_deadline);

        run_step(op, ctx, emitter, index, &handle, deadline).await?;
    }

    Ok(())
}

async fn run_step(
    op: &Operation,
    ctx: &ExecContext,
    emitter: &Emitter,
    index: usize,
    handle: &ProcessHandle,
    deadline: Option<Instant>,
) -> Result<(), FailureReason> {
    let mut process = ctx.backend.start(handle).map_err(|e| {
        warn!(op = %op.id(), program = %handle.program(), error = %e, "spawn failed");
        FailureReason::Spawn(e.to_string())
    })?;
    op.record_pid(process.pid());

    debug!(
        op = %op.id(),
        step = index,
        pid = ?process.pid(),
        cmd = %handle.display(),
        "step started"
    );

    let started = Instant::now();
    let cancel = op.cancel_token().clone();
    let watchdog = watchdog(deadline);
    tokio::pin!(watchdog);

    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let mut interrupt = None;

    // Phase 1: stream output until both pipes are closed or the child exited.
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                interrupt = Some(Interrupt::Cancelled);
                break;
            }
            _ = &mut watchdog => {
                interrupt = Some(Interrupt::TimedOut);
                break;
            }
            line = process.next_line() => match line {
                Some(line) => {
                    trace!(op = %op.id(), stream = %line.stream, line = %line.line, "output");
                    match line.stream {
                        StreamKind::Stdout => {
                            emitter.emit(EventKind::Stdout(line.line.clone()));
                            stdout.push(line.line);
                        }
                        StreamKind::Stderr => {
                            emitter.emit(EventKind::Stderr(line.line.clone()));
                            stderr.push(line.line);
                        }
                    }
                }
                None => break,
            }
        }
    }

    // The watchdog only counts before natural exit.
    if interrupt == Some(Interrupt::TimedOut) && process.exit_status().is_some() {
        debug!(op = %op.id(), step = index, "deadline passed after exit; keeping natural outcome");
        interrupt = None;
    }

    // Phase 2: wait for the exit status.
    let mut exit_code = process.exit_status();
    if interrupt.is_none() && exit_code.is_none() {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => interrupt = Some(Interrupt::Cancelled),
            _ = &mut watchdog => interrupt = Some(Interrupt::TimedOut),
            code = process.wait() => match code {
                Ok(code) => exit_code = Some(code),
                Err(e) => {
                    warn!(op = %op.id(), error = %e, "waiting for process failed");
                    let _ = process.stop(ctx.escalate_after).await;
                    return Err(FailureReason::Supervision(e.to_string()));
                }
            },
        }
    }

    if let Some(interrupt) = interrupt {
        debug!(op = %op.id(), step = index, ?interrupt, "stopping process");
        exit_code = process.stop(ctx.escalate_after).await;
    }

    let exit_code = exit_code.unwrap_or(-1);
    let result = ProcessResult {
        exit_code,
        stdout,
        stderr,
        duration: started.elapsed(),
        timed_out: interrupt == Some(Interrupt::TimedOut),
    };
    debug!(
        op = %op.id(),
        step = index,
        exit_code,
        duration_ms = result.duration.as_millis() as u64,
        timed_out = result.timed_out,
        "step finished"
    );
    op.push_result(result);

    match interrupt {
        Some(Interrupt::Cancelled) => Err(FailureReason::Cancelled),
        Some(Interrupt::TimedOut) => Err(FailureReason::Timeout),
        None if exit_code == 0 => Ok(()),
        None => Err(FailureReason::NonZeroExit(exit_code)),
    }
}

/// Terminal bookkeeping: state, scratch cleanup, terminal Event, done signal.
fn finish(
    op: &Operation,
    ctx: &ExecContext,
    emitter: &Emitter,
    outcome: Result<(), FailureReason>,
) {
    let terminal = op.finish(outcome);

    for path in &op.spec().scratch {
        match ctx.fs.remove_file(path) {
            Ok(()) => debug!(op = %op.id(), path = %path.display(), "scratch removed"),
            Err(e) => warn!(op = %op.id(), path = %path.display(), error = %e, "scratch cleanup failed"),
        }
    }

    if let Some(state) = terminal {
        let elapsed_ms = op.elapsed().map(|d| d.as_millis() as u64).unwrap_or(0);
        info!(op = %op.id(), label = %op.label(), state = %state, elapsed_ms, "operation finished");

        let kind = match state {
            OperationState::Completed => EventKind::Completed(completion_summary(op)),
            OperationState::Cancelled => EventKind::Failed(FailureReason::Cancelled),
            OperationState::Failed(reason) => EventKind::Failed(reason),
            other => EventKind::Failed(FailureReason::Supervision(format!(
                "finished in non-terminal state {other}"
            ))),
        };
        emitter.emit(kind);
    }

    op.mark_done();
}

fn completion_summary(op: &Operation) -> String {
    let results = op.step_results();
    let code = results.last().map(|r| r.exit_code).unwrap_or(0);
    match results.len() {
        0 | 1 => format!("exit code {code}"),
        n => format!("{n} steps, exit code {code}"),
    }
}

fn earliest(a: Option<Instant>, b: Option<Instant>) -> Option<Instant> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

async fn watchdog(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}

/// Budget left before `deadline`, or `None` if it has passed.
pub(crate) fn remaining(deadline: Instant) -> Option<Duration> {
    deadline.checked_duration_since(Instant::now()).filter(|d| !d.is_zero())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn earliest_prefers_the_sooner_deadline() {
        let now = Instant::now();
        let soon = now + Duration::from_secs(1);
        let late = now + Duration::from_secs(5);

        assert_eq!(earliest(Some(soon), Some(late)), Some(soon));
        assert_eq!(earliest(None, Some(late)), Some(late));
        assert_eq!(earliest(Some(soon), None), Some(soon));
        assert_eq!(earliest(None, None), None);
    }

    #[tokio::test]
    async fn remaining_is_none_once_the_deadline_passed() {
        let past = Instant::now() - Duration::from_millis(1);
        assert_eq!(remaining(past), None);
        assert!(remaining(Instant::now() + Duration::from_secs(10)).is_some());
    }
}
