// src/operation/state.rs

//! Pure Operation state machine.
//!
//! No Tokio, no processes, no locks: `OperationState::apply` takes a
//! [`Transition`] and returns the next state or a [`RejectedTransition`].
//! The async driver holds the state behind a mutex and calls into this.
//!
//! ```text
//! Idle --Start--> Running --RequestCancel--> Stopping
//!                    |                          |
//!                    +---------Finish-----------+--> Completed | Failed | Cancelled
//! ```

use std::fmt;

use thiserror::Error;

/// One fallback strategy's failure, kept in strategy order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrategyFailure {
    pub strategy: String,
    pub reason: String,
}

impl fmt::Display for StrategyFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.strategy, self.reason)
    }
}

/// Why an Operation (or fallback chain) did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FailureReason {
    #[error("could not start: {0}")]
    Spawn(String),

    #[error("timed out")]
    Timeout,

    #[error("exited with code {0}")]
    NonZeroExit(i32),

    #[error("cancelled")]
    Cancelled,

    #[error("no strategy succeeded ({})", join_failures(.0))]
    NoStrategySucceeded(Vec<StrategyFailure>),

    #[error("supervision error: {0}")]
    Supervision(String),
}

fn join_failures(failures: &[StrategyFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationState {
    Idle,
    Running,
    Stopping,
    Completed,
    Failed(FailureReason),
    Cancelled,
}

impl OperationState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OperationState::Completed | OperationState::Failed(_) | OperationState::Cancelled
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            OperationState::Idle => "idle",
            OperationState::Running => "running",
            OperationState::Stopping => "stopping",
            OperationState::Completed => "completed",
            OperationState::Failed(_) => "failed",
            OperationState::Cancelled => "cancelled",
        }
    }

    /// Compute the next state.
    pub fn apply(&self, transition: Transition) -> Result<OperationState, RejectedTransition> {
        use OperationState::*;

        let next = match (self, &transition) {
            (Idle, Transition::Start) => Some(Running),
            (Running | Stopping, Transition::RequestCancel) => Some(Stopping),
            (
                Running | Stopping,
                Transition::Finish {
                    outcome,
                    cancel_requested,
                },
            ) => Some(resolve_finish(outcome, *cancel_requested)),
            _ => None,
        };

        next.ok_or_else(|| RejectedTransition {
            from: self.clone(),
            transition: transition.name(),
        })
    }
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationState::Failed(reason) => write!(f, "failed ({reason})"),
            other => f.write_str(other.name()),
        }
    }
}

/// A caller-initiated cancel wins over whatever the process did.
fn resolve_finish(outcome: &Result<(), FailureReason>, cancel_requested: bool) -> OperationState {
    if cancel_requested {
        return OperationState::Cancelled;
    }
    match outcome {
        Ok(()) => OperationState::Completed,
        Err(FailureReason::Cancelled) => OperationState::Cancelled,
        Err(reason) => OperationState::Failed(reason.clone()),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Start,
    RequestCancel,
    Finish {
        outcome: Result<(), FailureReason>,
        cancel_requested: bool,
    },
}

impl Transition {
    pub fn name(&self) -> &'static str {
        match self {
            Transition::Start => "start",
            Transition::RequestCancel => "request_cancel",
            Transition::Finish { .. } => "finish",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("transition '{transition}' rejected in state {from}")]
pub struct RejectedTransition {
    pub from: OperationState,
    pub transition: &'static str,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finish(outcome: Result<(), FailureReason>, cancel_requested: bool) -> Transition {
        Transition::Finish {
            outcome,
            cancel_requested,
        }
    }

    #[test]
    fn happy_path_reaches_completed() {
        let running = OperationState::Idle.apply(Transition::Start).unwrap();
        assert_eq!(running, OperationState::Running);
        let done = running.apply(finish(Ok(()), false)).unwrap();
        assert_eq!(done, OperationState::Completed);
    }

    #[test]
    fn nonzero_exit_fails_with_reason() {
        let state = OperationState::Running
            .apply(finish(Err(FailureReason::NonZeroExit(2)), false))
            .unwrap();
        assert_eq!(state, OperationState::Failed(FailureReason::NonZeroExit(2)));
    }

    #[test]
    fn cancel_takes_precedence_over_failure() {
        let stopping = OperationState::Running.apply(Transition::RequestCancel).unwrap();
        assert_eq!(stopping, OperationState::Stopping);

        let state = stopping
            .apply(finish(Err(FailureReason::NonZeroExit(143)), true))
            .unwrap();
        assert_eq!(state, OperationState::Cancelled);
    }

    #[test]
    fn repeated_cancel_stays_stopping() {
        let state = OperationState::Stopping.apply(Transition::RequestCancel).unwrap();
        assert_eq!(state, OperationState::Stopping);
    }

    #[test]
    fn terminal_states_are_sticky() {
        for terminal in [
            OperationState::Completed,
            OperationState::Cancelled,
            OperationState::Failed(FailureReason::Timeout),
        ] {
            assert!(terminal.apply(Transition::Start).is_err());
            assert!(terminal.apply(Transition::RequestCancel).is_err());
            assert!(terminal.apply(finish(Ok(()), false)).is_err());
        }
    }

    #[test]
    fn idle_cannot_be_cancelled_or_finished() {
        let err = OperationState::Idle.apply(Transition::RequestCancel).unwrap_err();
        assert_eq!(err.transition, "request_cancel");
        assert!(OperationState::Idle.apply(finish(Ok(()), false)).is_err());
    }

    #[test]
    fn no_strategy_succeeded_lists_reasons_in_order() {
        let reason = FailureReason::NoStrategySucceeded(vec![
            StrategyFailure {
                strategy: "a".into(),
                reason: "timed out".into(),
            },
            StrategyFailure {
                strategy: "b".into(),
                reason: "exited with code 1".into(),
            },
        ]);
        assert_eq!(
            reason.to_string(),
            "no strategy succeeded (a: timed out; b: exited with code 1)"
        );
    }
}
