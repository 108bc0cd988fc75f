// src/fallback/mod.rs

//! Ordered fallback over independent strategies.
//!
//! A [`FallbackChain`] runs its [`Strategy`]s strictly one after another,
//! each as its own [`Operation`] with its own timeout, and stops at the first
//! one whose result passes its validator. Strategy Operations run on a
//! detached context: their output never reaches the transcript; only the
//! chain's final outcome does.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bridge::{Emitter, EventKind};
use crate::exec::{ExecContext, ProcessResult};
use crate::operation::driver::remaining;
use crate::operation::{
    Cancellable, FailureReason, Operation, OperationSpec, OperationState, StrategyFailure,
    Transition,
};
use crate::types::OperationId;

pub const DEADLINE_EXCEEDED: &str = "chain deadline exceeded";

type Producer = Box<dyn Fn() -> OperationSpec + Send + Sync>;
type Validator<T> = Box<dyn Fn(&ProcessResult) -> Result<T, String> + Send + Sync>;

/// One candidate technique: build an Operation, then judge its result.
pub struct Strategy<T> {
    name: String,
    producer: Producer,
    validator: Validator<T>,
    timeout: Option<Duration>,
}

impl<T> fmt::Debug for Strategy<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Strategy")
            .field("name", &self.name)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl<T> Strategy<T> {
    pub fn new<P, V>(name: impl Into<String>, producer: P, validator: V) -> Self
    where
        P: Fn() -> OperationSpec + Send + Sync + 'static,
        V: Fn(&ProcessResult) -> Result<T, String> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            producer: Box::new(producer),
            validator: Box::new(validator),
            timeout: None,
        }
    }

    /// Override the chain's per-strategy timeout for this strategy.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainError {
    /// One failure per strategy, in registration order.
    #[error("{}", FailureReason::NoStrategySucceeded(.0.clone()))]
    NoStrategySucceeded(Vec<StrategyFailure>),

    #[error("cancelled")]
    Cancelled,
}

impl From<ChainError> for FailureReason {
    fn from(err: ChainError) -> Self {
        match err {
            ChainError::NoStrategySucceeded(failures) => FailureReason::NoStrategySucceeded(failures),
            ChainError::Cancelled => FailureReason::Cancelled,
        }
    }
}

#[derive(Debug)]
pub struct FallbackChain<T> {
    strategies: Vec<Strategy<T>>,
    deadline: Option<Duration>,
}

impl<T> Default for FallbackChain<T> {
    fn default() -> Self {
        Self {
            strategies: Vec::new(),
            deadline: None,
        }
    }
}

impl<T> FallbackChain<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn strategy(mut self, strategy: Strategy<T>) -> Self {
        self.strategies.push(strategy);
        self
    }

    /// Bound the whole chain's wall-clock time.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    /// Run strategies in order until one succeeds.
    ///
    /// Returns the winning strategy's name and its validated value, or every
    /// strategy's failure reason in order. Cancelling `cancel` stops the
    /// current strategy's Operation and returns [`ChainError::Cancelled`].
    pub async fn run(
        &self,
        ctx: &ExecContext,
        per_strategy_timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<(String, T), ChainError> {
        let ctx = ctx.detached();
        let deadline = self.deadline.map(|budget| Instant::now() + budget);
        let mut failures = Vec::with_capacity(self.strategies.len());

        for strategy in &self.strategies {
            if cancel.is_cancelled() {
                return Err(ChainError::Cancelled);
            }

            let mut budget = strategy.timeout.unwrap_or(per_strategy_timeout);
            if let Some(deadline) = deadline {
                match remaining(deadline) {
                    Some(left) => budget = budget.min(left),
                    None => {
                        debug!(strategy = %strategy.name, "skipping strategy past chain deadline");
                        failures.push(StrategyFailure {
                            strategy: strategy.name.clone(),
                            reason: DEADLINE_EXCEEDED.to_string(),
                        });
                        continue;
                    }
                }
            }

            let op = Operation::new((strategy.producer)().with_timeout(budget));
            debug!(strategy = %strategy.name, op = %op.id(), budget_ms = budget.as_millis() as u64, "trying strategy");
            let _ = op.start(&ctx);

            let state = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    op.request_cancel();
                    op.wait().await;
                    debug!(strategy = %strategy.name, "chain cancelled");
                    return Err(ChainError::Cancelled);
                }
                state = op.wait() => state,
            };

            let reason = match state {
                OperationState::Completed => match op.result() {
                    Some(result) => match (strategy.validator)(&result) {
                        Ok(value) => {
                            info!(strategy = %strategy.name, "strategy succeeded");
                            return Ok((strategy.name.clone(), value));
                        }
                        Err(rejected) => rejected,
                    },
                    None => "no result".to_string(),
                },
                OperationState::Failed(reason) => reason.to_string(),
                other => other.to_string(),
            };

            debug!(strategy = %strategy.name, %reason, "strategy failed");
            failures.push(StrategyFailure {
                strategy: strategy.name.clone(),
                reason,
            });
        }

        Err(ChainError::NoStrategySucceeded(failures))
    }
}

impl<T: Send + 'static> FallbackChain<T> {
    /// Run the chain on its own task, reporting through the context's bridge
    /// as a single pseudo-Operation: `Completed(render(name, value))` or
    /// `Failed(reason)`. The terminal event follows the state the run ended
    /// in, so a cancel that lands after the last strategy succeeded still
    /// reports as cancelled.
    pub fn spawn<R>(
        self,
        label: impl Into<String>,
        ctx: &ExecContext,
        per_strategy_timeout: Duration,
        render: R,
    ) -> ChainRun
    where
        R: FnOnce(&str, &T) -> String + Send + 'static,
    {
        let run = ChainRun::new(label.into(), ctx);
        run.emitter
            .emit(EventKind::StateChanged(OperationState::Running));

        let ctx = ctx.clone();
        let handle = run.clone();
        let task = tokio::spawn(async move {
            let (outcome, summary) = match self.run(&ctx, per_strategy_timeout, &handle.cancel).await {
                Ok((name, value)) => (Ok(()), render(&name, &value)),
                Err(err) => (Err(FailureReason::from(err)), String::new()),
            };

            let Some(state) = handle.finish(outcome) else {
                return;
            };
            info!(op = %handle.id, label = %handle.label, %state, "chain finished");
            let kind = match state {
                OperationState::Completed => EventKind::Completed(summary),
                OperationState::Cancelled => EventKind::Failed(FailureReason::Cancelled),
                OperationState::Failed(reason) => EventKind::Failed(reason),
                other => EventKind::Failed(FailureReason::Supervision(format!(
                    "chain finished in non-terminal state {other}"
                ))),
            };
            handle.emitter.emit(kind);
        });
        *run.task.lock().unwrap_or_else(|e| e.into_inner()) = Some(task);
        run
    }
}

/// Handle to a chain running on its own task.
#[derive(Debug, Clone)]
pub struct ChainRun {
    id: OperationId,
    label: String,
    cancel: CancellationToken,
    emitter: Emitter,
    state: Arc<Mutex<OperationState>>,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl ChainRun {
    fn new(label: String, ctx: &ExecContext) -> Self {
        let id = OperationId::next();
        Self {
            id,
            label,
            cancel: CancellationToken::new(),
            emitter: ctx.emitter(id),
            state: Arc::new(Mutex::new(OperationState::Running)),
            task: Arc::new(Mutex::new(None)),
        }
    }

    pub fn id(&self) -> OperationId {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn state(&self) -> OperationState {
        self.lock_state().clone()
    }

    /// Wait for the chain's task to end.
    pub async fn join(&self) {
        let task = self.task.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(op = %self.id, error = %e, "chain task ended abnormally");
            }
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, OperationState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Returns the terminal state, or `None` if the run already terminated.
    fn finish(&self, outcome: Result<(), FailureReason>) -> Option<OperationState> {
        let mut state = self.lock_state();
        // Read under the lock: `request_cancel` sets the flag before it
        // takes the lock.
        let transition = Transition::Finish {
            outcome,
            cancel_requested: self.cancel.is_cancelled(),
        };
        match state.apply(transition) {
            Ok(next) => {
                *state = next.clone();
                Some(next)
            }
            Err(rejected) => {
                warn!(op = %self.id, %rejected, "chain finish rejected");
                None
            }
        }
    }
}

impl Cancellable for ChainRun {
    fn request_cancel(&self) -> bool {
        let first = !self.cancel.is_cancelled();
        self.cancel.cancel();

        let mut state = self.lock_state();
        match state.apply(Transition::RequestCancel) {
            Ok(next) if next != *state => {
                *state = next;
                self.emitter
                    .emit(EventKind::StateChanged(OperationState::Stopping));
                debug!(op = %self.id, "chain cancel requested; stopping");
            }
            Ok(_) => debug!(op = %self.id, "chain cancel already in progress"),
            Err(rejected) => debug!(op = %self.id, %rejected, "chain cancel ignored"),
        }
        first
    }

    fn state_name(&self) -> String {
        self.state().name().to_string()
    }
}
