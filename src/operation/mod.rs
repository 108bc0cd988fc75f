// src/operation/mod.rs

//! Supervised execution units.
//!
//! An [`Operation`] wraps one or more process runs (steps) behind a
//! cancellable state machine. The pure transition rules live in [`state`];
//! the async worker that runs steps, enforces the watchdog and performs
//! terminal cleanup lives in [`driver`].

pub mod driver;
pub mod state;

use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::bridge::{Emitter, EventKind};
use crate::exec::{ExecContext, ProcessHandle, ProcessResult};
use crate::types::OperationId;

pub use state::{FailureReason, OperationState, RejectedTransition, StrategyFailure, Transition};

/// Write-once description of an Operation, fixed before it starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationSpec {
    pub label: String,
    pub steps: Vec<ProcessHandle>,
    pub scratch: Vec<PathBuf>,
    pub timeout: Option<Duration>,
}

impl OperationSpec {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            steps: Vec::new(),
            scratch: Vec::new(),
            timeout: None,
        }
    }

    /// Spec with exactly one step.
    pub fn single(label: impl Into<String>, handle: ProcessHandle) -> Self {
        Self::new(label).step(handle)
    }

    pub fn step(mut self, handle: ProcessHandle) -> Self {
        self.steps.push(handle);
        self
    }

    /// Register a scratch file removed when the Operation terminates.
    pub fn with_scratch(mut self, path: impl Into<PathBuf>) -> Self {
        self.scratch.push(path.into());
        self
    }

    /// Operation-wide watchdog budget across all steps.
    pub fn with_timeout(mut self, budget: Duration) -> Self {
        self.timeout = Some(budget);
        self
    }
}

/// Anything a `stop` command can cancel.
pub trait Cancellable: Send + Sync {
    /// Request cancellation. Returns `true` only for the first request.
    fn request_cancel(&self) -> bool;

    /// Short state description for `status`.
    fn state_name(&self) -> String;
}

struct Inner {
    id: OperationId,
    spec: OperationSpec,
    state: Mutex<OperationState>,
    cancel: CancellationToken,
    emitter: OnceLock<Emitter>,
    results: Mutex<Vec<ProcessResult>>,
    pid: Mutex<Option<u32>>,
    started_at: OnceLock<Instant>,
    ended_at: OnceLock<Instant>,
    done: watch::Sender<bool>,
}

/// Shared handle to one Operation. Clones refer to the same Operation.
#[derive(Clone)]
pub struct Operation {
    inner: Arc<Inner>,
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operation")
            .field("id", &self.inner.id)
            .field("label", &self.inner.spec.label)
            .field("state", &*self.lock_state())
            .field("cancel_requested", &self.is_cancel_requested())
            .finish_non_exhaustive()
    }
}

impl Operation {
    pub fn new(spec: OperationSpec) -> Self {
        let (done, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                id: OperationId::next(),
                spec,
                state: Mutex::new(OperationState::Idle),
                cancel: CancellationToken::new(),
                emitter: OnceLock::new(),
                results: Mutex::new(Vec::new()),
                pid: Mutex::new(None),
                started_at: OnceLock::new(),
                ended_at: OnceLock::new(),
                done,
            }),
        }
    }

    pub fn id(&self) -> OperationId {
        self.inner.id
    }

    pub fn label(&self) -> &str {
        &self.inner.spec.label
    }

    pub fn spec(&self) -> &OperationSpec {
        &self.inner.spec
    }

    pub fn state(&self) -> OperationState {
        self.lock_state().clone()
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    /// Result of the last step that ran, if any.
    pub fn result(&self) -> Option<ProcessResult> {
        self.lock_results().last().cloned()
    }

    /// Results of every step that ran, in step order.
    pub fn step_results(&self) -> Vec<ProcessResult> {
        self.lock_results().clone()
    }

    /// OS pid of the most recently started step.
    pub fn pid(&self) -> Option<u32> {
        *self.inner.pid.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Wall-clock time between start and terminal state (or now).
    pub fn elapsed(&self) -> Option<Duration> {
        let started = *self.inner.started_at.get()?;
        let end = self.inner.ended_at.get().copied().unwrap_or_else(Instant::now);
        Some(end.saturating_duration_since(started))
    }

    /// Move Idle -> Running and spawn the worker task.
    ///
    /// Returns `None` (after logging) if the Operation was already started.
    pub fn start(&self, ctx: &ExecContext) -> Option<JoinHandle<()>> {
        {
            let mut state = self.lock_state();
            match state.apply(Transition::Start) {
                Ok(next) => *state = next,
                Err(rejected) => {
                    warn!(op = %self.id(), %rejected, "start rejected");
                    return None;
                }
            }

            let emitter = self.inner.emitter.get_or_init(|| ctx.emitter(self.id()));
            let _ = self.inner.started_at.set(Instant::now());
            emitter.emit(EventKind::StateChanged(OperationState::Running));
        }

        debug!(op = %self.id(), label = %self.label(), steps = self.inner.spec.steps.len(), "operation started");

        let op = self.clone();
        let ctx = ctx.clone();
        Some(tokio::spawn(async move {
            driver::drive(op, ctx).await;
        }))
    }

    /// Set the cancel flag and move Running/Stopping -> Stopping.
    ///
    /// The worker observes the flag and stops the process. Calling this more
    /// than once has no further effect. Cancelling an Idle Operation only sets
    /// the flag; it will terminate as Cancelled as soon as it starts.
    pub fn request_cancel(&self) -> bool {
        let first = !self.inner.cancel.is_cancelled();
        self.inner.cancel.cancel();

        let mut state = self.lock_state();
        match state.apply(Transition::RequestCancel) {
            Ok(next) if next != *state => {
                *state = next;
                if let Some(emitter) = self.inner.emitter.get() {
                    emitter.emit(EventKind::StateChanged(OperationState::Stopping));
                }
                debug!(op = %self.id(), "cancel requested; stopping");
            }
            Ok(_) => debug!(op = %self.id(), "cancel already in progress"),
            Err(rejected) if *state == OperationState::Idle => {
                debug!(op = %self.id(), %rejected, "cancel flag set before start");
            }
            Err(rejected) => debug!(op = %self.id(), %rejected, "cancel ignored"),
        }

        first
    }

    /// Wait until the Operation reached its terminal state and its terminal
    /// event was posted.
    pub async fn wait(&self) -> OperationState {
        let mut done = self.inner.done.subscribe();
        // The sender lives in `self`, so this only errors if it was dropped.
        let _ = done.wait_for(|finished| *finished).await;
        self.state()
    }

    fn lock_state(&self) -> MutexGuard<'_, OperationState> {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_results(&self) -> MutexGuard<'_, Vec<ProcessResult>> {
        self.inner.results.lock().unwrap_or_else(|e| e.into_inner())
    }

    // Driver-side accessors.

    pub(crate) fn cancel_token(&self) -> &CancellationToken {
        &self.inner.cancel
    }

    pub(crate) fn emitter(&self) -> Emitter {
        self.inner
            .emitter
            .get()
            .cloned()
            .unwrap_or_else(|| Emitter::detached(self.id()))
    }

    pub(crate) fn started_at(&self) -> Instant {
        self.inner.started_at.get().copied().unwrap_or_else(Instant::now)
    }

    pub(crate) fn record_pid(&self, pid: Option<u32>) {
        *self.inner.pid.lock().unwrap_or_else(|e| e.into_inner()) = pid;
    }

    pub(crate) fn push_result(&self, result: ProcessResult) {
        self.lock_results().push(result);
    }

    /// Apply the finishing transition. Returns the terminal state, or `None`
    /// if the Operation had already terminated.
    pub(crate) fn finish(&self, outcome: Result<(), FailureReason>) -> Option<OperationState> {
        let cancel_requested = self.is_cancel_requested();
        let mut state = self.lock_state();
        match state.apply(Transition::Finish {
            outcome,
            cancel_requested,
        }) {
            Ok(next) => {
                *state = next.clone();
                let _ = self.inner.ended_at.set(Instant::now());
                Some(next)
            }
            Err(rejected) => {
                warn!(op = %self.id(), %rejected, "finish rejected");
                None
            }
        }
    }

    pub(crate) fn mark_done(&self) {
        self.inner.done.send_replace(true);
    }
}

impl Cancellable for Operation {
    fn request_cancel(&self) -> bool {
        Operation::request_cancel(self)
    }

    fn state_name(&self) -> String {
        self.state().name().to_string()
    }
}
