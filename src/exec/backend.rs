// src/exec/backend.rs

//! Pluggable process backend abstraction.
//!
//! Operations talk to a `ProcessBackend` instead of `tokio::process`
//! directly. This makes it easy to swap in a scripted fake in tests while
//! keeping the production implementation in [`super::supervisor`].
//!
//! - `RealProcessBackend` spawns OS processes via [`ProcessSupervisor`].
//! - Tests provide a backend whose processes replay fixed output.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use crate::errors::Result;
use crate::exec::handle::{OutputLine, ProcessHandle};

use super::supervisor::ProcessSupervisor;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// One running child process owned by an Operation step.
///
/// Every method returns a cancel-safe future: the operation driver races
/// them against its cancel flag and watchdog.
pub trait SupervisedProcess: Send {
    /// OS process id, if there is a real process behind this handle.
    fn pid(&self) -> Option<u32>;

    /// Next line of output from either stream.
    ///
    /// Returns `None` once both streams reached end-of-input, or once the
    /// process has exited and the output still in flight was collected.
    fn next_line(&mut self) -> BoxFuture<'_, Option<OutputLine>>;

    /// Exit code, if the process is already known to have exited.
    fn exit_status(&self) -> Option<i32> {
        None
    }

    /// Wait for natural exit and return the exit code.
    fn wait(&mut self) -> BoxFuture<'_, Result<i32>>;

    /// Terminate gracefully, escalating to a forced kill after
    /// `escalate_after`. Idempotent. Returns the exit code if the process was
    /// reaped.
    fn stop(&mut self, escalate_after: Duration) -> BoxFuture<'_, Option<i32>>;
}

/// Trait abstracting how process handles are turned into running processes.
pub trait ProcessBackend: Send + Sync {
    /// Start the process. Fails with `WardenError::Spawn` when the executable
    /// or working directory is unusable; never blocks past process creation.
    fn start(&self, handle: &ProcessHandle) -> Result<Box<dyn SupervisedProcess>>;
}

/// Real backend used in production.
#[derive(Debug, Clone, Default)]
pub struct RealProcessBackend;

impl RealProcessBackend {
    pub fn new() -> Self {
        Self
    }
}

impl ProcessBackend for RealProcessBackend {
    fn start(&self, handle: &ProcessHandle) -> Result<Box<dyn SupervisedProcess>> {
        let supervisor = ProcessSupervisor::start(handle)?;
        Ok(Box::new(supervisor))
    }
}
