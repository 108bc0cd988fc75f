// src/exec/mod.rs

//! Process execution layer.
//!
//! This module is responsible for actually running external tools, using
//! `tokio::process::Command`, and nothing else: no state machine, no
//! transcript.
//!
//! - [`handle`] holds the plain data types (`ProcessHandle`,
//!   `ProcessResult`, `OutputLine`).
//! - [`backend`] provides the `ProcessBackend` / `SupervisedProcess` traits
//!   and the production `RealProcessBackend`.
//! - [`supervisor`] owns one real child: streaming, terminate/kill.
//! - [`elevation`] is the single privilege-escalation entry point.
//! - [`context`] bundles the collaborators a running Operation needs.

pub mod backend;
pub mod context;
pub mod elevation;
pub mod handle;
pub mod supervisor;

pub use backend::{BoxFuture, ProcessBackend, RealProcessBackend, SupervisedProcess};
pub use context::ExecContext;
pub use elevation::{ElevationGate, ElevationGrant};
pub use handle::{OutputLine, ProcessHandle, ProcessResult};
pub use supervisor::ProcessSupervisor;
