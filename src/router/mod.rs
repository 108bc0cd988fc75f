// src/router/mod.rs

//! Free-text command dispatch.
//!
//! The [`CommandRouter`] owns the verb table, the [`Session`] (transcript +
//! active-entry registry) and the execution context handlers start
//! Operations with. It never awaits: handlers start work and return, and the
//! work's progress comes back later as Events fed to
//! [`CommandRouter::apply_event`].

pub mod command;
pub mod session;
pub mod table;

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::bridge::Event;
use crate::config::ConfigFile;
use crate::exec::ExecContext;
use crate::fallback::FallbackChain;
use crate::operation::{Cancellable, Operation};
use crate::transcript::Transcript;
use crate::types::SlotName;

pub use command::Command;
pub use session::{ActiveEntry, Session, render_event};
pub use table::{CommandSpec, CommandTable, Handler};

/// What `dispatch` did with one input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    Empty,
    Unrecognized(String),
    Usage(String),
    Handled,
    HandlerError(String),
}

/// Everything a handler may touch while it runs.
pub struct HandlerContext<'a> {
    pub session: &'a mut Session,
    pub exec: &'a ExecContext,
    pub config: &'a ConfigFile,
    pub table: &'a CommandTable,
}

impl HandlerContext<'_> {
    pub fn say(&mut self, line: impl AsRef<str>) {
        self.session.append(line);
    }

    /// Whether `slot` can take a new entry. If not, tells the operator what
    /// is occupying it.
    pub fn ensure_slot_free(&mut self, slot: SlotName) -> bool {
        let busy = self.session.active(slot).map(|entry| entry.label.clone());
        match busy {
            Some(label) => {
                self.say(format!("{label} is already running. Use 'stop' to cancel."));
                false
            }
            None => true,
        }
    }

    /// Register `op` in `slot` and start it. Returns once the worker task is
    /// spawned.
    pub fn start_operation(&mut self, slot: SlotName, op: Operation) -> bool {
        if !self.ensure_slot_free(slot) {
            return false;
        }

        let entry = ActiveEntry {
            id: op.id(),
            label: op.label().to_string(),
            target: Arc::new(op.clone()) as Arc<dyn Cancellable>,
        };
        if self.session.register(slot, entry).is_err() {
            return false;
        }

        info!(slot, op = %op.id(), label = %op.label(), "starting operation");
        // The join handle is not needed: completion arrives as an Event.
        let _ = op.start(self.exec);
        true
    }

    /// Spawn a fallback chain as one slot entry.
    pub fn start_chain<T, R>(
        &mut self,
        slot: SlotName,
        label: &str,
        chain: FallbackChain<T>,
        per_strategy_timeout: Duration,
        render: R,
    ) -> bool
    where
        T: Send + 'static,
        R: FnOnce(&str, &T) -> String + Send + 'static,
    {
        if !self.ensure_slot_free(slot) {
            return false;
        }

        let run = chain.spawn(label, self.exec, per_strategy_timeout, render);
        info!(slot, op = %run.id(), label, "starting fallback chain");
        let entry = ActiveEntry {
            id: run.id(),
            label: label.to_string(),
            target: Arc::new(run) as Arc<dyn Cancellable>,
        };
        if let Err(entry) = self.session.register(slot, entry) {
            warn!(slot, op = %entry.id, "slot taken after check; cancelling chain");
            entry.target.request_cancel();
            return false;
        }
        true
    }
}

pub struct CommandRouter {
    table: CommandTable,
    session: Session,
    exec: ExecContext,
    config: Arc<ConfigFile>,
}

impl CommandRouter {
    pub fn new(
        table: CommandTable,
        transcript: Box<dyn Transcript>,
        exec: ExecContext,
        config: Arc<ConfigFile>,
    ) -> Self {
        Self {
            table,
            session: Session::new(transcript),
            exec,
            config,
        }
    }

    pub fn table(&self) -> &CommandTable {
        &self.table
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }

    /// Parse and handle one input line.
    pub fn dispatch(&mut self, line: &str) -> Dispatch {
        let Some(cmd) = Command::parse(line) else {
            return Dispatch::Empty;
        };

        let Some(spec) = self.table.get(&cmd.verb) else {
            debug!(verb = %cmd.verb, "unrecognized command");
            self.session
                .append(format!("unrecognized command: {}", cmd.verb));
            return Dispatch::Unrecognized(cmd.verb);
        };

        if cmd.args.len() < spec.min_args {
            let usage = format!("Usage: {}", spec.usage);
            self.session.append(&usage);
            return Dispatch::Usage(usage);
        }

        debug!(verb = %cmd.verb, args = ?cmd.args, "dispatching");
        let handler = spec.handler();
        let mut ctx = HandlerContext {
            session: &mut self.session,
            exec: &self.exec,
            config: &self.config,
            table: &self.table,
        };

        match handler(&mut ctx, &cmd) {
            Ok(()) => Dispatch::Handled,
            Err(e) => {
                warn!(verb = %cmd.verb, error = %e, "command failed");
                let message = e.to_string();
                self.session.append(format!("Error: {message}"));
                Dispatch::HandlerError(message)
            }
        }
    }

    /// Feed one delivered Event back into the transcript and registry.
    pub fn apply_event(&mut self, event: &Event) {
        self.session.apply_event(event);
    }

    /// Request cancellation of every active entry (shutdown path).
    pub fn cancel_all(&mut self) -> usize {
        let mut cancelled = 0;
        for (slot, entry) in self.session.entries() {
            debug!(slot, op = %entry.id, "cancelling on shutdown");
            if entry.target.request_cancel() {
                cancelled += 1;
            }
        }
        cancelled
    }
}
