// src/console.rs

//! The single consumer task.
//!
//! The [`Console`] owns the [`CommandRouter`] and the receiving half of the
//! [`EventBridge`]. It waits on two things only: operator input and
//! delivered Events. Everything slow happens on Operation worker tasks.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, info, warn};

use crate::bridge::{BridgeReceiver, EventBridge};
use crate::config::ConfigFile;
use crate::errors::Result;
use crate::exec::{ElevationGate, ExecContext, ProcessBackend};
use crate::fs::FileSystem;
use crate::handlers::builtin_table;
use crate::router::{CommandRouter, Dispatch};
use crate::transcript::Transcript;

/// Extra time granted on shutdown beyond the terminate/kill escalation.
const SHUTDOWN_SLACK: Duration = Duration::from_secs(2);

/// Operator input as seen by the console loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleInput {
    Line(String),
    /// Ctrl-C.
    Interrupt,
}

pub struct Console {
    router: CommandRouter,
    events: BridgeReceiver,
    shutdown_grace: Duration,
}

impl fmt::Debug for Console {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Console")
            .field("session", self.router.session())
            .field("shutdown_grace", &self.shutdown_grace)
            .finish_non_exhaustive()
    }
}

impl Console {
    pub fn new(router: CommandRouter, events: BridgeReceiver, shutdown_grace: Duration) -> Self {
        Self {
            router,
            events,
            shutdown_grace,
        }
    }

    /// Wire config, backend, filesystem and transcript into a ready console
    /// with the built-in command table.
    pub fn build(
        config: Arc<ConfigFile>,
        backend: Arc<dyn ProcessBackend>,
        fs: Arc<dyn FileSystem>,
        transcript: Box<dyn Transcript>,
    ) -> Result<Self> {
        let (bridge, events) = EventBridge::channel();
        let elevation = ElevationGate::new(&config.elevation);
        let exec = ExecContext::new(backend, elevation, fs, config.supervisor).with_bridge(bridge);
        let table = builtin_table()?;
        let shutdown_grace = config.supervisor.escalate_after + SHUTDOWN_SLACK;

        let router = CommandRouter::new(table, transcript, exec, config);
        Ok(Self::new(router, events, shutdown_grace))
    }

    pub fn router(&self) -> &CommandRouter {
        &self.router
    }

    pub fn router_mut(&mut self) -> &mut CommandRouter {
        &mut self.router
    }

    /// Handle one line, then apply whatever Events are already delivered.
    pub fn dispatch(&mut self, line: &str) -> Dispatch {
        let outcome = self.router.dispatch(line);
        self.drain_ready();
        outcome
    }

    /// Apply already-delivered Events without waiting.
    pub fn drain_ready(&mut self) -> usize {
        let mut applied = 0;
        while let Some(event) = self.events.try_recv() {
            self.router.apply_event(&event);
            applied += 1;
        }
        applied
    }

    /// Apply Events as they arrive for `duration`.
    pub async fn pump_for(&mut self, duration: Duration) {
        let deadline = Instant::now() + duration;
        while let Ok(Some(event)) = timeout_at(deadline, self.events.recv()).await {
            self.router.apply_event(&event);
        }
    }

    /// Apply Events until no session slot is occupied.
    pub async fn pump_until_idle(&mut self) {
        loop {
            self.drain_ready();
            if self.router.session().is_idle() {
                return;
            }
            match self.events.recv().await {
                Some(event) => self.router.apply_event(&event),
                None => {
                    warn!("event bridge closed while operations were active");
                    return;
                }
            }
        }
    }

    /// Feed lines one by one, letting each started Operation reach its
    /// terminal Event before the next line.
    pub async fn replay<I, S>(&mut self, lines: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for line in lines {
            let line = line.as_ref();
            debug!(%line, "replaying");
            self.dispatch(line);
            self.pump_until_idle().await;
        }
    }

    /// Interactive loop. Ends on `exit`/`quit`, Ctrl-C or closed input;
    /// active entries are cancelled and given time to wind down.
    pub async fn run(mut self, mut input: mpsc::Receiver<ConsoleInput>) -> Result<()> {
        info!("console started");

        loop {
            tokio::select! {
                Some(event) = self.events.recv() => self.router.apply_event(&event),
                received = input.recv() => match received {
                    Some(ConsoleInput::Line(line)) => {
                        if is_exit(&line) {
                            info!("exit requested");
                            break;
                        }
                        self.dispatch(&line);
                    }
                    Some(ConsoleInput::Interrupt) => {
                        info!("interrupted");
                        break;
                    }
                    None => {
                        debug!("input closed");
                        break;
                    }
                },
            }
        }

        self.shutdown().await;
        info!("console exiting");
        Ok(())
    }

    /// Cancel active entries and wait (bounded) for their terminal Events.
    pub async fn shutdown(&mut self) {
        let cancelled = self.router.cancel_all();
        if cancelled == 0 && self.router.session().is_idle() {
            return;
        }

        info!(cancelled, "waiting for active operations to stop");
        let deadline = Instant::now() + self.shutdown_grace;
        if timeout_at(deadline, self.pump_until_idle()).await.is_err() {
            warn!("operations still active at shutdown");
        }
    }
}

fn is_exit(line: &str) -> bool {
    matches!(line.trim().to_lowercase().as_str(), "exit" | "quit")
}

/// Script lines worth dispatching: blank lines and `#` comments dropped.
pub fn script_lines(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}
