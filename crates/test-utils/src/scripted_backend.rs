use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use toolwarden::errors::{Result, WardenError};
use toolwarden::exec::{BoxFuture, OutputLine, ProcessBackend, ProcessHandle, SupervisedProcess};

/// Exit code a scripted process reports once stopped (128 + SIGTERM).
pub const STOPPED_EXIT_CODE: i32 = 143;

#[derive(Debug, Clone)]
enum Step {
    Line(OutputLine),
    Pause(Duration),
}

/// Deterministic behaviour of one fake process.
#[derive(Debug, Clone, Default)]
pub struct Script {
    steps: Vec<Step>,
    exit_code: i32,
    hang: bool,
    spawn_error: Option<String>,
}

impl Script {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stdout(mut self, line: &str) -> Self {
        self.steps.push(Step::Line(OutputLine::stdout(line)));
        self
    }

    pub fn stderr(mut self, line: &str) -> Self {
        self.steps.push(Step::Line(OutputLine::stderr(line)));
        self
    }

    /// Sleep before producing the next line (or exiting).
    pub fn pause(mut self, duration: Duration) -> Self {
        self.steps.push(Step::Pause(duration));
        self
    }

    pub fn exit(mut self, code: i32) -> Self {
        self.exit_code = code;
        self
    }

    /// After its output, never exit on its own.
    pub fn hang(mut self) -> Self {
        self.hang = true;
        self
    }

    /// Fail at `start` like a missing executable.
    pub fn fail_spawn(mut self, reason: &str) -> Self {
        self.spawn_error = Some(reason.to_string());
        self
    }
}

/// Fake `ProcessBackend` that:
/// - records every argv it was asked to start
/// - picks the first script whose pattern occurs in the joined argv
/// - falls back to a silent process exiting 0.
#[derive(Debug, Clone, Default)]
pub struct ScriptedBackend {
    rules: Arc<Mutex<Vec<(String, Script)>>>,
    started: Arc<Mutex<Vec<Vec<String>>>>,
    stops: Arc<AtomicUsize>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(self, pattern: &str, script: Script) -> Self {
        self.rules
            .lock()
            .unwrap()
            .push((pattern.to_string(), script));
        self
    }

    /// Argv of every started process, in start order.
    pub fn started(&self) -> Vec<Vec<String>> {
        self.started.lock().unwrap().clone()
    }

    pub fn started_count(&self) -> usize {
        self.started.lock().unwrap().len()
    }

    /// Number of `stop` calls across all processes.
    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    fn script_for(&self, command_line: &str) -> Script {
        self.rules
            .lock()
            .unwrap()
            .iter()
            .find(|(pattern, _)| command_line.contains(pattern.as_str()))
            .map(|(_, script)| script.clone())
            .unwrap_or_default()
    }
}

impl ProcessBackend for ScriptedBackend {
    fn start(&self, handle: &ProcessHandle) -> Result<Box<dyn SupervisedProcess>> {
        let script = self.script_for(&handle.display());
        if let Some(reason) = script.spawn_error {
            return Err(WardenError::spawn(handle.program(), reason));
        }

        self.started.lock().unwrap().push(handle.argv.clone());
        Ok(Box::new(ScriptedProcess {
            steps: script.steps.into(),
            exit_code: script.exit_code,
            hang: script.hang,
            stopped: None,
            stops: Arc::clone(&self.stops),
        }))
    }
}

struct ScriptedProcess {
    steps: VecDeque<Step>,
    exit_code: i32,
    hang: bool,
    stopped: Option<i32>,
    stops: Arc<AtomicUsize>,
}

impl SupervisedProcess for ScriptedProcess {
    fn pid(&self) -> Option<u32> {
        None
    }

    fn next_line(&mut self) -> BoxFuture<'_, Option<OutputLine>> {
        Box::pin(async move {
            while self.stopped.is_none() {
                match self.steps.pop_front() {
                    Some(Step::Pause(duration)) => tokio::time::sleep(duration).await,
                    Some(Step::Line(line)) => return Some(line),
                    None if self.hang => std::future::pending::<()>().await,
                    None => return None,
                }
            }
            None
        })
    }

    fn wait(&mut self) -> BoxFuture<'_, Result<i32>> {
        Box::pin(async move {
            if let Some(code) = self.stopped {
                return Ok(code);
            }
            if self.hang {
                std::future::pending::<()>().await;
            }
            Ok(self.exit_code)
        })
    }

    fn stop(&mut self, _escalate_after: Duration) -> BoxFuture<'_, Option<i32>> {
        Box::pin(async move {
            self.stops.fetch_add(1, Ordering::SeqCst);
            Some(*self.stopped.get_or_insert(STOPPED_EXIT_CODE))
        })
    }
}
