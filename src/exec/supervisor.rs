// src/exec/supervisor.rs

//! Real process supervision on top of `tokio::process`.
//!
//! A `ProcessSupervisor` owns exactly one child for its whole lifetime:
//!
//! - stdout and stderr are drained by two background reader tasks that
//!   forward `(stream, line)` pairs over one channel, so a slow consumer
//!   never lets OS pipe buffers fill up;
//! - the line stream ends when both pipes reach EOF, or shortly after the
//!   child exits if a descendant still holds the pipes open;
//! - `stop()` sends a terminate signal and escalates to a forced kill;
//! - `kill_on_drop(true)` plus aborting the readers on drop releases every
//!   OS handle even if the owner bails out mid-stream.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, timeout, timeout_at};
use tracing::{debug, info, warn};

use crate::errors::{Result, WardenError};
use crate::exec::backend::{BoxFuture, SupervisedProcess};
use crate::exec::handle::{OutputLine, ProcessHandle};
use crate::types::StreamKind;

/// Lines buffered between the reader tasks and the consumer.
const LINE_BUFFER: usize = 256;

/// Conventional shell encoding for signal-terminated processes.
const EXIT_CODE_SIGNAL_BASE: i32 = 128;

/// How long output already in flight is still collected after the child
/// exited.
const EXIT_DRAIN_GRACE: Duration = Duration::from_millis(200);

pub struct ProcessSupervisor {
    program: String,
    child: Child,
    pid: Option<u32>,
    lines: mpsc::Receiver<OutputLine>,
    readers: Vec<JoinHandle<()>>,
    exit_code: Option<i32>,
    drain_until: Option<Instant>,
    watch_exit: bool,
    stopped: bool,
}

impl fmt::Debug for ProcessSupervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessSupervisor")
            .field("program", &self.program)
            .field("pid", &self.pid)
            .field("exit_code", &self.exit_code)
            .field("stopped", &self.stopped)
            .finish_non_exhaustive()
    }
}

impl ProcessSupervisor {
    /// Spawn the process described by `handle`.
    ///
    /// Fails with [`WardenError::Spawn`] if the executable cannot be located
    /// or the working directory is not a directory. Must be called from
    /// within a Tokio runtime (the output readers are Tokio tasks).
    pub fn start(handle: &ProcessHandle) -> Result<Self> {
        let program = handle.program().to_string();
        if program.is_empty() {
            return Err(WardenError::spawn("<none>", "empty argument vector"));
        }

        let executable = resolve_executable(&program)?;

        if let Some(dir) = &handle.cwd {
            if !dir.is_dir() {
                return Err(WardenError::spawn(
                    &program,
                    format!("working directory {} is not a directory", dir.display()),
                ));
            }
        }

        let mut cmd = Command::new(&executable);
        cmd.args(&handle.argv[1..])
            .envs(&handle.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = &handle.cwd {
            cmd.current_dir(dir);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| WardenError::spawn(&program, e.to_string()))?;
        let pid = child.id();

        info!(program = %program, pid = ?pid, argv = %handle.display(), "process started");

        let (tx, rx) = mpsc::channel::<OutputLine>(LINE_BUFFER);
        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(spawn_reader(stdout, StreamKind::Stdout, tx.clone(), program.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(spawn_reader(stderr, StreamKind::Stderr, tx.clone(), program.clone()));
        }
        // The channel closes once both readers are done.
        drop(tx);

        Ok(Self {
            program,
            child,
            pid,
            lines: rx,
            readers,
            exit_code: None,
            drain_until: None,
            watch_exit: true,
            stopped: false,
        })
    }

    async fn next_line_inner(&mut self) -> Option<OutputLine> {
        loop {
            if let Some(deadline) = self.drain_until {
                return match timeout_at(deadline, self.lines.recv()).await {
                    Ok(line) => line,
                    Err(_) => {
                        debug!(program = %self.program, pid = ?self.pid, "pipes still open after exit; detaching readers");
                        self.release_handles();
                        None
                    }
                };
            }

            tokio::select! {
                biased;
                line = self.lines.recv() => return line,
                status = self.child.wait(), if self.watch_exit && self.exit_code.is_none() => match status {
                    Ok(status) => {
                        let code = exit_code_of(status);
                        self.exit_code = Some(code);
                        self.drain_until = Some(Instant::now() + EXIT_DRAIN_GRACE);
                        info!(program = %self.program, pid = ?self.pid, exit_code = code, "process exited");
                    }
                    Err(e) => {
                        warn!(program = %self.program, error = %e, "polling for exit failed");
                        self.watch_exit = false;
                    }
                },
            }
        }
    }

    async fn wait_inner(&mut self) -> Result<i32> {
        if let Some(code) = self.exit_code {
            return Ok(code);
        }

        let status = self.child.wait().await?;
        let code = exit_code_of(status);
        self.exit_code = Some(code);

        info!(program = %self.program, pid = ?self.pid, exit_code = code, "process exited");
        Ok(code)
    }

    async fn stop_inner(&mut self, escalate_after: Duration) -> Option<i32> {
        if self.stopped {
            return self.exit_code;
        }
        self.stopped = true;

        if self.exit_code.is_none() {
            if let Ok(Some(status)) = self.child.try_wait() {
                self.exit_code = Some(exit_code_of(status));
            }
        }

        if self.exit_code.is_none() {
            info!(
                program = %self.program,
                pid = ?self.pid,
                ?escalate_after,
                "sending terminate signal"
            );
            send_terminate(&mut self.child);

            match timeout(escalate_after, self.child.wait()).await {
                Ok(Ok(status)) => self.exit_code = Some(exit_code_of(status)),
                Ok(Err(e)) => {
                    warn!(program = %self.program, error = %e, "waiting after terminate failed");
                }
                Err(_) => {
                    warn!(
                        program = %self.program,
                        pid = ?self.pid,
                        "process ignored terminate signal; killing"
                    );
                    if let Err(e) = self.child.start_kill() {
                        warn!(program = %self.program, error = %e, "failed to kill process");
                    }
                    match timeout(escalate_after, self.child.wait()).await {
                        Ok(Ok(status)) => self.exit_code = Some(exit_code_of(status)),
                        Ok(Err(e)) => {
                            warn!(program = %self.program, error = %e, "waiting after kill failed");
                        }
                        Err(_) => {
                            warn!(
                                program = %self.program,
                                pid = ?self.pid,
                                "process still not reaped after kill"
                            );
                        }
                    }
                }
            }
        }

        self.release_handles();
        debug!(program = %self.program, exit_code = ?self.exit_code, "process stopped");
        self.exit_code
    }

    fn release_handles(&mut self) {
        for reader in self.readers.drain(..) {
            reader.abort();
        }
        self.lines.close();
    }
}

impl SupervisedProcess for ProcessSupervisor {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn next_line(&mut self) -> BoxFuture<'_, Option<OutputLine>> {
        Box::pin(self.next_line_inner())
    }

    fn exit_status(&self) -> Option<i32> {
        self.exit_code
    }

    fn wait(&mut self) -> BoxFuture<'_, Result<i32>> {
        Box::pin(self.wait_inner())
    }

    fn stop(&mut self, escalate_after: Duration) -> BoxFuture<'_, Option<i32>> {
        Box::pin(self.stop_inner(escalate_after))
    }
}

impl Drop for ProcessSupervisor {
    fn drop(&mut self) {
        for reader in &self.readers {
            reader.abort();
        }
        if self.exit_code.is_none() {
            debug!(
                program = %self.program,
                pid = ?self.pid,
                "supervisor dropped with live process; kill_on_drop will reap it"
            );
        }
    }
}

/// Locate the executable: explicit paths must exist, bare names go through
/// `PATH`.
fn resolve_executable(program: &str) -> Result<PathBuf> {
    let path = Path::new(program);
    if path.is_absolute() || path.components().count() > 1 {
        if path.is_file() {
            Ok(path.to_path_buf())
        } else {
            Err(WardenError::spawn(program, "executable not found"))
        }
    } else {
        which::which(program)
            .map_err(|e| WardenError::spawn(program, format!("not found on PATH ({e})")))
    }
}

fn spawn_reader<R>(
    stream: R,
    kind: StreamKind,
    tx: mpsc::Sender<OutputLine>,
    program: String,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        // Byte-oriented so non-UTF-8 output cannot stall the pipe.
        let mut reader = BufReader::new(stream);
        let mut buf = Vec::new();

        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf)
                        .trim_end_matches(['\r', '\n'])
                        .to_string();
                    if tx.send(OutputLine { stream: kind, line }).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!(program = %program, stream = %kind, error = %e, "error reading process output");
                    break;
                }
            }
        }

        debug!(program = %program, stream = %kind, "output reader finished");
    })
}

fn exit_code_of(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return EXIT_CODE_SIGNAL_BASE + signal;
        }
    }

    -1
}

#[cfg(unix)]
fn send_terminate(child: &mut Child) {
    let Some(pid) = child.id() else {
        return;
    };

    // SAFETY: plain syscall on a pid we still own (not yet reaped).
    let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
    if rc != 0 {
        warn!(
            pid,
            error = %std::io::Error::last_os_error(),
            "failed to send SIGTERM"
        );
    }
}

#[cfg(not(unix))]
fn send_terminate(child: &mut Child) {
    if let Err(e) = child.start_kill() {
        warn!(error = %e, "failed to terminate process");
    }
}
