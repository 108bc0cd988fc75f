// src/exec/handle.rs

//! Plain data describing one process invocation and its captured result.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::types::StreamKind;

/// Everything needed to start one external process.
///
/// Arguments are always passed as a vector; nothing here is ever joined into
/// a shell string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessHandle {
    pub argv: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: BTreeMap<String, String>,
    pub elevate: bool,
    pub timeout: Option<Duration>,
}

impl ProcessHandle {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            argv: vec![program.into()],
            cwd: None,
            env: BTreeMap::new(),
            elevate: false,
            timeout: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.argv.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.argv.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn elevated(mut self) -> Self {
        self.elevate = true;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// The executable (first argv element).
    pub fn program(&self) -> &str {
        self.argv.first().map(String::as_str).unwrap_or("")
    }

    /// Human-readable rendering for logs only.
    pub fn display(&self) -> String {
        self.argv.join(" ")
    }
}

/// One line read from a child process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    pub stream: StreamKind,
    pub line: String,
}

impl OutputLine {
    pub fn stdout(line: impl Into<String>) -> Self {
        Self {
            stream: StreamKind::Stdout,
            line: line.into(),
        }
    }

    pub fn stderr(line: impl Into<String>) -> Self {
        Self {
            stream: StreamKind::Stderr,
            line: line.into(),
        }
    }
}

/// Captured outcome of one finished process. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessResult {
    pub exit_code: i32,
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
    pub duration: Duration,
    pub timed_out: bool,
}

impl ProcessResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0 && !self.timed_out
    }

    pub fn stdout_text(&self) -> String {
        self.stdout.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_keeps_argv_order() {
        let h = ProcessHandle::new("adb")
            .args(["-s", "R58M"])
            .arg("shell")
            .elevated()
            .timeout(Duration::from_secs(5));

        assert_eq!(h.argv, vec!["adb", "-s", "R58M", "shell"]);
        assert_eq!(h.program(), "adb");
        assert!(h.elevate);
        assert_eq!(h.timeout, Some(Duration::from_secs(5)));
    }
}
