// src/transcript.rs

//! Append-only, ordered text sink the operator reads.

use std::io::Write;
use std::sync::{Arc, Mutex};

use tracing::warn;

pub trait Transcript: Send {
    fn append(&mut self, line: &str);
}

/// In-memory transcript. Clones share the same lines, so a test (or the
/// replay driver) can keep one clone and hand the other to the router.
#[derive(Debug, Clone, Default)]
pub struct MemoryTranscript {
    lines: Arc<Mutex<Vec<String>>>,
}

impl MemoryTranscript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Whole transcript as one newline-terminated string.
    pub fn text(&self) -> String {
        self.lines().iter().map(|l| format!("{l}\n")).collect()
    }
}

impl Transcript for MemoryTranscript {
    fn append(&mut self, line: &str) {
        self.lines
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(line.to_string());
    }
}

/// Prints each line on stdout.
#[derive(Debug, Default)]
pub struct StdoutTranscript;

impl Transcript for StdoutTranscript {
    fn append(&mut self, line: &str) {
        let mut out = std::io::stdout().lock();
        if let Err(e) = writeln!(out, "{line}").and_then(|()| out.flush()) {
            warn!(error = %e, "failed to write transcript line");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_transcript_clones_share_lines() {
        let reader = MemoryTranscript::new();
        let mut writer = reader.clone();
        writer.append("one");
        writer.append("two");

        assert_eq!(reader.lines(), vec!["one", "two"]);
        assert_eq!(reader.text(), "one\ntwo\n");
    }
}
