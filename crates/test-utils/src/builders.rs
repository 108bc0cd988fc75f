#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use toolwarden::bridge::{BridgeReceiver, EventBridge};
use toolwarden::config::{ConfigFile, RawConfigFile};
use toolwarden::console::Console;
use toolwarden::exec::{ElevationGate, ExecContext, ProcessBackend};
use toolwarden::fs::mock::MockFileSystem;
use toolwarden::transcript::MemoryTranscript;

use crate::scripted_backend::ScriptedBackend;

/// Builder for `ConfigFile` to simplify test setup.
///
/// Starts from the built-in defaults with a short kill escalation so stop
/// paths finish quickly.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        let mut config = RawConfigFile::default();
        config.supervisor.escalate_after = "100ms".to_string();
        Self { config }
    }

    pub fn escalate_after(mut self, value: &str) -> Self {
        self.config.supervisor.escalate_after = value.to_string();
        self
    }

    pub fn default_timeout(mut self, value: &str) -> Self {
        self.config.supervisor.default_timeout = Some(value.to_string());
        self
    }

    pub fn strategy_timeout(mut self, value: &str) -> Self {
        self.config.identify.strategy_timeout = value.to_string();
        self
    }

    pub fn identify_deadline(mut self, value: &str) -> Self {
        self.config.identify.deadline = Some(value.to_string());
        self
    }

    pub fn scratch_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.config.session.scratch_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn elevation(mut self, program: &str) -> Self {
        self.config.elevation.program = program.to_string();
        self
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Execution context on a mock filesystem, not connected to any consumer.
pub fn detached_context(backend: impl ProcessBackend + 'static, fs: &MockFileSystem) -> ExecContext {
    let config = ConfigFileBuilder::new().build();
    ExecContext::new(
        Arc::new(backend),
        ElevationGate::new(&config.elevation),
        Arc::new(fs.clone()),
        config.supervisor,
    )
}

/// Execution context whose Operations post to the returned receiver.
pub fn bridged_context(
    backend: impl ProcessBackend + 'static,
    fs: &MockFileSystem,
    escalate_after: Duration,
) -> (ExecContext, BridgeReceiver) {
    let (bridge, rx) = EventBridge::channel();
    let mut ctx = detached_context(backend, fs).with_bridge(bridge);
    ctx.escalate_after = escalate_after;
    (ctx, rx)
}

/// A console over a scripted backend, a mock filesystem and an in-memory
/// transcript. The handles are clones sharing state with the console.
pub struct ConsoleHarness {
    pub console: Console,
    pub transcript: MemoryTranscript,
    pub backend: ScriptedBackend,
    pub fs: MockFileSystem,
}

impl ConsoleHarness {
    pub fn new(backend: ScriptedBackend, fs: MockFileSystem) -> Self {
        Self::with_config(backend, fs, ConfigFileBuilder::new().scratch_dir("/tmp/toolwarden-tests").build())
    }

    pub fn with_config(backend: ScriptedBackend, fs: MockFileSystem, config: ConfigFile) -> Self {
        let transcript = MemoryTranscript::new();
        let console = Console::build(
            Arc::new(config),
            Arc::new(backend.clone()),
            Arc::new(fs.clone()),
            Box::new(transcript.clone()),
        )
        .expect("Failed to build console");

        Self {
            console,
            transcript,
            backend,
            fs,
        }
    }

    pub fn lines(&self) -> Vec<String> {
        self.transcript.lines()
    }
}

/// Mock filesystem with the given `/dev` nodes.
pub fn devices(names: &[&str]) -> MockFileSystem {
    let fs = MockFileSystem::new();
    for name in names {
        fs.add_file(Path::new("/dev").join(name), "");
    }
    fs
}
