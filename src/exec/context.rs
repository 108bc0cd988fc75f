// src/exec/context.rs

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::bridge::{Emitter, EventBridge};
use crate::config::SupervisorSettings;
use crate::exec::backend::ProcessBackend;
use crate::exec::elevation::ElevationGate;
use crate::fs::FileSystem;
use crate::types::OperationId;

/// Shared collaborators every Operation needs while running.
///
/// Written once at startup and cloned into each worker task.
#[derive(Clone)]
pub struct ExecContext {
    pub backend: Arc<dyn ProcessBackend>,
    pub elevation: ElevationGate,
    pub fs: Arc<dyn FileSystem>,
    pub escalate_after: Duration,
    pub default_timeout: Option<Duration>,
    bridge: Option<EventBridge>,
}

impl fmt::Debug for ExecContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecContext")
            .field("elevation", &self.elevation)
            .field("fs", &self.fs)
            .field("escalate_after", &self.escalate_after)
            .field("default_timeout", &self.default_timeout)
            .field("bridged", &self.bridge.is_some())
            .finish_non_exhaustive()
    }
}

impl ExecContext {
    pub fn new(
        backend: Arc<dyn ProcessBackend>,
        elevation: ElevationGate,
        fs: Arc<dyn FileSystem>,
        settings: SupervisorSettings,
    ) -> Self {
        Self {
            backend,
            elevation,
            fs,
            escalate_after: settings.escalate_after,
            default_timeout: settings.default_timeout,
            bridge: None,
        }
    }

    pub fn with_bridge(mut self, bridge: EventBridge) -> Self {
        self.bridge = Some(bridge);
        self
    }

    /// Same collaborators, but Operations started with the result do not
    /// post to the consumer.
    pub fn detached(&self) -> Self {
        Self {
            bridge: None,
            ..self.clone()
        }
    }

    pub fn emitter(&self, op: OperationId) -> Emitter {
        match &self.bridge {
            Some(bridge) => bridge.emitter(op),
            None => Emitter::detached(op),
        }
    }
}
