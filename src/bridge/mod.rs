// src/bridge/mod.rs

//! Cross-thread event delivery.
//!
//! Worker tasks post [`Event`]s; the single consumer task (the console) reads
//! them from a [`BridgeReceiver`]. The bridge is pure transport:
//!
//! - `post` never blocks and is safe from any task or thread;
//! - delivery order equals posting order, and an [`Emitter`] assigns the
//!   per-operation sequence number under the same lock it posts with, so
//!   events of one Operation arrive in strictly increasing `seq` order;
//! - once an Emitter has posted a terminal event it drops everything else;
//! - if the consumer is gone, `post` fails and the Emitter logs and drops
//!   the event.

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::errors::{Result, WardenError};
use crate::operation::{FailureReason, OperationState};
use crate::types::OperationId;

/// Payload of one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    Stdout(String),
    Stderr(String),
    StateChanged(OperationState),
    /// Terminal: success, with a short human-readable summary.
    Completed(String),
    /// Terminal: failure, including caller-initiated cancellation.
    Failed(FailureReason),
}

impl EventKind {
    pub fn is_terminal(&self) -> bool {
        matches!(self, EventKind::Completed(_) | EventKind::Failed(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub op: OperationId,
    pub seq: u64,
    pub kind: EventKind,
}

/// Sending half; cheap to clone.
#[derive(Debug, Clone)]
pub struct EventBridge {
    tx: mpsc::UnboundedSender<Event>,
}

/// Receiving half, owned by the consumer task.
#[derive(Debug)]
pub struct BridgeReceiver {
    rx: mpsc::UnboundedReceiver<Event>,
}

impl EventBridge {
    pub fn channel() -> (EventBridge, BridgeReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (EventBridge { tx }, BridgeReceiver { rx })
    }

    /// Deliver an event to the consumer.
    ///
    /// Fails with [`WardenError::BridgeUnavailable`] if the consumer has shut
    /// down; the event is dropped.
    pub fn post(&self, event: Event) -> Result<()> {
        self.tx
            .send(event)
            .map_err(|mpsc::error::SendError(event)| {
                WardenError::BridgeUnavailable(format!("{} event #{} dropped", event.op, event.seq))
            })
    }

    /// Whether the consumer side is gone.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    pub fn emitter(&self, op: OperationId) -> Emitter {
        Emitter::new(op, Some(self.clone()))
    }
}

impl BridgeReceiver {
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Event> {
        self.rx.try_recv().ok()
    }

    /// Stop accepting events; later posts degrade to logged no-ops.
    pub fn close(&mut self) {
        self.rx.close();
    }
}

#[derive(Debug, Default)]
struct EmitterState {
    next_seq: u64,
    closed: bool,
}

/// Per-operation posting handle that stamps sequence numbers.
#[derive(Debug, Clone)]
pub struct Emitter {
    op: OperationId,
    bridge: Option<EventBridge>,
    state: Arc<Mutex<EmitterState>>,
}

impl Emitter {
    fn new(op: OperationId, bridge: Option<EventBridge>) -> Self {
        Self {
            op,
            bridge,
            state: Arc::new(Mutex::new(EmitterState::default())),
        }
    }

    /// An emitter that is not connected to any consumer; events are only
    /// traced. Used for operations whose progress is reported elsewhere
    /// (fallback strategies).
    pub fn detached(op: OperationId) -> Self {
        Self::new(op, None)
    }

    pub fn op(&self) -> OperationId {
        self.op
    }

    /// Stamp and post one event. Returns whether it was delivered.
    pub fn emit(&self, kind: EventKind) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.closed {
            debug!(op = %self.op, ?kind, "dropping event after terminal event");
            return false;
        }

        let seq = state.next_seq;
        state.next_seq += 1;
        if kind.is_terminal() {
            state.closed = true;
        }

        let event = Event {
            op: self.op,
            seq,
            kind,
        };

        // Posting while holding the lock keeps channel order == seq order.
        match &self.bridge {
            Some(bridge) => match bridge.post(event) {
                Ok(()) => true,
                Err(err) => {
                    warn!(op = %self.op, seq, error = %err, "dropping event");
                    false
                }
            },
            None => {
                trace!(op = %event.op, seq, kind = ?event.kind, "detached event");
                true
            }
        }
    }

    /// Whether the terminal event has already been emitted.
    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).closed
    }
}
