// src/router/session.rs

//! Per-session state: the transcript sink and the active-entry registry.
//!
//! Each named slot holds at most one active entry. An entry is released when
//! the consumer applies its terminal Event.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::bridge::{Event, EventKind};
use crate::operation::{Cancellable, FailureReason};
use crate::transcript::Transcript;
use crate::types::{OperationId, SlotName};

/// Something currently running in a slot.
#[derive(Clone)]
pub struct ActiveEntry {
    pub id: OperationId,
    pub label: String,
    pub target: Arc<dyn Cancellable>,
}

impl fmt::Debug for ActiveEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActiveEntry")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("state", &self.target.state_name())
            .finish()
    }
}

pub struct Session {
    transcript: Box<dyn Transcript>,
    slots: BTreeMap<SlotName, ActiveEntry>,
    started: usize,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("slots", &self.slots)
            .field("started", &self.started)
            .finish_non_exhaustive()
    }
}

impl Session {
    pub fn new(transcript: Box<dyn Transcript>) -> Self {
        Self {
            transcript,
            slots: BTreeMap::new(),
            started: 0,
        }
    }

    pub fn append(&mut self, line: impl AsRef<str>) {
        self.transcript.append(line.as_ref());
    }

    pub fn active(&self, slot: SlotName) -> Option<&ActiveEntry> {
        self.slots.get(slot)
    }

    /// Active entries, ordered by slot name.
    pub fn entries(&self) -> impl Iterator<Item = (SlotName, &ActiveEntry)> {
        self.slots.iter().map(|(slot, entry)| (*slot, entry))
    }

    pub fn is_idle(&self) -> bool {
        self.slots.is_empty()
    }

    /// Number of entries registered over the session's lifetime.
    pub fn started_total(&self) -> usize {
        self.started
    }

    /// Occupy `slot`. Hands the entry back if the slot is taken.
    pub fn register(&mut self, slot: SlotName, entry: ActiveEntry) -> Result<(), ActiveEntry> {
        if self.slots.contains_key(slot) {
            return Err(entry);
        }
        debug!(slot, op = %entry.id, label = %entry.label, "slot occupied");
        self.slots.insert(slot, entry);
        self.started += 1;
        Ok(())
    }

    /// Free whichever slot holds `id`.
    pub fn release(&mut self, id: OperationId) -> Option<ActiveEntry> {
        let slot = self
            .slots
            .iter()
            .find(|(_, entry)| entry.id == id)
            .map(|(slot, _)| *slot)?;
        debug!(slot, op = %id, "slot released");
        self.slots.remove(slot)
    }

    /// Render one delivered Event into the transcript; the terminal Event
    /// releases the entry's slot.
    pub fn apply_event(&mut self, event: &Event) {
        let label = self
            .slots
            .values()
            .find(|entry| entry.id == event.op)
            .map(|entry| entry.label.clone());

        let label = match label {
            Some(label) => label,
            None => {
                warn!(op = %event.op, seq = event.seq, "event for unknown operation");
                event.op.to_string()
            }
        };

        if let Some(line) = render_event(&label, &event.kind) {
            self.append(line);
        } else {
            debug!(op = %event.op, seq = event.seq, kind = ?event.kind, "state change");
        }

        if event.kind.is_terminal() {
            self.release(event.op);
        }
    }
}

/// Transcript line for one Event, if it has one.
pub fn render_event(label: &str, kind: &EventKind) -> Option<String> {
    match kind {
        EventKind::Stdout(line) => Some(format!("  {line}")),
        EventKind::Stderr(line) => Some(format!("  [stderr] {line}")),
        EventKind::StateChanged(_) => None,
        EventKind::Completed(summary) => Some(format!("{label} completed: {summary}")),
        EventKind::Failed(FailureReason::Cancelled) => Some(format!("{label} cancelled by operator")),
        EventKind::Failed(reason) => Some(format!("{label} failed: {reason}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::OperationState;
    use crate::transcript::MemoryTranscript;

    struct Dummy;

    impl Cancellable for Dummy {
        fn request_cancel(&self) -> bool {
            true
        }

        fn state_name(&self) -> String {
            "running".into()
        }
    }

    fn entry(id: OperationId, label: &str) -> ActiveEntry {
        ActiveEntry {
            id,
            label: label.into(),
            target: Arc::new(Dummy),
        }
    }

    #[test]
    fn one_entry_per_slot() {
        let mut session = Session::new(Box::new(MemoryTranscript::new()));
        let first = OperationId::next();

        assert!(session.register("interactive", entry(first, "Verification")).is_ok());
        let rejected = session
            .register("interactive", entry(OperationId::next(), "Mount"))
            .unwrap_err();
        assert_eq!(rejected.label, "Mount");
        assert_eq!(session.active("interactive").unwrap().id, first);
        assert_eq!(session.started_total(), 1);
    }

    #[test]
    fn terminal_event_renders_and_releases_the_slot() {
        let transcript = MemoryTranscript::new();
        let mut session = Session::new(Box::new(transcript.clone()));
        let id = OperationId::next();
        session.register("interactive", entry(id, "Verification")).unwrap();

        let events = [
            EventKind::StateChanged(OperationState::Running),
            EventKind::Stdout("Checking blocks 0 to 100".into()),
            EventKind::Stderr("Pass completed".into()),
            EventKind::Failed(FailureReason::Cancelled),
        ];
        for (seq, kind) in events.into_iter().enumerate() {
            session.apply_event(&Event {
                op: id,
                seq: seq as u64,
                kind,
            });
        }

        assert_eq!(
            transcript.lines(),
            vec![
                "  Checking blocks 0 to 100",
                "  [stderr] Pass completed",
                "Verification cancelled by operator",
            ]
        );
        assert!(session.is_idle());
    }

    #[test]
    fn failures_render_their_reason() {
        assert_eq!(
            render_event("Health test", &EventKind::Failed(FailureReason::Timeout)).unwrap(),
            "Health test failed: timed out"
        );
        assert_eq!(
            render_event("Mount", &EventKind::Completed("exit code 0".into())).unwrap(),
            "Mount completed: exit code 0"
        );
    }
}
