// sink.rs - Where audit events go.
//
// The permission manager does not care whether events land in a file or a
// buffer; it writes through `AuditSink`. `MemoryAuditSink` is cheap to
// clone: every clone shares the same buffer, so a caller can hand one clone
// to a permission manager and keep another to read the trail.

use std::sync::{Arc, Mutex};

use crate::error::AuditError;
use crate::event::AuditEvent;
use crate::hasher;

/// Destination for audit events.
pub trait AuditSink: Send {
    /// Record an event. Implementations set `previous_hash` to chain events.
    fn record(&mut self, event: &mut AuditEvent) -> Result<(), AuditError>;
}

#[derive(Default)]
struct MemoryState {
    events: Vec<AuditEvent>,
    last_hash: Option<String>,
}

/// In-memory, hash-chained audit buffer.
#[derive(Clone, Default)]
pub struct MemoryAuditSink {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the recorded events, oldest first.
    pub fn events(&self) -> Vec<AuditEvent> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.events.clone()
    }

    pub fn len(&self) -> usize {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&mut self, event: &mut AuditEvent) -> Result<(), AuditError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        event.previous_hash = state.last_hash.clone();
        let json = serde_json::to_string(event)?;
        state.last_hash = Some(hasher::hash_str(&json));
        state.events.push(event.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::AuditAction;

    #[test]
    fn clones_share_one_buffer() {
        let reader = MemoryAuditSink::new();
        let mut writer: Box<dyn AuditSink> = Box::new(reader.clone());

        let mut event = AuditEvent::new("focus-keeper", AuditAction::ConsentRequested);
        writer.record(&mut event).unwrap();
        let mut event = AuditEvent::new("focus-keeper", AuditAction::ConsentDecision);
        writer.record(&mut event).unwrap();

        let events = reader.events();
        assert_eq!(events.len(), 2);
        assert!(events[0].previous_hash.is_none());
        assert!(events[1].previous_hash.is_some());
    }

    #[test]
    fn starts_empty() {
        assert!(MemoryAuditSink::new().is_empty());
    }
}
