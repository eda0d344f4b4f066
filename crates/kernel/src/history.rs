use crate::constraints::Violation;
use crate::delta::StateDelta;
use crate::state::SimulationState;
use scenario_common::{EventId, Timestamp};
use serde::{Deserialize, Serialize};

/// Immutable record of one action attempt, committed or rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEvent {
    pub event_id: EventId,
    pub timestamp: Timestamp,
    pub action_name: String,
    pub params: serde_json::Value,
    pub before: SimulationState,
    pub after: SimulationState,
    pub delta: StateDelta,
    pub success: bool,
    pub message: String,
    #[serde(default)]
    pub violations: Vec<Violation>,
}

/// Append-only audit log.
///
/// Entries are never edited. The only removal is a full clear on reset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct History {
    events: Vec<HistoryEvent>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_events(events: Vec<HistoryEvent>) -> Self {
        Self { events }
    }

    pub(crate) fn append(&mut self, event: HistoryEvent) {
        self.events.push(event);
    }

    pub(crate) fn clear(&mut self) {
        self.events.clear();
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Every event, oldest first.
    pub fn events(&self) -> &[HistoryEvent] {
        &self.events
    }

    /// The most recent `limit` events, oldest first. `None` returns all.
    pub fn recent(&self, limit: Option<usize>) -> &[HistoryEvent] {
        match limit {
            Some(n) => &self.events[self.events.len().saturating_sub(n)..],
            None => &self.events,
        }
    }

    pub fn get(&self, event_id: EventId) -> Option<&HistoryEvent> {
        self.events.iter().find(|e| e.event_id == event_id)
    }
}
