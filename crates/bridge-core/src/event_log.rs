//! Bounded in-memory log of raw event records, newest first.
//!
//! The log exists for replay/audit visibility and is independent of the
//! projection's derived state: backfilled events land here without ever
//! re-entering the reducer.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::events::EventRecord;

pub const DEFAULT_LOG_CAPACITY: usize = 500;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventLog {
    capacity: usize,
    entries: VecDeque<EventRecord>,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}

impl EventLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: VecDeque::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Newest-first view of the retained records.
    pub fn entries(&self) -> impl Iterator<Item = &EventRecord> {
        self.entries.iter()
    }

    pub fn contains(&self, event_type: &str, timestamp: DateTime<Utc>) -> bool {
        self.entries
            .iter()
            .any(|entry| entry.identity() == (event_type, timestamp))
    }

    /// Record a live event at the head, evicting the oldest past capacity.
    pub fn record(&mut self, event: EventRecord) {
        self.entries.push_front(event);
        while self.entries.len() > self.capacity {
            self.entries.pop_back();
        }
    }

    /// Merge gap-recovered events into the log. Events already present by
    /// `(type, timestamp)` identity are discarded; the combined log is
    /// re-sorted newest-first and truncated to capacity. Returns how many
    /// events were actually new.
    pub fn backfill(&mut self, events: Vec<EventRecord>) -> usize {
        let fresh: Vec<EventRecord> = events
            .into_iter()
            .filter(|event| !self.contains(&event.event_type, event.timestamp))
            .collect();
        let added = fresh.len();
        if added == 0 {
            return 0;
        }

        let mut combined: Vec<EventRecord> = self.entries.drain(..).collect();
        combined.extend(fresh);
        combined.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        combined.truncate(self.capacity);
        self.entries = combined.into();

        added
    }
}
