//! Event log for one recording session
//!
//! The log is append-only while recording and immutable afterwards.
//! Events are always kept in non-decreasing timestamp order, which lets
//! per-frame selection use binary search.

pub mod codec;

use crate::capture::input::types::{InputEvent, Timestamp};
use serde::{Deserialize, Serialize};

pub use codec::{FormatError, FormatErrorKind, LoadReport, MalformedPolicy};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventLog {
    events: Vec<InputEvent>,
}

/// Returned by [`EventLog::push`] when an event would break ordering
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("event at {event} is older than the last logged event at {last}")]
pub struct OutOfOrder {
    pub event: Timestamp,
    pub last: Timestamp,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a log from events in any order. Equal timestamps keep their
    /// relative order.
    pub fn from_events(mut events: Vec<InputEvent>) -> Self {
        events.sort_by_key(|e| e.timestamp);
        Self { events }
    }

    pub fn push(&mut self, event: InputEvent) -> Result<(), OutOfOrder> {
        if let Some(last) = self.events.last() {
            if event.timestamp < last.timestamp {
                return Err(OutOfOrder {
                    event: event.timestamp,
                    last: last.timestamp,
                });
            }
        }
        self.events.push(event);
        Ok(())
    }

    pub fn events(&self) -> &[InputEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, InputEvent> {
        self.events.iter()
    }

    pub fn into_events(self) -> Vec<InputEvent> {
        self.events
    }

    pub fn duration(&self) -> Timestamp {
        self.events.last().map(|e| e.timestamp).unwrap_or_default()
    }

    /// Index of the first event strictly after `t`
    pub fn index_after(&self, t: Timestamp) -> usize {
        self.events.partition_point(|e| e.timestamp <= t)
    }

    /// Events in `(after, until]`; `after = None` selects everything up to
    /// and including `until`.
    pub fn window(&self, after: Option<Timestamp>, until: Timestamp) -> &[InputEvent] {
        let start = after.map_or(0, |a| self.index_after(a));
        let end = self.index_after(until);
        if start >= end {
            return &[];
        }
        &self.events[start..end]
    }
}

impl<'a> IntoIterator for &'a EventLog {
    type Item = &'a InputEvent;
    type IntoIter = std::slice::Iter<'a, InputEvent>;

    fn into_iter(self) -> Self::IntoIter {
        self.events.iter()
    }
}
