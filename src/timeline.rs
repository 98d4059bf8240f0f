//! Newest-first event collection with id deduplication.

use std::collections::{HashSet, VecDeque};

use crate::model::Event;

/// Ordered view of a session's captured events, most recent first.
///
/// No two events with the same id are held at once.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Timeline {
    events: VecDeque<Event>,
    seen: HashSet<String>,
}

impl Timeline {
    /// Empty timeline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a timeline from a server-ordered list. See [`Timeline::replace`].
    pub fn from_events(events: Vec<Event>) -> Self {
        let mut timeline = Self::new();
        timeline.replace(events);
        timeline
    }

    /// Inserts `event` at the head. Returns `false` when its id is already
    /// present, leaving the timeline unchanged.
    pub fn prepend(&mut self, event: Event) -> bool {
        if !self.seen.insert(event.id.clone()) {
            return false;
        }
        self.events.push_front(event);
        true
    }

    /// Replaces the contents with `events` in the given order.
    ///
    /// Later duplicates of an id already taken from the list are dropped.
    pub fn replace(&mut self, events: Vec<Event>) {
        self.clear();
        for event in events {
            if self.seen.insert(event.id.clone()) {
                self.events.push_back(event);
            }
        }
    }

    /// Drops every event and forgets their ids.
    pub fn clear(&mut self) {
        self.events.clear();
        self.seen.clear();
    }

    /// Whether an event with `id` is held.
    pub fn contains(&self, id: &str) -> bool {
        self.seen.contains(id)
    }

    /// Number of events held.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether no events are held.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Events, most recent first.
    pub fn iter(&self) -> impl Iterator<Item = &Event> {
        self.events.iter()
    }

    /// Owned copy of the events, most recent first.
    pub fn to_vec(&self) -> Vec<Event> {
        self.events.iter().cloned().collect()
    }
}
