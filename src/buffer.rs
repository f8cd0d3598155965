//! # Pending-Event Buffer
//!
//! A mutex-protected, append-only list of `TimelineEvent`s awaiting
//! aggregation into an entity. `drain` moves all events out atomically and
//! leaves an empty buffer in their place, so no event is ever observed in
//! both the buffer and a posted entity.

use parking_lot::Mutex;

use crate::entity::TimelineEvent;

#[derive(Default)]
pub struct PendingEventBuffer {
    events: Mutex<Vec<TimelineEvent>>,
}

impl PendingEventBuffer {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }

    /// Append an event under lock, returning the buffer's new size.
    pub fn add_pending_event(&self, event: TimelineEvent) -> usize {
        let mut guard = self.events.lock();
        guard.push(event);
        guard.len()
    }

    /// Current size without draining.
    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Move all buffered events out under lock, resetting the buffer to
    /// empty. Returns the drained events in insertion order.
    pub fn drain(&self) -> Vec<TimelineEvent> {
        let mut guard = self.events.lock();
        std::mem::take(&mut *guard)
    }
}
