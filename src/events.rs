// Event queue - bounded queue of window/input events
//
// The window layer pushes events in, the frame loop drains them once per
// iteration. Single-threaded, so a plain VecDeque is enough.

use std::collections::VecDeque;

/// Keys the engine reacts to. Everything else is carried through as `Other`
/// so the frame loop can log and ignore it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Escape,
    Space,
    Other(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Resize { width: u32, height: u32 },
    Close,
    KeyPress(Key),
    KeyRelease(Key),
}

/// Bounded event queue. Events arriving while the queue is full are dropped
/// with a warning rather than blocking the window thread.
pub struct EventQueue {
    events: VecDeque<Event>,
    capacity: usize,
}

pub const DEFAULT_EVENT_CAPACITY: usize = 32;

impl EventQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Push an event, returning false (and dropping it) if the queue is full.
    pub fn push(&mut self, event: Event) -> bool {
        if self.events.len() >= self.capacity {
            log::warn!("Event queue full ({}), dropping {:?}", self.capacity, event);
            return false;
        }
        self.events.push_back(event);
        true
    }

    pub fn has_events(&self) -> bool {
        !self.events.is_empty()
    }

    pub fn pop(&mut self) -> Option<Event> {
        self.events.pop_front()
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}
