//! Per-subscriber queue of pending NOTIFY payloads.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

/// One event waiting for delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedEvent {
    pub event_key: u32,
    /// Serialized property set
    pub body: Arc<str>,
    pub queued_at: Instant,
}

/// Bounded FIFO of events for one subscriber.
///
/// The head may be in flight; it stays in the queue until
/// [`EventQueue::complete`] is called and is never evicted meanwhile, so
/// the next delivery cannot overtake it. The length limit is at least two:
/// the in-flight head plus one waiting event.
#[derive(Debug)]
pub struct EventQueue {
    entries: VecDeque<QueuedEvent>,
    max_len: usize,
    max_age: Duration,
    in_flight: bool,
}

impl EventQueue {
    pub fn new(max_len: usize, max_age: Duration) -> Self {
        Self {
            entries: VecDeque::new(),
            max_len: max_len.max(2),
            max_age,
            in_flight: false,
        }
    }

    /// Append an event, evicting the oldest one not in flight when full.
    /// Returns the evicted event key.
    pub fn push(&mut self, event: QueuedEvent) -> Option<u32> {
        let mut evicted = None;
        if self.entries.len() >= self.max_len {
            let victim = usize::from(self.in_flight);
            evicted = self.entries.remove(victim).map(|e| e.event_key);
            if let Some(event_key) = evicted {
                debug!(event_key, "event queue full, evicting oldest");
            }
        }
        self.entries.push_back(event);
        evicted
    }

    /// Claim the head for delivery, first skipping entries older than the
    /// age limit. `None` when empty or when the head is already in flight.
    pub fn next_deliverable(&mut self, now: Instant) -> Option<QueuedEvent> {
        if self.in_flight {
            return None;
        }
        while let Some(head) = self.entries.front() {
            if now.saturating_duration_since(head.queued_at) <= self.max_age {
                break;
            }
            debug!(event_key = head.event_key, "skipping stale event");
            self.entries.pop_front();
        }
        let head = self.entries.front()?.clone();
        self.in_flight = true;
        Some(head)
    }

    /// Release the in-flight head, delivered or not.
    pub fn complete(&mut self) {
        if self.in_flight {
            self.entries.pop_front();
            self.in_flight = false;
        }
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> Vec<u32> {
        self.entries.iter().map(|e| e.event_key).collect()
    }
}
