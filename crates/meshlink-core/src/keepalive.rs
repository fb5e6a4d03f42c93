//! Periodic keepalive schedule.
//!
//! Every open device connection receives [`ControlFrame::Keepalive`] on a
//! fixed interval. Sends are fire-and-forget: no acknowledgment, no retry.
//!
//! [`ControlFrame::Keepalive`]: meshlink_proto::ControlFrame::Keepalive

use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

/// Next keepalive deadline per connection.
#[derive(Debug, Clone)]
pub struct KeepaliveSchedule {
    interval: Duration,
    next: HashMap<String, Instant>,
}

impl KeepaliveSchedule {
    /// Create an empty schedule.
    pub fn new(interval: Duration) -> Self {
        Self { interval, next: HashMap::new() }
    }

    /// Start sending keepalives on `peer_id`, first one after one interval.
    pub fn start(&mut self, peer_id: &str, now: Instant) {
        self.next.insert(peer_id.to_string(), now + self.interval);
    }

    /// Stop sending keepalives on `peer_id`.
    pub fn stop(&mut self, peer_id: &str) -> bool {
        self.next.remove(peer_id).is_some()
    }

    /// Connections whose keepalive is due at `now`, sorted by peer id.
    ///
    /// Each returned connection is rescheduled one interval after `now`, so a
    /// late tick sends one keepalive rather than a burst.
    pub fn due(&mut self, now: Instant) -> Vec<String> {
        let mut due: Vec<String> = self
            .next
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(peer_id, _)| peer_id.clone())
            .collect();
        due.sort();

        for peer_id in &due {
            self.next.insert(peer_id.clone(), now + self.interval);
        }

        due
    }

    /// Number of scheduled connections.
    pub fn len(&self) -> usize {
        self.next.len()
    }

    /// Whether no connection is scheduled.
    pub fn is_empty(&self) -> bool {
        self.next.is_empty()
    }
}
