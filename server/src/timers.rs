//! Deadline queue for per-connection liveness timers
//!
//! Timers never call back into the simulation. The game loop pops expired
//! entries and turns each into a `TimerExpired` event on the bus.

use crate::connection_registry::ConnectionId;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TimerKind {
    Login,
    Ack,
    Backup,
    Pong,
    /// Closes a connection after a graceful break.
    Break,
}

/// Identifies one scheduled deadline. Stored in the connection it belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerHandle {
    pub deadline: u64,
    seq: u64,
}

#[derive(Debug, Default)]
pub struct Timers {
    queue: BTreeMap<TimerHandle, (ConnectionId, TimerKind)>,
    next_seq: u64,
}

impl Timers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, conn: ConnectionId, kind: TimerKind, deadline: u64) -> TimerHandle {
        let handle = TimerHandle {
            deadline,
            seq: self.next_seq,
        };
        self.next_seq += 1;
        self.queue.insert(handle, (conn, kind));
        handle
    }

    /// Returns false if the timer already fired or was cancelled.
    pub fn cancel(&mut self, handle: TimerHandle) -> bool {
        self.queue.remove(&handle).is_some()
    }

    /// Removes and returns every timer due at `now`, earliest first.
    pub fn pop_expired(&mut self, now: u64) -> Vec<(TimerHandle, ConnectionId, TimerKind)> {
        let mut expired = Vec::new();
        while let Some((&handle, _)) = self.queue.first_key_value() {
            if handle.deadline > now {
                break;
            }
            if let Some((conn, kind)) = self.queue.remove(&handle) {
                expired.push((handle, conn, kind));
            }
        }
        expired
    }

    pub fn next_deadline(&self) -> Option<u64> {
        self.queue.keys().next().map(|h| h.deadline)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
