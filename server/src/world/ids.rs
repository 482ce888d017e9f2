//! Entity id allocation with a retention window before reuse

use super::{EntityId, EntityKind};
use crate::error::WorldError;
use std::collections::VecDeque;
use std::ops::RangeInclusive;

/// The numeric range reserved for each entity kind.
pub fn id_range(kind: EntityKind) -> RangeInclusive<u32> {
    match kind {
        EntityKind::Player => 1..=1023,
        EntityKind::Mob => 1024..=32767,
        EntityKind::Powerup => 32768..=65535,
    }
}

/// Hands out ids from one partition of the id space.
///
/// Released ids wait in `retained` until `retention_ms` has elapsed, so
/// stale references to an old owner can age out before the id means
/// something else.
#[derive(Debug)]
pub struct IdSpace {
    kind: EntityKind,
    next: u32,
    last: u32,
    free: VecDeque<u32>,
    retained: VecDeque<(u32, u64)>,
    retention_ms: u64,
}

impl IdSpace {
    pub fn new(kind: EntityKind, retention_ms: u64) -> Self {
        let range = id_range(kind);
        Self {
            kind,
            next: *range.start(),
            last: *range.end(),
            free: VecDeque::new(),
            retained: VecDeque::new(),
            retention_ms,
        }
    }

    pub fn allocate(&mut self, now_ms: u64) -> Result<EntityId, WorldError> {
        self.reclaim(now_ms);

        if self.next <= self.last {
            let id = self.next;
            self.next += 1;
            return Ok(EntityId(id));
        }

        self.free
            .pop_front()
            .map(EntityId)
            .ok_or(WorldError::IdSpaceExhausted(self.kind))
    }

    pub fn release(&mut self, id: EntityId, now_ms: u64) {
        self.retained.push_back((id.0, now_ms));
    }

    /// Moves every id whose retention window has passed back to the free list.
    /// Returns how many ids became reusable.
    pub fn reclaim(&mut self, now_ms: u64) -> usize {
        let mut reclaimed = 0;
        while let Some(&(id, released_at)) = self.retained.front() {
            if released_at + self.retention_ms > now_ms {
                break;
            }
            self.retained.pop_front();
            self.free.push_back(id);
            reclaimed += 1;
        }
        reclaimed
    }

    pub fn retained_len(&self) -> usize {
        self.retained.len()
    }
}
