//! Last known names of departed players

use super::EntityId;
use std::collections::HashMap;

/// Lets late events and chat logs resolve an id after its player left.
/// Entries are dropped once older than the retention window.
#[derive(Debug, Default)]
pub struct NameHistory {
    entries: HashMap<EntityId, (String, u64)>,
}

impl NameHistory {
    pub fn record(&mut self, id: EntityId, name: String, left_ms: u64) {
        self.entries.insert(id, (name, left_ms));
    }

    pub fn name_of(&self, id: EntityId) -> Option<&str> {
        self.entries.get(&id).map(|(name, _)| name.as_str())
    }

    /// Removes entries older than `retention_ms`, returning how many were dropped.
    pub fn sweep(&mut self, now_ms: u64, retention_ms: u64) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, (_, left_ms)| *left_ms + retention_ms > now_ms);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
