//! Viewports and per-entity broadcast sets
//!
//! Each player owns a viewport: a rectangle of half extents
//! `horizon_x`/`horizon_y` around the point it watches. Each observable
//! entity owns a subscriber set: the connections that were told the entity
//! entered their horizon and have not been told it left since.

use crate::connection_registry::ConnectionId;
use crate::world::EntityId;
use std::collections::{BTreeMap, BTreeSet, HashMap};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub conn: ConnectionId,
    pub horizon_x: f32,
    pub horizon_y: f32,
}

#[derive(Debug, Default)]
pub struct Viewports {
    views: BTreeMap<EntityId, Viewport>,
    subscribers: BTreeMap<EntityId, BTreeSet<ConnectionId>>,
    moved: BTreeSet<EntityId>,
}

impl Viewports {
    pub fn set_view(&mut self, player: EntityId, view: Viewport) {
        self.views.insert(player, view);
    }

    pub fn view(&self, player: EntityId) -> Option<&Viewport> {
        self.views.get(&player)
    }

    pub fn view_mut(&mut self, player: EntityId) -> Option<&mut Viewport> {
        self.views.get_mut(&player)
    }

    pub fn remove_view(&mut self, player: EntityId) -> Option<Viewport> {
        self.views.remove(&player)
    }

    pub fn views(&self) -> impl Iterator<Item = (&EntityId, &Viewport)> {
        self.views.iter()
    }

    pub fn subscribers(&self, id: EntityId) -> Option<&BTreeSet<ConnectionId>> {
        self.subscribers.get(&id)
    }

    /// Ids that currently have at least one subscriber.
    pub fn subscribed_ids(&self) -> Vec<EntityId> {
        self.subscribers.keys().copied().collect()
    }

    /// Stores the new subscriber set for `id` and returns the previous one.
    pub fn replace_subscribers(&mut self, id: EntityId, set: BTreeSet<ConnectionId>) -> BTreeSet<ConnectionId> {
        if set.is_empty() {
            self.subscribers.remove(&id).unwrap_or_default()
        } else {
            self.subscribers.insert(id, set).unwrap_or_default()
        }
    }

    /// Drops every subscription to `id`, returning who was subscribed.
    pub fn drop_entity(&mut self, id: EntityId) -> BTreeSet<ConnectionId> {
        self.moved.remove(&id);
        self.subscribers.remove(&id).unwrap_or_default()
    }

    /// Removes a closed connection from every subscriber set without notifying it.
    pub fn forget_connection(&mut self, conn: ConnectionId) {
        self.subscribers.retain(|_, set| {
            set.remove(&conn);
            !set.is_empty()
        });
    }

    pub fn mark_moved(&mut self, id: EntityId) {
        self.moved.insert(id);
    }

    pub fn take_moved(&mut self) -> BTreeSet<EntityId> {
        std::mem::take(&mut self.moved)
    }
}

/// Uniform bucket grid used to find what falls inside each viewport
/// without testing every entity against every viewer.
#[derive(Debug)]
pub struct SpatialGrid {
    cell_size: f32,
    cells: HashMap<(i32, i32), Vec<(EntityId, f32, f32)>>,
}

impl SpatialGrid {
    pub fn new(cell_size: f32) -> Self {
        Self {
            cell_size: cell_size.max(1.0),
            cells: HashMap::new(),
        }
    }

    fn cell_of(&self, x: f32, y: f32) -> (i32, i32) {
        (
            (x / self.cell_size).floor() as i32,
            (y / self.cell_size).floor() as i32,
        )
    }

    pub fn insert(&mut self, id: EntityId, x: f32, y: f32) {
        let cell = self.cell_of(x, y);
        self.cells.entry(cell).or_default().push((id, x, y));
    }

    /// Entities inside the rectangle centred on `(cx, cy)`, in ascending id order.
    pub fn query(&self, cx: f32, cy: f32, half_x: f32, half_y: f32) -> Vec<EntityId> {
        let (min_x, min_y) = self.cell_of(cx - half_x, cy - half_y);
        let (max_x, max_y) = self.cell_of(cx + half_x, cy + half_y);

        let mut found = Vec::new();
        for gx in min_x..=max_x {
            for gy in min_y..=max_y {
                let Some(bucket) = self.cells.get(&(gx, gy)) else {
                    continue;
                };
                for &(id, x, y) in bucket {
                    if (x - cx).abs() <= half_x && (y - cy).abs() <= half_y {
                        found.push(id);
                    }
                }
            }
        }
        found.sort_unstable();
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grid_query_respects_rectangle() {
        let mut grid = SpatialGrid::new(100.0);
        grid.insert(EntityId(1), 0.0, 0.0);
        grid.insert(EntityId(2), 150.0, 40.0);
        grid.insert(EntityId(3), 450.0, 0.0);
        grid.insert(EntityId(4), -90.0, -90.0);

        assert_eq!(
            grid.query(0.0, 0.0, 200.0, 100.0),
            vec![EntityId(1), EntityId(2), EntityId(4)]
        );
        assert_eq!(grid.query(0.0, 0.0, 50.0, 50.0), vec![EntityId(1)]);
        assert_eq!(grid.query(450.0, 0.0, 10.0, 10.0), vec![EntityId(3)]);
    }

    #[test]
    fn test_replace_returns_previous_and_drops_empty_sets() {
        let mut viewports = Viewports::default();
        let first: BTreeSet<_> = [ConnectionId(1), ConnectionId(2)].into_iter().collect();

        assert!(viewports.replace_subscribers(EntityId(9), first.clone()).is_empty());
        assert_eq!(
            viewports.replace_subscribers(EntityId(9), BTreeSet::new()),
            first
        );
        assert!(viewports.subscribers(EntityId(9)).is_none());
    }

    #[test]
    fn test_forget_connection_everywhere() {
        let mut viewports = Viewports::default();
        viewports.replace_subscribers(EntityId(1), [ConnectionId(1), ConnectionId(2)].into_iter().collect());
        viewports.replace_subscribers(EntityId(2), [ConnectionId(2)].into_iter().collect());

        viewports.forget_connection(ConnectionId(2));

        assert_eq!(viewports.subscribed_ids(), vec![EntityId(1)]);
        assert!(!viewports
            .subscribers(EntityId(1))
            .unwrap()
            .contains(&ConnectionId(2)));
    }

    #[test]
    fn test_moved_set_is_drained() {
        let mut viewports = Viewports::default();
        viewports.mark_moved(EntityId(3));
        viewports.mark_moved(EntityId(3));
        assert_eq!(viewports.take_moved().len(), 1);
        assert!(viewports.take_moved().is_empty());
    }
}
