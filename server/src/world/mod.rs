//! World store: every entity and its attached components
//!
//! The store holds data only. All reads and writes happen from inside an
//! event handler on the simulation task, so nothing here is synchronized.
//! Removing an entity never removes entities that refer to it; the systems
//! owning those references clean them up on `PlayerDestroyed` or despawn.

pub mod components;
pub mod history;
pub mod ids;

use crate::error::WorldError;
use components::Component;
use ids::IdSpace;
use log::error;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId(pub u32);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Player,
    Mob,
    Powerup,
}

/// An id plus whatever components are currently attached to it.
pub struct Entity {
    pub id: EntityId,
    pub kind: EntityKind,
    components: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl Entity {
    fn new(id: EntityId, kind: EntityKind) -> Self {
        Self {
            id,
            kind,
            components: HashMap::new(),
        }
    }

    pub fn get<C: Component>(&self) -> Option<&C> {
        self.components
            .get(&TypeId::of::<C>())
            .and_then(|c| c.downcast_ref::<C>())
    }

    pub fn has<C: Component>(&self) -> bool {
        self.components.contains_key(&TypeId::of::<C>())
    }

    pub fn component_count(&self) -> usize {
        self.components.len()
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entity")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("components", &self.components.len())
            .finish()
    }
}

/// Owns every live entity and the id partitions they are drawn from.
pub struct World {
    entities: HashMap<EntityId, Entity>,
    players: IdSpace,
    mobs: IdSpace,
    powerups: IdSpace,
}

impl World {
    /// Creates an empty world whose released ids wait `id_retention_ms`
    /// before reuse.
    pub fn new(id_retention_ms: u64) -> Self {
        Self {
            entities: HashMap::new(),
            players: IdSpace::new(EntityKind::Player, id_retention_ms),
            mobs: IdSpace::new(EntityKind::Mob, id_retention_ms),
            powerups: IdSpace::new(EntityKind::Powerup, id_retention_ms),
        }
    }

    /// Uses a separate retention window for player ids.
    pub fn with_player_retention(mut self, retention_ms: u64) -> Self {
        self.players = IdSpace::new(EntityKind::Player, retention_ms);
        self
    }

    fn space(&mut self, kind: EntityKind) -> &mut IdSpace {
        match kind {
            EntityKind::Player => &mut self.players,
            EntityKind::Mob => &mut self.mobs,
            EntityKind::Powerup => &mut self.powerups,
        }
    }

    /// Gets an entity by id
    pub fn get(&self, id: EntityId) -> Result<&Entity, WorldError> {
        self.entities.get(&id).ok_or(WorldError::NotFound(id))
    }

    /// Returns true if the entity exists
    pub fn has(&self, id: EntityId) -> bool {
        self.entities.contains_key(&id)
    }

    /// Kind of a live entity, None once it is gone
    pub fn kind_of(&self, id: EntityId) -> Option<EntityKind> {
        self.entities.get(&id).map(|e| e.kind)
    }

    /// Creates an empty entity with a fresh id drawn from `kind`'s partition.
    pub fn create(&mut self, kind: EntityKind, now_ms: u64) -> Result<EntityId, WorldError> {
        let id = self.space(kind).allocate(now_ms)?;
        self.insert(id, kind)?;
        Ok(id)
    }

    /// Inserts an entity under a caller-chosen id.
    pub fn insert(&mut self, id: EntityId, kind: EntityKind) -> Result<(), WorldError> {
        if self.entities.contains_key(&id) {
            error!("Refusing to create {} twice", id);
            return Err(WorldError::AlreadyExists(id));
        }
        self.entities.insert(id, Entity::new(id, kind));
        Ok(())
    }

    /// Removes the entity with all its components and starts the id's retention window.
    pub fn destroy(&mut self, id: EntityId, now_ms: u64) -> Result<Entity, WorldError> {
        let entity = self.entities.remove(&id).ok_or(WorldError::NotFound(id))?;
        self.space(entity.kind).release(id, now_ms);
        Ok(entity)
    }

    /// Attaches a component, returning the one it replaced.
    pub fn attach<C: Component>(&mut self, id: EntityId, component: C) -> Result<Option<C>, WorldError> {
        let entity = self.entities.get_mut(&id).ok_or(WorldError::NotFound(id))?;
        let previous = entity
            .components
            .insert(TypeId::of::<C>(), Box::new(component))
            .and_then(|old| old.downcast::<C>().ok())
            .map(|old| *old);
        Ok(previous)
    }

    /// Removes a component, returning it if it was attached.
    pub fn detach<C: Component>(&mut self, id: EntityId) -> Result<Option<C>, WorldError> {
        let entity = self.entities.get_mut(&id).ok_or(WorldError::NotFound(id))?;
        Ok(entity
            .components
            .remove(&TypeId::of::<C>())
            .and_then(|old| old.downcast::<C>().ok())
            .map(|old| *old))
    }

    /// Borrows `C` on `id`, if both exist
    pub fn component<C: Component>(&self, id: EntityId) -> Option<&C> {
        self.entities.get(&id).and_then(|e| e.get::<C>())
    }

    pub fn component_mut<C: Component>(&mut self, id: EntityId) -> Option<&mut C> {
        self.entities
            .get_mut(&id)
            .and_then(|e| e.components.get_mut(&TypeId::of::<C>()))
            .and_then(|c| c.downcast_mut::<C>())
    }

    pub fn has_component<C: Component>(&self, id: EntityId) -> bool {
        self.entities.get(&id).is_some_and(|e| e.has::<C>())
    }

    /// Ids of every entity carrying `C`, in ascending order.
    pub fn ids_with<C: Component>(&self) -> Vec<EntityId> {
        let mut ids: Vec<EntityId> = self
            .entities
            .values()
            .filter(|e| e.has::<C>())
            .map(|e| e.id)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Ids of every entity of `kind`, in ascending order.
    pub fn ids_of(&self, kind: EntityKind) -> Vec<EntityId> {
        let mut ids: Vec<EntityId> = self
            .entities
            .values()
            .filter(|e| e.kind == kind)
            .map(|e| e.id)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Number of live entities of `kind`
    pub fn count(&self, kind: EntityKind) -> usize {
        self.entities.values().filter(|e| e.kind == kind).count()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Makes ids whose retention window has passed reusable again.
    pub fn reclaim_ids(&mut self, now_ms: u64) -> usize {
        self.players.reclaim(now_ms) + self.mobs.reclaim(now_ms) + self.powerups.reclaim(now_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::components::{Health, HitCircles, Name, Position, Ship};
    use super::*;
    use shared::ShipType;

    #[test]
    fn test_create_and_get() {
        let mut world = World::new(1000);
        let id = world.create(EntityKind::Player, 0).unwrap();

        assert!(world.has(id));
        assert_eq!(world.get(id).unwrap().kind, EntityKind::Player);
        assert_eq!(world.count(EntityKind::Player), 1);
        assert_eq!(world.count(EntityKind::Mob), 0);
    }

    #[test]
    fn test_get_missing_entity_fails() {
        let world = World::new(1000);
        assert_eq!(
            world.get(EntityId(5)).unwrap_err(),
            WorldError::NotFound(EntityId(5))
        );
        assert!(!world.has(EntityId(5)));
    }

    #[test]
    fn test_double_creation_is_rejected() {
        let mut world = World::new(1000);
        world.insert(EntityId(40), EntityKind::Player).unwrap();
        world.attach(EntityId(40), Health(1.0)).unwrap();

        assert_eq!(
            world.insert(EntityId(40), EntityKind::Mob),
            Err(WorldError::AlreadyExists(EntityId(40)))
        );
        // Original entity is untouched.
        assert_eq!(world.kind_of(EntityId(40)), Some(EntityKind::Player));
        assert_eq!(world.component::<Health>(EntityId(40)), Some(&Health(1.0)));
    }

    #[test]
    fn test_attach_detach_components() {
        let mut world = World::new(1000);
        let id = world.create(EntityKind::Player, 0).unwrap();

        assert_eq!(world.attach(id, Position { x: 1.0, y: 2.0 }).unwrap(), None);
        world.attach(id, Name("ace".to_string())).unwrap();
        assert_eq!(
            world.attach(id, Position { x: 3.0, y: 4.0 }).unwrap(),
            Some(Position { x: 1.0, y: 2.0 })
        );
        assert_eq!(world.get(id).unwrap().component_count(), 2);

        world.component_mut::<Position>(id).unwrap().x = 9.0;
        assert_eq!(world.component::<Position>(id).unwrap().x, 9.0);

        let removed = world.detach::<Name>(id).unwrap();
        assert_eq!(removed, Some(Name("ace".to_string())));
        assert!(!world.has_component::<Name>(id));
        assert_eq!(world.detach::<Name>(id).unwrap(), None);
    }

    #[test]
    fn test_ship_change_swaps_geometry() {
        let mut world = World::new(1000);
        let id = world.create(EntityKind::Player, 0).unwrap();
        world.attach(id, Ship(ShipType::Predator)).unwrap();
        world.attach(id, HitCircles::for_ship(ShipType::Predator)).unwrap();

        world.attach(id, Ship(ShipType::Goliath)).unwrap();
        let old = world.attach(id, HitCircles::for_ship(ShipType::Goliath)).unwrap();

        assert_eq!(old, Some(HitCircles::for_ship(ShipType::Predator)));
        assert_eq!(
            world.component::<HitCircles>(id).unwrap().0.len(),
            ShipType::Goliath.hit_circles().len()
        );
    }

    #[test]
    fn test_destroy_removes_components_and_retains_id() {
        let mut world = World::new(1000);
        let id = world.create(EntityKind::Player, 0).unwrap();
        world.attach(id, Health(1.0)).unwrap();

        let entity = world.destroy(id, 10).unwrap();
        assert_eq!(entity.get::<Health>(), Some(&Health(1.0)));
        assert!(!world.has(id));
        assert!(world.component::<Health>(id).is_none());
        assert_eq!(world.destroy(id, 10).unwrap_err(), WorldError::NotFound(id));
        assert!(world.attach(id, Health(0.5)).is_err());

        assert_eq!(world.reclaim_ids(500), 0);
        assert_eq!(world.reclaim_ids(1010), 1);
    }

    #[test]
    fn test_queries_are_sorted() {
        let mut world = World::new(1000);
        let a = world.create(EntityKind::Player, 0).unwrap();
        let m = world.create(EntityKind::Mob, 0).unwrap();
        let b = world.create(EntityKind::Player, 0).unwrap();
        world.attach(b, Health(1.0)).unwrap();
        world.attach(m, Health(1.0)).unwrap();

        assert_eq!(world.ids_of(EntityKind::Player), vec![a, b]);
        assert_eq!(world.ids_with::<Health>(), vec![b, m]);
        assert_eq!(world.len(), 3);
    }
}
