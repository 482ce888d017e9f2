//! Plain data records attached to entities

use super::EntityId;
use shared::{MobKind, ShipType};
use std::any::Any;
use std::collections::BTreeSet;

/// Marker for types that may be attached to an entity.
pub trait Component: Any + Send + Sync {}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rotation(pub f32);

#[derive(Debug, Clone, PartialEq)]
pub struct Name(pub String);

#[derive(Debug, Clone, PartialEq)]
pub struct Flag(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Team(pub u16);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ship(pub ShipType);

/// Collision geometry of the current ship; swapped whenever the ship changes.
#[derive(Debug, Clone, PartialEq)]
pub struct HitCircles(pub Vec<(f32, f32, f32)>);

impl HitCircles {
    pub fn for_ship(ship: ShipType) -> Self {
        Self(ship.hit_circles().to_vec())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Health(pub f32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Score {
    pub value: u32,
    pub kills: u32,
    pub deaths: u32,
}

/// A spectating player. Spectators are hidden from every horizon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Spectate {
    pub target: Option<EntityId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mob {
    pub kind: MobKind,
    pub owner: Option<EntityId>,
}

/// Players that voted to mute this player.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MuteVotes(pub BTreeSet<EntityId>);

impl Component for Position {}
impl Component for Rotation {}
impl Component for Name {}
impl Component for Flag {}
impl Component for Team {}
impl Component for Ship {}
impl Component for HitCircles {}
impl Component for Health {}
impl Component for Score {}
impl Component for Spectate {}
impl Component for Mob {}
impl Component for MuteVotes {}
