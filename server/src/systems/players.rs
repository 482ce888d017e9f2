//! Player lifecycle: announcements, respawn, ship and team changes

use super::System;
use crate::events::{Dispatcher, Event, EventKind};
use crate::game::Context;
use crate::world::components::{Flag, Health, HitCircles, Name, Position, Rotation, Ship, Spectate, Team};
use crate::world::{EntityId, EntityKind};
use log::{debug, error, info};
use rand::Rng;
use shared::{PlayerSummary, ServerPacket, ShipType};

/// Half the side of the square around the origin where players spawn.
pub const SPAWN_RADIUS: f32 = 1024.0;

pub fn system() -> System {
    System::new("players")
        .on(EventKind::PlayerCreated, on_created)
        .on(EventKind::PlayerDestroyed, on_destroyed)
        .on(EventKind::PlayerRespawn, on_respawn)
        .on(EventKind::PlayerReteam, on_reteam)
        .on(EventKind::PlayerSpectate, on_spectate)
}

pub fn spawn_point() -> Position {
    let mut rng = rand::thread_rng();
    Position {
        x: rng.gen_range(-SPAWN_RADIUS..SPAWN_RADIUS),
        y: rng.gen_range(-SPAWN_RADIUS..SPAWN_RADIUS),
    }
}

pub fn summary(ctx: &Context, player: EntityId) -> Option<PlayerSummary> {
    let world = &ctx.world;
    Some(PlayerSummary {
        id: player.0,
        name: world.component::<Name>(player)?.0.clone(),
        flag: world
            .component::<Flag>(player)
            .map(|f| f.0.clone())
            .unwrap_or_default(),
        team: world.component::<Team>(player).map_or(0, |t| t.0),
        ship: world
            .component::<Ship>(player)
            .map_or(ShipType::Predator, |s| s.0),
    })
}

/// Summaries of every player, ascending by id.
pub fn roster(ctx: &Context) -> Vec<PlayerSummary> {
    ctx.world
        .ids_of(EntityKind::Player)
        .into_iter()
        .filter_map(|id| summary(ctx, id))
        .collect()
}

/// Announces the player's removal to every system, then drops the entity.
pub fn remove_player(ctx: &mut Context, bus: &Dispatcher, player: EntityId) {
    if ctx.world.kind_of(player) != Some(EntityKind::Player) {
        return;
    }
    bus.emit(ctx, Event::PlayerDestroyed { player });

    if let Some(Name(name)) = ctx.world.component::<Name>(player).cloned() {
        ctx.history.record(player, name, ctx.now_ms);
    }
    match ctx.world.destroy(player, ctx.now_ms) {
        Ok(_) => info!("Player {} removed", player),
        Err(e) => error!("Failed to remove player {}: {}", player, e),
    }
}

fn on_created(ctx: &mut Context, _: &Dispatcher, event: &Event) {
    let Event::PlayerCreated { player } = event else {
        return;
    };
    // The player may have left before the announcement was flushed.
    let Some(summary) = summary(ctx, *player) else {
        debug!("Skipping announcement of departed player {}", player);
        return;
    };
    ctx.broadcast(ServerPacket::PlayerNew(summary));
}

fn on_destroyed(ctx: &mut Context, _: &Dispatcher, event: &Event) {
    let Event::PlayerDestroyed { player } = event else {
        return;
    };
    ctx.broadcast(ServerPacket::PlayerLeave { id: player.0 });
}

fn on_respawn(ctx: &mut Context, _: &Dispatcher, event: &Event) {
    let Event::PlayerRespawn { player, ship } = event else {
        return;
    };
    let player = *player;
    if ctx.world.kind_of(player) != Some(EntityKind::Player) {
        return;
    }

    if let Err(e) = respawn(ctx, player, *ship) {
        error!("Respawn of {} failed: {}", player, e);
    }
}

fn respawn(ctx: &mut Context, player: EntityId, ship: Option<ShipType>) -> Result<(), crate::error::WorldError> {
    ctx.world.detach::<Spectate>(player)?;

    if let Some(ship) = ship {
        let previous = ctx.world.attach(player, Ship(ship))?;
        if previous != Some(Ship(ship)) {
            ctx.world.attach(player, HitCircles::for_ship(ship))?;
            ctx.broadcast(ServerPacket::PlayerType { id: player.0, ship });
        }
    }

    let spawn = spawn_point();
    ctx.world.attach(player, spawn)?;
    ctx.world.attach(player, Rotation(0.0))?;
    ctx.world.attach(player, Health(1.0))?;
    ctx.viewports.mark_moved(player);
    ctx.broadcast(ServerPacket::PlayerRespawn {
        id: player.0,
        x: spawn.x,
        y: spawn.y,
    });
    Ok(())
}

fn on_reteam(ctx: &mut Context, _: &Dispatcher, event: &Event) {
    let Event::PlayerReteam { player, team } = event else {
        return;
    };
    if ctx.world.attach(*player, Team(*team)).is_err() {
        return;
    }
    ctx.broadcast(ServerPacket::PlayerReteam {
        id: player.0,
        team: *team,
    });
}

fn on_spectate(ctx: &mut Context, _: &Dispatcher, event: &Event) {
    let Event::PlayerSpectate { player, target } = event else {
        return;
    };
    if ctx.world.kind_of(*player) != Some(EntityKind::Player) {
        return;
    }
    let target = target.filter(|t| *t != *player && ctx.world.kind_of(*t) == Some(EntityKind::Player));

    if ctx.world.attach(*player, Spectate { target }).is_ok() {
        debug!("Player {} spectating {:?}", player, target);
    }
}
