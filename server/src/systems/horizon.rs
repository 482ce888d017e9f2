//! Visibility: who sees which entity
//!
//! Every tick each viewport is matched against a spatial grid of the
//! observable entities. Connections that start seeing an entity get its
//! state right away. Connections that stop seeing one are told so through
//! the horizon channel, which is flushed only after every viewport has been
//! recomputed. Spectating players are not observable and drop out of every
//! subscriber set without a leave notice. A player never subscribes to itself.

use super::{login, System};
use crate::connection_registry::ConnectionId;
use crate::events::{Channel, Dispatcher, Event, EventKind};
use crate::game::Context;
use crate::outbox::Recipients;
use crate::viewport::{SpatialGrid, Viewport};
use crate::world::components::{Mob, Position, Rotation, Spectate};
use crate::world::{EntityId, EntityKind};
use log::{debug, error, trace};
use shared::{LeaveKind, ServerPacket};
use std::collections::{BTreeMap, BTreeSet};

pub fn system() -> System {
    System::new("horizon")
        .on(EventKind::Horizon, on_horizon)
        .on(EventKind::EntityMoved, on_moved)
        .on(EventKind::MobSpawn, on_mob_spawn)
        .on(EventKind::MobDespawn, on_mob_despawn)
        .on(EventKind::Tick, recompute)
        .on(EventKind::HorizonLeave, on_leave)
        .on(EventKind::PlayerDestroyed, on_player_destroyed)
}

fn on_horizon(ctx: &mut Context, _: &Dispatcher, event: &Event) {
    let Event::Horizon {
        conn,
        horizon_x,
        horizon_y,
    } = event
    else {
        return;
    };
    let Some(player) = ctx.player_of(*conn) else {
        return;
    };
    let (horizon_x, horizon_y) = login::clamp_horizon(ctx, *horizon_x, *horizon_y);
    if let Some(view) = ctx.viewports.view_mut(player) {
        if view.conn == *conn {
            view.horizon_x = horizon_x;
            view.horizon_y = horizon_y;
        }
    }
}

fn on_moved(ctx: &mut Context, _: &Dispatcher, event: &Event) {
    let Event::EntityMoved { id, x, y, rot } = event else {
        return;
    };
    let (half_w, half_h) = (ctx.config.world.width / 2.0, ctx.config.world.height / 2.0);
    let position = Position {
        x: x.clamp(-half_w, half_w),
        y: y.clamp(-half_h, half_h),
    };
    if ctx.world.attach(*id, position).is_err() {
        return;
    }
    if ctx.world.kind_of(*id) == Some(EntityKind::Player) {
        let _ = ctx.world.attach(*id, Rotation(*rot));
    }
    ctx.viewports.mark_moved(*id);
}

fn on_mob_spawn(ctx: &mut Context, _: &Dispatcher, event: &Event) {
    let Event::MobSpawn { kind, x, y, owner } = event else {
        return;
    };
    let entity_kind = if kind.is_powerup() {
        EntityKind::Powerup
    } else {
        EntityKind::Mob
    };
    let spawned = ctx.world.create(entity_kind, ctx.now_ms).and_then(|id| {
        ctx.world.attach(
            id,
            Mob {
                kind: *kind,
                owner: *owner,
            },
        )?;
        ctx.world.attach(id, Position { x: *x, y: *y })?;
        Ok(id)
    });
    match spawned {
        Ok(id) => trace!("Spawned {:?} {} at ({}, {})", kind, id, x, y),
        Err(e) => error!("Failed to spawn {:?}: {}", kind, e),
    }
}

fn on_mob_despawn(ctx: &mut Context, _: &Dispatcher, event: &Event) {
    let Event::MobDespawn { id, coords } = event else {
        return;
    };
    if !matches!(ctx.world.kind_of(*id), Some(EntityKind::Mob | EntityKind::Powerup)) {
        return;
    }

    let subscribers: Vec<ConnectionId> = ctx.viewports.drop_entity(*id).into_iter().collect();
    let packet = match coords {
        Some((x, y)) => ServerPacket::MobDespawnCoords {
            id: id.0,
            x: *x,
            y: *y,
        },
        None => ServerPacket::MobDespawn { id: id.0 },
    };
    ctx.outbox.send(Recipients::Many(subscribers), packet);

    if let Err(e) = ctx.world.destroy(*id, ctx.now_ms) {
        error!("Failed to despawn {}: {}", id, e);
    }
}

fn on_leave(ctx: &mut Context, _: &Dispatcher, event: &Event) {
    let Event::HorizonLeave { conn, id, kind } = event else {
        return;
    };
    // The connection may have closed since the notice was queued.
    if !ctx.connections.contains(*conn) {
        return;
    }
    ctx.send(*conn, ServerPacket::LeaveHorizon { id: id.0, kind: *kind });
}

fn on_player_destroyed(ctx: &mut Context, _: &Dispatcher, event: &Event) {
    let Event::PlayerDestroyed { player } = event else {
        return;
    };
    let view = ctx.viewports.remove_view(*player);
    ctx.viewports.drop_entity(*player);
    if let Some(Viewport { conn, .. }) = view {
        ctx.viewports.forget_connection(conn);
    }
}

/// Full state packet for a connection that just started seeing `id`.
fn entered_packet(ctx: &Context, id: EntityId) -> Option<ServerPacket> {
    let pos = ctx.world.component::<Position>(id)?;
    match ctx.world.kind_of(id)? {
        EntityKind::Player => Some(ServerPacket::PlayerUpdate {
            id: id.0,
            x: pos.x,
            y: pos.y,
            rot: ctx.world.component::<Rotation>(id).map_or(0.0, |r| r.0),
        }),
        EntityKind::Mob | EntityKind::Powerup => {
            let mob = ctx.world.component::<Mob>(id)?;
            Some(ServerPacket::MobUpdate {
                id: id.0,
                kind: mob.kind,
                x: pos.x,
                y: pos.y,
            })
        }
    }
}

/// The point a player's viewport is centred on: its spectate target when
/// that target still exists, otherwise itself.
fn view_center(ctx: &Context, viewer: EntityId) -> Option<Position> {
    let target = ctx
        .world
        .component::<Spectate>(viewer)
        .and_then(|s| s.target)
        .and_then(|target| ctx.world.component::<Position>(target));
    target
        .or_else(|| ctx.world.component::<Position>(viewer))
        .copied()
}

fn recompute(ctx: &mut Context, _: &Dispatcher, _: &Event) {
    let mut grid = SpatialGrid::new(ctx.config.horizon.cell_size);
    let mut hidden = BTreeSet::new();
    for id in ctx.world.ids_with::<Position>() {
        if ctx.world.has_component::<Spectate>(id) {
            hidden.insert(id);
            continue;
        }
        if let Some(pos) = ctx.world.component::<Position>(id) {
            grid.insert(id, pos.x, pos.y);
        }
    }

    let mut visible: BTreeMap<EntityId, BTreeSet<ConnectionId>> = BTreeMap::new();
    for (viewer, view) in ctx.viewports.views() {
        if !ctx.connections.contains(view.conn) {
            continue;
        }
        let Some(center) = view_center(ctx, *viewer) else {
            continue;
        };
        for id in grid.query(center.x, center.y, view.horizon_x, view.horizon_y) {
            if id != *viewer {
                visible.entry(id).or_default().insert(view.conn);
            }
        }
    }

    let moved = ctx.viewports.take_moved();
    let mut ids: BTreeSet<EntityId> = ctx.viewports.subscribed_ids().into_iter().collect();
    ids.extend(visible.keys().copied());

    for id in ids {
        let packet = entered_packet(ctx, id);
        let mut current = visible.remove(&id).unwrap_or_default();
        if packet.is_none() {
            // Nothing can announce it, so nobody subscribes.
            current.clear();
        }
        let previous = ctx.viewports.replace_subscribers(id, current.clone());

        let entered: Vec<ConnectionId> = current.difference(&previous).copied().collect();
        let stayed: Vec<ConnectionId> = if moved.contains(&id) {
            current.intersection(&previous).copied().collect()
        } else {
            Vec::new()
        };
        if let Some(packet) = packet {
            if !entered.is_empty() || !stayed.is_empty() {
                ctx.outbox.send(Recipients::Many(entered), packet.clone());
                ctx.outbox.send(Recipients::Many(stayed), packet);
            }
        }

        if hidden.contains(&id) {
            continue;
        }
        let kind = match ctx.world.kind_of(id) {
            Some(EntityKind::Player) => LeaveKind::Player,
            Some(EntityKind::Mob | EntityKind::Powerup) => LeaveKind::Mob,
            None => continue,
        };
        for conn in previous.difference(&current) {
            ctx.channels.delay(
                Channel::Horizon,
                Event::HorizonLeave {
                    conn: *conn,
                    id,
                    kind,
                },
            );
        }
    }
    debug_assert!(visible.is_empty());
    if !hidden.is_empty() {
        debug!("{} spectators hidden from every horizon", hidden.len());
    }
}
