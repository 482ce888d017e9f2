//! Connection lifecycle: open, break, close and kick

use super::{players, System};
use crate::connection_registry::{Connection, ConnectionId, ConnectionState};
use crate::events::{Dispatcher, Event, EventKind};
use crate::game::Context;
use crate::timers::TimerKind;
use log::{debug, info, warn};
use shared::ServerPacket;

pub fn system() -> System {
    System::new("connections")
        .on(EventKind::ConnectionOpened, on_opened)
        .on(EventKind::ConnectionClosed, on_closed)
        .on(EventKind::ConnectionBreak, on_break)
        .on(EventKind::PlayerKick, on_kick)
        .on(EventKind::TimerExpired, on_break_elapsed)
}

fn on_opened(ctx: &mut Context, _: &Dispatcher, event: &Event) {
    let Event::ConnectionOpened { conn, addr } = event else {
        return;
    };
    if ctx.connections.contains(*conn) {
        warn!("Connection {} opened twice", conn);
        return;
    }

    let is_bot = ctx.config.connections.bot_ips.contains(&addr.ip());
    if is_bot {
        debug!("Connection {} comes from a whitelisted bot address", conn);
    }
    ctx.connections
        .insert(Connection::new(*conn, *addr, is_bot, ctx.now_ms));
    let login_timeout = ctx.config.connections.login_timeout_ms;
    ctx.arm_timer(*conn, TimerKind::Login, login_timeout);
}

fn on_closed(ctx: &mut Context, bus: &Dispatcher, event: &Event) {
    let Event::ConnectionClosed { conn } = event else {
        return;
    };
    close(ctx, bus, *conn);
}

/// Without grace the connection is closed at once. With grace it is parked
/// in `Closing` so already queued packets still go out.
fn on_break(ctx: &mut Context, bus: &Dispatcher, event: &Event) {
    let Event::ConnectionBreak { conn, grace } = event else {
        return;
    };
    match ctx.connections.get(*conn) {
        Some(connection) if !connection.is_closing() => {}
        _ => return,
    }

    ctx.clear_timers(*conn);
    ctx.stats.breaks += 1;

    if *grace {
        if let Some(connection) = ctx.connections.get_mut(*conn) {
            connection.state = ConnectionState::Closing;
        }
        let grace_ms = ctx.config.connections.break_grace_ms;
        ctx.arm_timer(*conn, TimerKind::Break, grace_ms);
        debug!("Connection {} closing in {}ms", conn, grace_ms);
    } else {
        close(ctx, bus, *conn);
    }
}

fn on_break_elapsed(ctx: &mut Context, bus: &Dispatcher, event: &Event) {
    if let Event::TimerExpired {
        conn,
        kind: TimerKind::Break,
    } = event
    {
        close(ctx, bus, *conn);
    }
}

fn on_kick(ctx: &mut Context, bus: &Dispatcher, event: &Event) {
    let Event::PlayerKick { player, reason } = event else {
        return;
    };
    if !ctx.world.has(*player) {
        return;
    }

    info!("Kicking player {} ({:?})", player, reason);
    ctx.stats.kicks += 1;

    let conns = ctx.connections.connections_of(*player);
    if let Some(main) = conns.first() {
        ctx.send(*main, ServerPacket::Error { kind: *reason });
    }
    for conn in conns {
        bus.emit(ctx, Event::ConnectionBreak { conn, grace: false });
    }

    // A player without a live main connection still has to go.
    if ctx.world.has(*player) {
        players::remove_player(ctx, bus, *player);
    }
}

/// Drops the connection. Closing a player's main connection also closes
/// its backup and destroys the player.
pub fn close(ctx: &mut Context, bus: &Dispatcher, conn: ConnectionId) {
    let Some(connection) = ctx.connections.get(conn) else {
        return;
    };
    let player = connection.player;
    let is_main = connection.is_main();
    debug!(
        "Closing {} after {}ms",
        conn,
        ctx.now_ms.saturating_sub(connection.opened_ms)
    );

    ctx.clear_timers(conn);
    ctx.outbox.close(conn);
    ctx.viewports.forget_connection(conn);

    if is_main {
        if let Some(player) = player {
            if let Some(backup) = ctx.connections.backup_of(player) {
                close(ctx, bus, backup);
            }
            players::remove_player(ctx, bus, player);
        }
    }
    ctx.connections.remove(conn);
}
