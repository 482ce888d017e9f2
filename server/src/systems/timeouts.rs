//! Ack, backup and ping liveness checks

use super::System;
use crate::connection_registry::{ConnectionKind, ConnectionState};
use crate::events::{Dispatcher, Event, EventKind};
use crate::game::Context;
use crate::timers::TimerKind;
use log::{debug, info};
use shared::{ErrorKind, ServerPacket};

pub fn system() -> System {
    System::new("timeouts")
        .on(EventKind::Ack, on_ack)
        .on(EventKind::Pong, on_pong)
        .on(EventKind::Second, send_pings)
        .on(EventKind::TimerExpired, on_expired)
}

fn on_ack(ctx: &mut Context, _: &Dispatcher, event: &Event) {
    let Event::Ack { conn } = event else {
        return;
    };
    let Some(connection) = ctx.connections.get_mut(*conn) else {
        return;
    };
    if connection.is_closing() || connection.player.is_none() {
        return;
    }

    let (kind, timeout) = match connection.kind {
        ConnectionKind::Main => {
            if connection.state == ConnectionState::Authenticated {
                connection.state = ConnectionState::Active;
            }
            (TimerKind::Ack, ctx.config.connections.ack_timeout_ms)
        }
        ConnectionKind::Backup => (TimerKind::Backup, ctx.config.connections.backup_timeout_ms),
    };
    ctx.arm_timer(*conn, kind, timeout);
}

fn on_pong(ctx: &mut Context, _: &Dispatcher, event: &Event) {
    let Event::Pong { conn, num } = event else {
        return;
    };
    let now = ctx.now_ms;
    let Some(connection) = ctx.connections.get_mut(*conn) else {
        return;
    };
    if connection.ping.pending != Some(*num) {
        debug!("Ignoring stale pong {} on {}", num, conn);
        return;
    }
    connection.ping.pending = None;
    connection.ping.latency_ms = connection
        .ping
        .last_sent_ms
        .map(|sent| now.saturating_sub(sent));
    ctx.clear_timer(*conn, TimerKind::Pong);
}

fn send_pings(ctx: &mut Context, _: &Dispatcher, _: &Event) {
    let now = ctx.now_ms;
    let interval = ctx.config.connections.ping_interval_ms;
    let pong_timeout = ctx.config.connections.pong_timeout_ms;

    for conn in ctx.connections.main_connections() {
        let Some(connection) = ctx.connections.get_mut(conn) else {
            continue;
        };
        if connection.is_closing() || connection.ping.pending.is_some() {
            continue;
        }
        if connection
            .ping
            .last_sent_ms
            .is_some_and(|sent| now.saturating_sub(sent) < interval)
        {
            continue;
        }

        let num = connection.ping.next_num;
        connection.ping.next_num = num.wrapping_add(1);
        connection.ping.pending = Some(num);
        connection.ping.last_sent_ms = Some(now);

        ctx.send(conn, ServerPacket::Ping { num, clock: now });
        ctx.arm_timer(conn, TimerKind::Pong, pong_timeout);
    }
}

fn on_expired(ctx: &mut Context, bus: &Dispatcher, event: &Event) {
    let Event::TimerExpired { conn, kind } = event else {
        return;
    };
    let conn = *conn;
    let Some(connection) = ctx.connections.get_mut(conn) else {
        return;
    };
    let silent_ms = ctx.now_ms.saturating_sub(connection.last_seen_ms);

    match kind {
        TimerKind::Login => {
            info!("Connection {} did not log in in time", conn);
            bus.emit(ctx, Event::ConnectionBreak { conn, grace: false });
        }
        TimerKind::Ack | TimerKind::Pong => {
            if *kind == TimerKind::Pong {
                connection.ping.pending = None;
            }
            if connection.is_bot {
                debug!("Bot connection {} missed {:?}, ignoring", conn, kind);
                return;
            }
            match connection.player {
                Some(player) if connection.is_main() => {
                    info!(
                        "Player {} timed out waiting for {:?} (silent for {}ms)",
                        player, kind, silent_ms
                    );
                    bus.emit(
                        ctx,
                        Event::PlayerKick {
                            player,
                            reason: ErrorKind::Timeout,
                        },
                    );
                }
                _ => bus.emit(ctx, Event::ConnectionBreak { conn, grace: false }),
            }
        }
        TimerKind::Backup => {
            info!("Backup connection {} timed out", conn);
            bus.emit(ctx, Event::ConnectionBreak { conn, grace: false });
        }
        TimerKind::Break => {}
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{login, simulation};
    use super::*;
    use crate::config::ServerConfig;
    use crate::game::Simulation;
    use shared::ClientPacket;

    #[test]
    fn test_login_timeout_breaks_connection() {
        let mut sim = simulation();
        let conn = sim.accept("127.0.0.1:9000".parse().unwrap(), 0);
        let timeout = sim.context().config.connections.login_timeout_ms;

        sim.run_timers(timeout - 1);
        assert!(sim.context().connections.contains(conn));
        sim.run_timers(timeout);
        assert!(!sim.context().connections.contains(conn));
    }

    #[test]
    fn test_ack_promotes_and_rearms() {
        let mut sim = simulation();
        let (conn, player) = login(&mut sim, "ace", 0);
        let timeout = sim.context().config.connections.ack_timeout_ms;

        sim.receive(conn, ClientPacket::Ack, timeout - 10);
        sim.run_timers(timeout + 5);

        let ctx = sim.context();
        assert!(ctx.world.has(player));
        assert_eq!(ctx.connections.get(conn).unwrap().state, ConnectionState::Active);
        assert!(ctx.has_timer(conn, TimerKind::Ack));
    }

    #[test]
    fn test_missing_ack_kicks_with_timeout() {
        let mut sim = simulation();
        let (conn, player) = login(&mut sim, "ace", 0);
        sim.take_outgoing();
        let timeout = sim.context().config.connections.ack_timeout_ms;

        sim.run_timers(timeout);

        let ctx = sim.context();
        assert!(!ctx.world.has(player));
        assert_eq!(
            ctx.outbox.packets_for(conn),
            vec![&ServerPacket::Error {
                kind: ErrorKind::Timeout
            }]
        );
        assert_eq!(ctx.stats.kicks, 1);
    }

    #[test]
    fn test_bots_are_not_kicked() {
        let mut config = ServerConfig::default();
        config.connections.bot_ips = vec!["127.0.0.1".parse().unwrap()];
        let mut sim = Simulation::new(config);
        let (_, player) = login(&mut sim, "bot", 0);
        let timeout = sim.context().config.connections.ack_timeout_ms;

        sim.run_timers(timeout * 3);
        assert!(sim.context().world.has(player));
    }

    #[test]
    fn test_ping_pong_records_latency() {
        let mut sim = simulation();
        let (conn, _) = login(&mut sim, "ace", 0);
        sim.take_outgoing();

        sim.tick(1000);
        let num = sim
            .context()
            .outbox
            .packets_for(conn)
            .into_iter()
            .find_map(|packet| match packet {
                ServerPacket::Ping { num, .. } => Some(*num),
                _ => None,
            })
            .expect("ping sent");
        assert!(sim.context().has_timer(conn, TimerKind::Pong));

        sim.receive(conn, ClientPacket::Pong { num }, 1040);

        let connection = sim.context().connections.get(conn).unwrap();
        assert_eq!(connection.ping.latency_ms, Some(40));
        assert!(!sim.context().has_timer(conn, TimerKind::Pong));
    }
}
