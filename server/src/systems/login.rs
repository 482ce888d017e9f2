//! Login and backup connection handshakes
//!
//! A login is refused, in this order, when the connection already carries
//! a player, when the protocol or name is invalid, or when the server is
//! full. Each refusal sends an error and breaks the connection with grace
//! so the error reaches the client.

use super::{players, System};
use crate::connection_registry::{ConnectionId, ConnectionState};
use crate::error::WorldError;
use crate::events::{Channel, Dispatcher, Event, EventKind};
use crate::game::Context;
use crate::timers::TimerKind;
use crate::viewport::Viewport;
use crate::world::components::{
    Flag, Health, HitCircles, MuteVotes, Name, Rotation, Score, Ship, Team,
};
use crate::world::{EntityId, EntityKind};
use log::{error, info, warn};
use rand::Rng;
use shared::{ErrorKind, ServerPacket, ShipType, MAX_NAME_LEN, PROTOCOL_VERSION};

pub fn system() -> System {
    System::new("login")
        .on(EventKind::Login, on_login)
        .on(EventKind::Backup, on_backup)
}

fn refuse(ctx: &mut Context, bus: &Dispatcher, conn: ConnectionId, kind: ErrorKind) {
    info!("Refusing login on {}: {:?}", conn, kind);
    ctx.send(conn, ServerPacket::Error { kind });
    bus.emit(ctx, Event::ConnectionBreak { conn, grace: true });
}

/// Trims the name and strips control characters. None if nothing is left.
pub fn sanitize_name(raw: &str) -> Option<String> {
    let name: String = raw
        .chars()
        .filter(|c| !c.is_control())
        .take(MAX_NAME_LEN)
        .collect::<String>()
        .trim()
        .to_string();
    (!name.is_empty()).then_some(name)
}

/// Two-letter uppercase country code, or `XX` when the client sent garbage.
pub fn sanitize_flag(raw: &str) -> String {
    let flag = raw.trim().to_ascii_uppercase();
    if flag.len() == 2 && flag.chars().all(|c| c.is_ascii_alphabetic()) {
        flag
    } else {
        "XX".to_string()
    }
}

/// Appends `#n` until no other player carries the name.
fn unique_name(ctx: &Context, name: String) -> String {
    let taken = |candidate: &str| {
        ctx.world
            .ids_of(EntityKind::Player)
            .into_iter()
            .any(|id| ctx.world.component::<Name>(id).is_some_and(|n| n.0 == candidate))
    };
    if !taken(&name) {
        return name;
    }
    let mut n = 2;
    loop {
        let candidate = format!("{}#{}", name, n);
        if !taken(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

/// Clamps a requested horizon into the configured range.
pub fn clamp_horizon(ctx: &Context, horizon_x: f32, horizon_y: f32) -> (f32, f32) {
    let cfg = &ctx.config.horizon;
    let clamp = |value: f32, default: f32, max: f32| {
        if value.is_finite() && value > 0.0 {
            value.min(max)
        } else {
            default
        }
    };
    (
        clamp(horizon_x, cfg.default_x, cfg.max_x),
        clamp(horizon_y, cfg.default_y, cfg.max_y),
    )
}

fn create_player(ctx: &mut Context, name: String, flag: &str) -> Result<EntityId, WorldError> {
    let player = ctx.world.create(EntityKind::Player, ctx.now_ms)?;
    let name = unique_name(ctx, name);
    let ship = ShipType::Predator;

    ctx.world.attach(player, Name(name))?;
    ctx.world.attach(player, Flag(sanitize_flag(flag)))?;
    ctx.world.attach(player, Team(player.0 as u16))?;
    ctx.world.attach(player, Ship(ship))?;
    ctx.world.attach(player, HitCircles::for_ship(ship))?;
    ctx.world.attach(player, Health(1.0))?;
    ctx.world.attach(player, Score::default())?;
    ctx.world.attach(player, MuteVotes::default())?;
    ctx.world.attach(player, players::spawn_point())?;
    ctx.world.attach(player, Rotation(0.0))?;
    Ok(player)
}

fn on_login(ctx: &mut Context, bus: &Dispatcher, event: &Event) {
    let Event::Login {
        conn,
        protocol,
        name,
        flag,
        horizon_x,
        horizon_y,
    } = event
    else {
        return;
    };
    let conn = *conn;
    let Some(connection) = ctx.connections.get(conn) else {
        return;
    };
    if connection.is_closing() {
        return;
    }

    if connection.player.is_some() || connection.state != ConnectionState::Connecting {
        return refuse(ctx, bus, conn, ErrorKind::DuplicateLogin);
    }
    if *protocol != PROTOCOL_VERSION {
        return refuse(ctx, bus, conn, ErrorKind::InvalidLogin);
    }
    let Some(name) = sanitize_name(name) else {
        return refuse(ctx, bus, conn, ErrorKind::InvalidLogin);
    };
    if ctx.player_count() >= ctx.config.max_players {
        return refuse(ctx, bus, conn, ErrorKind::ServerFull);
    }

    ctx.clear_timer(conn, TimerKind::Login);

    let player = match create_player(ctx, name, flag) {
        Ok(player) => player,
        Err(e) => {
            error!("Could not create player for {}: {}", conn, e);
            return refuse(ctx, bus, conn, ErrorKind::ServerFull);
        }
    };

    let token: u64 = rand::thread_rng().gen();
    ctx.connections.link_main(player, conn, token);
    if let Some(connection) = ctx.connections.get_mut(conn) {
        connection.state = ConnectionState::Authenticated;
    }
    let (horizon_x, horizon_y) = clamp_horizon(ctx, *horizon_x, *horizon_y);
    ctx.viewports.set_view(
        player,
        Viewport {
            conn,
            horizon_x,
            horizon_y,
        },
    );

    // Mode systems pick the team before the client hears about it.
    bus.emit(ctx, Event::PlayerJoining { player });

    let team = ctx.world.component::<Team>(player).map_or(0, |t| t.0);
    let players = players::roster(ctx);
    ctx.send(
        conn,
        ServerPacket::LoginOk {
            id: player.0,
            team,
            token,
            players,
        },
    );

    let ack_timeout = ctx.config.connections.ack_timeout_ms;
    ctx.arm_timer(conn, TimerKind::Ack, ack_timeout);

    ctx.stats.logins += 1;
    ctx.stats.peak_players = ctx.stats.peak_players.max(ctx.player_count());
    ctx.channels
        .delay(Channel::Players, Event::PlayerCreated { player });

    info!("Player {} logged in on {} (team {})", player, conn, team);
}

fn on_backup(ctx: &mut Context, bus: &Dispatcher, event: &Event) {
    let Event::Backup { conn, token } = event else {
        return;
    };
    let conn = *conn;
    let Some(connection) = ctx.connections.get(conn) else {
        return;
    };
    if connection.is_closing() {
        return;
    }
    if connection.player.is_some() || connection.state != ConnectionState::Connecting {
        return refuse(ctx, bus, conn, ErrorKind::DuplicateLogin);
    }

    let Some(player) = ctx.connections.player_by_token(*token) else {
        warn!("Backup on {} presented an unknown token", conn);
        return refuse(ctx, bus, conn, ErrorKind::InvalidLogin);
    };
    if let Some(previous) = ctx.connections.backup_of(player) {
        bus.emit(
            ctx,
            Event::ConnectionBreak {
                conn: previous,
                grace: false,
            },
        );
    }

    ctx.clear_timer(conn, TimerKind::Login);
    ctx.connections.link_backup(*token, conn);
    if let Some(connection) = ctx.connections.get_mut(conn) {
        connection.state = ConnectionState::BackedUp;
    }
    ctx.send(conn, ServerPacket::BackupOk);

    let backup_timeout = ctx.config.connections.backup_timeout_ms;
    ctx.arm_timer(conn, TimerKind::Backup, backup_timeout);
    info!("Backup connection {} attached to player {}", conn, player);
}

#[cfg(test)]
mod tests {
    use super::super::testing::{login, login_packet, simulation};
    use super::*;
    use crate::config::ServerConfig;
    use crate::game::Simulation;
    use shared::ClientPacket;

    fn addr(port: u16) -> std::net::SocketAddr {
        format!("127.0.0.1:{}", port).parse().unwrap()
    }

    #[test]
    fn test_login_replies_and_arms_ack_timer() {
        let mut sim = simulation();
        let conn = sim.accept(addr(1), 0);
        sim.receive(conn, login_packet("ace"), 10);

        let ctx = sim.context();
        let player = ctx.player_of(conn).unwrap();
        let packets = ctx.outbox.packets_for(conn);
        assert!(matches!(
            packets.as_slice(),
            [ServerPacket::LoginOk { id, .. }] if *id == player.0
        ));
        assert!(ctx.has_timer(conn, TimerKind::Ack));
        assert!(!ctx.has_timer(conn, TimerKind::Login));
        assert_eq!(ctx.viewports.view(player).unwrap().conn, conn);
        assert_eq!(ctx.stats.logins, 1);
    }

    #[test]
    fn test_second_login_on_same_connection_is_duplicate() {
        let mut sim = simulation();
        let (conn, _) = login(&mut sim, "ace", 0);
        sim.take_outgoing();

        sim.receive(conn, login_packet("ace"), 5);

        let ctx = sim.context();
        assert_eq!(
            ctx.outbox.packets_for(conn),
            vec![&ServerPacket::Error {
                kind: ErrorKind::DuplicateLogin
            }]
        );
        assert_eq!(ctx.player_count(), 1);
    }

    #[test]
    fn test_wrong_protocol_is_invalid() {
        let mut sim = simulation();
        let conn = sim.accept(addr(1), 0);
        sim.receive(
            conn,
            ClientPacket::Login {
                protocol: PROTOCOL_VERSION + 1,
                name: "ace".to_string(),
                flag: "GB".to_string(),
                horizon_x: 1000.0,
                horizon_y: 600.0,
            },
            1,
        );

        let ctx = sim.context();
        assert_eq!(
            ctx.outbox.packets_for(conn),
            vec![&ServerPacket::Error {
                kind: ErrorKind::InvalidLogin
            }]
        );
        assert!(ctx.connections.get(conn).unwrap().is_closing());
    }

    #[test]
    fn test_full_server_refuses_and_closes() {
        let mut config = ServerConfig::default();
        config.max_players = 1;
        let mut sim = Simulation::new(config);
        login(&mut sim, "ace", 0);

        let conn = sim.accept(addr(2), 1);
        sim.receive(conn, login_packet("bob"), 1);

        assert_eq!(sim.context().player_count(), 1);
        assert_eq!(
            sim.context().outbox.packets_for(conn),
            vec![&ServerPacket::Error {
                kind: ErrorKind::ServerFull
            }]
        );
        let grace = sim.context().config.connections.break_grace_ms;
        sim.run_timers(1 + grace);
        assert!(!sim.context().connections.contains(conn));
    }

    #[test]
    fn test_duplicate_names_get_suffix() {
        let mut sim = simulation();
        let (_, a) = login(&mut sim, "ace", 0);
        let (_, b) = login(&mut sim, "ace", 0);

        let world = &sim.context().world;
        assert_eq!(world.component::<Name>(a).unwrap().0, "ace");
        assert_eq!(world.component::<Name>(b).unwrap().0, "ace#2");
    }

    #[test]
    fn test_backup_with_unknown_token_is_refused() {
        let mut sim = simulation();
        let conn = sim.accept(addr(3), 0);
        sim.receive(conn, ClientPacket::Backup { token: 42 }, 1);

        assert_eq!(
            sim.context().outbox.packets_for(conn),
            vec![&ServerPacket::Error {
                kind: ErrorKind::InvalidLogin
            }]
        );
    }

    #[test]
    fn test_backup_replaces_previous_backup() {
        let mut sim = simulation();
        let (_, player) = login(&mut sim, "ace", 0);
        let token = sim.context().connections.links(player).unwrap().token;

        let first = sim.accept(addr(4), 1);
        sim.receive(first, ClientPacket::Backup { token }, 1);
        let second = sim.accept(addr(5), 2);
        sim.receive(second, ClientPacket::Backup { token }, 2);

        let ctx = sim.context();
        assert!(!ctx.connections.contains(first));
        assert_eq!(ctx.connections.backup_of(player), Some(second));
        assert!(ctx.has_timer(second, TimerKind::Backup));
        assert_eq!(ctx.outbox.packets_for(second), vec![&ServerPacket::BackupOk]);
    }

    #[test]
    fn test_name_and_flag_sanitizing() {
        assert_eq!(sanitize_name("  ace \n"), Some("ace".to_string()));
        assert_eq!(sanitize_name("\t\n"), None);
        assert_eq!(sanitize_name(&"x".repeat(40)).unwrap().len(), MAX_NAME_LEN);
        assert_eq!(sanitize_flag("gb"), "GB");
        assert_eq!(sanitize_flag("GBR"), "XX");
    }
}
