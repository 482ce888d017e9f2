//! Event catalog and the bus that dispatches it
//!
//! Every interaction between systems, the transport and the clock is an
//! [`Event`]. Its [`EventKind`] is the key systems register handlers under.

pub mod bus;

pub use bus::{handler, Channel, Channels, Dispatcher, Handler};

use crate::clock::TickInfo;
use crate::connection_registry::ConnectionId;
use crate::outbox::Recipients;
use crate::timers::TimerKind;
use crate::world::EntityId;
use shared::{ClientPacket, ErrorKind, LeaveKind, MobKind, ShipType};
use std::net::SocketAddr;

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    // Transport
    ConnectionOpened {
        conn: ConnectionId,
        addr: SocketAddr,
    },
    ConnectionClosed {
        conn: ConnectionId,
    },

    // Routed client requests
    Login {
        conn: ConnectionId,
        protocol: u8,
        name: String,
        flag: String,
        horizon_x: f32,
        horizon_y: f32,
    },
    Backup {
        conn: ConnectionId,
        token: u64,
    },
    Ack {
        conn: ConnectionId,
    },
    Pong {
        conn: ConnectionId,
        num: u32,
    },
    Horizon {
        conn: ConnectionId,
        horizon_x: f32,
        horizon_y: f32,
    },
    Chat {
        conn: ConnectionId,
        text: String,
    },
    TeamChat {
        conn: ConnectionId,
        text: String,
    },
    Whisper {
        conn: ConnectionId,
        target: EntityId,
        text: String,
    },
    VoteMute {
        conn: ConnectionId,
        target: EntityId,
    },
    Command {
        conn: ConnectionId,
        com: String,
        data: String,
    },

    // Produced by physics and mode collaborators
    EntityMoved {
        id: EntityId,
        x: f32,
        y: f32,
        rot: f32,
    },
    MobSpawn {
        kind: MobKind,
        x: f32,
        y: f32,
        owner: Option<EntityId>,
    },
    MobDespawn {
        id: EntityId,
        coords: Option<(f32, f32)>,
    },

    // Clock
    Tick(TickInfo),
    Second,
    Minute,
    Hour,
    TimerExpired {
        conn: ConnectionId,
        kind: TimerKind,
    },

    // Lifecycle
    PlayerJoining {
        player: EntityId,
    },
    PlayerCreated {
        player: EntityId,
    },
    PlayerDestroyed {
        player: EntityId,
    },
    PlayerRespawn {
        player: EntityId,
        ship: Option<ShipType>,
    },
    PlayerReteam {
        player: EntityId,
        team: u16,
    },
    PlayerSpectate {
        player: EntityId,
        target: Option<EntityId>,
    },
    PlayerKick {
        player: EntityId,
        reason: ErrorKind,
    },
    ConnectionBreak {
        conn: ConnectionId,
        grace: bool,
    },
    ServerChat {
        recipients: Recipients,
        text: String,
    },
    HorizonLeave {
        conn: ConnectionId,
        id: EntityId,
        kind: LeaveKind,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    ConnectionOpened,
    ConnectionClosed,
    Login,
    Backup,
    Ack,
    Pong,
    Horizon,
    Chat,
    TeamChat,
    Whisper,
    VoteMute,
    Command,
    EntityMoved,
    MobSpawn,
    MobDespawn,
    Tick,
    Second,
    Minute,
    Hour,
    TimerExpired,
    PlayerJoining,
    PlayerCreated,
    PlayerDestroyed,
    PlayerRespawn,
    PlayerReteam,
    PlayerSpectate,
    PlayerKick,
    ConnectionBreak,
    ServerChat,
    HorizonLeave,
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::ConnectionOpened { .. } => EventKind::ConnectionOpened,
            Event::ConnectionClosed { .. } => EventKind::ConnectionClosed,
            Event::Login { .. } => EventKind::Login,
            Event::Backup { .. } => EventKind::Backup,
            Event::Ack { .. } => EventKind::Ack,
            Event::Pong { .. } => EventKind::Pong,
            Event::Horizon { .. } => EventKind::Horizon,
            Event::Chat { .. } => EventKind::Chat,
            Event::TeamChat { .. } => EventKind::TeamChat,
            Event::Whisper { .. } => EventKind::Whisper,
            Event::VoteMute { .. } => EventKind::VoteMute,
            Event::Command { .. } => EventKind::Command,
            Event::EntityMoved { .. } => EventKind::EntityMoved,
            Event::MobSpawn { .. } => EventKind::MobSpawn,
            Event::MobDespawn { .. } => EventKind::MobDespawn,
            Event::Tick(_) => EventKind::Tick,
            Event::Second => EventKind::Second,
            Event::Minute => EventKind::Minute,
            Event::Hour => EventKind::Hour,
            Event::TimerExpired { .. } => EventKind::TimerExpired,
            Event::PlayerJoining { .. } => EventKind::PlayerJoining,
            Event::PlayerCreated { .. } => EventKind::PlayerCreated,
            Event::PlayerDestroyed { .. } => EventKind::PlayerDestroyed,
            Event::PlayerRespawn { .. } => EventKind::PlayerRespawn,
            Event::PlayerReteam { .. } => EventKind::PlayerReteam,
            Event::PlayerSpectate { .. } => EventKind::PlayerSpectate,
            Event::PlayerKick { .. } => EventKind::PlayerKick,
            Event::ConnectionBreak { .. } => EventKind::ConnectionBreak,
            Event::ServerChat { .. } => EventKind::ServerChat,
            Event::HorizonLeave { .. } => EventKind::HorizonLeave,
        }
    }

    /// Turns a decoded client packet into the routed event for `conn`.
    pub fn from_packet(conn: ConnectionId, packet: ClientPacket) -> Self {
        match packet {
            ClientPacket::Login {
                protocol,
                name,
                flag,
                horizon_x,
                horizon_y,
            } => Event::Login {
                conn,
                protocol,
                name,
                flag,
                horizon_x,
                horizon_y,
            },
            ClientPacket::Backup { token } => Event::Backup { conn, token },
            ClientPacket::Ack => Event::Ack { conn },
            ClientPacket::Pong { num } => Event::Pong { conn, num },
            ClientPacket::Horizon {
                horizon_x,
                horizon_y,
            } => Event::Horizon {
                conn,
                horizon_x,
                horizon_y,
            },
            ClientPacket::Chat { text } => Event::Chat { conn, text },
            ClientPacket::TeamChat { text } => Event::TeamChat { conn, text },
            ClientPacket::Whisper { target, text } => Event::Whisper {
                conn,
                target: EntityId(target),
                text,
            },
            ClientPacket::VoteMute { target } => Event::VoteMute {
                conn,
                target: EntityId(target),
            },
            ClientPacket::Command { com, data } => Event::Command { conn, com, data },
            ClientPacket::Close => Event::ConnectionClosed { conn },
        }
    }
}
