//! Connection tracking for the multiplayer server
//!
//! This module keeps the server-side view of every network session:
//! - Connection metadata (kind, lifecycle state, peer address, bot flag)
//! - The player each connection belongs to, in both directions
//! - Liveness timer handles, ping bookkeeping and chat rate-limit counters
//!
//! The registry is plain data owned by the simulation context. Systems
//! drive the state transitions; the registry only keeps the indexes
//! consistent.

use crate::timers::{TimerHandle, TimerKind};
use crate::world::EntityId;
use log::info;
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionKind {
    /// Carries login, input and horizon traffic for one player.
    Main,
    /// Auxiliary channel for large periodic state pushes.
    Backup,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Authenticated,
    Active,
    BackedUp,
    /// Broken with a grace delay; waiting for the transport close.
    Closing,
}

/// Chat weight accumulated by a connection and how often it overflowed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Limits {
    pub chat: u32,
    pub violations: u32,
}

/// Chat silencing applied to a connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Mute {
    /// End of a flood mute, if one is running.
    pub until_ms: Option<u64>,
    /// Set once a vote-mute passes; lasts for the rest of the session.
    pub by_vote: bool,
}

impl Mute {
    /// Returns true if chat from this connection is currently dropped.
    pub fn is_muted(&self, now_ms: u64) -> bool {
        self.by_vote || self.until_ms.is_some_and(|until| until > now_ms)
    }
}

/// Round-trip bookkeeping for server pings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PingState {
    /// Number the next ping will carry.
    pub next_num: u32,
    /// Ping waiting for its pong, if any.
    pub pending: Option<u32>,
    /// When the last ping went out.
    pub last_sent_ms: Option<u64>,
    /// Round trip of the last answered ping.
    pub latency_ms: Option<u64>,
}

/// One network session as seen by the simulation.
#[derive(Debug)]
pub struct Connection {
    /// Unique connection identifier
    pub id: ConnectionId,
    /// Remote address of the client
    pub addr: SocketAddr,
    /// Whether this is a player's primary or backup connection
    pub kind: ConnectionKind,
    /// Where the connection is in its lifecycle
    pub state: ConnectionState,
    /// Player owning this connection once a handshake succeeded
    pub player: Option<EntityId>,
    /// Internal participants are exempt from keepalive enforcement.
    pub is_bot: bool,
    /// When the transport accepted the connection
    pub opened_ms: u64,
    /// When the last packet arrived on it
    pub last_seen_ms: u64,
    /// Live timer handle per kind; a cleared entry means cancelled
    pub timers: HashMap<TimerKind, TimerHandle>,
    /// Flood guard counters
    pub limits: Limits,
    pub mute: Mute,
    pub ping: PingState,
}

impl Connection {
    /// Creates a fresh main connection in the `Connecting` state.
    pub fn new(id: ConnectionId, addr: SocketAddr, is_bot: bool, now_ms: u64) -> Self {
        Self {
            id,
            addr,
            kind: ConnectionKind::Main,
            state: ConnectionState::Connecting,
            player: None,
            is_bot,
            opened_ms: now_ms,
            last_seen_ms: now_ms,
            timers: HashMap::new(),
            limits: Limits::default(),
            mute: Mute::default(),
            ping: PingState::default(),
        }
    }

    /// Returns true for a primary connection
    pub fn is_main(&self) -> bool {
        self.kind == ConnectionKind::Main
    }

    /// Returns true once the connection has been broken with a grace delay
    pub fn is_closing(&self) -> bool {
        self.state == ConnectionState::Closing
    }
}

/// The connections a player owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlayerLinks {
    /// Connection the player logged in on
    pub main: ConnectionId,
    /// Secondary connection attached with the player's token
    pub backup: Option<ConnectionId>,
    /// Secret a backup connection presents to attach itself
    pub token: u64,
}

/// Indexes every open connection and the player ↔ connection mapping.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: HashMap<ConnectionId, Connection>,
    players: HashMap<EntityId, PlayerLinks>,
    tokens: HashMap<u64, EntityId>,
    next_id: u64,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            ..Self::default()
        }
    }

    /// Reserves an id for a connection the transport just accepted.
    pub fn allocate_id(&mut self) -> ConnectionId {
        let id = ConnectionId(self.next_id.max(1));
        self.next_id = id.0 + 1;
        id
    }

    /// Registers a newly opened connection
    pub fn insert(&mut self, connection: Connection) {
        info!("Connection {} opened from {}", connection.id, connection.addr);
        self.connections.insert(connection.id, connection);
    }

    /// Removes a connection and any player link pointing at it.
    pub fn remove(&mut self, id: ConnectionId) -> Option<Connection> {
        let connection = self.connections.remove(&id)?;

        if let Some(player) = connection.player {
            if let Some(links) = self.players.get_mut(&player) {
                if links.main == id {
                    self.tokens.remove(&links.token);
                    self.players.remove(&player);
                } else if links.backup == Some(id) {
                    links.backup = None;
                }
            }
        }

        info!("Connection {} closed", id);
        Some(connection)
    }

    /// Gets a connection by id
    pub fn get(&self, id: ConnectionId) -> Option<&Connection> {
        self.connections.get(&id)
    }

    /// Gets a mutable reference to a connection by id
    pub fn get_mut(&mut self, id: ConnectionId) -> Option<&mut Connection> {
        self.connections.get_mut(&id)
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.connections.contains_key(&id)
    }

    /// Makes `conn` the primary connection of `player`.
    pub fn link_main(&mut self, player: EntityId, conn: ConnectionId, token: u64) {
        if let Some(connection) = self.connections.get_mut(&conn) {
            connection.player = Some(player);
            connection.kind = ConnectionKind::Main;
        }
        self.tokens.insert(token, player);
        self.players.insert(
            player,
            PlayerLinks {
                main: conn,
                backup: None,
                token,
            },
        );
    }

    /// Attaches a backup connection to the player owning `token`.
    /// Returns the player, or None if the token is unknown.
    pub fn link_backup(&mut self, token: u64, conn: ConnectionId) -> Option<EntityId> {
        let player = *self.tokens.get(&token)?;
        let links = self.players.get_mut(&player)?;
        links.backup = Some(conn);

        if let Some(connection) = self.connections.get_mut(&conn) {
            connection.player = Some(player);
            connection.kind = ConnectionKind::Backup;
        }
        Some(player)
    }

    /// Looks up the player a backup token belongs to
    pub fn player_by_token(&self, token: u64) -> Option<EntityId> {
        self.tokens.get(&token).copied()
    }

    /// Both connections of a player plus its token
    pub fn links(&self, player: EntityId) -> Option<PlayerLinks> {
        self.players.get(&player).copied()
    }

    pub fn main_of(&self, player: EntityId) -> Option<ConnectionId> {
        self.players.get(&player).map(|links| links.main)
    }

    pub fn backup_of(&self, player: EntityId) -> Option<ConnectionId> {
        self.players.get(&player).and_then(|links| links.backup)
    }

    /// Main connection first, then the backup if there is one.
    pub fn connections_of(&self, player: EntityId) -> Vec<ConnectionId> {
        match self.players.get(&player) {
            Some(links) => std::iter::once(links.main).chain(links.backup).collect(),
            None => Vec::new(),
        }
    }

    /// Player owning a connection, main or backup
    pub fn player_of(&self, conn: ConnectionId) -> Option<EntityId> {
        self.connections.get(&conn).and_then(|c| c.player)
    }

    /// Main connections of every logged-in player, ordered by connection id.
    pub fn main_connections(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<ConnectionId> = self.players.values().map(|links| links.main).collect();
        ids.sort_unstable();
        ids
    }

    /// Average round trip over connections that answered a ping.
    pub fn average_latency_ms(&self) -> Option<u64> {
        let samples: Vec<u64> = self
            .connections
            .values()
            .filter_map(|c| c.ping.latency_ms)
            .collect();
        if samples.is_empty() {
            return None;
        }
        Some(samples.iter().sum::<u64>() / samples.len() as u64)
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Connection> {
        self.connections.values_mut()
    }

    /// Returns the number of open connections
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Returns true if no connections are open
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

/// Tests cover id allocation, player linking in both directions and the
/// cleanup performed when either kind of connection goes away.
#[cfg(test)]
mod tests {
    use super::*;

    fn test_addr() -> SocketAddr {
        "127.0.0.1:8080".parse().unwrap()
    }

    fn registry_with(ids: &[u64]) -> ConnectionRegistry {
        let mut registry = ConnectionRegistry::new();
        for _ in ids {
            let id = registry.allocate_id();
            registry.insert(Connection::new(id, test_addr(), false, 0));
        }
        registry
    }

    #[test]
    fn test_connection_creation() {
        let connection = Connection::new(ConnectionId(1), test_addr(), false, 10);

        assert_eq!(connection.kind, ConnectionKind::Main);
        assert_eq!(connection.state, ConnectionState::Connecting);
        assert!(connection.player.is_none());
        assert!(connection.timers.is_empty());
        assert_eq!(connection.limits, Limits::default());
    }

    #[test]
    fn test_average_latency_skips_unanswered() {
        let mut registry = registry_with(&[1, 2, 3]);
        assert_eq!(registry.average_latency_ms(), None);

        registry.get_mut(ConnectionId(1)).unwrap().ping.latency_ms = Some(40);
        registry.get_mut(ConnectionId(2)).unwrap().ping.latency_ms = Some(80);
        assert_eq!(registry.average_latency_ms(), Some(60));
    }

    #[test]
    fn test_ids_are_unique() {
        let mut registry = ConnectionRegistry::new();
        let a = registry.allocate_id();
        let b = registry.allocate_id();
        assert_eq!(a, ConnectionId(1));
        assert_eq!(b, ConnectionId(2));
    }

    #[test]
    fn test_link_main_and_backup() {
        let mut registry = registry_with(&[1, 2]);
        let player = EntityId(1);

        registry.link_main(player, ConnectionId(1), 77);
        assert_eq!(registry.link_backup(77, ConnectionId(2)), Some(player));

        assert_eq!(registry.main_of(player), Some(ConnectionId(1)));
        assert_eq!(registry.backup_of(player), Some(ConnectionId(2)));
        assert_eq!(registry.player_of(ConnectionId(2)), Some(player));
        assert_eq!(
            registry.get(ConnectionId(2)).unwrap().kind,
            ConnectionKind::Backup
        );
        assert_eq!(
            registry.connections_of(player),
            vec![ConnectionId(1), ConnectionId(2)]
        );
        assert_eq!(registry.main_connections(), vec![ConnectionId(1)]);
    }

    #[test]
    fn test_unknown_backup_token() {
        let mut registry = registry_with(&[1]);
        assert_eq!(registry.link_backup(5, ConnectionId(1)), None);
        assert!(registry.player_of(ConnectionId(1)).is_none());
    }

    #[test]
    fn test_removing_backup_keeps_player() {
        let mut registry = registry_with(&[1, 2]);
        registry.link_main(EntityId(1), ConnectionId(1), 9);
        registry.link_backup(9, ConnectionId(2));

        assert!(registry.remove(ConnectionId(2)).is_some());
        assert_eq!(registry.main_of(EntityId(1)), Some(ConnectionId(1)));
        assert_eq!(registry.backup_of(EntityId(1)), None);
    }

    #[test]
    fn test_removing_main_unlinks_player() {
        let mut registry = registry_with(&[1]);
        registry.link_main(EntityId(1), ConnectionId(1), 9);

        let removed = registry.remove(ConnectionId(1)).unwrap();
        assert_eq!(removed.player, Some(EntityId(1)));
        assert_eq!(registry.main_of(EntityId(1)), None);
        assert_eq!(registry.link_backup(9, ConnectionId(1)), None);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_remove_nonexistent_connection() {
        let mut registry = ConnectionRegistry::new();
        assert!(registry.remove(ConnectionId(999)).is_none());
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn test_mute_expiry() {
        let mute = Mute {
            until_ms: Some(100),
            by_vote: false,
        };
        assert!(mute.is_muted(99));
        assert!(!mute.is_muted(100));
        assert!(Mute {
            until_ms: None,
            by_vote: true
        }
        .is_muted(0));
    }
}
