//! Simulation context and the per-tick driver
//!
//! [`Context`] is everything a handler may touch: world store, connection
//! registry, timers, delayed channels, viewports and the outbox. It is
//! passed by `&mut` into every handler, so there is exactly one writer and
//! no ambient global state. [`Simulation`] pairs a context with the
//! dispatcher built from the game mode's manifest and the clock.

use crate::clock::{Calendar, Clock, TickInfo};
use crate::config::ServerConfig;
use crate::connection_registry::{ConnectionId, ConnectionRegistry};
use crate::events::{Channel, Channels, Dispatcher, Event};
use crate::outbox::{Outbox, Outgoing, Recipients};
use crate::systems::Manifest;
use crate::timers::{TimerKind, Timers};
use crate::viewport::Viewports;
use crate::world::components::Team;
use crate::world::history::NameHistory;
use crate::world::{EntityId, EntityKind, World};
use log::debug;
use shared::{ClientPacket, ServerPacket};
use std::net::SocketAddr;

/// Counters for the hourly summary plus maintenance bookkeeping.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    pub logins: u64,
    pub kicks: u64,
    pub breaks: u64,
    pub peak_players: usize,
    pub last_score_board_ms: Option<u64>,
}

pub struct Context {
    pub config: ServerConfig,
    pub now_ms: u64,
    pub world: World,
    pub connections: ConnectionRegistry,
    pub timers: Timers,
    pub channels: Channels,
    pub viewports: Viewports,
    pub outbox: Outbox,
    pub history: NameHistory,
    pub stats: Stats,
}

impl Context {
    pub fn new(config: ServerConfig) -> Self {
        let world = World::new(config.world.id_retention_ms)
            .with_player_retention(config.world.player_id_retention_ms());
        Self {
            config,
            now_ms: 0,
            world,
            connections: ConnectionRegistry::new(),
            timers: Timers::new(),
            channels: Channels::default(),
            viewports: Viewports::default(),
            outbox: Outbox::default(),
            history: NameHistory::default(),
            stats: Stats::default(),
        }
    }

    pub fn send(&mut self, conn: ConnectionId, packet: ServerPacket) {
        self.outbox.send_to(conn, packet);
    }

    pub fn broadcast(&mut self, packet: ServerPacket) {
        self.outbox.send(Recipients::All, packet);
    }

    pub fn player_of(&self, conn: ConnectionId) -> Option<EntityId> {
        self.connections.player_of(conn)
    }

    pub fn player_count(&self) -> usize {
        self.world.count(EntityKind::Player)
    }

    /// Main connections of every player on `team`.
    pub fn team_connections(&self, team: u16) -> Vec<ConnectionId> {
        self.world
            .ids_of(EntityKind::Player)
            .into_iter()
            .filter(|id| self.world.component::<Team>(*id) == Some(&Team(team)))
            .filter_map(|id| self.connections.main_of(id))
            .collect()
    }

    /// Cancels the connection's timer of this kind (if any) and schedules a new one.
    pub fn arm_timer(&mut self, conn: ConnectionId, kind: TimerKind, after_ms: u64) {
        let deadline = self.now_ms + after_ms;
        let Some(connection) = self.connections.get_mut(conn) else {
            return;
        };
        if let Some(previous) = connection.timers.remove(&kind) {
            self.timers.cancel(previous);
        }
        let handle = self.timers.schedule(conn, kind, deadline);
        connection.timers.insert(kind, handle);
    }

    /// Returns true if a pending timer was cancelled.
    pub fn clear_timer(&mut self, conn: ConnectionId, kind: TimerKind) -> bool {
        let handle = self
            .connections
            .get_mut(conn)
            .and_then(|connection| connection.timers.remove(&kind));
        match handle {
            Some(handle) => self.timers.cancel(handle),
            None => false,
        }
    }

    pub fn clear_timers(&mut self, conn: ConnectionId) {
        let Some(connection) = self.connections.get_mut(conn) else {
            return;
        };
        for (_, handle) in connection.timers.drain() {
            self.timers.cancel(handle);
        }
    }

    pub fn has_timer(&self, conn: ConnectionId, kind: TimerKind) -> bool {
        self.connections
            .get(conn)
            .is_some_and(|connection| connection.timers.contains_key(&kind))
    }
}

/// One isolated game server instance.
pub struct Simulation {
    ctx: Context,
    bus: Dispatcher,
    clock: Clock,
}

impl Simulation {
    pub fn new(config: ServerConfig) -> Self {
        let manifest = Manifest::for_mode(config.mode);
        Self::with_manifest(config, manifest)
    }

    pub fn with_manifest(config: ServerConfig, manifest: Manifest) -> Self {
        let clock = Clock::new(config.tick_ms(), 0);
        Self {
            ctx: Context::new(config),
            bus: manifest.build(),
            clock,
        }
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut Context {
        &mut self.ctx
    }

    fn set_time(&mut self, now_ms: u64) {
        self.ctx.now_ms = self.ctx.now_ms.max(now_ms);
    }

    /// Registers a connection the transport just accepted.
    pub fn accept(&mut self, addr: SocketAddr, now_ms: u64) -> ConnectionId {
        self.set_time(now_ms);
        let conn = self.ctx.connections.allocate_id();
        self.bus
            .emit(&mut self.ctx, Event::ConnectionOpened { conn, addr });
        conn
    }

    /// Routes a decoded packet from `conn` onto the bus.
    pub fn receive(&mut self, conn: ConnectionId, packet: ClientPacket, now_ms: u64) {
        self.dispatch(Event::from_packet(conn, packet), now_ms);
    }

    pub fn dispatch(&mut self, event: Event, now_ms: u64) {
        self.set_time(now_ms);
        if let Some(conn) = routed_connection(&event) {
            if let Some(connection) = self.ctx.connections.get_mut(conn) {
                connection.last_seen_ms = self.ctx.now_ms;
            }
        }
        self.bus.emit(&mut self.ctx, event);
    }

    /// Fires every timer due at `now_ms`. Returns how many fired.
    pub fn run_timers(&mut self, now_ms: u64) -> usize {
        self.set_time(now_ms);
        let expired = self.ctx.timers.pop_expired(self.ctx.now_ms);
        let count = expired.len();

        for (handle, conn, kind) in expired {
            let current = self
                .ctx
                .connections
                .get(conn)
                .and_then(|connection| connection.timers.get(&kind).copied());
            if current != Some(handle) {
                continue;
            }
            if let Some(connection) = self.ctx.connections.get_mut(conn) {
                connection.timers.remove(&kind);
            }
            self.bus
                .emit(&mut self.ctx, Event::TimerExpired { conn, kind });
        }
        count
    }

    /// Runs one simulation step.
    ///
    /// Phase order: expired timers, `Tick` (viewport recompute), flush of
    /// the horizon channel, calendar markers, flush of the players channel.
    pub fn tick(&mut self, now_ms: u64) -> TickInfo {
        self.run_timers(now_ms);

        let (info, calendar) = self.clock.advance(self.ctx.now_ms);
        self.bus.emit(&mut self.ctx, Event::Tick(info));
        self.bus.flush(&mut self.ctx, Channel::Horizon);

        for marker in calendar {
            let event = match marker {
                Calendar::Second => Event::Second,
                Calendar::Minute => Event::Minute,
                Calendar::Hour => Event::Hour,
            };
            self.bus.emit(&mut self.ctx, event);
        }

        let flushed = self.bus.flush(&mut self.ctx, Channel::Players);
        if flushed > 0 {
            debug!("Frame {}: flushed {} player events", info.frame, flushed);
        }
        info
    }

    pub fn next_deadline(&self) -> Option<u64> {
        self.ctx.timers.next_deadline()
    }

    pub fn take_outgoing(&mut self) -> Vec<Outgoing> {
        self.ctx.outbox.drain()
    }

    /// Expands a recipient list into concrete connection ids.
    pub fn resolve(&self, recipients: &Recipients) -> Vec<ConnectionId> {
        match recipients {
            Recipients::One(conn) => vec![*conn],
            Recipients::Many(conns) => conns.clone(),
            Recipients::All => self.ctx.connections.main_connections(),
        }
    }
}

fn routed_connection(event: &Event) -> Option<ConnectionId> {
    match event {
        Event::Login { conn, .. }
        | Event::Backup { conn, .. }
        | Event::Ack { conn }
        | Event::Pong { conn, .. }
        | Event::Horizon { conn, .. }
        | Event::Chat { conn, .. }
        | Event::TeamChat { conn, .. }
        | Event::Whisper { conn, .. }
        | Event::VoteMute { conn, .. }
        | Event::Command { conn, .. } => Some(*conn),
        _ => None,
    }
}
