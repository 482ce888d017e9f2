//! UDP transport in front of the simulation
//!
//! A receiver task decodes datagrams and hands them to the main loop; a
//! sender task encodes and writes outgoing packets. The main loop owns the
//! [`Simulation`] and is the only place it is touched: it reacts to incoming
//! packets, the tick interval and the nearest timer deadline, then drains
//! the outbox after each step.

use crate::config::ServerConfig;
use crate::connection_registry::ConnectionId;
use crate::error::ServerError;
use crate::game::Simulation;
use crate::outbox::Outgoing;
use bincode::{deserialize, serialize};
use log::{debug, error, info, warn};
use shared::{ClientPacket, ServerPacket};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::{interval, sleep_until, Duration, Instant, MissedTickBehavior};

const MAX_DATAGRAM: usize = 4096;

/// Messages sent from network tasks to the main loop
#[derive(Debug)]
pub enum ServerMessage {
    PacketReceived { packet: ClientPacket, addr: SocketAddr },
    Shutdown,
}

/// Messages sent from the main loop to the sender task
#[derive(Debug)]
pub enum GameMessage {
    SendPacket {
        packet: ServerPacket,
        addrs: Vec<SocketAddr>,
    },
}

pub struct Server {
    socket: Arc<UdpSocket>,
    sim: Simulation,
    tick_duration: Duration,
    started: Instant,
    by_addr: HashMap<SocketAddr, ConnectionId>,
    by_conn: HashMap<ConnectionId, SocketAddr>,

    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
    game_tx: mpsc::UnboundedSender<GameMessage>,
    game_rx: Option<mpsc::UnboundedReceiver<GameMessage>>,
}

impl Server {
    pub async fn bind(config: ServerConfig) -> Result<Self, ServerError> {
        let address = config.address();
        let socket = Arc::new(UdpSocket::bind(&address).await?);
        info!(
            "Server listening on {} ({:?} mode, {}Hz)",
            socket.local_addr()?,
            config.mode,
            config.tick_rate
        );

        let tick_duration = Duration::from_millis(config.tick_ms());
        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let (game_tx, game_rx) = mpsc::unbounded_channel();

        Ok(Server {
            socket,
            sim: Simulation::new(config),
            tick_duration,
            started: Instant::now(),
            by_addr: HashMap::new(),
            by_conn: HashMap::new(),
            server_tx,
            server_rx,
            game_tx,
            game_rx: Some(game_rx),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.socket.local_addr()?)
    }

    /// Sender that can stop the main loop with [`ServerMessage::Shutdown`].
    pub fn handle(&self) -> mpsc::UnboundedSender<ServerMessage> {
        self.server_tx.clone()
    }

    pub fn simulation(&self) -> &Simulation {
        &self.sim
    }

    fn now_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    /// Spawns task that continuously listens for incoming packets
    fn spawn_network_receiver(&self) {
        let socket = Arc::clone(&self.socket);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut buffer = [0u8; MAX_DATAGRAM];

            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => match deserialize::<ClientPacket>(&buffer[..len]) {
                        Ok(packet) => {
                            if server_tx
                                .send(ServerMessage::PacketReceived { packet, addr })
                                .is_err()
                            {
                                debug!("Main loop gone, receiver stopping");
                                break;
                            }
                        }
                        Err(e) => warn!("Failed to decode packet from {}: {}", addr, e),
                    },
                    Err(e) => {
                        error!("Error receiving packet: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        });
    }

    /// Spawns task that processes outgoing packet queue
    fn spawn_network_sender(&mut self) {
        let socket = Arc::clone(&self.socket);
        let Some(mut game_rx) = self.game_rx.take() else {
            return;
        };

        tokio::spawn(async move {
            while let Some(message) = game_rx.recv().await {
                let GameMessage::SendPacket { packet, addrs } = message;
                let data = match serialize(&packet) {
                    Ok(data) => data,
                    Err(e) => {
                        error!("Failed to encode {:?}: {}", packet, e);
                        continue;
                    }
                };
                for addr in addrs {
                    if let Err(e) = socket.send_to(&data, addr).await {
                        error!("Failed to send packet to {}: {}", addr, e);
                    }
                }
            }
        });
    }

    fn handle_packet(&mut self, packet: ClientPacket, addr: SocketAddr) {
        let now = self.now_ms();
        let conn = match self.by_addr.get(&addr) {
            Some(conn) => *conn,
            None => {
                if packet == ClientPacket::Close {
                    return;
                }
                let conn = self.sim.accept(addr, now);
                self.by_addr.insert(addr, conn);
                self.by_conn.insert(conn, addr);
                conn
            }
        };
        self.sim.receive(conn, packet, now);
    }

    /// Hands everything the simulation queued to the sender task.
    fn deliver(&mut self) {
        for item in self.sim.take_outgoing() {
            match item {
                Outgoing::Packet { recipients, packet } => {
                    let addrs: Vec<SocketAddr> = self
                        .sim
                        .resolve(&recipients)
                        .into_iter()
                        .filter_map(|conn| self.by_conn.get(&conn).copied())
                        .collect();
                    if addrs.is_empty() {
                        continue;
                    }
                    if let Err(e) = self.game_tx.send(GameMessage::SendPacket { packet, addrs }) {
                        error!("Failed to queue packet for sending: {}", e);
                    }
                }
                Outgoing::Close(conn) => {
                    if let Some(addr) = self.by_conn.remove(&conn) {
                        self.by_addr.remove(&addr);
                        debug!("Forgot {} ({})", conn, addr);
                    }
                }
            }
        }
    }

    fn next_wakeup(&self) -> Instant {
        match self.sim.next_deadline() {
            Some(deadline_ms) => self.started + Duration::from_millis(deadline_ms),
            None => Instant::now() + Duration::from_secs(3600),
        }
    }

    pub async fn run(&mut self) -> Result<(), ServerError> {
        self.spawn_network_receiver();
        self.spawn_network_sender();

        let mut tick_interval = interval(self.tick_duration);
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!("Server started successfully");

        loop {
            let wakeup = self.next_wakeup();
            tokio::select! {
                message = self.server_rx.recv() => {
                    match message {
                        Some(ServerMessage::PacketReceived { packet, addr }) => {
                            self.handle_packet(packet, addr);
                        }
                        Some(ServerMessage::Shutdown) | None => {
                            info!("Server shutting down");
                            break;
                        }
                    }
                }

                _ = tick_interval.tick() => {
                    let info = self.sim.tick(self.now_ms());
                    if info.frame % 600 == 0 {
                        debug!(
                            "Frame {}: {} players, {} connections",
                            info.frame,
                            self.sim.context().player_count(),
                            self.sim.context().connections.len()
                        );
                    }
                }

                _ = sleep_until(wakeup) => {
                    self.sim.run_timers(self.now_ms());
                }
            }
            self.deliver();
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::PROTOCOL_VERSION;

    async fn start() -> (SocketAddr, mpsc::UnboundedSender<ServerMessage>) {
        let mut config = ServerConfig::default();
        config.port = 0;
        let mut server = Server::bind(config).await.unwrap();
        let addr = server.local_addr().unwrap();
        let handle = server.handle();
        tokio::spawn(async move { server.run().await });
        (addr, handle)
    }

    async fn recv(socket: &UdpSocket) -> ServerPacket {
        let mut buf = [0u8; MAX_DATAGRAM];
        let (len, _) = tokio::time::timeout(Duration::from_secs(2), socket.recv_from(&mut buf))
            .await
            .expect("reply in time")
            .unwrap();
        deserialize(&buf[..len]).unwrap()
    }

    #[tokio::test]
    async fn test_login_round_trip() {
        let (server_addr, handle) = start().await;
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        let login = ClientPacket::Login {
            protocol: PROTOCOL_VERSION,
            name: "ace".to_string(),
            flag: "GB".to_string(),
            horizon_x: 1000.0,
            horizon_y: 600.0,
        };
        client
            .send_to(&serialize(&login).unwrap(), server_addr)
            .await
            .unwrap();

        match recv(&client).await {
            ServerPacket::LoginOk { players, .. } => assert_eq!(players.len(), 1),
            other => panic!("Expected LoginOk, got {:?}", other),
        }
        tokio_test::assert_ok!(handle.send(ServerMessage::Shutdown));
    }

    #[tokio::test]
    async fn test_garbage_datagrams_are_ignored() {
        let (server_addr, handle) = start().await;
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        client.send_to(&[0xff, 0xfe, 0xfd], server_addr).await.unwrap();
        let login = ClientPacket::Login {
            protocol: PROTOCOL_VERSION + 1,
            name: "ace".to_string(),
            flag: "GB".to_string(),
            horizon_x: 1000.0,
            horizon_y: 600.0,
        };
        client
            .send_to(&serialize(&login).unwrap(), server_addr)
            .await
            .unwrap();

        assert_eq!(
            recv(&client).await,
            ServerPacket::Error {
                kind: shared::ErrorKind::InvalidLogin
            }
        );
        tokio_test::assert_ok!(handle.send(ServerMessage::Shutdown));
    }
}
