//! Outbound packets queued by systems for the transport

use crate::connection_registry::ConnectionId;
use shared::ServerPacket;

#[derive(Debug, Clone, PartialEq)]
pub enum Recipients {
    One(ConnectionId),
    Many(Vec<ConnectionId>),
    /// Every logged-in player's main connection.
    All,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outgoing {
    Packet {
        recipients: Recipients,
        packet: ServerPacket,
    },
    Close(ConnectionId),
}

/// Delivery is best-effort and never awaited by the simulation.
#[derive(Debug, Default)]
pub struct Outbox {
    items: Vec<Outgoing>,
}

impl Outbox {
    pub fn send(&mut self, recipients: Recipients, packet: ServerPacket) {
        if let Recipients::Many(list) = &recipients {
            if list.is_empty() {
                return;
            }
        }
        self.items.push(Outgoing::Packet { recipients, packet });
    }

    pub fn send_to(&mut self, conn: ConnectionId, packet: ServerPacket) {
        self.send(Recipients::One(conn), packet);
    }

    pub fn close(&mut self, conn: ConnectionId) {
        self.items.push(Outgoing::Close(conn));
    }

    pub fn items(&self) -> &[Outgoing] {
        &self.items
    }

    pub fn drain(&mut self) -> Vec<Outgoing> {
        std::mem::take(&mut self.items)
    }

    /// Packets addressed to `conn` directly or through a list, in queue order.
    /// Broadcasts to `All` are not included.
    pub fn packets_for(&self, conn: ConnectionId) -> Vec<&ServerPacket> {
        self.items
            .iter()
            .filter_map(|item| match item {
                Outgoing::Packet {
                    recipients: Recipients::One(c),
                    packet,
                } if *c == conn => Some(packet),
                Outgoing::Packet {
                    recipients: Recipients::Many(list),
                    packet,
                } if list.contains(&conn) => Some(packet),
                _ => None,
            })
            .collect()
    }

    pub fn closed(&self) -> Vec<ConnectionId> {
        self.items
            .iter()
            .filter_map(|item| match item {
                Outgoing::Close(conn) => Some(*conn),
                _ => None,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
