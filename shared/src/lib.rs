use serde::{Deserialize, Serialize};

pub const PROTOCOL_VERSION: u8 = 5;

/// Player id used as the sender of server-authored chat.
pub const SERVER_PLAYER_ID: u32 = 0;

/// Longest chat text carried by a single packet, in characters.
pub const MAX_CHAT_SEGMENT: usize = 255;

pub const MAX_NAME_LEN: usize = 20;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShipType {
    Predator,
    Goliath,
    Mohawk,
    Tornado,
    Prowler,
}

impl ShipType {
    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            1 => Some(ShipType::Predator),
            2 => Some(ShipType::Goliath),
            3 => Some(ShipType::Mohawk),
            4 => Some(ShipType::Tornado),
            5 => Some(ShipType::Prowler),
            _ => None,
        }
    }

    pub fn id(self) -> u8 {
        match self {
            ShipType::Predator => 1,
            ShipType::Goliath => 2,
            ShipType::Mohawk => 3,
            ShipType::Tornado => 4,
            ShipType::Prowler => 5,
        }
    }

    /// Collision geometry as `(offset_x, offset_y, radius)` circles in ship space.
    pub fn hit_circles(self) -> &'static [(f32, f32, f32)] {
        match self {
            ShipType::Predator => &[(0.0, 5.0, 23.0), (0.0, -15.0, 15.0), (0.0, -25.0, 12.0)],
            ShipType::Goliath => &[
                (0.0, 0.0, 35.0),
                (50.0, 14.0, 16.0),
                (74.0, 26.0, 14.0),
                (30.0, 8.0, 23.0),
                (63.0, 22.0, 15.0),
                (-50.0, 14.0, 16.0),
                (-74.0, 26.0, 14.0),
                (-30.0, 8.0, 23.0),
                (-63.0, 22.0, 15.0),
            ],
            ShipType::Mohawk => &[(0.0, -12.0, 15.0), (0.0, 0.0, 17.0), (0.0, 13.0, 15.0), (0.0, 26.0, 15.0)],
            ShipType::Tornado => &[
                (0.0, 8.0, 18.0),
                (14.0, 12.0, 13.0),
                (-14.0, 12.0, 13.0),
                (0.0, -12.0, 16.0),
                (0.0, -26.0, 14.0),
                (0.0, -35.0, 12.0),
            ],
            ShipType::Prowler => &[
                (0.0, 11.0, 25.0),
                (0.0, -8.0, 18.0),
                (19.0, 20.0, 10.0),
                (-19.0, 20.0, 10.0),
                (0.0, -20.0, 14.0),
            ],
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MobKind {
    PredatorMissile,
    GoliathMissile,
    MohawkMissile,
    TornadoMissile,
    ProwlerMissile,
    Upgrade,
    Shield,
    Inferno,
}

impl MobKind {
    pub fn is_powerup(self) -> bool {
        matches!(self, MobKind::Upgrade | MobKind::Shield | MobKind::Inferno)
    }
}

/// Tells a client which visual representation to drop on `LeaveHorizon`.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum LeaveKind {
    Player,
    Mob,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    ServerFull,
    DuplicateLogin,
    InvalidLogin,
    Timeout,
    ChatThrottled,
    ChatMuted,
    UnknownCommand,
    Kicked,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PlayerSummary {
    pub id: u32,
    pub name: String,
    pub flag: String,
    pub team: u16,
    pub ship: ShipType,
}

/// Packets sent by clients.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum ClientPacket {
    Login {
        protocol: u8,
        name: String,
        flag: String,
        horizon_x: f32,
        horizon_y: f32,
    },
    Backup {
        token: u64,
    },
    Ack,
    Pong {
        num: u32,
    },
    Horizon {
        horizon_x: f32,
        horizon_y: f32,
    },
    Chat {
        text: String,
    },
    TeamChat {
        text: String,
    },
    Whisper {
        target: u32,
        text: String,
    },
    VoteMute {
        target: u32,
    },
    Command {
        com: String,
        data: String,
    },
    Close,
}

/// Packets sent by the server.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum ServerPacket {
    LoginOk {
        id: u32,
        team: u16,
        token: u64,
        players: Vec<PlayerSummary>,
    },
    BackupOk,
    Ping {
        num: u32,
        clock: u64,
    },
    Error {
        kind: ErrorKind,
    },
    PlayerNew(PlayerSummary),
    PlayerLeave {
        id: u32,
    },
    PlayerUpdate {
        id: u32,
        x: f32,
        y: f32,
        rot: f32,
    },
    PlayerRespawn {
        id: u32,
        x: f32,
        y: f32,
    },
    PlayerType {
        id: u32,
        ship: ShipType,
    },
    PlayerReteam {
        id: u32,
        team: u16,
    },
    MobUpdate {
        id: u32,
        kind: MobKind,
        x: f32,
        y: f32,
    },
    MobDespawn {
        id: u32,
    },
    MobDespawnCoords {
        id: u32,
        x: f32,
        y: f32,
    },
    LeaveHorizon {
        id: u32,
        kind: LeaveKind,
    },
    ChatPublic {
        id: u32,
        text: String,
    },
    ChatTeam {
        id: u32,
        text: String,
    },
    ChatWhisper {
        from: u32,
        to: u32,
        text: String,
    },
    ChatVoteMutePassed {
        id: u32,
    },
    ScoreBoard {
        entries: Vec<(u32, u32)>,
    },
}
