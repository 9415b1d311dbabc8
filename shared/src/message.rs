use crate::PlayerId;

/// Type byte that leads every payload.
///
/// The numbering is part of the wire format; new types are only ever
/// appended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    // Connection
    Connect = 0,
    ConnectResponse = 1,
    Disconnect = 2,

    // Match lifecycle
    JoinGame = 3,
    LeaveGame = 4,
    GameStart = 5,
    GameEnd = 6,

    // Player actions
    PlayerMove = 7,
    PlayerBuild = 8,
    PlayerAttack = 9,
    PlayerHarvest = 10,

    ResourceUpdate = 11,
    ChatMessage = 12,

    // Upgrades and technologies
    RequestUpgrade = 13,
    UpgradeResponse = 14,
    RequestTechnology = 15,
    TechnologyResponse = 16,
    UpgradeListRequest = 17,
    UpgradeListResponse = 18,

    Error = 19,
    Heartbeat = 20,
}

impl MessageType {
    pub fn from_u8(value: u8) -> Option<Self> {
        use MessageType::*;
        let kind = match value {
            0 => Connect,
            1 => ConnectResponse,
            2 => Disconnect,
            3 => JoinGame,
            4 => LeaveGame,
            5 => GameStart,
            6 => GameEnd,
            7 => PlayerMove,
            8 => PlayerBuild,
            9 => PlayerAttack,
            10 => PlayerHarvest,
            11 => ResourceUpdate,
            12 => ChatMessage,
            13 => RequestUpgrade,
            14 => UpgradeResponse,
            15 => RequestTechnology,
            16 => TechnologyResponse,
            17 => UpgradeListRequest,
            18 => UpgradeListResponse,
            19 => Error,
            20 => Heartbeat,
            _ => return None,
        };
        Some(kind)
    }

    /// Types a client is allowed to send before it has completed `Connect`.
    pub fn is_connection_level(self) -> bool {
        matches!(
            self,
            MessageType::Connect | MessageType::Disconnect | MessageType::Heartbeat
        )
    }

    /// Types that only ever travel from the server to a client.
    pub fn is_server_only(self) -> bool {
        matches!(
            self,
            MessageType::ConnectResponse
                | MessageType::GameStart
                | MessageType::GameEnd
                | MessageType::ResourceUpdate
                | MessageType::UpgradeResponse
                | MessageType::TechnologyResponse
                | MessageType::UpgradeListResponse
                | MessageType::Error
        )
    }
}

/// A decoded protocol message.
///
/// The sender is not part of the wire format: the server attaches it from the
/// connection the bytes arrived on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Connect {
        name: String,
    },
    ConnectResponse {
        player_id: PlayerId,
    },
    Disconnect,

    JoinGame,
    LeaveGame,
    GameStart {
        match_id: u32,
    },
    /// `winner` is 0 when the match ended in a draw.
    GameEnd {
        match_id: u32,
        winner: PlayerId,
    },

    PlayerMove {
        x: i32,
        y: i32,
        unit_ids: Vec<u32>,
    },
    PlayerBuild {
        x: i32,
        y: i32,
        building_type: u32,
    },
    PlayerAttack {
        attacker_id: u32,
        target_id: u32,
    },
    PlayerHarvest {
        unit_id: u32,
        resource_id: u32,
    },

    ResourceUpdate {
        resources: Vec<(String, u32)>,
    },
    Chat {
        team_only: bool,
        text: String,
    },

    RequestUpgrade {
        name: String,
    },
    UpgradeResponse {
        success: bool,
        name: String,
        new_level: i32,
    },
    RequestTechnology {
        name: String,
    },
    TechnologyResponse {
        success: bool,
        name: String,
    },
    UpgradeListRequest,
    UpgradeListResponse {
        upgrades: Vec<String>,
        technologies: Vec<String>,
    },

    Error {
        reason: String,
    },
    Heartbeat {
        timestamp: u64,
    },

    /// A type byte this build does not recognise, kept with its raw body.
    Unknown {
        kind: u8,
        body: Vec<u8>,
    },
}

impl Message {
    /// The type byte this message is encoded with.
    pub fn kind(&self) -> u8 {
        match (self, self.message_type()) {
            (Message::Unknown { kind, .. }, _) => *kind,
            (_, Some(kind)) => kind as u8,
            (_, None) => 0,
        }
    }

    /// `None` for [`Message::Unknown`].
    pub fn message_type(&self) -> Option<MessageType> {
        let kind = match self {
            Message::Connect { .. } => MessageType::Connect,
            Message::ConnectResponse { .. } => MessageType::ConnectResponse,
            Message::Disconnect => MessageType::Disconnect,
            Message::JoinGame => MessageType::JoinGame,
            Message::LeaveGame => MessageType::LeaveGame,
            Message::GameStart { .. } => MessageType::GameStart,
            Message::GameEnd { .. } => MessageType::GameEnd,
            Message::PlayerMove { .. } => MessageType::PlayerMove,
            Message::PlayerBuild { .. } => MessageType::PlayerBuild,
            Message::PlayerAttack { .. } => MessageType::PlayerAttack,
            Message::PlayerHarvest { .. } => MessageType::PlayerHarvest,
            Message::ResourceUpdate { .. } => MessageType::ResourceUpdate,
            Message::Chat { .. } => MessageType::ChatMessage,
            Message::RequestUpgrade { .. } => MessageType::RequestUpgrade,
            Message::UpgradeResponse { .. } => MessageType::UpgradeResponse,
            Message::RequestTechnology { .. } => MessageType::RequestTechnology,
            Message::TechnologyResponse { .. } => MessageType::TechnologyResponse,
            Message::UpgradeListRequest => MessageType::UpgradeListRequest,
            Message::UpgradeListResponse { .. } => MessageType::UpgradeListResponse,
            Message::Error { .. } => MessageType::Error,
            Message::Heartbeat { .. } => MessageType::Heartbeat,
            Message::Unknown { .. } => return None,
        };
        Some(kind)
    }

    pub fn error(reason: impl Into<String>) -> Self {
        Message::Error {
            reason: reason.into(),
        }
    }
}
