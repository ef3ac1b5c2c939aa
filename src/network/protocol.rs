use crate::game::{Move, RuleDescriptor, Seat};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Win/loss/draw tally carried with each roster entry.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub wins: u32,
    pub losses: u32,
    pub draws: u32,
}

/// A connected identity: server-assigned nickname plus current seat.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Player {
    pub nickname: String,
    pub seat: Seat,
    #[serde(default)]
    pub record: Record,
}

impl Player {
    pub fn new(nickname: impl Into<String>) -> Self {
        Player {
            nickname: nickname.into(),
            seat: Seat::Observer,
            record: Record::default(),
        }
    }
}

/// Snapshot sent to a newly joined peer: everything needed to rebuild
/// the authoritative game state locally.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GameSyncData {
    pub moves: Vec<Move>,
    pub current_turn: Seat,
    pub rules: Vec<RuleDescriptor>,
    pub black: Option<Player>,
    pub white: Option<Player>,
}

/// The closed wire catalog. Every frame is one of these, discriminated
/// by a `type` field.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Message {
    /// first message a client sends after connecting
    JoinRequest { nickname: String },
    /// reply to the joiner: assigned identity plus the current roster
    JoinResponse {
        accepted: bool,
        me: Player,
        roster: Vec<Player>,
    },
    /// a new client joined; sent to everyone else
    PlayerJoined { player: Player },
    /// a client left or was force-disconnected
    ExitNotice { player: Player },
    /// chat; the server overwrites `sender` with the roster identity
    Chat { sender: Player, text: String },
    /// a placement; the server broadcast carries the authoritative move
    Placement { mv: Move },
    /// private reply when a placement is refused
    PlacementRejected { mv: Move, reason: String },
    GameSync { sync: GameSyncData },
    TimeUpdate { seat: Seat, seconds_left: u32 },
    /// claim a board seat
    SeatJoin { seat: Seat, player: Player },
    /// vacate a board seat
    SeatLeave { seat: Seat, player: Player },
    GameStart,
    GameEnd { winner: Seat, reason: String },
    /// keepalive probe
    Ping,
    /// keepalive answer
    Pong,
}

/// One wire frame: the discriminated payload plus a send timestamp
/// (unix milliseconds), flattened into a single JSON object.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub timestamp: u64,
    #[serde(flatten)]
    pub message: Message,
}

impl Envelope {
    pub fn new(message: Message) -> Self {
        Envelope {
            timestamp: unix_millis(),
            message,
        }
    }

    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn decode(line: &str) -> serde_json::Result<Envelope> {
        serde_json::from_str(line)
    }
}

pub(crate) fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
