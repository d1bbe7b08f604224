// Wire protocol: JSON messages exchanged with clients over the
// websocket. Commands come in, replies go out; both are internally
// tagged on `type`.

use serde::{Deserialize, Serialize};

use crate::game::deal::DealVote;
use crate::game::room::{NewRoom, RoomStatusView};

/// A client request. Every room-scoped command names the acting player
/// explicitly; the server holds no per-connection session state.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientCommand {
    CreateRoom(NewRoom),
    JoinRoom {
        room_id: String,
        player_id: String,
        #[serde(default)]
        invite_code: Option<String>,
    },
    LeaveRoom {
        room_id: String,
        player_id: String,
    },
    StartRoom {
        room_id: String,
        player_id: String,
    },
    SubmitPick {
        room_id: String,
        player_id: String,
        gameweek: u32,
        /// Three-letter team code; validated server-side.
        team: String,
    },
    RemovePick {
        room_id: String,
        player_id: String,
        gameweek: u32,
    },
    CreateDealRequest {
        room_id: String,
        player_id: String,
    },
    VoteDeal {
        room_id: String,
        player_id: String,
        vote: DealVote,
    },
    VoteRematch {
        room_id: String,
        player_id: String,
        accept: bool,
    },
    GetRoomStatus {
        room_id: String,
    },
}

/// Where a deal or rematch ballot stands after a command.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BallotOutcome {
    Pending,
    Accepted,
    Declined,
}

/// A server response to a single client command.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerReply {
    RoomCreated {
        room_id: String,
        invite_code: String,
    },
    Joined {
        room_id: String,
        player_id: String,
    },
    Left {
        room_id: String,
        player_id: String,
    },
    RoomStarted {
        room_id: String,
        gameweek: u32,
    },
    PickAccepted {
        room_id: String,
        gameweek: u32,
        team: String,
    },
    PickRemoved {
        room_id: String,
    },
    DealOpened {
        room_id: String,
        deal_id: i64,
        snapshot: Vec<String>,
        expires_at: String,
    },
    DealResult {
        room_id: String,
        outcome: BallotOutcome,
        /// Populated only when the deal was accepted.
        winners: Vec<String>,
        /// Each winner's share in pence; zero unless accepted.
        share: i64,
    },
    RematchResult {
        room_id: String,
        outcome: BallotOutcome,
        /// The players carrying on, when the rematch went ahead.
        players: Vec<String>,
    },
    RoomStatus(RoomStatusView),
    Error {
        code: String,
        message: String,
    },
}

impl ServerReply {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        ServerReply::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }
}
