// Deal requests: unanimous agreement among the remaining players to
// split the pot and end the game early.
//
// A deal is only offered to the players who were active when it was
// proposed (the snapshot). Votes can change until the request expires;
// a decline on record blocks finalisation without ending the request,
// and unanimous accepts complete the room with the snapshot as joint
// winners. Only expiry ends a request that never went unanimous.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::db::Database;
use crate::game::room::{PlayerStatus, RoomStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DealStatus {
    Pending,
    Accepted,
    Declined,
    Expired,
}

impl DealStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DealStatus::Pending => "pending",
            DealStatus::Accepted => "accepted",
            DealStatus::Declined => "declined",
            DealStatus::Expired => "expired",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(DealStatus::Pending),
            "accepted" => Some(DealStatus::Accepted),
            "declined" => Some(DealStatus::Declined),
            "expired" => Some(DealStatus::Expired),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DealVote {
    Accept,
    Decline,
}

impl DealVote {
    pub fn as_str(&self) -> &'static str {
        match self {
            DealVote::Accept => "accept",
            DealVote::Decline => "decline",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "accept" => Some(DealVote::Accept),
            "decline" => Some(DealVote::Decline),
            _ => None,
        }
    }
}

/// A proposed pot split, open for votes until it expires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DealRequest {
    pub id: i64,
    pub room_id: String,
    pub initiator: String,
    /// The room's current gameweek when the deal was proposed.
    pub gameweek: u32,
    pub status: DealStatus,
    /// Active players at proposal time; the only eligible voters.
    pub snapshot: Vec<String>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum DealError {
    #[error("room not found")]
    RoomNotFound,

    #[error("room is not in play")]
    RoomNotActive,

    #[error("only active players can act on deals")]
    NotActivePlayer,

    #[error("a deal needs at least 2 remaining players")]
    NotEnoughPlayers,

    #[error("deals open at {threshold} or fewer remaining players")]
    TooManyPlayers { threshold: u32 },

    #[error("a deal request is already pending")]
    DealAlreadyPending,

    #[error("no pending deal request")]
    DealNotFound,

    #[error("player is not part of this deal")]
    NotInSnapshot,

    #[error("vote already recorded")]
    AlreadyVoted,

    #[error("deal request has expired")]
    DealExpired,

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl DealError {
    pub fn code(&self) -> &'static str {
        match self {
            DealError::RoomNotFound => "room_not_found",
            DealError::RoomNotActive => "room_not_active",
            DealError::NotActivePlayer => "not_active_player",
            DealError::NotEnoughPlayers => "not_enough_players",
            DealError::TooManyPlayers { .. } => "too_many_players",
            DealError::DealAlreadyPending => "deal_already_pending",
            DealError::DealNotFound => "deal_not_found",
            DealError::NotInSnapshot => "not_in_snapshot",
            DealError::AlreadyVoted => "already_voted",
            DealError::DealExpired => "deal_expired",
            DealError::Storage(_) => "storage",
        }
    }
}

/// How a vote left the deal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DealResolution {
    /// Votes still outstanding, or a decline on record. Either way the
    /// request stays open until every vote is an accept or it expires.
    Pending,
    /// Unanimously accepted: the room is completed and each snapshot
    /// player takes `share` pence of the pot.
    Accepted { winners: Vec<String>, share: i64 },
}

/// Propose splitting the pot between the remaining players.
///
/// Allowed only in an active room, by an active player, when between 2
/// and `deal_threshold` players are standing and no other deal is
/// pending. The initiator's accept is recorded immediately.
pub fn create_deal_request(
    db: &Database,
    room_id: &str,
    initiator: &str,
    expiry: Duration,
    now: DateTime<Utc>,
) -> Result<DealRequest, DealError> {
    let room = db.get_room(room_id)?.ok_or(DealError::RoomNotFound)?;
    if room.status != RoomStatus::Active {
        return Err(DealError::RoomNotActive);
    }
    let players = db.list_room_players(room_id)?;
    let snapshot: Vec<String> = players
        .iter()
        .filter(|p| p.status == PlayerStatus::Active)
        .map(|p| p.player_id.clone())
        .collect();

    if !snapshot.iter().any(|p| p == initiator) {
        return Err(DealError::NotActivePlayer);
    }
    if snapshot.len() < 2 {
        return Err(DealError::NotEnoughPlayers);
    }
    if snapshot.len() as u32 > room.deal_threshold {
        return Err(DealError::TooManyPlayers {
            threshold: room.deal_threshold,
        });
    }
    if let Some(open) = db.pending_deal_for_room(room_id)? {
        // Only a live request blocks a new one; a stale row the poll
        // sweep has not reached yet is expired here instead.
        if now < open.expires_at {
            return Err(DealError::DealAlreadyPending);
        }
        db.set_deal_status(open.id, DealStatus::Expired)?;
    }

    let expires_at = now + expiry;
    let id = db.insert_deal_request(
        room_id,
        initiator,
        room.current_gameweek,
        &snapshot,
        expires_at,
        now,
    )?;
    db.upsert_deal_vote(id, initiator, DealVote::Accept)?;

    info!(room_id, deal_id = id, initiator, "deal request opened");

    Ok(DealRequest {
        id,
        room_id: room_id.to_string(),
        initiator: initiator.to_string(),
        gameweek: room.current_gameweek,
        status: DealStatus::Pending,
        snapshot,
        expires_at,
        created_at: now,
    })
}

/// Vote on the room's pending deal request. Changing a previous vote is
/// allowed while the deal is open; repeating the same vote is not.
pub fn vote_on_deal(
    db: &Database,
    room_id: &str,
    player_id: &str,
    vote: DealVote,
    now: DateTime<Utc>,
) -> Result<DealResolution, DealError> {
    let room = db.get_room(room_id)?.ok_or(DealError::RoomNotFound)?;
    let deal = db
        .pending_deal_for_room(room_id)?
        .ok_or(DealError::DealNotFound)?;

    if now >= deal.expires_at {
        db.set_deal_status(deal.id, DealStatus::Expired)?;
        return Err(DealError::DealExpired);
    }
    if !deal.snapshot.iter().any(|p| p == player_id) {
        return Err(DealError::NotInSnapshot);
    }

    let votes = db.list_deal_votes(deal.id)?;
    if votes
        .iter()
        .any(|(p, v)| p == player_id && *v == vote)
    {
        return Err(DealError::AlreadyVoted);
    }
    db.upsert_deal_vote(deal.id, player_id, vote)?;

    let votes = db.list_deal_votes(deal.id)?;
    let unanimous = deal.snapshot.iter().all(|member| {
        votes
            .iter()
            .any(|(p, v)| p == member && *v == DealVote::Accept)
    });
    if !unanimous {
        return Ok(DealResolution::Pending);
    }

    db.set_deal_status(deal.id, DealStatus::Accepted)?;
    db.set_room_status(room_id, RoomStatus::Completed)?;

    let players_total = db.list_room_players(room_id)?.len() as i64;
    let share = room.buy_in * players_total / deal.snapshot.len() as i64;

    info!(
        room_id,
        deal_id = deal.id,
        winners = deal.snapshot.len(),
        share,
        "deal accepted, pot split"
    );

    Ok(DealResolution::Accepted {
        winners: deal.snapshot,
        share,
    })
}
