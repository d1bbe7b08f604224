// Room aggregate: lifecycle root for one survivor-pool game.
//
// A room moves waiting -> active -> completed. Everything else in the
// game (players, picks, deal requests, rematch votes) is scoped by the
// room id and has no existence outside it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::db::Database;

// ---------------------------------------------------------------------------
// Enums stored as TEXT
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomStatus {
    Waiting,
    Active,
    Completed,
}

impl RoomStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoomStatus::Waiting => "waiting",
            RoomStatus::Active => "active",
            RoomStatus::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "waiting" => Some(RoomStatus::Waiting),
            "active" => Some(RoomStatus::Active),
            "completed" => Some(RoomStatus::Completed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayerStatus {
    Active,
    Eliminated,
    PendingPick,
}

impl PlayerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlayerStatus::Active => "active",
            PlayerStatus::Eliminated => "eliminated",
            PlayerStatus::PendingPick => "pending_pick",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(PlayerStatus::Active),
            "eliminated" => Some(PlayerStatus::Eliminated),
            "pending_pick" => Some(PlayerStatus::PendingPick),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    Public,
    Private,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::Public => "public",
            Visibility::Private => "private",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "public" => Some(Visibility::Public),
            "private" => Some(Visibility::Private),
            _ => None,
        }
    }
}

/// What happens to an active player who misses the pick deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoPickPolicy {
    Eliminate,
    RandomPick,
}

impl NoPickPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            NoPickPolicy::Eliminate => "eliminate",
            NoPickPolicy::RandomPick => "random_pick",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "eliminate" => Some(NoPickPolicy::Eliminate),
            "random_pick" => Some(NoPickPolicy::RandomPick),
            _ => None,
        }
    }
}

/// How a team's result counts when it plays twice in one gameweek.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DoubleGameweekRule {
    FirstOnly,
    BothCount,
}

impl DoubleGameweekRule {
    pub fn as_str(&self) -> &'static str {
        match self {
            DoubleGameweekRule::FirstOnly => "first_only",
            DoubleGameweekRule::BothCount => "both_count",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "first_only" => Some(DoubleGameweekRule::FirstOnly),
            "both_count" => Some(DoubleGameweekRule::BothCount),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// One survivor-pool game.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Room {
    pub id: String,
    pub name: String,
    /// Buy-in per player, in pence.
    pub buy_in: i64,
    pub capacity: u32,
    pub visibility: Visibility,
    /// Join code; checked only for private rooms.
    pub invite_code: String,
    pub host: String,
    pub current_gameweek: u32,
    pub current_round: u32,
    pub status: RoomStatus,
    /// Player count at or below which a deal may be proposed.
    pub deal_threshold: u32,
    pub no_pick_policy: NoPickPolicy,
    pub double_gameweek_rule: DoubleGameweekRule,
    /// Last gameweek whose results were processed and announced for this
    /// room. Server-held cursor so clients never track "seen" state.
    pub last_notified_gameweek: Option<u32>,
    /// Set when processing hit a fatal inconsistency; flagged rooms are
    /// skipped by the poller until manually cleared.
    pub flagged_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// A player's membership in one room.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomPlayer {
    pub room_id: String,
    pub player_id: String,
    pub status: PlayerStatus,
    pub joined_at: DateTime<Utc>,
    pub eliminated_at: Option<DateTime<Utc>>,
    pub eliminated_gameweek: Option<u32>,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum RoomError {
    #[error("room not found")]
    RoomNotFound,

    #[error("room is full ({capacity} players)")]
    RoomFull { capacity: u32 },

    #[error("invalid invite code")]
    InvalidInviteCode,

    #[error("player already joined this room")]
    AlreadyJoined,

    #[error("player is not in this room")]
    NotInRoom,

    #[error("game has already started")]
    GameStarted,

    #[error("only the host can start the room")]
    NotHost,

    #[error("at least 2 players are required to start")]
    NotEnoughPlayers,

    #[error("no open gameweek to start in")]
    NoOpenGameweek,

    #[error("invalid room settings: {0}")]
    InvalidSettings(String),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl RoomError {
    /// Stable error code surfaced to API clients.
    pub fn code(&self) -> &'static str {
        match self {
            RoomError::RoomNotFound => "room_not_found",
            RoomError::RoomFull { .. } => "room_full",
            RoomError::InvalidInviteCode => "invalid_invite_code",
            RoomError::AlreadyJoined => "already_joined",
            RoomError::NotInRoom => "not_in_room",
            RoomError::GameStarted => "game_started",
            RoomError::NotHost => "not_host",
            RoomError::NotEnoughPlayers => "not_enough_players",
            RoomError::NoOpenGameweek => "no_open_gameweek",
            RoomError::InvalidSettings(_) => "invalid_settings",
            RoomError::Storage(_) => "storage",
        }
    }
}

// ---------------------------------------------------------------------------
// Lifecycle operations
// ---------------------------------------------------------------------------

/// Settings for a new room.
#[derive(Debug, Clone, Deserialize)]
pub struct NewRoom {
    pub name: String,
    pub buy_in: i64,
    pub capacity: u32,
    pub visibility: Visibility,
    pub host: String,
    pub deal_threshold: u32,
    pub no_pick_policy: NoPickPolicy,
    pub double_gameweek_rule: DoubleGameweekRule,
}

/// Create a room in `waiting` status. The host joins automatically.
pub fn create_room(db: &Database, new: NewRoom, now: DateTime<Utc>) -> Result<Room, RoomError> {
    if new.capacity < 2 {
        return Err(RoomError::InvalidSettings(
            "capacity must be at least 2".into(),
        ));
    }
    if new.buy_in < 0 {
        return Err(RoomError::InvalidSettings(
            "buy-in must not be negative".into(),
        ));
    }
    if new.deal_threshold < 2 {
        return Err(RoomError::InvalidSettings(
            "deal threshold must be at least 2".into(),
        ));
    }

    let room = Room {
        id: generate_room_id(now),
        name: new.name,
        buy_in: new.buy_in,
        capacity: new.capacity,
        visibility: new.visibility,
        invite_code: generate_invite_code(now),
        host: new.host.clone(),
        current_gameweek: 0,
        current_round: 1,
        status: RoomStatus::Waiting,
        deal_threshold: new.deal_threshold,
        no_pick_policy: new.no_pick_policy,
        double_gameweek_rule: new.double_gameweek_rule,
        last_notified_gameweek: None,
        flagged_at: None,
        created_at: now,
    };
    db.insert_room(&room)?;
    db.insert_room_player(&RoomPlayer {
        room_id: room.id.clone(),
        player_id: new.host,
        status: PlayerStatus::PendingPick,
        joined_at: now,
        eliminated_at: None,
        eliminated_gameweek: None,
    })?;
    Ok(room)
}

/// Join a waiting room. Private rooms require the invite code.
pub fn join_room(
    db: &Database,
    room_id: &str,
    player_id: &str,
    invite_code: Option<&str>,
    now: DateTime<Utc>,
) -> Result<(), RoomError> {
    let room = db.get_room(room_id)?.ok_or(RoomError::RoomNotFound)?;
    if room.status != RoomStatus::Waiting {
        return Err(RoomError::GameStarted);
    }
    if room.visibility == Visibility::Private && invite_code != Some(room.invite_code.as_str()) {
        return Err(RoomError::InvalidInviteCode);
    }
    if db.get_room_player(room_id, player_id)?.is_some() {
        return Err(RoomError::AlreadyJoined);
    }
    let players = db.list_room_players(room_id)?;
    if players.len() as u32 >= room.capacity {
        return Err(RoomError::RoomFull {
            capacity: room.capacity,
        });
    }
    db.insert_room_player(&RoomPlayer {
        room_id: room_id.to_string(),
        player_id: player_id.to_string(),
        status: PlayerStatus::PendingPick,
        joined_at: now,
        eliminated_at: None,
        eliminated_gameweek: None,
    })?;
    Ok(())
}

/// Leave a room. Only permitted while the room is still waiting.
pub fn leave_room(db: &Database, room_id: &str, player_id: &str) -> Result<(), RoomError> {
    let room = db.get_room(room_id)?.ok_or(RoomError::RoomNotFound)?;
    if room.status != RoomStatus::Waiting {
        return Err(RoomError::GameStarted);
    }
    if db.get_room_player(room_id, player_id)?.is_none() {
        return Err(RoomError::NotInRoom);
    }
    db.delete_room_player(room_id, player_id)?;
    Ok(())
}

/// Start the game: host-only, needs at least 2 players and an open
/// gameweek. All players become active and the room enters round 1.
pub fn start_room(db: &Database, room_id: &str, player_id: &str) -> Result<Room, RoomError> {
    let mut room = db.get_room(room_id)?.ok_or(RoomError::RoomNotFound)?;
    if room.status != RoomStatus::Waiting {
        return Err(RoomError::GameStarted);
    }
    if room.host != player_id {
        return Err(RoomError::NotHost);
    }
    let players = db.list_room_players(room_id)?;
    if players.len() < 2 {
        return Err(RoomError::NotEnoughPlayers);
    }
    let gameweek = db
        .next_open_gameweek(0)?
        .ok_or(RoomError::NoOpenGameweek)?;

    db.set_all_player_statuses(room_id, PlayerStatus::Active)?;
    db.set_room_progress(room_id, RoomStatus::Active, 1, gameweek.number)?;

    room.status = RoomStatus::Active;
    room.current_round = 1;
    room.current_gameweek = gameweek.number;
    Ok(room)
}

// ---------------------------------------------------------------------------
// Status view
// ---------------------------------------------------------------------------

/// Snapshot of a room's lifecycle state for API clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomStatusView {
    pub room_id: String,
    pub status: RoomStatus,
    pub round: u32,
    pub gameweek: u32,
    pub players_total: usize,
    pub players_active: usize,
    /// Total prize pot in pence (buy-in times joined players).
    pub pot: i64,
    /// Active players of a completed room: the winner, or the deal group.
    pub winners: Vec<String>,
    pub last_notified_gameweek: Option<u32>,
    pub display_text: String,
}

/// Build the status view for a room.
pub fn room_status(db: &Database, room_id: &str) -> Result<RoomStatusView, RoomError> {
    let room = db.get_room(room_id)?.ok_or(RoomError::RoomNotFound)?;
    let players = db.list_room_players(room_id)?;
    let active: Vec<&RoomPlayer> = players
        .iter()
        .filter(|p| p.status == PlayerStatus::Active)
        .collect();
    let pot = room.buy_in * players.len() as i64;

    let winners: Vec<String> = if room.status == RoomStatus::Completed {
        active.iter().map(|p| p.player_id.clone()).collect()
    } else {
        Vec::new()
    };

    let display_text = match room.status {
        RoomStatus::Waiting => format!(
            "Waiting for players ({}/{})",
            players.len(),
            room.capacity
        ),
        RoomStatus::Active => format!(
            "Round {}, gameweek {}: {} of {} still standing",
            room.current_round,
            room.current_gameweek,
            active.len(),
            players.len()
        ),
        RoomStatus::Completed => match winners.len() {
            0 => "Completed: no winner".to_string(),
            1 => format!("Completed: {} wins the pot", winners[0]),
            n => format!("Completed: pot split {n} ways"),
        },
    };

    Ok(RoomStatusView {
        room_id: room.id,
        status: room.status,
        round: room.current_round,
        gameweek: room.current_gameweek,
        players_total: players.len(),
        players_active: active.len(),
        pot,
        winners,
        last_notified_gameweek: room.last_notified_gameweek,
        display_text,
    })
}

// ---------------------------------------------------------------------------
// Id generation
// ---------------------------------------------------------------------------

/// Room ids are timestamp-derived: `room_YYYYMMDD_HHMMSS_SSS`. The
/// millisecond suffix keeps two rooms created in the same second apart.
pub fn generate_room_id(now: DateTime<Utc>) -> String {
    now.format("room_%Y%m%d_%H%M%S_%3f").to_string()
}

/// Six-character base-36 invite code derived from the creation time.
fn generate_invite_code(now: DateTime<Utc>) -> String {
    const DIGITS: &[u8; 36] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";
    let mut n = now.timestamp_nanos_opt().unwrap_or_default() as u64;
    let mut code = [0u8; 6];
    for slot in code.iter_mut() {
        *slot = DIGITS[(n % 36) as usize];
        n /= 36;
    }
    String::from_utf8_lossy(&code).into_owned()
}
