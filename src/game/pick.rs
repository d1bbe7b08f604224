// Pick submission for the current or a future gameweek.
//
// A pick is mutable until its own gameweek's deadline, then locked
// forever. The lock is computed from the deadline, not stored ahead of
// time, so a clock that moves past the deadline locks every open pick
// at once.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::db::Database;
use crate::feed::Fixture;
use crate::game::result::Outcome;
use crate::game::room::{PlayerStatus, RoomStatus};
use crate::game::team::{TeamId, ALL_TEAMS};

/// One player's team choice for one gameweek of one room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pick {
    pub room_id: String,
    pub player_id: String,
    pub gameweek: u32,
    pub team: TeamId,
    /// Set once results are written; locked picks never change again.
    pub is_locked: bool,
    pub result: Outcome,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum PickError {
    #[error("room not found")]
    RoomNotFound,

    #[error("room is not taking picks")]
    RoomNotActive,

    #[error("player is not in this room")]
    NotInRoom,

    #[error("player has been eliminated")]
    PlayerEliminated,

    #[error("unknown team code `{0}`")]
    UnknownTeam(String),

    #[error("team already used in gameweek {gameweek}")]
    TeamAlreadyUsed { gameweek: u32 },

    #[error("pick deadline has passed")]
    DeadlinePassed,

    #[error("no schedule for gameweek {0}")]
    UnknownGameweek(u32),

    #[error("no pick submitted for this gameweek")]
    NoPick,

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl PickError {
    /// Stable error code surfaced to API clients.
    pub fn code(&self) -> &'static str {
        match self {
            PickError::RoomNotFound => "room_not_found",
            PickError::RoomNotActive => "room_not_active",
            PickError::NotInRoom => "not_in_room",
            PickError::PlayerEliminated => "player_eliminated",
            PickError::UnknownTeam(_) => "unknown_team",
            PickError::TeamAlreadyUsed { .. } => "team_already_used",
            PickError::DeadlinePassed => "deadline_passed",
            PickError::UnknownGameweek(_) => "unknown_gameweek",
            PickError::NoPick => "no_pick",
            PickError::Storage(_) => "storage",
        }
    }
}

/// Submit (or change) the player's pick for the given gameweek, which
/// may be the room's current one or any later gameweek whose deadline
/// is still open. Gameweeks the room has moved past are closed.
///
/// Resubmitting the same team for the same gameweek is a no-op that
/// succeeds; the reuse ban only looks at other gameweeks of the room.
pub fn submit_pick(
    db: &Database,
    room_id: &str,
    player_id: &str,
    gameweek: u32,
    team: TeamId,
    now: DateTime<Utc>,
) -> Result<Pick, PickError> {
    let room = db.get_room(room_id)?.ok_or(PickError::RoomNotFound)?;
    if room.status != RoomStatus::Active {
        return Err(PickError::RoomNotActive);
    }
    let player = db
        .get_room_player(room_id, player_id)?
        .ok_or(PickError::NotInRoom)?;
    if player.status == PlayerStatus::Eliminated {
        return Err(PickError::PlayerEliminated);
    }

    if gameweek < room.current_gameweek {
        return Err(PickError::DeadlinePassed);
    }
    let schedule = db
        .get_gameweek(gameweek)?
        .ok_or(PickError::UnknownGameweek(gameweek))?;
    if now >= schedule.deadline {
        return Err(PickError::DeadlinePassed);
    }
    if let Some(existing) = db.get_pick(room_id, player_id, gameweek)? {
        if existing.is_locked {
            return Err(PickError::DeadlinePassed);
        }
    }

    for other in db.list_player_picks(room_id, player_id)? {
        if other.team == team && other.gameweek != gameweek {
            return Err(PickError::TeamAlreadyUsed {
                gameweek: other.gameweek,
            });
        }
    }

    let pick = Pick {
        room_id: room_id.to_string(),
        player_id: player_id.to_string(),
        gameweek,
        team,
        is_locked: false,
        result: Outcome::Pending,
        updated_at: now,
    };
    db.upsert_pick(&pick)?;
    Ok(pick)
}

/// Withdraw the player's pick for the given gameweek. Only possible
/// while that gameweek's deadline is open.
pub fn remove_pick(
    db: &Database,
    room_id: &str,
    player_id: &str,
    gameweek: u32,
    now: DateTime<Utc>,
) -> Result<(), PickError> {
    let room = db.get_room(room_id)?.ok_or(PickError::RoomNotFound)?;
    if room.status != RoomStatus::Active {
        return Err(PickError::RoomNotActive);
    }
    if db.get_room_player(room_id, player_id)?.is_none() {
        return Err(PickError::NotInRoom);
    }
    if gameweek < room.current_gameweek {
        return Err(PickError::DeadlinePassed);
    }
    let schedule = db
        .get_gameweek(gameweek)?
        .ok_or(PickError::UnknownGameweek(gameweek))?;
    if now >= schedule.deadline {
        return Err(PickError::DeadlinePassed);
    }
    let pick = db
        .get_pick(room_id, player_id, gameweek)?
        .ok_or(PickError::NoPick)?;
    if pick.is_locked {
        return Err(PickError::DeadlinePassed);
    }
    db.delete_pick(room_id, player_id, gameweek)?;
    Ok(())
}

/// Deterministic stand-in pick for the `random_pick` no-pick policy: the
/// first team in canonical order the player has not used that actually
/// plays this gameweek, falling back to the first unused team overall.
/// `None` only when the player has burned all 20 teams.
pub fn fallback_pick_team(used: &[TeamId], fixtures: &[Fixture]) -> Option<TeamId> {
    let unused = || ALL_TEAMS.iter().copied().filter(|t| !used.contains(t));
    unused()
        .find(|t| {
            fixtures
                .iter()
                .any(|f| f.home_team == *t || f.away_team == *t)
        })
        .or_else(|| unused().next())
}
