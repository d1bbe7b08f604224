// Gameweek result processing: the one writer of eliminations and room
// advancement.
//
// Processing is idempotent per (room, gameweek): once a room has moved
// past a gameweek, calling again reports a skip and changes nothing. A
// rerun after a partial failure reuses stored pick results rather than
// recomputing them.

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::info;

use crate::db::Database;
use crate::game::pick::fallback_pick_team;
use crate::game::result::{gameweek_resolvable, team_outcome, Outcome};
use crate::game::room::{NoPickPolicy, PlayerStatus, RoomStatus};

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("room not found")]
    RoomNotFound,

    #[error("gameweek {0} is not fully resolved yet")]
    GameweekNotResolvable(u32),

    #[error("room has no active players before processing")]
    NoActivePlayers,

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl ProcessError {
    pub fn code(&self) -> &'static str {
        match self {
            ProcessError::RoomNotFound => "room_not_found",
            ProcessError::GameweekNotResolvable(_) => "gameweek_not_resolvable",
            ProcessError::NoActivePlayers => "no_active_players",
            ProcessError::Storage(_) => "storage",
        }
    }
}

/// What one processing pass did to a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSummary {
    /// True when the room had already moved past this gameweek (or is
    /// flagged) and nothing was touched.
    pub skipped: bool,
    /// Players eliminated by this pass, in join order.
    pub eliminated: Vec<String>,
    /// Players brought back by the all-eliminated recovery rule.
    pub recovered: usize,
    pub status: RoomStatus,
    pub round: u32,
    pub gameweek: u32,
}

/// Resolve one finished gameweek for one room: write pick results,
/// eliminate losers and drawers, apply the no-pick policy, then either
/// advance the room a round or complete it.
///
/// The caller is responsible for having synced fixtures into the
/// database first; this function never touches the network.
pub fn process_gameweek_results(
    db: &Database,
    room_id: &str,
    gameweek: u32,
    now: DateTime<Utc>,
) -> Result<ProcessSummary, ProcessError> {
    let room = db.get_room(room_id)?.ok_or(ProcessError::RoomNotFound)?;

    if room.status != RoomStatus::Active
        || room.current_gameweek != gameweek
        || room.flagged_at.is_some()
    {
        return Ok(ProcessSummary {
            skipped: true,
            eliminated: Vec::new(),
            recovered: 0,
            status: room.status,
            round: room.current_round,
            gameweek: room.current_gameweek,
        });
    }

    let fixtures = db.list_fixtures(gameweek)?;
    if !gameweek_resolvable(&fixtures) {
        return Err(ProcessError::GameweekNotResolvable(gameweek));
    }

    let mut players = db.list_room_players(room_id)?;
    if !players.iter().any(|p| p.status == PlayerStatus::Active) {
        // A rerun can land between an all-eliminated pass's last
        // elimination write and its recovery. Members eliminated at this
        // very gameweek mark that state; bringing them back and
        // repeating the pass finishes the interrupted run. Zero actives
        // with nobody eliminated here is real corruption.
        if db.reactivate_players_eliminated_in(room_id, gameweek)? == 0 {
            return Err(ProcessError::NoActivePlayers);
        }
        players = db.list_room_players(room_id)?;
    }
    let active: Vec<_> = players
        .iter()
        .filter(|p| p.status == PlayerStatus::Active)
        .collect();

    let mut eliminated = Vec::new();
    for player in &active {
        let outcome = match db.get_pick(room_id, &player.player_id, gameweek)? {
            Some(pick) if pick.result != Outcome::Pending => pick.result,
            Some(pick) => {
                let outcome = team_outcome(&fixtures, pick.team, room.double_gameweek_rule);
                db.set_pick_result(room_id, &player.player_id, gameweek, outcome, now)?;
                outcome
            }
            None => match room.no_pick_policy {
                NoPickPolicy::Eliminate => Outcome::Lose,
                NoPickPolicy::RandomPick => {
                    let used: Vec<_> = db
                        .list_player_picks(room_id, &player.player_id)?
                        .iter()
                        .map(|p| p.team)
                        .collect();
                    match fallback_pick_team(&used, &fixtures) {
                        Some(team) => {
                            let outcome = team_outcome(&fixtures, team, room.double_gameweek_rule);
                            db.upsert_pick(&crate::game::pick::Pick {
                                room_id: room_id.to_string(),
                                player_id: player.player_id.clone(),
                                gameweek,
                                team,
                                is_locked: true,
                                result: outcome,
                                updated_at: now,
                            })?;
                            outcome
                        }
                        None => Outcome::Lose,
                    }
                }
            },
        };

        if outcome != Outcome::Win {
            db.eliminate_player(room_id, &player.player_id, gameweek, now)?;
            eliminated.push(player.player_id.clone());
        }
    }

    // All-eliminated recovery: if nobody won, the round is voided for
    // everyone who fell this gameweek and they all go again.
    let mut recovered = 0;
    if eliminated.len() == active.len() {
        recovered = db.reactivate_players_eliminated_in(room_id, gameweek)?;
        eliminated.clear();
    }

    let survivors = active.len() - eliminated.len();
    let (status, round, current_gameweek) = if survivors <= 1 {
        (RoomStatus::Completed, room.current_round, gameweek)
    } else {
        match db.next_open_gameweek(gameweek)? {
            Some(next) => (RoomStatus::Active, room.current_round + 1, next.number),
            // Season ran out with several players standing: the pot is
            // shared between them.
            None => (RoomStatus::Completed, room.current_round, gameweek),
        }
    };
    db.set_room_progress(room_id, status, round, current_gameweek)?;
    db.set_last_notified_gameweek(room_id, gameweek)?;

    info!(
        room_id,
        gameweek,
        eliminated = eliminated.len(),
        recovered,
        survivors,
        status = status.as_str(),
        "processed gameweek results"
    );

    Ok(ProcessSummary {
        skipped: false,
        eliminated,
        recovered,
        status,
        round,
        gameweek: current_gameweek,
    })
}
