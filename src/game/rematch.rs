// Rematch voting: restarting a completed room with the players who want
// to go again.
//
// Every current member gets a vote. Once the last vote lands the tally
// is final: with at least two players in favor the room resets to
// `waiting` with the decliners removed; otherwise the votes are cleared
// and the room stays completed.

use thiserror::Error;
use tracing::info;

use crate::db::Database;
use crate::game::room::RoomStatus;

#[derive(Debug, Error)]
pub enum RematchError {
    #[error("room not found")]
    RoomNotFound,

    #[error("rematches can only be called on a completed room")]
    RoomNotCompleted,

    #[error("player is not in this room")]
    NotInRoom,

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl RematchError {
    pub fn code(&self) -> &'static str {
        match self {
            RematchError::RoomNotFound => "room_not_found",
            RematchError::RoomNotCompleted => "room_not_completed",
            RematchError::NotInRoom => "not_in_room",
            RematchError::Storage(_) => "storage",
        }
    }
}

/// Where the rematch stands after a vote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RematchResolution {
    /// Some players have not voted yet.
    Pending { votes_in: usize, votes_needed: usize },
    /// Everyone voted and at least two said yes: the room is back in
    /// `waiting` with these players.
    Restarted { players: Vec<String> },
    /// Everyone voted but fewer than two said yes; the room stays
    /// completed and the ballot is cleared.
    NotEnoughInterest,
}

/// Cast (or change) a rematch vote. The tally resolves once every
/// current member of the room has voted.
pub fn vote_on_rematch(
    db: &Database,
    room_id: &str,
    player_id: &str,
    yes: bool,
) -> Result<RematchResolution, RematchError> {
    let room = db.get_room(room_id)?.ok_or(RematchError::RoomNotFound)?;
    if room.status != RoomStatus::Completed {
        return Err(RematchError::RoomNotCompleted);
    }
    let players = db.list_room_players(room_id)?;
    if !players.iter().any(|p| p.player_id == player_id) {
        return Err(RematchError::NotInRoom);
    }

    db.upsert_rematch_vote(room_id, player_id, yes)?;

    let votes = db.list_rematch_votes(room_id)?;
    if votes.len() < players.len() {
        return Ok(RematchResolution::Pending {
            votes_in: votes.len(),
            votes_needed: players.len(),
        });
    }

    let yes_voters: Vec<String> = players
        .iter()
        .filter(|p| {
            votes
                .iter()
                .any(|(voter, v)| *v && voter == &p.player_id)
        })
        .map(|p| p.player_id.clone())
        .collect();

    if yes_voters.len() < 2 {
        db.clear_rematch_votes(room_id)?;
        info!(room_id, "rematch fell through, room stays completed");
        return Ok(RematchResolution::NotEnoughInterest);
    }

    let removed: Vec<String> = players
        .iter()
        .filter(|p| !yes_voters.contains(&p.player_id))
        .map(|p| p.player_id.clone())
        .collect();

    // Fresh game: history wiped, decliners gone, gameweek assigned again
    // at start time just like a newly created room.
    db.reset_room_for_rematch(room_id, &removed, 0)?;
    if !yes_voters.contains(&room.host) {
        db.set_room_host(room_id, &yes_voters[0])?;
    }

    info!(
        room_id,
        players = yes_voters.len(),
        removed = removed.len(),
        "rematch agreed, room reset"
    );

    Ok(RematchResolution::Restarted {
        players: yes_voters,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::Gameweek;
    use crate::game::room::{
        create_room, join_room, start_room, DoubleGameweekRule, NewRoom, NoPickPolicy,
        PlayerStatus, Visibility,
    };
    use crate::game::team::TeamId;
    use chrono::{DateTime, TimeZone, Utc};

    fn test_db() -> Database {
        Database::open(":memory:").expect("in-memory database should open")
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 1, 12, 0, 0).unwrap()
    }

    fn completed_room(db: &Database, players: &[&str]) -> String {
        db.upsert_gameweek(&Gameweek {
            number: 1,
            deadline: Utc.with_ymd_and_hms(2026, 8, 15, 11, 0, 0).unwrap(),
            is_finished: false,
        })
        .unwrap();
        let room = create_room(
            db,
            NewRoom {
                name: "Pool".into(),
                buy_in: 1000,
                capacity: 8,
                visibility: Visibility::Public,
                host: players[0].into(),
                deal_threshold: 2,
                no_pick_policy: NoPickPolicy::Eliminate,
                double_gameweek_rule: DoubleGameweekRule::FirstOnly,
            },
            t0(),
        )
        .unwrap();
        for p in &players[1..] {
            join_room(db, &room.id, p, None, t0()).unwrap();
        }
        start_room(db, &room.id, players[0]).unwrap();
        // End the game: everyone but the host is knocked out.
        for p in &players[1..] {
            db.eliminate_player(&room.id, p, 1, t0()).unwrap();
        }
        db.set_room_progress(&room.id, RoomStatus::Completed, 1, 1)
            .unwrap();
        room.id
    }

    #[test]
    fn unanimous_yes_restarts_with_everyone() {
        let db = test_db();
        let room_id = completed_room(&db, &["alice", "bob", "carol"]);
        // Leftover pick history should not survive into the new game.
        db.upsert_pick(&crate::game::pick::Pick {
            room_id: room_id.clone(),
            player_id: "alice".into(),
            gameweek: 1,
            team: TeamId::Arsenal,
            is_locked: true,
            result: crate::game::result::Outcome::Win,
            updated_at: t0(),
        })
        .unwrap();

        assert_eq!(
            vote_on_rematch(&db, &room_id, "alice", true).unwrap(),
            RematchResolution::Pending {
                votes_in: 1,
                votes_needed: 3
            }
        );
        vote_on_rematch(&db, &room_id, "bob", true).unwrap();
        let resolution = vote_on_rematch(&db, &room_id, "carol", true).unwrap();
        assert_eq!(
            resolution,
            RematchResolution::Restarted {
                players: vec!["alice".into(), "bob".into(), "carol".into()]
            }
        );

        let room = db.get_room(&room_id).unwrap().unwrap();
        assert_eq!(room.status, RoomStatus::Waiting);
        assert_eq!(room.current_round, 1);
        assert_eq!(room.host, "alice");

        let players = db.list_room_players(&room_id).unwrap();
        assert_eq!(players.len(), 3);
        assert!(players.iter().all(|p| p.status == PlayerStatus::Active));
        assert!(db.list_player_picks(&room_id, "alice").unwrap().is_empty());
    }

    #[test]
    fn decliners_are_removed_from_the_rematch() {
        let db = test_db();
        let room_id = completed_room(&db, &["alice", "bob", "carol"]);

        vote_on_rematch(&db, &room_id, "alice", true).unwrap();
        vote_on_rematch(&db, &room_id, "bob", true).unwrap();
        let resolution = vote_on_rematch(&db, &room_id, "carol", false).unwrap();
        assert_eq!(
            resolution,
            RematchResolution::Restarted {
                players: vec!["alice".into(), "bob".into()]
            }
        );

        let players = db.list_room_players(&room_id).unwrap();
        assert_eq!(players.len(), 2);
        assert!(!players.iter().any(|p| p.player_id == "carol"));
    }

    #[test]
    fn declining_host_is_replaced() {
        let db = test_db();
        let room_id = completed_room(&db, &["alice", "bob", "carol"]);

        vote_on_rematch(&db, &room_id, "alice", false).unwrap();
        vote_on_rematch(&db, &room_id, "bob", true).unwrap();
        vote_on_rematch(&db, &room_id, "carol", true).unwrap();

        let room = db.get_room(&room_id).unwrap().unwrap();
        assert_eq!(room.host, "bob");
        assert_eq!(db.list_room_players(&room_id).unwrap().len(), 2);
    }

    #[test]
    fn too_few_yes_votes_clears_the_ballot() {
        let db = test_db();
        let room_id = completed_room(&db, &["alice", "bob", "carol"]);

        vote_on_rematch(&db, &room_id, "alice", true).unwrap();
        vote_on_rematch(&db, &room_id, "bob", false).unwrap();
        let resolution = vote_on_rematch(&db, &room_id, "carol", false).unwrap();
        assert_eq!(resolution, RematchResolution::NotEnoughInterest);

        let room = db.get_room(&room_id).unwrap().unwrap();
        assert_eq!(room.status, RoomStatus::Completed);
        assert_eq!(db.list_room_players(&room_id).unwrap().len(), 3);
        // A fresh ballot can start from scratch.
        assert!(db.list_rematch_votes(&room_id).unwrap().is_empty());
    }

    #[test]
    fn vote_changes_count_once() {
        let db = test_db();
        let room_id = completed_room(&db, &["alice", "bob"]);

        vote_on_rematch(&db, &room_id, "alice", false).unwrap();
        assert_eq!(
            vote_on_rematch(&db, &room_id, "alice", true).unwrap(),
            RematchResolution::Pending {
                votes_in: 1,
                votes_needed: 2
            }
        );
        let resolution = vote_on_rematch(&db, &room_id, "bob", true).unwrap();
        assert!(matches!(resolution, RematchResolution::Restarted { .. }));
    }

    #[test]
    fn only_completed_rooms_accept_rematch_votes() {
        let db = test_db();
        db.upsert_gameweek(&Gameweek {
            number: 1,
            deadline: Utc.with_ymd_and_hms(2026, 8, 15, 11, 0, 0).unwrap(),
            is_finished: false,
        })
        .unwrap();
        let room = create_room(
            &db,
            NewRoom {
                name: "Pool".into(),
                buy_in: 0,
                capacity: 4,
                visibility: Visibility::Public,
                host: "alice".into(),
                deal_threshold: 2,
                no_pick_policy: NoPickPolicy::Eliminate,
                double_gameweek_rule: DoubleGameweekRule::FirstOnly,
            },
            t0(),
        )
        .unwrap();

        assert!(matches!(
            vote_on_rematch(&db, &room.id, "alice", true),
            Err(RematchError::RoomNotCompleted)
        ));
    }

    #[test]
    fn outsider_votes_rejected() {
        let db = test_db();
        let room_id = completed_room(&db, &["alice", "bob"]);
        assert!(matches!(
            vote_on_rematch(&db, &room_id, "mallory", true),
            Err(RematchError::NotInRoom)
        ));
    }
}
