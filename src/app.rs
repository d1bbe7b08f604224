// Engine orchestration.
//
// The central event loop: serves client commands arriving over the
// WebSocket channel and drives the periodic fixture poll that syncs
// scores and resolves finished gameweeks. Each room is processed
// independently so one bad room never stalls the others.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::db::Database;
use crate::feed::FixtureFeed;
use crate::game::deal::{create_deal_request, vote_on_deal, DealResolution};
use crate::game::elimination::{process_gameweek_results, ProcessError};
use crate::game::pick::{remove_pick, submit_pick};
use crate::game::rematch::{vote_on_rematch, RematchResolution};
use crate::game::result::gameweek_resolvable;
use crate::game::room::{
    create_room, join_room, leave_room, room_status, start_room, Room, RoomStatus,
};
use crate::game::team::TeamId;
use crate::protocol::{BallotOutcome, ClientCommand, ServerReply};
use crate::ws_server::WsEvent;

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// The long-running server core. Owns the database handle, the fixture
/// feed, and the set of connected clients.
pub struct Engine {
    config: Config,
    db: Database,
    feed: Arc<dyn FixtureFeed>,
    /// Reply channels for connected clients, keyed by peer address.
    clients: HashMap<String, mpsc::Sender<String>>,
}

impl Engine {
    pub fn new(config: Config, db: Database, feed: Arc<dyn FixtureFeed>) -> Self {
        Engine {
            config,
            db,
            feed,
            clients: HashMap::new(),
        }
    }

    /// Run the engine until the WebSocket event channel closes.
    ///
    /// Interleaves two sources with `tokio::select!`: events from the
    /// WebSocket server and the fixture poll timer.
    pub async fn run(mut self, mut ws_rx: mpsc::Receiver<WsEvent>) -> anyhow::Result<()> {
        info!("Engine event loop started");

        let mut poll_interval =
            tokio::time::interval(Duration::from_secs(self.config.poll_interval_secs));
        // The first tick completes immediately; consume it so the first
        // real poll happens after one full interval.
        poll_interval.tick().await;

        loop {
            tokio::select! {
                ws_event = ws_rx.recv() => {
                    match ws_event {
                        Some(WsEvent::Connected { addr, reply }) => {
                            info!("Client connected from {addr}");
                            self.clients.insert(addr, reply);
                        }
                        Some(WsEvent::Disconnected { addr }) => {
                            info!("Client disconnected: {addr}");
                            self.clients.remove(&addr);
                        }
                        Some(WsEvent::Message { addr, text }) => {
                            self.handle_message(&addr, &text).await;
                        }
                        None => {
                            info!("WebSocket channel closed, shutting down");
                            break;
                        }
                    }
                }

                _ = poll_interval.tick() => {
                    self.poll_cycle().await;
                }
            }
        }

        info!("Engine event loop exiting");
        Ok(())
    }

    /// Parse and dispatch one client message, sending the reply back
    /// through that client's channel.
    async fn handle_message(&mut self, addr: &str, text: &str) {
        let reply = match serde_json::from_str::<ClientCommand>(text) {
            Ok(cmd) => self.handle_command(cmd),
            Err(e) => {
                warn!("Unparseable command from {addr}: {e}");
                ServerReply::error("bad_request", format!("could not parse command: {e}"))
            }
        };
        self.send_reply(addr, &reply).await;
    }

    async fn send_reply(&mut self, addr: &str, reply: &ServerReply) {
        let json = match serde_json::to_string(reply) {
            Ok(j) => j,
            Err(e) => {
                warn!("Failed to serialize reply for {addr}: {e}");
                return;
            }
        };
        let Some(tx) = self.clients.get(addr) else {
            debug!("No reply channel for {addr}, dropping reply");
            return;
        };
        if tx.send(json).await.is_err() {
            // Writer task is gone; forget the client now rather than
            // waiting for the Disconnected event.
            self.clients.remove(addr);
        }
    }

    /// Execute one command against the game state. Every error is
    /// mapped to a [`ServerReply::Error`] carrying the stable code the
    /// client can branch on.
    fn handle_command(&self, cmd: ClientCommand) -> ServerReply {
        let now = Utc::now();
        match cmd {
            ClientCommand::CreateRoom(new) => match create_room(&self.db, new, now) {
                Ok(room) => ServerReply::RoomCreated {
                    room_id: room.id,
                    invite_code: room.invite_code,
                },
                Err(e) => ServerReply::error(e.code(), e.to_string()),
            },
            ClientCommand::JoinRoom {
                room_id,
                player_id,
                invite_code,
            } => match join_room(&self.db, &room_id, &player_id, invite_code.as_deref(), now) {
                Ok(()) => ServerReply::Joined { room_id, player_id },
                Err(e) => ServerReply::error(e.code(), e.to_string()),
            },
            ClientCommand::LeaveRoom { room_id, player_id } => {
                match leave_room(&self.db, &room_id, &player_id) {
                    Ok(()) => ServerReply::Left { room_id, player_id },
                    Err(e) => ServerReply::error(e.code(), e.to_string()),
                }
            }
            ClientCommand::StartRoom { room_id, player_id } => {
                match start_room(&self.db, &room_id, &player_id) {
                    Ok(room) => ServerReply::RoomStarted {
                        room_id,
                        gameweek: room.current_gameweek,
                    },
                    Err(e) => ServerReply::error(e.code(), e.to_string()),
                }
            }
            ClientCommand::SubmitPick {
                room_id,
                player_id,
                gameweek,
                team,
            } => {
                let Some(team) = TeamId::from_code(&team) else {
                    return ServerReply::error(
                        "unknown_team",
                        format!("unknown team code '{team}'"),
                    );
                };
                match submit_pick(&self.db, &room_id, &player_id, gameweek, team, now) {
                    Ok(pick) => ServerReply::PickAccepted {
                        room_id,
                        gameweek: pick.gameweek,
                        team: pick.team.code().to_string(),
                    },
                    Err(e) => ServerReply::error(e.code(), e.to_string()),
                }
            }
            ClientCommand::RemovePick {
                room_id,
                player_id,
                gameweek,
            } => match remove_pick(&self.db, &room_id, &player_id, gameweek, now) {
                Ok(()) => ServerReply::PickRemoved { room_id },
                Err(e) => ServerReply::error(e.code(), e.to_string()),
            },
            ClientCommand::CreateDealRequest { room_id, player_id } => {
                let expiry = chrono::Duration::hours(self.config.deal_expiry_hours);
                match create_deal_request(&self.db, &room_id, &player_id, expiry, now) {
                    Ok(deal) => ServerReply::DealOpened {
                        room_id,
                        deal_id: deal.id,
                        snapshot: deal.snapshot,
                        expires_at: deal.expires_at.to_rfc3339(),
                    },
                    Err(e) => ServerReply::error(e.code(), e.to_string()),
                }
            }
            ClientCommand::VoteDeal {
                room_id,
                player_id,
                vote,
            } => match vote_on_deal(&self.db, &room_id, &player_id, vote, now) {
                Ok(DealResolution::Pending) => ServerReply::DealResult {
                    room_id,
                    outcome: BallotOutcome::Pending,
                    winners: Vec::new(),
                    share: 0,
                },
                Ok(DealResolution::Accepted { winners, share }) => ServerReply::DealResult {
                    room_id,
                    outcome: BallotOutcome::Accepted,
                    winners,
                    share,
                },
                Err(e) => ServerReply::error(e.code(), e.to_string()),
            },
            ClientCommand::VoteRematch {
                room_id,
                player_id,
                accept,
            } => match vote_on_rematch(&self.db, &room_id, &player_id, accept) {
                Ok(RematchResolution::Pending { .. }) => ServerReply::RematchResult {
                    room_id,
                    outcome: BallotOutcome::Pending,
                    players: Vec::new(),
                },
                Ok(RematchResolution::Restarted { players }) => ServerReply::RematchResult {
                    room_id,
                    outcome: BallotOutcome::Accepted,
                    players,
                },
                Ok(RematchResolution::NotEnoughInterest) => ServerReply::RematchResult {
                    room_id,
                    outcome: BallotOutcome::Declined,
                    players: Vec::new(),
                },
                Err(e) => ServerReply::error(e.code(), e.to_string()),
            },
            ClientCommand::GetRoomStatus { room_id } => match room_status(&self.db, &room_id) {
                Ok(view) => ServerReply::RoomStatus(view),
                Err(e) => ServerReply::error(e.code(), e.to_string()),
            },
        }
    }

    // -----------------------------------------------------------------------
    // Fixture polling
    // -----------------------------------------------------------------------

    /// One poll pass: expire stale deals, then sync and (when possible)
    /// resolve the current gameweek of every active, unflagged room.
    ///
    /// Errors are contained per room; a feed outage or a corrupt room
    /// logs a warning and the pass moves on.
    pub async fn poll_cycle(&self) {
        let now = Utc::now();

        match self.db.expire_overdue_deals(now) {
            Ok(0) => {}
            Ok(n) => info!("Expired {n} overdue deal request(s)"),
            Err(e) => warn!("Failed to expire overdue deals: {e:#}"),
        }

        let rooms = match self.db.list_rooms_with_status(RoomStatus::Active) {
            Ok(rooms) => rooms,
            Err(e) => {
                warn!("Failed to list active rooms, skipping poll cycle: {e:#}");
                return;
            }
        };

        for room in rooms {
            if room.flagged_at.is_some() {
                debug!(room_id = %room.id, "room is flagged, skipping");
                continue;
            }
            if let Err(e) = self.poll_room(&room).await {
                warn!(room_id = %room.id, "poll failed for room: {e:#}");
            }
        }
    }

    /// Sync one room's current gameweek from the feed and resolve it if
    /// every fixture has finished.
    async fn poll_room(&self, room: &Room) -> anyhow::Result<()> {
        let gameweek = room.current_gameweek;

        let fixtures = self.feed.list_fixtures(gameweek).await?;
        if !fixtures.is_empty() {
            self.db.upsert_fixtures(&fixtures)?;
        }
        if self.feed.is_gameweek_finished(gameweek).await? {
            self.db.mark_gameweek_finished(gameweek)?;
        }

        let stored = self.db.list_fixtures(gameweek)?;
        if !gameweek_resolvable(&stored) {
            return Ok(());
        }

        match process_gameweek_results(&self.db, &room.id, gameweek, Utc::now()) {
            Ok(summary) if summary.skipped => {
                debug!(room_id = %room.id, gameweek, "already resolved, nothing to do");
            }
            Ok(summary) => {
                info!(
                    room_id = %room.id,
                    gameweek,
                    eliminated = summary.eliminated.len(),
                    recovered = summary.recovered,
                    status = summary.status.as_str(),
                    "gameweek resolved"
                );
            }
            Err(ProcessError::NoActivePlayers) => {
                // Should be unreachable while the invariants hold; park
                // the room for manual review instead of retrying it
                // every cycle.
                error!(room_id = %room.id, gameweek, "no active players at resolution, flagging room");
                self.db.flag_room(&room.id, Utc::now())?;
            }
            Err(e) => return Err(e.into()),
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::{Fixture, FixtureStatus, Gameweek, StubFeed};
    use crate::game::room::{DoubleGameweekRule, NewRoom, NoPickPolicy, Visibility};
    use chrono::TimeZone;

    fn test_config() -> Config {
        Config {
            db_path: ":memory:".into(),
            ws_port: 9100,
            feed_base_url: "http://localhost:1".into(),
            poll_interval_secs: 60,
            deal_expiry_hours: 24,
        }
    }

    fn test_engine(feed: StubFeed) -> Engine {
        let db = Database::open(":memory:").expect("in-memory database should open");
        Engine::new(test_config(), db, Arc::new(feed))
    }

    fn seed_gameweek(db: &Database, number: u32) {
        db.upsert_gameweek(&Gameweek {
            number,
            deadline: Utc
                .with_ymd_and_hms(2026, 9, 1 + number, 11, 0, 0)
                .unwrap(),
            is_finished: false,
        })
        .unwrap();
    }

    fn new_room_cmd(host: &str) -> ClientCommand {
        ClientCommand::CreateRoom(NewRoom {
            name: "Office pool".into(),
            buy_in: 500,
            capacity: 4,
            visibility: Visibility::Public,
            host: host.into(),
            deal_threshold: 2,
            no_pick_policy: NoPickPolicy::Eliminate,
            double_gameweek_rule: DoubleGameweekRule::FirstOnly,
        })
    }

    fn finished_fixture(
        id: &str,
        gw: u32,
        home: TeamId,
        away: TeamId,
        home_score: i64,
        away_score: i64,
    ) -> Fixture {
        Fixture {
            id: id.into(),
            gameweek: gw,
            home_team: home,
            away_team: away,
            home_score: Some(home_score),
            away_score: Some(away_score),
            status: FixtureStatus::Finished,
        }
    }

    fn started_two_player_room(engine: &Engine) -> String {
        let room_id = match engine.handle_command(new_room_cmd("alice")) {
            ServerReply::RoomCreated { room_id, .. } => room_id,
            other => panic!("expected RoomCreated, got {other:?}"),
        };
        engine.handle_command(ClientCommand::JoinRoom {
            room_id: room_id.clone(),
            player_id: "bob".into(),
            invite_code: None,
        });
        engine.handle_command(ClientCommand::StartRoom {
            room_id: room_id.clone(),
            player_id: "alice".into(),
        });
        room_id
    }

    #[test]
    fn create_join_start_round_trip() {
        let engine = test_engine(StubFeed::new());
        seed_gameweek(&engine.db, 1);

        let reply = engine.handle_command(new_room_cmd("alice"));
        let room_id = match reply {
            ServerReply::RoomCreated { room_id, .. } => room_id,
            other => panic!("expected RoomCreated, got {other:?}"),
        };

        let reply = engine.handle_command(ClientCommand::JoinRoom {
            room_id: room_id.clone(),
            player_id: "bob".into(),
            invite_code: None,
        });
        assert!(matches!(reply, ServerReply::Joined { .. }));

        let reply = engine.handle_command(ClientCommand::StartRoom {
            room_id,
            player_id: "alice".into(),
        });
        match reply {
            ServerReply::RoomStarted { gameweek, .. } => assert_eq!(gameweek, 1),
            other => panic!("expected RoomStarted, got {other:?}"),
        }
    }

    #[test]
    fn errors_carry_stable_codes() {
        let engine = test_engine(StubFeed::new());

        let reply = engine.handle_command(ClientCommand::JoinRoom {
            room_id: "room_nope".into(),
            player_id: "bob".into(),
            invite_code: None,
        });
        match reply {
            ServerReply::Error { code, .. } => assert_eq!(code, "room_not_found"),
            other => panic!("expected Error, got {other:?}"),
        }
    }

    #[test]
    fn submit_pick_rejects_unknown_team_code() {
        let engine = test_engine(StubFeed::new());

        let reply = engine.handle_command(ClientCommand::SubmitPick {
            room_id: "room_1".into(),
            player_id: "bob".into(),
            gameweek: 1,
            team: "ZZZ".into(),
        });
        match reply {
            ServerReply::Error { code, .. } => assert_eq!(code, "unknown_team"),
            other => panic!("expected Error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unparseable_message_gets_bad_request_reply() {
        let mut engine = test_engine(StubFeed::new());
        let (tx, mut rx) = mpsc::channel(8);
        engine.clients.insert("peer".into(), tx);

        engine.handle_message("peer", "this is not json").await;

        let json: serde_json::Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["code"], "bad_request");
    }

    #[tokio::test]
    async fn poll_cycle_resolves_a_finished_gameweek() {
        let mut feed = StubFeed::new();
        feed.set_fixtures(
            1,
            vec![
                finished_fixture("fx1", 1, TeamId::Arsenal, TeamId::Everton, 2, 0),
                finished_fixture("fx2", 1, TeamId::Chelsea, TeamId::Fulham, 1, 1),
            ],
        );
        feed.mark_finished(1);
        let engine = test_engine(feed);
        seed_gameweek(&engine.db, 1);
        seed_gameweek(&engine.db, 2);

        let room_id = started_two_player_room(&engine);

        // Alice backs the winner, Bob the draw.
        let now = Utc.with_ymd_and_hms(2026, 9, 1, 10, 0, 0).unwrap();
        submit_pick(&engine.db, &room_id, "alice", 1, TeamId::Arsenal, now).unwrap();
        submit_pick(&engine.db, &room_id, "bob", 1, TeamId::Chelsea, now).unwrap();

        engine.poll_cycle().await;

        let room = engine.db.get_room(&room_id).unwrap().unwrap();
        assert_eq!(room.status, RoomStatus::Completed);
    }

    #[tokio::test]
    async fn poll_cycle_skips_flagged_rooms() {
        let mut feed = StubFeed::new();
        feed.set_fixtures(
            1,
            vec![finished_fixture(
                "fx1",
                1,
                TeamId::Arsenal,
                TeamId::Everton,
                2,
                0,
            )],
        );
        feed.mark_finished(1);
        let engine = test_engine(feed);
        seed_gameweek(&engine.db, 1);

        let room_id = started_two_player_room(&engine);
        engine.db.flag_room(&room_id, Utc::now()).unwrap();

        engine.poll_cycle().await;

        // Untouched: still active on gameweek 1.
        let room = engine.db.get_room(&room_id).unwrap().unwrap();
        assert_eq!(room.status, RoomStatus::Active);
        assert_eq!(room.current_gameweek, 1);
    }

    #[tokio::test]
    async fn poll_cycle_waits_for_unfinished_fixtures() {
        let mut feed = StubFeed::new();
        feed.set_fixtures(
            1,
            vec![Fixture {
                id: "fx1".into(),
                gameweek: 1,
                home_team: TeamId::Arsenal,
                away_team: TeamId::Everton,
                home_score: None,
                away_score: None,
                status: FixtureStatus::Live,
            }],
        );
        let engine = test_engine(feed);
        seed_gameweek(&engine.db, 1);

        let room_id = started_two_player_room(&engine);

        engine.poll_cycle().await;

        let room = engine.db.get_room(&room_id).unwrap().unwrap();
        assert_eq!(room.status, RoomStatus::Active);
        assert_eq!(room.current_gameweek, 1);
    }
}
