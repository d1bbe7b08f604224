// SQLite persistence layer for rooms, players, picks, and votes.
//
// Single-row keyed upserts only; the one multi-table transaction is the
// rematch reset. Elimination processing relies on the stored pick result
// and room progress for idempotent retries, not on cross-table locking.

use std::sync::{Mutex, MutexGuard};

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::feed::{Fixture, FixtureStatus, Gameweek};
use crate::game::deal::{DealRequest, DealStatus, DealVote};
use crate::game::pick::Pick;
use crate::game::result::Outcome;
use crate::game::room::{
    DoubleGameweekRule, NoPickPolicy, PlayerStatus, Room, RoomPlayer, RoomStatus, Visibility,
};
use crate::game::team::TeamId;

/// SQLite-backed store for every room-scoped record plus the cached
/// fixture feed data.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) a SQLite database at `path` and ensure all tables
    /// exist. Pass `":memory:"` for an ephemeral in-memory database
    /// (useful for tests).
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open database at {path}"))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;
             PRAGMA foreign_keys = ON;",
        )
        .context("failed to set database pragmas")?;

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS rooms (
                id                      TEXT PRIMARY KEY,
                name                    TEXT NOT NULL,
                buy_in                  INTEGER NOT NULL,
                capacity                INTEGER NOT NULL,
                visibility              TEXT NOT NULL,
                invite_code             TEXT NOT NULL,
                host                    TEXT NOT NULL,
                current_gameweek        INTEGER NOT NULL,
                current_round           INTEGER NOT NULL,
                status                  TEXT NOT NULL,
                deal_threshold          INTEGER NOT NULL,
                no_pick_policy          TEXT NOT NULL,
                double_gameweek_rule    TEXT NOT NULL,
                last_notified_gameweek  INTEGER,
                flagged_at              TEXT,
                created_at              TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS room_players (
                room_id             TEXT NOT NULL REFERENCES rooms(id),
                player_id           TEXT NOT NULL,
                status              TEXT NOT NULL,
                joined_at           TEXT NOT NULL,
                eliminated_at       TEXT,
                eliminated_gameweek INTEGER,
                PRIMARY KEY (room_id, player_id)
            );

            CREATE TABLE IF NOT EXISTS picks (
                room_id    TEXT NOT NULL REFERENCES rooms(id),
                player_id  TEXT NOT NULL,
                gameweek   INTEGER NOT NULL,
                team       TEXT NOT NULL,
                is_locked  INTEGER NOT NULL DEFAULT 0,
                result     TEXT NOT NULL DEFAULT 'pending',
                updated_at TEXT NOT NULL,
                PRIMARY KEY (room_id, player_id, gameweek)
            );

            CREATE TABLE IF NOT EXISTS gameweeks (
                number      INTEGER PRIMARY KEY,
                deadline    TEXT NOT NULL,
                is_finished INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS fixtures (
                id         TEXT PRIMARY KEY,
                gameweek   INTEGER NOT NULL,
                home_team  TEXT NOT NULL,
                away_team  TEXT NOT NULL,
                home_score INTEGER,
                away_score INTEGER,
                status     TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS deal_requests (
                id         INTEGER PRIMARY KEY AUTOINCREMENT,
                room_id    TEXT NOT NULL REFERENCES rooms(id),
                initiator  TEXT NOT NULL,
                gameweek   INTEGER NOT NULL,
                status     TEXT NOT NULL,
                snapshot   TEXT NOT NULL,
                expires_at TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS deal_votes (
                deal_id   INTEGER NOT NULL REFERENCES deal_requests(id),
                player_id TEXT NOT NULL,
                vote      TEXT NOT NULL,
                PRIMARY KEY (deal_id, player_id)
            );

            CREATE TABLE IF NOT EXISTS rematch_votes (
                room_id   TEXT NOT NULL REFERENCES rooms(id),
                player_id TEXT NOT NULL,
                vote      TEXT NOT NULL,
                PRIMARY KEY (room_id, player_id)
            );
            ",
        )
        .context("failed to create database schema")?;

        // Migration: add the notification cursor for pre-v0.2 databases.
        // Fails with "duplicate column name" on current files, which is fine.
        conn.execute_batch("ALTER TABLE rooms ADD COLUMN last_notified_gameweek INTEGER;")
            .ok();

        conn.execute_batch(
            "CREATE INDEX IF NOT EXISTS idx_fixtures_gameweek ON fixtures(gameweek);
             CREATE INDEX IF NOT EXISTS idx_deal_requests_room ON deal_requests(room_id);",
        )
        .context("failed to create indexes")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Acquire the database connection.
    ///
    /// Panics if the mutex is poisoned (another thread panicked while
    /// holding the lock). This should never happen in normal operation.
    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("database mutex poisoned")
    }

    // ------------------------------------------------------------------
    // Rooms
    // ------------------------------------------------------------------

    pub fn insert_room(&self, room: &Room) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO rooms
                (id, name, buy_in, capacity, visibility, invite_code, host,
                 current_gameweek, current_round, status, deal_threshold,
                 no_pick_policy, double_gameweek_rule, last_notified_gameweek,
                 flagged_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
            params![
                room.id,
                room.name,
                room.buy_in,
                room.capacity,
                room.visibility.as_str(),
                room.invite_code,
                room.host,
                room.current_gameweek,
                room.current_round,
                room.status.as_str(),
                room.deal_threshold,
                room.no_pick_policy.as_str(),
                room.double_gameweek_rule.as_str(),
                room.last_notified_gameweek,
                room.flagged_at.map(|t| t.to_rfc3339()),
                room.created_at.to_rfc3339(),
            ],
        )
        .context("failed to insert room")?;
        Ok(())
    }

    pub fn get_room(&self, room_id: &str) -> Result<Option<Room>> {
        let conn = self.conn();
        let raw = conn
            .query_row(
                "SELECT id, name, buy_in, capacity, visibility, invite_code, host,
                        current_gameweek, current_round, status, deal_threshold,
                        no_pick_policy, double_gameweek_rule, last_notified_gameweek,
                        flagged_at, created_at
                 FROM rooms WHERE id = ?1",
                params![room_id],
                raw_room_from_row,
            )
            .optional()
            .context("failed to query room")?;
        raw.map(room_from_raw).transpose()
    }

    /// All rooms in the given lifecycle status, oldest first.
    pub fn list_rooms_with_status(&self, status: RoomStatus) -> Result<Vec<Room>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT id, name, buy_in, capacity, visibility, invite_code, host,
                        current_gameweek, current_round, status, deal_threshold,
                        no_pick_policy, double_gameweek_rule, last_notified_gameweek,
                        flagged_at, created_at
                 FROM rooms WHERE status = ?1 ORDER BY created_at",
            )
            .context("failed to prepare room list query")?;
        let raws = stmt
            .query_map(params![status.as_str()], raw_room_from_row)
            .context("failed to query rooms")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map room rows")?;
        raws.into_iter().map(room_from_raw).collect()
    }

    /// Move a room to a new status/round/gameweek in one write.
    pub fn set_room_progress(
        &self,
        room_id: &str,
        status: RoomStatus,
        round: u32,
        gameweek: u32,
    ) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "UPDATE rooms SET status = ?2, current_round = ?3, current_gameweek = ?4
             WHERE id = ?1",
            params![room_id, status.as_str(), round, gameweek],
        )
        .context("failed to update room progress")?;
        Ok(())
    }

    pub fn set_room_status(&self, room_id: &str, status: RoomStatus) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "UPDATE rooms SET status = ?2 WHERE id = ?1",
            params![room_id, status.as_str()],
        )
        .context("failed to update room status")?;
        Ok(())
    }

    pub fn set_room_host(&self, room_id: &str, host: &str) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "UPDATE rooms SET host = ?2 WHERE id = ?1",
            params![room_id, host],
        )
        .context("failed to update room host")?;
        Ok(())
    }

    pub fn set_last_notified_gameweek(&self, room_id: &str, gameweek: u32) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "UPDATE rooms SET last_notified_gameweek = ?2 WHERE id = ?1",
            params![room_id, gameweek],
        )
        .context("failed to update notification cursor")?;
        Ok(())
    }

    /// Mark a room for manual inspection. Flagged rooms are skipped by
    /// the poll cycle.
    pub fn flag_room(&self, room_id: &str, now: DateTime<Utc>) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "UPDATE rooms SET flagged_at = ?2 WHERE id = ?1",
            params![room_id, now.to_rfc3339()],
        )
        .context("failed to flag room")?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Room players
    // ------------------------------------------------------------------

    pub fn insert_room_player(&self, player: &RoomPlayer) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO room_players
                (room_id, player_id, status, joined_at, eliminated_at, eliminated_gameweek)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                player.room_id,
                player.player_id,
                player.status.as_str(),
                player.joined_at.to_rfc3339(),
                player.eliminated_at.map(|t| t.to_rfc3339()),
                player.eliminated_gameweek,
            ],
        )
        .context("failed to insert room player")?;
        Ok(())
    }

    pub fn get_room_player(&self, room_id: &str, player_id: &str) -> Result<Option<RoomPlayer>> {
        let conn = self.conn();
        let raw = conn
            .query_row(
                "SELECT room_id, player_id, status, joined_at, eliminated_at, eliminated_gameweek
                 FROM room_players WHERE room_id = ?1 AND player_id = ?2",
                params![room_id, player_id],
                raw_player_from_row,
            )
            .optional()
            .context("failed to query room player")?;
        raw.map(player_from_raw).transpose()
    }

    /// All players of a room, in join order.
    pub fn list_room_players(&self, room_id: &str) -> Result<Vec<RoomPlayer>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT room_id, player_id, status, joined_at, eliminated_at, eliminated_gameweek
                 FROM room_players WHERE room_id = ?1 ORDER BY joined_at, player_id",
            )
            .context("failed to prepare player list query")?;
        let raws = stmt
            .query_map(params![room_id], raw_player_from_row)
            .context("failed to query room players")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map player rows")?;
        raws.into_iter().map(player_from_raw).collect()
    }

    pub fn delete_room_player(&self, room_id: &str, player_id: &str) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "DELETE FROM room_players WHERE room_id = ?1 AND player_id = ?2",
            params![room_id, player_id],
        )
        .context("failed to delete room player")?;
        Ok(())
    }

    pub fn set_all_player_statuses(&self, room_id: &str, status: PlayerStatus) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "UPDATE room_players SET status = ?2 WHERE room_id = ?1",
            params![room_id, status.as_str()],
        )
        .context("failed to update player statuses")?;
        Ok(())
    }

    /// Record an elimination with its timestamp and gameweek.
    pub fn eliminate_player(
        &self,
        room_id: &str,
        player_id: &str,
        gameweek: u32,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "UPDATE room_players
             SET status = 'eliminated', eliminated_at = ?3, eliminated_gameweek = ?4
             WHERE room_id = ?1 AND player_id = ?2",
            params![room_id, player_id, now.to_rfc3339(), gameweek],
        )
        .context("failed to eliminate player")?;
        Ok(())
    }

    /// All-eliminated recovery: reactivate every player eliminated in the
    /// given gameweek. Players eliminated in earlier rounds stay out.
    /// Returns the number of players brought back.
    pub fn reactivate_players_eliminated_in(&self, room_id: &str, gameweek: u32) -> Result<usize> {
        let conn = self.conn();
        let n = conn
            .execute(
                "UPDATE room_players
                 SET status = 'active', eliminated_at = NULL, eliminated_gameweek = NULL
                 WHERE room_id = ?1 AND status = 'eliminated' AND eliminated_gameweek = ?2",
                params![room_id, gameweek],
            )
            .context("failed to reactivate players")?;
        Ok(n)
    }

    // ------------------------------------------------------------------
    // Picks
    // ------------------------------------------------------------------

    /// Upsert a pick keyed by (room, player, gameweek). An existing row is
    /// overwritten with the new team and reset to pending/unlocked; callers
    /// enforce that only unlocked picks reach this point.
    pub fn upsert_pick(&self, pick: &Pick) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO picks (room_id, player_id, gameweek, team, is_locked, result, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(room_id, player_id, gameweek) DO UPDATE SET
                team       = excluded.team,
                is_locked  = excluded.is_locked,
                result     = excluded.result,
                updated_at = excluded.updated_at",
            params![
                pick.room_id,
                pick.player_id,
                pick.gameweek,
                pick.team.code(),
                pick.is_locked as i64,
                pick.result.as_str(),
                pick.updated_at.to_rfc3339(),
            ],
        )
        .context("failed to upsert pick")?;
        Ok(())
    }

    pub fn get_pick(&self, room_id: &str, player_id: &str, gameweek: u32) -> Result<Option<Pick>> {
        let conn = self.conn();
        let raw = conn
            .query_row(
                "SELECT room_id, player_id, gameweek, team, is_locked, result, updated_at
                 FROM picks WHERE room_id = ?1 AND player_id = ?2 AND gameweek = ?3",
                params![room_id, player_id, gameweek],
                raw_pick_from_row,
            )
            .optional()
            .context("failed to query pick")?;
        raw.map(pick_from_raw).transpose()
    }

    /// Every pick a player has made in a room, ordered by gameweek. This
    /// is the input to the team-reuse ban.
    pub fn list_player_picks(&self, room_id: &str, player_id: &str) -> Result<Vec<Pick>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT room_id, player_id, gameweek, team, is_locked, result, updated_at
                 FROM picks WHERE room_id = ?1 AND player_id = ?2 ORDER BY gameweek",
            )
            .context("failed to prepare pick list query")?;
        let raws = stmt
            .query_map(params![room_id, player_id], raw_pick_from_row)
            .context("failed to query picks")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map pick rows")?;
        raws.into_iter().map(pick_from_raw).collect()
    }

    pub fn delete_pick(&self, room_id: &str, player_id: &str, gameweek: u32) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "DELETE FROM picks WHERE room_id = ?1 AND player_id = ?2 AND gameweek = ?3",
            params![room_id, player_id, gameweek],
        )
        .context("failed to delete pick")?;
        Ok(())
    }

    /// Write the resolved result and the permanent lock in one statement.
    /// This is the only writer of `result`.
    pub fn set_pick_result(
        &self,
        room_id: &str,
        player_id: &str,
        gameweek: u32,
        result: Outcome,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "UPDATE picks SET result = ?4, is_locked = 1, updated_at = ?5
             WHERE room_id = ?1 AND player_id = ?2 AND gameweek = ?3",
            params![room_id, player_id, gameweek, result.as_str(), now.to_rfc3339()],
        )
        .context("failed to set pick result")?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Gameweeks
    // ------------------------------------------------------------------

    pub fn upsert_gameweek(&self, gameweek: &Gameweek) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO gameweeks (number, deadline, is_finished)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(number) DO UPDATE SET
                deadline    = excluded.deadline,
                is_finished = excluded.is_finished",
            params![
                gameweek.number,
                gameweek.deadline.to_rfc3339(),
                gameweek.is_finished as i64,
            ],
        )
        .context("failed to upsert gameweek")?;
        Ok(())
    }

    pub fn get_gameweek(&self, number: u32) -> Result<Option<Gameweek>> {
        let conn = self.conn();
        let raw = conn
            .query_row(
                "SELECT number, deadline, is_finished FROM gameweeks WHERE number = ?1",
                params![number],
                |row| {
                    Ok((
                        row.get::<_, u32>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, bool>(2)?,
                    ))
                },
            )
            .optional()
            .context("failed to query gameweek")?;
        raw.map(gameweek_from_raw).transpose()
    }

    /// The smallest unfinished gameweek with a number greater than `after`.
    pub fn next_open_gameweek(&self, after: u32) -> Result<Option<Gameweek>> {
        let conn = self.conn();
        let raw = conn
            .query_row(
                "SELECT number, deadline, is_finished FROM gameweeks
                 WHERE number > ?1 AND is_finished = 0
                 ORDER BY number LIMIT 1",
                params![after],
                |row| {
                    Ok((
                        row.get::<_, u32>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, bool>(2)?,
                    ))
                },
            )
            .optional()
            .context("failed to query next open gameweek")?;
        raw.map(gameweek_from_raw).transpose()
    }

    pub fn mark_gameweek_finished(&self, number: u32) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "UPDATE gameweeks SET is_finished = 1 WHERE number = ?1",
            params![number],
        )
        .context("failed to mark gameweek finished")?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Fixtures (feed cache)
    // ------------------------------------------------------------------

    pub fn upsert_fixtures(&self, fixtures: &[Fixture]) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction().context("failed to begin fixture sync")?;
        for f in fixtures {
            tx.execute(
                "INSERT INTO fixtures
                    (id, gameweek, home_team, away_team, home_score, away_score, status)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(id) DO UPDATE SET
                    home_score = excluded.home_score,
                    away_score = excluded.away_score,
                    status     = excluded.status",
                params![
                    f.id,
                    f.gameweek,
                    f.home_team.code(),
                    f.away_team.code(),
                    f.home_score,
                    f.away_score,
                    f.status.as_str(),
                ],
            )
            .context("failed to upsert fixture")?;
        }
        tx.commit().context("failed to commit fixture sync")?;
        Ok(())
    }

    pub fn list_fixtures(&self, gameweek: u32) -> Result<Vec<Fixture>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT id, gameweek, home_team, away_team, home_score, away_score, status
                 FROM fixtures WHERE gameweek = ?1 ORDER BY id",
            )
            .context("failed to prepare fixture list query")?;
        let raws = stmt
            .query_map(params![gameweek], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, u32>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, Option<i64>>(4)?,
                    row.get::<_, Option<i64>>(5)?,
                    row.get::<_, String>(6)?,
                ))
            })
            .context("failed to query fixtures")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map fixture rows")?;

        raws.into_iter()
            .map(|(id, gameweek, home, away, home_score, away_score, status)| {
                Ok(Fixture {
                    id,
                    gameweek,
                    home_team: parse_team(&home)?,
                    away_team: parse_team(&away)?,
                    home_score,
                    away_score,
                    status: FixtureStatus::parse(&status)
                        .ok_or_else(|| anyhow!("unknown fixture status `{status}`"))?,
                })
            })
            .collect()
    }

    // ------------------------------------------------------------------
    // Deal requests and votes
    // ------------------------------------------------------------------

    /// Insert a new deal request and return its row id. The snapshot of
    /// active players is stored as a JSON array.
    pub fn insert_deal_request(
        &self,
        room_id: &str,
        initiator: &str,
        gameweek: u32,
        snapshot: &[String],
        expires_at: DateTime<Utc>,
        created_at: DateTime<Utc>,
    ) -> Result<i64> {
        let conn = self.conn();
        let snapshot_json =
            serde_json::to_string(snapshot).context("failed to serialize deal snapshot")?;
        conn.execute(
            "INSERT INTO deal_requests
                (room_id, initiator, gameweek, status, snapshot, expires_at, created_at)
             VALUES (?1, ?2, ?3, 'pending', ?4, ?5, ?6)",
            params![
                room_id,
                initiator,
                gameweek,
                snapshot_json,
                expires_at.to_rfc3339(),
                created_at.to_rfc3339(),
            ],
        )
        .context("failed to insert deal request")?;
        Ok(conn.last_insert_rowid())
    }

    pub fn get_deal_request(&self, deal_id: i64) -> Result<Option<DealRequest>> {
        let conn = self.conn();
        let raw = conn
            .query_row(
                "SELECT id, room_id, initiator, gameweek, status, snapshot, expires_at, created_at
                 FROM deal_requests WHERE id = ?1",
                params![deal_id],
                raw_deal_from_row,
            )
            .optional()
            .context("failed to query deal request")?;
        raw.map(deal_from_raw).transpose()
    }

    /// The room's pending deal request, if any. At most one can be
    /// pending per room at a time.
    pub fn pending_deal_for_room(&self, room_id: &str) -> Result<Option<DealRequest>> {
        let conn = self.conn();
        let raw = conn
            .query_row(
                "SELECT id, room_id, initiator, gameweek, status, snapshot, expires_at, created_at
                 FROM deal_requests WHERE room_id = ?1 AND status = 'pending'
                 ORDER BY id DESC LIMIT 1",
                params![room_id],
                raw_deal_from_row,
            )
            .optional()
            .context("failed to query pending deal")?;
        raw.map(deal_from_raw).transpose()
    }

    pub fn set_deal_status(&self, deal_id: i64, status: DealStatus) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "UPDATE deal_requests SET status = ?2 WHERE id = ?1",
            params![deal_id, status.as_str()],
        )
        .context("failed to update deal status")?;
        Ok(())
    }

    /// Record or change a player's vote on a deal request.
    pub fn upsert_deal_vote(&self, deal_id: i64, player_id: &str, vote: DealVote) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO deal_votes (deal_id, player_id, vote)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(deal_id, player_id) DO UPDATE SET vote = excluded.vote",
            params![deal_id, player_id, vote.as_str()],
        )
        .context("failed to upsert deal vote")?;
        Ok(())
    }

    pub fn list_deal_votes(&self, deal_id: i64) -> Result<Vec<(String, DealVote)>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare("SELECT player_id, vote FROM deal_votes WHERE deal_id = ?1")
            .context("failed to prepare deal vote query")?;
        let raws = stmt
            .query_map(params![deal_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .context("failed to query deal votes")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map deal vote rows")?;
        raws.into_iter()
            .map(|(player, vote)| {
                Ok((
                    player,
                    DealVote::parse(&vote).ok_or_else(|| anyhow!("unknown deal vote `{vote}`"))?,
                ))
            })
            .collect()
    }

    /// Transition every overdue pending deal request to `expired`.
    /// Returns the number of requests expired.
    pub fn expire_overdue_deals(&self, now: DateTime<Utc>) -> Result<usize> {
        let conn = self.conn();
        let n = conn
            .execute(
                "UPDATE deal_requests SET status = 'expired'
                 WHERE status = 'pending' AND expires_at <= ?1",
                params![now.to_rfc3339()],
            )
            .context("failed to expire deals")?;
        Ok(n)
    }

    // ------------------------------------------------------------------
    // Rematch votes
    // ------------------------------------------------------------------

    pub fn upsert_rematch_vote(&self, room_id: &str, player_id: &str, yes: bool) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO rematch_votes (room_id, player_id, vote)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(room_id, player_id) DO UPDATE SET vote = excluded.vote",
            params![room_id, player_id, if yes { "yes" } else { "no" }],
        )
        .context("failed to upsert rematch vote")?;
        Ok(())
    }

    pub fn list_rematch_votes(&self, room_id: &str) -> Result<Vec<(String, bool)>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare("SELECT player_id, vote FROM rematch_votes WHERE room_id = ?1")
            .context("failed to prepare rematch vote query")?;
        let votes = stmt
            .query_map(params![room_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)? == "yes",
                ))
            })
            .context("failed to query rematch votes")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map rematch vote rows")?;
        Ok(votes)
    }

    pub fn clear_rematch_votes(&self, room_id: &str) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "DELETE FROM rematch_votes WHERE room_id = ?1",
            params![room_id],
        )
        .context("failed to clear rematch votes")?;
        Ok(())
    }

    /// Reset a completed room into a fresh game, in one transaction:
    /// decliners removed, all pick/deal/rematch history cleared, remaining
    /// players reactivated, room back to `waiting` at round 1.
    pub fn reset_room_for_rematch(
        &self,
        room_id: &str,
        removed_players: &[String],
        next_gameweek: u32,
    ) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction().context("failed to begin rematch reset")?;

        for player in removed_players {
            tx.execute(
                "DELETE FROM room_players WHERE room_id = ?1 AND player_id = ?2",
                params![room_id, player],
            )
            .context("failed to remove declining player")?;
        }
        tx.execute(
            "DELETE FROM deal_votes WHERE deal_id IN
                (SELECT id FROM deal_requests WHERE room_id = ?1)",
            params![room_id],
        )
        .context("failed to clear deal votes")?;
        tx.execute(
            "DELETE FROM deal_requests WHERE room_id = ?1",
            params![room_id],
        )
        .context("failed to clear deal requests")?;
        tx.execute("DELETE FROM picks WHERE room_id = ?1", params![room_id])
            .context("failed to clear picks")?;
        tx.execute(
            "DELETE FROM rematch_votes WHERE room_id = ?1",
            params![room_id],
        )
        .context("failed to clear rematch votes")?;
        tx.execute(
            "UPDATE room_players
             SET status = 'active', eliminated_at = NULL, eliminated_gameweek = NULL
             WHERE room_id = ?1",
            params![room_id],
        )
        .context("failed to reactivate players")?;
        tx.execute(
            "UPDATE rooms
             SET status = 'waiting', current_round = 1, current_gameweek = ?2,
                 last_notified_gameweek = NULL
             WHERE id = ?1",
            params![room_id, next_gameweek],
        )
        .context("failed to reset room")?;

        tx.commit().context("failed to commit rematch reset")?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

type RawRoom = (
    String,
    String,
    i64,
    u32,
    String,
    String,
    String,
    u32,
    u32,
    String,
    u32,
    String,
    String,
    Option<u32>,
    Option<String>,
    String,
);

fn raw_room_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRoom> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
        row.get(9)?,
        row.get(10)?,
        row.get(11)?,
        row.get(12)?,
        row.get(13)?,
        row.get(14)?,
        row.get(15)?,
    ))
}

fn room_from_raw(raw: RawRoom) -> Result<Room> {
    let (
        id,
        name,
        buy_in,
        capacity,
        visibility,
        invite_code,
        host,
        current_gameweek,
        current_round,
        status,
        deal_threshold,
        no_pick_policy,
        double_gameweek_rule,
        last_notified_gameweek,
        flagged_at,
        created_at,
    ) = raw;
    Ok(Room {
        id,
        name,
        buy_in,
        capacity,
        visibility: Visibility::parse(&visibility)
            .ok_or_else(|| anyhow!("unknown visibility `{visibility}`"))?,
        invite_code,
        host,
        current_gameweek,
        current_round,
        status: RoomStatus::parse(&status)
            .ok_or_else(|| anyhow!("unknown room status `{status}`"))?,
        deal_threshold,
        no_pick_policy: NoPickPolicy::parse(&no_pick_policy)
            .ok_or_else(|| anyhow!("unknown no-pick policy `{no_pick_policy}`"))?,
        double_gameweek_rule: DoubleGameweekRule::parse(&double_gameweek_rule)
            .ok_or_else(|| anyhow!("unknown double-gameweek rule `{double_gameweek_rule}`"))?,
        last_notified_gameweek,
        flagged_at: flagged_at.as_deref().map(parse_ts).transpose()?,
        created_at: parse_ts(&created_at)?,
    })
}

type RawPlayer = (String, String, String, String, Option<String>, Option<u32>);

fn raw_player_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawPlayer> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn player_from_raw(raw: RawPlayer) -> Result<RoomPlayer> {
    let (room_id, player_id, status, joined_at, eliminated_at, eliminated_gameweek) = raw;
    Ok(RoomPlayer {
        room_id,
        player_id,
        status: PlayerStatus::parse(&status)
            .ok_or_else(|| anyhow!("unknown player status `{status}`"))?,
        joined_at: parse_ts(&joined_at)?,
        eliminated_at: eliminated_at.as_deref().map(parse_ts).transpose()?,
        eliminated_gameweek,
    })
}

type RawPick = (String, String, u32, String, bool, String, String);

fn raw_pick_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawPick> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
    ))
}

fn pick_from_raw(raw: RawPick) -> Result<Pick> {
    let (room_id, player_id, gameweek, team, is_locked, result, updated_at) = raw;
    Ok(Pick {
        room_id,
        player_id,
        gameweek,
        team: parse_team(&team)?,
        is_locked,
        result: Outcome::parse(&result).ok_or_else(|| anyhow!("unknown result `{result}`"))?,
        updated_at: parse_ts(&updated_at)?,
    })
}

type RawDeal = (i64, String, String, u32, String, String, String, String);

fn raw_deal_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawDeal> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
    ))
}

fn deal_from_raw(raw: RawDeal) -> Result<DealRequest> {
    let (id, room_id, initiator, gameweek, status, snapshot, expires_at, created_at) = raw;
    Ok(DealRequest {
        id,
        room_id,
        initiator,
        gameweek,
        status: DealStatus::parse(&status)
            .ok_or_else(|| anyhow!("unknown deal status `{status}`"))?,
        snapshot: serde_json::from_str(&snapshot)
            .context("failed to deserialize deal snapshot")?,
        expires_at: parse_ts(&expires_at)?,
        created_at: parse_ts(&created_at)?,
    })
}

fn gameweek_from_raw((number, deadline, is_finished): (u32, String, bool)) -> Result<Gameweek> {
    Ok(Gameweek {
        number,
        deadline: parse_ts(&deadline)?,
        is_finished,
    })
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)
        .with_context(|| format!("invalid timestamp `{s}`"))?
        .with_timezone(&Utc))
}

fn parse_team(code: &str) -> Result<TeamId> {
    TeamId::from_code(code).ok_or_else(|| anyhow!("unknown team code `{code}`"))
}
