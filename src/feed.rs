// Fixture feed client: upstream source of gameweeks, fixtures, and scores.
//
// The engine never owns timers or pushes; it polls this feed on an interval
// and caches the results in the database so elimination processing works
// from a consistent local snapshot.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::game::team::TeamId;

// ---------------------------------------------------------------------------
// Domain types
// ---------------------------------------------------------------------------

/// Lifecycle of a single fixture as reported by the feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixtureStatus {
    Scheduled,
    Live,
    Finished,
}

impl FixtureStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FixtureStatus::Scheduled => "scheduled",
            FixtureStatus::Live => "live",
            FixtureStatus::Finished => "finished",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "scheduled" => Some(FixtureStatus::Scheduled),
            "live" => Some(FixtureStatus::Live),
            "finished" => Some(FixtureStatus::Finished),
            _ => None,
        }
    }
}

/// One match in a gameweek. Scores are `None` until the feed reports them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fixture {
    pub id: String,
    pub gameweek: u32,
    pub home_team: TeamId,
    pub away_team: TeamId,
    pub home_score: Option<i64>,
    pub away_score: Option<i64>,
    pub status: FixtureStatus,
}

/// A scheduled round of fixtures with a single pick deadline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gameweek {
    pub number: u32,
    pub deadline: DateTime<Utc>,
    pub is_finished: bool,
}

// ---------------------------------------------------------------------------
// Feed trait
// ---------------------------------------------------------------------------

/// Abstract fixture feed. The production implementation is
/// [`HttpFixtureFeed`]; tests use [`StubFeed`] to script fixture data
/// without network access.
#[async_trait]
pub trait FixtureFeed: Send + Sync {
    /// All fixtures scheduled in the given gameweek.
    async fn list_fixtures(&self, gameweek: u32) -> anyhow::Result<Vec<Fixture>>;

    /// Whether the feed considers the gameweek finished (every fixture
    /// played and final scores published).
    async fn is_gameweek_finished(&self, gameweek: u32) -> anyhow::Result<bool>;
}

// ---------------------------------------------------------------------------
// HTTP implementation
// ---------------------------------------------------------------------------

/// Raw fixture payload as served by the upstream API. Team codes arrive as
/// strings and are validated into [`TeamId`] on ingest; fixtures naming an
/// unknown team are dropped with a warning rather than failing the sync.
#[derive(Debug, Deserialize)]
struct FixturePayload {
    id: String,
    gameweek: u32,
    home_team: String,
    away_team: String,
    home_score: Option<i64>,
    away_score: Option<i64>,
    status: FixtureStatus,
}

#[derive(Debug, Deserialize)]
struct GameweekPayload {
    #[allow(dead_code)]
    number: u32,
    is_finished: bool,
}

/// JSON-over-HTTP fixture feed client.
pub struct HttpFixtureFeed {
    http: reqwest::Client,
    base_url: String,
}

impl HttpFixtureFeed {
    /// Create a client for the given API base URL (no trailing slash).
    pub fn new(base_url: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url,
        }
    }
}

#[async_trait]
impl FixtureFeed for HttpFixtureFeed {
    async fn list_fixtures(&self, gameweek: u32) -> anyhow::Result<Vec<Fixture>> {
        let url = format!("{}/gameweeks/{}/fixtures", self.base_url, gameweek);
        let payloads: Vec<FixturePayload> = self
            .http
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let mut fixtures = Vec::with_capacity(payloads.len());
        for p in payloads {
            match fixture_from_payload(p) {
                Some(f) => fixtures.push(f),
                None => warn!(gameweek, "dropping fixture with unknown team code"),
            }
        }
        Ok(fixtures)
    }

    async fn is_gameweek_finished(&self, gameweek: u32) -> anyhow::Result<bool> {
        let url = format!("{}/gameweeks/{}", self.base_url, gameweek);
        let payload: GameweekPayload = self
            .http
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(payload.is_finished)
    }
}

fn fixture_from_payload(p: FixturePayload) -> Option<Fixture> {
    let home_team = TeamId::from_code(&p.home_team)?;
    let away_team = TeamId::from_code(&p.away_team)?;
    Some(Fixture {
        id: p.id,
        gameweek: p.gameweek,
        home_team,
        away_team,
        home_score: p.home_score,
        away_score: p.away_score,
        status: p.status,
    })
}

// ---------------------------------------------------------------------------
// Scripted feed for tests
// ---------------------------------------------------------------------------

/// In-memory feed returning pre-scripted fixtures. Used by the poll-cycle
/// tests so no network is involved.
#[derive(Debug, Default)]
pub struct StubFeed {
    fixtures: std::collections::HashMap<u32, Vec<Fixture>>,
    finished: std::collections::HashSet<u32>,
}

impl StubFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fixtures(&mut self, gameweek: u32, fixtures: Vec<Fixture>) {
        self.fixtures.insert(gameweek, fixtures);
    }

    pub fn mark_finished(&mut self, gameweek: u32) {
        self.finished.insert(gameweek);
    }
}

#[async_trait]
impl FixtureFeed for StubFeed {
    async fn list_fixtures(&self, gameweek: u32) -> anyhow::Result<Vec<Fixture>> {
        Ok(self.fixtures.get(&gameweek).cloned().unwrap_or_default())
    }

    async fn is_gameweek_finished(&self, gameweek: u32) -> anyhow::Result<bool> {
        Ok(self.finished.contains(&gameweek))
    }
}
