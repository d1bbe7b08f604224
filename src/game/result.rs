// Result resolution: pure mapping from finished fixtures to per-team outcomes.

use serde::{Deserialize, Serialize};

use crate::feed::{Fixture, FixtureStatus};
use crate::game::room::DoubleGameweekRule;
use crate::game::team::TeamId;

/// Result of a pick. `Pending` until the EliminationEngine resolves the
/// gameweek; written exactly once after that.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Pending,
    Win,
    Lose,
    Draw,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Pending => "pending",
            Outcome::Win => "win",
            Outcome::Lose => "lose",
            Outcome::Draw => "draw",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Outcome::Pending),
            "win" => Some(Outcome::Win),
            "lose" => Some(Outcome::Lose),
            "draw" => Some(Outcome::Draw),
            _ => None,
        }
    }

    /// Ordering used by the `both_count` double-gameweek rule: a loss is
    /// worse than a draw is worse than a win.
    fn severity(&self) -> u8 {
        match self {
            Outcome::Lose => 0,
            Outcome::Draw => 1,
            Outcome::Win => 2,
            Outcome::Pending => 3,
        }
    }
}

/// Map a finished fixture's scores to `(home outcome, away outcome)`.
///
/// Returns `None` when the fixture is not finished or either score is
/// missing; callers must gate on [`gameweek_resolvable`] before relying
/// on this.
pub fn fixture_outcomes(fixture: &Fixture) -> Option<(Outcome, Outcome)> {
    if fixture.status != FixtureStatus::Finished {
        return None;
    }
    let home = fixture.home_score?;
    let away = fixture.away_score?;
    Some(match home.cmp(&away) {
        std::cmp::Ordering::Greater => (Outcome::Win, Outcome::Lose),
        std::cmp::Ordering::Less => (Outcome::Lose, Outcome::Win),
        std::cmp::Ordering::Equal => (Outcome::Draw, Outcome::Draw),
    })
}

/// A gameweek is resolvable iff it has at least one fixture and every
/// fixture has finished. This predicate gates the EliminationEngine.
pub fn gameweek_resolvable(fixtures: &[Fixture]) -> bool {
    !fixtures.is_empty()
        && fixtures
            .iter()
            .all(|f| f.status == FixtureStatus::Finished)
}

/// Resolve a picked team's outcome for a gameweek.
///
/// Most gameweeks a team plays once. In a double gameweek the room's rule
/// decides: `first_only` counts only the team's first listed fixture,
/// `both_count` counts the worst outcome across all of them. A team with
/// no fixture at all resolves as a draw (which eliminates, same as a
/// real draw).
pub fn team_outcome(
    fixtures: &[Fixture],
    team: TeamId,
    rule: DoubleGameweekRule,
) -> Outcome {
    let mut outcomes = fixtures.iter().filter_map(|f| {
        let (home, away) = fixture_outcomes(f)?;
        if f.home_team == team {
            Some(home)
        } else if f.away_team == team {
            Some(away)
        } else {
            None
        }
    });

    match rule {
        DoubleGameweekRule::FirstOnly => outcomes.next().unwrap_or(Outcome::Draw),
        DoubleGameweekRule::BothCount => outcomes
            .min_by_key(Outcome::severity)
            .unwrap_or(Outcome::Draw),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture(home: TeamId, away: TeamId, score: Option<(i64, i64)>) -> Fixture {
        Fixture {
            id: format!("{}-{}", home.code(), away.code()),
            gameweek: 1,
            home_team: home,
            away_team: away,
            home_score: score.map(|(h, _)| h),
            away_score: score.map(|(_, a)| a),
            status: if score.is_some() {
                FixtureStatus::Finished
            } else {
                FixtureStatus::Scheduled
            },
        }
    }

    #[test]
    fn home_win_maps_to_win_lose() {
        let f = fixture(TeamId::Arsenal, TeamId::Chelsea, Some((3, 1)));
        assert_eq!(
            fixture_outcomes(&f),
            Some((Outcome::Win, Outcome::Lose))
        );
    }

    #[test]
    fn away_win_maps_to_lose_win() {
        let f = fixture(TeamId::Everton, TeamId::Liverpool, Some((0, 2)));
        assert_eq!(
            fixture_outcomes(&f),
            Some((Outcome::Lose, Outcome::Win))
        );
    }

    #[test]
    fn level_scores_map_to_draws() {
        let f = fixture(TeamId::Fulham, TeamId::Brentford, Some((1, 1)));
        assert_eq!(
            fixture_outcomes(&f),
            Some((Outcome::Draw, Outcome::Draw))
        );
    }

    #[test]
    fn unfinished_fixture_has_no_outcome() {
        let f = fixture(TeamId::Arsenal, TeamId::Chelsea, None);
        assert_eq!(fixture_outcomes(&f), None);

        let mut live = fixture(TeamId::Arsenal, TeamId::Chelsea, Some((1, 0)));
        live.status = FixtureStatus::Live;
        assert_eq!(fixture_outcomes(&live), None);
    }

    #[test]
    fn missing_score_has_no_outcome() {
        let mut f = fixture(TeamId::Arsenal, TeamId::Chelsea, Some((1, 0)));
        f.away_score = None;
        assert_eq!(fixture_outcomes(&f), None);
    }

    #[test]
    fn gameweek_resolvable_requires_all_finished() {
        let finished = fixture(TeamId::Arsenal, TeamId::Chelsea, Some((1, 0)));
        let scheduled = fixture(TeamId::Everton, TeamId::Fulham, None);

        assert!(gameweek_resolvable(&[finished.clone()]));
        assert!(!gameweek_resolvable(&[finished, scheduled]));
        assert!(!gameweek_resolvable(&[]));
    }

    #[test]
    fn team_outcome_single_fixture() {
        let fixtures = vec![
            fixture(TeamId::Arsenal, TeamId::Chelsea, Some((2, 0))),
            fixture(TeamId::Everton, TeamId::Fulham, Some((1, 1))),
        ];
        assert_eq!(
            team_outcome(&fixtures, TeamId::Arsenal, DoubleGameweekRule::FirstOnly),
            Outcome::Win
        );
        assert_eq!(
            team_outcome(&fixtures, TeamId::Chelsea, DoubleGameweekRule::FirstOnly),
            Outcome::Lose
        );
        assert_eq!(
            team_outcome(&fixtures, TeamId::Fulham, DoubleGameweekRule::BothCount),
            Outcome::Draw
        );
    }

    #[test]
    fn team_without_fixture_resolves_as_draw() {
        let fixtures = vec![fixture(TeamId::Arsenal, TeamId::Chelsea, Some((2, 0)))];
        assert_eq!(
            team_outcome(&fixtures, TeamId::Wolves, DoubleGameweekRule::FirstOnly),
            Outcome::Draw
        );
        assert_eq!(
            team_outcome(&fixtures, TeamId::Wolves, DoubleGameweekRule::BothCount),
            Outcome::Draw
        );
    }

    #[test]
    fn double_gameweek_first_only_uses_first_fixture() {
        let fixtures = vec![
            fixture(TeamId::Brighton, TeamId::Burnley, Some((2, 1))),
            fixture(TeamId::Wolves, TeamId::Brighton, Some((3, 0))),
        ];
        assert_eq!(
            team_outcome(&fixtures, TeamId::Brighton, DoubleGameweekRule::FirstOnly),
            Outcome::Win
        );
    }

    #[test]
    fn double_gameweek_both_count_takes_worst_outcome() {
        let fixtures = vec![
            fixture(TeamId::Brighton, TeamId::Burnley, Some((2, 1))),
            fixture(TeamId::Wolves, TeamId::Brighton, Some((3, 0))),
        ];
        assert_eq!(
            team_outcome(&fixtures, TeamId::Brighton, DoubleGameweekRule::BothCount),
            Outcome::Lose
        );

        let two_wins = vec![
            fixture(TeamId::Brighton, TeamId::Burnley, Some((2, 1))),
            fixture(TeamId::Wolves, TeamId::Brighton, Some((0, 1))),
        ];
        assert_eq!(
            team_outcome(&two_wins, TeamId::Brighton, DoubleGameweekRule::BothCount),
            Outcome::Win
        );
    }

    #[test]
    fn outcome_text_roundtrip() {
        for o in [Outcome::Pending, Outcome::Win, Outcome::Lose, Outcome::Draw] {
            assert_eq!(Outcome::parse(o.as_str()), Some(o));
        }
        assert_eq!(Outcome::parse("void"), None);
    }
}
