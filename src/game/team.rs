// Premier League team identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The 20 Premier League clubs, identified by their stable three-letter
/// code. Picks, fixtures, and the team-reuse ban all key on this enum
/// rather than on free-form club names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TeamId {
    #[serde(rename = "ARS")]
    Arsenal,
    #[serde(rename = "AVL")]
    AstonVilla,
    #[serde(rename = "BOU")]
    Bournemouth,
    #[serde(rename = "BRE")]
    Brentford,
    #[serde(rename = "BHA")]
    Brighton,
    #[serde(rename = "BUR")]
    Burnley,
    #[serde(rename = "CHE")]
    Chelsea,
    #[serde(rename = "CRY")]
    CrystalPalace,
    #[serde(rename = "EVE")]
    Everton,
    #[serde(rename = "FUL")]
    Fulham,
    #[serde(rename = "LEE")]
    Leeds,
    #[serde(rename = "LIV")]
    Liverpool,
    #[serde(rename = "MCI")]
    ManCity,
    #[serde(rename = "MUN")]
    ManUtd,
    #[serde(rename = "NEW")]
    Newcastle,
    #[serde(rename = "NFO")]
    NottmForest,
    #[serde(rename = "SUN")]
    Sunderland,
    #[serde(rename = "TOT")]
    Tottenham,
    #[serde(rename = "WHU")]
    WestHam,
    #[serde(rename = "WOL")]
    Wolves,
}

/// Canonical team ordering. The deterministic no-pick policy walks this
/// list front to back, so the order must never change mid-season.
pub const ALL_TEAMS: [TeamId; 20] = [
    TeamId::Arsenal,
    TeamId::AstonVilla,
    TeamId::Bournemouth,
    TeamId::Brentford,
    TeamId::Brighton,
    TeamId::Burnley,
    TeamId::Chelsea,
    TeamId::CrystalPalace,
    TeamId::Everton,
    TeamId::Fulham,
    TeamId::Leeds,
    TeamId::Liverpool,
    TeamId::ManCity,
    TeamId::ManUtd,
    TeamId::Newcastle,
    TeamId::NottmForest,
    TeamId::Sunderland,
    TeamId::Tottenham,
    TeamId::WestHam,
    TeamId::Wolves,
];

impl TeamId {
    /// Parse a three-letter team code. Case-insensitive. Returns `None`
    /// for anything that is not a recognized league team.
    pub fn from_code(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "ARS" => Some(TeamId::Arsenal),
            "AVL" => Some(TeamId::AstonVilla),
            "BOU" => Some(TeamId::Bournemouth),
            "BRE" => Some(TeamId::Brentford),
            "BHA" => Some(TeamId::Brighton),
            "BUR" => Some(TeamId::Burnley),
            "CHE" => Some(TeamId::Chelsea),
            "CRY" => Some(TeamId::CrystalPalace),
            "EVE" => Some(TeamId::Everton),
            "FUL" => Some(TeamId::Fulham),
            "LEE" => Some(TeamId::Leeds),
            "LIV" => Some(TeamId::Liverpool),
            "MCI" => Some(TeamId::ManCity),
            "MUN" => Some(TeamId::ManUtd),
            "NEW" => Some(TeamId::Newcastle),
            "NFO" => Some(TeamId::NottmForest),
            "SUN" => Some(TeamId::Sunderland),
            "TOT" => Some(TeamId::Tottenham),
            "WHU" => Some(TeamId::WestHam),
            "WOL" => Some(TeamId::Wolves),
            _ => None,
        }
    }

    /// The stable three-letter code used in storage and over the wire.
    pub fn code(&self) -> &'static str {
        match self {
            TeamId::Arsenal => "ARS",
            TeamId::AstonVilla => "AVL",
            TeamId::Bournemouth => "BOU",
            TeamId::Brentford => "BRE",
            TeamId::Brighton => "BHA",
            TeamId::Burnley => "BUR",
            TeamId::Chelsea => "CHE",
            TeamId::CrystalPalace => "CRY",
            TeamId::Everton => "EVE",
            TeamId::Fulham => "FUL",
            TeamId::Leeds => "LEE",
            TeamId::Liverpool => "LIV",
            TeamId::ManCity => "MCI",
            TeamId::ManUtd => "MUN",
            TeamId::Newcastle => "NEW",
            TeamId::NottmForest => "NFO",
            TeamId::Sunderland => "SUN",
            TeamId::Tottenham => "TOT",
            TeamId::WestHam => "WHU",
            TeamId::Wolves => "WOL",
        }
    }

    /// Human-readable club name for display text.
    pub fn name(&self) -> &'static str {
        match self {
            TeamId::Arsenal => "Arsenal",
            TeamId::AstonVilla => "Aston Villa",
            TeamId::Bournemouth => "Bournemouth",
            TeamId::Brentford => "Brentford",
            TeamId::Brighton => "Brighton",
            TeamId::Burnley => "Burnley",
            TeamId::Chelsea => "Chelsea",
            TeamId::CrystalPalace => "Crystal Palace",
            TeamId::Everton => "Everton",
            TeamId::Fulham => "Fulham",
            TeamId::Leeds => "Leeds",
            TeamId::Liverpool => "Liverpool",
            TeamId::ManCity => "Man City",
            TeamId::ManUtd => "Man Utd",
            TeamId::Newcastle => "Newcastle",
            TeamId::NottmForest => "Nottm Forest",
            TeamId::Sunderland => "Sunderland",
            TeamId::Tottenham => "Tottenham",
            TeamId::WestHam => "West Ham",
            TeamId::Wolves => "Wolves",
        }
    }
}

impl fmt::Display for TeamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_code_known_teams() {
        assert_eq!(TeamId::from_code("ARS"), Some(TeamId::Arsenal));
        assert_eq!(TeamId::from_code("MCI"), Some(TeamId::ManCity));
        assert_eq!(TeamId::from_code("WOL"), Some(TeamId::Wolves));
    }

    #[test]
    fn from_code_case_insensitive() {
        assert_eq!(TeamId::from_code("liv"), Some(TeamId::Liverpool));
        assert_eq!(TeamId::from_code("Tot"), Some(TeamId::Tottenham));
    }

    #[test]
    fn from_code_invalid() {
        assert_eq!(TeamId::from_code("XXX"), None);
        assert_eq!(TeamId::from_code(""), None);
        assert_eq!(TeamId::from_code("ARSENAL"), None);
    }

    #[test]
    fn code_roundtrip_all_teams() {
        for team in ALL_TEAMS {
            assert_eq!(TeamId::from_code(team.code()), Some(team));
        }
    }

    #[test]
    fn all_teams_has_twenty_unique_codes() {
        let mut codes: Vec<&str> = ALL_TEAMS.iter().map(|t| t.code()).collect();
        codes.sort();
        codes.dedup();
        assert_eq!(codes.len(), 20);
    }

    #[test]
    fn serde_uses_codes() {
        let json = serde_json::to_string(&TeamId::CrystalPalace).unwrap();
        assert_eq!(json, "\"CRY\"");
        let parsed: TeamId = serde_json::from_str("\"NFO\"").unwrap();
        assert_eq!(parsed, TeamId::NottmForest);
    }

    #[test]
    fn display_is_code() {
        assert_eq!(format!("{}", TeamId::WestHam), "WHU");
    }
}
