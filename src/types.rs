//! Common types used throughout the PUG engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique identifier for users (chat-platform user id)
pub type UserId = u64;

/// Unique identifier for channels
pub type ChannelId = u64;

/// Unique identifier for a community/server scope
pub type ScopeId = String;

/// Scope-wide sequential match id
pub type MatchId = u64;

/// One of the two sides of a PUG
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Team {
    Red,
    Blue,
}

impl Team {
    pub fn opponent(self) -> Team {
        match self {
            Team::Red => Team::Blue,
            Team::Blue => Team::Red,
        }
    }
}

impl std::fmt::Display for Team {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Team::Red => write!(f, "red"),
            Team::Blue => write!(f, "blue"),
        }
    }
}

impl std::str::FromStr for Team {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "red" => Ok(Team::Red),
            "blue" => Ok(Team::Blue),
            other => Err(format!("unknown team '{other}', expected 'red' or 'blue'")),
        }
    }
}

/// Recorded outcome of a settled match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchWinner {
    Red,
    Blue,
    Split,
}

impl From<Team> for MatchWinner {
    fn from(team: Team) -> Self {
        match team {
            Team::Red => MatchWinner::Red,
            Team::Blue => MatchWinner::Blue,
        }
    }
}

impl std::fmt::Display for MatchWinner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MatchWinner::Red => write!(f, "red"),
            MatchWinner::Blue => write!(f, "blue"),
            MatchWinner::Split => write!(f, "split"),
        }
    }
}

/// Soft lifecycle status of a match record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchStatus {
    Active,
    Killed,
}

/// Persistent per-scope player record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerRecord {
    pub user_id: UserId,
    pub scope_id: ScopeId,
    pub display_name: String,
    pub rating: f64,
    /// Unset until the first settled match, monotonically increasing afterwards
    pub peak_rating: Option<f64>,
    pub wins: u32,
    pub losses: u32,
    pub total_matches: u32,
    /// Positive = win streak, negative = loss streak, 0 only before the first result
    pub streak: i32,
    pub best_win_streak: u32,
    pub best_loss_streak: u32,
    pub registered: bool,
    pub created_at: DateTime<Utc>,
}

impl PlayerRecord {
    pub fn new(user_id: UserId, scope_id: ScopeId, display_name: String, rating: f64) -> Self {
        Self {
            user_id,
            scope_id,
            display_name,
            rating,
            peak_rating: None,
            wins: 0,
            losses: 0,
            total_matches: 0,
            streak: 0,
            best_win_streak: 0,
            best_loss_streak: 0,
            registered: true,
            created_at: crate::utils::current_timestamp(),
        }
    }
}

/// Persistent record of a formed match ("PUG")
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchRecord {
    pub id: MatchId,
    pub scope_id: ScopeId,
    pub mode: String,
    pub red_team: Vec<UserId>,
    pub blue_team: Vec<UserId>,
    /// Average team ratings at formation time; settlement math always uses
    /// these, never the players' live ratings
    pub avg_red_rating: f64,
    pub avg_blue_rating: f64,
    pub winner: Option<MatchWinner>,
    pub status: MatchStatus,
    pub tiebreaker_map: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl MatchRecord {
    /// All participants, red roster first
    pub fn participants(&self) -> Vec<UserId> {
        self.red_team
            .iter()
            .chain(self.blue_team.iter())
            .copied()
            .collect()
    }

    pub fn contains(&self, user_id: UserId) -> bool {
        self.red_team.contains(&user_id) || self.blue_team.contains(&user_id)
    }

    /// Whether a result may still be reported for this match
    pub fn is_open(&self) -> bool {
        self.winner.is_none() && self.status == MatchStatus::Active
    }

    pub fn roster(&self, team: Team) -> &[UserId] {
        match team {
            Team::Red => &self.red_team,
            Team::Blue => &self.blue_team,
        }
    }

    pub fn avg_rating(&self, team: Team) -> f64 {
        match team {
            Team::Red => self.avg_red_rating,
            Team::Blue => self.avg_blue_rating,
        }
    }
}

/// A registered game mode (e.g. 4v4, 2v2)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameMode {
    /// Canonical key, lowercase
    pub name: String,
    pub display_name: String,
    /// Total players in a full queue (both teams). Always even, >= 2.
    pub team_size: usize,
    pub description: String,
}

impl GameMode {
    /// Players per side, derived from the stored total
    pub fn per_team(&self) -> usize {
        self.team_size / 2
    }

    /// Human label like "4v4"
    pub fn format_label(&self) -> String {
        format!("{}v{}", self.per_team(), self.per_team())
    }
}
