//! Classic ELO math over team-average ratings
//!
//! Matches are settled against the team averages captured at formation
//! time, so a settlement and its undo always move ratings by the exact
//! same amount in opposite directions.

use serde::{Deserialize, Serialize};

/// Win expectancy of a player or team rated `rating_a` against `rating_b`
pub fn expected_score(rating_a: f64, rating_b: f64) -> f64 {
    1.0 / (1.0 + 10f64.powf((rating_b - rating_a) / 400.0))
}

/// Per-player rating deltas for winner and loser given the two team
/// averages. The magnitudes are identical, so the loser delta is the
/// exact inverse of the winner delta.
pub fn team_deltas(k: f64, winner_avg: f64, loser_avg: f64) -> (f64, f64) {
    let expected_winner = expected_score(winner_avg, loser_avg);
    let delta = k * (1.0 - expected_winner);
    (delta, -delta)
}

/// Per-player rating deltas for red and blue when a match is declared
/// a draw. Each side scores 0.5 against its formation-time expectancy,
/// so the favorite loses exactly what the underdog gains. Even teams
/// move nothing.
pub fn split_deltas(k: f64, red_avg: f64, blue_avg: f64) -> (f64, f64) {
    let expected_red = expected_score(red_avg, blue_avg);
    let delta = k * (0.5 - expected_red);
    (delta, -delta)
}

/// Rating calculator carrying the configured k-factor and starting rating
#[derive(Debug, Clone, Copy)]
pub struct EloCalculator {
    k_factor: f64,
    starting_rating: f64,
}

impl EloCalculator {
    pub fn new(k_factor: f64, starting_rating: f64) -> Self {
        Self {
            k_factor,
            starting_rating,
        }
    }

    /// Rating assigned to newly registered players
    pub fn starting_rating(&self) -> f64 {
        self.starting_rating
    }

    pub fn k_factor(&self) -> f64 {
        self.k_factor
    }

    /// Deltas for winner and loser of a match between the given team averages
    pub fn settle(&self, winner_avg: f64, loser_avg: f64) -> (f64, f64) {
        team_deltas(self.k_factor, winner_avg, loser_avg)
    }

    /// Deltas for red and blue of a match declared a draw
    pub fn settle_split(&self, red_avg: f64, blue_avg: f64) -> (f64, f64) {
        split_deltas(self.k_factor, red_avg, blue_avg)
    }
}

impl Default for EloCalculator {
    fn default() -> Self {
        Self::new(32.0, 1000.0)
    }
}

/// Coarse ladder tiers derived from a rating
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RankTier {
    SPlus,
    S,
    A,
    B,
    C,
    D,
}

impl RankTier {
    pub fn from_rating(rating: f64) -> Self {
        if rating >= 1800.0 {
            RankTier::SPlus
        } else if rating >= 1600.0 {
            RankTier::S
        } else if rating >= 1300.0 {
            RankTier::A
        } else if rating >= 900.0 {
            RankTier::B
        } else if rating >= 650.0 {
            RankTier::C
        } else {
            RankTier::D
        }
    }
}

impl std::fmt::Display for RankTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RankTier::SPlus => write!(f, "S+"),
            RankTier::S => write!(f, "S"),
            RankTier::A => write!(f, "A"),
            RankTier::B => write!(f, "B"),
            RankTier::C => write!(f, "C"),
            RankTier::D => write!(f, "D"),
        }
    }
}

/// Peak rating transition. Unset until the first settled match, then
/// only ever ratchets upward.
pub fn next_peak(current_peak: Option<f64>, new_rating: f64) -> f64 {
    match current_peak {
        Some(peak) if peak >= new_rating => peak,
        _ => new_rating,
    }
}

/// Streak counters for one player
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreakState {
    /// Positive = consecutive wins, negative = consecutive losses
    pub streak: i32,
    pub best_win_streak: u32,
    pub best_loss_streak: u32,
}

impl StreakState {
    /// Advance the counters after a settled result. A win on a loss
    /// streak restarts at +1, a loss on a win streak restarts at -1.
    pub fn advance(self, won: bool) -> Self {
        let streak = if won {
            if self.streak >= 0 {
                self.streak + 1
            } else {
                1
            }
        } else if self.streak <= 0 {
            self.streak - 1
        } else {
            -1
        };

        Self {
            streak,
            best_win_streak: self.best_win_streak.max(streak.max(0) as u32),
            best_loss_streak: self.best_loss_streak.max((-streak).max(0) as u32),
        }
    }
}
