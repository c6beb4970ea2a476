//! Partition search and scoring

use crate::error::{PugError, Result};
use crate::rating::expected_score;
use crate::types::{Team, UserId};
use itertools::Itertools;
use tracing::debug;

/// Two rating-balanced rosters with their formation-time averages
#[derive(Debug, Clone, PartialEq)]
pub struct BalancedTeams {
    pub red: Vec<UserId>,
    pub blue: Vec<UserId>,
    pub red_avg: f64,
    pub blue_avg: f64,
}

impl BalancedTeams {
    /// Absolute difference of the two team averages
    pub fn rating_gap(&self) -> f64 {
        (self.red_avg - self.blue_avg).abs()
    }

    /// Win expectancy of the red team
    pub fn red_win_probability(&self) -> f64 {
        expected_score(self.red_avg, self.blue_avg)
    }

    pub fn roster(&self, team: Team) -> &[UserId] {
        match team {
            Team::Red => &self.red,
            Team::Blue => &self.blue,
        }
    }
}

/// Score of one candidate partition, compared lexicographically:
/// rating gap first, then win-probability skew, then combined
/// intra-team spread.
#[derive(Debug, Clone, Copy, PartialEq)]
struct PartitionScore {
    gap: f64,
    skew: f64,
    spread: f64,
}

impl PartitionScore {
    fn better_than(&self, other: &PartitionScore) -> bool {
        const EPS: f64 = 1e-9;
        if (self.gap - other.gap).abs() > EPS {
            return self.gap < other.gap;
        }
        if (self.skew - other.skew).abs() > EPS {
            return self.skew < other.skew;
        }
        self.spread < other.spread - EPS
    }

    /// Close enough to a coin flip that the search can stop early
    fn is_perfect(&self) -> bool {
        self.gap < 1e-9 && self.skew < 0.01
    }
}

fn score_split(red: &[f64], blue: &[f64]) -> PartitionScore {
    let red_avg = red.iter().sum::<f64>() / red.len() as f64;
    let blue_avg = blue.iter().sum::<f64>() / blue.len() as f64;
    let spread = red.iter().map(|r| (r - red_avg).powi(2)).sum::<f64>()
        + blue.iter().map(|r| (r - blue_avg).powi(2)).sum::<f64>();

    PartitionScore {
        gap: (red_avg - blue_avg).abs(),
        skew: (expected_score(red_avg, blue_avg) - 0.5).abs(),
        spread,
    }
}

/// Split a full pool of `(user, rating)` pairs into the most
/// rating-balanced red/blue partition.
///
/// The pool must be non-empty and even-sized. The first player is pinned
/// to red, which halves the search space without losing any distinct
/// partition (team colors are symmetric until the tiebreaker roll).
pub fn balance_teams(pool: &[(UserId, f64)]) -> Result<BalancedTeams> {
    if pool.is_empty() || pool.len() % 2 != 0 {
        return Err(PugError::NoValidPartition {
            pool_size: pool.len(),
        }
        .into());
    }

    let per_team = pool.len() / 2;
    let ratings: Vec<f64> = pool.iter().map(|(_, r)| *r).collect();

    let mut best_red_idx: Vec<usize> = Vec::new();
    let mut best_score: Option<PartitionScore> = None;

    for rest in (1..pool.len()).combinations(per_team - 1) {
        let mut red_idx = Vec::with_capacity(per_team);
        red_idx.push(0);
        red_idx.extend(&rest);

        let red: Vec<f64> = red_idx.iter().map(|&i| ratings[i]).collect();
        let blue: Vec<f64> = (0..pool.len())
            .filter(|i| !red_idx.contains(i))
            .map(|i| ratings[i])
            .collect();

        let score = score_split(&red, &blue);
        let improved = match &best_score {
            Some(best) => score.better_than(best),
            None => true,
        };
        if improved {
            let perfect = score.is_perfect();
            best_red_idx = red_idx;
            best_score = Some(score);
            if perfect {
                break;
            }
        }
    }

    let red: Vec<UserId> = best_red_idx.iter().map(|&i| pool[i].0).collect();
    let blue: Vec<UserId> = pool
        .iter()
        .enumerate()
        .filter(|(i, _)| !best_red_idx.contains(i))
        .map(|(_, (id, _))| *id)
        .collect();

    let red_avg = best_red_idx.iter().map(|&i| ratings[i]).sum::<f64>() / per_team as f64;
    let blue_avg = (ratings.iter().sum::<f64>() - red_avg * per_team as f64) / per_team as f64;

    let result = BalancedTeams {
        red,
        blue,
        red_avg,
        blue_avg,
    };
    debug!(
        gap = result.rating_gap(),
        red_avg, blue_avg, "Balanced teams selected"
    );
    Ok(result)
}
