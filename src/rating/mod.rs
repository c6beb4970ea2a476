//! ELO rating system
//!
//! This module provides the pure rating math: win expectancy, k-factor
//! updates, rank tiers and the peak/streak transition rules. All state
//! lives in the store; everything here is side-effect free.

pub mod elo;

// Re-export commonly used types
pub use elo::{expected_score, split_deltas, team_deltas, EloCalculator, RankTier, StreakState};
