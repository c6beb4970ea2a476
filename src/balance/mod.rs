//! Exhaustive team balancer
//!
//! This module splits a full queue into two rating-balanced teams by
//! scoring every possible partition. Pool sizes are small (at most 16
//! players for an 8v8), so brute force stays cheap.

pub mod partition;

// Re-export commonly used types
pub use partition::{balance_teams, BalancedTeams};
