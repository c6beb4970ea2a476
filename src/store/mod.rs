//! Persistence interface and implementations
//!
//! This module defines the interface the engine uses for persisting
//! players, matches, game modes, timeouts and scope settings. The host
//! supplies the real backing store; `MemoryStore` covers tests and the
//! simulator.

use crate::error::Result;
use crate::types::{GameMode, MatchId, MatchRecord, MatchStatus, MatchWinner, PlayerRecord, UserId};
use chrono::{DateTime, Utc};

pub mod memory;

pub use memory::MemoryStore;

/// Input for recording a newly formed match. The store assigns the
/// scope-sequential id and the creation timestamp.
#[derive(Debug, Clone)]
pub struct NewMatch {
    pub scope_id: String,
    pub mode: String,
    pub red_team: Vec<UserId>,
    pub blue_team: Vec<UserId>,
    pub avg_red_rating: f64,
    pub avg_blue_rating: f64,
    pub tiebreaker_map: Option<String>,
}

/// Trait for store operations
pub trait Store: Send + Sync {
    // Players

    /// Create a player record, or re-activate and rename an existing one.
    /// Stats survive a delete/re-register cycle.
    fn register_player(
        &self,
        scope: &str,
        user: UserId,
        display_name: &str,
        rating: f64,
    ) -> Result<PlayerRecord>;

    fn get_player(&self, scope: &str, user: UserId) -> Result<Option<PlayerRecord>>;

    /// Whether the player exists and is currently registered
    fn player_exists(&self, scope: &str, user: UserId) -> Result<bool>;

    /// All registered players in a scope
    fn all_players(&self, scope: &str) -> Result<Vec<PlayerRecord>>;

    /// Mark a player unregistered. Returns false if unknown.
    fn delete_player(&self, scope: &str, user: UserId) -> Result<bool>;

    fn set_display_name(&self, scope: &str, user: UserId, name: &str) -> Result<()>;

    /// Admin override of the live rating. Does not touch the peak.
    fn set_rating(&self, scope: &str, user: UserId, rating: f64) -> Result<()>;

    /// Admin override of the peak rating
    fn set_peak_rating(&self, scope: &str, user: UserId, peak: f64) -> Result<()>;

    /// Admin override of the lifetime match count
    fn set_total_matches(&self, scope: &str, user: UserId, total: u32) -> Result<()>;

    /// Apply a drawn result: shift the rating by `delta`, advance the
    /// peak and the lifetime match count. Win/loss counters and streaks
    /// are untouched. Returns the updated record.
    fn apply_split(&self, scope: &str, user: UserId, delta: f64) -> Result<PlayerRecord>;

    /// Apply one settled result: shift the rating by `delta`, advance
    /// win/loss counters, streaks and the peak. Returns the updated record.
    fn apply_result(&self, scope: &str, user: UserId, won: bool, delta: f64)
        -> Result<PlayerRecord>;

    /// Reverse a previously applied result: shift the rating back and
    /// decrement win/loss and total counters. Streaks and the peak are
    /// deliberately left alone. Returns the updated record.
    fn revert_result(
        &self,
        scope: &str,
        user: UserId,
        won: bool,
        delta: f64,
    ) -> Result<PlayerRecord>;

    // Matches

    fn add_match(&self, draft: NewMatch) -> Result<MatchRecord>;

    fn get_match(&self, scope: &str, id: MatchId) -> Result<Option<MatchRecord>>;

    /// Most recent matches first
    fn recent_matches(&self, scope: &str, limit: usize) -> Result<Vec<MatchRecord>>;

    fn set_match_winner(
        &self,
        scope: &str,
        id: MatchId,
        winner: Option<MatchWinner>,
    ) -> Result<()>;

    fn set_match_status(&self, scope: &str, id: MatchId, status: MatchStatus) -> Result<()>;

    // Game modes

    /// Add or replace a mode definition. The name is stored lowercase.
    fn add_mode(&self, scope: &str, mode: GameMode) -> Result<()>;

    fn get_mode(&self, scope: &str, name: &str) -> Result<Option<GameMode>>;

    fn list_modes(&self, scope: &str) -> Result<Vec<GameMode>>;

    fn remove_mode(&self, scope: &str, name: &str) -> Result<bool>;

    /// Register a shorthand for a mode. Returns false when the alias
    /// collides with an existing mode name or alias.
    fn add_mode_alias(&self, scope: &str, alias: &str, mode: &str) -> Result<bool>;

    fn remove_mode_alias(&self, scope: &str, alias: &str) -> Result<bool>;

    /// Resolve a name or alias to its mode, case-insensitively
    fn resolve_mode(&self, scope: &str, name_or_alias: &str) -> Result<Option<GameMode>>;

    // Queue timeouts

    fn add_timeout(&self, scope: &str, user: UserId, until: DateTime<Utc>) -> Result<()>;

    /// Active timeout expiry for a player, if any. Expired entries are
    /// dropped on read.
    fn timeout_status(&self, scope: &str, user: UserId) -> Result<Option<DateTime<Utc>>>;

    fn clear_timeout(&self, scope: &str, user: UserId) -> Result<bool>;

    // Tiebreaker map pool

    /// Returns false if the map was already present
    fn add_map(&self, scope: &str, name: &str) -> Result<bool>;

    fn remove_map(&self, scope: &str, name: &str) -> Result<bool>;

    fn map_pool(&self, scope: &str) -> Result<Vec<String>>;

    // Scope settings

    fn set_setting(&self, scope: &str, key: &str, value: &str) -> Result<()>;

    fn get_setting(&self, scope: &str, key: &str) -> Result<Option<String>>;
}
