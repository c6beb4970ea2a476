//! In-memory store implementation

use crate::error::{PugError, Result};
use crate::rating::elo::{next_peak, StreakState};
use crate::store::{NewMatch, Store};
use crate::types::{
    GameMode, MatchId, MatchRecord, MatchStatus, MatchWinner, PlayerRecord, ScopeId, UserId,
};
use crate::utils;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::RwLock;

fn poisoned(what: &str) -> anyhow::Error {
    PugError::InternalError {
        message: format!("Failed to acquire {what} lock"),
    }
    .into()
}

fn player_missing(scope: &str, user: UserId) -> anyhow::Error {
    PugError::PlayerNotFound {
        user_id: user,
        scope_id: scope.to_string(),
    }
    .into()
}

/// In-memory store used by tests and the simulator
#[derive(Debug, Default)]
pub struct MemoryStore {
    players: RwLock<HashMap<(ScopeId, UserId), PlayerRecord>>,
    matches: RwLock<HashMap<(ScopeId, MatchId), MatchRecord>>,
    next_match_id: RwLock<HashMap<ScopeId, MatchId>>,
    modes: RwLock<HashMap<(ScopeId, String), GameMode>>,
    aliases: RwLock<HashMap<(ScopeId, String), String>>,
    timeouts: RwLock<HashMap<(ScopeId, UserId), DateTime<Utc>>>,
    maps: RwLock<HashMap<ScopeId, Vec<String>>>,
    settings: RwLock<HashMap<(ScopeId, String), String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with the standard 4v4 mode under the given scope
    pub fn with_default_mode(scope: &str) -> Self {
        let store = Self::new();
        // Seeding cannot fail on a fresh store
        let _ = store.add_mode(
            scope,
            GameMode {
                name: "default".to_string(),
                display_name: "4v4".to_string(),
                team_size: 8,
                description: "Standard pick up game".to_string(),
            },
        );
        store
    }
}

impl Store for MemoryStore {
    fn register_player(
        &self,
        scope: &str,
        user: UserId,
        display_name: &str,
        rating: f64,
    ) -> Result<PlayerRecord> {
        let mut players = self.players.write().map_err(|_| poisoned("players write"))?;

        let record = players
            .entry((scope.to_string(), user))
            .and_modify(|existing| {
                existing.registered = true;
                existing.display_name = display_name.to_string();
            })
            .or_insert_with(|| {
                PlayerRecord::new(user, scope.to_string(), display_name.to_string(), rating)
            });

        Ok(record.clone())
    }

    fn get_player(&self, scope: &str, user: UserId) -> Result<Option<PlayerRecord>> {
        let players = self.players.read().map_err(|_| poisoned("players read"))?;
        Ok(players.get(&(scope.to_string(), user)).cloned())
    }

    fn player_exists(&self, scope: &str, user: UserId) -> Result<bool> {
        let players = self.players.read().map_err(|_| poisoned("players read"))?;
        Ok(players
            .get(&(scope.to_string(), user))
            .map(|p| p.registered)
            .unwrap_or(false))
    }

    fn all_players(&self, scope: &str) -> Result<Vec<PlayerRecord>> {
        let players = self.players.read().map_err(|_| poisoned("players read"))?;
        let mut result: Vec<PlayerRecord> = players
            .iter()
            .filter(|((s, _), p)| s == scope && p.registered)
            .map(|(_, p)| p.clone())
            .collect();
        result.sort_by(|a, b| {
            b.rating
                .partial_cmp(&a.rating)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(result)
    }

    fn delete_player(&self, scope: &str, user: UserId) -> Result<bool> {
        let mut players = self.players.write().map_err(|_| poisoned("players write"))?;
        match players.get_mut(&(scope.to_string(), user)) {
            Some(player) if player.registered => {
                player.registered = false;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn set_display_name(&self, scope: &str, user: UserId, name: &str) -> Result<()> {
        let mut players = self.players.write().map_err(|_| poisoned("players write"))?;
        let player = players
            .get_mut(&(scope.to_string(), user))
            .ok_or_else(|| player_missing(scope, user))?;
        player.display_name = name.to_string();
        Ok(())
    }

    fn set_rating(&self, scope: &str, user: UserId, rating: f64) -> Result<()> {
        let mut players = self.players.write().map_err(|_| poisoned("players write"))?;
        let player = players
            .get_mut(&(scope.to_string(), user))
            .ok_or_else(|| player_missing(scope, user))?;
        player.rating = rating;
        Ok(())
    }

    fn set_peak_rating(&self, scope: &str, user: UserId, peak: f64) -> Result<()> {
        let mut players = self.players.write().map_err(|_| poisoned("players write"))?;
        let player = players
            .get_mut(&(scope.to_string(), user))
            .ok_or_else(|| player_missing(scope, user))?;
        player.peak_rating = Some(peak);
        Ok(())
    }

    fn set_total_matches(&self, scope: &str, user: UserId, total: u32) -> Result<()> {
        let mut players = self.players.write().map_err(|_| poisoned("players write"))?;
        let player = players
            .get_mut(&(scope.to_string(), user))
            .ok_or_else(|| player_missing(scope, user))?;
        player.total_matches = total;
        Ok(())
    }

    fn apply_split(&self, scope: &str, user: UserId, delta: f64) -> Result<PlayerRecord> {
        let mut players = self.players.write().map_err(|_| poisoned("players write"))?;
        let player = players
            .get_mut(&(scope.to_string(), user))
            .ok_or_else(|| player_missing(scope, user))?;

        player.rating += delta;
        player.peak_rating = Some(next_peak(player.peak_rating, player.rating));
        player.total_matches += 1;

        Ok(player.clone())
    }

    fn apply_result(
        &self,
        scope: &str,
        user: UserId,
        won: bool,
        delta: f64,
    ) -> Result<PlayerRecord> {
        let mut players = self.players.write().map_err(|_| poisoned("players write"))?;
        let player = players
            .get_mut(&(scope.to_string(), user))
            .ok_or_else(|| player_missing(scope, user))?;

        player.rating += delta;
        player.peak_rating = Some(next_peak(player.peak_rating, player.rating));
        if won {
            player.wins += 1;
        } else {
            player.losses += 1;
        }
        player.total_matches += 1;

        let streaks = StreakState {
            streak: player.streak,
            best_win_streak: player.best_win_streak,
            best_loss_streak: player.best_loss_streak,
        }
        .advance(won);
        player.streak = streaks.streak;
        player.best_win_streak = streaks.best_win_streak;
        player.best_loss_streak = streaks.best_loss_streak;

        Ok(player.clone())
    }

    fn revert_result(
        &self,
        scope: &str,
        user: UserId,
        won: bool,
        delta: f64,
    ) -> Result<PlayerRecord> {
        let mut players = self.players.write().map_err(|_| poisoned("players write"))?;
        let player = players
            .get_mut(&(scope.to_string(), user))
            .ok_or_else(|| player_missing(scope, user))?;

        player.rating -= delta;
        if won {
            player.wins = player.wins.saturating_sub(1);
        } else {
            player.losses = player.losses.saturating_sub(1);
        }
        player.total_matches = player.total_matches.saturating_sub(1);

        Ok(player.clone())
    }

    fn add_match(&self, draft: NewMatch) -> Result<MatchRecord> {
        let mut next_ids = self
            .next_match_id
            .write()
            .map_err(|_| poisoned("match id write"))?;
        let next = next_ids.entry(draft.scope_id.clone()).or_insert(1);
        let id = *next;
        *next += 1;
        drop(next_ids);

        let record = MatchRecord {
            id,
            scope_id: draft.scope_id.clone(),
            mode: draft.mode,
            red_team: draft.red_team,
            blue_team: draft.blue_team,
            avg_red_rating: draft.avg_red_rating,
            avg_blue_rating: draft.avg_blue_rating,
            winner: None,
            status: MatchStatus::Active,
            tiebreaker_map: draft.tiebreaker_map,
            created_at: utils::current_timestamp(),
        };

        let mut matches = self.matches.write().map_err(|_| poisoned("matches write"))?;
        matches.insert((draft.scope_id, id), record.clone());
        Ok(record)
    }

    fn get_match(&self, scope: &str, id: MatchId) -> Result<Option<MatchRecord>> {
        let matches = self.matches.read().map_err(|_| poisoned("matches read"))?;
        Ok(matches.get(&(scope.to_string(), id)).cloned())
    }

    fn recent_matches(&self, scope: &str, limit: usize) -> Result<Vec<MatchRecord>> {
        let matches = self.matches.read().map_err(|_| poisoned("matches read"))?;
        let mut result: Vec<MatchRecord> = matches
            .iter()
            .filter(|((s, _), _)| s == scope)
            .map(|(_, m)| m.clone())
            .collect();
        result.sort_by(|a, b| b.id.cmp(&a.id));
        result.truncate(limit);
        Ok(result)
    }

    fn set_match_winner(
        &self,
        scope: &str,
        id: MatchId,
        winner: Option<MatchWinner>,
    ) -> Result<()> {
        let mut matches = self.matches.write().map_err(|_| poisoned("matches write"))?;
        let record = matches
            .get_mut(&(scope.to_string(), id))
            .ok_or(PugError::MatchNotFound { match_id: id })?;
        record.winner = winner;
        Ok(())
    }

    fn set_match_status(&self, scope: &str, id: MatchId, status: MatchStatus) -> Result<()> {
        let mut matches = self.matches.write().map_err(|_| poisoned("matches write"))?;
        let record = matches
            .get_mut(&(scope.to_string(), id))
            .ok_or(PugError::MatchNotFound { match_id: id })?;
        record.status = status;
        Ok(())
    }

    fn add_mode(&self, scope: &str, mode: GameMode) -> Result<()> {
        let mut modes = self.modes.write().map_err(|_| poisoned("modes write"))?;
        let name = mode.name.to_lowercase();
        modes.insert(
            (scope.to_string(), name.clone()),
            GameMode { name, ..mode },
        );
        Ok(())
    }

    fn get_mode(&self, scope: &str, name: &str) -> Result<Option<GameMode>> {
        let modes = self.modes.read().map_err(|_| poisoned("modes read"))?;
        Ok(modes
            .get(&(scope.to_string(), name.to_lowercase()))
            .cloned())
    }

    fn list_modes(&self, scope: &str) -> Result<Vec<GameMode>> {
        let modes = self.modes.read().map_err(|_| poisoned("modes read"))?;
        let mut result: Vec<GameMode> = modes
            .iter()
            .filter(|((s, _), _)| s == scope)
            .map(|(_, m)| m.clone())
            .collect();
        result.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(result)
    }

    fn remove_mode(&self, scope: &str, name: &str) -> Result<bool> {
        let name = name.to_lowercase();
        let mut modes = self.modes.write().map_err(|_| poisoned("modes write"))?;
        let removed = modes.remove(&(scope.to_string(), name.clone())).is_some();
        drop(modes);

        if removed {
            // Drop any alias pointing at the removed mode
            let mut aliases = self.aliases.write().map_err(|_| poisoned("aliases write"))?;
            aliases.retain(|(s, _), target| !(s == scope && *target == name));
        }
        Ok(removed)
    }

    fn add_mode_alias(&self, scope: &str, alias: &str, mode: &str) -> Result<bool> {
        let alias = alias.to_lowercase();
        let mode = mode.to_lowercase();

        let modes = self.modes.read().map_err(|_| poisoned("modes read"))?;
        if !modes.contains_key(&(scope.to_string(), mode.clone())) {
            return Err(PugError::ModeNotFound { name: mode }.into());
        }
        if modes.contains_key(&(scope.to_string(), alias.clone())) {
            return Ok(false);
        }
        drop(modes);

        let mut aliases = self.aliases.write().map_err(|_| poisoned("aliases write"))?;
        if aliases.contains_key(&(scope.to_string(), alias.clone())) {
            return Ok(false);
        }
        aliases.insert((scope.to_string(), alias), mode);
        Ok(true)
    }

    fn remove_mode_alias(&self, scope: &str, alias: &str) -> Result<bool> {
        let mut aliases = self.aliases.write().map_err(|_| poisoned("aliases write"))?;
        Ok(aliases
            .remove(&(scope.to_string(), alias.to_lowercase()))
            .is_some())
    }

    fn resolve_mode(&self, scope: &str, name_or_alias: &str) -> Result<Option<GameMode>> {
        let key = name_or_alias.to_lowercase();
        if let Some(mode) = self.get_mode(scope, &key)? {
            return Ok(Some(mode));
        }

        let aliases = self.aliases.read().map_err(|_| poisoned("aliases read"))?;
        let target = aliases.get(&(scope.to_string(), key)).cloned();
        drop(aliases);

        match target {
            Some(name) => self.get_mode(scope, &name),
            None => Ok(None),
        }
    }

    fn add_timeout(&self, scope: &str, user: UserId, until: DateTime<Utc>) -> Result<()> {
        let mut timeouts = self
            .timeouts
            .write()
            .map_err(|_| poisoned("timeouts write"))?;
        timeouts.insert((scope.to_string(), user), until);
        Ok(())
    }

    fn timeout_status(&self, scope: &str, user: UserId) -> Result<Option<DateTime<Utc>>> {
        let mut timeouts = self
            .timeouts
            .write()
            .map_err(|_| poisoned("timeouts write"))?;
        let key = (scope.to_string(), user);
        match timeouts.get(&key) {
            Some(until) if *until > utils::current_timestamp() => Ok(Some(*until)),
            Some(_) => {
                timeouts.remove(&key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    fn clear_timeout(&self, scope: &str, user: UserId) -> Result<bool> {
        let mut timeouts = self
            .timeouts
            .write()
            .map_err(|_| poisoned("timeouts write"))?;
        Ok(timeouts.remove(&(scope.to_string(), user)).is_some())
    }

    fn add_map(&self, scope: &str, name: &str) -> Result<bool> {
        let mut maps = self.maps.write().map_err(|_| poisoned("maps write"))?;
        let pool = maps.entry(scope.to_string()).or_default();
        if pool.iter().any(|m| m.eq_ignore_ascii_case(name)) {
            return Ok(false);
        }
        pool.push(name.to_string());
        Ok(true)
    }

    fn remove_map(&self, scope: &str, name: &str) -> Result<bool> {
        let mut maps = self.maps.write().map_err(|_| poisoned("maps write"))?;
        let Some(pool) = maps.get_mut(scope) else {
            return Ok(false);
        };
        let before = pool.len();
        pool.retain(|m| !m.eq_ignore_ascii_case(name));
        Ok(pool.len() < before)
    }

    fn map_pool(&self, scope: &str) -> Result<Vec<String>> {
        let maps = self.maps.read().map_err(|_| poisoned("maps read"))?;
        Ok(maps.get(scope).cloned().unwrap_or_default())
    }

    fn set_setting(&self, scope: &str, key: &str, value: &str) -> Result<()> {
        let mut settings = self
            .settings
            .write()
            .map_err(|_| poisoned("settings write"))?;
        settings.insert((scope.to_string(), key.to_string()), value.to_string());
        Ok(())
    }

    fn get_setting(&self, scope: &str, key: &str) -> Result<Option<String>> {
        let settings = self.settings.read().map_err(|_| poisoned("settings read"))?;
        Ok(settings.get(&(scope.to_string(), key.to_string())).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    const SCOPE: &str = "test-scope";

    fn store_with_player(user: UserId) -> MemoryStore {
        let store = MemoryStore::new();
        store
            .register_player(SCOPE, user, &format!("Player_{user}"), 1000.0)
            .unwrap();
        store
    }

    #[test]
    fn test_register_and_lookup() {
        let store = store_with_player(1);
        assert!(store.player_exists(SCOPE, 1).unwrap());
        assert!(!store.player_exists(SCOPE, 2).unwrap());
        assert!(!store.player_exists("other-scope", 1).unwrap());

        let player = store.get_player(SCOPE, 1).unwrap().unwrap();
        assert_eq!(player.rating, 1000.0);
        assert_eq!(player.peak_rating, None);
    }

    #[test]
    fn test_delete_preserves_stats_for_reregister() {
        let store = store_with_player(1);
        store.apply_result(SCOPE, 1, true, 16.0).unwrap();

        assert!(store.delete_player(SCOPE, 1).unwrap());
        assert!(!store.player_exists(SCOPE, 1).unwrap());
        // Double delete is a no-op
        assert!(!store.delete_player(SCOPE, 1).unwrap());

        let record = store.register_player(SCOPE, 1, "Renamed", 1000.0).unwrap();
        assert!(record.registered);
        assert_eq!(record.display_name, "Renamed");
        assert_eq!(record.wins, 1);
        assert_eq!(record.rating, 1016.0);
    }

    #[test]
    fn test_apply_result_updates_everything() {
        let store = store_with_player(1);
        let record = store.apply_result(SCOPE, 1, true, 16.0).unwrap();

        assert_eq!(record.rating, 1016.0);
        assert_eq!(record.peak_rating, Some(1016.0));
        assert_eq!(record.wins, 1);
        assert_eq!(record.losses, 0);
        assert_eq!(record.total_matches, 1);
        assert_eq!(record.streak, 1);
        assert_eq!(record.best_win_streak, 1);
    }

    #[test]
    fn test_peak_holds_through_losses() {
        let store = store_with_player(1);
        store.apply_result(SCOPE, 1, true, 20.0).unwrap();
        let record = store.apply_result(SCOPE, 1, false, -20.0).unwrap();

        assert_eq!(record.rating, 1000.0);
        assert_eq!(record.peak_rating, Some(1020.0));
    }

    #[test]
    fn test_apply_split_moves_rating_without_counters() {
        let store = store_with_player(1);
        let record = store.apply_split(SCOPE, 1, -8.0).unwrap();

        assert_eq!(record.rating, 992.0);
        assert_eq!(record.peak_rating, Some(992.0));
        assert_eq!(record.total_matches, 1);
        assert_eq!(record.wins, 0);
        assert_eq!(record.losses, 0);
        assert_eq!(record.streak, 0);
    }

    #[test]
    fn test_revert_restores_rating_and_counts_but_not_streaks() {
        let store = store_with_player(1);
        store.apply_result(SCOPE, 1, true, 16.0).unwrap();
        let record = store.revert_result(SCOPE, 1, true, 16.0).unwrap();

        assert_eq!(record.rating, 1000.0);
        assert_eq!(record.wins, 0);
        assert_eq!(record.total_matches, 0);
        // Streaks and the peak are not rewound
        assert_eq!(record.streak, 1);
        assert_eq!(record.peak_rating, Some(1016.0));
    }

    #[test]
    fn test_match_ids_are_scope_sequential() {
        let store = MemoryStore::new();
        let draft = NewMatch {
            scope_id: SCOPE.to_string(),
            mode: "default".to_string(),
            red_team: vec![1, 2],
            blue_team: vec![3, 4],
            avg_red_rating: 1000.0,
            avg_blue_rating: 1000.0,
            tiebreaker_map: None,
        };

        let first = store.add_match(draft.clone()).unwrap();
        let second = store.add_match(draft.clone()).unwrap();
        let other = store
            .add_match(NewMatch {
                scope_id: "other-scope".to_string(),
                ..draft
            })
            .unwrap();

        assert_eq!(first.id, 1);
        assert_eq!(second.id, 2);
        assert_eq!(other.id, 1);

        let recent = store.recent_matches(SCOPE, 10).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].id, 2);
    }

    #[test]
    fn test_match_winner_and_status() {
        let store = MemoryStore::new();
        let record = store
            .add_match(NewMatch {
                scope_id: SCOPE.to_string(),
                mode: "default".to_string(),
                red_team: vec![1],
                blue_team: vec![2],
                avg_red_rating: 1000.0,
                avg_blue_rating: 1000.0,
                tiebreaker_map: None,
            })
            .unwrap();
        assert!(record.is_open());

        store
            .set_match_winner(SCOPE, record.id, Some(MatchWinner::Red))
            .unwrap();
        store
            .set_match_status(SCOPE, record.id, MatchStatus::Killed)
            .unwrap();

        let updated = store.get_match(SCOPE, record.id).unwrap().unwrap();
        assert_eq!(updated.winner, Some(MatchWinner::Red));
        assert_eq!(updated.status, MatchStatus::Killed);

        assert!(store.set_match_winner(SCOPE, 99, None).is_err());
    }

    #[test]
    fn test_mode_aliases() {
        let store = MemoryStore::with_default_mode(SCOPE);
        assert!(store.add_mode_alias(SCOPE, "4s", "default").unwrap());

        let via_alias = store.resolve_mode(SCOPE, "4S").unwrap().unwrap();
        assert_eq!(via_alias.name, "default");

        // Collides with existing alias
        assert!(!store.add_mode_alias(SCOPE, "4s", "default").unwrap());
        // Collides with a mode name
        assert!(!store.add_mode_alias(SCOPE, "default", "default").unwrap());
        // Unknown target mode is an error
        assert!(store.add_mode_alias(SCOPE, "2s", "duos").is_err());

        assert!(store.remove_mode_alias(SCOPE, "4S").unwrap());
        assert!(!store.remove_mode_alias(SCOPE, "4s").unwrap());
        assert!(store.resolve_mode(SCOPE, "4s").unwrap().is_none());
    }

    #[test]
    fn test_remove_mode_drops_aliases() {
        let store = MemoryStore::with_default_mode(SCOPE);
        store.add_mode_alias(SCOPE, "4s", "default").unwrap();

        assert!(store.remove_mode(SCOPE, "default").unwrap());
        assert!(store.resolve_mode(SCOPE, "4s").unwrap().is_none());
    }

    #[test]
    fn test_timeouts_expire_on_read() {
        let store = store_with_player(1);
        let future = utils::current_timestamp() + Duration::minutes(10);
        let past = utils::current_timestamp() - Duration::minutes(10);

        store.add_timeout(SCOPE, 1, future).unwrap();
        assert_eq!(store.timeout_status(SCOPE, 1).unwrap(), Some(future));

        store.add_timeout(SCOPE, 1, past).unwrap();
        assert_eq!(store.timeout_status(SCOPE, 1).unwrap(), None);
        // Expired entry was dropped, clearing again finds nothing
        assert!(!store.clear_timeout(SCOPE, 1).unwrap());
    }

    #[test]
    fn test_map_pool_dedupes_case_insensitively() {
        let store = MemoryStore::new();
        assert!(store.add_map(SCOPE, "Ascent").unwrap());
        assert!(!store.add_map(SCOPE, "ascent").unwrap());
        assert!(store.add_map(SCOPE, "Bind").unwrap());

        assert_eq!(store.map_pool(SCOPE).unwrap(), vec!["Ascent", "Bind"]);
        assert!(store.remove_map(SCOPE, "ASCENT").unwrap());
        assert_eq!(store.map_pool(SCOPE).unwrap(), vec!["Bind"]);
    }

    #[test]
    fn test_settings_roundtrip() {
        let store = MemoryStore::new();
        assert_eq!(store.get_setting(SCOPE, "autopick").unwrap(), None);
        store.set_setting(SCOPE, "autopick", "true").unwrap();
        assert_eq!(
            store.get_setting(SCOPE, "autopick").unwrap(),
            Some("true".to_string())
        );
    }
}
