//! Main application configuration
//!
//! This module defines the primary configuration structures for the PUG
//! engine, including environment variable loading, TOML file loading and
//! validation.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    pub service: ServiceSettings,
    pub queue: QueueSettings,
    pub rating: RatingSettings,
}

/// Service-level settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSettings {
    /// Service name for logging
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Graceful shutdown timeout in seconds
    pub shutdown_timeout_seconds: u64,
}

/// Queue lifecycle timing settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSettings {
    /// How long players have to answer a ready check, in seconds
    pub ready_check_seconds: u64,
    /// How long to wait for captain volunteers before auto-assigning, in seconds
    pub captain_wait_seconds: u64,
    /// Window after a ready check answer during which a player is treated as
    /// still ready, in seconds
    pub sticky_ready_seconds: u64,
    /// Queue is hard-reset after this much inactivity, in seconds
    pub inactivity_seconds: u64,
    /// Bounds for player-requested scheduled removal, in minutes
    pub expire_min_minutes: u64,
    pub expire_max_minutes: u64,
    /// Majority vote window for winner and cancel votes, in seconds
    pub winner_vote_seconds: u64,
    /// Majority vote window for split votes, in seconds
    pub split_vote_seconds: u64,
    /// How many recent maps to avoid when rolling a tiebreaker
    pub tiebreaker_cooldown: usize,
}

/// Rating system settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RatingSettings {
    /// Rating assigned to newly registered players
    pub starting_rating: f64,
    /// ELO k-factor
    pub k_factor: f64,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            name: "pug-engine".to_string(),
            log_level: "info".to_string(),
            shutdown_timeout_seconds: 30,
        }
    }
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            ready_check_seconds: 60,
            captain_wait_seconds: 10,
            sticky_ready_seconds: 600, // 10 minutes
            inactivity_seconds: 14400, // 4 hours
            expire_min_minutes: 1,
            expire_max_minutes: 120,
            winner_vote_seconds: 60,
            split_vote_seconds: 900, // 15 minutes
            tiebreaker_cooldown: 3,
        }
    }
}

impl Default for RatingSettings {
    fn default() -> Self {
        Self {
            starting_rating: 1000.0,
            k_factor: 32.0,
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables with fallback to defaults
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        // Service settings
        if let Ok(name) = env::var("SERVICE_NAME") {
            config.service.name = name;
        }
        if let Ok(log_level) = env::var("LOG_LEVEL") {
            config.service.log_level = log_level;
        }
        if let Ok(timeout) = env::var("SHUTDOWN_TIMEOUT_SECONDS") {
            config.service.shutdown_timeout_seconds = timeout
                .parse()
                .map_err(|_| anyhow!("Invalid SHUTDOWN_TIMEOUT_SECONDS value: {}", timeout))?;
        }

        // Queue settings
        if let Ok(secs) = env::var("READY_CHECK_SECONDS") {
            config.queue.ready_check_seconds = secs
                .parse()
                .map_err(|_| anyhow!("Invalid READY_CHECK_SECONDS value: {}", secs))?;
        }
        if let Ok(secs) = env::var("CAPTAIN_WAIT_SECONDS") {
            config.queue.captain_wait_seconds = secs
                .parse()
                .map_err(|_| anyhow!("Invalid CAPTAIN_WAIT_SECONDS value: {}", secs))?;
        }
        if let Ok(secs) = env::var("STICKY_READY_SECONDS") {
            config.queue.sticky_ready_seconds = secs
                .parse()
                .map_err(|_| anyhow!("Invalid STICKY_READY_SECONDS value: {}", secs))?;
        }
        if let Ok(secs) = env::var("INACTIVITY_SECONDS") {
            config.queue.inactivity_seconds = secs
                .parse()
                .map_err(|_| anyhow!("Invalid INACTIVITY_SECONDS value: {}", secs))?;
        }
        if let Ok(mins) = env::var("EXPIRE_MIN_MINUTES") {
            config.queue.expire_min_minutes = mins
                .parse()
                .map_err(|_| anyhow!("Invalid EXPIRE_MIN_MINUTES value: {}", mins))?;
        }
        if let Ok(mins) = env::var("EXPIRE_MAX_MINUTES") {
            config.queue.expire_max_minutes = mins
                .parse()
                .map_err(|_| anyhow!("Invalid EXPIRE_MAX_MINUTES value: {}", mins))?;
        }
        if let Ok(secs) = env::var("WINNER_VOTE_SECONDS") {
            config.queue.winner_vote_seconds = secs
                .parse()
                .map_err(|_| anyhow!("Invalid WINNER_VOTE_SECONDS value: {}", secs))?;
        }
        if let Ok(secs) = env::var("SPLIT_VOTE_SECONDS") {
            config.queue.split_vote_seconds = secs
                .parse()
                .map_err(|_| anyhow!("Invalid SPLIT_VOTE_SECONDS value: {}", secs))?;
        }
        if let Ok(count) = env::var("TIEBREAKER_COOLDOWN") {
            config.queue.tiebreaker_cooldown = count
                .parse()
                .map_err(|_| anyhow!("Invalid TIEBREAKER_COOLDOWN value: {}", count))?;
        }

        // Rating settings
        if let Ok(rating) = env::var("STARTING_RATING") {
            config.rating.starting_rating = rating
                .parse()
                .map_err(|_| anyhow!("Invalid STARTING_RATING value: {}", rating))?;
        }
        if let Ok(k) = env::var("RATING_K_FACTOR") {
            config.rating.k_factor = k
                .parse()
                .map_err(|_| anyhow!("Invalid RATING_K_FACTOR value: {}", k))?;
        }

        validate_config(&config)?;
        Ok(config)
    }

    /// Load configuration from a TOML file, then validate
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Self = toml::from_str(&raw)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        validate_config(&config)?;
        Ok(config)
    }

    /// Get shutdown timeout as Duration
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.service.shutdown_timeout_seconds)
    }
}

impl QueueSettings {
    /// Get ready check window as Duration
    pub fn ready_check_window(&self) -> Duration {
        Duration::from_secs(self.ready_check_seconds)
    }

    /// Get captain volunteer window as Duration
    pub fn captain_wait(&self) -> Duration {
        Duration::from_secs(self.captain_wait_seconds)
    }

    /// Get sticky ready window as Duration
    pub fn sticky_ready_window(&self) -> Duration {
        Duration::from_secs(self.sticky_ready_seconds)
    }

    /// Get inactivity deadline as Duration
    pub fn inactivity_deadline(&self) -> Duration {
        Duration::from_secs(self.inactivity_seconds)
    }

    /// Get winner/cancel vote window as Duration
    pub fn winner_vote_window(&self) -> Duration {
        Duration::from_secs(self.winner_vote_seconds)
    }

    /// Get split vote window as Duration
    pub fn split_vote_window(&self) -> Duration {
        Duration::from_secs(self.split_vote_seconds)
    }

    /// Check a requested expire delay against the configured bounds
    pub fn expire_in_bounds(&self, minutes: u64) -> bool {
        (self.expire_min_minutes..=self.expire_max_minutes).contains(&minutes)
    }
}

/// Validate configuration values
pub fn validate_config(config: &AppConfig) -> Result<()> {
    // Validate log level
    match config.service.log_level.to_lowercase().as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => {}
        _ => return Err(anyhow!("Invalid log level: {}", config.service.log_level)),
    }

    // Validate timeouts
    if config.service.shutdown_timeout_seconds == 0 {
        return Err(anyhow!("Shutdown timeout must be greater than 0"));
    }
    if config.queue.ready_check_seconds == 0 {
        return Err(anyhow!("Ready check window must be greater than 0"));
    }
    if config.queue.inactivity_seconds == 0 {
        return Err(anyhow!("Inactivity deadline must be greater than 0"));
    }
    if config.queue.winner_vote_seconds == 0 || config.queue.split_vote_seconds == 0 {
        return Err(anyhow!("Vote windows must be greater than 0"));
    }
    if config.queue.expire_min_minutes == 0 {
        return Err(anyhow!("Expire lower bound must be greater than 0"));
    }
    if config.queue.expire_min_minutes > config.queue.expire_max_minutes {
        return Err(anyhow!(
            "Expire lower bound {} exceeds upper bound {}",
            config.queue.expire_min_minutes,
            config.queue.expire_max_minutes
        ));
    }

    // Validate rating settings
    if config.rating.starting_rating <= 0.0 {
        return Err(anyhow!("Starting rating must be positive"));
    }
    if config.rating.k_factor <= 0.0 {
        return Err(anyhow!("Rating k-factor must be positive"));
    }

    Ok(())
}
