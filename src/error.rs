//! Error types for the PUG engine
//!
//! This module defines all error types using anyhow for consistent error handling
//! throughout the application. Expected user-facing rejections (already queued,
//! not your turn, ...) are *not* errors; see `queue::Rejection`.

/// Result type alias for convenience
pub type Result<T> = anyhow::Result<T>;

/// Custom error types for specific engine scenarios
#[derive(Debug, thiserror::Error)]
pub enum PugError {
    #[error("Player not found: {user_id} in scope {scope_id}")]
    PlayerNotFound { user_id: u64, scope_id: String },

    #[error("Match not found: #{match_id}")]
    MatchNotFound { match_id: u64 },

    #[error("Game mode not found: {name}")]
    ModeNotFound { name: String },

    #[error("No valid team partition for pool of size {pool_size}")]
    NoValidPartition { pool_size: usize },

    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },

    #[error("Internal engine error: {message}")]
    InternalError { message: String },
}
