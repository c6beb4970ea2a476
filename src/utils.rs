//! Utility functions for the PUG engine

use chrono::{DateTime, Utc};
use crate::types::UserId;

/// Get the current UTC timestamp
pub fn current_timestamp() -> DateTime<Utc> {
    Utc::now()
}

/// Fallback display label when a user record cannot be resolved
pub fn placeholder_name(user_id: UserId) -> String {
    format!("Player_{user_id}")
}

/// Average of a rating slice; 0.0 for an empty slice
pub fn average(ratings: &[f64]) -> f64 {
    if ratings.is_empty() {
        return 0.0;
    }
    ratings.iter().sum::<f64>() / ratings.len() as f64
}
