//! Configuration management for the PUG engine
//!
//! This module handles all configuration loading from environment variables,
//! TOML files, validation, and default values.

pub mod app;

// Re-export commonly used types
pub use app::{validate_config, AppConfig, QueueSettings, RatingSettings, ServiceSettings};
