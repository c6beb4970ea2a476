//! PUG Engine - queue lifecycle and rating engine for pick up games
//!
//! This crate provides per-channel game queues with ready checks,
//! captain drafts, rating-balanced team formation, majority result
//! voting and an ELO ladder. Persistence and chat delivery are
//! collaborator traits supplied by the host.

pub mod balance;
pub mod config;
pub mod error;
pub mod queue;
pub mod rating;
pub mod store;
pub mod surface;
pub mod types;
pub mod utils;
pub mod vote;

// Re-export commonly used types and traits
pub use error::{PugError, Result};
pub use types::*;

// Re-export key components
pub use queue::{QueueEngine, QueueRegistry};
pub use store::{MemoryStore, Store};
pub use surface::MessageSink;
pub use vote::ResultCoordinator;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
