//! Queue lifecycle engine
//!
//! This module contains the per-channel, per-mode queue state machine,
//! the engine that drives it, and the registry that owns one engine per
//! (channel, mode) pair.

pub mod engine;
pub mod registry;
pub mod state;

// Re-export commonly used types
pub use engine::{JoinOutcome, OpOutcome, PickOutcome, QueueEngine, Rejection};
pub use registry::QueueRegistry;
pub use state::{QueuePhase, QueueSnapshot, ReadyResponse};
