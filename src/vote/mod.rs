//! Result reporting and voting
//!
//! Match results are settled by majority vote of the participants, or
//! directly by an admin override. This module owns the open polls and
//! the settlement math that feeds back into player records.

pub mod coordinator;

// Re-export commonly used types
pub use coordinator::{AdminOutcome, ResultCoordinator, VoteKind, VoteOutcome, VoteRejection};
