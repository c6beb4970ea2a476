//! Outbound messaging surface
//!
//! The engine never talks to a chat platform directly. Everything
//! user-visible goes through the `MessageSink` trait; the host binds it
//! to whatever transport it runs on.

pub mod sink;

// Re-export commonly used types
pub use sink::{ConsoleSink, MessageSink, RecordingSink, SentMessage};

#[cfg(test)]
pub use sink::MockMessageSink;
