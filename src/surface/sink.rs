//! Message sink trait and built-in implementations

use crate::error::{PugError, Result};
use crate::types::{ChannelId, UserId};
use async_trait::async_trait;
use tracing::info;

/// Trait for delivering engine output to users
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageSink: Send + Sync {
    /// Post a message to a channel
    async fn announce(&self, channel: ChannelId, text: &str) -> Result<()>;

    /// Send a private message to one user
    async fn direct_message(&self, user: UserId, text: &str) -> Result<()>;
}

/// Sink that writes everything to the log. Used by the simulator and as
/// a fallback when no platform binding is attached.
#[derive(Debug, Clone, Default)]
pub struct ConsoleSink;

impl ConsoleSink {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl MessageSink for ConsoleSink {
    async fn announce(&self, channel: ChannelId, text: &str) -> Result<()> {
        info!(channel, "{}", text);
        Ok(())
    }

    async fn direct_message(&self, user: UserId, text: &str) -> Result<()> {
        info!(user, "(dm) {}", text);
        Ok(())
    }
}

/// One captured outbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SentMessage {
    Announce { channel: ChannelId, text: String },
    Direct { user: UserId, text: String },
}

impl SentMessage {
    pub fn text(&self) -> &str {
        match self {
            SentMessage::Announce { text, .. } => text,
            SentMessage::Direct { text, .. } => text,
        }
    }
}

/// Sink that records every message for later assertions
#[derive(Debug, Default)]
pub struct RecordingSink {
    sent: std::sync::Mutex<Vec<SentMessage>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All messages sent so far
    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent
            .lock()
            .map(|sent| sent.clone())
            .unwrap_or_default()
    }

    /// Channel announcements only, as plain strings
    pub fn announcements(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|message| match message {
                SentMessage::Announce { text, .. } => Some(text),
                SentMessage::Direct { .. } => None,
            })
            .collect()
    }

    /// Direct messages delivered to one user
    pub fn dms_to(&self, user: UserId) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|message| match message {
                SentMessage::Direct { user: to, text } if to == user => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        if let Ok(mut sent) = self.sent.lock() {
            sent.clear();
        }
    }
}

#[async_trait]
impl MessageSink for RecordingSink {
    async fn announce(&self, channel: ChannelId, text: &str) -> Result<()> {
        let mut sent = self.sent.lock().map_err(|_| PugError::InternalError {
            message: "Failed to acquire sent messages lock".to_string(),
        })?;
        sent.push(SentMessage::Announce {
            channel,
            text: text.to_string(),
        });
        Ok(())
    }

    async fn direct_message(&self, user: UserId, text: &str) -> Result<()> {
        let mut sent = self.sent.lock().map_err(|_| PugError::InternalError {
            message: "Failed to acquire sent messages lock".to_string(),
        })?;
        sent.push(SentMessage::Direct {
            user,
            text: text.to_string(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_recording_sink_captures_in_order() {
        let sink = RecordingSink::new();
        sink.announce(10, "queue is full").await.unwrap();
        sink.direct_message(7, "you are up").await.unwrap();
        sink.announce(10, "ready check").await.unwrap();

        let sent = sink.sent();
        assert_eq!(sent.len(), 3);
        assert_eq!(sent[0].text(), "queue is full");
        assert_eq!(sink.announcements(), vec!["queue is full", "ready check"]);
        assert_eq!(sink.dms_to(7), vec!["you are up"]);
        assert!(sink.dms_to(8).is_empty());
    }

    #[tokio::test]
    async fn test_mock_sink_expectations() {
        let mut mock = MockMessageSink::new();
        mock.expect_announce()
            .withf(|channel, text| *channel == 42 && text.contains("ready"))
            .times(1)
            .returning(|_, _| Ok(()));

        mock.announce(42, "ready check started").await.unwrap();
    }
}
