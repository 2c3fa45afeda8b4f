//! Real-time chat relay.
//!
//! Every accepted message is broadcast to every connected listener at once.
//! There is no per-listener queue beyond the broadcast ring, no delivery
//! acknowledgment and no replay on reconnect. A listener that falls more
//! than `capacity` messages behind skips the ones it missed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;

/// Longest display name kept, in characters.
pub const MAX_NAME_CHARS: usize = 40;

/// Name used when a client does not supply one.
pub const ANONYMOUS: &str = "anonymous";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub from: String,
    pub text: String,
    pub sent_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChatError {
    #[error("Message is empty")]
    Empty,

    #[error("Message exceeds {0} characters")]
    TooLong(usize),
}

#[derive(Debug, Clone)]
pub struct ChatRelay {
    tx: broadcast::Sender<ChatMessage>,
    max_message_chars: usize,
}

impl ChatRelay {
    pub fn new(capacity: usize, max_message_chars: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            max_message_chars,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChatMessage> {
        self.tx.subscribe()
    }

    pub fn listener_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Stamp and broadcast a message. Having no listeners is not an error.
    pub fn publish(&self, from: &str, text: &str) -> Result<ChatMessage, ChatError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ChatError::Empty);
        }
        if text.chars().count() > self.max_message_chars {
            return Err(ChatError::TooLong(self.max_message_chars));
        }

        let message = ChatMessage {
            id: uuid::Uuid::new_v4().to_string(),
            from: display_name(Some(from)),
            text: text.to_string(),
            sent_at: Utc::now(),
        };

        let delivered = self.tx.send(message.clone()).unwrap_or(0);
        tracing::debug!(id = %message.id, delivered, "Chat message relayed");
        Ok(message)
    }
}

/// Normalize a client-supplied display name.
pub fn display_name(raw: Option<&str>) -> String {
    let name: String = raw
        .unwrap_or_default()
        .trim()
        .chars()
        .filter(|c| !c.is_control())
        .take(MAX_NAME_CHARS)
        .collect();
    let name = name.trim();
    if name.is_empty() {
        ANONYMOUS.to_string()
    } else {
        name.to_string()
    }
}
