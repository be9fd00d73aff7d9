//! Messaging transport abstraction
//!
//! The event loop talks to subscribers through [`MessageTransport`]: a
//! cursor-based long-poll for inbound text and a fire-and-report send.
//!
//! ## Cursor contract
//!
//! `receive` returns a cursor one past the highest message id it saw. Passing
//! that cursor back must not redeliver anything at or below it. The core relies
//! on the transport for this; it does not de-duplicate ids itself.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::SubscriberId;

/// A raw inbound text message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Transport-assigned, increasing message identifier
    pub message_id: i64,

    /// Who sent it (and where replies go)
    pub sender_id: SubscriberId,

    pub text: String,
}

/// Offset of the next inbound message to consume.
///
/// Starts unset (the transport decides where to begin) and only ever moves
/// forward.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Cursor(Option<i64>);

impl Cursor {
    pub fn new() -> Self {
        Self(None)
    }

    pub fn at(offset: i64) -> Self {
        Self(Some(offset))
    }

    pub fn offset(self) -> Option<i64> {
        self.0
    }

    /// Mark `message_id` as consumed.
    pub fn advance(&mut self, message_id: i64) {
        self.merge(Cursor::at(message_id.saturating_add(1)));
    }

    /// Take `other` if it is further along.
    pub fn merge(&mut self, other: Cursor) {
        if other > *self {
            *self = other;
        }
    }
}

/// Result of a single long-poll.
#[derive(Debug, Clone, Default)]
pub struct Poll {
    pub cursor: Cursor,
    pub messages: Vec<InboundMessage>,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("transport responded with status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("transport rejected the call: {0}")]
    Api(String),
}

#[async_trait]
pub trait MessageTransport: Send + Sync {
    /// Long-poll for messages after `cursor`, waiting at most `timeout`.
    async fn receive(&self, cursor: Cursor, timeout: Duration) -> Result<Poll, TransportError>;

    /// Deliver `text` to `recipient`. Non-success responses are errors.
    async fn send(&self, recipient: SubscriberId, text: &str) -> Result<(), TransportError>;
}
