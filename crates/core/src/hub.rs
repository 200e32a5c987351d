//! Message hub: bounded queues between chat channels and the agent.
//!
//! Channels push [`InboundMessage`]s in; the agent and its background
//! subagent runs push [`OutboundMessage`]s out. The outbound side is the one
//! resource shared by every concurrent unit of work, so it only offers
//! non-blocking sends: when the queue is full the message is refused and the
//! caller decides whether that is an error or an accepted loss.

use crate::error::ChannelError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// A message received from a chat channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Channel name (e.g., "telegram", "discord", "cli")
    pub channel: String,

    /// Platform-specific sender identifier
    pub sender_id: String,

    /// The chat/group/DM identifier within the channel
    pub chat_id: String,

    /// The text content
    pub content: String,

    /// Attached image URLs, in order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub media: Vec<String>,

    pub timestamp: DateTime<Utc>,
}

impl InboundMessage {
    pub fn new(
        channel: impl Into<String>,
        sender_id: impl Into<String>,
        chat_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            channel: channel.into(),
            sender_id: sender_id.into(),
            chat_id: chat_id.into(),
            content: content.into(),
            media: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_media(mut self, media: Vec<String>) -> Self {
        self.media = media;
        self
    }

    /// The session this message belongs to: `<channel>:<chat_id>`.
    pub fn session_key(&self) -> String {
        format!("{}:{}", self.channel, self.chat_id)
    }
}

/// A message to deliver to a chat channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub channel: String,
    pub chat_id: String,
    pub content: String,
}

impl OutboundMessage {
    pub fn new(
        channel: impl Into<String>,
        chat_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            channel: channel.into(),
            chat_id: chat_id.into(),
            content: content.into(),
        }
    }
}

/// Cloneable handle to the bounded outbound queue.
#[derive(Debug, Clone)]
pub struct OutboundSink {
    tx: mpsc::Sender<OutboundMessage>,
}

impl OutboundSink {
    pub fn new(tx: mpsc::Sender<OutboundMessage>) -> Self {
        Self { tx }
    }

    /// Offer a message without waiting. Never blocks.
    pub fn offer(&self, message: OutboundMessage) -> std::result::Result<(), ChannelError> {
        match self.tx.try_send(message) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(m)) => Err(ChannelError::QueueFull {
                channel: m.channel,
                chat_id: m.chat_id,
            }),
            Err(TrySendError::Closed(_)) => Err(ChannelError::Closed),
        }
    }

    /// Free slots remaining in the queue.
    pub fn remaining_capacity(&self) -> usize {
        self.tx.capacity()
    }
}

/// Both ends of the inbound and outbound queues.
pub struct Hub {
    pub inbound_tx: mpsc::Sender<InboundMessage>,
    pub inbound_rx: mpsc::Receiver<InboundMessage>,
    pub outbound: OutboundSink,
    pub outbound_rx: mpsc::Receiver<OutboundMessage>,
}

impl Hub {
    /// Create a hub whose queues each hold at most `capacity` messages.
    pub fn new(capacity: usize) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(capacity.max(1));
        let (outbound_tx, outbound_rx) = mpsc::channel(capacity.max(1));
        Self {
            inbound_tx,
            inbound_rx,
            outbound: OutboundSink::new(outbound_tx),
            outbound_rx,
        }
    }
}
