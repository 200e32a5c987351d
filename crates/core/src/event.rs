//! Domain event system: decoupled observation of the agent runtime.
//!
//! Events are published when something interesting happens in a turn or a
//! background subagent run. Subscribers react without coupling to the loop.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// A tool was executed
    ToolExecuted {
        session_key: String,
        tool_name: String,
        success: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// Older turns were replaced by a summary
    CompactionApplied {
        messages_before: usize,
        messages_after: usize,
        timestamp: DateTime<Utc>,
    },

    /// A background subagent run finished (successfully or not)
    SubagentCompleted {
        run_id: String,
        session_key: String,
        success: bool,
        timestamp: DateTime<Utc>,
    },

    /// A subagent announcement was discarded because the outbound queue was full
    AnnouncementDropped {
        run_id: String,
        channel: String,
        chat_id: String,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for domain events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub. Publishing never
/// blocks; slow subscribers observe `RecvError::Lagged`.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: DomainEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
