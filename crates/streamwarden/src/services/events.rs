//! Typed lifecycle event bus.
//!
//! Publishers must never block on slow consumers, so events ride a bounded
//! broadcast channel: subscribers that fall behind lose the oldest events
//! and keep going.

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::models::LogLevel;

/// Lifecycle and log events emitted by the supervisor.
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    Started {
        channel_id: Uuid,
        pid: u32,
    },
    Stopped {
        channel_id: Uuid,
        exit_code: Option<i32>,
    },
    Error {
        channel_id: Uuid,
        error: String,
    },
    Log {
        channel_id: Uuid,
        level: LogLevel,
        message: String,
        timestamp: DateTime<Utc>,
    },
}

impl ChannelEvent {
    pub fn channel_id(&self) -> Uuid {
        match self {
            ChannelEvent::Started { channel_id, .. }
            | ChannelEvent::Stopped { channel_id, .. }
            | ChannelEvent::Error { channel_id, .. }
            | ChannelEvent::Log { channel_id, .. } => *channel_id,
        }
    }
}

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ChannelEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event. A bus with no subscribers simply drops it.
    pub fn publish(&self, event: ChannelEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChannelEvent> {
        self.sender.subscribe()
    }
}
