//! Event bus subscriber that persists channel logs.
//!
//! Write failures are recorded at debug level and swallowed; the log path
//! must never take the supervisor down.

use chrono::Utc;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::database::ChannelLogRepository;
use crate::models::LogLevel;
use crate::services::events::{ChannelEvent, EventBus};

pub struct LogPersister {
    logs: ChannelLogRepository,
    max_entries_per_channel: u32,
}

impl LogPersister {
    pub fn new(logs: ChannelLogRepository, max_entries_per_channel: u32) -> Self {
        Self {
            logs,
            max_entries_per_channel,
        }
    }

    /// Subscribe to the bus and persist events until it closes.
    pub fn spawn(self, bus: &EventBus) -> JoinHandle<()> {
        let mut receiver = bus.subscribe();
        tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(event) => self.persist(event).await,
                    Err(RecvError::Lagged(missed)) => {
                        debug!("Log persister lagged, dropped {missed} events");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    async fn persist(&self, event: ChannelEvent) {
        let (channel_id, level, message) = match event {
            ChannelEvent::Started { channel_id, pid } => (
                channel_id,
                LogLevel::Info,
                format!("encoder started (pid {pid})"),
            ),
            ChannelEvent::Stopped {
                channel_id,
                exit_code,
            } => (
                channel_id,
                LogLevel::Info,
                match exit_code {
                    Some(code) => format!("encoder exited with code {code}"),
                    None => "encoder stopped".to_string(),
                },
            ),
            ChannelEvent::Error { channel_id, error } => (channel_id, LogLevel::Error, error),
            ChannelEvent::Log {
                channel_id,
                level,
                message,
                ..
            } => (channel_id, level, message),
        };

        if let Err(e) = self
            .logs
            .append(
                channel_id,
                level,
                &message,
                Utc::now(),
                self.max_entries_per_channel,
            )
            .await
        {
            debug!(channel = %channel_id, "Failed to persist channel log: {e}");
        }
    }
}
