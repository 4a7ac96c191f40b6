//! Operator-facing channel operations.
//!
//! The control surface (REST, WebSocket, CLI) is a thin layer over this
//! service. It owns validation and the business rules around editing running
//! channels; process work is delegated to the supervisor.

use tracing::info;
use uuid::Uuid;

use crate::database::{
    ChannelCreateRequest, ChannelLogRepository, ChannelRepository, ChannelUpdateRequest,
};
use crate::errors::{SupervisorError, SupervisorResult};
use crate::models::{
    AudioTrackInfo, Channel, ChannelLog, ChannelSnapshot, ChannelStatus, LogLevel, Output,
    ProcessStats,
};
use crate::services::fanout::SubscriptionManager;
use crate::services::media_paths::MediaPaths;
use crate::services::media_prober::MediaProber;
use crate::services::process_stats::ProcessStatsCollector;
use crate::services::supervisor::ChannelSupervisor;

#[derive(Clone)]
pub struct ChannelService {
    channels: ChannelRepository,
    logs: ChannelLogRepository,
    supervisor: ChannelSupervisor,
    fanout: SubscriptionManager,
    stats: ProcessStatsCollector,
    prober: MediaProber,
    media: MediaPaths,
}

impl ChannelService {
    pub fn new(
        channels: ChannelRepository,
        logs: ChannelLogRepository,
        supervisor: ChannelSupervisor,
        fanout: SubscriptionManager,
        stats: ProcessStatsCollector,
        prober: MediaProber,
        media: MediaPaths,
    ) -> Self {
        Self {
            channels,
            logs,
            supervisor,
            fanout,
            stats,
            prober,
            media,
        }
    }

    pub async fn list_channels(&self) -> SupervisorResult<Vec<Channel>> {
        self.channels.list().await
    }

    pub async fn get_channel(&self, id: Uuid) -> SupervisorResult<Channel> {
        self.channels
            .get(id)
            .await?
            .ok_or_else(|| SupervisorError::not_found(id))
    }

    pub async fn create_channel(&self, request: ChannelCreateRequest) -> SupervisorResult<Channel> {
        validate_create(&request)?;
        let channel = self.channels.create(request).await?;
        info!(channel = %channel.id, name = %channel.name, "Channel created");
        Ok(channel)
    }

    /// Edit a channel. While it is running only `name` and `auto_restart`
    /// may change; anything else requires a stop first.
    pub async fn update_channel(
        &self,
        id: Uuid,
        request: ChannelUpdateRequest,
    ) -> SupervisorResult<Channel> {
        if request.is_empty() {
            return self.get_channel(id).await;
        }

        let current = self.get_channel(id).await?;
        let busy = matches!(
            current.status,
            ChannelStatus::Running | ChannelStatus::Restarting
        );
        if busy && request.touches_critical_fields() {
            return Err(SupervisorError::conflict(
                "stop the channel before editing its input, outputs or encoder parameters",
            ));
        }

        if let Some(name) = &request.name {
            if name.trim().is_empty() {
                return Err(SupervisorError::validation("channel name must not be empty"));
            }
        }
        if let Some(outputs) = &request.outputs {
            if outputs.is_empty() {
                return Err(SupervisorError::validation(
                    "channel must keep at least one output",
                ));
            }
        }

        let updated = self
            .channels
            .update(id, request)
            .await?
            .ok_or_else(|| SupervisorError::not_found(id))?;
        info!(channel = %id, "Channel updated");
        Ok(updated)
    }

    /// Delete a channel. A running channel is stopped first; logs and media
    /// files go with it.
    pub async fn delete_channel(&self, id: Uuid) -> SupervisorResult<()> {
        let channel = self.get_channel(id).await?;

        if channel.status != ChannelStatus::Stopped {
            match self.supervisor.stop(id, true).await {
                Ok(()) => {}
                Err(e) if e.kind() == crate::errors::ErrorKind::Conflict => {}
                Err(e) => return Err(e),
            }
        }

        self.logs.delete_for_channel(id).await?;
        self.channels.delete(id).await?;
        if let Err(e) = self.media.remove(id).await {
            tracing::warn!(channel = %id, "Failed to remove media directory: {e}");
        }
        info!(channel = %id, "Channel deleted");
        Ok(())
    }

    pub async fn start(&self, id: Uuid) -> SupervisorResult<()> {
        self.supervisor.start(id).await
    }

    pub async fn stop(&self, id: Uuid, clean_files: bool) -> SupervisorResult<()> {
        self.supervisor.stop(id, clean_files).await
    }

    pub async fn restart(&self, id: Uuid) -> SupervisorResult<()> {
        self.supervisor.restart(id).await
    }

    /// Combined live view of a channel.
    pub async fn get_status(&self, id: Uuid) -> SupervisorResult<ChannelSnapshot> {
        let channel = self.get_channel(id).await?;
        Ok(self.fanout.build_snapshot(channel).await)
    }

    pub async fn get_logs(
        &self,
        id: Uuid,
        level: Option<LogLevel>,
        limit: u32,
        offset: u32,
    ) -> SupervisorResult<Vec<ChannelLog>> {
        let _ = self.get_channel(id).await?;
        self.logs.list(id, level, limit, offset).await
    }

    pub async fn delete_logs(&self, id: Uuid) -> SupervisorResult<u64> {
        let _ = self.get_channel(id).await?;
        self.logs.delete_for_channel(id).await
    }

    /// OS statistics for the channel's encoder; zeroed when not running.
    pub async fn get_stats(&self, id: Uuid) -> SupervisorResult<ProcessStats> {
        let channel = self.get_channel(id).await?;
        match channel.pid {
            Some(pid) => Ok(self.stats.stats_for(pid).await),
            None => Ok(ProcessStats::default()),
        }
    }

    pub async fn analyze_audio_tracks(
        &self,
        input_url: &str,
    ) -> SupervisorResult<Vec<AudioTrackInfo>> {
        if input_url.trim().is_empty() {
            return Err(SupervisorError::validation("input url must not be empty"));
        }
        self.prober.analyze_audio_tracks(input_url).await
    }
}

fn validate_create(request: &ChannelCreateRequest) -> SupervisorResult<()> {
    if request.name.trim().is_empty() {
        return Err(SupervisorError::validation("channel name must not be empty"));
    }
    if request.outputs.is_empty() {
        return Err(SupervisorError::validation(
            "channel must have at least one output",
        ));
    }
    let dvb_input = matches!(request.outputs.first(), Some(Output::Dvb {}))
        && request.encoder_params.dvb_device.is_some();
    if request.input_url.trim().is_empty() && !dvb_input {
        return Err(SupervisorError::validation(
            "channel input url must not be empty",
        ));
    }
    Ok(())
}
