//! Subscription fanout.
//!
//! Subscribers follow one channel or all channels and receive snapshots at a
//! fixed cadence on their own emitter task. A slow subscriber only ever
//! loses its own snapshots; nothing here blocks the supervisor.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, trace};
use uuid::Uuid;

use crate::database::ChannelRepository;
use crate::errors::{SupervisorError, SupervisorResult};
use crate::models::{BitrateSource, Channel, ChannelSnapshot};
use crate::services::command_builder::parse_bitrate_bps;
use crate::services::process_stats::ProcessStatsCollector;
use crate::services::supervisor::{pid_alive, ChannelSupervisor};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum FollowKey {
    One(Uuid),
    All,
}

/// Registry of per-subscriber emitter tasks.
#[derive(Clone)]
pub struct SubscriptionManager {
    supervisor: ChannelSupervisor,
    channels: ChannelRepository,
    stats: ProcessStatsCollector,
    cadence: Duration,
    subscribers: Arc<Mutex<HashMap<String, HashMap<FollowKey, JoinHandle<()>>>>>,
}

impl SubscriptionManager {
    pub fn new(
        supervisor: ChannelSupervisor,
        channels: ChannelRepository,
        stats: ProcessStatsCollector,
        cadence: Duration,
    ) -> Self {
        Self {
            supervisor,
            channels,
            stats,
            cadence,
            subscribers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Follow a single channel. Replaces an existing follow of the same
    /// channel by the same subscriber.
    pub async fn follow_channel(
        &self,
        subscriber: &str,
        channel_id: Uuid,
        sender: mpsc::Sender<ChannelSnapshot>,
    ) -> SupervisorResult<()> {
        if self.channels.get(channel_id).await?.is_none() {
            return Err(SupervisorError::not_found(channel_id));
        }

        let manager = self.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = interval(manager.cadence);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let channel = match manager.channels.get(channel_id).await {
                    Ok(Some(channel)) => channel,
                    Ok(None) => break,
                    Err(e) => {
                        debug!(channel = %channel_id, "Snapshot read failed: {e}");
                        continue;
                    }
                };
                let snapshot = manager.build_snapshot(channel).await;
                if !push(&sender, snapshot) {
                    break;
                }
            }
        });

        self.install(subscriber, FollowKey::One(channel_id), handle);
        Ok(())
    }

    /// Follow every channel; one snapshot per channel per tick.
    pub async fn follow_all(
        &self,
        subscriber: &str,
        sender: mpsc::Sender<ChannelSnapshot>,
    ) -> SupervisorResult<()> {
        let manager = self.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = interval(manager.cadence);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            'outer: loop {
                ticker.tick().await;
                let channels = match manager.channels.list().await {
                    Ok(channels) => channels,
                    Err(e) => {
                        debug!("Snapshot listing failed: {e}");
                        continue;
                    }
                };
                for channel in channels {
                    let snapshot = manager.build_snapshot(channel).await;
                    if !push(&sender, snapshot) {
                        break 'outer;
                    }
                }
            }
        });

        self.install(subscriber, FollowKey::All, handle);
        Ok(())
    }

    /// Stop following one channel (or the follow-all subscription).
    pub fn unfollow(&self, subscriber: &str, channel_id: Option<Uuid>) {
        let key = match channel_id {
            Some(id) => FollowKey::One(id),
            None => FollowKey::All,
        };
        let mut subscribers = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(follows) = subscribers.get_mut(subscriber) {
            if let Some(handle) = follows.remove(&key) {
                handle.abort();
            }
            if follows.is_empty() {
                subscribers.remove(subscriber);
            }
        }
    }

    /// Drain every emitter owned by a disconnecting subscriber.
    pub fn disconnect(&self, subscriber: &str) {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(follows) = subscribers.remove(subscriber) {
            for (_, handle) in follows {
                handle.abort();
            }
        }
    }

    /// Abort every emitter task, for server shutdown.
    pub fn shutdown(&self) {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        for (_, follows) in subscribers.drain() {
            for (_, handle) in follows {
                handle.abort();
            }
        }
    }

    /// Number of live follows, across all subscribers.
    pub fn active_follows(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .map(|follows| follows.len())
            .sum()
    }

    fn install(&self, subscriber: &str, key: FollowKey, handle: JoinHandle<()>) {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        let follows = subscribers.entry(subscriber.to_string()).or_default();
        if let Some(previous) = follows.insert(key, handle) {
            previous.abort();
        }
    }

    /// Assemble the combined view for one channel: persisted record, live
    /// process statistics, and the latest metrics with the bitrate fallback
    /// chain applied (parsed, then derived from network counters, then the
    /// configured rate).
    pub async fn build_snapshot(&self, channel: Channel) -> ChannelSnapshot {
        let process = match channel.pid {
            Some(pid) if pid_alive(pid) => Some(self.stats.stats_for(pid).await),
            _ => None,
        };

        let mut metrics = self.supervisor.latest_metrics(channel.id).await;
        if let Some(record) = metrics.as_mut() {
            if record.bitrate_kbps.is_none() {
                if let Some(stats) = process.as_ref() {
                    if stats.tx_bytes > 0 && stats.elapsed_seconds > 0 {
                        record.bitrate_kbps = Some(
                            (stats.tx_bytes as f64 * 8.0) / (stats.elapsed_seconds as f64 * 1000.0),
                        );
                        record.source = BitrateSource::CalculatedFromNetwork;
                    }
                }
            }
            if record.bitrate_kbps.is_none() {
                if let Some(bps) = channel
                    .encoder_params
                    .video_bitrate
                    .as_deref()
                    .and_then(parse_bitrate_bps)
                {
                    record.bitrate_kbps = Some(bps as f64 / 1000.0);
                    record.source = BitrateSource::Configured;
                }
            }
        }

        ChannelSnapshot {
            channel,
            process,
            metrics,
            captured_at: Utc::now(),
        }
    }
}

/// Push without ever blocking the emitter; a full subscriber queue loses
/// this snapshot, a closed one ends the follow.
fn push(sender: &mpsc::Sender<ChannelSnapshot>, snapshot: ChannelSnapshot) -> bool {
    match sender.try_send(snapshot) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Full(_)) => {
            trace!("Subscriber queue full, dropping snapshot");
            true
        }
        Err(mpsc::error::TrySendError::Closed(_)) => false,
    }
}
