//! Periodic reconciliation of declared channel state against OS reality.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, warn};

use crate::database::ChannelRepository;
use crate::errors::SupervisorResult;
use crate::models::ChannelStatus;
use crate::services::supervisor::{pid_alive, ChannelSupervisor};

/// Walks channels whose declared status is running and drives divergence
/// back: dead processes become errors (with auto-restart where permitted),
/// running rows without a pid are corrected to stopped.
pub struct HealthMonitor {
    supervisor: ChannelSupervisor,
    channels: ChannelRepository,
    period: Duration,
}

impl HealthMonitor {
    pub fn new(
        supervisor: ChannelSupervisor,
        channels: ChannelRepository,
        period: Duration,
    ) -> Self {
        Self {
            supervisor,
            channels,
            period,
        }
    }

    /// Run the loop until the task is aborted.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(self.period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if let Err(e) = self.run_once().await {
                    error!("Health check pass failed: {e}");
                }
            }
        })
    }

    /// One reconciliation pass.
    pub async fn run_once(&self) -> SupervisorResult<()> {
        let running = self.channels.list_by_status(ChannelStatus::Running).await?;

        for channel in running {
            if self.supervisor.is_restarting(channel.id) {
                debug!(channel = %channel.id, "Skipping health check, restart in flight");
                continue;
            }

            match channel.pid {
                None => {
                    // running without a pid is a torn record
                    warn!(channel = %channel.id, "Running status without pid, correcting to stopped");
                    self.channels
                        .set_status_and_pid(channel.id, ChannelStatus::Stopped, None)
                        .await?;
                }
                Some(pid) => {
                    if pid_alive(pid) {
                        continue;
                    }
                    // the slot's exit waiter may already be on it
                    if self.supervisor.has_slot(channel.id).await {
                        continue;
                    }
                    // re-read, the operator may have acted since the listing
                    let Some(fresh) = self.channels.get(channel.id).await? else {
                        continue;
                    };
                    if fresh.status != ChannelStatus::Running {
                        continue;
                    }
                    self.supervisor
                        .handle_unexpected_exit(channel.id, None)
                        .await;
                }
            }
        }

        Ok(())
    }
}
