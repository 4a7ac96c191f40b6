//! Process lifecycle supervision.
//!
//! Owns the set of running encoder processes. Every state transition for a
//! channel is serialized through the restarting exclusion set plus the
//! persisted status, and status/pid are always written together. Locks guard
//! plain maps only and are never held across I/O.

use std::collections::{HashMap, HashSet};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid as NixPid;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::sync::RwLock;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::config::SupervisorConfig;
use crate::database::ChannelRepository;
use crate::errors::{SupervisorError, SupervisorResult};
use crate::models::{Channel, ChannelStatus, LogLevel, MetricRecord, Output};
use crate::services::command_builder::CommandBuilder;
use crate::services::events::{ChannelEvent, EventBus};
use crate::services::hwaccel::HwAccelProbe;
use crate::services::media_paths::MediaPaths;
use crate::services::progress::ProgressParser;

const DEATH_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// In-memory record of one running encoder. Never persisted.
#[derive(Clone)]
pub struct ProcessSlot {
    pub pid: u32,
    pub started_at: Instant,
    pub args: Vec<String>,
    pub metrics: Arc<RwLock<Option<MetricRecord>>>,
}

/// Supervises the full population of encoder processes.
#[derive(Clone)]
pub struct ChannelSupervisor {
    channels: ChannelRepository,
    builder: CommandBuilder,
    probe: Arc<HwAccelProbe>,
    parser: Arc<ProgressParser>,
    events: EventBus,
    media: MediaPaths,
    settings: SupervisorConfig,
    slots: Arc<RwLock<HashMap<Uuid, ProcessSlot>>>,
    /// Channels with a restart in flight, tagged with a generation so a
    /// watchdog can only clear the restart it was armed for.
    restarting: Arc<Mutex<HashMap<Uuid, u64>>>,
    restart_generation: Arc<AtomicU64>,
    stopping: Arc<Mutex<HashSet<Uuid>>>,
    restart_attempts: Arc<Mutex<HashMap<Uuid, Vec<Instant>>>>,
}

impl ChannelSupervisor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        channels: ChannelRepository,
        builder: CommandBuilder,
        probe: Arc<HwAccelProbe>,
        parser: Arc<ProgressParser>,
        events: EventBus,
        media: MediaPaths,
        settings: SupervisorConfig,
    ) -> Self {
        Self {
            channels,
            builder,
            probe,
            parser,
            events,
            media,
            settings,
            slots: Arc::new(RwLock::new(HashMap::new())),
            restarting: Arc::new(Mutex::new(HashMap::new())),
            restart_generation: Arc::new(AtomicU64::new(0)),
            stopping: Arc::new(Mutex::new(HashSet::new())),
            restart_attempts: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub async fn has_slot(&self, channel_id: Uuid) -> bool {
        self.slots.read().await.contains_key(&channel_id)
    }

    pub async fn slot(&self, channel_id: Uuid) -> Option<ProcessSlot> {
        self.slots.read().await.get(&channel_id).cloned()
    }

    pub async fn latest_metrics(&self, channel_id: Uuid) -> Option<MetricRecord> {
        let slot = self.slot(channel_id).await?;
        let metrics = slot.metrics.read().await;
        metrics.clone()
    }

    pub fn is_restarting(&self, channel_id: Uuid) -> bool {
        self.restarting
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(&channel_id)
    }

    /// Claim the per-channel restart exclusion. Returns the generation tag
    /// to release with, or `None` when a restart is already in flight.
    fn try_begin_restart(&self, channel_id: Uuid) -> Option<u64> {
        let mut restarting = self.restarting.lock().unwrap_or_else(|e| e.into_inner());
        if restarting.contains_key(&channel_id) {
            return None;
        }
        let generation = self.restart_generation.fetch_add(1, Ordering::Relaxed);
        restarting.insert(channel_id, generation);
        Some(generation)
    }

    fn end_restart(&self, channel_id: Uuid, generation: u64) {
        let mut restarting = self.restarting.lock().unwrap_or_else(|e| e.into_inner());
        if restarting.get(&channel_id) == Some(&generation) {
            restarting.remove(&channel_id);
        }
    }

    /// Start the encoder for a channel.
    pub async fn start(&self, channel_id: Uuid) -> SupervisorResult<()> {
        if self.has_slot(channel_id).await {
            return Err(SupervisorError::conflict(format!(
                "channel {channel_id} is already running"
            )));
        }

        let channel = self.load(channel_id).await?;
        validate_channel(&channel)?;

        // another supervisor generation may still own a live process
        if channel.status == ChannelStatus::Running {
            if let Some(pid) = channel.pid {
                if pid_alive(pid) {
                    return Err(SupervisorError::conflict(format!(
                        "channel {channel_id} is already running with pid {pid}"
                    )));
                }
            }
        }

        let output = channel
            .outputs
            .first()
            .cloned()
            .ok_or_else(|| SupervisorError::validation("channel has no outputs"))?;

        self.media.ensure(channel_id).await?;

        let capabilities = self.probe.capabilities().await;
        let built = match self
            .builder
            .build(&channel, &output, &self.probe, &capabilities)
        {
            Ok(built) => built,
            Err(e) => {
                self.fail_channel(channel_id, &e.to_string()).await;
                return Err(e);
            }
        };

        debug!(channel = %channel_id, "Spawning {} {:?}", built.program, built.args);

        let mut command = Command::new(&built.program);
        command
            .args(&built.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                let err = SupervisorError::spawn(format!("{}: {e}", built.program));
                self.fail_channel(channel_id, &err.to_string()).await;
                return Err(err);
            }
        };

        let Some(pid) = child.id() else {
            let _ = child.wait().await;
            let err = SupervisorError::spawn("encoder exited during startup".to_string());
            self.fail_channel(channel_id, &err.to_string()).await;
            return Err(err);
        };

        let metrics = Arc::new(RwLock::new(None));
        let slot = ProcessSlot {
            pid,
            started_at: Instant::now(),
            args: built.args.clone(),
            metrics: metrics.clone(),
        };
        self.slots.write().await.insert(channel_id, slot);

        if let Err(e) = self
            .channels
            .set_status_and_pid(channel_id, ChannelStatus::Running, Some(pid))
            .await
        {
            // the transition could not be recorded, do not leave an orphan
            self.slots.write().await.remove(&channel_id);
            let _ = child.start_kill();
            let _ = child.wait().await;
            return Err(e);
        }

        if let Some(stderr) = child.stderr.take() {
            self.clone().spawn_stderr_reader(channel_id, stderr, metrics);
        }
        if let Some(stdout) = child.stdout.take() {
            self.clone().spawn_stdout_reader(channel_id, stdout);
        }
        self.clone().spawn_waiter(channel_id, child);

        self.events
            .publish(ChannelEvent::Started { channel_id, pid });
        info!(channel = %channel_id, pid, "Encoder started");
        Ok(())
    }

    /// Stop the encoder for a channel, optionally purging its media files.
    pub async fn stop(&self, channel_id: Uuid, clean_files: bool) -> SupervisorResult<()> {
        let had_slot = self.terminate_slot(channel_id).await;

        if !had_slot {
            let channel = self.load(channel_id).await?;
            match channel.pid {
                Some(pid) => {
                    // stale pid from a previous supervisor generation
                    if pid_alive(pid) {
                        terminate_pid(
                            pid,
                            Duration::from_millis(self.settings.stop_grace_ms),
                            Duration::from_millis(self.settings.kill_wait_ms),
                        )
                        .await;
                    }
                }
                None => {
                    if channel.status == ChannelStatus::Stopped {
                        return Err(SupervisorError::conflict(format!(
                            "channel {channel_id} is not running"
                        )));
                    }
                }
            }
            self.events.publish(ChannelEvent::Stopped {
                channel_id,
                exit_code: None,
            });
        }

        self.channels
            .set_status_and_pid(channel_id, ChannelStatus::Stopped, None)
            .await?;
        self.clear_restart_attempts(channel_id);

        if clean_files {
            if let Err(e) = self.media.purge(channel_id).await {
                warn!(channel = %channel_id, "Failed to purge media directory: {e}");
            }
        }

        info!(channel = %channel_id, "Channel stopped");
        Ok(())
    }

    /// Restart a channel. Serialized per channel: a second restart while one
    /// is in flight returns a conflict.
    pub async fn restart(&self, channel_id: Uuid) -> SupervisorResult<()> {
        let _ = self.load(channel_id).await?;

        let Some(generation) = self.try_begin_restart(channel_id) else {
            return Err(SupervisorError::conflict(format!(
                "channel {channel_id} is already restarting"
            )));
        };
        self.spawn_restarting_watchdog(channel_id, generation);

        let result = self.restart_inner(channel_id).await;

        self.end_restart(channel_id, generation);

        match result {
            Ok(started) => {
                if started {
                    self.clear_restart_attempts(channel_id);
                    info!(channel = %channel_id, "Channel restarted");
                } else {
                    info!(channel = %channel_id, "Restart aborted, channel was stopped meanwhile");
                }
                Ok(())
            }
            Err(e) => {
                warn!(channel = %channel_id, "Restart failed: {e}");
                Err(e)
            }
        }
    }

    async fn restart_inner(&self, channel_id: Uuid) -> SupervisorResult<bool> {
        self.channels
            .set_status_and_pid(channel_id, ChannelStatus::Restarting, None)
            .await?;

        // stop the current process but keep the files until the re-check
        self.terminate_slot(channel_id).await;

        tokio::time::sleep(Duration::from_millis(self.settings.restart_pause_ms)).await;

        // a concurrent operator stop wins over the restart
        let Some(channel) = self.channels.get(channel_id).await? else {
            return Ok(false);
        };
        if channel.status == ChannelStatus::Stopped {
            return Ok(false);
        }

        if let Err(e) = self.media.purge(channel_id).await {
            warn!(channel = %channel_id, "Failed to purge media directory: {e}");
        }

        // final check immediately before spawning
        let Some(channel) = self.channels.get(channel_id).await? else {
            return Ok(false);
        };
        if channel.status == ChannelStatus::Stopped {
            return Ok(false);
        }

        self.start(channel_id).await?;
        Ok(true)
    }

    /// Drive a channel whose process is gone through the error path and, when
    /// permitted, schedule an automatic restart. Shared between the exit
    /// waiter and the health loop.
    pub async fn handle_unexpected_exit(&self, channel_id: Uuid, exit_code: Option<i32>) {
        let error = match exit_code {
            Some(code) => format!("encoder exited unexpectedly with code {code}"),
            None => "encoder process disappeared".to_string(),
        };
        warn!(channel = %channel_id, "{error}");

        if let Err(e) = self
            .channels
            .set_status_and_pid(channel_id, ChannelStatus::Error, None)
            .await
        {
            warn!(channel = %channel_id, "Failed to persist error status: {e}");
        }
        self.events.publish(ChannelEvent::Error {
            channel_id,
            error: error.clone(),
        });

        let channel = match self.channels.get(channel_id).await {
            Ok(Some(channel)) => channel,
            _ => return,
        };
        if !channel.auto_restart {
            return;
        }

        if !self.record_restart_attempt(channel_id) {
            let message = format!(
                "restart budget exhausted ({} attempts in {}s), waiting for operator",
                self.settings.max_restart_attempts, self.settings.restart_window_secs
            );
            warn!(channel = %channel_id, "{message}");
            self.events.publish(ChannelEvent::Error {
                channel_id,
                error: message,
            });
            return;
        }

        let supervisor = self.clone();
        tokio::spawn(async move {
            supervisor.auto_restart(channel_id).await;
        });
    }

    async fn auto_restart(&self, channel_id: Uuid) {
        tokio::time::sleep(Duration::from_millis(self.settings.auto_restart_delay_ms)).await;

        // re-read after the backoff: the operator may have intervened
        let channel = match self.channels.get(channel_id).await {
            Ok(Some(channel)) => channel,
            _ => return,
        };
        if matches!(
            channel.status,
            ChannelStatus::Stopped | ChannelStatus::Restarting
        ) {
            debug!(channel = %channel_id, status = %channel.status, "Auto-restart aborted");
            return;
        }

        let Some(generation) = self.try_begin_restart(channel_id) else {
            return;
        };
        self.spawn_restarting_watchdog(channel_id, generation);

        let result: SupervisorResult<bool> = async {
            self.channels
                .set_status_and_pid(channel_id, ChannelStatus::Restarting, None)
                .await?;

            if let Err(e) = self.media.purge(channel_id).await {
                warn!(channel = %channel_id, "Failed to purge media directory: {e}");
            }

            // final check immediately before spawning
            let Some(channel) = self.channels.get(channel_id).await? else {
                return Ok(false);
            };
            if channel.status == ChannelStatus::Stopped {
                return Ok(false);
            }

            self.start(channel_id).await?;
            Ok(true)
        }
        .await;

        self.end_restart(channel_id, generation);

        match result {
            Ok(true) => info!(channel = %channel_id, "Auto-restart succeeded"),
            Ok(false) => debug!(channel = %channel_id, "Auto-restart aborted before spawn"),
            Err(e) => warn!(channel = %channel_id, "Auto-restart failed: {e}"),
        }
    }

    /// Gracefully terminate all running encoders. Declared statuses are left
    /// untouched so operator intent survives a daemon restart; the next
    /// reconciliation pass drives them back.
    pub async fn shutdown(&self) {
        let ids: Vec<Uuid> = self.slots.read().await.keys().copied().collect();
        if !ids.is_empty() {
            info!("Stopping {} running encoders", ids.len());
        }
        for channel_id in ids {
            self.terminate_slot(channel_id).await;
            if let Err(e) = self.media.purge(channel_id).await {
                warn!(channel = %channel_id, "Failed to purge media directory: {e}");
            }
        }
    }

    /// Kill the process behind a slot, if any. Returns whether a slot
    /// existed. The stopping marker tells the exit waiter that this
    /// termination is deliberate.
    async fn terminate_slot(&self, channel_id: Uuid) -> bool {
        let pid = self.slots.read().await.get(&channel_id).map(|s| s.pid);
        let Some(pid) = pid else {
            return false;
        };

        self.stopping
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(channel_id);

        // the process may have exited between the slot read and the marker;
        // in that case the exit waiter owns the aftermath, not us
        if !self.slots.read().await.contains_key(&channel_id) {
            self.stopping
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&channel_id);
            return false;
        }

        terminate_pid(
            pid,
            Duration::from_millis(self.settings.stop_grace_ms),
            Duration::from_millis(self.settings.kill_wait_ms),
        )
        .await;

        // the waiter usually removes the slot; make sure it is gone
        self.slots.write().await.remove(&channel_id);
        self.parser.clear(channel_id);
        true
    }

    async fn fail_channel(&self, channel_id: Uuid, error: &str) {
        if let Err(e) = self
            .channels
            .set_status_and_pid(channel_id, ChannelStatus::Error, None)
            .await
        {
            warn!(channel = %channel_id, "Failed to persist error status: {e}");
        }
        self.events.publish(ChannelEvent::Error {
            channel_id,
            error: error.to_string(),
        });
    }

    async fn load(&self, channel_id: Uuid) -> SupervisorResult<Channel> {
        self.channels
            .get(channel_id)
            .await?
            .ok_or_else(|| SupervisorError::not_found(channel_id))
    }

    fn record_restart_attempt(&self, channel_id: Uuid) -> bool {
        let window = Duration::from_secs(self.settings.restart_window_secs);
        let now = Instant::now();
        let mut attempts = self
            .restart_attempts
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        let entry = attempts.entry(channel_id).or_default();
        entry.retain(|t| now.duration_since(*t) < window);
        if entry.len() >= self.settings.max_restart_attempts as usize {
            return false;
        }
        entry.push(now);
        true
    }

    fn clear_restart_attempts(&self, channel_id: Uuid) {
        self.restart_attempts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&channel_id);
    }

    fn spawn_restarting_watchdog(&self, channel_id: Uuid, generation: u64) {
        let supervisor = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(
                supervisor.settings.restarting_timeout_secs,
            ))
            .await;

            let stuck = {
                let mut restarting = supervisor
                    .restarting
                    .lock()
                    .unwrap_or_else(|e| e.into_inner());
                if restarting.get(&channel_id) == Some(&generation) {
                    restarting.remove(&channel_id);
                    true
                } else {
                    false
                }
            };
            if !stuck {
                return;
            }

            if let Ok(Some(channel)) = supervisor.channels.get(channel_id).await {
                if channel.status == ChannelStatus::Restarting {
                    warn!(channel = %channel_id, "Restart did not complete in time, demoting to error");
                    let _ = supervisor
                        .channels
                        .set_status_and_pid(channel_id, ChannelStatus::Error, None)
                        .await;
                    supervisor.events.publish(ChannelEvent::Error {
                        channel_id,
                        error: "restart timed out".to_string(),
                    });
                }
            }
        });
    }

    fn spawn_stderr_reader(
        self,
        channel_id: Uuid,
        mut stderr: ChildStderr,
        metrics: Arc<RwLock<Option<MetricRecord>>>,
    ) {
        tokio::spawn(async move {
            let mut buf = [0u8; 8192];
            loop {
                match stderr.read(&mut buf).await {
                    Ok(0) => break,
                    Ok(n) => {
                        let parsed = self.parser.push(channel_id, &buf[..n]);
                        if let Some(record) = parsed.records.into_iter().last() {
                            trace!(
                                channel = %channel_id,
                                frame = record.frame,
                                fps = record.fps,
                                "Progress"
                            );
                            *metrics.write().await = Some(record);
                        }
                        for line in parsed.lines {
                            match classify_stderr_line(&line) {
                                Some(level) => {
                                    self.events.publish(ChannelEvent::Log {
                                        channel_id,
                                        level,
                                        message: line,
                                        timestamp: Utc::now(),
                                    });
                                }
                                None => debug!(channel = %channel_id, "encoder: {line}"),
                            }
                        }
                    }
                    Err(e) => {
                        debug!(channel = %channel_id, "stderr read ended: {e}");
                        break;
                    }
                }
            }
        });
    }

    fn spawn_stdout_reader(self, channel_id: Uuid, stdout: ChildStdout) {
        tokio::spawn(async move {
            let reader = BufReader::new(stdout);
            let mut lines = reader.lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if line.trim().is_empty() {
                    continue;
                }
                self.events.publish(ChannelEvent::Log {
                    channel_id,
                    level: LogLevel::Info,
                    message: line,
                    timestamp: Utc::now(),
                });
            }
        });
    }

    fn spawn_waiter(self, channel_id: Uuid, mut child: Child) {
        tokio::spawn(async move {
            let status = child.wait().await;
            let exit_code = status.ok().and_then(|s| s.code());

            self.slots.write().await.remove(&channel_id);
            self.parser.clear(channel_id);

            let was_deliberate = self
                .stopping
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&channel_id);

            self.events.publish(ChannelEvent::Stopped {
                channel_id,
                exit_code,
            });

            if was_deliberate {
                debug!(channel = %channel_id, "Encoder terminated on request");
                return;
            }

            match exit_code {
                Some(0) => {
                    info!(channel = %channel_id, "Encoder finished normally");
                    if let Err(e) = self
                        .channels
                        .set_status_and_pid(channel_id, ChannelStatus::Stopped, None)
                        .await
                    {
                        warn!(channel = %channel_id, "Failed to persist stop: {e}");
                    }
                }
                code => self.handle_unexpected_exit(channel_id, code).await,
            }
        });
    }
}

fn validate_channel(channel: &Channel) -> SupervisorResult<()> {
    if channel.name.trim().is_empty() {
        return Err(SupervisorError::validation("channel name must not be empty"));
    }
    if channel.outputs.is_empty() {
        return Err(SupervisorError::validation(
            "channel must have at least one output",
        ));
    }
    let dvb_input = matches!(channel.outputs.first(), Some(Output::Dvb {}))
        && channel.encoder_params.dvb_device.is_some();
    if channel.input_url.trim().is_empty() && !dvb_input {
        return Err(SupervisorError::validation(
            "channel input url must not be empty",
        ));
    }
    Ok(())
}

/// Classify a non-progress stderr line for the log pipeline. Lines that
/// match no class stay out of the persisted logs.
fn classify_stderr_line(line: &str) -> Option<LogLevel> {
    let lower = line.to_lowercase();
    if lower.contains("error")
        || lower.contains("failed")
        || lower.contains("invalid")
        || lower.contains("could not")
        || lower.contains("unable to")
        || lower.contains("not found")
    {
        Some(LogLevel::Error)
    } else if lower.contains("warning") || lower.contains("deprecated") {
        Some(LogLevel::Warning)
    } else if lower.contains("opening")
        || lower.contains("input #")
        || lower.contains("output #")
        || lower.contains("stream mapping")
        || lower.contains("encoder")
        || lower.contains("decoder")
    {
        Some(LogLevel::Info)
    } else {
        None
    }
}

pub fn pid_alive(pid: u32) -> bool {
    match kill(NixPid::from_raw(pid as i32), None) {
        Ok(()) => true,
        Err(nix::errno::Errno::EPERM) => true,
        Err(_) => false,
    }
}

/// Two phase termination: SIGTERM with a grace period, then SIGKILL.
async fn terminate_pid(pid: u32, grace: Duration, kill_wait: Duration) {
    let _ = kill(NixPid::from_raw(pid as i32), Signal::SIGTERM);
    if wait_for_death(pid, grace).await {
        return;
    }
    warn!(pid, "Process ignored SIGTERM, escalating to SIGKILL");
    let _ = kill(NixPid::from_raw(pid as i32), Signal::SIGKILL);
    wait_for_death(pid, kill_wait).await;
}

async fn wait_for_death(pid: u32, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if !pid_alive(pid) {
            return true;
        }
        tokio::time::sleep(DEATH_POLL_INTERVAL).await;
    }
    !pid_alive(pid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EncoderParams;

    fn test_channel(outputs: Vec<Output>) -> Channel {
        Channel {
            id: Uuid::new_v4(),
            name: "news".to_string(),
            input_url: "http://src/stream".to_string(),
            status: ChannelStatus::Stopped,
            encoder_params: EncoderParams::default(),
            outputs,
            auto_restart: false,
            pid: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_validate_channel() {
        let output = Output::Hls {};
        assert!(validate_channel(&test_channel(vec![output.clone()])).is_ok());

        let mut channel = test_channel(vec![output.clone()]);
        channel.name = "  ".to_string();
        assert!(validate_channel(&channel).is_err());

        let mut channel = test_channel(vec![output.clone()]);
        channel.input_url = String::new();
        assert!(validate_channel(&channel).is_err());

        let channel = test_channel(vec![]);
        assert!(validate_channel(&channel).is_err());

        // DVB channels take their input from the tuner device
        let mut channel = test_channel(vec![Output::Dvb {}]);
        channel.input_url = String::new();
        channel.encoder_params.dvb_device = Some("/dev/dvb/adapter0/frontend0".to_string());
        assert!(validate_channel(&channel).is_ok());
    }

    #[test]
    fn test_classify_stderr_lines() {
        assert_eq!(
            classify_stderr_line("Error opening input files: Connection refused"),
            Some(LogLevel::Error)
        );
        assert_eq!(
            classify_stderr_line("Warning: deprecated pixel format used"),
            Some(LogLevel::Warning)
        );
        assert_eq!(
            classify_stderr_line("Input #0, hls, from 'https://ex/live.m3u8':"),
            Some(LogLevel::Info)
        );
        assert_eq!(classify_stderr_line("random chatter"), None);
    }

    #[test]
    fn test_pid_alive_detects_dead_pid() {
        // pid_max on Linux is far below this
        assert!(!pid_alive(4_000_000));
        assert!(pid_alive(std::process::id()));
    }
}
