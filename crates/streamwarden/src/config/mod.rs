//! Application configuration.
//!
//! Configuration is layered: a TOML file, then `STREAMWARDEN_`-prefixed
//! environment variables, then a handful of well-known plain environment
//! variables recognized for compatibility with existing deployments
//! (`FFMPEG_PATH`, `MEDIA_BASE_PATH`, ...), then CLI overrides applied by
//! `main`.

use std::path::{Path, PathBuf};

use anyhow::Result;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub mod defaults;

use defaults::*;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub encoder: EncoderConfig,
    pub media: MediaConfig,
    pub supervisor: SupervisorConfig,
    pub health: HealthConfig,
    pub logs: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    /// FFmpeg binary invoked per channel.
    pub program: String,
    /// FFprobe binary used for input analysis.
    pub probe_program: String,
    /// Globally disables hardware codec substitution when false.
    pub hwaccel_enabled: bool,
    /// Substitute a hardware codec even for `copy`/unspecified requests.
    pub hwaccel_auto: bool,
    /// Forces a specific NVENC preset regardless of channel configuration.
    pub nvenc_preset_override: Option<String>,
    /// Fallback VAAPI render node when none can be resolved per channel.
    pub vaapi_default_device: Option<PathBuf>,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            program: default_ffmpeg_program(),
            probe_program: default_ffprobe_program(),
            hwaccel_enabled: default_hwaccel_enabled(),
            hwaccel_auto: false,
            nvenc_preset_override: None,
            vaapi_default_device: default_vaapi_device(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    /// Root under which every channel owns `<root>/<channel_id>`.
    pub base_path: PathBuf,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            base_path: default_media_root(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Auto-restart attempts tolerated inside the rolling window.
    pub max_restart_attempts: u32,
    /// Rolling window for restart accounting, in seconds.
    pub restart_window_secs: u64,
    /// Delay before an automatic restart after an unexpected exit.
    pub auto_restart_delay_ms: u64,
    /// Pause between stop and start inside an operator restart.
    pub restart_pause_ms: u64,
    /// A channel stuck in restarting longer than this is demoted to error.
    pub restarting_timeout_secs: u64,
    /// Grace period after SIGTERM before escalating to SIGKILL.
    pub stop_grace_ms: u64,
    /// Wait after SIGKILL before giving up on the process.
    pub kill_wait_ms: u64,
    /// Event bus buffer size; slow subscribers drop, publishers never block.
    pub event_bus_capacity: usize,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            max_restart_attempts: default_max_restart_attempts(),
            restart_window_secs: default_restart_window_secs(),
            auto_restart_delay_ms: default_auto_restart_delay_ms(),
            restart_pause_ms: default_restart_pause_ms(),
            restarting_timeout_secs: default_restarting_timeout_secs(),
            stop_grace_ms: default_stop_grace_ms(),
            kill_wait_ms: default_kill_wait_ms(),
            event_bus_capacity: default_event_bus_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Reconciliation period in milliseconds.
    pub check_interval_ms: u64,
    /// Subscriber push cadence in milliseconds.
    pub fanout_interval_ms: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            check_interval_ms: default_health_interval_ms(),
            fanout_interval_ms: default_fanout_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Per-channel retention cap; oldest rows are pruned past this.
    pub max_entries_per_channel: u32,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            max_entries_per_channel: default_max_log_entries(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file merged with prefixed environment
    /// variables. A missing file yields the defaults.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut config: Config = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("STREAMWARDEN_").split("__"))
            .extract()?;
        config.apply_well_known_env();
        Ok(config)
    }

    /// Apply the plain environment variables recognized for compatibility.
    pub fn apply_well_known_env(&mut self) {
        if let Ok(path) = std::env::var("FFMPEG_PATH") {
            if !path.is_empty() {
                self.encoder.program = path;
            }
        }
        if let Ok(value) = std::env::var("FFMPEG_HWACCEL_ENABLED") {
            if value.eq_ignore_ascii_case("false") {
                self.encoder.hwaccel_enabled = false;
            }
        }
        if let Ok(value) = std::env::var("FFMPEG_HWACCEL_AUTO") {
            if value.eq_ignore_ascii_case("true") {
                self.encoder.hwaccel_auto = true;
            }
        }
        if let Ok(preset) = std::env::var("NVENC_PRESET") {
            if !preset.is_empty() {
                self.encoder.nvenc_preset_override = Some(preset);
            }
        }
        if let Ok(path) = std::env::var("MEDIA_BASE_PATH") {
            if !path.is_empty() {
                self.media.base_path = PathBuf::from(path);
            }
        }
        if let Ok(interval) = std::env::var("HEALTH_CHECK_INTERVAL") {
            if let Ok(ms) = interval.parse::<u64>() {
                self.health.check_interval_ms = ms;
            }
        }
        if let Ok(cap) = std::env::var("MAX_LOG_ENTRIES_PER_CHANNEL") {
            if let Ok(n) = cap.parse::<u32>() {
                self.logs.max_entries_per_channel = n;
            }
        }
    }
}
