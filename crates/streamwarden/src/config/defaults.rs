//! Serde default helpers for the configuration structs.

use std::path::PathBuf;

pub fn default_database_url() -> String {
    "sqlite://streamwarden.db".to_string()
}

pub fn default_max_connections() -> u32 {
    5
}

pub fn default_ffmpeg_program() -> String {
    "ffmpeg".to_string()
}

pub fn default_ffprobe_program() -> String {
    "ffprobe".to_string()
}

pub fn default_hwaccel_enabled() -> bool {
    true
}

pub fn default_vaapi_device() -> Option<PathBuf> {
    Some(PathBuf::from("/dev/dri/renderD128"))
}

pub fn default_media_root() -> PathBuf {
    PathBuf::from("/var/lib/streamwarden/media")
}

pub fn default_max_restart_attempts() -> u32 {
    25
}

pub fn default_restart_window_secs() -> u64 {
    120
}

pub fn default_auto_restart_delay_ms() -> u64 {
    5_000
}

pub fn default_restart_pause_ms() -> u64 {
    500
}

pub fn default_restarting_timeout_secs() -> u64 {
    10
}

pub fn default_stop_grace_ms() -> u64 {
    500
}

pub fn default_kill_wait_ms() -> u64 {
    200
}

pub fn default_health_interval_ms() -> u64 {
    30_000
}

pub fn default_fanout_interval_ms() -> u64 {
    2_000
}

pub fn default_max_log_entries() -> u32 {
    1_000
}

pub fn default_event_bus_capacity() -> usize {
    1_024
}
