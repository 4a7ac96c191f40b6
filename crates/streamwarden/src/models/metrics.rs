//! Runtime metric models: parsed encoder progress and OS process statistics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::Channel;

/// Where a snapshot's bitrate figure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BitrateSource {
    Parsed,
    CalculatedFromNetwork,
    Configured,
}

/// One parsed encoder progress snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    pub frame: u64,
    pub fps: f64,
    pub quality: f64,
    /// Accumulated output size in bytes.
    pub size_bytes: u64,
    /// Output timestamp offset in seconds.
    pub time_seconds: f64,
    /// Instantaneous bitrate in kbit/s, when the encoder reported or it
    /// could be derived from size and time.
    pub bitrate_kbps: Option<f64>,
    /// Mux speed relative to realtime (1.0 = realtime).
    pub speed: Option<f64>,
    /// Per-stream accumulated sizes when present in the progress line.
    pub video_bytes: Option<u64>,
    pub audio_bytes: Option<u64>,
    pub source: BitrateSource,
    pub captured_at: DateTime<Utc>,
}

/// OS-level statistics for a supervised process. All fields fall back to
/// zero when the underlying probe fails.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessStats {
    pub pid: u32,
    pub elapsed_seconds: u64,
    pub cpu_percent: f32,
    pub memory_percent: f32,
    pub command: String,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
    pub connections: u32,
}

/// Combined view pushed to subscribers: the persisted record, live process
/// information and the most recent parsed metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelSnapshot {
    pub channel: Channel,
    pub process: Option<ProcessStats>,
    pub metrics: Option<MetricRecord>,
    pub captured_at: DateTime<Utc>,
}
