//! Channel models
//!
//! A channel is a persistently configured, long-running stream job: one input,
//! an encoder parameter bag, and one or more output destinations. The
//! supervisor keeps the declared `status` reconciled against the OS process
//! it spawns for the channel.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Declared target state of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelStatus {
    Stopped,
    Running,
    Error,
    Restarting,
}

impl fmt::Display for ChannelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChannelStatus::Stopped => "stopped",
            ChannelStatus::Running => "running",
            ChannelStatus::Error => "error",
            ChannelStatus::Restarting => "restarting",
        };
        write!(f, "{s}")
    }
}

impl FromStr for ChannelStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stopped" => Ok(ChannelStatus::Stopped),
            "running" => Ok(ChannelStatus::Running),
            "error" => Ok(ChannelStatus::Error),
            "restarting" => Ok(ChannelStatus::Restarting),
            other => Err(format!("unknown channel status: {other}")),
        }
    }
}

/// A configured stream job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Channel {
    pub id: Uuid,
    pub name: String,
    pub input_url: String,
    pub status: ChannelStatus,
    pub encoder_params: EncoderParams,
    pub outputs: Vec<Output>,
    pub auto_restart: bool,
    pub pid: Option<u32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One output destination of a channel, tagged by kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Output {
    Udp {
        host: String,
        port: u16,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pkt_size: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        buffer_size: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        hls_program_index: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        map_video: Option<bool>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        map_audio: Option<bool>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        realtime: Option<bool>,
    },
    Hls {},
    Dvb {},
    File {},
}

impl Output {
    pub fn kind(&self) -> &'static str {
        match self {
            Output::Udp { .. } => "udp",
            Output::Hls {} => "hls",
            Output::Dvb {} => "dvb",
            Output::File {} => "file",
        }
    }
}

/// Flexible option bag accepted for `input_options` / `output_options`:
/// a key→value map, a flat argument list, or a whitespace separated string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OptionBag {
    Map(BTreeMap<String, serde_json::Value>),
    List(Vec<String>),
    Text(String),
}

impl OptionBag {
    /// Expand into argv fragments. The map form expands to `-key value`
    /// pairs; list and string forms are passed through as given.
    pub fn expand_into(&self, args: &mut Vec<String>) {
        match self {
            OptionBag::Map(map) => {
                for (key, value) in map {
                    args.push(format!("-{key}"));
                    match value {
                        serde_json::Value::String(s) => args.push(s.clone()),
                        // null means a bare flag with no value
                        serde_json::Value::Null => {}
                        other => args.push(other.to_string()),
                    }
                }
            }
            OptionBag::List(items) => args.extend(items.iter().cloned()),
            OptionBag::Text(text) => {
                args.extend(text.split_whitespace().map(|s| s.to_string()))
            }
        }
    }
}

/// Recognized encoder parameters applied during command synthesis.
///
/// Every field is optional; unrecognized keys end up in `unknown` and are
/// reported once at build time instead of failing deserialization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderParams {
    pub fflags: Option<String>,
    pub input_options: Option<OptionBag>,
    pub video_codec: Option<String>,
    pub audio_codec: Option<String>,
    pub video_bitrate: Option<String>,
    pub audio_bitrate: Option<String>,
    pub resolution: Option<String>,
    pub framerate: Option<String>,
    pub video_filters: Option<String>,
    pub audio_filters: Option<String>,
    pub preset: Option<String>,
    pub tune: Option<String>,
    pub profile: Option<String>,
    pub level: Option<String>,
    pub g: Option<String>,
    pub keyint_min: Option<String>,
    pub sc_threshold: Option<String>,
    pub vsync: Option<String>,
    pub r#async: Option<String>,
    pub crf: Option<String>,
    pub qp: Option<String>,
    pub maxrate: Option<String>,
    pub minrate: Option<String>,
    pub bufsize: Option<String>,
    pub output_options: Option<OptionBag>,
    pub gpu_index: Option<u32>,
    pub video_stream_index: Option<u32>,
    pub audio_stream_index: Option<u32>,
    pub hls_time: Option<u32>,
    pub hls_list_size: Option<u32>,
    pub hls_flags: Option<String>,
    pub dvb_device: Option<String>,
    pub dvb_frequency: Option<u64>,
    pub dvb_modulation: Option<String>,
    pub muxrate: Option<String>,
    /// Legacy free-form options, kept for older channel records.
    pub extra_options: Option<OptionBag>,
    /// Keys this version does not recognize. Ignored, with a warning.
    #[serde(flatten)]
    pub unknown: BTreeMap<String, serde_json::Value>,
}

impl EncoderParams {
    /// True when nothing that would influence codec selection is set, which
    /// makes the built command default to stream copy.
    pub fn is_passthrough(&self) -> bool {
        self.video_codec.is_none() && self.audio_codec.is_none()
    }
}

/// Severity of a persisted channel log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warning,
    Info,
    Debug,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogLevel::Error => "error",
            LogLevel::Warning => "warning",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
        };
        write!(f, "{s}")
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "error" => Ok(LogLevel::Error),
            "warning" => Ok(LogLevel::Warning),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            other => Err(format!("unknown log level: {other}")),
        }
    }
}

/// Append-only per-channel log record with bounded retention.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelLog {
    pub id: i64,
    pub channel_id: Uuid,
    pub level: LogLevel,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

/// Audio stream descriptor returned by input analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioTrackInfo {
    pub index: u32,
    pub codec_name: String,
    pub channels: Option<u32>,
    pub channel_layout: Option<String>,
    pub sample_rate: Option<u32>,
    pub bit_rate: Option<u64>,
    pub language: Option<String>,
    pub title: Option<String>,
}
