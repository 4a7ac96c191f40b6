//! FFmpeg command synthesis.
//!
//! Builds the argument vector for a channel's encoder process. FFmpeg's CLI
//! is ordering sensitive, so assembly is staged strictly as: pre-input
//! options, input specifier, stream maps, codec selections, encoder tuning,
//! output format options, destination.

use std::path::PathBuf;

use tracing::{debug, warn};

use crate::config::EncoderConfig;
use crate::errors::{SupervisorError, SupervisorResult};
use crate::models::{Channel, EncoderParams, HwAccelCapabilities, HwAccelKind, Output};
use crate::services::hwaccel::{self, HwAccelProbe};

/// Fallback multiplex rate for UDP transport streams, ~10 Mbit/s.
const DEFAULT_UDP_MUXRATE: u64 = 10_080_000;

/// Overhead applied when deriving muxrate from the declared video bitrate:
/// audio allowance plus 30% headroom.
const MUXRATE_AUDIO_ALLOWANCE: u64 = 128_000;
const MUXRATE_HEADROOM: f64 = 1.3;

#[derive(Debug, Clone, PartialEq)]
pub struct BuiltCommand {
    pub program: String,
    pub args: Vec<String>,
}

/// Synthesizes encoder command lines from channel configuration.
#[derive(Clone)]
pub struct CommandBuilder {
    encoder: EncoderConfig,
    media_root: PathBuf,
}

struct HwSelection {
    kind: HwAccelKind,
    vaapi_device: Option<PathBuf>,
}

impl CommandBuilder {
    pub fn new(encoder: EncoderConfig, media_root: PathBuf) -> Self {
        Self {
            encoder,
            media_root,
        }
    }

    pub fn media_root(&self) -> &PathBuf {
        &self.media_root
    }

    /// Build the (program, argv) pair for one output of a channel.
    pub fn build(
        &self,
        channel: &Channel,
        output: &Output,
        probe: &HwAccelProbe,
        capabilities: &HwAccelCapabilities,
    ) -> SupervisorResult<BuiltCommand> {
        let params = &channel.encoder_params;

        if !params.unknown.is_empty() {
            warn!(
                channel = %channel.id,
                keys = ?params.unknown.keys().collect::<Vec<_>>(),
                "Ignoring unrecognized encoder parameters"
            );
        }

        // Effective video codec after hardware substitution. The HLS software
        // default is applied afterwards so an unconfigured channel never gets
        // silently upgraded to hardware.
        let substituted = hwaccel::preferred_video_codec(
            capabilities,
            params.video_codec.as_deref(),
            &self.encoder,
        );
        let video_codec = match (&substituted, output) {
            (None, Output::Hls {}) => Some("libx264".to_string()),
            _ => substituted.clone(),
        };

        let hw = match video_codec.as_deref().and_then(hwaccel::hw_kind_of) {
            Some(HwAccelKind::Vaapi) => Some(HwSelection {
                kind: HwAccelKind::Vaapi,
                vaapi_device: Some(
                    probe.resolve_vaapi_device(capabilities, params.gpu_index)?,
                ),
            }),
            Some(kind) => Some(HwSelection {
                kind,
                vaapi_device: None,
            }),
            None => None,
        };

        let mut args = Vec::new();
        self.add_pre_input_args(&mut args, channel, output, params, hw.as_ref());
        self.add_input_args(&mut args, channel, output, params)?;
        self.add_stream_maps(&mut args, output, params);
        self.add_codec_args(&mut args, output, params, video_codec.as_deref(), hw.as_ref());
        self.add_tuning_args(&mut args, output, params, hw.as_ref());
        self.add_output_args(&mut args, channel, output, params)?;

        debug!(
            channel = %channel.id,
            output = output.kind(),
            "Built encoder command with {} arguments",
            args.len()
        );

        Ok(BuiltCommand {
            program: self.encoder.program.clone(),
            args,
        })
    }

    fn add_pre_input_args(
        &self,
        args: &mut Vec<String>,
        channel: &Channel,
        output: &Output,
        params: &EncoderParams,
        hw: Option<&HwSelection>,
    ) {
        let fflags = params.fflags.clone().unwrap_or_else(|| "+genpts".to_string());
        args.push("-fflags".to_string());
        args.push(fflags);

        // Realtime pacing makes no sense for live sources, which already
        // deliver at realtime, and can be disabled per output.
        if let Output::Udp { realtime, .. } = output {
            if !is_live_input(&channel.input_url) && realtime.unwrap_or(true) {
                args.push("-re".to_string());
            }
        }

        if let Some(hw) = hw {
            match hw.kind {
                HwAccelKind::Nvenc => {
                    args.push("-hwaccel".to_string());
                    args.push("cuda".to_string());
                }
                HwAccelKind::Qsv => {
                    args.push("-hwaccel".to_string());
                    args.push("qsv".to_string());
                }
                HwAccelKind::Vaapi => {
                    args.push("-hwaccel".to_string());
                    args.push("vaapi".to_string());
                    if let Some(device) = &hw.vaapi_device {
                        args.push("-vaapi_device".to_string());
                        args.push(device.display().to_string());
                    }
                }
                HwAccelKind::Videotoolbox => {
                    args.push("-hwaccel".to_string());
                    args.push("videotoolbox".to_string());
                }
                HwAccelKind::Amf => {}
            }
        }

        if let Some(options) = &params.input_options {
            options.expand_into(args);
        }
    }

    fn add_input_args(
        &self,
        args: &mut Vec<String>,
        channel: &Channel,
        output: &Output,
        params: &EncoderParams,
    ) -> SupervisorResult<()> {
        if matches!(output, Output::Dvb {}) {
            let device = params.dvb_device.as_deref().ok_or_else(|| {
                SupervisorError::validation("dvb output requires the dvb_device parameter")
            })?;
            if let Some(frequency) = params.dvb_frequency {
                args.push("-frequency".to_string());
                args.push(frequency.to_string());
            }
            if let Some(modulation) = &params.dvb_modulation {
                args.push("-modulation".to_string());
                args.push(modulation.clone());
            }
            args.push("-f".to_string());
            args.push("dvb".to_string());
            args.push("-i".to_string());
            args.push(device.to_string());
        } else {
            args.push("-i".to_string());
            args.push(channel.input_url.clone());
        }
        Ok(())
    }

    fn add_stream_maps(&self, args: &mut Vec<String>, output: &Output, params: &EncoderParams) {
        let (map_video, map_audio, program_index) = match output {
            Output::Udp {
                map_video,
                map_audio,
                hls_program_index,
                ..
            } => (
                map_video.unwrap_or(true),
                map_audio.unwrap_or(true),
                *hls_program_index,
            ),
            _ => (true, true, None),
        };

        if params.video_stream_index.is_some() || params.audio_stream_index.is_some() {
            if let Some(index) = params.video_stream_index {
                args.push("-map".to_string());
                args.push(format!("0:{index}"));
            }
            if let Some(index) = params.audio_stream_index {
                args.push("-map".to_string());
                args.push(format!("0:{index}"));
            }
        } else if let Some(program) = program_index {
            if map_video {
                args.push("-map".to_string());
                args.push(format!("0:p:{program}:v"));
            }
            if map_audio {
                args.push("-map".to_string());
                args.push(format!("0:p:{program}:a"));
            }
        } else {
            if map_video {
                args.push("-map".to_string());
                args.push("0:v:0".to_string());
            }
            if map_audio {
                args.push("-map".to_string());
                args.push("0:a:0".to_string());
            }
        }
    }

    fn add_codec_args(
        &self,
        args: &mut Vec<String>,
        output: &Output,
        params: &EncoderParams,
        video_codec: Option<&str>,
        hw: Option<&HwSelection>,
    ) {
        let audio_codec = params.audio_codec.clone().or(match output {
            Output::Hls {} => Some("aac".to_string()),
            _ => None,
        });

        if video_codec.is_none() && audio_codec.is_none() {
            args.push("-c".to_string());
            args.push("copy".to_string());
            return;
        }

        if let Some(codec) = video_codec {
            args.push("-c:v".to_string());
            args.push(codec.to_string());

            if let Some(hw) = hw {
                match hw.kind {
                    HwAccelKind::Nvenc => {
                        if let Some(index) = params.gpu_index {
                            args.push("-gpu".to_string());
                            args.push(index.to_string());
                        }
                    }
                    HwAccelKind::Vaapi => {
                        // frames must be uploaded to the device before a
                        // VAAPI encoder can consume them
                        let mut filter = "format=nv12,hwupload".to_string();
                        if let Some(extra) = &params.video_filters {
                            filter.push(',');
                            filter.push_str(extra);
                        }
                        args.push("-vf".to_string());
                        args.push(filter);
                    }
                    _ => {}
                }
            }

            if codec != "copy" {
                if let Some(bitrate) = &params.video_bitrate {
                    args.push("-b:v".to_string());
                    args.push(bitrate.clone());
                }
                if let Some(resolution) = &params.resolution {
                    args.push("-s".to_string());
                    args.push(resolution.clone());
                }
                if let Some(framerate) = &params.framerate {
                    args.push("-r".to_string());
                    args.push(framerate.clone());
                }
                if !matches!(hw, Some(h) if h.kind == HwAccelKind::Vaapi) {
                    if let Some(filters) = &params.video_filters {
                        args.push("-vf".to_string());
                        args.push(filters.clone());
                    }
                }
            }
        }

        if let Some(codec) = audio_codec {
            args.push("-c:a".to_string());
            args.push(codec.clone());
            if codec != "copy" {
                if let Some(bitrate) = &params.audio_bitrate {
                    args.push("-b:a".to_string());
                    args.push(bitrate.clone());
                }
                if let Some(filters) = &params.audio_filters {
                    args.push("-af".to_string());
                    args.push(filters.clone());
                }
            }
        }
    }

    fn add_tuning_args(
        &self,
        args: &mut Vec<String>,
        output: &Output,
        params: &EncoderParams,
        hw: Option<&HwSelection>,
    ) {
        let nvenc = matches!(hw, Some(h) if h.kind == HwAccelKind::Nvenc);

        let preset = if nvenc {
            self.encoder
                .nvenc_preset_override
                .clone()
                .or_else(|| params.preset.as_deref().map(remap_nvenc_preset))
        } else {
            params.preset.clone()
        };
        if let Some(preset) = preset {
            args.push("-preset".to_string());
            args.push(preset);
        }

        let pairs: [(&str, &Option<String>); 12] = [
            ("-tune", &params.tune),
            ("-profile:v", &params.profile),
            ("-level", &params.level),
            ("-g", &params.g),
            ("-keyint_min", &params.keyint_min),
            ("-sc_threshold", &params.sc_threshold),
            ("-vsync", &params.vsync),
            ("-async", &params.r#async),
            ("-crf", &params.crf),
            ("-qp", &params.qp),
            ("-maxrate", &params.maxrate),
            ("-minrate", &params.minrate),
        ];
        for (flag, value) in pairs {
            if let Some(value) = value {
                args.push(flag.to_string());
                args.push(value.clone());
            }
        }

        // UDP emits its own buffer size with the transport constants
        if !matches!(output, Output::Udp { .. }) {
            if let Some(bufsize) = &params.bufsize {
                args.push("-bufsize".to_string());
                args.push(bufsize.clone());
            }
        }
    }

    fn add_output_args(
        &self,
        args: &mut Vec<String>,
        channel: &Channel,
        output: &Output,
        params: &EncoderParams,
    ) -> SupervisorResult<()> {
        match output {
            Output::Udp {
                host,
                port,
                pkt_size,
                buffer_size,
                ..
            } => {
                args.push("-f".to_string());
                args.push("mpegts".to_string());

                let muxrate = params
                    .muxrate
                    .clone()
                    .unwrap_or_else(|| compute_udp_muxrate(params).to_string());
                args.push("-muxrate".to_string());
                args.push(muxrate);

                args.extend(
                    [
                        "-pcr_period",
                        "20",
                        "-pat_period",
                        "0.1",
                        "-streamid",
                        "0:0x100",
                        "-streamid",
                        "1:0x101",
                        "-mpegts_flags",
                        "resend_headers",
                        "-flush_packets",
                        "1",
                    ]
                    .iter()
                    .map(|s| s.to_string()),
                );
                args.push("-bufsize".to_string());
                args.push(
                    params
                        .bufsize
                        .clone()
                        .unwrap_or_else(|| "65536".to_string()),
                );

                self.expand_trailing_options(args, params);

                let mut query = Vec::new();
                if let Some(pkt_size) = pkt_size {
                    query.push(format!("pkt_size={pkt_size}"));
                }
                if let Some(buffer_size) = buffer_size {
                    query.push(format!("buffer_size={buffer_size}"));
                }
                let mut destination = format!("udp://{host}:{port}");
                if !query.is_empty() {
                    destination.push('?');
                    destination.push_str(&query.join("&"));
                }
                args.push(destination);
            }
            Output::Hls {} => {
                args.push("-f".to_string());
                args.push("hls".to_string());
                args.push("-hls_time".to_string());
                args.push(params.hls_time.unwrap_or(2).to_string());
                args.push("-hls_list_size".to_string());
                args.push(params.hls_list_size.unwrap_or(5).to_string());
                args.push("-hls_flags".to_string());
                args.push(
                    params
                        .hls_flags
                        .clone()
                        .unwrap_or_else(|| "delete_segments".to_string()),
                );

                self.expand_trailing_options(args, params);

                let playlist = self
                    .media_root
                    .join(channel.id.to_string())
                    .join("index.m3u8");
                args.push(playlist.display().to_string());
            }
            Output::Dvb {} | Output::File {} => {
                args.push("-f".to_string());
                args.push("mpegts".to_string());
                // muxrate only when explicitly configured for these kinds
                if let Some(muxrate) = &params.muxrate {
                    args.push("-muxrate".to_string());
                    args.push(muxrate.clone());
                }

                self.expand_trailing_options(args, params);

                let destination = self
                    .media_root
                    .join(channel.id.to_string())
                    .join("record.ts");
                args.push(destination.display().to_string());
            }
        }
        Ok(())
    }

    fn expand_trailing_options(&self, args: &mut Vec<String>, params: &EncoderParams) {
        if let Some(options) = &params.output_options {
            options.expand_into(args);
        }
        if let Some(options) = &params.extra_options {
            options.expand_into(args);
        }
    }
}

/// True for inputs that already deliver at realtime pace.
fn is_live_input(input_url: &str) -> bool {
    input_url.starts_with("http://")
        || input_url.starts_with("https://")
        || input_url.ends_with(".m3u8")
}

/// Map libx264-style presets onto the NVENC p1..p7 scale.
fn remap_nvenc_preset(preset: &str) -> String {
    match preset {
        "ultrafast" | "superfast" => "p1".to_string(),
        "veryfast" => "p2".to_string(),
        "faster" => "p3".to_string(),
        "fast" | "medium" => "p4".to_string(),
        "slow" => "p5".to_string(),
        "slower" => "p6".to_string(),
        "veryslow" => "p7".to_string(),
        // p1..p7 and anything NVENC understands natively pass through
        other => other.to_string(),
    }
}

/// Muxrate for UDP transport streams: explicit override handled by the
/// caller, otherwise derived from the declared video bitrate with audio
/// allowance and headroom, otherwise a fixed default.
fn compute_udp_muxrate(params: &EncoderParams) -> u64 {
    match params.video_bitrate.as_deref().and_then(parse_bitrate_bps) {
        Some(video_bps) => {
            (((video_bps + MUXRATE_AUDIO_ALLOWANCE) as f64) * MUXRATE_HEADROOM).ceil() as u64
        }
        None => DEFAULT_UDP_MUXRATE,
    }
}

/// Parse bitrate notations ("2000k", "2.5M", "800000") into bits per second.
pub(crate) fn parse_bitrate_bps(value: &str) -> Option<u64> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    let (number, multiplier) = match value.chars().last() {
        Some('k') | Some('K') => (&value[..value.len() - 1], 1_000.0),
        Some('m') | Some('M') => (&value[..value.len() - 1], 1_000_000.0),
        _ => (value, 1.0),
    };
    let parsed: f64 = number.parse().ok()?;
    if parsed < 0.0 {
        return None;
    }
    Some((parsed * multiplier).round() as u64)
}
