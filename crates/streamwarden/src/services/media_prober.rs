//! Input analysis via the encoder's probe utility.

use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, warn};

use crate::errors::{SupervisorError, SupervisorResult};
use crate::models::AudioTrackInfo;

const ANALYZE_TIMEOUT: Duration = Duration::from_secs(30);

/// Runs ffprobe against channel inputs.
#[derive(Clone)]
pub struct MediaProber {
    program: String,
}

impl MediaProber {
    pub fn new(program: String) -> Self {
        Self { program }
    }

    /// Probe availability and version, for the startup report.
    pub async fn availability(&self) -> (bool, Option<String>) {
        let mut cmd = Command::new(&self.program);
        cmd.arg("-version");
        cmd.stdin(Stdio::null());

        match tokio::time::timeout(Duration::from_secs(5), cmd.output()).await {
            Ok(Ok(output)) if output.status.success() => {
                let text = String::from_utf8_lossy(&output.stdout);
                let version = text
                    .lines()
                    .next()
                    .and_then(|line| line.split_whitespace().nth(2))
                    .map(|v| v.to_string());
                (true, version)
            }
            _ => (false, None),
        }
    }

    /// List the audio streams of an input.
    pub async fn analyze_audio_tracks(
        &self,
        input_url: &str,
    ) -> SupervisorResult<Vec<AudioTrackInfo>> {
        debug!("Analyzing audio tracks of {input_url}");

        let mut cmd = Command::new(&self.program);
        cmd.args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_streams",
            input_url,
        ]);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        let output = tokio::time::timeout(ANALYZE_TIMEOUT, cmd.output())
            .await
            .map_err(|_| {
                SupervisorError::internal(format!(
                    "input analysis timed out after {ANALYZE_TIMEOUT:?}"
                ))
            })?
            .map_err(|e| SupervisorError::internal(format!("failed to run {}: {e}", self.program)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!("Input analysis failed for {input_url}: {stderr}");
            return Err(SupervisorError::validation(format!(
                "could not analyze input: {}",
                stderr.trim()
            )));
        }

        let data: serde_json::Value = serde_json::from_slice(&output.stdout)?;
        Ok(parse_audio_streams(&data))
    }
}

fn parse_audio_streams(data: &serde_json::Value) -> Vec<AudioTrackInfo> {
    let Some(streams) = data["streams"].as_array() else {
        return Vec::new();
    };

    streams
        .iter()
        .filter(|s| s["codec_type"].as_str() == Some("audio"))
        .map(|s| AudioTrackInfo {
            index: s["index"].as_u64().unwrap_or(0) as u32,
            codec_name: s["codec_name"].as_str().unwrap_or("unknown").to_string(),
            channels: s["channels"].as_u64().map(|v| v as u32),
            channel_layout: s["channel_layout"].as_str().map(|v| v.to_string()),
            sample_rate: s["sample_rate"].as_str().and_then(|v| v.parse().ok()),
            bit_rate: s["bit_rate"].as_str().and_then(|v| v.parse().ok()),
            language: s["tags"]["language"].as_str().map(|v| v.to_string()),
            title: s["tags"]["title"].as_str().map(|v| v.to_string()),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_audio_streams_from_probe_json() {
        let json: serde_json::Value = serde_json::from_str(
            r#"{
                "streams": [
                    {"index": 0, "codec_type": "video", "codec_name": "h264"},
                    {
                        "index": 1, "codec_type": "audio", "codec_name": "aac",
                        "channels": 2, "channel_layout": "stereo",
                        "sample_rate": "48000", "bit_rate": "128000",
                        "tags": {"language": "eng", "title": "Stereo"}
                    },
                    {
                        "index": 2, "codec_type": "audio", "codec_name": "ac3",
                        "channels": 6, "sample_rate": "48000"
                    }
                ]
            }"#,
        )
        .unwrap();

        let tracks = parse_audio_streams(&json);
        assert_eq!(tracks.len(), 2);
        assert_eq!(tracks[0].index, 1);
        assert_eq!(tracks[0].codec_name, "aac");
        assert_eq!(tracks[0].channels, Some(2));
        assert_eq!(tracks[0].sample_rate, Some(48000));
        assert_eq!(tracks[0].bit_rate, Some(128000));
        assert_eq!(tracks[0].language.as_deref(), Some("eng"));
        assert_eq!(tracks[1].codec_name, "ac3");
        assert_eq!(tracks[1].language, None);
    }

    #[test]
    fn test_parse_audio_streams_handles_missing_streams() {
        let json: serde_json::Value = serde_json::from_str("{}").unwrap();
        assert!(parse_audio_streams(&json).is_empty());
    }
}
