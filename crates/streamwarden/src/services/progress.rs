//! Encoder progress parsing.
//!
//! FFmpeg reports progress on stderr as repeated `frame= ... fps= ...` lines,
//! often terminated by carriage returns and fragmented arbitrarily across
//! pipe reads. The parser keeps one residual buffer per channel, emits a
//! [`MetricRecord`] per complete progress line, and hands every other
//! complete line back to the caller for log classification. Parsing failures
//! never propagate.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::Utc;
use uuid::Uuid;

use crate::models::{BitrateSource, MetricRecord};

/// Result of feeding one stderr chunk through the parser.
#[derive(Debug, Default)]
pub struct ParsedChunk {
    /// Metric records extracted from progress lines.
    pub records: Vec<MetricRecord>,
    /// Complete non-progress lines, for log routing.
    pub lines: Vec<String>,
}

/// Streaming parser over per-channel stderr byte streams.
#[derive(Default)]
pub struct ProgressParser {
    buffers: Mutex<HashMap<Uuid, String>>,
}

impl ProgressParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a raw stderr chunk for a channel.
    pub fn push(&self, channel_id: Uuid, chunk: &[u8]) -> ParsedChunk {
        let text = String::from_utf8_lossy(chunk);
        let mut result = ParsedChunk::default();

        let mut buffers = self.buffers.lock().unwrap_or_else(|e| e.into_inner());
        let buffer = buffers.entry(channel_id).or_default();
        buffer.push_str(&text);

        // split out complete lines, keeping any trailing partial line
        let residual = match buffer.rfind(['\n', '\r']) {
            Some(pos) => buffer.split_off(pos + 1),
            None => return result,
        };
        let complete = std::mem::replace(buffer, residual);
        drop(buffers);

        for line in complete.split(['\n', '\r']) {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if line.contains("frame=") {
                if let Some(record) = parse_progress_line(line) {
                    result.records.push(record);
                }
            } else {
                result.lines.push(line.to_string());
            }
        }

        result
    }

    /// Drop a channel's residual buffer on teardown.
    pub fn clear(&self, channel_id: Uuid) {
        self.buffers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&channel_id);
    }
}

/// Parse one `frame=` progress line into a metric record.
pub fn parse_progress_line(line: &str) -> Option<MetricRecord> {
    let frame = extract_value(line, "frame=")?.parse::<u64>().ok()?;
    let fps = extract_value(line, "fps=")
        .and_then(|v| v.parse::<f64>().ok())
        .unwrap_or(0.0);
    let quality = extract_value(line, "q=")
        .and_then(|v| v.parse::<f64>().ok())
        .unwrap_or(0.0);
    let size_bytes = extract_value(line, "size=")
        .and_then(|v| parse_size_bytes(&v))
        .unwrap_or(0);
    let time_seconds = extract_value(line, "time=")
        .and_then(|v| parse_timecode(&v))
        .unwrap_or(0.0);
    let mut bitrate_kbps = extract_value(line, "bitrate=").and_then(|v| parse_bitrate_kbps(&v));
    let speed = extract_value(line, "speed=").and_then(|v| parse_speed(&v));
    let video_bytes = extract_value(line, "video:").and_then(|v| parse_size_bytes(&v));
    let audio_bytes = extract_value(line, "audio:").and_then(|v| parse_size_bytes(&v));

    if bitrate_kbps.is_none() && size_bytes > 0 && time_seconds > 0.0 {
        bitrate_kbps = Some((size_bytes as f64 * 8.0) / (time_seconds * 1000.0));
    }

    Some(MetricRecord {
        frame,
        fps,
        quality,
        size_bytes,
        time_seconds,
        bitrate_kbps,
        speed,
        video_bytes,
        audio_bytes,
        source: BitrateSource::Parsed,
        captured_at: Utc::now(),
    })
}

/// Value following `key`, tolerating padding spaces after the `=`.
fn extract_value(line: &str, key: &str) -> Option<String> {
    let start = line.find(key)? + key.len();
    let rest = line[start..].trim_start();
    let end = rest
        .find(char::is_whitespace)
        .unwrap_or(rest.len());
    let value = &rest[..end];
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

fn parse_size_bytes(value: &str) -> Option<u64> {
    let value = value.trim();
    if value == "N/A" {
        return None;
    }
    let (number, multiplier) = if let Some(n) = value.strip_suffix("GB") {
        (n, 1024.0 * 1024.0 * 1024.0)
    } else if let Some(n) = value.strip_suffix("MB").or_else(|| value.strip_suffix("mB")) {
        (n, 1024.0 * 1024.0)
    } else if let Some(n) = value.strip_suffix("kB").or_else(|| value.strip_suffix("KB")) {
        (n, 1024.0)
    } else if let Some(n) = value.strip_suffix('g') {
        (n, 1024.0 * 1024.0 * 1024.0)
    } else if let Some(n) = value.strip_suffix('m') {
        (n, 1024.0 * 1024.0)
    } else if let Some(n) = value.strip_suffix('k') {
        (n, 1024.0)
    } else if let Some(n) = value.strip_suffix('B') {
        (n, 1.0)
    } else {
        (value, 1.0)
    };
    let parsed: f64 = number.trim().parse().ok()?;
    Some((parsed * multiplier) as u64)
}

/// `hh:mm:ss.cc` into seconds.
fn parse_timecode(value: &str) -> Option<f64> {
    if value == "N/A" {
        return None;
    }
    let mut parts = value.split(':');
    let hours: f64 = parts.next()?.parse().ok()?;
    let minutes: f64 = parts.next()?.parse().ok()?;
    let seconds: f64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

fn parse_bitrate_kbps(value: &str) -> Option<f64> {
    let value = value.trim();
    if value == "N/A" {
        return None;
    }
    let (number, factor) = if let Some(n) = value.strip_suffix("kbits/s") {
        (n, 1.0)
    } else if let Some(n) = value.strip_suffix("mbits/s") {
        (n, 1_000.0)
    } else if let Some(n) = value.strip_suffix("bits/s") {
        (n, 0.001)
    } else if let Some(n) = value.strip_suffix("kbps") {
        (n, 1.0)
    } else if let Some(n) = value.strip_suffix("mbps") {
        (n, 1_000.0)
    } else {
        (value, 1.0)
    };
    let parsed: f64 = number.trim().parse().ok()?;
    Some(parsed * factor)
}

fn parse_speed(value: &str) -> Option<f64> {
    let value = value.trim();
    if value == "N/A" {
        return None;
    }
    value.trim_end_matches('x').parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROGRESS_LINE: &str = "frame=  123 fps= 25 q=28.0 size=    1024kB time=00:00:05.00 bitrate=1677.7kbits/s speed=1.0x";

    #[test]
    fn test_parses_canonical_progress_line() {
        let record = parse_progress_line(PROGRESS_LINE).unwrap();
        assert_eq!(record.frame, 123);
        assert_eq!(record.fps, 25.0);
        assert_eq!(record.quality, 28.0);
        assert_eq!(record.size_bytes, 1_048_576);
        assert_eq!(record.time_seconds, 5.0);
        assert_eq!(record.bitrate_kbps, Some(1677.7));
        assert_eq!(record.speed, Some(1.0));
        assert_eq!(record.source, BitrateSource::Parsed);
    }

    #[test]
    fn test_parses_units_and_per_stream_sizes() {
        let line = "frame= 9000 fps=120 q=-1.0 size=    2GB time=01:02:03.50 bitrate=2.5mbits/s speed=4.2x video:1800m audio:64k";
        let record = parse_progress_line(line).unwrap();
        assert_eq!(record.size_bytes, 2 * 1024 * 1024 * 1024);
        assert_eq!(record.time_seconds, 3723.5);
        assert_eq!(record.bitrate_kbps, Some(2500.0));
        assert_eq!(record.speed, Some(4.2));
        assert_eq!(record.video_bytes, Some(1800 * 1024 * 1024));
        assert_eq!(record.audio_bytes, Some(64 * 1024));
    }

    #[test]
    fn test_derives_bitrate_from_size_and_time() {
        let line = "frame=  250 fps= 50 q=23.0 size=    1000kB time=00:00:10.00 bitrate=N/A speed=1.0x";
        let record = parse_progress_line(line).unwrap();
        // (1000 * 1024 * 8) / (10 * 1000)
        assert_eq!(record.bitrate_kbps, Some(819.2));
    }

    #[test]
    fn test_fragmented_chunks_reassemble() {
        let parser = ProgressParser::new();
        let id = Uuid::new_v4();

        let first = parser.push(id, b"frame=  123 fps= 25 q=28.0 size=    1024kB ");
        assert!(first.records.is_empty());

        let second = parser.push(
            id,
            b"time=00:00:05.00 bitrate=1677.7kbits/s speed=1.0x\nframe= 12",
        );
        assert_eq!(second.records.len(), 1);
        assert_eq!(second.records[0].frame, 123);

        let third = parser.push(id, b"5 fps= 25 q=28.0 size= 1100kB time=00:00:05.20 bitrate=1690.1kbits/s speed=1.0x\r");
        assert_eq!(third.records.len(), 1);
        assert_eq!(third.records[0].frame, 125);
    }

    #[test]
    fn test_non_progress_lines_are_routed_not_parsed() {
        let parser = ProgressParser::new();
        let id = Uuid::new_v4();

        let parsed = parser.push(
            id,
            b"[https @ 0x55] Opening 'https://ex/seg1.ts' for reading\nInput #0, hls, from 'https://ex/live.m3u8':\n",
        );
        assert!(parsed.records.is_empty());
        assert_eq!(parsed.lines.len(), 2);
    }

    #[test]
    fn test_garbage_in_progress_line_is_ignored() {
        let parser = ProgressParser::new();
        let id = Uuid::new_v4();

        let parsed = parser.push(id, b"frame=garbage fps=nope\n");
        assert!(parsed.records.is_empty());
        assert!(parsed.lines.is_empty());
    }

    #[test]
    fn test_clear_drops_residual() {
        let parser = ProgressParser::new();
        let id = Uuid::new_v4();

        parser.push(id, b"frame=  1 fps= 25 q=28.0 size=1kB ");
        parser.clear(id);
        let parsed = parser.push(id, b"time=00:00:01.00 bitrate=8.0kbits/s speed=1x\n");
        // the head of the line was discarded with the buffer
        assert!(parsed.records.is_empty());
    }
}
