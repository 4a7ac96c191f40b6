//! Hardware acceleration probe.
//!
//! Combines three evidence sources to decide which hardware encoders exist:
//! the encoder's own `-encoders` listing, render nodes under `/dev/dri`, and
//! vendor tooling (`nvidia-smi`). The result is memoised for a short TTL so
//! command builds stay cheap.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::EncoderConfig;
use crate::errors::{SupervisorError, SupervisorResult};
use crate::models::{HwAccelCapabilities, HwAccelKind, HwCapability};

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);
const CACHE_TTL: Duration = Duration::from_secs(60);

/// Hardware selection order for h.264/h.265 substitution.
const SELECTION_ORDER: [HwAccelKind; 4] = [
    HwAccelKind::Nvenc,
    HwAccelKind::Qsv,
    HwAccelKind::Vaapi,
    HwAccelKind::Videotoolbox,
];

struct CachedCapabilities {
    capabilities: HwAccelCapabilities,
    probed_at: Instant,
}

/// Probes and memoises the host's hardware encoding capabilities.
pub struct HwAccelProbe {
    program: String,
    default_vaapi_device: Option<PathBuf>,
    ttl: Duration,
    cache: RwLock<Option<CachedCapabilities>>,
}

impl HwAccelProbe {
    pub fn new(encoder: &EncoderConfig) -> Self {
        Self {
            program: encoder.program.clone(),
            default_vaapi_device: encoder.vaapi_default_device.clone(),
            ttl: CACHE_TTL,
            cache: RwLock::new(None),
        }
    }

    /// Current capabilities, probing at most once per TTL.
    pub async fn capabilities(&self) -> HwAccelCapabilities {
        {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.as_ref() {
                if cached.probed_at.elapsed() < self.ttl {
                    return cached.capabilities.clone();
                }
            }
        }

        let capabilities = self.probe_all().await;
        let mut cache = self.cache.write().await;
        *cache = Some(CachedCapabilities {
            capabilities: capabilities.clone(),
            probed_at: Instant::now(),
        });
        capabilities
    }

    /// Drop the cached result so the next query re-probes.
    pub async fn invalidate(&self) {
        *self.cache.write().await = None;
    }

    /// Check the encoder binary and report its version, for the startup log.
    pub async fn encoder_availability(&self) -> (bool, Option<String>) {
        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.arg("-version");
        cmd.stdin(std::process::Stdio::null());

        match tokio::time::timeout(PROBE_TIMEOUT, cmd.output()).await {
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

    async fn probe_all(&self) -> HwAccelCapabilities {
        let encoder_text = self.run_encoder_listing().await.unwrap_or_default();
        let codecs_by_kind = parse_encoder_list(&encoder_text);
        let render_nodes = enumerate_render_nodes();
        let nvidia_present = nvidia_tool_present().await;

        let mut accelerators = Vec::new();

        if let Some(codecs) = codecs_by_kind.get(&HwAccelKind::Nvenc) {
            let available =
                !codecs.is_empty() && (nvidia_present || Path::new("/dev/nvidia0").exists());
            accelerators.push(HwCapability {
                kind: HwAccelKind::Nvenc,
                index: 0,
                name: "NVIDIA NVENC".to_string(),
                device_path: None,
                codecs: codecs.clone(),
                available,
            });
        }

        if let Some(codecs) = codecs_by_kind.get(&HwAccelKind::Qsv) {
            let available = !codecs.is_empty() && !render_nodes.is_empty();
            accelerators.push(HwCapability {
                kind: HwAccelKind::Qsv,
                index: 0,
                name: "Intel Quick Sync".to_string(),
                device_path: render_nodes.first().map(|(_, p)| p.clone()),
                codecs: codecs.clone(),
                available,
            });
        }

        if let Some(codecs) = codecs_by_kind.get(&HwAccelKind::Vaapi) {
            for (node_index, path) in &render_nodes {
                accelerators.push(HwCapability {
                    kind: HwAccelKind::Vaapi,
                    index: node_index.saturating_sub(128),
                    name: format!("VAAPI {}", path.display()),
                    device_path: Some(path.clone()),
                    codecs: codecs.clone(),
                    available: !codecs.is_empty(),
                });
            }
        }

        if let Some(codecs) = codecs_by_kind.get(&HwAccelKind::Videotoolbox) {
            accelerators.push(HwCapability {
                kind: HwAccelKind::Videotoolbox,
                index: 0,
                name: "Apple VideoToolbox".to_string(),
                device_path: None,
                codecs: codecs.clone(),
                available: cfg!(target_os = "macos") && !codecs.is_empty(),
            });
        }

        if let Some(codecs) = codecs_by_kind.get(&HwAccelKind::Amf) {
            accelerators.push(HwCapability {
                kind: HwAccelKind::Amf,
                index: 0,
                name: "AMD AMF".to_string(),
                device_path: None,
                codecs: codecs.clone(),
                available: !codecs.is_empty(),
            });
        }

        let capabilities = HwAccelCapabilities { accelerators };
        if capabilities.any_available() {
            info!(
                "Hardware encoders available: {}",
                capabilities
                    .accelerators
                    .iter()
                    .filter(|a| a.available)
                    .map(|a| format!("{} [{}]", a.kind, a.codecs.join(",")))
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        } else {
            debug!("No hardware encoders available");
        }
        capabilities
    }

    async fn run_encoder_listing(&self) -> Option<String> {
        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.args(["-hide_banner", "-encoders"]);
        cmd.stdin(std::process::Stdio::null());

        match tokio::time::timeout(PROBE_TIMEOUT, cmd.output()).await {
            Ok(Ok(output)) if output.status.success() => {
                Some(String::from_utf8_lossy(&output.stdout).into_owned())
            }
            Ok(Ok(output)) => {
                warn!("Encoder listing failed with status {}", output.status);
                None
            }
            Ok(Err(e)) => {
                warn!("Failed to run encoder listing via '{}': {e}", self.program);
                None
            }
            Err(_) => {
                warn!("Encoder listing timed out after {PROBE_TIMEOUT:?}");
                None
            }
        }
    }

    /// Resolve the render node for a VAAPI encode: an enumerated device with
    /// the requested index, the conventional `/dev/dri/renderD{128+index}`
    /// path, or the configured default. The chosen node must be readable; a
    /// miss is a hard error so a start never silently falls back to software.
    pub fn resolve_vaapi_device(
        &self,
        capabilities: &HwAccelCapabilities,
        gpu_index: Option<u32>,
    ) -> SupervisorResult<PathBuf> {
        let index = gpu_index.unwrap_or(0);
        let mut candidates: Vec<PathBuf> = Vec::new();

        if let Some(device) = capabilities
            .find_indexed(HwAccelKind::Vaapi, index)
            .and_then(|c| c.device_path.clone())
        {
            candidates.push(device);
        }
        candidates.push(PathBuf::from(format!("/dev/dri/renderD{}", 128 + index)));
        if let Some(default) = &self.default_vaapi_device {
            candidates.push(default.clone());
        }

        candidates.dedup();
        for candidate in &candidates {
            if device_readable(candidate) {
                return Ok(candidate.clone());
            }
        }

        Err(SupervisorError::resource(format!(
            "no readable VAAPI render device for gpu index {index} (tried {}); \
             expose the DRI device to the runtime sandbox",
            candidates
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        )))
    }
}

/// Map a requested codec name to the hardware encoder that should serve it.
///
/// Returns the name to put after `-c:v`, or `None` when no codec was
/// requested and no substitution applies. Already-hardware names pass
/// through untouched; `copy` and empty requests are substituted only when
/// automatic substitution is enabled.
pub fn preferred_video_codec(
    capabilities: &HwAccelCapabilities,
    requested: Option<&str>,
    encoder: &EncoderConfig,
) -> Option<String> {
    let requested = requested.map(str::trim).filter(|s| !s.is_empty());

    if !encoder.hwaccel_enabled {
        return requested.map(str::to_string);
    }

    let family = match requested {
        Some(req) if hw_kind_of(req).is_some() => return Some(req.to_string()),
        Some("copy") | None => {
            if !encoder.hwaccel_auto {
                return requested.map(str::to_string);
            }
            "h264"
        }
        Some(req) => match codec_family(req) {
            Some(family) => family,
            None => return Some(req.to_string()),
        },
    };

    for kind in SELECTION_ORDER {
        if capabilities.find(kind, family).is_some() {
            return Some(format!("{family}_{}", kind.codec_suffix()));
        }
    }

    requested.map(str::to_string)
}

/// Hardware family a codec name belongs to, if it carries a known suffix.
pub fn hw_kind_of(codec: &str) -> Option<HwAccelKind> {
    let (_, suffix) = codec.rsplit_once('_')?;
    suffix.parse().ok()
}

fn codec_family(codec: &str) -> Option<&'static str> {
    match codec {
        "h264" | "libx264" | "x264" => Some("h264"),
        "hevc" | "h265" | "libx265" | "x265" => Some("hevc"),
        _ => None,
    }
}

/// Parse `ffmpeg -encoders` output into codec families per accelerator kind.
fn parse_encoder_list(text: &str) -> HashMap<HwAccelKind, Vec<String>> {
    let mut result: HashMap<HwAccelKind, Vec<String>> = HashMap::new();

    for line in text.lines() {
        // listing lines look like " V....D h264_nvenc  NVIDIA NVENC H.264 encoder"
        let Some(name) = line.split_whitespace().nth(1) else {
            continue;
        };
        let Some((family, suffix)) = name.rsplit_once('_') else {
            continue;
        };
        let Ok(kind) = suffix.parse::<HwAccelKind>() else {
            continue;
        };
        let codecs = result.entry(kind).or_default();
        if !codecs.iter().any(|c| c == family) {
            codecs.push(family.to_string());
        }
    }

    result
}

fn enumerate_render_nodes() -> Vec<(u32, PathBuf)> {
    let mut nodes = Vec::new();
    let Ok(entries) = std::fs::read_dir("/dev/dri") else {
        return nodes;
    };
    for entry in entries.flatten() {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if let Some(num) = name.strip_prefix("renderD").and_then(|n| n.parse().ok()) {
            let path = entry.path();
            if device_readable(&path) {
                nodes.push((num, path));
            }
        }
    }
    nodes.sort_by_key(|(num, _)| *num);
    nodes
}

fn device_readable(path: &Path) -> bool {
    std::fs::File::open(path).is_ok()
}

async fn nvidia_tool_present() -> bool {
    let mut cmd = tokio::process::Command::new("nvidia-smi");
    cmd.arg("-L");
    cmd.stdin(std::process::Stdio::null());
    cmd.stdout(std::process::Stdio::null());
    cmd.stderr(std::process::Stdio::null());

    matches!(
        tokio::time::timeout(Duration::from_secs(3), cmd.status()).await,
        Ok(Ok(status)) if status.success()
    )
}
