//! Hardware acceleration models.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Families of hardware encoders the probe can recognize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HwAccelKind {
    Nvenc,
    Qsv,
    Vaapi,
    Videotoolbox,
    Amf,
}

impl HwAccelKind {
    /// Encoder name suffix used by FFmpeg for this family.
    pub fn codec_suffix(&self) -> &'static str {
        match self {
            HwAccelKind::Nvenc => "nvenc",
            HwAccelKind::Qsv => "qsv",
            HwAccelKind::Vaapi => "vaapi",
            HwAccelKind::Videotoolbox => "videotoolbox",
            HwAccelKind::Amf => "amf",
        }
    }
}

impl fmt::Display for HwAccelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.codec_suffix())
    }
}

impl FromStr for HwAccelKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "nvenc" | "cuda" => Ok(HwAccelKind::Nvenc),
            "qsv" => Ok(HwAccelKind::Qsv),
            "vaapi" => Ok(HwAccelKind::Vaapi),
            "videotoolbox" => Ok(HwAccelKind::Videotoolbox),
            "amf" => Ok(HwAccelKind::Amf),
            other => Err(format!("unknown hardware acceleration kind: {other}")),
        }
    }
}

/// One probed accelerator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HwCapability {
    pub kind: HwAccelKind,
    pub index: u32,
    pub name: String,
    /// Render node path, present for VAAPI devices.
    pub device_path: Option<PathBuf>,
    /// Codec families this accelerator encodes ("h264", "hevc", ...).
    pub codecs: Vec<String>,
    pub available: bool,
}

/// Probe result over all accelerator kinds.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HwAccelCapabilities {
    pub accelerators: Vec<HwCapability>,
}

impl HwAccelCapabilities {
    /// First available accelerator of the given kind supporting `codec`.
    pub fn find(&self, kind: HwAccelKind, codec: &str) -> Option<&HwCapability> {
        self.accelerators
            .iter()
            .find(|a| a.kind == kind && a.available && a.codecs.iter().any(|c| c == codec))
    }

    /// Accelerator of the given kind with a specific device index.
    pub fn find_indexed(&self, kind: HwAccelKind, index: u32) -> Option<&HwCapability> {
        self.accelerators
            .iter()
            .find(|a| a.kind == kind && a.index == index)
    }

    pub fn any_available(&self) -> bool {
        self.accelerators.iter().any(|a| a.available)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_parse_and_suffix() {
        assert_eq!("nvenc".parse::<HwAccelKind>().unwrap(), HwAccelKind::Nvenc);
        assert_eq!("cuda".parse::<HwAccelKind>().unwrap(), HwAccelKind::Nvenc);
        assert_eq!(HwAccelKind::Vaapi.codec_suffix(), "vaapi");
        assert!("opencl".parse::<HwAccelKind>().is_err());
    }

    #[test]
    fn test_find_respects_availability() {
        let caps = HwAccelCapabilities {
            accelerators: vec![
                HwCapability {
                    kind: HwAccelKind::Nvenc,
                    index: 0,
                    name: "nvenc".to_string(),
                    device_path: None,
                    codecs: vec!["h264".to_string(), "hevc".to_string()],
                    available: false,
                },
                HwCapability {
                    kind: HwAccelKind::Vaapi,
                    index: 0,
                    name: "vaapi renderD128".to_string(),
                    device_path: Some(PathBuf::from("/dev/dri/renderD128")),
                    codecs: vec!["h264".to_string()],
                    available: true,
                },
            ],
        };
        assert!(caps.find(HwAccelKind::Nvenc, "h264").is_none());
        assert!(caps.find(HwAccelKind::Vaapi, "h264").is_some());
        assert!(caps.find(HwAccelKind::Vaapi, "hevc").is_none());
    }
}
