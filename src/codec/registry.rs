// SPDX-License-Identifier: GPL-3.0-only

//! Codec capability registry
//!
//! Describes which codec components exist and what they can do. The
//! decoder receives a registry at construction instead of scanning the
//! platform itself, so tests can hand in a fixed list.

use super::CodecFactory;
use crate::constants::color_format;
use crate::errors::{DecoderError, DecoderResult};
use crate::formats::color::VideoFormat;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info, warn};

/// Profile/level pair as reported by the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileLevel {
    pub profile: i32,
    pub level: i32,
}

/// One MIME type supported by a codec component
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodecType {
    pub mime: String,
    #[serde(default)]
    pub color_formats: Vec<i32>,
    #[serde(default)]
    pub profile_levels: Vec<ProfileLevel>,
}

impl CodecType {
    /// Whether the advertised color formats can be handled
    ///
    /// Decoders must only advertise formats we know how to copy, encoders
    /// need at least one. The opaque surface format is ignored.
    pub fn accepts_color_formats(&self, is_encoder: bool) -> bool {
        let mut all = self.color_formats.len();
        let mut accepted = 0;

        for &format in &self.color_formats {
            if format == color_format::ANDROID_OPAQUE {
                all -= 1;
                continue;
            }
            if VideoFormat::from_color_format(format).is_some() {
                accepted += 1;
            } else {
                debug!(mime = %self.mime, "Unknown color format 0x{:x}, ignoring", format);
            }
        }

        if is_encoder {
            accepted > 0
        } else {
            all > 0 && accepted == all
        }
    }
}

/// One codec component
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodecInfo {
    pub name: String,
    #[serde(default)]
    pub is_encoder: bool,
    pub supported_types: Vec<CodecType>,
}

impl CodecInfo {
    pub fn supported_type(&self, mime: &str) -> Option<&CodecType> {
        self.supported_types
            .iter()
            .find(|t| t.mime.eq_ignore_ascii_case(mime))
    }
}

/// Capability query service
pub trait CodecRegistry: Send + Sync {
    fn codecs(&self) -> &[CodecInfo];

    fn find(&self, name: &str) -> Option<&CodecInfo> {
        self.codecs().iter().find(|c| c.name == name)
    }

    /// First usable decoder for a device MIME type
    fn find_decoder(&self, mime: &str) -> Option<&CodecInfo> {
        self.codecs().iter().find(|codec| {
            !codec.is_encoder
                && codec
                    .supported_type(mime)
                    .is_some_and(|t| t.accepts_color_formats(false))
        })
    }
}

/// Registry backed by a fixed list
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticRegistry {
    codecs: Vec<CodecInfo>,
}

impl StaticRegistry {
    pub fn new(codecs: Vec<CodecInfo>) -> Self {
        Self { codecs }
    }

    /// Load a registry cache written by `save`
    pub fn load(path: &Path) -> DecoderResult<Self> {
        let text = std::fs::read_to_string(path)?;
        let registry: StaticRegistry = serde_json::from_str(&text)?;
        if registry.codecs.iter().any(|c| c.name.is_empty()) {
            return Err(DecoderError::Config(
                "codec entry without a name".to_string(),
            ));
        }
        debug!(path = %path.display(), count = registry.codecs.len(), "Loaded codec registry");
        Ok(registry)
    }

    pub fn save(&self, path: &Path) -> DecoderResult<()> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

impl CodecRegistry for StaticRegistry {
    fn codecs(&self) -> &[CodecInfo] {
        &self.codecs
    }
}

/// Check which registered decoders can actually be instantiated
///
/// Each decoder is created and released once through the factory.
/// Returns the names of the ones that worked.
pub fn probe_decoders(registry: &dyn CodecRegistry, factory: &dyn CodecFactory) -> Vec<String> {
    debug!("Probing registered decoders");
    let mut available = Vec::new();

    for codec in registry.codecs().iter().filter(|c| !c.is_encoder) {
        match factory.create(&codec.name) {
            Ok(device) => {
                info!("✓ {} available", codec.name);
                if let Err(e) = device.release() {
                    warn!(codec = %codec.name, error = %e, "Failed to release probed codec");
                }
                available.push(codec.name.clone());
            }
            Err(e) => {
                debug!("✗ {} not available: {}", codec.name, e);
            }
        }
    }

    if available.is_empty() {
        info!("No usable decoders found");
    } else {
        info!("Found {} usable decoder(s)", available.len());
    }

    available
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::simulated::SimulatedFactory;

    fn avc_decoder(name: &str, formats: Vec<i32>) -> CodecInfo {
        CodecInfo {
            name: name.to_string(),
            is_encoder: false,
            supported_types: vec![CodecType {
                mime: "video/avc".to_string(),
                color_formats: formats,
                profile_levels: vec![ProfileLevel {
                    profile: 1,
                    level: 512,
                }],
            }],
        }
    }

    #[test]
    fn test_decoder_needs_all_formats_known() {
        let t = &avc_decoder(
            "x",
            vec![color_format::YUV420_SEMI_PLANAR, color_format::ANDROID_OPAQUE],
        )
        .supported_types[0];
        assert!(t.accepts_color_formats(false));

        let t = &avc_decoder("x", vec![color_format::YUV420_SEMI_PLANAR, 0x1234]).supported_types[0];
        assert!(!t.accepts_color_formats(false));
        assert!(t.accepts_color_formats(true));

        let t = &avc_decoder("x", vec![color_format::ANDROID_OPAQUE]).supported_types[0];
        assert!(!t.accepts_color_formats(false));
    }

    #[test]
    fn test_find_decoder_skips_unusable() {
        let registry = StaticRegistry::new(vec![
            avc_decoder("OMX.bad.avc", vec![0x1234]),
            avc_decoder("OMX.good.avc", vec![color_format::YUV420_PLANAR]),
        ]);
        assert_eq!(
            registry.find_decoder("video/AVC").map(|c| c.name.as_str()),
            Some("OMX.good.avc")
        );
        assert!(registry.find_decoder("video/hevc").is_none());
    }

    #[test]
    fn test_registry_json() {
        let json = r#"{ "codecs": [ { "name": "OMX.test.vp8",
            "supported_types": [ { "mime": "video/x-vnd.on2.vp8", "color_formats": [21] } ] } ] }"#;
        let registry: StaticRegistry = serde_json::from_str(json).unwrap();
        let codec = registry.find("OMX.test.vp8").unwrap();
        assert!(!codec.is_encoder);
        assert!(codec.supported_types[0].profile_levels.is_empty());
    }

    #[test]
    fn test_probe_decoders() {
        let registry = StaticRegistry::new(vec![
            avc_decoder("OMX.sim.avc", vec![color_format::YUV420_SEMI_PLANAR]),
            avc_decoder("OMX.missing.avc", vec![color_format::YUV420_SEMI_PLANAR]),
        ]);
        let factory = SimulatedFactory::default().with_unavailable("OMX.missing.avc");
        assert_eq!(probe_decoders(&registry, &factory), vec!["OMX.sim.avc"]);
    }
}
