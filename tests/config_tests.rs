// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for configuration and codec registry files

use amc_videodec::codec::{CodecType, ProfileLevel};
use amc_videodec::constants::color_format;
use amc_videodec::{CodecInfo, CodecRegistry, DecoderConfig, DecoderError, StaticRegistry};
use std::path::PathBuf;

fn temp_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("amc-videodec-{}-{}", std::process::id(), name))
}

#[test]
fn test_config_default() {
    let config = DecoderConfig::default();

    assert!(
        !config.hardware_rendering,
        "Hardware rendering should be opt-in"
    );
    assert_eq!(config.stale_frame_max_distance, 100);
    assert_eq!(config.input_alignment, 4096);
}

#[test]
fn test_config_save_and_load() {
    let path = temp_path("config.json");
    let config = DecoderConfig {
        drain_timeout_ms: 500,
        hardware_rendering: true,
        ..DecoderConfig::default()
    };

    config.save(&path).unwrap();
    let loaded = DecoderConfig::load(&path).unwrap();
    std::fs::remove_file(&path).ok();

    assert_eq!(loaded, config);
}

#[test]
fn test_config_load_rejects_invalid() {
    let path = temp_path("invalid-config.json");
    std::fs::write(&path, r#"{ "input_alignment": 0 }"#).unwrap();
    let result = DecoderConfig::load(&path);
    std::fs::remove_file(&path).ok();

    assert!(matches!(result, Err(DecoderError::Config(_))));
}

#[test]
fn test_config_load_missing_file() {
    let result = DecoderConfig::load(&temp_path("does-not-exist.json"));
    assert!(result.is_err());
}

#[test]
fn test_registry_save_and_load() {
    let path = temp_path("registry.json");
    let registry = StaticRegistry::new(vec![
        CodecInfo {
            name: "OMX.google.h264.encoder".to_string(),
            is_encoder: true,
            supported_types: vec![CodecType {
                mime: "video/avc".to_string(),
                color_formats: vec![color_format::YUV420_FLEXIBLE],
                profile_levels: Vec::new(),
            }],
        },
        CodecInfo {
            name: "OMX.qcom.video.decoder.avc".to_string(),
            is_encoder: false,
            supported_types: vec![CodecType {
                mime: "video/avc".to_string(),
                color_formats: vec![
                    color_format::QCOM_YUV420_PACKED_SEMI_PLANAR_64X32_TILE2M8KA,
                    color_format::ANDROID_OPAQUE,
                ],
                profile_levels: vec![ProfileLevel {
                    profile: 8,
                    level: 0x2000,
                }],
            }],
        },
    ]);

    registry.save(&path).unwrap();
    let loaded = StaticRegistry::load(&path).unwrap();
    std::fs::remove_file(&path).ok();

    assert_eq!(loaded, registry);
    // The encoder is skipped and the opaque format does not disqualify
    let decoder = loaded.find_decoder("video/avc").unwrap();
    assert_eq!(decoder.name, "OMX.qcom.video.decoder.avc");
    assert!(loaded.find_decoder("video/hevc").is_none());
}
