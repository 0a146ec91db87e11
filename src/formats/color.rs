// SPDX-License-Identifier: GPL-3.0-only

//! Device color formats and the raw video formats they decode to

use crate::constants::color_format as cf;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Raw video format handed downstream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VideoFormat {
    /// Planar 4:2:0, Y then U then V
    I420,
    /// Planar 4:2:0, Y then V then U
    Yv12,
    /// Semi-planar 4:2:0, Y then interleaved UV
    Nv12,
    /// Semi-planar 4:2:0, Y then interleaved VU
    Nv21,
    /// Packed 4:2:2 U0 Y0 V0 Y1
    Uyvy,
    /// 16-bit RGB 5:6:5
    Rgb16,
    /// 32-bit ARGB
    Argb,
    /// 32-bit RGBA
    Rgba,
}

impl VideoFormat {
    /// Video format a device color format decodes to, if we know it
    pub fn from_color_format(color_format: i32) -> Option<Self> {
        let format = match color_format {
            cf::YUV420_FLEXIBLE | cf::YUV420_PLANAR => VideoFormat::I420,
            cf::YUV420_SEMI_PLANAR
            | cf::VENDOR_SEMI_PLANAR_256
            | cf::VENDOR_SEMI_PLANAR_261
            | cf::VENDOR_SEMI_PLANAR_263
            | cf::TI_YUV420_PACKED_SEMI_PLANAR
            | cf::TI_YUV420_PACKED_SEMI_PLANAR_INTERLACED
            | cf::QCOM_YUV420_SEMI_PLANAR
            | cf::QCOM_YUV420_PACKED_SEMI_PLANAR_64X32_TILE2M8KA
            | cf::QCOM_YVU420_SEMI_PLANAR_32M
            | cf::QCOM_YVU420_SEMI_PLANAR_32M_MULTIVIEW
            | cf::QCOM_YUV420_SEMI_PLANAR_UBWC
            | cf::EXYNOS_NV12_TILED => VideoFormat::Nv12,
            cf::YUV420_PACKED_PLANAR | cf::YUV420_PACKED_SEMI_PLANAR => VideoFormat::Yv12,
            cf::FORMAT_16BIT_RGB565 => VideoFormat::Rgb16,
            cf::FORMAT_25BIT_ARGB1888 => VideoFormat::Argb,
            cf::CBYCRY => VideoFormat::Uyvy,
            _ => return None,
        };
        Some(format)
    }

    /// Color formats that decode to this video format
    pub fn color_formats(self) -> Vec<i32> {
        ALL_COLOR_FORMATS
            .iter()
            .copied()
            .filter(|&c| Self::from_color_format(c) == Some(self))
            .collect()
    }

    /// Whether this is a 4:2:0 YUV layout
    pub fn is_yuv420(self) -> bool {
        matches!(
            self,
            VideoFormat::I420 | VideoFormat::Yv12 | VideoFormat::Nv12 | VideoFormat::Nv21
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            VideoFormat::I420 => "I420",
            VideoFormat::Yv12 => "YV12",
            VideoFormat::Nv12 => "NV12",
            VideoFormat::Nv21 => "NV21",
            VideoFormat::Uyvy => "UYVY",
            VideoFormat::Rgb16 => "RGB16",
            VideoFormat::Argb => "ARGB",
            VideoFormat::Rgba => "RGBA",
        }
    }
}

impl fmt::Display for VideoFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Every device color format with a known mapping
pub const ALL_COLOR_FORMATS: [i32; 19] = [
    cf::YUV420_FLEXIBLE,
    cf::YUV420_PLANAR,
    cf::YUV420_SEMI_PLANAR,
    cf::VENDOR_SEMI_PLANAR_256,
    cf::VENDOR_SEMI_PLANAR_261,
    cf::VENDOR_SEMI_PLANAR_263,
    cf::TI_YUV420_PACKED_SEMI_PLANAR,
    cf::TI_YUV420_PACKED_SEMI_PLANAR_INTERLACED,
    cf::QCOM_YUV420_SEMI_PLANAR,
    cf::QCOM_YUV420_PACKED_SEMI_PLANAR_64X32_TILE2M8KA,
    cf::QCOM_YVU420_SEMI_PLANAR_32M,
    cf::QCOM_YVU420_SEMI_PLANAR_32M_MULTIVIEW,
    cf::QCOM_YUV420_SEMI_PLANAR_UBWC,
    cf::EXYNOS_NV12_TILED,
    cf::YUV420_PACKED_PLANAR,
    cf::YUV420_PACKED_SEMI_PLANAR,
    cf::CBYCRY,
    cf::FORMAT_16BIT_RGB565,
    cf::FORMAT_25BIT_ARGB1888,
];

/// Human readable name of a device color format
pub fn color_format_name(color_format: i32) -> &'static str {
    match color_format {
        cf::FORMAT_16BIT_RGB565 => "Format16bitRGB565",
        cf::FORMAT_25BIT_ARGB1888 => "Format25bitARGB1888",
        cf::YUV420_PLANAR => "FormatYUV420Planar",
        cf::YUV420_PACKED_PLANAR => "FormatYUV420PackedPlanar",
        cf::YUV420_SEMI_PLANAR => "FormatYUV420SemiPlanar",
        cf::YCBYCR => "FormatYCbYCr",
        cf::CBYCRY => "FormatCbYCrY",
        cf::YUV420_PACKED_SEMI_PLANAR => "FormatYUV420PackedSemiPlanar",
        cf::YUV420_FLEXIBLE => "FormatYUV420Flexible",
        cf::ANDROID_OPAQUE => "FormatAndroidOpaque",
        cf::TI_YUV420_PACKED_SEMI_PLANAR => "TI_FormatYUV420PackedSemiPlanar",
        cf::TI_YUV420_PACKED_SEMI_PLANAR_INTERLACED => "TI_FormatYUV420PackedSemiPlanarInterlaced",
        cf::QCOM_YUV420_SEMI_PLANAR => "QCOM_FormatYUV420SemiPlanar",
        cf::QCOM_YUV420_PACKED_SEMI_PLANAR_64X32_TILE2M8KA => {
            "QCOM_FormatYUV420PackedSemiPlanar64x32Tile2m8ka"
        }
        cf::QCOM_YVU420_SEMI_PLANAR_32M => "QCOM_FormatYVU420SemiPlanar32m",
        cf::QCOM_YVU420_SEMI_PLANAR_32M_MULTIVIEW => "QCOM_FormatYVU420SemiPlanar32mMultiView",
        cf::QCOM_YUV420_SEMI_PLANAR_UBWC => "QCOM_FormatYUV420SemiPlanarUBWC",
        cf::EXYNOS_NV12_TILED => "EXYNOS_FormatNV12Tiled",
        cf::VENDOR_SEMI_PLANAR_256 | cf::VENDOR_SEMI_PLANAR_261 | cf::VENDOR_SEMI_PLANAR_263 => {
            "VendorSemiPlanar"
        }
        _ => "Unknown",
    }
}
