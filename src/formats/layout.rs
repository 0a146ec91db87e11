// SPDX-License-Identifier: GPL-3.0-only

//! Frame geometry on both sides of the copy
//!
//! [`ColorFormatInfo`] describes how the device lays out a decoded frame in
//! its output slot. [`VideoInfo`] describes the tightly packed frame we hand
//! downstream.

use super::color::VideoFormat;
use crate::codec::CodecFormat;
use crate::constants::{color_format as cf, format_key, quirks};
use crate::errors::{DecoderError, DecoderResult};
use serde::Serialize;

pub const TILE_WIDTH: usize = 64;
pub const TILE_HEIGHT: usize = 32;
pub const TILE_SIZE: usize = TILE_WIDTH * TILE_HEIGHT;
pub const TILE_GROUP_SIZE: usize = 4 * TILE_SIZE;

/// Position of a 64x32 tile in the Z-flipped tile order used by
/// Qualcomm and Exynos tiled NV12
pub fn tile_pos(x: usize, y: usize, w: usize, h: usize) -> usize {
    let mut flim = x + (y & !1) * w;

    if y & 1 != 0 {
        flim += (x & !3) + 2;
    } else if (h & 1) == 0 || y != h - 1 {
        flim += (x + 2) & !3;
    }

    flim
}

/// Tile grid of a tiled NV12 frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileGrid {
    pub tile_w: usize,
    pub tile_w_align: usize,
    pub tile_h_luma: usize,
    pub tile_h_chroma: usize,
    /// Bytes of the luma tile area, padded to a tile group
    pub luma_size: usize,
}

impl TileGrid {
    pub fn new(width: usize, height: usize) -> Self {
        let tile_w = (width.max(1) - 1) / TILE_WIDTH + 1;
        let tile_w_align = (tile_w + 1) & !1;
        let tile_h_luma = (height.max(1) - 1) / TILE_HEIGHT + 1;
        let tile_h_chroma = ((height / 2).max(1) - 1) / TILE_HEIGHT + 1;

        let mut luma_size = tile_w_align * tile_h_luma * TILE_SIZE;
        if luma_size % TILE_GROUP_SIZE != 0 {
            luma_size = ((luma_size - 1) / TILE_GROUP_SIZE + 1) * TILE_GROUP_SIZE;
        }

        Self {
            tile_w,
            tile_w_align,
            tile_h_luma,
            tile_h_chroma,
            luma_size,
        }
    }
}

/// Crop rectangle reported by the device, inclusive right/bottom edges
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Crop {
    pub left: u32,
    pub right: u32,
    pub top: u32,
    pub bottom: u32,
}

impl Crop {
    /// Visible size after applying the crop to the coded size
    pub fn apply(&self, width: u32, height: u32) -> (u32, u32) {
        let mut width = width;
        let mut height = height;

        if self.bottom != 0 {
            height = self.bottom + 1;
        }
        if self.top != 0 {
            height = height.saturating_sub(self.top);
        }
        if self.right != 0 {
            width = self.right + 1;
        }
        if self.left != 0 {
            width = width.saturating_sub(self.left);
        }

        (width, height)
    }
}

/// Layout of a decoded frame inside a device output slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ColorFormatInfo {
    pub color_format: i32,
    /// Visible width
    pub width: u32,
    /// Visible height
    pub height: u32,
    pub stride: u32,
    pub slice_height: u32,
    pub crop: Crop,
    /// Bytes the device uses for one frame
    pub frame_size: usize,
}

impl ColorFormatInfo {
    /// Derive the layout, applying known per-vendor workarounds
    pub fn new(
        codec_name: &str,
        color_format: i32,
        width: u32,
        height: u32,
        stride: u32,
        slice_height: u32,
        crop: Crop,
    ) -> DecoderResult<Self> {
        let mut color_format = color_format;
        let mut stride = stride;
        let mut slice_height = slice_height;

        if color_format == cf::YCBYCR && codec_name == quirks::HISILICON_AVC {
            color_format = cf::YUV420_SEMI_PLANAR;
        }
        if codec_name.starts_with(quirks::SAMSUNG_PREFIX) {
            stride = width;
        }
        if codec_name == quirks::HISILICON_AVC {
            stride = width;
            slice_height = height;
        }
        if slice_height == 0 && codec_name.starts_with(quirks::NVIDIA_PREFIX) {
            slice_height = round_up_32(height);
        }

        if width == 0 || height == 0 {
            return Err(DecoderError::InvalidFormat(
                "width or height is 0".to_string(),
            ));
        }

        let (w, h) = (width as usize, height as usize);
        let (s, sh) = (stride as usize, slice_height as usize);
        let needs_stride = || {
            if s == 0 || sh == 0 {
                Err(DecoderError::InvalidFormat(
                    "stride or slice height is 0".to_string(),
                ))
            } else {
                Ok(())
            }
        };

        let frame_size = match color_format {
            cf::YUV420_PLANAR => {
                needs_stride()?;
                s * sh + 2 * ((s + 1) / 2 * (sh + 1) / 2)
            }
            cf::TI_YUV420_PACKED_SEMI_PLANAR | cf::TI_YUV420_PACKED_SEMI_PLANAR_INTERLACED => {
                needs_stride()?;
                s * (sh - (crop.top as usize / 2).min(sh)) + round_up_2(s) * sh.div_ceil(2)
            }
            cf::YUV420_SEMI_PLANAR
            | cf::QCOM_YUV420_SEMI_PLANAR
            | cf::QCOM_YVU420_SEMI_PLANAR_32M
            | cf::QCOM_YVU420_SEMI_PLANAR_32M_MULTIVIEW
            | cf::QCOM_YUV420_SEMI_PLANAR_UBWC => {
                needs_stride()?;
                s * sh + s * sh.div_ceil(2)
            }
            cf::QCOM_YUV420_PACKED_SEMI_PLANAR_64X32_TILE2M8KA | cf::EXYNOS_NV12_TILED => {
                let grid = TileGrid::new(w, h);
                tile_pos(grid.tile_w, grid.tile_h_luma, grid.tile_w_align, grid.tile_h_luma)
                    * TILE_SIZE
            }
            other => return Err(DecoderError::UnsupportedColorFormat(other)),
        };

        Ok(Self {
            color_format,
            width,
            height,
            stride,
            slice_height,
            crop,
            frame_size,
        })
    }

    /// Derive the output layout and video format from a device output format
    ///
    /// Missing stride and slice height default to the coded width and
    /// height.
    pub fn from_output_format(
        codec_name: &str,
        format: &CodecFormat,
    ) -> DecoderResult<(Self, VideoFormat)> {
        let get = |key: &str| format.get_int(key).unwrap_or(0).max(0) as u32;

        let color_format = format.get_int(format_key::COLOR_FORMAT).unwrap_or(0);
        let coded_width = get(format_key::WIDTH);
        let coded_height = get(format_key::HEIGHT);
        if color_format == 0 || coded_width == 0 || coded_height == 0 {
            return Err(DecoderError::InvalidFormat(format!(
                "incomplete output format: {}",
                format
            )));
        }

        let stride = format
            .get_int(format_key::STRIDE)
            .map(|v| v.max(0) as u32)
            .unwrap_or(coded_width);
        let slice_height = format
            .get_int(format_key::SLICE_HEIGHT)
            .map(|v| v.max(0) as u32)
            .unwrap_or(coded_height);

        let crop = Crop {
            left: get(format_key::CROP_LEFT),
            right: get(format_key::CROP_RIGHT),
            top: get(format_key::CROP_TOP),
            bottom: get(format_key::CROP_BOTTOM),
        };
        let (width, height) = crop.apply(coded_width, coded_height);

        let info = Self::new(
            codec_name,
            color_format,
            width,
            height,
            stride,
            slice_height,
            crop,
        )?;
        let video_format = VideoFormat::from_color_format(info.color_format)
            .ok_or(DecoderError::UnsupportedColorFormat(info.color_format))?;

        Ok((info, video_format))
    }
}

/// One plane of a downstream frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PlaneLayout {
    pub offset: usize,
    pub stride: usize,
    pub height: usize,
}

/// Layout of a downstream frame buffer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VideoInfo {
    pub format: VideoFormat,
    pub width: u32,
    pub height: u32,
    pub planes: Vec<PlaneLayout>,
    pub size: usize,
}

impl VideoInfo {
    /// Default packed layout with rows aligned to 4 bytes
    pub fn new(format: VideoFormat, width: u32, height: u32) -> Self {
        let w = width as usize;
        let h = height as usize;
        let chroma_h = h.div_ceil(2);

        let dims: Vec<(usize, usize)> = match format {
            VideoFormat::I420 | VideoFormat::Yv12 => {
                let cstride = round_up_4(round_up_2(w) / 2);
                vec![(round_up_4(w), h), (cstride, chroma_h), (cstride, chroma_h)]
            }
            VideoFormat::Nv12 | VideoFormat::Nv21 => {
                let stride = round_up_4(w);
                vec![(stride, h), (stride, chroma_h)]
            }
            VideoFormat::Uyvy | VideoFormat::Rgb16 => vec![(round_up_4(w * 2), h)],
            VideoFormat::Argb | VideoFormat::Rgba => vec![(w * 4, h)],
        };

        let mut offset = 0;
        let planes = dims
            .into_iter()
            .map(|(stride, height)| {
                let plane = PlaneLayout {
                    offset,
                    stride,
                    height,
                };
                offset += stride * height;
                plane
            })
            .collect();

        Self {
            format,
            width,
            height,
            planes,
            size: offset,
        }
    }

    /// Plane holding a color component
    ///
    /// Components are Y, U, V in that order. Semi-planar formats keep U
    /// and V together in plane 1.
    pub fn component_plane(&self, component: usize) -> Option<&PlaneLayout> {
        let plane = match (self.format, component) {
            (VideoFormat::Yv12, 1) => 2,
            (VideoFormat::Yv12, 2) => 1,
            (VideoFormat::Nv12 | VideoFormat::Nv21, 2) => 1,
            (_, c) => c,
        };
        self.planes.get(plane)
    }
}

pub fn round_up_2(v: usize) -> usize {
    (v + 1) & !1
}

pub fn round_up_4(v: usize) -> usize {
    (v + 3) & !3
}

pub fn round_up_32(v: u32) -> u32 {
    (v + 31) & !31
}
