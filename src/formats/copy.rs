// SPDX-License-Identifier: GPL-3.0-only

//! Copy decoded pixels out of a device output slot
//!
//! Devices pad their frames (stride, slice height, crop) and some use vendor
//! layouts. The copy strips the padding and applies the crop by moving the
//! source read position, producing the tightly packed layout described by
//! [`VideoInfo`].
//!
//! ```text
//! device slot (NV12)                     downstream (NV12)
//! ┌──────────── stride ────────────┐     ┌──── width ────┐
//! │ crop_top rows                  │     │ Y             │
//! │   ┌──── width ────┐            │ ──► │               │
//! │   │ Y             │  padding   │     ├───────────────┤
//! │   └───────────────┘            │     │ UV            │
//! ├── slice_height ────────────────┤     └───────────────┘
//! │   UV (half height)             │
//! └────────────────────────────────┘
//! ```

use super::layout::{
    ColorFormatInfo, TILE_HEIGHT, TILE_SIZE, TILE_WIDTH, TileGrid, VideoInfo, round_up_2, tile_pos,
};
use crate::codec::BufferInfo;
use crate::constants::color_format as cf;
use crate::errors::{DecoderError, DecoderResult};
use tracing::{debug, trace};

/// How a fill was performed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillMode {
    /// Sizes matched, one contiguous copy
    Contiguous,
    /// Plane by plane copy honoring stride and crop
    Planes,
    /// Tiled layout converted to linear
    Detiled,
}

/// Copy the frame in `slot` described by `info` into `dest`
pub fn fill_frame(
    color: &ColorFormatInfo,
    slot: &[u8],
    info: &BufferInfo,
    dest: &mut [u8],
    dest_info: &VideoInfo,
) -> DecoderResult<FillMode> {
    let src = slot.get(info.offset..).ok_or(DecoderError::BufferTooSmall {
        needed: info.offset,
        available: slot.len(),
    })?;

    if info.size == dest.len() {
        if src.len() < info.size {
            return Err(DecoderError::BufferTooSmall {
                needed: info.size,
                available: src.len(),
            });
        }
        trace!(size = info.size, "Contiguous copy");
        dest.copy_from_slice(&src[..info.size]);
        return Ok(FillMode::Contiguous);
    }

    debug!(
        color_format = color.color_format,
        size = info.size,
        dest_size = dest.len(),
        "Line by line copy"
    );

    match color.color_format {
        cf::YUV420_PLANAR => {
            copy_planar(color, src, dest, dest_info)?;
            Ok(FillMode::Planes)
        }
        cf::TI_YUV420_PACKED_SEMI_PLANAR | cf::TI_YUV420_PACKED_SEMI_PLANAR_INTERLACED => {
            copy_ti_semi_planar(color, src, dest, dest_info)?;
            Ok(FillMode::Planes)
        }
        cf::YUV420_SEMI_PLANAR
        | cf::QCOM_YUV420_SEMI_PLANAR
        | cf::QCOM_YVU420_SEMI_PLANAR_32M
        | cf::QCOM_YVU420_SEMI_PLANAR_32M_MULTIVIEW
        | cf::QCOM_YUV420_SEMI_PLANAR_UBWC => {
            copy_semi_planar(color, src, dest, dest_info)?;
            Ok(FillMode::Planes)
        }
        cf::QCOM_YUV420_PACKED_SEMI_PLANAR_64X32_TILE2M8KA | cf::EXYNOS_NV12_TILED => {
            copy_tiled(color, src, dest, dest_info)?;
            Ok(FillMode::Detiled)
        }
        other => Err(DecoderError::UnsupportedColorFormat(other)),
    }
}

/// Source and destination geometry of one plane copy
struct PlaneCopy {
    src_offset: usize,
    src_stride: usize,
    dest_offset: usize,
    dest_stride: usize,
    row_length: usize,
    rows: usize,
}

fn copy_rows(src: &[u8], dest: &mut [u8], p: &PlaneCopy) -> DecoderResult<()> {
    for row in 0..p.rows {
        let s = p.src_offset + row * p.src_stride;
        let d = p.dest_offset + row * p.dest_stride;
        copy_span(src, s, dest, d, p.row_length)?;
    }
    Ok(())
}

fn copy_span(src: &[u8], s: usize, dest: &mut [u8], d: usize, len: usize) -> DecoderResult<()> {
    if s + len > src.len() {
        return Err(DecoderError::BufferTooSmall {
            needed: s + len,
            available: src.len(),
        });
    }
    if d + len > dest.len() {
        return Err(DecoderError::BufferTooSmall {
            needed: d + len,
            available: dest.len(),
        });
    }
    dest[d..d + len].copy_from_slice(&src[s..s + len]);
    Ok(())
}

fn require_stride(color: &ColorFormatInfo) -> DecoderResult<(usize, usize)> {
    if color.stride == 0 || color.slice_height == 0 {
        return Err(DecoderError::InvalidFormat(
            "stride or slice height not set".to_string(),
        ));
    }
    Ok((color.stride as usize, color.slice_height as usize))
}

fn dest_plane(dest_info: &VideoInfo, component: usize) -> DecoderResult<(usize, usize, usize)> {
    dest_info
        .component_plane(component)
        .map(|p| (p.offset, p.stride, p.height))
        .ok_or_else(|| {
            DecoderError::InvalidFormat(format!(
                "{} has no plane for component {}",
                dest_info.format, component
            ))
        })
}

/// I420 with chroma planes at half the luma stride
fn copy_planar(
    color: &ColorFormatInfo,
    src: &[u8],
    dest: &mut [u8],
    dest_info: &VideoInfo,
) -> DecoderResult<()> {
    let (stride, slice_height) = require_stride(color)?;
    let width = color.width as usize;
    let crop_top = color.crop.top as usize;
    let crop_left = color.crop.left as usize;
    let chroma_stride = stride.div_ceil(2);

    for component in 0..3 {
        let (dest_offset, dest_stride, rows) = dest_plane(dest_info, component)?;
        let plane = if component == 0 {
            PlaneCopy {
                src_offset: crop_top * stride + crop_left,
                src_stride: stride,
                dest_offset,
                dest_stride,
                row_length: width,
                rows,
            }
        } else {
            let mut src_offset =
                slice_height * stride + crop_top / 2 * chroma_stride + crop_left / 2;
            if component == 2 {
                src_offset += slice_height.div_ceil(2) * chroma_stride;
            }
            PlaneCopy {
                src_offset,
                src_stride: chroma_stride,
                dest_offset,
                dest_stride,
                row_length: width.div_ceil(2),
                rows,
            }
        };
        copy_rows(src, dest, &plane)?;
    }
    Ok(())
}

/// TI packed semi-planar, chroma starts early by half the top crop
fn copy_ti_semi_planar(
    color: &ColorFormatInfo,
    src: &[u8],
    dest: &mut [u8],
    dest_info: &VideoInfo,
) -> DecoderResult<()> {
    let (stride, slice_height) = require_stride(color)?;
    let width = color.width as usize;
    let crop_top = color.crop.top as usize;

    let (dest_offset, dest_stride, rows) = dest_plane(dest_info, 0)?;
    copy_rows(
        src,
        dest,
        &PlaneCopy {
            src_offset: 0,
            src_stride: stride,
            dest_offset,
            dest_stride,
            row_length: width,
            rows,
        },
    )?;

    let (dest_offset, dest_stride, rows) = dest_plane(dest_info, 1)?;
    copy_rows(
        src,
        dest,
        &PlaneCopy {
            src_offset: slice_height.saturating_sub(crop_top / 2) * stride,
            src_stride: round_up_2(stride),
            dest_offset,
            dest_stride,
            row_length: round_up_2(width).min(dest_stride),
            rows,
        },
    )
}

/// NV12 family, both planes share the luma stride
fn copy_semi_planar(
    color: &ColorFormatInfo,
    src: &[u8],
    dest: &mut [u8],
    dest_info: &VideoInfo,
) -> DecoderResult<()> {
    let (stride, slice_height) = require_stride(color)?;
    let width = color.width as usize;
    let crop_top = color.crop.top as usize;
    let crop_left = color.crop.left as usize;

    let (dest_offset, dest_stride, rows) = dest_plane(dest_info, 0)?;
    copy_rows(
        src,
        dest,
        &PlaneCopy {
            src_offset: crop_top * stride + crop_left,
            src_stride: stride,
            dest_offset,
            dest_stride,
            row_length: width,
            rows,
        },
    )?;

    // Chroma rows cover two luma rows each
    let (dest_offset, dest_stride, rows) = dest_plane(dest_info, 1)?;
    copy_rows(
        src,
        dest,
        &PlaneCopy {
            src_offset: slice_height * stride + crop_top / 2 * stride + crop_left,
            src_stride: stride,
            dest_offset,
            dest_stride,
            row_length: width,
            rows,
        },
    )
}

/// 64x32 tiled NV12 to linear NV12
fn copy_tiled(
    color: &ColorFormatInfo,
    src: &[u8],
    dest: &mut [u8],
    dest_info: &VideoInfo,
) -> DecoderResult<()> {
    let width = color.width as usize;
    let mut height = color.height as usize;
    let grid = TileGrid::new(width, height);

    let (luma_base, luma_stride, _) = dest_plane(dest_info, 0)?;
    let (chroma_base, chroma_stride, _) = dest_plane(dest_info, 1)?;

    for y in 0..grid.tile_h_luma {
        let mut row_width = width;

        for x in 0..grid.tile_w {
            let mut src_luma = tile_pos(x, y, grid.tile_w_align, grid.tile_h_luma) * TILE_SIZE;
            let mut src_chroma = grid.luma_size
                + tile_pos(x, y / 2, grid.tile_w_align, grid.tile_h_chroma) * TILE_SIZE;
            if y & 1 != 0 {
                src_chroma += TILE_SIZE / 2;
            }

            let tile_width = row_width.min(TILE_WIDTH);
            let tile_height = height.min(TILE_HEIGHT);

            let mut luma_idx = luma_base + y * TILE_HEIGHT * luma_stride + x * TILE_WIDTH;
            let mut chroma_idx = chroma_base + y * TILE_HEIGHT / 2 * chroma_stride + x * TILE_WIDTH;

            // Two luma rows per chroma row
            for _ in 0..tile_height / 2 {
                copy_span(src, src_luma, dest, luma_idx, tile_width)?;
                src_luma += TILE_WIDTH;
                luma_idx += luma_stride;

                copy_span(src, src_luma, dest, luma_idx, tile_width)?;
                src_luma += TILE_WIDTH;
                luma_idx += luma_stride;

                copy_span(src, src_chroma, dest, chroma_idx, tile_width)?;
                src_chroma += TILE_WIDTH;
                chroma_idx += chroma_stride;
            }
            row_width = row_width.saturating_sub(TILE_WIDTH);
        }
        height = height.saturating_sub(TILE_HEIGHT);
    }
    Ok(())
}
