// SPDX-License-Identifier: GPL-3.0-only

//! Decoder-wide constants

use std::time::Duration;

/// Input buffers are sized to a multiple of this
pub const DEC_ALIGNMENT_BYTES: usize = 4096;

/// Default input slot dequeue timeout
pub const INPUT_DEQUEUE_TIMEOUT: Duration = Duration::from_millis(100);

/// Consecutive input try-agains tolerated while waiting for a segment
pub const INPUT_MAX_TIMEOUTS: u32 = 10;

/// Output dequeue timeout before the device reported its buffers
pub const OUTPUT_TIMEOUT_INITIAL: Duration = Duration::from_micros(1_000);

/// Output dequeue timeout once the device is warmed up
pub const OUTPUT_TIMEOUT: Duration = Duration::from_micros(10_000);

/// How long EOS handling waits for output caps
pub const WAIT_FOR_SRC_CAPS: Duration = Duration::from_millis(100);

/// Upper bound on the drain handshake
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Pending frames older than this behind a matched frame are dropped
pub const STALE_FRAME_MAX_AGE: Duration = Duration::from_secs(5);

/// Pending frames this many frames behind a matched frame are dropped
pub const STALE_FRAME_MAX_DISTANCE: u64 = 100;

pub const NSECONDS_PER_USECOND: u64 = 1_000;

/// Name of the reaper thread
pub const REAPER_THREAD_NAME: &str = "amc-output-loop";

/// Buffer info flags, as defined by the Android media codec API
pub mod buffer_flags {
    pub const SYNC_FRAME: u32 = 1;
    pub const CODEC_CONFIG: u32 = 2;
    pub const END_OF_STREAM: u32 = 4;
}

/// Android color format identifiers
pub mod color_format {
    pub const FORMAT_16BIT_RGB565: i32 = 6;
    pub const FORMAT_25BIT_ARGB1888: i32 = 10;
    pub const YUV420_PLANAR: i32 = 19;
    pub const YUV420_PACKED_PLANAR: i32 = 20;
    pub const YUV420_SEMI_PLANAR: i32 = 21;
    pub const YCBYCR: i32 = 25;
    pub const CBYCRY: i32 = 27;
    pub const YUV420_PACKED_SEMI_PLANAR: i32 = 39;
    /// Vendor semi-planar layouts without symbolic names
    pub const VENDOR_SEMI_PLANAR_256: i32 = 256;
    pub const VENDOR_SEMI_PLANAR_261: i32 = 261;
    pub const VENDOR_SEMI_PLANAR_263: i32 = 263;
    pub const YUV420_FLEXIBLE: i32 = 0x7F42_0888;
    pub const ANDROID_OPAQUE: i32 = 0x7F00_0789;
    pub const TI_YUV420_PACKED_SEMI_PLANAR: i32 = 0x7F00_0100;
    pub const TI_YUV420_PACKED_SEMI_PLANAR_INTERLACED: i32 = 0x7F00_0001;
    pub const QCOM_YUV420_SEMI_PLANAR: i32 = 0x7FA3_0C00;
    pub const QCOM_YUV420_PACKED_SEMI_PLANAR_64X32_TILE2M8KA: i32 = 0x7FA3_0C03;
    pub const QCOM_YVU420_SEMI_PLANAR_32M: i32 = 0x7FA3_0C04;
    pub const QCOM_YVU420_SEMI_PLANAR_32M_MULTIVIEW: i32 = 0x7FA3_0C05;
    pub const QCOM_YUV420_SEMI_PLANAR_UBWC: i32 = 0x7FA3_0C06;
    pub const EXYNOS_NV12_TILED: i32 = 0x7FC0_0002;
}

/// Keys of the codec format descriptor
pub mod format_key {
    pub const MIME: &str = "mime";
    pub const WIDTH: &str = "width";
    pub const HEIGHT: &str = "height";
    pub const MAX_INPUT_SIZE: &str = "max-input-size";
    pub const COLOR_FORMAT: &str = "color-format";
    pub const STRIDE: &str = "stride";
    pub const SLICE_HEIGHT: &str = "slice-height";
    pub const CROP_LEFT: &str = "crop-left";
    pub const CROP_RIGHT: &str = "crop-right";
    pub const CROP_TOP: &str = "crop-top";
    pub const CROP_BOTTOM: &str = "crop-bottom";
    pub const CODEC_DATA: &str = "csd-0";
}

/// Codec name prefixes that need geometry workarounds
pub mod quirks {
    /// Reports a bogus stride; the real stride equals the width
    pub const SAMSUNG_PREFIX: &str = "OMX.SEC.";
    /// Reports bogus stride and slice height, and mislabels NV12 as YCbYCr
    pub const HISILICON_AVC: &str = "OMX.k3.video.decoder.avc";
    /// Reports slice height 0, real value is the height aligned to 32
    pub const NVIDIA_PREFIX: &str = "OMX.Nvidia.";
}
