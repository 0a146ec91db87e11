// SPDX-License-Identifier: GPL-3.0-only

//! Upstream stream formats and their device counterparts

use crate::codec::CodecFormat;
use crate::constants::format_key;
use crate::errors::{DecoderError, DecoderResult};
use serde::{Deserialize, Serialize};

/// Stream media types and the device MIME type they decode with
///
/// `video/mpeg` is resolved through the MPEG version separately.
pub const MEDIA_TYPES: [(&str, &str); 7] = [
    ("video/x-h263", "video/3gpp"),
    ("video/x-h264", "video/avc"),
    ("video/x-h265", "video/hevc"),
    ("video/x-vp8", "video/x-vnd.on2.vp8"),
    ("video/x-vp9", "video/x-vnd.on2.vp9"),
    ("video/x-divx", "video/mp4v-es"),
    ("video/x-wmv", "video/x-ms-wmv"),
];

/// Device MIME type for a stream media type
pub fn device_mime(media_type: &str, mpeg_version: Option<i32>) -> Option<&'static str> {
    if media_type == "video/mpeg" {
        return match mpeg_version? {
            4 => Some("video/mp4v-es"),
            1 | 2 => Some("video/mpeg2"),
            _ => None,
        };
    }
    MEDIA_TYPES
        .iter()
        .find(|(stream, _)| *stream == media_type)
        .map(|(_, mime)| *mime)
}

/// Stream media types a device MIME type can accept
pub fn media_types_for_mime(mime: &str) -> Vec<&'static str> {
    let mut types: Vec<&'static str> = MEDIA_TYPES
        .iter()
        .filter(|(_, m)| m.eq_ignore_ascii_case(mime))
        .map(|(stream, _)| *stream)
        .collect();
    if mime.eq_ignore_ascii_case("video/mp4v-es") || mime.eq_ignore_ascii_case("video/mpeg2") {
        types.push("video/mpeg");
    }
    types
}

/// Round a requested input size up to the device's access alignment
pub fn align_input_size(size: usize, alignment: usize) -> usize {
    if alignment == 0 {
        return size;
    }
    size.div_ceil(alignment) * alignment
}

/// Format of the compressed stream delivered upstream
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StreamFormat {
    /// Stream media type, e.g. `video/x-h264`
    pub media_type: String,
    #[serde(default)]
    pub mpeg_version: Option<i32>,
    pub width: u32,
    pub height: u32,
    /// Upper bound of one compressed frame, if known
    #[serde(default)]
    pub max_input_size: Option<usize>,
    #[serde(default)]
    pub framerate: Option<(i32, i32)>,
    /// Out-of-band codec configuration (SPS/PPS and similar)
    #[serde(default)]
    pub codec_data: Option<Vec<u8>>,
}

impl StreamFormat {
    pub fn new(media_type: &str, width: u32, height: u32) -> Self {
        Self {
            media_type: media_type.to_string(),
            width,
            height,
            ..Self::default()
        }
    }

    pub fn with_codec_data(mut self, data: &[u8]) -> Self {
        self.codec_data = Some(data.to_vec());
        self
    }

    pub fn with_max_input_size(mut self, size: usize) -> Self {
        self.max_input_size = Some(size);
        self
    }

    pub fn with_framerate(mut self, num: i32, den: i32) -> Self {
        self.framerate = Some((num, den));
        self
    }

    pub fn device_mime(&self) -> DecoderResult<&'static str> {
        device_mime(&self.media_type, self.mpeg_version).ok_or_else(|| {
            DecoderError::InvalidFormat(format!("no codec MIME for {}", self.media_type))
        })
    }

    /// Whether switching from `self` to `other` needs a device restart
    ///
    /// Resolution and codec data matter, framerate and the like do not.
    pub fn differs_materially(&self, other: &StreamFormat) -> bool {
        self.width != other.width
            || self.height != other.height
            || self.codec_data != other.codec_data
    }

    /// Format handed to the device's `configure`
    pub fn codec_format(&self, alignment: usize) -> DecoderResult<CodecFormat> {
        if self.width == 0 || self.height == 0 {
            return Err(DecoderError::InvalidFormat(
                "width or height is 0".to_string(),
            ));
        }
        let mut format = CodecFormat::video(self.device_mime()?, self.width, self.height);

        if let Some(size) = self.max_input_size.filter(|&s| s > 0) {
            let aligned = align_input_size(size, alignment);
            format.set_int(format_key::MAX_INPUT_SIZE, aligned as i32);
        }
        if let Some(data) = self.codec_data.as_deref() {
            format.set_bytes(format_key::CODEC_DATA, data);
        }
        Ok(format)
    }
}
