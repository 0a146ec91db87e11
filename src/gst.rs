// SPDX-License-Identifier: GPL-3.0-only

//! GStreamer interop
//!
//! Conversions between the decoder's types and GStreamer's, for hosting
//! the decoder inside a GStreamer video decoder element.

use crate::codec::CodecRegistry;
use crate::errors::{DecoderError, DecoderResult, FlowStatus};
use crate::formats::caps::media_types_for_mime;
use crate::formats::{StreamFormat, VideoFormat, VideoInfo};
use gstreamer as gst;
use gstreamer_video as gst_video;
use tracing::debug;

impl From<FlowStatus> for gst::FlowReturn {
    fn from(flow: FlowStatus) -> Self {
        match flow {
            FlowStatus::Ok => gst::FlowReturn::Ok,
            FlowStatus::Eos => gst::FlowReturn::Eos,
            FlowStatus::Flushing => gst::FlowReturn::Flushing,
            FlowStatus::NotNegotiated => gst::FlowReturn::NotNegotiated,
            FlowStatus::NotLinked => gst::FlowReturn::NotLinked,
            FlowStatus::Error => gst::FlowReturn::Error,
        }
    }
}

impl From<gst::FlowReturn> for FlowStatus {
    fn from(flow: gst::FlowReturn) -> Self {
        match flow {
            gst::FlowReturn::Ok
            | gst::FlowReturn::CustomSuccess
            | gst::FlowReturn::CustomSuccess1
            | gst::FlowReturn::CustomSuccess2 => FlowStatus::Ok,
            gst::FlowReturn::Eos => FlowStatus::Eos,
            gst::FlowReturn::Flushing => FlowStatus::Flushing,
            gst::FlowReturn::NotNegotiated => FlowStatus::NotNegotiated,
            gst::FlowReturn::NotLinked => FlowStatus::NotLinked,
            _ => FlowStatus::Error,
        }
    }
}

impl From<VideoFormat> for gst_video::VideoFormat {
    fn from(format: VideoFormat) -> Self {
        match format {
            VideoFormat::I420 => gst_video::VideoFormat::I420,
            VideoFormat::Yv12 => gst_video::VideoFormat::Yv12,
            VideoFormat::Nv12 => gst_video::VideoFormat::Nv12,
            VideoFormat::Nv21 => gst_video::VideoFormat::Nv21,
            VideoFormat::Uyvy => gst_video::VideoFormat::Uyvy,
            VideoFormat::Rgb16 => gst_video::VideoFormat::Rgb16,
            VideoFormat::Argb => gst_video::VideoFormat::Argb,
            VideoFormat::Rgba => gst_video::VideoFormat::Rgba,
        }
    }
}

/// Convert an optional nanosecond timestamp to a clock time
pub fn clock_time(ns: Option<u64>) -> Option<gst::ClockTime> {
    ns.map(gst::ClockTime::from_nseconds)
}

/// Convert an optional clock time to nanoseconds
pub fn nseconds(time: Option<gst::ClockTime>) -> Option<u64> {
    time.map(|t| t.nseconds())
}

/// Parse negotiated sink caps into a stream format
pub fn stream_format_from_caps(caps: &gst::CapsRef) -> DecoderResult<StreamFormat> {
    let structure = caps
        .structure(0)
        .ok_or_else(|| DecoderError::InvalidFormat("No structure in caps".to_string()))?;

    let media_type = structure.name().to_string();
    let width = structure
        .get::<i32>("width")
        .map_err(|_| DecoderError::InvalidFormat("No width in caps".to_string()))?;
    let height = structure
        .get::<i32>("height")
        .map_err(|_| DecoderError::InvalidFormat("No height in caps".to_string()))?;
    if width <= 0 || height <= 0 {
        return Err(DecoderError::InvalidFormat(format!(
            "invalid size {}x{} in caps",
            width, height
        )));
    }

    let mut format = StreamFormat::new(&media_type, width as u32, height as u32);
    format.mpeg_version = structure.get::<i32>("mpegversion").ok();
    if let Ok(framerate) = structure.get::<gst::Fraction>("framerate") {
        format.framerate = Some((framerate.numer(), framerate.denom()));
    }
    if let Ok(buffer) = structure.get::<gst::Buffer>("codec_data") {
        let map = buffer
            .map_readable()
            .map_err(|_| DecoderError::InvalidFormat("Failed to map codec data".to_string()))?;
        format.codec_data = Some(map.as_slice().to_vec());
    }

    // Reject media types without a device counterpart early
    format.device_mime()?;
    debug!(media_type = %format.media_type, width, height, "Parsed sink caps");
    Ok(format)
}

/// Caps describing a decoded frame layout
pub fn output_caps(info: &VideoInfo, framerate: Option<(i32, i32)>) -> DecoderResult<gst::Caps> {
    let mut builder = gst_video::VideoInfo::builder(info.format.into(), info.width, info.height);
    if let Some((num, den)) = framerate {
        builder = builder.fps(gst::Fraction::new(num, den));
    }
    let video_info = builder
        .build()
        .map_err(|e| DecoderError::InvalidFormat(e.to_string()))?;
    video_info
        .to_caps()
        .map_err(|e| DecoderError::InvalidFormat(e.to_string()))
}

/// Sink template caps for every stream type some registered decoder accepts
pub fn sink_template_caps(registry: &dyn CodecRegistry) -> gst::Caps {
    let mut caps = gst::Caps::new_empty();
    {
        let caps = caps.make_mut();
        for codec in registry.codecs().iter().filter(|c| !c.is_encoder) {
            for supported in &codec.supported_types {
                if !supported.accepts_color_formats(false) {
                    continue;
                }
                for media_type in media_types_for_mime(&supported.mime) {
                    let mut structure = gst::Structure::builder(media_type)
                        .field("width", gst::IntRange::new(16, 4096))
                        .field("height", gst::IntRange::new(16, 4096));
                    if media_type == "video/mpeg" {
                        let version = if supported.mime.eq_ignore_ascii_case("video/mp4v-es") {
                            4
                        } else {
                            2
                        };
                        structure = structure.field("mpegversion", version);
                    }
                    caps.merge_structure(structure.build());
                }
            }
        }
    }
    caps
}

/// Source template caps for every raw format some registered decoder outputs
pub fn src_template_caps(registry: &dyn CodecRegistry) -> gst::Caps {
    let mut formats: Vec<gst_video::VideoFormat> = Vec::new();
    for codec in registry.codecs().iter().filter(|c| !c.is_encoder) {
        for supported in &codec.supported_types {
            for format in supported
                .color_formats
                .iter()
                .filter_map(|&c| VideoFormat::from_color_format(c))
            {
                let format = format.into();
                if !formats.contains(&format) {
                    formats.push(format);
                }
            }
        }
    }

    if formats.is_empty() {
        return gst::Caps::new_empty();
    }
    gst_video::VideoCapsBuilder::new().format_list(formats).build()
}
