// SPDX-License-Identifier: GPL-3.0-only

//! Hardware video decoding through the platform media codec API
//!
//! This library drives one hardware decoder instance on behalf of a media
//! pipeline: compressed frames go in on the caller's thread, decoded
//! frames come out on a background output loop and are handed to a
//! [`DecoderSink`].
//!
//! # Architecture
//!
//! - [`codec`]: codec device abstraction, buffer arenas, capability
//!   registry and an in-process simulated device
//! - [`formats`]: color formats, output frame layouts, plane copies and
//!   stream format mapping
//! - [`decoder`]: the decoder state machine, input feeder, output loop
//!   and end-of-stream handshake
//! - [`config`]: tunable timeouts and thresholds
//! - [`errors`]: error and flow status types
//!
//! # Example
//!
//! ```ignore
//! let decoder = VideoDecoder::for_stream(&registry, &format, factory, sink, config)?;
//! decoder.open()?;
//! decoder.set_format(format)?;
//! for (payload, pts) in frames {
//!     decoder.deliver_frame(payload, Some(pts), Some(duration), false);
//! }
//! decoder.handle_eos();
//! decoder.close()?;
//! ```

pub mod codec;
pub mod config;
pub mod constants;
pub mod decoder;
pub mod errors;
pub mod formats;
#[cfg(feature = "gstreamer")]
pub mod gst;

// Re-export commonly used types
pub use codec::{CodecDevice, CodecFactory, CodecInfo, CodecRegistry, StaticRegistry};
pub use config::DecoderConfig;
pub use decoder::{
    DecoderSink, DecoderState, FormatOutcome, OutputBuffer, OutputState, StatsSnapshot,
    VideoCodecFrame, VideoDecoder,
};
pub use errors::{DecoderError, DecoderResult, FlowStatus};
pub use formats::{StreamFormat, VideoFormat, VideoInfo};
