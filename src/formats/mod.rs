// SPDX-License-Identifier: GPL-3.0-only

//! Pixel formats, frame layouts and stream formats

pub mod caps;
pub mod color;
pub mod copy;
pub mod layout;

pub use caps::StreamFormat;
pub use color::VideoFormat;
pub use copy::{FillMode, fill_frame};
pub use layout::{ColorFormatInfo, Crop, VideoInfo};
