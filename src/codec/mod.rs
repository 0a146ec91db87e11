// SPDX-License-Identifier: GPL-3.0-only

//! Codec device abstraction
//!
//! A codec device is one hardware decoder instance reached through the
//! platform media codec API. The decoder only talks to it through the
//! [`CodecDevice`] trait:
//!
//! ```text
//! caller thread                     reaper thread
//!   dequeue_input ──► slot            dequeue_output ──► Buffer | FormatChanged
//!   copy payload                                         | BuffersChanged | TryAgain
//!   queue_input(slot, info)           release_output(slot, render)
//! ```
//!
//! Devices are internally synchronized. Blocking dequeues are called
//! without any decoder lock held, so a device must accept calls from the
//! caller and reaper threads at the same time.

pub mod buffers;
pub mod registry;
pub mod simulated;

use crate::constants::{buffer_flags, format_key};
use crate::errors::DeviceError;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

pub use buffers::{BufferArena, DeviceBuffer, HeapBuffer, SlotMemory, SlotRef};
pub use registry::{CodecInfo, CodecRegistry, CodecType, ProfileLevel, StaticRegistry};

/// Raw result codes of the platform dequeue calls
pub const INFO_TRY_AGAIN_LATER: isize = -1;
pub const INFO_OUTPUT_FORMAT_CHANGED: isize = -2;
pub const INFO_OUTPUT_BUFFERS_CHANGED: isize = -3;

/// Per-transfer metadata for one slot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferInfo {
    pub offset: usize,
    pub size: usize,
    pub presentation_time_us: i64,
    pub flags: u32,
}

impl BufferInfo {
    /// Zero-size buffer carrying only the end-of-stream flag
    pub fn end_of_stream(presentation_time_us: i64) -> Self {
        Self {
            offset: 0,
            size: 0,
            presentation_time_us,
            flags: buffer_flags::END_OF_STREAM,
        }
    }

    pub fn is_sync_frame(&self) -> bool {
        self.flags & buffer_flags::SYNC_FRAME != 0
    }

    pub fn is_end_of_stream(&self) -> bool {
        self.flags & buffer_flags::END_OF_STREAM != 0
    }
}

/// Outcome of an input slot dequeue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputSlot {
    Slot(usize),
    TryAgain,
}

impl InputSlot {
    /// Interpret a raw platform dequeue result
    pub fn from_raw(index: isize) -> Result<Self, DeviceError> {
        match index {
            i if i >= 0 => Ok(InputSlot::Slot(i as usize)),
            INFO_TRY_AGAIN_LATER => Ok(InputSlot::TryAgain),
            other => Err(DeviceError::new(
                "dequeue_input",
                format!("unexpected result {}", other),
            )),
        }
    }
}

/// Outcome of an output slot dequeue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputEvent {
    /// A decoded buffer is ready in the given output slot
    Buffer { index: usize, info: BufferInfo },
    /// The output format changed, fetch it with `output_format`
    FormatChanged,
    /// The output buffer arrays were replaced
    BuffersChanged,
    /// Nothing available within the timeout
    TryAgain,
}

impl OutputEvent {
    /// Interpret a raw platform dequeue result
    pub fn from_raw(index: isize, info: BufferInfo) -> Result<Self, DeviceError> {
        match index {
            i if i >= 0 => Ok(OutputEvent::Buffer {
                index: i as usize,
                info,
            }),
            INFO_TRY_AGAIN_LATER => Ok(OutputEvent::TryAgain),
            INFO_OUTPUT_FORMAT_CHANGED => Ok(OutputEvent::FormatChanged),
            INFO_OUTPUT_BUFFERS_CHANGED => Ok(OutputEvent::BuffersChanged),
            other => Err(DeviceError::new(
                "dequeue_output",
                format!("unexpected result {}", other),
            )),
        }
    }
}

/// Value stored in a [`CodecFormat`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormatValue {
    Int(i32),
    Str(String),
    Bytes(Vec<u8>),
}

/// Key/value format descriptor exchanged with a device
///
/// Used both for the configuration handed to `configure` and for the
/// output format reported after a format-changed event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CodecFormat {
    values: BTreeMap<String, FormatValue>,
}

impl CodecFormat {
    /// Create a video format with the mandatory keys set
    pub fn video(mime: &str, width: u32, height: u32) -> Self {
        let mut format = Self::default();
        format.set_string(format_key::MIME, mime);
        format.set_int(format_key::WIDTH, width as i32);
        format.set_int(format_key::HEIGHT, height as i32);
        format
    }

    pub fn set_int(&mut self, key: &str, value: i32) {
        self.values.insert(key.to_string(), FormatValue::Int(value));
    }

    pub fn set_string(&mut self, key: &str, value: &str) {
        self.values
            .insert(key.to_string(), FormatValue::Str(value.to_string()));
    }

    pub fn set_bytes(&mut self, key: &str, value: &[u8]) {
        self.values
            .insert(key.to_string(), FormatValue::Bytes(value.to_vec()));
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn get_int(&self, key: &str) -> Option<i32> {
        match self.values.get(key) {
            Some(FormatValue::Int(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn get_string(&self, key: &str) -> Option<&str> {
        match self.values.get(key) {
            Some(FormatValue::Str(v)) => Some(v.as_str()),
            _ => None,
        }
    }

    pub fn get_bytes(&self, key: &str) -> Option<&[u8]> {
        match self.values.get(key) {
            Some(FormatValue::Bytes(v)) => Some(v.as_slice()),
            _ => None,
        }
    }

    pub fn mime(&self) -> Option<&str> {
        self.get_string(format_key::MIME)
    }
}

impl fmt::Display for CodecFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (key, value) in &self.values {
            if !first {
                f.write_str(", ")?;
            }
            first = false;
            match value {
                FormatValue::Int(v) => write!(f, "{}={}", key, v)?,
                FormatValue::Str(v) => write!(f, "{}={}", key, v)?,
                FormatValue::Bytes(v) => write!(f, "{}=<{} bytes>", key, v.len())?,
            }
        }
        Ok(())
    }
}

/// Opaque handle of a display surface the device may render into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceHandle(pub u64);

/// One hardware codec instance
pub trait CodecDevice: Send + Sync {
    fn configure(
        &self,
        format: &CodecFormat,
        surface: Option<SurfaceHandle>,
        flags: u32,
    ) -> Result<(), DeviceError>;

    fn start(&self) -> Result<(), DeviceError>;

    fn stop(&self) -> Result<(), DeviceError>;

    /// Return all slots to the device and discard pending work
    fn flush(&self) -> Result<(), DeviceError>;

    fn release(&self) -> Result<(), DeviceError>;

    fn dequeue_input(&self, timeout: Duration) -> Result<InputSlot, DeviceError>;

    fn dequeue_output(&self, timeout: Duration) -> Result<OutputEvent, DeviceError>;

    fn queue_input(&self, index: usize, info: &BufferInfo) -> Result<(), DeviceError>;

    fn release_output(&self, index: usize, render: bool) -> Result<(), DeviceError>;

    fn input_buffers(&self) -> Result<Vec<DeviceBuffer>, DeviceError>;

    fn output_buffers(&self) -> Result<Vec<DeviceBuffer>, DeviceError>;

    fn output_format(&self) -> Result<CodecFormat, DeviceError>;
}

/// Creates codec devices by component name
pub trait CodecFactory: Send + Sync {
    fn create(&self, name: &str) -> Result<Arc<dyn CodecDevice>, DeviceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_event_from_raw() {
        let info = BufferInfo {
            size: 10,
            ..BufferInfo::default()
        };
        assert_eq!(
            OutputEvent::from_raw(3, info).unwrap(),
            OutputEvent::Buffer { index: 3, info }
        );
        assert_eq!(
            OutputEvent::from_raw(-2, info).unwrap(),
            OutputEvent::FormatChanged
        );
        assert_eq!(
            OutputEvent::from_raw(-3, info).unwrap(),
            OutputEvent::BuffersChanged
        );
        assert_eq!(OutputEvent::from_raw(-1, info).unwrap(), OutputEvent::TryAgain);
        assert!(OutputEvent::from_raw(-10000, info).is_err());
    }

    #[test]
    fn test_input_slot_from_raw() {
        assert_eq!(InputSlot::from_raw(0).unwrap(), InputSlot::Slot(0));
        assert_eq!(InputSlot::from_raw(-1).unwrap(), InputSlot::TryAgain);
        assert!(InputSlot::from_raw(-5).is_err());
    }

    #[test]
    fn test_format_accessors() {
        let mut format = CodecFormat::video("video/avc", 640, 480);
        format.set_bytes(format_key::CODEC_DATA, &[1, 2, 3]);
        assert_eq!(format.mime(), Some("video/avc"));
        assert_eq!(format.get_int(format_key::WIDTH), Some(640));
        assert_eq!(format.get_int(format_key::MIME), None);
        assert_eq!(format.get_bytes(format_key::CODEC_DATA), Some(&[1u8, 2, 3][..]));
        assert_eq!(
            format.to_string(),
            "csd-0=<3 bytes>, height=480, mime=video/avc, width=640"
        );
    }

    #[test]
    fn test_end_of_stream_info() {
        let info = BufferInfo::end_of_stream(42);
        assert!(info.is_end_of_stream());
        assert!(!info.is_sync_frame());
        assert_eq!(info.size, 0);
    }
}
