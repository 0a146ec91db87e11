// SPDX-License-Identifier: GPL-3.0-only

//! Error types and flow status for the decoder

use std::fmt;

/// Result type alias using DecoderError
pub type DecoderResult<T> = Result<T, DecoderError>;

/// Decoder error type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecoderError {
    /// The codec device could not be created or opened
    DeviceUnavailable(String),
    /// Device configure/start or buffer retrieval failed
    ConfigurationFailed(String),
    /// Dequeueing an input or output slot failed
    DequeueFailed(String),
    /// Submitting an input slot failed
    QueueFailed(String),
    /// Returning an output slot to the device failed
    ReleaseFailed(String),
    /// Bounded wait expired
    Timeout(String),
    /// The decoder is flushing or shutting down
    Flushing,
    /// The device produced a color format we cannot copy
    UnsupportedColorFormat(i32),
    /// The device returned an index outside the current buffer arrays
    InvalidBufferIndex { index: usize, len: usize },
    /// End-of-stream handshake could not be performed
    DrainFailed(String),
    /// Operation not valid in the current lifecycle state
    InvalidState(String),
    /// Input or output format description is unusable
    InvalidFormat(String),
    /// A source or destination buffer is smaller than the layout needs
    BufferTooSmall { needed: usize, available: usize },
    /// Downstream refused further data
    Flow(FlowStatus),
    /// Configuration errors
    Config(String),
}

impl DecoderError {
    /// Flow status recorded when this error terminates a stream operation
    pub fn flow_status(&self) -> FlowStatus {
        match self {
            DecoderError::Flushing => FlowStatus::Flushing,
            DecoderError::UnsupportedColorFormat(_)
            | DecoderError::InvalidFormat(_)
            | DecoderError::BufferTooSmall { .. } => FlowStatus::NotNegotiated,
            DecoderError::InvalidState(_) => FlowStatus::NotNegotiated,
            DecoderError::Flow(flow) => *flow,
            _ => FlowStatus::Error,
        }
    }

    /// Whether this error is an expected shutdown condition
    pub fn is_flushing(&self) -> bool {
        self.flow_status() == FlowStatus::Flushing
    }
}

impl fmt::Display for DecoderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecoderError::DeviceUnavailable(msg) => write!(f, "Codec device unavailable: {}", msg),
            DecoderError::ConfigurationFailed(msg) => write!(f, "Configuration failed: {}", msg),
            DecoderError::DequeueFailed(msg) => write!(f, "Failed to dequeue buffer: {}", msg),
            DecoderError::QueueFailed(msg) => write!(f, "Failed to queue input buffer: {}", msg),
            DecoderError::ReleaseFailed(msg) => {
                write!(f, "Failed to release output buffer: {}", msg)
            }
            DecoderError::Timeout(msg) => write!(f, "Timed out: {}", msg),
            DecoderError::Flushing => write!(f, "Decoder is flushing"),
            DecoderError::UnsupportedColorFormat(format) => {
                write!(f, "Unsupported color format {} (0x{:08x})", format, format)
            }
            DecoderError::InvalidBufferIndex { index, len } => {
                write!(f, "Invalid buffer index {} of {}", index, len)
            }
            DecoderError::DrainFailed(msg) => write!(f, "Drain failed: {}", msg),
            DecoderError::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
            DecoderError::InvalidFormat(msg) => write!(f, "Invalid format: {}", msg),
            DecoderError::BufferTooSmall { needed, available } => write!(
                f,
                "Buffer too small: need {} bytes, have {}",
                needed, available
            ),
            DecoderError::Flow(flow) => write!(f, "Downstream flow {}", flow),
            DecoderError::Config(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl std::error::Error for DecoderError {}

/// Error reported by a codec device implementation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceError {
    /// Device call that failed
    pub operation: &'static str,
    /// Device-specific detail
    pub message: String,
}

impl DeviceError {
    pub fn new(operation: &'static str, message: impl Into<String>) -> Self {
        Self {
            operation,
            message: message.into(),
        }
    }
}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.operation, self.message)
    }
}

impl std::error::Error for DeviceError {}

impl From<std::io::Error> for DecoderError {
    fn from(err: std::io::Error) -> Self {
        DecoderError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for DecoderError {
    fn from(err: serde_json::Error) -> Self {
        DecoderError::Config(err.to_string())
    }
}

/// Stream flow state shared by the input and output paths
///
/// Mirrors the flow returns of the hosting pipeline. Anything other than
/// `Ok` stops normal operation on both sides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlowStatus {
    #[default]
    Ok,
    /// End of stream reached
    Eos,
    /// Shutting down or flushing
    Flushing,
    /// Format could not be negotiated or processed
    NotNegotiated,
    /// Downstream is not connected
    NotLinked,
    /// Fatal stream error
    Error,
}

impl FlowStatus {
    pub fn is_ok(self) -> bool {
        self == FlowStatus::Ok
    }

    /// Errors that must be reported to the application rather than
    /// silently ending the stream
    pub fn is_fatal(self) -> bool {
        matches!(
            self,
            FlowStatus::Error | FlowStatus::NotNegotiated | FlowStatus::NotLinked
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            FlowStatus::Ok => "ok",
            FlowStatus::Eos => "eos",
            FlowStatus::Flushing => "flushing",
            FlowStatus::NotNegotiated => "not-negotiated",
            FlowStatus::NotLinked => "not-linked",
            FlowStatus::Error => "error",
        }
    }
}

impl fmt::Display for FlowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flow_status_mapping() {
        assert_eq!(DecoderError::Flushing.flow_status(), FlowStatus::Flushing);
        assert_eq!(
            DecoderError::UnsupportedColorFormat(42).flow_status(),
            FlowStatus::NotNegotiated
        );
        assert_eq!(
            DecoderError::InvalidBufferIndex { index: 9, len: 4 }.flow_status(),
            FlowStatus::Error
        );
        assert_eq!(
            DecoderError::QueueFailed("boom".into()).flow_status(),
            FlowStatus::Error
        );
        assert_eq!(
            DecoderError::Flow(FlowStatus::NotLinked).flow_status(),
            FlowStatus::NotLinked
        );
        assert!(DecoderError::Flow(FlowStatus::Flushing).is_flushing());
    }

    #[test]
    fn test_fatal_statuses() {
        assert!(!FlowStatus::Ok.is_fatal());
        assert!(!FlowStatus::Eos.is_fatal());
        assert!(!FlowStatus::Flushing.is_fatal());
        assert!(FlowStatus::Error.is_fatal());
        assert!(FlowStatus::NotLinked.is_fatal());
    }

    #[test]
    fn test_display() {
        let err = DecoderError::UnsupportedColorFormat(0x7FA30C03);
        assert_eq!(
            err.to_string(),
            "Unsupported color format 2141391875 (0x7fa30c03)"
        );
        assert_eq!(FlowStatus::NotNegotiated.to_string(), "not-negotiated");
    }
}
