// SPDX-License-Identifier: GPL-3.0-only

//! Decoder tuning knobs

use crate::constants;
use crate::errors::{DecoderError, DecoderResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Runtime configuration of a decoder instance
///
/// Serialized as JSON. Missing fields fall back to their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderConfig {
    /// Input slot dequeue timeout per attempt
    pub input_timeout_ms: u64,
    /// Consecutive input try-agains before failing while waiting for a segment
    pub input_max_timeouts: u32,
    /// Output dequeue timeout before the device reported its buffers
    pub output_timeout_initial_us: u64,
    /// Output dequeue timeout after the first buffers-changed event
    pub output_timeout_us: u64,
    /// Bound on the drain handshake wait
    pub drain_timeout_ms: u64,
    /// Input dequeue attempts when submitting the end-of-stream buffer
    pub drain_input_attempts: u32,
    /// Bound on waiting for output caps when handling end of stream
    pub src_caps_wait_ms: u64,
    /// Pending frames this much older than a matched frame are dropped
    pub stale_frame_max_age_ms: u64,
    /// Pending frames this many frames behind a matched frame are dropped
    pub stale_frame_max_distance: u64,
    /// Input buffer size alignment in bytes
    pub input_alignment: usize,
    /// Let surface-backed output buffers be rendered by the device
    pub hardware_rendering: bool,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            input_timeout_ms: constants::INPUT_DEQUEUE_TIMEOUT.as_millis() as u64,
            input_max_timeouts: constants::INPUT_MAX_TIMEOUTS,
            output_timeout_initial_us: constants::OUTPUT_TIMEOUT_INITIAL.as_micros() as u64,
            output_timeout_us: constants::OUTPUT_TIMEOUT.as_micros() as u64,
            drain_timeout_ms: constants::DRAIN_TIMEOUT.as_millis() as u64,
            drain_input_attempts: 10,
            src_caps_wait_ms: constants::WAIT_FOR_SRC_CAPS.as_millis() as u64,
            stale_frame_max_age_ms: constants::STALE_FRAME_MAX_AGE.as_millis() as u64,
            stale_frame_max_distance: constants::STALE_FRAME_MAX_DISTANCE,
            input_alignment: constants::DEC_ALIGNMENT_BYTES,
            hardware_rendering: false, // Software copy unless the platform opts in
        }
    }
}

impl DecoderConfig {
    /// Load a configuration from a JSON file
    pub fn load(path: &Path) -> DecoderResult<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: DecoderConfig = serde_json::from_str(&text)?;
        config.validate()?;
        debug!(path = %path.display(), "Loaded decoder configuration");
        Ok(config)
    }

    /// Write the configuration as pretty JSON
    pub fn save(&self, path: &Path) -> DecoderResult<()> {
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path, text)?;
        Ok(())
    }

    /// Reject values that would make the decoder spin or hang
    pub fn validate(&self) -> DecoderResult<()> {
        if self.input_timeout_ms == 0 {
            return Err(DecoderError::Config(
                "input_timeout_ms must be non-zero".to_string(),
            ));
        }
        if self.output_timeout_us == 0 {
            return Err(DecoderError::Config(
                "output_timeout_us must be non-zero".to_string(),
            ));
        }
        if self.drain_timeout_ms == 0 || self.drain_input_attempts == 0 {
            return Err(DecoderError::Config(
                "drain bounds must be non-zero".to_string(),
            ));
        }
        if self.input_alignment == 0 {
            return Err(DecoderError::Config(
                "input_alignment must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn input_timeout(&self) -> Duration {
        Duration::from_millis(self.input_timeout_ms)
    }

    pub fn output_timeout_initial(&self) -> Duration {
        Duration::from_micros(self.output_timeout_initial_us)
    }

    pub fn output_timeout(&self) -> Duration {
        Duration::from_micros(self.output_timeout_us)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    pub fn src_caps_wait(&self) -> Duration {
        Duration::from_millis(self.src_caps_wait_ms)
    }

    /// Stale window in nanoseconds
    pub fn stale_frame_max_age_ns(&self) -> u64 {
        self.stale_frame_max_age_ms
            .saturating_mul(1_000 * constants::NSECONDS_PER_USECOND)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = DecoderConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.input_timeout(), Duration::from_millis(100));
        assert_eq!(config.stale_frame_max_age_ns(), 5_000_000_000);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: DecoderConfig =
            serde_json::from_str(r#"{ "stale_frame_max_distance": 3 }"#).unwrap();
        assert_eq!(config.stale_frame_max_distance, 3);
        assert_eq!(config.input_alignment, 4096);
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let config = DecoderConfig {
            input_timeout_ms: 0,
            ..DecoderConfig::default()
        };
        assert!(matches!(config.validate(), Err(DecoderError::Config(_))));
    }
}
