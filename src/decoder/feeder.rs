// SPDX-License-Identifier: GPL-3.0-only

//! Input side: copy compressed frames into device input slots
//!
//! A frame larger than one slot is split over several slots. Chunk
//! timestamps are interpolated over the frame duration so they keep
//! increasing.

use super::frames::{BufferIdentification, PendingFrame};
use super::stats::bump;
use super::{Shared, StreamState, VideoCodecFrame, VideoDecoder, drain};
use crate::codec::{BufferInfo, CodecDevice, InputSlot};
use crate::constants::{NSECONDS_PER_USECOND, buffer_flags};
use crate::errors::{DecoderError, DecoderResult, FlowStatus};
use tracing::{debug, error, trace, warn};

const START_CODE: [u8; 4] = [0, 0, 0, 1];
const AVC_NAL_AUD: u8 = 9;
const HEVC_NAL_VPS: u8 = 32;
/// Start code, NAL header and the shortest possible VPS
const HEVC_VPS_MIN_LEN: usize = 10;

/// Offset of the first byte worth sending to the device
///
/// Some decoders ignore parameter sets that follow an H.264 access unit
/// delimiter, and some cannot parse an HEVC VPS. Neither is needed for
/// decoding, so a leading one is skipped.
pub(crate) fn skip_forbidden_nalus(mime: Option<&str>, data: &[u8]) -> usize {
    if !data.starts_with(&START_CODE) || data.len() <= START_CODE.len() {
        return 0;
    }
    let nal = data[4];

    match mime {
        Some("video/avc") if data.len() > 5 && nal & 0x1f == AVC_NAL_AUD => 6,
        Some("video/hevc") if nal >> 1 == HEVC_NAL_VPS => {
            let mut offset = HEVC_VPS_MIN_LEN;
            while offset + START_CODE.len() <= data.len() {
                if data[offset..].starts_with(&START_CODE) {
                    return offset;
                }
                offset += 1;
            }
            data.len()
        }
        _ => 0,
    }
}

/// Interpolated start of the chunk at `offset` within a frame
fn chunk_offset_ns(offset: usize, total: usize, duration: Option<u64>) -> u64 {
    match duration {
        Some(duration) if offset > 0 && total > 0 => {
            (offset as u128 * duration as u128 / total as u128) as u64
        }
        _ => 0,
    }
}

impl VideoDecoder {
    /// Decode one frame
    ///
    /// Blocks until the whole payload is queued to the device. Returns the
    /// flow status currently recorded for the stream, so errors seen by
    /// the output loop surface here. An empty payload drains the device.
    pub fn handle_frame(&self, frame: VideoCodecFrame) -> FlowStatus {
        let shared = &self.shared;

        if frame.input.is_empty() {
            shared.sink.release_frame(frame.number);
            return match drain::drain(shared, true) {
                Ok(()) => FlowStatus::Ok,
                Err(e) => e.flow_status(),
            };
        }

        let s = shared.lock();
        if !s.started {
            error!(frame = frame.number, "Codec not started yet");
            shared.sink.release_frame(frame.number);
            return FlowStatus::NotNegotiated;
        }
        if s.eos {
            warn!(frame = frame.number, "Got frame after end of stream");
            shared.sink.release_frame(frame.number);
            return FlowStatus::Eos;
        }
        if s.flushing {
            debug!(frame = frame.number, "Flushing, refusing frame");
            shared.sink.release_frame(frame.number);
            return FlowStatus::Flushing;
        }

        let mime = s
            .input_format
            .as_ref()
            .and_then(|format| format.device_mime().ok());
        let start = skip_forbidden_nalus(mime, &frame.input);
        if start >= frame.input.len() {
            debug!(frame = frame.number, "Frame holds nothing to decode");
            bump(&shared.stats.frames_dropped);
            return shared.sink.drop_frame(frame.number);
        }

        let mut registered = false;
        let (mut s, result) = feed(shared, s, &frame, start, &mut registered);
        match result {
            Ok(flow) => {
                if flow.is_ok() {
                    bump(&shared.stats.frames_submitted);
                } else {
                    abandon(shared, &mut s, frame.number, registered);
                }
                flow
            }
            Err(e) if e.is_flushing() => {
                debug!(frame = frame.number, "Flushing while queueing frame");
                abandon(shared, &mut s, frame.number, registered);
                FlowStatus::Flushing
            }
            Err(e) => {
                error!(frame = frame.number, error = %e, "Failed to queue frame");
                abandon(shared, &mut s, frame.number, registered);
                let flow = e.flow_status();
                s.downstream_flow = flow;
                drop(s);
                shared.sink.report_error(&e);
                flow
            }
        }
    }
}

/// Forget a frame that will not be decoded
///
/// A registered frame missing from the table was already finished or
/// released by a flush.
fn abandon(shared: &Shared, s: &mut StreamState, number: u64, registered: bool) {
    if s.frames.remove(number).is_some() || !registered {
        shared.sink.release_frame(number);
    }
}

/// Hand an unused input slot back to the device empty
pub(crate) fn return_slot(device: &dyn CodecDevice, index: usize) {
    if let Err(e) = device.queue_input(index, &BufferInfo::default()) {
        debug!(index, error = %e, "Failed to return unused input slot");
    }
}

/// Queue the payload from `start` on, one slot at a time
///
/// Takes the stream lock and hands it back, it is dropped around every
/// input dequeue. A flush meanwhile ends the feed with `Flushing`.
/// `registered` is set once the frame is in the pending table.
fn feed<'a>(
    shared: &'a Shared,
    mut s: std::sync::MutexGuard<'a, StreamState>,
    frame: &VideoCodecFrame,
    start: usize,
    registered: &mut bool,
) -> (std::sync::MutexGuard<'a, StreamState>, DecoderResult<FlowStatus>) {
    let Some(device) = s.device.clone() else {
        return (
            s,
            Err(DecoderError::InvalidState("no codec".to_string())),
        );
    };
    let config = &shared.config;
    let payload = &frame.input[..];
    let total = payload.len() - start;
    let mut offset = 0;
    let mut first = true;
    let mut timeouts = 0;
    let epoch = s.flush_epoch;

    let result = loop {
        if offset >= total {
            break Ok(s.downstream_flow);
        }

        drop(s);
        let slot = device.dequeue_input(config.input_timeout());
        s = shared.lock();

        if s.flushing || s.flush_epoch != epoch {
            if let Ok(InputSlot::Slot(index)) = slot {
                return_slot(device.as_ref(), index);
            }
            break Err(DecoderError::Flushing);
        }
        let index = match slot {
            Ok(InputSlot::Slot(index)) => index,
            Ok(InputSlot::TryAgain) => {
                timeouts += 1;
                if s.waiting_segment && timeouts >= config.input_max_timeouts {
                    break Err(DecoderError::Timeout(
                        "no input slot while waiting for a segment".to_string(),
                    ));
                }
                trace!(timeouts, "No input slot available yet");
                continue;
            }
            Err(e) => break Err(DecoderError::DequeueFailed(e.to_string())),
        };
        let slot = match s.input_buffers.acquire(index) {
            Ok(slot) => slot,
            Err(e) => break Err(e),
        };

        if !s.downstream_flow.is_ok() {
            // Hand the slot back empty and report what downstream said
            return_slot(device.as_ref(), index);
            break Ok(s.downstream_flow);
        }

        let written = match s.input_buffers.get(slot) {
            Ok(buffer) => {
                let size = (total - offset).min(buffer.capacity());
                let begin = start + offset;
                buffer.write(0, &payload[begin..begin + size])
            }
            Err(e) => break Err(e),
        };
        if written == 0 {
            return_slot(device.as_ref(), index);
            break Err(DecoderError::QueueFailed(format!(
                "input slot {} has no room",
                index
            )));
        }

        let mut info = BufferInfo {
            offset: 0,
            size: written,
            presentation_time_us: 0,
            flags: 0,
        };
        let ts_offset = chunk_offset_ns(offset, total, frame.duration);
        if let Some(pts) = frame.pts {
            let ts = pts.saturating_add(ts_offset);
            info.presentation_time_us = (ts / NSECONDS_PER_USECOND) as i64;
            s.last_upstream_ts = ts;
        }
        if let Some(duration) = frame.duration {
            s.last_upstream_ts = s.last_upstream_ts.saturating_add(duration);
        }

        if first {
            if frame.sync_point {
                info.flags |= buffer_flags::SYNC_FRAME;
            }
            s.frames.insert(PendingFrame {
                number: frame.number,
                pts: frame.pts,
                duration: frame.duration,
                deadline: frame.deadline,
                id: BufferIdentification::new(frame.pts),
            });
            *registered = true;
            first = false;
        }
        offset += written;

        trace!(
            index,
            size = written,
            pts = info.presentation_time_us,
            flags = info.flags,
            "Queueing input buffer"
        );
        if let Err(e) = device.queue_input(index, &info) {
            if s.flushing {
                break Err(DecoderError::Flushing);
            }
            break Err(DecoderError::QueueFailed(e.to_string()));
        }
        bump(&shared.stats.chunks_queued);
    };

    (s, result)
}
