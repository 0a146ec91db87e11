// SPDX-License-Identifier: GPL-3.0-only

//! Output side: one iteration of the output loop
//!
//! Each iteration dequeues at most one output event. Decoded buffers are
//! matched to the pending frame with the nearest timestamp, copied into a
//! buffer from the sink and finished. Any non-ok flow pauses the loop
//! until the next start or flush.

use super::frames::{FrameMatch, StalePolicy};
use super::stats::bump;
use super::task::LoopAction;
use super::{OutputBuffer, OutputState, Shared, StreamState};
use crate::codec::{BufferInfo, CodecDevice, OutputEvent, SlotRef};
use crate::constants::NSECONDS_PER_USECOND;
use crate::errors::{DecoderError, DecoderResult, FlowStatus};
use crate::formats::{ColorFormatInfo, VideoInfo, fill_frame};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, trace, warn};

pub(crate) fn iterate(shared: &Shared) -> LoopAction {
    let s = shared.lock();
    if s.flushing {
        drop(s);
        return pause_flushing(shared);
    }
    if s.downstream_flow.is_fatal() {
        // Recorded and reported by the input side
        drop(s);
        debug!("Input failed, pausing output loop");
        shared.sink.push_eos();
        shared.drain.cancel();
        return LoopAction::Stop;
    }
    let Some(device) = s.device.clone() else {
        return LoopAction::Stop;
    };
    let timeout = s.output_timeout;
    drop(s);

    let event = device.dequeue_output(timeout);

    let mut s = shared.lock();
    if s.flushing {
        if let Ok(OutputEvent::Buffer { index, .. }) = event
            && let Err(e) = device.release_output(index, false)
        {
            trace!(index, error = %e, "Could not return output slot while flushing");
        }
        drop(s);
        return pause_flushing(shared);
    }

    let result = match event {
        Err(e) => Err(DecoderError::DequeueFailed(e.to_string())),
        Ok(OutputEvent::TryAgain) => {
            trace!("Dequeueing output buffer timed out");
            return LoopAction::Continue;
        }
        Ok(OutputEvent::BuffersChanged) => {
            s.output_timeout = shared.config.output_timeout();
            bump(&shared.stats.buffers_changes);
            refresh_output_buffers(&mut s, device.as_ref()).map(|_| (FlowStatus::Ok, false))
        }
        Ok(OutputEvent::FormatChanged) => {
            format_changed(shared, &mut s, device.as_ref()).map(|_| (FlowStatus::Ok, false))
        }
        Ok(OutputEvent::Buffer { index, info }) => {
            handle_buffer(shared, &mut s, &device, index, &info)
        }
    };

    let (mut flow, is_eos) = match result {
        Ok(outcome) => outcome,
        Err(e) => {
            drop(s);
            return fail(shared, e);
        }
    };

    if is_eos || flow == FlowStatus::Eos {
        drop(s);
        match shared.drain.complete() {
            Some(at_eos) => debug!(at_eos, "Drained"),
            None if flow.is_ok() => {
                debug!("Codec signalled end of stream");
                flow = FlowStatus::Eos;
            }
            None => {}
        }
        s = shared.lock();
    }

    // Keep an error the input side recorded meanwhile
    if !(flow.is_ok() && s.downstream_flow.is_fatal()) {
        s.downstream_flow = flow;
    }
    drop(s);

    match flow {
        FlowStatus::Ok => LoopAction::Continue,
        FlowStatus::Flushing => pause_flushing(shared),
        flow => pause_on_flow(shared, flow),
    }
}

fn pause_flushing(shared: &Shared) -> LoopAction {
    debug!("Flushing, pausing output loop");
    shared.lock().downstream_flow = FlowStatus::Flushing;
    shared.drain.cancel();
    LoopAction::Stop
}

fn pause_on_flow(shared: &Shared, flow: FlowStatus) -> LoopAction {
    if flow == FlowStatus::Eos {
        debug!("End of stream, pausing output loop");
    } else {
        error!(%flow, "Stream stopped, pausing output loop");
        shared.sink.report_error(&DecoderError::Flow(flow));
    }
    shared.sink.push_eos();
    shared.drain.cancel();
    LoopAction::Stop
}

fn fail(shared: &Shared, err: DecoderError) -> LoopAction {
    if err.is_flushing() {
        return pause_flushing(shared);
    }
    error!(error = %err, "Output loop failed");
    shared.lock().downstream_flow = err.flow_status();
    shared.sink.report_error(&err);
    shared.sink.push_eos();
    shared.drain.cancel();
    LoopAction::Stop
}

fn refresh_output_buffers(s: &mut StreamState, device: &dyn CodecDevice) -> DecoderResult<()> {
    let buffers = device
        .output_buffers()
        .map_err(|e| DecoderError::ConfigurationFailed(e.to_string()))?;
    s.output_buffers.replace(buffers);
    debug!(
        count = s.output_buffers.len(),
        generation = s.output_buffers.generation(),
        "Output buffers changed"
    );
    Ok(())
}

fn format_changed(
    shared: &Shared,
    s: &mut StreamState,
    device: &dyn CodecDevice,
) -> DecoderResult<()> {
    let format = device
        .output_format()
        .map_err(|e| DecoderError::ConfigurationFailed(e.to_string()))?;
    debug!(%format, "Output format changed");

    let (color, video_format) = ColorFormatInfo::from_output_format(&shared.codec_name, &format)?;
    let info = VideoInfo::new(video_format, color.width, color.height);
    info!(
        format = %video_format,
        width = color.width,
        height = color.height,
        stride = color.stride,
        slice_height = color.slice_height,
        "Negotiated output format"
    );

    let output = OutputState { color, info };
    shared.sink.output_state_changed(&output);
    s.output = Some(output);
    bump(&shared.stats.format_changes);

    refresh_output_buffers(s, device)?;
    shared.caps.signal();
    Ok(())
}

/// Deliver one decoded buffer; returns the flow and whether it ended the stream
fn handle_buffer(
    shared: &Shared,
    s: &mut StreamState,
    device: &Arc<dyn CodecDevice>,
    index: usize,
    info: &BufferInfo,
) -> DecoderResult<(FlowStatus, bool)> {
    trace!(
        index,
        size = info.size,
        pts = info.presentation_time_us,
        flags = info.flags,
        "Got output buffer"
    );
    let slot = s.output_buffers.acquire(index)?;
    let is_eos = info.is_end_of_stream();

    let reference = info.presentation_time_us.max(0) as u64 * NSECONDS_PER_USECOND;
    let policy = StalePolicy {
        max_age_ns: shared.config.stale_frame_max_age_ns(),
        max_distance: shared.config.stale_frame_max_distance,
    };
    let FrameMatch { frame, stale } = s.frames.take_nearest(reference, &policy);
    if !stale.is_empty() {
        warn!(
            count = stale.len(),
            "Frames are too old, the codec lost them; dropping"
        );
        for old in stale {
            bump(&shared.stats.frames_stale);
            shared.sink.drop_frame(old.number);
        }
    }

    let mut render = false;
    let flow = match frame {
        Some(frame) if frame.is_late(Instant::now()) => {
            debug!(frame = frame.number, "Frame is too late, dropping");
            bump(&shared.stats.frames_dropped);
            shared.sink.drop_frame(frame.number)
        }
        None if info.size > 0 => {
            let mut buffer = match output_buffer(shared, s, slot, info, None) {
                Ok(buffer) => buffer,
                Err(e) => {
                    release_after_error(device.as_ref(), index);
                    return Err(e);
                }
            };
            debug!(pts = info.presentation_time_us, "Decoded buffer matches no frame");
            buffer.pts = Some(reference);
            render = buffer.hardware_rendered;
            bump(&shared.stats.standalone_buffers);
            shared.sink.push_buffer(buffer)
        }
        // Surface-rendered outputs carry no bytes but still finish their frame
        Some(frame) if info.size > 0 || !is_eos => {
            let mut buffer = match output_buffer(shared, s, slot, info, Some(frame.number)) {
                Ok(buffer) => buffer,
                Err(e) => {
                    bump(&shared.stats.frames_dropped);
                    shared.sink.drop_frame(frame.number);
                    release_after_error(device.as_ref(), index);
                    return Err(e);
                }
            };
            buffer.pts = frame.pts;
            buffer.duration = frame.duration;
            render = buffer.hardware_rendered;
            bump(&shared.stats.frames_finished);
            shared.sink.finish_frame(frame.number, buffer)
        }
        Some(frame) => {
            trace!(frame = frame.number, "End-of-stream output, dropping frame");
            bump(&shared.stats.frames_dropped);
            shared.sink.drop_frame(frame.number)
        }
        None => FlowStatus::Ok,
    };

    device
        .release_output(index, render)
        .map_err(|e| DecoderError::ReleaseFailed(e.to_string()))?;

    Ok((flow, is_eos))
}

fn release_after_error(device: &dyn CodecDevice, index: usize) {
    if let Err(e) = device.release_output(index, false) {
        debug!(index, error = %e, "Failed to release output slot after error");
    }
}

/// Get a buffer from the sink and fill it from the output slot
fn output_buffer(
    shared: &Shared,
    s: &StreamState,
    slot: SlotRef,
    info: &BufferInfo,
    frame: Option<u64>,
) -> DecoderResult<OutputBuffer> {
    let Some(output) = s.output.as_ref() else {
        return Err(DecoderError::InvalidState(
            "decoded buffer before any output format".to_string(),
        ));
    };
    let mut buffer = shared
        .sink
        .allocate_output_buffer(frame, &output.info)
        .map_err(DecoderError::Flow)?;

    if shared.config.hardware_rendering && buffer.surface_backed {
        buffer.hardware_rendered = true;
        return Ok(buffer);
    }
    if info.size == 0 {
        trace!("Output slot is empty, leaving buffer unfilled");
        return Ok(buffer);
    }

    let device_buffer = s.output_buffers.get(slot)?;
    let mode = device_buffer
        .with_bytes(|bytes| fill_frame(&output.color, bytes, info, &mut buffer.data, &output.info))?;
    trace!(?mode, size = buffer.data.len(), "Filled output buffer");
    Ok(buffer)
}
