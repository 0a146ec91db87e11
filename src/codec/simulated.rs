// SPDX-License-Identifier: GPL-3.0-only

//! In-process codec device
//!
//! Behaves like a hardware decoder from the outside: fixed slot arrays,
//! blocking dequeues with timeouts, format and buffers-changed events,
//! optional output reordering and silently dropped frames. Every input
//! buffer with a payload produces one NV12 output frame whose luma bytes
//! equal the first payload byte.

use super::{
    BufferInfo, CodecDevice, CodecFactory, CodecFormat, DeviceBuffer, INFO_OUTPUT_BUFFERS_CHANGED,
    INFO_OUTPUT_FORMAT_CHANGED, INFO_TRY_AGAIN_LATER, InputSlot, OutputEvent, SurfaceHandle,
};
use crate::constants::{buffer_flags, color_format, format_key};
use crate::errors::DeviceError;
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, trace};

/// Raw result of a failed dequeue
const DEQUEUE_FAILED: isize = isize::MIN;

/// Behavior knobs of a simulated device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatedOptions {
    pub input_slots: usize,
    pub input_capacity: usize,
    pub output_slots: usize,
    /// Extra bytes per output row
    pub stride_padding: u32,
    /// Extra rows below the luma plane
    pub slice_padding: u32,
    /// Emit decoded frames pairwise swapped
    pub reorder: bool,
    /// Silently swallow every n-th frame
    pub drop_every: Option<usize>,
    /// Start with a buffers-changed event before the first output
    pub announce_buffers: bool,
    /// Refuse to start
    pub fail_start: bool,
    /// Never produce the end-of-stream output
    pub ignore_end_of_stream: bool,
}

impl Default for SimulatedOptions {
    fn default() -> Self {
        Self {
            input_slots: 4,
            input_capacity: 8192,
            output_slots: 4,
            stride_padding: 0,
            slice_padding: 0,
            reorder: false,
            drop_every: None,
            announce_buffers: true,
            fail_start: false,
            ignore_end_of_stream: false,
        }
    }
}

/// Call recorded by a simulated device
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    Created(String),
    Configured { width: u32, height: u32 },
    Started,
    Stopped,
    Flushed,
    Released,
    Queued {
        index: usize,
        size: usize,
        presentation_time_us: i64,
        flags: u32,
    },
    ReleasedOutput { index: usize, render: bool },
}

/// Shared call log
pub type EventLog = Arc<Mutex<Vec<DeviceEvent>>>;

#[derive(Debug, Clone, Copy)]
struct PendingOutput {
    presentation_time_us: i64,
    fill: u8,
    eos: bool,
}

#[derive(Default)]
struct State {
    configured: Option<(String, u32, u32)>,
    /// Outputs are rendered to a surface and carry no bytes
    surface: bool,
    running: bool,
    released: bool,
    inputs: Vec<DeviceBuffer>,
    outputs: Vec<DeviceBuffer>,
    input_free: VecDeque<usize>,
    input_owned: Vec<bool>,
    output_free: VecDeque<usize>,
    output_owned: Vec<bool>,
    /// Raw info codes, or output indices, handed out before decoded frames
    events: VecDeque<isize>,
    pending: VecDeque<PendingOutput>,
    held: Option<PendingOutput>,
    frames_in: usize,
    fail_next_output: bool,
    fail_next_queue: bool,
}

/// A software stand-in for a hardware codec instance
pub struct SimulatedCodec {
    name: String,
    options: SimulatedOptions,
    state: Mutex<State>,
    cond: Condvar,
    log: EventLog,
}

impl SimulatedCodec {
    pub fn new(name: &str, options: SimulatedOptions, log: EventLog) -> Self {
        let codec = Self {
            name: name.to_string(),
            options,
            state: Mutex::new(State::default()),
            cond: Condvar::new(),
            log,
        };
        codec.record(DeviceEvent::Created(name.to_string()));
        codec
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn record(&self, event: DeviceEvent) {
        self.log
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event);
    }

    fn geometry(&self, state: &State) -> (u32, u32, u32, u32) {
        let (_, width, height) = state.configured.clone().unwrap_or_default();
        let stride = width + self.options.stride_padding;
        let slice_height = height + self.options.slice_padding;
        (width, height, stride, slice_height)
    }

    fn frame_size(&self, state: &State) -> usize {
        let (_, _, stride, slice_height) = self.geometry(state);
        let (stride, slice_height) = (stride as usize, slice_height as usize);
        stride * slice_height + stride * slice_height.div_ceil(2)
    }

    fn reset_slots(&self, state: &mut State) {
        state.input_free = (0..state.inputs.len()).collect();
        state.input_owned = vec![false; state.inputs.len()];
        state.output_free = (0..state.outputs.len()).collect();
        state.output_owned = vec![false; state.outputs.len()];
        state.pending.clear();
        state.held = None;
    }

    /// Replace the output arrays, as devices do on resolution changes
    pub fn trigger_buffers_changed(&self) {
        let mut state = self.lock();
        let size = self.frame_size(&state);
        state.outputs = (0..self.options.output_slots)
            .map(|_| DeviceBuffer::heap(size))
            .collect();
        state.output_free = (0..state.outputs.len()).collect();
        state.output_owned = vec![false; state.outputs.len()];
        state.events.push_back(INFO_OUTPUT_BUFFERS_CHANGED);
        self.cond.notify_all();
    }

    /// Make the next output dequeue fail
    pub fn fail_next_output_dequeue(&self) {
        self.lock().fail_next_output = true;
        self.cond.notify_all();
    }

    /// Make the next input queue fail
    pub fn fail_next_queue_input(&self) {
        self.lock().fail_next_queue = true;
    }

    /// Hand out `index` from the next output dequeue, valid or not
    pub fn report_output_index(&self, index: usize) {
        self.lock().events.push_back(index as isize);
        self.cond.notify_all();
    }

    /// Next raw output dequeue result, as the platform call returns it
    fn next_output(&self, state: &mut State) -> (isize, BufferInfo) {
        if state.fail_next_output {
            state.fail_next_output = false;
            return (DEQUEUE_FAILED, BufferInfo::default());
        }
        if let Some(raw) = state.events.pop_front() {
            return (raw, BufferInfo::default());
        }
        if state.pending.is_empty() || state.output_free.is_empty() {
            return (INFO_TRY_AGAIN_LATER, BufferInfo::default());
        }
        let (Some(out), Some(index)) = (state.pending.pop_front(), state.output_free.pop_front())
        else {
            return (INFO_TRY_AGAIN_LATER, BufferInfo::default());
        };
        state.output_owned[index] = true;

        if out.eos {
            return (
                index as isize,
                BufferInfo::end_of_stream(out.presentation_time_us),
            );
        }
        let size = if state.surface {
            0
        } else {
            let (_, _, stride, slice_height) = self.geometry(state);
            let luma = (stride * slice_height) as usize;
            let size = self.frame_size(state);
            let buffer = &state.outputs[index];
            buffer.write(0, &vec![out.fill; luma]);
            buffer.write(luma, &vec![128u8; size - luma]);
            size
        };
        let info = BufferInfo {
            offset: 0,
            size,
            presentation_time_us: out.presentation_time_us,
            flags: 0,
        };
        (index as isize, info)
    }

    fn decode(&self, state: &mut State, index: usize, info: &BufferInfo) {
        if info.is_end_of_stream() && self.options.ignore_end_of_stream {
            trace!("Simulated decoder ignoring end of stream");
            return;
        }
        if info.is_end_of_stream() {
            if let Some(held) = state.held.take() {
                state.pending.push_back(held);
            }
            state.pending.push_back(PendingOutput {
                presentation_time_us: info.presentation_time_us,
                fill: 0,
                eos: true,
            });
            return;
        }
        if info.size == 0 || info.flags & buffer_flags::CODEC_CONFIG != 0 {
            return;
        }

        state.frames_in += 1;
        if let Some(n) = self.options.drop_every
            && n > 0
            && state.frames_in % n == 0
        {
            trace!(pts = info.presentation_time_us, "Simulated decoder dropping frame");
            return;
        }

        let fill = state.inputs[index].with_bytes(|b| b.get(info.offset).copied().unwrap_or(0));
        let out = PendingOutput {
            presentation_time_us: info.presentation_time_us,
            fill,
            eos: false,
        };

        if self.options.reorder {
            match state.held.take() {
                None => state.held = Some(out),
                Some(held) => {
                    state.pending.push_back(out);
                    state.pending.push_back(held);
                }
            }
        } else {
            state.pending.push_back(out);
        }
    }
}

impl CodecDevice for SimulatedCodec {
    fn configure(
        &self,
        format: &CodecFormat,
        surface: Option<SurfaceHandle>,
        _flags: u32,
    ) -> Result<(), DeviceError> {
        let mut state = self.lock();
        if state.released {
            return Err(DeviceError::new("configure", "codec released"));
        }
        let mime = format
            .mime()
            .ok_or_else(|| DeviceError::new("configure", "format has no mime"))?;
        let width = format.get_int(format_key::WIDTH).unwrap_or(0);
        let height = format.get_int(format_key::HEIGHT).unwrap_or(0);
        if width <= 0 || height <= 0 {
            return Err(DeviceError::new("configure", "invalid dimensions"));
        }
        state.configured = Some((mime.to_string(), width as u32, height as u32));
        state.surface = surface.is_some();
        drop(state);

        debug!(codec = %self.name, %format, "Simulated codec configured");
        self.record(DeviceEvent::Configured {
            width: width as u32,
            height: height as u32,
        });
        Ok(())
    }

    fn start(&self) -> Result<(), DeviceError> {
        let mut state = self.lock();
        if state.configured.is_none() {
            return Err(DeviceError::new("start", "not configured"));
        }
        if self.options.fail_start {
            return Err(DeviceError::new("start", "simulated failure"));
        }
        let frame_size = self.frame_size(&state);
        state.inputs = (0..self.options.input_slots)
            .map(|_| DeviceBuffer::heap(self.options.input_capacity))
            .collect();
        state.outputs = (0..self.options.output_slots)
            .map(|_| DeviceBuffer::heap(frame_size))
            .collect();
        self.reset_slots(&mut state);
        state.events.clear();
        if self.options.announce_buffers {
            state.events.push_back(INFO_OUTPUT_BUFFERS_CHANGED);
        }
        state.events.push_back(INFO_OUTPUT_FORMAT_CHANGED);
        state.running = true;
        drop(state);

        self.cond.notify_all();
        self.record(DeviceEvent::Started);
        Ok(())
    }

    fn stop(&self) -> Result<(), DeviceError> {
        let mut state = self.lock();
        state.running = false;
        self.reset_slots(&mut state);
        state.events.clear();
        drop(state);

        self.cond.notify_all();
        self.record(DeviceEvent::Stopped);
        Ok(())
    }

    fn flush(&self) -> Result<(), DeviceError> {
        let mut state = self.lock();
        if !state.running {
            return Err(DeviceError::new("flush", "not started"));
        }
        self.reset_slots(&mut state);
        drop(state);

        self.cond.notify_all();
        self.record(DeviceEvent::Flushed);
        Ok(())
    }

    fn release(&self) -> Result<(), DeviceError> {
        let mut state = self.lock();
        state.running = false;
        state.released = true;
        drop(state);

        self.cond.notify_all();
        self.record(DeviceEvent::Released);
        Ok(())
    }

    fn dequeue_input(&self, timeout: Duration) -> Result<InputSlot, DeviceError> {
        let state = self.lock();
        let (mut state, _) = self
            .cond
            .wait_timeout_while(state, timeout, |s| s.running && s.input_free.is_empty())
            .unwrap_or_else(|e| e.into_inner());

        if !state.running {
            return Err(DeviceError::new("dequeue_input", "not started"));
        }
        let raw = match state.input_free.pop_front() {
            Some(index) => {
                state.input_owned[index] = true;
                index as isize
            }
            None => INFO_TRY_AGAIN_LATER,
        };
        InputSlot::from_raw(raw)
    }

    fn dequeue_output(&self, timeout: Duration) -> Result<OutputEvent, DeviceError> {
        let state = self.lock();
        let (mut state, _) = self
            .cond
            .wait_timeout_while(state, timeout, |s| {
                s.running
                    && !s.fail_next_output
                    && s.events.is_empty()
                    && (s.pending.is_empty() || s.output_free.is_empty())
            })
            .unwrap_or_else(|e| e.into_inner());

        if !state.running {
            return Err(DeviceError::new("dequeue_output", "not started"));
        }
        let (raw, info) = self.next_output(&mut state);
        OutputEvent::from_raw(raw, info)
    }

    fn queue_input(&self, index: usize, info: &BufferInfo) -> Result<(), DeviceError> {
        let mut state = self.lock();
        if !state.running {
            return Err(DeviceError::new("queue_input", "not started"));
        }
        if state.fail_next_queue {
            state.fail_next_queue = false;
            return Err(DeviceError::new("queue_input", "simulated failure"));
        }
        if !state.input_owned.get(index).copied().unwrap_or(false) {
            return Err(DeviceError::new(
                "queue_input",
                format!("slot {} is not dequeued", index),
            ));
        }
        if info.offset + info.size > state.inputs[index].capacity() {
            return Err(DeviceError::new("queue_input", "size exceeds slot capacity"));
        }

        self.decode(&mut state, index, info);
        state.input_owned[index] = false;
        state.input_free.push_back(index);
        drop(state);

        self.cond.notify_all();
        self.record(DeviceEvent::Queued {
            index,
            size: info.size,
            presentation_time_us: info.presentation_time_us,
            flags: info.flags,
        });
        Ok(())
    }

    fn release_output(&self, index: usize, render: bool) -> Result<(), DeviceError> {
        let mut state = self.lock();
        if !state.output_owned.get(index).copied().unwrap_or(false) {
            return Err(DeviceError::new(
                "release_output",
                format!("slot {} is not dequeued", index),
            ));
        }
        state.output_owned[index] = false;
        state.output_free.push_back(index);
        drop(state);

        self.cond.notify_all();
        self.record(DeviceEvent::ReleasedOutput { index, render });
        Ok(())
    }

    fn input_buffers(&self) -> Result<Vec<DeviceBuffer>, DeviceError> {
        Ok(self.lock().inputs.clone())
    }

    fn output_buffers(&self) -> Result<Vec<DeviceBuffer>, DeviceError> {
        Ok(self.lock().outputs.clone())
    }

    fn output_format(&self) -> Result<CodecFormat, DeviceError> {
        let state = self.lock();
        let Some((mime, _, _)) = state.configured.clone() else {
            return Err(DeviceError::new("output_format", "not configured"));
        };
        let (width, height, stride, slice_height) = self.geometry(&state);

        let mut format = CodecFormat::video(&mime, width, height);
        format.set_int(format_key::COLOR_FORMAT, color_format::YUV420_SEMI_PLANAR);
        format.set_int(format_key::STRIDE, stride as i32);
        format.set_int(format_key::SLICE_HEIGHT, slice_height as i32);
        Ok(format)
    }
}

/// Creates [`SimulatedCodec`] instances and records their calls
#[derive(Default)]
pub struct SimulatedFactory {
    options: SimulatedOptions,
    log: EventLog,
    unavailable: Vec<String>,
    created: Mutex<Vec<Arc<SimulatedCodec>>>,
}

impl SimulatedFactory {
    pub fn new(options: SimulatedOptions) -> Self {
        Self {
            options,
            ..Self::default()
        }
    }

    /// Make creating `name` fail
    pub fn with_unavailable(mut self, name: &str) -> Self {
        self.unavailable.push(name.to_string());
        self
    }

    pub fn log(&self) -> EventLog {
        Arc::clone(&self.log)
    }

    /// Snapshot of all recorded calls
    pub fn events(&self) -> Vec<DeviceEvent> {
        self.log.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Most recently created device
    pub fn latest(&self) -> Option<Arc<SimulatedCodec>> {
        self.created
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .last()
            .cloned()
    }
}

impl CodecFactory for SimulatedFactory {
    fn create(&self, name: &str) -> Result<Arc<dyn CodecDevice>, DeviceError> {
        if self.unavailable.iter().any(|n| n == name) {
            return Err(DeviceError::new("create", format!("no codec named {}", name)));
        }
        let codec = Arc::new(SimulatedCodec::new(
            name,
            self.options.clone(),
            Arc::clone(&self.log),
        ));
        self.created
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Arc::clone(&codec));
        Ok(codec)
    }
}
