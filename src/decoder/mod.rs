// SPDX-License-Identifier: GPL-3.0-only

//! Video decoder driving one codec device
//!
//! # Threads and locks
//!
//! The caller thread feeds frames ([`VideoDecoder::handle_frame`]) while a
//! background output loop dequeues decoded buffers and hands them to the
//! [`DecoderSink`]. Both share the stream state behind one stream lock.
//! The lock is always dropped around blocking device calls.
//!
//! The end-of-stream handshake has its own lock. Lock
//! order is stream lock, then drain lock; the output loop only ever takes
//! the drain lock on its own.
//!
//! # Lifecycle
//!
//! ```text
//! Closed ──open──► Opened ──configure──► Configured ──start──► Started
//!    ▲                                       ▲                   │ ▲ flush
//!    └──────────────close──────── Stopped ◄──┴──────stop─────────┘ └──┘
//! ```

mod drain;
mod feeder;
pub mod frames;
mod reaper;
mod stats;
pub mod task;

pub use frames::{BufferIdentification, PendingFrame};
pub use stats::StatsSnapshot;

use crate::codec::{BufferArena, CodecDevice, CodecFactory, CodecInfo, CodecRegistry, SurfaceHandle};
use crate::config::DecoderConfig;
use crate::constants;
use crate::errors::{DecoderError, DecoderResult, FlowStatus};
use crate::formats::{ColorFormatInfo, StreamFormat, VideoInfo};
use drain::{CapsWaiter, DrainCoordinator};
use frames::FrameTable;
use stats::DecoderStats;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use task::LoopController;
use tracing::{debug, info, warn};

/// Lifecycle state of a decoder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DecoderState {
    #[default]
    Closed,
    Opened,
    Configured,
    Started,
    Stopped,
}

impl fmt::Display for DecoderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DecoderState::Closed => "closed",
            DecoderState::Opened => "opened",
            DecoderState::Configured => "configured",
            DecoderState::Started => "started",
            DecoderState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// What [`VideoDecoder::configure`] had to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatOutcome {
    /// Format stored, the device is configured on start
    Configured,
    /// The running device was drained and recreated
    Restarted,
    /// Nothing the device cares about changed
    MetadataUpdated,
}

/// Output geometry negotiated after a format change
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputState {
    /// Layout of frames inside device output slots
    pub color: ColorFormatInfo,
    /// Layout of frames handed downstream
    pub info: VideoInfo,
}

/// One compressed frame handed in by the caller
#[derive(Debug, Clone)]
pub struct VideoCodecFrame {
    pub number: u64,
    /// Presentation time in nanoseconds
    pub pts: Option<u64>,
    pub duration: Option<u64>,
    pub sync_point: bool,
    /// Past this instant the decoded frame is dropped instead of copied
    pub deadline: Option<Instant>,
    pub input: Arc<[u8]>,
}

impl VideoCodecFrame {
    pub fn new(number: u64, input: impl Into<Arc<[u8]>>) -> Self {
        Self {
            number,
            pts: None,
            duration: None,
            sync_point: false,
            deadline: None,
            input: input.into(),
        }
    }

    pub fn with_timing(mut self, pts: Option<u64>, duration: Option<u64>) -> Self {
        self.pts = pts;
        self.duration = duration;
        self
    }

    pub fn with_sync_point(mut self, sync_point: bool) -> Self {
        self.sync_point = sync_point;
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// A decoded frame buffer owned by the sink
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputBuffer {
    pub data: Vec<u8>,
    pub info: VideoInfo,
    pub pts: Option<u64>,
    pub duration: Option<u64>,
    /// Backed by display memory the device can render into directly
    pub surface_backed: bool,
    /// Pixels were rendered by the device, `data` is untouched
    pub hardware_rendered: bool,
}

impl OutputBuffer {
    pub fn new(info: &VideoInfo) -> Self {
        Self {
            data: vec![0; info.size],
            info: info.clone(),
            pts: None,
            duration: None,
            surface_backed: false,
            hardware_rendered: false,
        }
    }
}

/// Receiver of everything the decoder produces
///
/// Called from both the caller thread and the output loop, sometimes with
/// the decoder's stream lock held. A sink must not call back into the
/// decoder.
pub trait DecoderSink: Send + Sync {
    /// The device reported a new output layout
    fn output_state_changed(&self, _state: &OutputState) {}

    /// Provide a buffer for a decoded frame, or for a standalone buffer
    /// when `frame` is `None`
    fn allocate_output_buffer(
        &self,
        _frame: Option<u64>,
        info: &VideoInfo,
    ) -> Result<OutputBuffer, FlowStatus> {
        Ok(OutputBuffer::new(info))
    }

    /// A frame was decoded into `buffer`
    fn finish_frame(&self, frame: u64, buffer: OutputBuffer) -> FlowStatus;

    /// A frame will never be decoded
    fn drop_frame(&self, frame: u64) -> FlowStatus;

    /// Decoded data that matched no frame
    fn push_buffer(&self, buffer: OutputBuffer) -> FlowStatus;

    fn push_eos(&self);

    /// A frame was discarded by a flush, stop or refused input
    fn release_frame(&self, _frame: u64) {}

    fn report_error(&self, _error: &DecoderError) {}

    /// Surface to render into when hardware rendering is enabled
    fn surface(&self) -> Option<SurfaceHandle> {
        None
    }
}

/// State guarded by the stream lock
pub(crate) struct StreamState {
    pub(crate) state: DecoderState,
    pub(crate) device: Option<Arc<dyn CodecDevice>>,
    pub(crate) started: bool,
    pub(crate) flushing: bool,
    /// Bumped by every flush and stop; slots dequeued under an older
    /// epoch belong to the device again
    pub(crate) flush_epoch: u64,
    /// End of stream was queued to the device
    pub(crate) eos: bool,
    pub(crate) downstream_flow: FlowStatus,
    pub(crate) input_buffers: BufferArena,
    pub(crate) output_buffers: BufferArena,
    pub(crate) output_timeout: Duration,
    pub(crate) input_format: Option<StreamFormat>,
    pub(crate) output: Option<OutputState>,
    pub(crate) frames: FrameTable,
    /// End of the most recent input, in nanoseconds
    pub(crate) last_upstream_ts: u64,
    pub(crate) waiting_segment: bool,
}

impl StreamState {
    fn new(config: &DecoderConfig) -> Self {
        Self {
            state: DecoderState::Closed,
            device: None,
            started: false,
            flushing: true,
            flush_epoch: 0,
            eos: false,
            downstream_flow: FlowStatus::Ok,
            input_buffers: BufferArena::new(),
            output_buffers: BufferArena::new(),
            output_timeout: config.output_timeout_initial(),
            input_format: None,
            output: None,
            frames: FrameTable::new(),
            last_upstream_ts: 0,
            waiting_segment: false,
        }
    }
}

/// Everything the caller thread and the output loop share
pub(crate) struct Shared {
    pub(crate) stream: Mutex<StreamState>,
    pub(crate) drain: DrainCoordinator,
    pub(crate) caps: CapsWaiter,
    pub(crate) sink: Arc<dyn DecoderSink>,
    pub(crate) config: DecoderConfig,
    pub(crate) codec_name: String,
    pub(crate) stats: DecoderStats,
}

impl Shared {
    pub(crate) fn lock(&self) -> MutexGuard<'_, StreamState> {
        self.stream.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Forget frames that will never reach the sink
    pub(crate) fn release_pending(&self, state: &mut StreamState) {
        for frame in state.frames.drain_all() {
            self.sink.release_frame(frame.number);
        }
    }
}

/// Hardware video decoder instance
pub struct VideoDecoder {
    shared: Arc<Shared>,
    factory: Arc<dyn CodecFactory>,
    codec: CodecInfo,
    task: Mutex<Option<LoopController>>,
    next_frame: AtomicU64,
}

impl VideoDecoder {
    pub fn new(
        codec: CodecInfo,
        factory: Arc<dyn CodecFactory>,
        sink: Arc<dyn DecoderSink>,
        config: DecoderConfig,
    ) -> Self {
        let shared = Shared {
            stream: Mutex::new(StreamState::new(&config)),
            drain: DrainCoordinator::default(),
            caps: CapsWaiter::default(),
            sink,
            config,
            codec_name: codec.name.clone(),
            stats: DecoderStats::default(),
        };
        Self {
            shared: Arc::new(shared),
            factory,
            codec,
            task: Mutex::new(None),
            next_frame: AtomicU64::new(0),
        }
    }

    /// Create a decoder with the first registry codec able to decode `format`
    pub fn for_stream(
        registry: &dyn CodecRegistry,
        format: &StreamFormat,
        factory: Arc<dyn CodecFactory>,
        sink: Arc<dyn DecoderSink>,
        config: DecoderConfig,
    ) -> DecoderResult<Self> {
        let mime = format.device_mime()?;
        let codec = registry.find_decoder(mime).cloned().ok_or_else(|| {
            DecoderError::DeviceUnavailable(format!("no decoder for {}", mime))
        })?;
        info!(codec = %codec.name, mime, "Selected decoder");
        Ok(Self::new(codec, factory, sink, config))
    }

    pub fn codec(&self) -> &CodecInfo {
        &self.codec
    }

    pub fn config(&self) -> &DecoderConfig {
        &self.shared.config
    }

    pub fn state(&self) -> DecoderState {
        self.shared.lock().state
    }

    pub fn is_started(&self) -> bool {
        self.shared.lock().started
    }

    /// Flow status last recorded by either side
    pub fn downstream_flow(&self) -> FlowStatus {
        self.shared.lock().downstream_flow
    }

    pub fn output_state(&self) -> Option<OutputState> {
        self.shared.lock().output.clone()
    }

    pub fn input_format(&self) -> Option<StreamFormat> {
        self.shared.lock().input_format.clone()
    }

    /// Frames queued to the device and not yet finished or dropped
    pub fn pending_frames(&self) -> usize {
        self.shared.lock().frames.len()
    }

    pub fn is_draining(&self) -> bool {
        self.shared.drain.is_draining()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// Whether the output loop thread is running
    pub fn is_output_loop_running(&self) -> bool {
        self.task_lock().as_ref().is_some_and(|t| t.is_running())
    }

    /// Create the codec device
    pub fn open(&self) -> DecoderResult<()> {
        let mut s = self.shared.lock();
        if s.device.is_some() {
            return Err(DecoderError::InvalidState(format!(
                "open while {}",
                s.state
            )));
        }

        let device = self
            .factory
            .create(&self.codec.name)
            .map_err(|e| DecoderError::DeviceUnavailable(e.to_string()))?;

        s.device = Some(device);
        s.state = DecoderState::Opened;
        s.started = false;
        s.flushing = true;
        info!(codec = %self.codec.name, "Opened codec");
        Ok(())
    }

    /// Set the stream format
    ///
    /// On a started decoder a change of resolution or codec data drains
    /// and recreates the device; other changes are only recorded.
    pub fn configure(&self, format: StreamFormat) -> DecoderResult<FormatOutcome> {
        format.codec_format(self.shared.config.input_alignment)?;

        let mut s = self.shared.lock();
        match s.state {
            DecoderState::Closed => Err(DecoderError::InvalidState(
                "configure before open".to_string(),
            )),
            DecoderState::Started => {
                let restart = s
                    .input_format
                    .as_ref()
                    .is_none_or(|current| current.differs_materially(&format));
                if !restart {
                    debug!(media_type = %format.media_type, "Only format metadata changed");
                    s.input_format = Some(format);
                    return Ok(FormatOutcome::MetadataUpdated);
                }
                drop(s);

                info!(
                    width = format.width,
                    height = format.height,
                    "Stream format changed, restarting codec"
                );
                self.restart(format)?;
                Ok(FormatOutcome::Restarted)
            }
            DecoderState::Opened | DecoderState::Configured | DecoderState::Stopped => {
                debug!(
                    media_type = %format.media_type,
                    width = format.width,
                    height = format.height,
                    "Stream format set"
                );
                s.input_format = Some(format);
                s.state = DecoderState::Configured;
                Ok(FormatOutcome::Configured)
            }
        }
    }

    /// Configure and start on first use, restart on material changes
    pub fn set_format(&self, format: StreamFormat) -> DecoderResult<FormatOutcome> {
        let outcome = self.configure(format)?;
        if outcome == FormatOutcome::Configured {
            self.start()?;
        }
        Ok(outcome)
    }

    fn restart(&self, format: StreamFormat) -> DecoderResult<()> {
        if let Err(e) = self.drain(false) {
            warn!(error = %e, "Drain before restart failed");
        }
        self.stop()?;
        self.close()?;
        self.open()?;
        {
            let mut s = self.shared.lock();
            s.input_format = Some(format);
            s.state = DecoderState::Configured;
        }
        self.start()
    }

    /// Configure and start the device, then the output loop
    pub fn start(&self) -> DecoderResult<()> {
        let config = &self.shared.config;
        let mut s = self.shared.lock();
        if s.started {
            return Ok(());
        }
        if !matches!(s.state, DecoderState::Configured | DecoderState::Stopped) {
            return Err(DecoderError::InvalidState(format!("start while {}", s.state)));
        }
        let Some(format) = s.input_format.clone() else {
            return Err(DecoderError::InvalidState(
                "start without a stream format".to_string(),
            ));
        };
        let Some(device) = s.device.clone() else {
            return Err(DecoderError::InvalidState(
                "start without a codec".to_string(),
            ));
        };

        let codec_format = format.codec_format(config.input_alignment)?;
        let surface = if config.hardware_rendering {
            self.shared.sink.surface()
        } else {
            None
        };
        debug!(format = %codec_format, "Configuring codec");

        let failed = |e: crate::errors::DeviceError| DecoderError::ConfigurationFailed(e.to_string());
        device.configure(&codec_format, surface, 0).map_err(failed)?;
        device.start().map_err(failed)?;
        let inputs = device.input_buffers().map_err(failed)?;
        let outputs = device.output_buffers().map_err(failed)?;
        debug!(
            inputs = inputs.len(),
            outputs = outputs.len(),
            "Fetched codec buffers"
        );

        s.input_buffers.replace(inputs);
        s.output_buffers.replace(outputs);
        s.started = true;
        s.flushing = false;
        s.eos = false;
        s.downstream_flow = FlowStatus::Ok;
        s.output_timeout = config.output_timeout_initial();
        s.output = None;
        s.last_upstream_ts = 0;
        s.state = DecoderState::Started;
        self.shared.caps.reset();
        drop(s);

        info!(codec = %self.codec.name, "Started codec");
        self.start_task()
    }

    /// Flush and stop the device and the output loop
    pub fn stop(&self) -> DecoderResult<()> {
        let device = {
            let mut s = self.shared.lock();
            s.flushing = true;
            s.flush_epoch += 1;
            if s.started { s.device.clone() } else { None }
        };
        self.shared.drain.cancel();

        if let Some(device) = &device {
            if let Err(e) = device.flush() {
                debug!(error = %e, "Flush before stop failed");
            }
            if let Err(e) = device.stop() {
                warn!(error = %e, "Failed to stop codec");
            }
        }
        self.stop_task();

        let mut s = self.shared.lock();
        self.shared.release_pending(&mut s);
        s.started = false;
        s.eos = false;
        s.downstream_flow = FlowStatus::Ok;
        s.input_buffers.clear();
        s.output_buffers.clear();
        s.output = None;
        s.last_upstream_ts = 0;
        s.waiting_segment = false;
        if matches!(s.state, DecoderState::Started | DecoderState::Configured) {
            s.state = DecoderState::Stopped;
        }
        self.shared.caps.reset();
        debug!("Stopped decoder");
        Ok(())
    }

    /// Discard everything in flight and resume with an empty pipeline
    pub fn flush(&self) -> DecoderResult<()> {
        let device = {
            let mut s = self.shared.lock();
            if !s.started {
                debug!("Flush ignored, codec not started");
                return Ok(());
            }
            s.flushing = true;
            s.flush_epoch += 1;
            s.device.clone()
        };
        self.shared.drain.cancel();

        if let Some(device) = &device
            && let Err(e) = device.flush()
        {
            warn!(error = %e, "Failed to flush codec");
        }
        self.stop_task();

        {
            let mut s = self.shared.lock();
            self.shared.release_pending(&mut s);
            s.flushing = false;
            s.eos = false;
            s.downstream_flow = FlowStatus::Ok;
            s.last_upstream_ts = 0;
        }
        debug!("Flushed decoder");
        self.start_task()
    }

    /// Release the codec device
    pub fn close(&self) -> DecoderResult<()> {
        if self.is_started() {
            self.stop()?;
        }
        let device = {
            let mut s = self.shared.lock();
            s.state = DecoderState::Closed;
            s.input_format = None;
            s.flushing = true;
            s.device.take()
        };
        if let Some(device) = device {
            if let Err(e) = device.release() {
                warn!(error = %e, "Failed to release codec");
            }
            info!(codec = %self.codec.name, "Closed codec");
        }
        Ok(())
    }

    /// Drain the device, see [`drain`]
    pub fn drain(&self, at_eos: bool) -> DecoderResult<()> {
        drain::drain(&self.shared, at_eos)
    }

    /// Finish the stream: drain the device and forward end of stream
    pub fn handle_eos(&self) -> FlowStatus {
        if self.is_started() && !self.shared.caps.wait(self.shared.config.src_caps_wait()) {
            debug!("No output format before end of stream");
        }

        let flow = match self.drain(true) {
            Ok(()) => FlowStatus::Ok,
            Err(e) if e.is_flushing() => return FlowStatus::Flushing,
            Err(e) => {
                warn!(error = %e, "Failed to drain codec at end of stream");
                self.shared.sink.report_error(&e);
                e.flow_status()
            }
        };
        self.shared.sink.push_eos();
        flow
    }

    /// A seek was requested; input stalls now fail instead of waiting
    pub fn seek_requested(&self) {
        self.shared.lock().waiting_segment = true;
    }

    /// The segment following a seek arrived
    pub fn segment_received(&self) {
        self.shared.lock().waiting_segment = false;
    }

    /// Wrap a payload into a numbered frame
    pub fn new_frame(&self, payload: impl Into<Arc<[u8]>>) -> VideoCodecFrame {
        let number = self.next_frame.fetch_add(1, Ordering::Relaxed);
        VideoCodecFrame::new(number, payload)
    }

    /// Number, then decode one frame
    pub fn deliver_frame(
        &self,
        payload: impl Into<Arc<[u8]>>,
        pts: Option<u64>,
        duration: Option<u64>,
        sync_point: bool,
    ) -> FlowStatus {
        let frame = self
            .new_frame(payload)
            .with_timing(pts, duration)
            .with_sync_point(sync_point);
        self.handle_frame(frame)
    }

    fn task_lock(&self) -> MutexGuard<'_, Option<LoopController>> {
        self.task.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn start_task(&self) -> DecoderResult<()> {
        let shared = Arc::clone(&self.shared);
        let controller = LoopController::start(constants::REAPER_THREAD_NAME, move || {
            reaper::iterate(&shared)
        })
        .map_err(|e| DecoderError::ConfigurationFailed(format!("output loop: {}", e)))?;

        if let Some(mut previous) = self.task_lock().replace(controller) {
            previous.stop();
        }
        Ok(())
    }

    fn stop_task(&self) {
        let task = self.task_lock().take();
        if let Some(mut task) = task {
            task.stop();
        }
    }
}

impl Drop for VideoDecoder {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(error = %e, "Failed to close decoder on drop");
        }
    }
}
