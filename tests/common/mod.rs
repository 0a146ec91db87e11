// SPDX-License-Identifier: GPL-3.0-only

//! Shared helpers for the decoder integration tests

#![allow(dead_code)]

use amc_videodec::codec::simulated::{DeviceEvent, SimulatedFactory, SimulatedOptions};
use amc_videodec::codec::{CodecType, SurfaceHandle};
use amc_videodec::constants::{buffer_flags, color_format};
use amc_videodec::{
    CodecInfo, DecoderConfig, DecoderError, DecoderSink, FlowStatus, OutputBuffer, OutputState,
    StreamFormat, VideoDecoder, VideoInfo,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

pub const FRAME_NS: u64 = 33_333_333;
pub const CODEC_NAME: &str = "OMX.sim.video.decoder.avc";

/// A finished frame as seen by the sink
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finished {
    pub frame: u64,
    pub pts: Option<u64>,
    /// First luma byte, the simulated device fills it from the payload
    pub luma: u8,
    pub hardware_rendered: bool,
}

/// Sink recording every call
#[derive(Default)]
pub struct RecordingSink {
    pub finished: Mutex<Vec<Finished>>,
    pub dropped: Mutex<Vec<u64>>,
    pub released: Mutex<Vec<u64>>,
    pub standalone: Mutex<Vec<Option<u64>>>,
    pub states: Mutex<Vec<OutputState>>,
    pub errors: Mutex<Vec<DecoderError>>,
    pub eos: AtomicUsize,
    /// Returned from `finish_frame`
    pub finish_flow: Mutex<FlowStatus>,
    /// Hand out surface-backed buffers
    pub surface_backed: bool,
    /// Offer a surface to the device without backing buffers by it
    pub offers_surface: bool,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_surface() -> Arc<Self> {
        Arc::new(Self {
            surface_backed: true,
            ..Self::default()
        })
    }

    pub fn finished(&self) -> Vec<Finished> {
        self.finished.lock().unwrap().clone()
    }

    pub fn finished_numbers(&self) -> Vec<u64> {
        let mut numbers: Vec<u64> = self.finished().iter().map(|f| f.frame).collect();
        numbers.sort_unstable();
        numbers
    }

    pub fn dropped(&self) -> Vec<u64> {
        let mut numbers = self.dropped.lock().unwrap().clone();
        numbers.sort_unstable();
        numbers
    }

    pub fn released(&self) -> Vec<u64> {
        self.released.lock().unwrap().clone()
    }

    pub fn errors(&self) -> Vec<DecoderError> {
        self.errors.lock().unwrap().clone()
    }

    pub fn eos_count(&self) -> usize {
        self.eos.load(Ordering::SeqCst)
    }
}

impl DecoderSink for RecordingSink {
    fn output_state_changed(&self, state: &OutputState) {
        self.states.lock().unwrap().push(state.clone());
    }

    fn allocate_output_buffer(
        &self,
        _frame: Option<u64>,
        info: &VideoInfo,
    ) -> Result<OutputBuffer, FlowStatus> {
        let mut buffer = OutputBuffer::new(info);
        buffer.surface_backed = self.surface_backed;
        Ok(buffer)
    }

    fn finish_frame(&self, frame: u64, buffer: OutputBuffer) -> FlowStatus {
        self.finished.lock().unwrap().push(Finished {
            frame,
            pts: buffer.pts,
            luma: buffer.data.first().copied().unwrap_or(0),
            hardware_rendered: buffer.hardware_rendered,
        });
        *self.finish_flow.lock().unwrap()
    }

    fn drop_frame(&self, frame: u64) -> FlowStatus {
        self.dropped.lock().unwrap().push(frame);
        FlowStatus::Ok
    }

    fn push_buffer(&self, buffer: OutputBuffer) -> FlowStatus {
        self.standalone.lock().unwrap().push(buffer.pts);
        FlowStatus::Ok
    }

    fn push_eos(&self) {
        self.eos.fetch_add(1, Ordering::SeqCst);
    }

    fn release_frame(&self, frame: u64) {
        self.released.lock().unwrap().push(frame);
    }

    fn report_error(&self, error: &DecoderError) {
        self.errors.lock().unwrap().push(error.clone());
    }

    fn surface(&self) -> Option<SurfaceHandle> {
        (self.surface_backed || self.offers_surface).then_some(SurfaceHandle(1))
    }
}

pub fn avc_codec() -> CodecInfo {
    CodecInfo {
        name: CODEC_NAME.to_string(),
        is_encoder: false,
        supported_types: vec![CodecType {
            mime: "video/avc".to_string(),
            color_formats: vec![color_format::YUV420_SEMI_PLANAR],
            profile_levels: Vec::new(),
        }],
    }
}

pub fn h264(width: u32, height: u32) -> StreamFormat {
    StreamFormat::new("video/x-h264", width, height)
}

/// Decoder on a simulated device, opened but not started
pub fn decoder(
    options: SimulatedOptions,
    config: DecoderConfig,
) -> (VideoDecoder, Arc<SimulatedFactory>, Arc<RecordingSink>) {
    decoder_with_sink(options, config, RecordingSink::new())
}

pub fn decoder_with_sink(
    options: SimulatedOptions,
    config: DecoderConfig,
    sink: Arc<RecordingSink>,
) -> (VideoDecoder, Arc<SimulatedFactory>, Arc<RecordingSink>) {
    let factory = Arc::new(SimulatedFactory::new(options));
    let decoder = VideoDecoder::new(
        avc_codec(),
        Arc::clone(&factory) as _,
        Arc::clone(&sink) as _,
        config,
    );
    decoder.open().unwrap();
    (decoder, factory, sink)
}

/// Started decoder on a default 64x48 stream
pub fn started(
    options: SimulatedOptions,
    config: DecoderConfig,
) -> (VideoDecoder, Arc<SimulatedFactory>, Arc<RecordingSink>) {
    let (decoder, factory, sink) = decoder(options, config);
    decoder.set_format(h264(64, 48)).unwrap();
    (decoder, factory, sink)
}

/// Payload whose first byte identifies frame `n`
pub fn payload(n: u64, size: usize) -> Vec<u8> {
    vec![fill_byte(n); size]
}

pub fn fill_byte(n: u64) -> u8 {
    (n % 250) as u8 + 1
}

/// Deliver `count` frames starting at frame index `first`
pub fn feed(decoder: &VideoDecoder, first: u64, count: u64) {
    for n in first..first + count {
        let flow = decoder.deliver_frame(payload(n, 64), Some(n * FRAME_NS), Some(FRAME_NS), n == 0);
        assert_eq!(flow, FlowStatus::Ok, "frame {}", n);
    }
}

pub fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        thread::sleep(Duration::from_millis(1));
    }
}

pub fn queued_eos_count(events: &[DeviceEvent]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, DeviceEvent::Queued { flags, .. } if *flags & buffer_flags::END_OF_STREAM != 0))
        .count()
}

/// Whether `expected` appears in `events` in order, not necessarily adjacent
pub fn contains_in_order(events: &[DeviceEvent], expected: &[DeviceEvent]) -> bool {
    let mut wanted = expected.iter().peekable();
    for event in events {
        if wanted.peek().is_some_and(|w| *w == event) {
            wanted.next();
        }
    }
    wanted.peek().is_none()
}
