// SPDX-License-Identifier: GPL-3.0-only

//! CLI commands
//!
//! This module provides command-line functionality for:
//! - Decoding a generated stream with the simulated codec
//! - Inspecting the frame layout of a codec color format
//! - Listing a codec registry
//! - Writing the default configuration

use amc_videodec::codec::simulated::{SimulatedFactory, SimulatedOptions};
use amc_videodec::codec::registry::probe_decoders;
use amc_videodec::codec::{CodecRegistry, CodecType};
use amc_videodec::constants::color_format;
use amc_videodec::formats::caps::device_mime;
use amc_videodec::formats::color::color_format_name;
use amc_videodec::formats::{ColorFormatInfo, Crop};
use amc_videodec::{
    CodecInfo, DecoderConfig, DecoderError, DecoderSink, FlowStatus, OutputBuffer, OutputState,
    StaticRegistry, StreamFormat, VideoDecoder,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Frame duration of the generated stream, 30 fps
const FRAME_DURATION_NS: u64 = 33_333_333;
/// Keyframe interval of the generated stream
const SYNC_INTERVAL: u64 = 30;

pub struct SimulateArgs {
    pub frames: u64,
    pub width: u32,
    pub height: u32,
    pub reorder: bool,
    pub input_capacity: usize,
    pub frame_size: usize,
    pub drop_every: Option<usize>,
    pub config: Option<PathBuf>,
}

/// Sink counting what comes out of the decoder
#[derive(Default)]
struct CountingSink {
    finished: AtomicU64,
    dropped: AtomicU64,
    standalone: AtomicU64,
    released: AtomicU64,
    bytes: AtomicU64,
    eos: AtomicBool,
    format: Mutex<Option<String>>,
    errors: Mutex<Vec<String>>,
}

impl DecoderSink for CountingSink {
    fn output_state_changed(&self, state: &OutputState) {
        let description = format!(
            "{} {}x{} (codec stride {}, slice height {})",
            state.info.format,
            state.info.width,
            state.info.height,
            state.color.stride,
            state.color.slice_height
        );
        if let Ok(mut format) = self.format.lock() {
            *format = Some(description);
        }
    }

    fn finish_frame(&self, _frame: u64, buffer: OutputBuffer) -> FlowStatus {
        self.finished.fetch_add(1, Ordering::Relaxed);
        self.bytes
            .fetch_add(buffer.data.len() as u64, Ordering::Relaxed);
        FlowStatus::Ok
    }

    fn drop_frame(&self, _frame: u64) -> FlowStatus {
        self.dropped.fetch_add(1, Ordering::Relaxed);
        FlowStatus::Ok
    }

    fn push_buffer(&self, _buffer: OutputBuffer) -> FlowStatus {
        self.standalone.fetch_add(1, Ordering::Relaxed);
        FlowStatus::Ok
    }

    fn push_eos(&self) {
        self.eos.store(true, Ordering::SeqCst);
    }

    fn release_frame(&self, _frame: u64) {
        self.released.fetch_add(1, Ordering::Relaxed);
    }

    fn report_error(&self, error: &DecoderError) {
        if let Ok(mut errors) = self.errors.lock() {
            errors.push(error.to_string());
        }
    }
}

/// Decode a generated H.264-like stream with the simulated codec
pub fn simulate(args: SimulateArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = match &args.config {
        Some(path) => DecoderConfig::load(path)?,
        None => DecoderConfig::default(),
    };
    if args.frame_size == 0 {
        return Err("frame size must be non-zero".into());
    }

    let options = SimulatedOptions {
        input_capacity: args.input_capacity,
        reorder: args.reorder,
        drop_every: args.drop_every,
        ..SimulatedOptions::default()
    };
    let factory = Arc::new(SimulatedFactory::new(options));
    let registry = StaticRegistry::new(vec![CodecInfo {
        name: "OMX.sim.video.decoder.avc".to_string(),
        is_encoder: false,
        supported_types: vec![CodecType {
            mime: "video/avc".to_string(),
            color_formats: vec![color_format::YUV420_SEMI_PLANAR],
            profile_levels: Vec::new(),
        }],
    }]);

    let format = StreamFormat::new("video/x-h264", args.width, args.height)
        .with_framerate(30, 1)
        .with_max_input_size(args.frame_size);
    let sink = Arc::new(CountingSink::default());
    let decoder = VideoDecoder::for_stream(
        &registry,
        &format,
        factory,
        Arc::clone(&sink) as Arc<dyn DecoderSink>,
        config,
    )?;

    println!("Using codec: {}", decoder.codec().name);
    decoder.open()?;
    decoder.set_format(format)?;

    let started = Instant::now();
    for n in 0..args.frames {
        // Payloads differ per frame so decoded frames can be told apart
        let payload = vec![(n % 251) as u8 + 1; args.frame_size];
        let flow = decoder.deliver_frame(
            payload,
            Some(n * FRAME_DURATION_NS),
            Some(FRAME_DURATION_NS),
            n % SYNC_INTERVAL == 0,
        );
        if !flow.is_ok() {
            println!("Stopped after {} frames: {}", n, flow);
            break;
        }
    }
    let eos_flow = decoder.handle_eos();
    let elapsed = started.elapsed();
    let stats = decoder.stats();
    decoder.close()?;

    if let Ok(format) = sink.format.lock()
        && let Some(format) = format.as_ref()
    {
        println!("Output format: {}", format);
    }
    println!();
    println!("Frames submitted:   {}", stats.frames_submitted);
    println!("Input buffers:      {}", stats.chunks_queued);
    println!("Frames finished:    {}", sink.finished.load(Ordering::Relaxed));
    println!("Frames dropped:     {}", stats.frames_dropped);
    println!("Frames lost:        {}", stats.frames_stale);
    println!("Unmatched buffers:  {}", sink.standalone.load(Ordering::Relaxed));
    println!("Frames discarded:   {}", sink.released.load(Ordering::Relaxed));
    println!("Decoded bytes:      {}", sink.bytes.load(Ordering::Relaxed));
    println!(
        "End of stream:      {} ({})",
        sink.eos.load(Ordering::SeqCst),
        eos_flow
    );
    println!("Elapsed:            {:.1?}", elapsed);
    if elapsed > Duration::ZERO {
        println!(
            "Throughput:         {:.1} fps",
            stats.frames_finished as f64 / elapsed.as_secs_f64()
        );
    }

    let errors = sink.errors.lock().map(|e| e.clone()).unwrap_or_default();
    if !errors.is_empty() {
        println!();
        println!("Errors:");
        for error in &errors {
            println!("  {}", error);
        }
        return Err(format!("{} decoder error(s)", errors.len()).into());
    }

    Ok(())
}

pub struct ColorInfoArgs {
    pub color_format: String,
    pub width: u32,
    pub height: u32,
    pub stride: Option<u32>,
    pub slice_height: Option<u32>,
    pub codec: String,
    pub crop: Crop,
    pub json: bool,
}

fn parse_color_format(text: &str) -> Result<i32, Box<dyn std::error::Error>> {
    let value = match text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
    {
        Some(hex) => u32::from_str_radix(hex, 16)? as i32,
        None => text.parse::<i32>()?,
    };
    Ok(value)
}

/// Print the frame layout derived for a color format
pub fn color_info(args: ColorInfoArgs) -> Result<(), Box<dyn std::error::Error>> {
    let color_format = parse_color_format(&args.color_format)?;
    let (width, height) = args.crop.apply(args.width, args.height);

    let info = ColorFormatInfo::new(
        &args.codec,
        color_format,
        width,
        height,
        args.stride.unwrap_or(args.width),
        args.slice_height.unwrap_or(args.height),
        args.crop,
    )?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&info)?);
        return Ok(());
    }

    println!(
        "Color format: {} (0x{:08x}) {}",
        info.color_format,
        info.color_format,
        color_format_name(info.color_format)
    );
    if info.color_format != color_format {
        println!(
            "  rewritten from {} for {}",
            color_format_name(color_format),
            args.codec
        );
    }
    if let Some(format) = amc_videodec::VideoFormat::from_color_format(info.color_format) {
        println!("Video format: {}", format);
    }
    println!("Visible size: {}x{}", info.width, info.height);
    println!("Stride:       {}", info.stride);
    println!("Slice height: {}", info.slice_height);
    println!(
        "Crop:         left {} right {} top {} bottom {}",
        info.crop.left, info.crop.right, info.crop.top, info.crop.bottom
    );
    println!("Frame size:   {} bytes", info.frame_size);

    Ok(())
}

/// List the codecs in a registry file
pub fn list_codecs(
    registry: &Path,
    mime: Option<&str>,
    probe: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let registry = StaticRegistry::load(registry)?;

    if registry.codecs().is_empty() {
        println!("No codecs found.");
        return Ok(());
    }

    println!("Registered codecs:");
    println!();
    for codec in registry.codecs() {
        let kind = if codec.is_encoder { "encoder" } else { "decoder" };
        println!("  {} ({})", codec.name, kind);
        for supported in &codec.supported_types {
            let formats: Vec<String> = supported
                .color_formats
                .iter()
                .map(|&c| format!("{} (0x{:x})", color_format_name(c), c))
                .collect();
            let usable = if supported.accepts_color_formats(codec.is_encoder) {
                ""
            } else {
                " [unusable color formats]"
            };
            println!("      {}{}", supported.mime, usable);
            if !formats.is_empty() {
                println!("        Color formats: {}", formats.join(", "));
            }
            if !supported.profile_levels.is_empty() {
                println!(
                    "        Profile/levels: {}",
                    supported.profile_levels.len()
                );
            }
        }
    }

    if let Some(mime) = mime {
        // Accept stream media types as well as codec MIME types
        let codec_mime = device_mime(mime, None).unwrap_or(mime);
        println!();
        match registry.find_decoder(codec_mime) {
            Some(codec) => println!("Decoder for {}: {}", codec_mime, codec.name),
            None => println!("No usable decoder for {}", codec_mime),
        }
    }

    if probe {
        // Only the simulated device is available outside a device build
        let factory = SimulatedFactory::new(SimulatedOptions::default());
        let available = probe_decoders(&registry, &factory);
        println!();
        println!("Instantiable decoders: {}", available.len());
        for name in available {
            println!("  {}", name);
        }
    }

    Ok(())
}

/// Write the default decoder configuration as JSON
pub fn write_config(output: &Path) -> Result<(), Box<dyn std::error::Error>> {
    DecoderConfig::default().save(output)?;
    println!("Wrote default configuration to {}", output.display());
    Ok(())
}
