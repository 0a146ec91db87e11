// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for input chunking and decoded output delivery

mod common;

use amc_videodec::codec::simulated::{DeviceEvent, SimulatedOptions};
use amc_videodec::codec::{BufferArena, DeviceBuffer};
use amc_videodec::constants::buffer_flags;
use amc_videodec::{DecoderConfig, DecoderError, FlowStatus, VideoFormat};
use common::*;
use std::sync::Arc;
use std::time::Instant;

#[test]
fn test_every_frame_finished_once() {
    let (decoder, _factory, sink) = started(SimulatedOptions::default(), DecoderConfig::default());

    feed(&decoder, 0, 20);
    assert_eq!(decoder.handle_eos(), FlowStatus::Ok);

    let finished = sink.finished();
    assert_eq!(finished.len(), 20);
    for (n, frame) in finished.iter().enumerate() {
        let n = n as u64;
        assert_eq!(frame.frame, n);
        assert_eq!(frame.pts, Some(n * FRAME_NS));
        assert_eq!(frame.luma, fill_byte(n));
        assert!(!frame.hardware_rendered);
    }
    assert!(sink.dropped().is_empty());
    assert_eq!(sink.eos_count(), 1);

    let stats = decoder.stats();
    assert_eq!(stats.frames_submitted, 20);
    assert_eq!(stats.chunks_queued, 20);
    assert_eq!(stats.frames_finished, 20);
    assert_eq!(stats.frames_completed(), 20);
    assert_eq!(stats.format_changes, 1);
}

#[test]
fn test_output_format_negotiated() {
    let options = SimulatedOptions {
        stride_padding: 16,
        slice_padding: 8,
        ..SimulatedOptions::default()
    };
    let (decoder, _factory, sink) = started(options, DecoderConfig::default());

    feed(&decoder, 0, 2);
    assert_eq!(decoder.handle_eos(), FlowStatus::Ok);

    let states = sink.states.lock().unwrap().clone();
    assert_eq!(states.len(), 1);
    let state = &states[0];
    assert_eq!(state.info.format, VideoFormat::Nv12);
    assert_eq!((state.info.width, state.info.height), (64, 48));
    assert_eq!(state.color.stride, 80);
    assert_eq!(state.color.slice_height, 56);

    // Row padding is stripped when copying out
    let finished = sink.finished();
    assert_eq!(finished.len(), 2);
    assert_eq!(finished[1].luma, fill_byte(1));
}

#[test]
fn test_reordered_output_matches_by_timestamp() {
    let options = SimulatedOptions {
        reorder: true,
        ..SimulatedOptions::default()
    };
    let (decoder, _factory, sink) = started(options, DecoderConfig::default());

    feed(&decoder, 0, 10);
    assert_eq!(decoder.handle_eos(), FlowStatus::Ok);

    let finished = sink.finished();
    assert_eq!(finished.len(), 10);
    // Output arrives pairwise swapped but every frame gets its own picture
    assert_eq!(finished[0].frame, 1);
    assert_eq!(finished[1].frame, 0);
    for frame in &finished {
        assert_eq!(frame.pts, Some(frame.frame * FRAME_NS));
        assert_eq!(frame.luma, fill_byte(frame.frame));
    }
    assert!(sink.dropped().is_empty());
    assert!(sink.standalone.lock().unwrap().is_empty());
}

#[test]
fn test_lost_frames_are_dropped() {
    let options = SimulatedOptions {
        drop_every: Some(3),
        ..SimulatedOptions::default()
    };
    let config = DecoderConfig {
        stale_frame_max_distance: 0,
        ..DecoderConfig::default()
    };
    let (decoder, _factory, sink) = started(options, config);

    feed(&decoder, 0, 9);
    assert_eq!(decoder.handle_eos(), FlowStatus::Ok);

    // The device swallowed the 3rd, 6th and 9th frame
    assert_eq!(sink.finished_numbers(), vec![0, 1, 3, 4, 6, 7]);
    assert_eq!(sink.dropped(), vec![2, 5, 8]);
    assert_eq!(decoder.pending_frames(), 0);

    let stats = decoder.stats();
    assert_eq!(stats.frames_stale, 2);
    assert_eq!(stats.frames_completed(), 9);
}

#[test]
fn test_lost_frames_kept_within_window() {
    let options = SimulatedOptions {
        drop_every: Some(3),
        ..SimulatedOptions::default()
    };
    let (decoder, _factory, sink) = started(options, DecoderConfig::default());

    feed(&decoder, 0, 5);
    decoder.drain(false).unwrap();

    // Frame 2 is only one frame behind frame 3, so it is not swept as
    // lost; the empty end-of-stream buffer is matched to it instead
    assert_eq!(sink.finished_numbers(), vec![0, 1, 3, 4]);
    assert_eq!(sink.dropped(), vec![2]);
    assert_eq!(decoder.pending_frames(), 0);
    let stats = decoder.stats();
    assert_eq!(stats.frames_stale, 0);
    assert_eq!(stats.frames_dropped, 1);
}

#[test]
fn test_large_frame_split_over_slots() {
    let options = SimulatedOptions {
        input_capacity: 100,
        ..SimulatedOptions::default()
    };
    let (decoder, factory, _sink) = started(options, DecoderConfig::default());

    let pts = 1_000_000_000;
    let duration = 30_000_000;
    let flow = decoder.deliver_frame(payload(0, 250), Some(pts), Some(duration), true);
    assert_eq!(flow, FlowStatus::Ok);

    let chunks: Vec<(usize, i64, u32)> = factory
        .events()
        .into_iter()
        .filter_map(|e| match e {
            DeviceEvent::Queued {
                size,
                presentation_time_us,
                flags,
                ..
            } => Some((size, presentation_time_us, flags)),
            _ => None,
        })
        .collect();
    assert_eq!(
        chunks,
        vec![
            (100, 1_000_000, buffer_flags::SYNC_FRAME),
            (100, 1_012_000, 0),
            (50, 1_024_000, 0),
        ]
    );

    let stats = decoder.stats();
    assert_eq!(stats.frames_submitted, 1);
    assert_eq!(stats.chunks_queued, 3);
}

#[test]
fn test_buffers_changed_refreshes_output_arrays() {
    let (decoder, factory, sink) = started(SimulatedOptions::default(), DecoderConfig::default());

    feed(&decoder, 0, 3);
    decoder.drain(false).unwrap();
    factory.latest().unwrap().trigger_buffers_changed();

    feed(&decoder, 3, 3);
    assert_eq!(decoder.handle_eos(), FlowStatus::Ok);
    assert_eq!(sink.finished_numbers(), (0..6).collect::<Vec<_>>());
    assert!(sink.errors().is_empty());
    // One announced on start, one triggered
    assert_eq!(decoder.stats().buffers_changes, 2);
}

#[test]
fn test_slot_refs_do_not_survive_buffers_changed() {
    let mut arena = BufferArena::new();
    arena.replace(vec![DeviceBuffer::heap(16), DeviceBuffer::heap(16)]);
    let slot = arena.acquire(1).unwrap();
    assert!(arena.get(slot).is_ok());

    arena.replace(vec![DeviceBuffer::heap(32), DeviceBuffer::heap(32)]);
    assert!(matches!(
        arena.get(slot),
        Err(DecoderError::InvalidBufferIndex { index: 1, .. })
    ));
    let slot = arena.acquire(1).unwrap();
    assert_eq!(arena.get(slot).unwrap().capacity(), 32);
    assert!(arena.acquire(2).is_err());
}

#[test]
fn test_late_frame_dropped() {
    let (decoder, _factory, sink) = started(SimulatedOptions::default(), DecoderConfig::default());

    let frame = decoder
        .new_frame(payload(0, 64))
        .with_timing(Some(0), Some(FRAME_NS))
        .with_sync_point(true)
        .with_deadline(Instant::now());
    assert_eq!(decoder.handle_frame(frame), FlowStatus::Ok);
    feed(&decoder, 1, 1);
    assert_eq!(decoder.handle_eos(), FlowStatus::Ok);

    assert_eq!(sink.dropped(), vec![0]);
    assert_eq!(sink.finished_numbers(), vec![1]);
    assert_eq!(decoder.stats().frames_dropped, 1);
}

#[test]
fn test_unmatched_output_pushed_standalone() {
    let options = SimulatedOptions {
        input_capacity: 32,
        ..SimulatedOptions::default()
    };
    let (decoder, _factory, sink) = started(options, DecoderConfig::default());

    // Two slots worth of payload decode to two pictures for one frame
    let flow = decoder.deliver_frame(payload(0, 64), Some(0), Some(FRAME_NS), true);
    assert_eq!(flow, FlowStatus::Ok);
    assert_eq!(decoder.handle_eos(), FlowStatus::Ok);

    assert_eq!(sink.finished_numbers(), vec![0]);
    assert_eq!(sink.standalone.lock().unwrap().len(), 1);
    assert_eq!(decoder.stats().standalone_buffers, 1);
}

#[test]
fn test_untimed_frames_match_in_order() {
    let (decoder, _factory, sink) = started(SimulatedOptions::default(), DecoderConfig::default());

    for n in 0..4 {
        let flow = decoder.deliver_frame(payload(n, 64), None, None, n == 0);
        assert_eq!(flow, FlowStatus::Ok);
    }
    assert_eq!(decoder.handle_eos(), FlowStatus::Ok);

    let finished = sink.finished();
    assert_eq!(
        finished.iter().map(|f| f.frame).collect::<Vec<_>>(),
        vec![0, 1, 2, 3]
    );
    for frame in &finished {
        assert_eq!(frame.luma, fill_byte(frame.frame));
        assert_eq!(frame.pts, None);
    }
}

#[test]
fn test_hardware_rendering_skips_copy() {
    let config = DecoderConfig {
        hardware_rendering: true,
        ..DecoderConfig::default()
    };
    let (decoder, factory, sink) =
        decoder_with_sink(SimulatedOptions::default(), config, RecordingSink::with_surface());
    decoder.set_format(h264(64, 48)).unwrap();

    feed(&decoder, 0, 2);
    assert_eq!(decoder.handle_eos(), FlowStatus::Ok);

    let finished = sink.finished();
    assert_eq!(finished.len(), 2);
    assert!(finished.iter().all(|f| f.hardware_rendered && f.luma == 0));

    let rendered = factory
        .events()
        .iter()
        .filter(|e| matches!(e, DeviceEvent::ReleasedOutput { render: true, .. }))
        .count();
    assert_eq!(rendered, 2);
}

#[test]
fn test_empty_outputs_finish_frames() {
    let config = DecoderConfig {
        hardware_rendering: true,
        ..DecoderConfig::default()
    };
    // The device renders to the surface but downstream buffers are plain memory
    let sink = Arc::new(RecordingSink {
        offers_surface: true,
        ..RecordingSink::default()
    });
    let (decoder, _factory, sink) = decoder_with_sink(SimulatedOptions::default(), config, sink);
    decoder.set_format(h264(64, 48)).unwrap();

    feed(&decoder, 0, 3);
    assert_eq!(decoder.handle_eos(), FlowStatus::Ok);

    assert_eq!(sink.finished_numbers(), vec![0, 1, 2]);
    assert!(sink.dropped().is_empty());
    let finished = sink.finished();
    assert!(finished.iter().all(|f| !f.hardware_rendered && f.luma == 0));
    assert_eq!(decoder.stats().frames_finished, 3);
}

#[test]
fn test_timestamps_near_limit() {
    let (decoder, _factory, sink) = started(SimulatedOptions::default(), DecoderConfig::default());

    let flow = decoder.deliver_frame(payload(0, 64), Some(u64::MAX - 1), Some(FRAME_NS), true);
    assert_eq!(flow, FlowStatus::Ok);
    assert_eq!(decoder.handle_eos(), FlowStatus::Ok);
    assert_eq!(sink.finished().len() + sink.dropped().len(), 1);
}
