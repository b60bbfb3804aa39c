// SPDX-License-Identifier: MPL-2.0

//! Integration tests for the capture session core

use livecapture::config::SessionConfig;
use livecapture::frame::{
    AudioBlock, AudioFormat, EncoderSink, FrameData, VideoFormat, VideoFrame,
};
use livecapture::session::CaptureSession;
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct Collected {
    video: Vec<VideoFrame>,
    audio: Vec<AudioBlock>,
}

#[derive(Clone, Default)]
struct CollectSink(Arc<Mutex<Collected>>);

impl EncoderSink for CollectSink {
    fn put_video(&mut self, frame: VideoFrame) {
        self.0.lock().unwrap().video.push(frame);
    }

    fn put_audio(&mut self, block: AudioBlock) {
        self.0.lock().unwrap().audio.push(block);
    }
}

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn session(width: u32, height: u32) -> (CaptureSession, CollectSink) {
    init_logging();
    let sink = CollectSink::default();
    let config = SessionConfig {
        width,
        height,
        ..Default::default()
    };
    let session = CaptureSession::new(config, Box::new(sink.clone()), false);
    (session, sink)
}

fn solid_frame(width: u32, height: u32, fill: [u8; 4], pts: f64) -> VideoFrame {
    let mut data = Vec::with_capacity((width * height * 4) as usize);
    for _ in 0..width * height {
        data.extend_from_slice(&fill);
    }
    VideoFrame {
        data: FrameData::new(data),
        format: VideoFormat::rgba(width, height),
        pts,
    }
}

fn audio_block(pts: f64, sample_count: usize) -> AudioBlock {
    AudioBlock {
        data: FrameData::new(vec![0x3C; sample_count * 4]),
        format: AudioFormat::default(),
        sample_count,
        pts,
    }
}

#[test]
fn composed_frames_reach_the_sink_unchanged() {
    let (mut session, sink) = session(4, 4);
    let frame = solid_frame(4, 4, [10, 20, 30, 255], 1.0);
    session.process_video(frame.clone(), 1.0);

    let collected = sink.0.lock().unwrap();
    assert_eq!(collected.video.len(), 1);
    let out = &collected.video[0];
    assert!((out.pts - 1.0).abs() < 1e-12);
    // Default geometry is the identity, so the bytes pass through.
    assert_eq!(&out.data[..], &frame.data[..]);
}

#[test]
fn pause_substitutes_black_frames_and_silence() {
    let (mut session, sink) = session(4, 4);
    session.set_paused(true);
    session.process_video(solid_frame(4, 4, [200, 50, 50, 255], 2.0), 2.0);
    session.process_audio(audio_block(2.0, 960), 2.02);

    let collected = sink.0.lock().unwrap();
    assert_eq!(collected.video.len(), 1);
    let frame = &collected.video[0];
    assert!((frame.pts - 2.0).abs() < 1e-12, "blank frame keeps the real pts");
    assert!(frame.data.chunks_exact(4).all(|p| p == [0, 0, 0, 255]));

    assert_eq!(collected.audio.len(), 1);
    let block = &collected.audio[0];
    assert!((block.pts - 2.0).abs() < 1e-12);
    assert_eq!(block.sample_count, 960);
    assert!(block.data.iter().all(|&b| b == 0));
}

#[test]
fn audio_gaps_are_filled_before_the_real_block() {
    let (mut session, sink) = session(4, 4);
    session.process_audio(audio_block(0.0, 960), 0.02);
    session.process_audio(audio_block(0.1, 960), 0.12);

    let collected = sink.0.lock().unwrap();
    assert_eq!(collected.audio.len(), 6);
    let synthetic: usize = collected.audio[1..5].iter().map(|b| b.sample_count).sum();
    assert_eq!(synthetic, 3840, "0.08 s at 48 kHz");
    for pair in collected.audio.windows(2) {
        assert!(pair[1].pts >= pair[0].pts - 1e-9);
    }
    assert!((collected.audio[5].pts - 0.1).abs() < 1e-12);
}

#[test]
fn out_of_order_frames_are_dropped_for_monotonic_output() {
    let (mut session, sink) = session(4, 4);
    session.process_video(solid_frame(4, 4, [1, 1, 1, 255], 2.0), 2.0);
    // A frame that arrives late with an earlier pts never reaches the sink.
    session.process_video(solid_frame(4, 4, [2, 2, 2, 255], 1.0), 2.033);
    session.process_video(solid_frame(4, 4, [3, 3, 3, 255], 2.033), 2.066);

    let collected = sink.0.lock().unwrap();
    assert_eq!(collected.video.len(), 2);
    for pair in collected.video.windows(2) {
        assert!(pair[1].pts > pair[0].pts);
    }
}

#[test]
fn camera_switch_covers_the_gap_with_black_frames() {
    let (mut session, sink) = session(4, 4);
    let plan = session.begin_camera_switch(1.0);
    assert!(plan.video_interval.is_some());

    // Real frames during the switch are dropped.
    session.process_video(solid_frame(4, 4, [9, 9, 9, 255], 1.01), 1.01);
    session.on_video_tick(1.05);
    session.end_camera_switch(livecapture::geometry::CameraPosition::Front);

    // A stale frame behind the synthetic timeline is still dropped; the
    // first frame ahead of it resumes normal composition.
    session.process_video(solid_frame(4, 4, [1, 2, 3, 255], 1.0), 1.2);
    session.process_video(solid_frame(4, 4, [1, 2, 3, 255], 1.2), 1.2);

    let collected = sink.0.lock().unwrap();
    let pts: Vec<f64> = collected.video.iter().map(|f| f.pts).collect();
    assert_eq!(pts.len(), 2);
    assert!((pts[0] - 1.05).abs() < 1e-9, "synthetic frame from the tick");
    assert!((pts[1] - 1.2).abs() < 1e-9, "real frame after the switch");
    assert!(collected.video[0]
        .data
        .chunks_exact(4)
        .all(|p| p == [0, 0, 0, 255]));
}

#[test]
fn interruption_backfills_and_keeps_pts_monotonic() {
    let (mut session, sink) = session(4, 4);
    session.process_video(solid_frame(4, 4, [5, 5, 5, 255], 10.0), 10.0);

    let plan = session.set_interruption(true, 10.21).unwrap();
    assert_eq!(plan.backfill_pts.len(), 6);
    session.on_video_tick(10.25);
    session.set_interruption(false, 10.3);
    session.process_video(solid_frame(4, 4, [5, 5, 5, 255], 10.9), 10.9);

    let collected = sink.0.lock().unwrap();
    // One real frame, six back-filled, one tick, one real.
    assert_eq!(collected.video.len(), 9);
    for pair in collected.video.windows(2) {
        assert!(pair[1].pts > pair[0].pts);
    }
}

#[test]
fn degenerate_window_falls_back_to_the_last_good_map() {
    init_logging();
    let sink = CollectSink::default();
    let config = SessionConfig {
        width: 4,
        height: 4,
        camera_window: Some(livecapture::config::PipWindow {
            scale: 0.0,
            align_x: 0.5,
            align_y: 0.5,
        }),
        ..Default::default()
    };
    let mut session = CaptureSession::new(config, Box::new(sink.clone()), false);
    let frame = solid_frame(4, 4, [40, 80, 120, 255], 1.0);
    session.process_video(frame.clone(), 1.0);

    let collected = sink.0.lock().unwrap();
    assert_eq!(collected.video.len(), 1);
    // The initial last-good map is the identity, so the frame passes through
    // instead of collapsing to a point.
    assert_eq!(&collected.video[0].data[..], &frame.data[..]);
}

#[test]
fn pip_layout_composites_both_cameras() {
    init_logging();
    let sink = CollectSink::default();
    let config = SessionConfig {
        width: 8,
        height: 8,
        layout: livecapture::config::CompositionLayout::PictureInPicture,
        ..Default::default()
    };
    let mut session = CaptureSession::new(config, Box::new(sink.clone()), false);
    session.process_pip_video(solid_frame(8, 8, [255, 0, 0, 255], 0.9));
    session.process_video(solid_frame(8, 8, [0, 0, 255, 255], 1.0), 1.0);

    let collected = sink.0.lock().unwrap();
    assert_eq!(collected.video.len(), 1);
    let out = &collected.video[0];
    let pixel = |x: usize, y: usize| &out.data[(y * 8 + x) * 4..(y * 8 + x) * 4 + 4];
    // Default pip window: half scale, top-right corner.
    assert_eq!(pixel(0, 7), [0, 0, 255, 255], "main camera fills the frame");
    assert_eq!(pixel(7, 0), [255, 0, 0, 255], "pip camera in the corner");
}

#[test]
fn side_by_side_layout_splits_the_frame() {
    init_logging();
    let sink = CollectSink::default();
    let config = SessionConfig {
        width: 8,
        height: 8,
        layout: livecapture::config::CompositionLayout::SideBySide,
        ..Default::default()
    };
    let mut session = CaptureSession::new(config, Box::new(sink.clone()), false);
    session.process_pip_video(solid_frame(8, 8, [255, 0, 0, 255], 0.9));
    session.process_video(solid_frame(8, 8, [0, 0, 255, 255], 1.0), 1.0);

    let collected = sink.0.lock().unwrap();
    let out = &collected.video[0];
    let pixel = |x: usize, y: usize| &out.data[(y * 8 + x) * 4..(y * 8 + x) * 4 + 4];
    // Half-scale windows, vertically centered: main left, pip right.
    assert_eq!(pixel(1, 3), [0, 0, 255, 255]);
    assert_eq!(pixel(5, 3), [255, 0, 0, 255]);
    assert_eq!(pixel(0, 0), [0, 0, 0, 255], "letterbox area is black");
    assert_eq!(pixel(7, 7), [0, 0, 0, 255]);
}
