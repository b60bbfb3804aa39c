// SPDX-License-Identifier: GPL-3.0-only

//! Synthetic frame and silence generation for capture dropouts
//!
//! When the camera or microphone stops delivering (pause, device
//! interruption, camera switch), the generator keeps both elementary streams
//! alive: timer-driven black frames carry the video timeline forward and
//! zeroed PCM blocks carry the audio timeline. Real buffers resume seamlessly
//! because synthetic timestamps extend the same presentation clock.
//!
//! The generator itself is clock-free. Timer cadence comes out of
//! [`StartPlan`]; every time-dependent method takes the current wall-clock
//! reading as a parameter, so the whole state machine is deterministic under
//! test.

use crate::constants::{
    AUDIO_FRAME_INTERVAL, AUDIO_GAP_THRESHOLD, FALLBACK_FPS, GAP_BLOCK_FACTOR, PTS_EPSILON,
    SILENT_PCM_BYTES_PER_SAMPLE, VIDEO_BACKFILL_PERIODS,
};
use crate::errors::ContinuityError;
use crate::frame::{AudioBlock, AudioFormat, FrameData, OverlayImage, VideoFormat, VideoFrame};
use image::{ImageBuffer, Rgba, imageops};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Which streams the generator is currently sustaining
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneratorState {
    Idle,
    AudioActive,
    VideoActive,
    Both,
}

/// Timer cadence and immediate back-fill work decided by [`ContinuityGenerator::start`].
///
/// The caller owns the timers; the generator only decides their periods.
#[derive(Debug)]
pub struct StartPlan {
    /// Synthetic video frame period
    pub video_interval: Option<Duration>,
    /// Timestamps to synthesize immediately, covering the gap that built up
    /// before the generator was started
    pub backfill_pts: Vec<f64>,
    /// Silent audio timer period
    pub audio_interval: Option<Duration>,
}

/// Continuity generator for one capture session
pub struct ContinuityGenerator {
    width: u32,
    height: u32,
    video_active: bool,
    audio_active: bool,
    interruption: bool,
    audio_format: Option<AudioFormat>,
    last_audio_sample_count: usize,
    /// Presentation time of the first sample after the last emitted block
    last_audio_end: f64,
    /// Maps wall clock to the audio presentation clock
    audio_offset: f64,
    /// Presentation time of the last video frame, real or synthetic
    last_video_time: f64,
    /// Presentation time of the last synthetic frame
    black_frame_time: f64,
    /// Maps wall clock to the video presentation clock; captured when a real
    /// frame arrives, so the gap since the last frame stays visible at
    /// generator start
    black_frame_offset: f64,
    blank_frame: Option<FrameData>,
    overlay: Option<OverlayImage>,
    overlay_dirty: bool,
}

impl ContinuityGenerator {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            video_active: false,
            audio_active: false,
            interruption: false,
            audio_format: None,
            last_audio_sample_count: 0,
            last_audio_end: 0.0,
            audio_offset: 0.0,
            last_video_time: 0.0,
            black_frame_time: 0.0,
            black_frame_offset: 0.0,
            blank_frame: None,
            overlay: None,
            overlay_dirty: false,
        }
    }

    pub fn state(&self) -> GeneratorState {
        match (self.video_active, self.audio_active) {
            (false, false) => GeneratorState::Idle,
            (false, true) => GeneratorState::AudioActive,
            (true, false) => GeneratorState::VideoActive,
            (true, true) => GeneratorState::Both,
        }
    }

    pub fn interruption(&self) -> bool {
        self.interruption
    }

    /// During an interruption the presentation clock keeps tracking wall
    /// time, so synthetic frames resume where real time is, not where the
    /// last real frame was.
    pub fn set_interruption(&mut self, interruption: bool) {
        self.interruption = interruption;
    }

    /// Replace the overlay snapshot composited onto synthetic frames
    pub fn set_overlay(&mut self, overlay: Option<OverlayImage>) {
        self.overlay = overlay;
        self.overlay_dirty = true;
    }

    /// Begin sustaining the video stream (and audio when `with_audio`).
    ///
    /// Frame rates below 1 fall back to 30 fps. Audio is only sustained for
    /// 16-bit PCM; anything else is skipped with a warning. A gap longer
    /// than one and a half frame periods is back-filled immediately via
    /// [`StartPlan::backfill_pts`].
    pub fn start(&mut self, fps: f64, with_audio: bool, now: f64) -> StartPlan {
        let fps = if fps < 1.0 {
            warn!(fps, "Frame rate too low for frame synthesis, using fallback");
            FALLBACK_FPS
        } else {
            fps
        };
        let period = 1.0 / fps;

        let mut backfill_pts = Vec::new();
        if self.last_video_time > 0.0 {
            let gap = (now + self.black_frame_offset) - self.last_video_time;
            if gap > VIDEO_BACKFILL_PERIODS * period {
                let mut pts = self.last_video_time + period;
                while pts < now + self.black_frame_offset {
                    backfill_pts.push(pts);
                    pts += period;
                }
                info!(
                    frames = backfill_pts.len(),
                    gap, "Back-filling video gap with black frames"
                );
            }
        }

        let audio_interval = if with_audio {
            match self.audio_format {
                Some(format) if format.is_pcm16() => {
                    self.audio_active = true;
                    Some(AUDIO_FRAME_INTERVAL)
                }
                Some(format) => {
                    warn!(
                        bits = format.bits_per_sample,
                        "Silence synthesis supports 16-bit PCM only, audio not sustained"
                    );
                    None
                }
                None => {
                    warn!("No audio format observed yet, audio not sustained");
                    None
                }
            }
        } else {
            None
        };

        self.video_active = true;
        debug!(fps, with_audio, state = ?self.state(), "Continuity generator started");
        StartPlan {
            video_interval: Some(Duration::from_secs_f64(period)),
            backfill_pts,
            audio_interval,
        }
    }

    /// Stop sustaining both streams; real buffers are flowing again
    pub fn stop(&mut self) {
        if self.video_active || self.audio_active {
            debug!("Continuity generator stopped");
        }
        self.video_active = false;
        self.audio_active = false;
    }

    /// Stop sustaining video only; real frames are flowing again
    pub fn stop_video(&mut self) {
        self.video_active = false;
    }

    /// Stop sustaining audio only
    pub fn stop_audio(&mut self) {
        self.audio_active = false;
    }

    /// Admit or reject a real video frame against the emitted timeline.
    ///
    /// A frame that does not lead the last emitted frame, real or synthetic,
    /// would step the encoder's timeline backwards, so it is dropped.
    /// Accepted frames re-capture the wall-clock offset (unless interrupted),
    /// which is what later makes the gap measurable at generator start.
    pub fn handle_video_frame(&mut self, pts: f64, now: f64) -> bool {
        if self.last_video_time > 0.0 && pts < self.last_video_time + PTS_EPSILON {
            debug!(
                pts,
                emitted = self.last_video_time,
                "Dropping video frame behind the emitted timeline"
            );
            return false;
        }
        self.last_video_time = pts;
        if !self.interruption {
            self.black_frame_offset = pts - now;
        }
        true
    }

    /// Record a real audio block and synthesize the silent blocks needed to
    /// close any gap in front of it.
    ///
    /// Returned blocks must be delivered before the real one. Each carries at
    /// most one and a half times the real block's sample count, with an even
    /// count so sample frames stay whole.
    pub fn handle_audio_block(&mut self, block: &AudioBlock, now: f64) -> Vec<AudioBlock> {
        let format = block.format;
        self.audio_format = Some(format);
        self.last_audio_sample_count = block.sample_count;
        // Captured from the block's start, so sustained silence can never
        // run past where a resuming real block begins.
        self.audio_offset = block.pts - now;

        let mut fills = Vec::new();
        if self.last_audio_end > 0.0 && format.is_pcm16() {
            let gap = block.pts - self.last_audio_end;
            if gap >= AUDIO_GAP_THRESHOLD {
                let mut remaining = (gap * format.sample_rate).round() as i64;
                let base = ((block.sample_count as i64) & !1).max(2);
                let cap = (((block.sample_count as f64 * GAP_BLOCK_FACTOR) as i64) & !1).max(2);
                let mut pts = self.last_audio_end;
                while remaining > 1 {
                    // Base-sized blocks; only the final remainder may grow,
                    // up to one and a half times the real block.
                    let count = if remaining > cap {
                        base
                    } else {
                        remaining & !1
                    };
                    if count < 2 {
                        break;
                    }
                    match self.silent_block(count as usize, format, pts) {
                        Some(fill) => {
                            pts = fill.end_pts();
                            remaining -= count;
                            fills.push(fill);
                        }
                        None => break,
                    }
                }
                debug!(
                    gap,
                    blocks = fills.len(),
                    "Filled audio gap with silence"
                );
            }
        }
        self.last_audio_end = block.end_pts();
        fills
    }

    /// Timer callback: synthesize the next black frame
    pub fn on_video_tick(&mut self, now: f64) -> Option<VideoFrame> {
        if !self.video_active {
            return None;
        }
        self.synthesize_frame(now + self.black_frame_offset)
    }

    /// Produce a synthetic frame at the given presentation time.
    ///
    /// Returns `None` only when the blank frame cannot be allocated; the
    /// tick is skipped and the next one retries.
    pub fn synthesize_frame(&mut self, pts: f64) -> Option<VideoFrame> {
        let data = self.blank_frame_data()?;
        self.black_frame_time = pts;
        self.last_video_time = pts;
        Some(VideoFrame {
            data,
            format: VideoFormat::rgba(self.width, self.height),
            pts,
        })
    }

    /// Timer callback: synthesize enough silence to carry the audio timeline
    /// up to the current time
    pub fn on_audio_tick(&mut self, now: f64) -> Vec<AudioBlock> {
        if !self.audio_active {
            return Vec::new();
        }
        let Some(format) = self.audio_format else {
            return Vec::new();
        };
        let count = if self.last_audio_sample_count > 1 {
            self.last_audio_sample_count & !1
        } else {
            ((format.sample_rate * AUDIO_FRAME_INTERVAL.as_secs_f64()) as usize).max(2) & !1
        };
        let duration = count as f64 / format.sample_rate;
        let target = now + self.audio_offset;
        if self.last_audio_end <= 0.0 {
            self.last_audio_end = target - duration;
        }

        let mut blocks = Vec::new();
        while self.last_audio_end + duration <= target {
            match self.silent_block(count, format, self.last_audio_end) {
                Some(block) => {
                    self.last_audio_end = block.end_pts();
                    blocks.push(block);
                }
                None => break,
            }
        }
        blocks
    }

    fn silent_block(&self, sample_count: usize, format: AudioFormat, pts: f64) -> Option<AudioBlock> {
        match generate_pcm(sample_count, &format) {
            Ok(data) => Some(AudioBlock {
                data,
                format,
                sample_count,
                pts,
            }),
            Err(e) => {
                warn!(error = %e, "Skipping silent block");
                None
            }
        }
    }

    /// Cached black frame with the current overlay composited on top
    fn blank_frame_data(&mut self) -> Option<FrameData> {
        if self.blank_frame.is_none() || self.overlay_dirty {
            let bytes = self.width as usize * self.height as usize * 4;
            let mut data = Vec::new();
            if data.try_reserve_exact(bytes).is_err() {
                warn!(bytes, "Blank frame allocation failed, skipping synthesis");
                return None;
            }
            data.resize(bytes, 0);
            for pixel in data.chunks_exact_mut(4) {
                pixel[3] = 255;
            }
            if let Some(overlay) = &self.overlay {
                let top: Option<ImageBuffer<Rgba<u8>, &[u8]>> =
                    ImageBuffer::from_raw(overlay.width, overlay.height, &overlay.data[..]);
                let bottom: Option<ImageBuffer<Rgba<u8>, &mut [u8]>> =
                    ImageBuffer::from_raw(self.width, self.height, data.as_mut_slice());
                match (top, bottom) {
                    (Some(top), Some(mut bottom)) => imageops::overlay(&mut bottom, &top, 0, 0),
                    _ => warn!("Overlay dimensions inconsistent, skipping it"),
                }
            }
            self.blank_frame = Some(FrameData::new(data));
            self.overlay_dirty = false;
        }
        self.blank_frame.clone()
    }
}

/// Zero-filled 16-bit interleaved PCM for `sample_count` sample frames
fn generate_pcm(sample_count: usize, format: &AudioFormat) -> Result<FrameData, ContinuityError> {
    let bytes = sample_count * format.channels as usize * SILENT_PCM_BYTES_PER_SAMPLE;
    let mut data = Vec::new();
    data.try_reserve_exact(bytes)
        .map_err(|_| ContinuityError::BlockAllocationFailed { bytes })?;
    data.resize(bytes, 0);
    Ok(FrameData::new(data))
}

/// Silent replacement for a real block, keeping its timing and format.
///
/// Used while the session is paused so the audio timeline keeps advancing
/// without leaking captured sound.
pub fn silence(block: &AudioBlock) -> Result<AudioBlock, ContinuityError> {
    if !block.format.is_pcm16() {
        return Err(ContinuityError::UnsupportedFormat(format!(
            "{} bits per sample",
            block.format.bits_per_sample
        )));
    }
    let data = generate_pcm(block.sample_count, &block.format)?;
    Ok(AudioBlock {
        data,
        format: block.format,
        sample_count: block.sample_count,
        pts: block.pts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameData;

    fn block(pts: f64, sample_count: usize) -> AudioBlock {
        let format = AudioFormat::default();
        AudioBlock {
            data: FrameData::new(vec![0x55; sample_count * 4]),
            format,
            sample_count,
            pts,
        }
    }

    #[test]
    fn low_fps_falls_back() {
        let mut generator = ContinuityGenerator::new(64, 64);
        let plan = generator.start(0.0, false, 100.0);
        let period = plan.video_interval.unwrap().as_secs_f64();
        assert!((period - 1.0 / 30.0).abs() < 1e-9);
        assert_eq!(generator.state(), GeneratorState::VideoActive);
    }

    #[test]
    fn audio_needs_a_known_pcm16_format() {
        let mut generator = ContinuityGenerator::new(64, 64);
        let plan = generator.start(30.0, true, 100.0);
        assert!(plan.audio_interval.is_none());
        assert_eq!(generator.state(), GeneratorState::VideoActive);

        generator.stop();
        let mut float_block = block(0.0, 960);
        float_block.format.bits_per_sample = 32;
        generator.handle_audio_block(&float_block, 0.02);
        let plan = generator.start(30.0, true, 100.0);
        assert!(plan.audio_interval.is_none());

        generator.stop();
        generator.handle_audio_block(&block(0.0, 960), 0.02);
        let plan = generator.start(30.0, true, 100.0);
        assert_eq!(plan.audio_interval, Some(AUDIO_FRAME_INTERVAL));
        assert_eq!(generator.state(), GeneratorState::Both);
    }

    #[test]
    fn state_transitions() {
        let mut generator = ContinuityGenerator::new(64, 64);
        assert_eq!(generator.state(), GeneratorState::Idle);
        generator.handle_audio_block(&block(0.0, 960), 0.02);
        generator.start(30.0, true, 1.0);
        assert_eq!(generator.state(), GeneratorState::Both);
        generator.stop_audio();
        assert_eq!(generator.state(), GeneratorState::VideoActive);
        generator.stop();
        assert_eq!(generator.state(), GeneratorState::Idle);
    }

    #[test]
    fn gap_fill_emits_base_blocks_with_a_grown_remainder() {
        let mut generator = ContinuityGenerator::new(64, 64);
        assert!(generator.handle_audio_block(&block(0.0, 960), 0.02).is_empty());

        // 0.08 s gap at 48 kHz is 3840 samples: four base-sized blocks.
        let fills = generator.handle_audio_block(&block(0.1, 960), 0.12);
        let counts: Vec<usize> = fills.iter().map(|b| b.sample_count).collect();
        assert_eq!(counts, vec![960, 960, 960, 960]);
        for (i, fill) in fills.iter().enumerate() {
            assert!((fill.pts - (0.02 + i as f64 * 0.02)).abs() < 1e-9);
            assert!(fill.data.iter().all(|&b| b == 0));
        }
        assert!((fills[3].end_pts() - 0.1).abs() < 1e-9);

        // 0.05 s gap is 2400 samples: one base block, then a remainder that
        // grows up to 1.5x the real block instead of splitting.
        let fills = generator.handle_audio_block(&block(0.17, 960), 0.19);
        let counts: Vec<usize> = fills.iter().map(|b| b.sample_count).collect();
        assert_eq!(counts, vec![960, 1440]);
        assert!((fills[1].end_pts() - 0.17).abs() < 1e-9);
    }

    #[test]
    fn small_gaps_are_left_alone() {
        let mut generator = ContinuityGenerator::new(64, 64);
        generator.handle_audio_block(&block(0.0, 960), 0.02);
        let fills = generator.handle_audio_block(&block(0.04, 960), 0.06);
        assert!(fills.is_empty());
    }

    #[test]
    fn sustained_silence_advances_to_the_clock() {
        let mut generator = ContinuityGenerator::new(64, 64);
        // 1500 samples at 48 kHz is exactly 1/32 s, so the arithmetic below
        // is exact in binary floating point.
        generator.handle_audio_block(&block(0.0, 1500), 0.03125);
        generator.start(30.0, true, 0.03125);

        let blocks = generator.on_audio_tick(0.15625);
        assert_eq!(blocks.len(), 3);
        let mut expected = 0.03125;
        for b in &blocks {
            assert_eq!(b.sample_count, 1500);
            assert!((b.pts - expected).abs() < 1e-12);
            expected += 0.03125;
        }
        // A later tick continues without re-emitting.
        assert!(generator.on_audio_tick(0.15625).is_empty());
    }

    #[test]
    fn video_ticks_extend_the_presentation_clock() {
        let mut generator = ContinuityGenerator::new(8, 8);
        assert!(generator.handle_video_frame(10.0, 12.0));
        let plan = generator.start(30.0, false, 12.0);
        assert!(plan.backfill_pts.is_empty());

        let frame = generator.on_video_tick(12.5).unwrap();
        // Offset maps the wall clock back onto the frame timeline.
        assert!((frame.pts - 10.5).abs() < 1e-9);
        assert_eq!(frame.data.len(), 8 * 8 * 4);
        assert!(frame.data.chunks_exact(4).all(|p| p == [0, 0, 0, 255]));
    }

    #[test]
    fn stale_real_frames_are_dropped_after_synthesis() {
        let mut generator = ContinuityGenerator::new(8, 8);
        generator.start(30.0, false, 5.0);
        let frame = generator.on_video_tick(5.0).unwrap();
        assert!((frame.pts - 5.0).abs() < 1e-9);
        generator.stop();

        assert!(!generator.handle_video_frame(4.9, 5.1));
        assert!(!generator.handle_video_frame(5.0005, 5.1));
        assert!(generator.handle_video_frame(5.01, 5.1));
    }

    #[test]
    fn out_of_order_real_frames_are_dropped() {
        let mut generator = ContinuityGenerator::new(8, 8);
        assert!(generator.handle_video_frame(2.0, 2.0));
        // Arrived late with an earlier pts.
        assert!(!generator.handle_video_frame(1.0, 2.03));
        // Within the pts tolerance of the last accepted frame.
        assert!(!generator.handle_video_frame(2.0005, 2.06));
        assert!(generator.handle_video_frame(2.04, 2.09));
    }

    #[test]
    fn gap_before_start_is_backfilled_without_interruption() {
        let mut generator = ContinuityGenerator::new(8, 8);
        assert!(generator.handle_video_frame(10.0, 10.0));
        // Two seconds of dead air before the generator comes up.
        let plan = generator.start(30.0, false, 12.01);
        assert_eq!(plan.backfill_pts.len(), 60);
        assert!((plan.backfill_pts[0] - (10.0 + 1.0 / 30.0)).abs() < 1e-9);
        assert!(plan.backfill_pts[59] < 12.01);
    }

    #[test]
    fn synthetic_silence_stays_behind_resuming_audio() {
        let mut generator = ContinuityGenerator::new(8, 8);
        generator.handle_audio_block(&block(0.0, 1500), 0.03125);
        generator.start(30.0, true, 0.03125);

        let mut synthetic_end: f64 = 0.0;
        for (now, expected) in [(0.0625, 0), (0.09375, 1), (0.125, 1), (0.15625, 1)] {
            let blocks = generator.on_audio_tick(now);
            assert_eq!(blocks.len(), expected);
            if let Some(last) = blocks.last() {
                synthetic_end = last.end_pts();
            }
        }
        assert!((synthetic_end - 0.125).abs() < 1e-12);

        // The real stream resumes where the block that arrives now started;
        // the silence never got ahead of it.
        let resume = block(0.125, 1500);
        let fills = generator.handle_audio_block(&resume, 0.15625);
        assert!(fills.is_empty());
        assert!(resume.pts >= synthetic_end - 1e-12);
    }

    #[test]
    fn interruption_gap_is_backfilled() {
        let mut generator = ContinuityGenerator::new(8, 8);
        generator.set_interruption(true);
        assert!(generator.handle_video_frame(10.0, 10.0));
        let plan = generator.start(30.0, false, 10.21);
        assert_eq!(plan.backfill_pts.len(), 6);
        assert!((plan.backfill_pts[0] - (10.0 + 1.0 / 30.0)).abs() < 1e-9);
        for pair in plan.backfill_pts.windows(2) {
            assert!(pair[1] > pair[0]);
        }
    }

    #[test]
    fn overlay_lands_on_synthetic_frames() {
        let mut generator = ContinuityGenerator::new(2, 2);
        generator.start(30.0, false, 0.0);
        let opaque_red = [255, 0, 0, 255];
        let transparent = [0, 0, 0, 0];
        let mut overlay_bytes = Vec::new();
        overlay_bytes.extend_from_slice(&opaque_red);
        overlay_bytes.extend_from_slice(&transparent);
        overlay_bytes.extend_from_slice(&transparent);
        overlay_bytes.extend_from_slice(&opaque_red);
        generator.set_overlay(Some(OverlayImage {
            data: FrameData::new(overlay_bytes),
            width: 2,
            height: 2,
        }));

        let frame = generator.on_video_tick(1.0).unwrap();
        assert_eq!(&frame.data[0..4], &opaque_red);
        assert_eq!(&frame.data[4..8], &[0, 0, 0, 255]);
        assert_eq!(&frame.data[8..12], &[0, 0, 0, 255]);
        assert_eq!(&frame.data[12..16], &opaque_red);
    }

    #[test]
    fn silence_keeps_timing() {
        let real = block(3.5, 1024);
        let silent = silence(&real).unwrap();
        assert_eq!(silent.sample_count, 1024);
        assert!((silent.pts - 3.5).abs() < 1e-12);
        assert!(silent.data.iter().all(|&b| b == 0));

        let mut deep = block(0.0, 64);
        deep.format.bits_per_sample = 24;
        assert!(silence(&deep).is_err());
    }
}
