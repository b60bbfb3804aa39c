// SPDX-License-Identifier: GPL-3.0-only

//! Capture session core
//!
//! Single-writer pipeline state: geometry per source, the destination buffer
//! pool, the compositor and the continuity generator. All methods run on the
//! capture queue; the queue serializes capture callbacks, timer ticks and
//! control commands, so nothing here needs a lock. Time-dependent methods
//! take the current wall-clock reading in seconds as a parameter.

use crate::compose::{BackendKind, Compositor, CompositionRequest, SourceView};
use crate::config::{CompositionLayout, SessionConfig};
use crate::continuity::{self, ContinuityGenerator, GeneratorState, StartPlan};
use crate::frame::{
    AudioBlock, EncoderSink, FrameData, OverlayImage, VideoFormat, VideoFrame,
};
use crate::geometry::{CameraPosition, Orientation, SampleMap, ViewTransform};
use crate::pool::FramePool;
use tracing::{debug, info, warn};

/// Which camera a geometry update targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceSlot {
    Main,
    Pip,
}

/// One capture session feeding one encoder sink
pub struct CaptureSession {
    config: SessionConfig,
    sink: Box<dyn EncoderSink>,
    pool: FramePool,
    pool_epoch: u64,
    compositor: Compositor,
    continuity: ContinuityGenerator,
    main_view: ViewTransform,
    pip_view: Option<ViewTransform>,
    // Last invertible maps, reused when a degenerate update slips in
    last_good_main: SampleMap,
    last_good_pip: SampleMap,
    // Latest secondary-camera frame; composition runs on the main cadence
    pip_frame: Option<VideoFrame>,
    last_input_format: Option<VideoFormat>,
    overlay: Option<OverlayImage>,
    paused: bool,
    switching: bool,
}

impl CaptureSession {
    pub fn new(config: SessionConfig, sink: Box<dyn EncoderSink>, prefer_gpu: bool) -> Self {
        let mut main_view = ViewTransform::new(config.width, config.height);
        main_view.portrait_video = config.portrait;
        if let Some(window) = &config.camera_window {
            main_view.set_scale(window.scale);
            main_view.align_x = window.align_x;
            main_view.align_y = window.align_y;
        }

        let mut pip_view = if config.layout.is_dual() {
            let mut view = ViewTransform::with_scale(
                config.width,
                config.height,
                config.pip_window.scale,
            );
            view.portrait_video = config.portrait;
            view.align_x = config.pip_window.align_x;
            view.align_y = config.pip_window.align_y;
            Some(view)
        } else {
            None
        };

        if config.layout == CompositionLayout::SideBySide {
            main_view.set_scale(0.5);
            main_view.align_x = 0.0;
            main_view.align_y = 0.5;
            if let Some(view) = pip_view.as_mut() {
                view.set_scale(0.5);
                view.align_x = 1.0;
                view.align_y = 0.5;
            }
        }

        info!(
            width = config.width,
            height = config.height,
            fps = config.fps,
            layout = ?config.layout,
            "Capture session created"
        );

        Self {
            pool: FramePool::new(config.width, config.height),
            pool_epoch: 0,
            compositor: Compositor::new(config.width, config.height, prefer_gpu),
            continuity: ContinuityGenerator::new(config.width, config.height),
            main_view,
            pip_view,
            last_good_main: SampleMap::identity(),
            last_good_pip: SampleMap::identity(),
            pip_frame: None,
            last_input_format: None,
            overlay: None,
            paused: false,
            switching: false,
            config,
            sink,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.compositor.backend_kind()
    }

    pub fn generator_state(&self) -> GeneratorState {
        self.continuity.state()
    }

    /// Handle one frame from the main camera.
    ///
    /// While paused a black frame is emitted at the real timestamp, so the
    /// stream keeps its cadence without exposing the sensor.
    pub fn process_video(&mut self, frame: VideoFrame, now: f64) {
        if self.switching {
            debug!(pts = frame.pts, "Dropping frame during camera switch");
            return;
        }
        if self.paused {
            if let Some(blank) = self.continuity.synthesize_frame(frame.pts) {
                self.sink.put_video(blank);
            }
            return;
        }
        if !self.continuity.interruption() {
            self.continuity.stop_video();
        }
        if !self.continuity.handle_video_frame(frame.pts, now) {
            return;
        }
        self.render_and_emit(frame);
    }

    /// Store the latest secondary-camera frame for dual layouts
    pub fn process_pip_video(&mut self, frame: VideoFrame) {
        if self.config.layout.is_dual() {
            self.pip_frame = Some(frame);
        }
    }

    /// Handle one real audio block: close any gap in front of it with
    /// silence, then forward it (zeroed while paused).
    pub fn process_audio(&mut self, block: AudioBlock, now: f64) {
        if !self.continuity.interruption() {
            self.continuity.stop_audio();
        }
        for fill in self.continuity.handle_audio_block(&block, now) {
            self.sink.put_audio(fill);
        }
        if self.paused {
            match continuity::silence(&block) {
                Ok(muted) => self.sink.put_audio(muted),
                Err(e) => warn!(error = %e, "Dropping audio block while paused"),
            }
        } else {
            self.sink.put_audio(block);
        }
    }

    /// Start sustaining the streams; back-fill frames are emitted here, the
    /// returned plan tells the queue which timers to arm
    pub fn start_continuity(&mut self, with_audio: bool, now: f64) -> StartPlan {
        let plan = self.continuity.start(self.config.fps, with_audio, now);
        for pts in &plan.backfill_pts {
            if let Some(frame) = self.continuity.synthesize_frame(*pts) {
                self.sink.put_video(frame);
            }
        }
        plan
    }

    pub fn stop_continuity(&mut self) {
        self.continuity.stop();
    }

    pub fn stop_audio_continuity(&mut self) {
        self.continuity.stop_audio();
    }

    pub fn on_video_tick(&mut self, now: f64) {
        if let Some(frame) = self.continuity.on_video_tick(now) {
            self.sink.put_video(frame);
        }
    }

    pub fn on_audio_tick(&mut self, now: f64) {
        for block in self.continuity.on_audio_tick(now) {
            self.sink.put_audio(block);
        }
    }

    pub fn set_paused(&mut self, paused: bool) {
        if self.paused != paused {
            info!(paused, "Pause state changed");
        }
        self.paused = paused;
    }

    /// Device interruption (system preempted the capture hardware). Both
    /// streams are sustained until real buffers resume.
    pub fn set_interruption(&mut self, interruption: bool, now: f64) -> Option<StartPlan> {
        self.continuity.set_interruption(interruption);
        if interruption {
            info!("Capture interrupted, sustaining streams");
            Some(self.start_continuity(true, now))
        } else {
            info!("Capture interruption ended");
            None
        }
    }

    /// Camera switch window: incoming frames are dropped and synthetic
    /// frames cover the gap until [`Self::end_camera_switch`]
    pub fn begin_camera_switch(&mut self, now: f64) -> StartPlan {
        self.switching = true;
        info!("Camera switch started");
        self.start_continuity(false, now)
    }

    /// Finish the switch: the main camera is now at `position`, buffers from
    /// the previous device are invalid.
    pub fn end_camera_switch(&mut self, position: CameraPosition) {
        self.switching = false;
        self.main_view.position = position;
        self.pool.invalidate();
        self.compositor.invalidate();
        info!(?position, "Camera switch finished");
    }

    pub fn set_orientation(&mut self, slot: SourceSlot, orientation: Orientation) {
        if let Some(view) = self.view_mut(slot) {
            view.orientation = orientation;
            debug!(?slot, ?orientation, "Orientation updated");
        }
    }

    pub fn set_position(&mut self, slot: SourceSlot, position: CameraPosition) {
        if let Some(view) = self.view_mut(slot) {
            view.position = position;
            debug!(?slot, ?position, "Camera position updated");
        }
    }

    pub fn set_mirror(&mut self, slot: SourceSlot, mirror: bool) {
        if let Some(view) = self.view_mut(slot) {
            view.mirror = mirror;
            debug!(?slot, mirror, "Mirror updated");
        }
    }

    /// Replace the overlay snapshot for both composited and synthetic frames
    pub fn set_overlay(&mut self, overlay: Option<OverlayImage>) {
        self.continuity.set_overlay(overlay.clone());
        self.overlay = overlay;
    }

    fn view_mut(&mut self, slot: SourceSlot) -> Option<&mut ViewTransform> {
        match slot {
            SourceSlot::Main => Some(&mut self.main_view),
            SourceSlot::Pip => self.pip_view.as_mut(),
        }
    }

    fn render_and_emit(&mut self, frame: VideoFrame) {
        if self.last_input_format.as_ref() != Some(&frame.format) {
            if self.last_input_format.is_some() {
                info!(format = ?frame.format, "Input format changed, invalidating pool");
                self.pool.invalidate();
                self.compositor.invalidate();
            }
            self.last_input_format = Some(frame.format.clone());
        }

        let main = solve_source(&self.main_view, &frame, &mut self.last_good_main);
        let pip_frame = self.pip_frame.clone();
        let pip = match (&self.pip_view, &pip_frame) {
            (Some(view), Some(pip_frame)) => {
                Some(solve_source(view, pip_frame, &mut self.last_good_pip))
            }
            _ => None,
        };

        let Some(buffer) = self.pool.acquire(&frame.format) else {
            return;
        };
        let request = CompositionRequest {
            main,
            pip,
            overlay: self.overlay.as_ref(),
        };
        if let Err(e) = self.compositor.render(&request, buffer.bytes_mut()) {
            warn!(error = %e, pts = frame.pts, "Composition failed, skipping frame");
            return;
        }
        let out = VideoFrame {
            data: FrameData::from_shared(buffer.shared()),
            format: buffer.format.clone(),
            pts: frame.pts,
        };

        let epoch = self.pool.epoch();
        if epoch != self.pool_epoch {
            self.pool_epoch = epoch;
            self.compositor.invalidate();
        }
        self.sink.put_video(out);
    }
}

/// Solve placement for one source, falling back to the last invertible map
fn solve_source<'a>(
    view: &ViewTransform,
    frame: &'a VideoFrame,
    last_good: &mut SampleMap,
) -> SourceView<'a> {
    let width = frame.format.width as f64;
    let height = frame.format.height as f64;
    let solved = view.solve(width, height, false);
    let map = match SampleMap::invert(&solved.transform) {
        Ok(map) => {
            *last_good = map;
            map
        }
        Err(e) => {
            warn!(error = %e, "Transform not invertible, using last good map");
            *last_good
        }
    };
    SourceView {
        frame,
        map,
        quad: solved.transform.quad(width, height),
    }
}
