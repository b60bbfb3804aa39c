// SPDX-License-Identifier: GPL-3.0-only

//! Capture queue
//!
//! Serializes everything that touches the [`CaptureSession`]: capture
//! callbacks, control commands and continuity timer ticks all arrive as
//! [`Command`]s on one channel drained by a single task. Timer tasks only
//! post tick commands; a tick that lands after the generator stopped is a
//! no-op inside the session.

use crate::config::SessionConfig;
use crate::continuity::{GeneratorState, StartPlan};
use crate::frame::{AudioBlock, EncoderSink, OverlayImage, VideoFrame};
use crate::geometry::{CameraPosition, Orientation};
use crate::session::{CaptureSession, SourceSlot};
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

/// Work item for the capture queue
#[derive(Debug)]
pub enum Command {
    /// Frame from the main camera
    Video(VideoFrame),
    /// Frame from the secondary camera (dual layouts)
    PipVideo(VideoFrame),
    /// Real audio block from the microphone
    Audio(AudioBlock),
    /// Synthetic video timer fired
    VideoTick,
    /// Silent audio timer fired
    AudioTick,
    SetOrientation(SourceSlot, Orientation),
    SetPosition(SourceSlot, CameraPosition),
    SetMirror(SourceSlot, bool),
    SetPaused(bool),
    SetInterruption(bool),
    SetOverlay(Option<OverlayImage>),
    StartContinuity { with_audio: bool },
    StopContinuity,
    StopAudioContinuity,
    BeginCameraSwitch,
    EndCameraSwitch(CameraPosition),
    Shutdown,
}

/// Handle to a running capture queue
pub struct CaptureQueue {
    tx: mpsc::UnboundedSender<Command>,
    worker: Option<JoinHandle<()>>,
}

impl CaptureQueue {
    /// Spawn the queue task and build the session inside it
    pub fn start(config: SessionConfig, sink: Box<dyn EncoderSink>, prefer_gpu: bool) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker_tx = tx.clone();
        let worker = tokio::spawn(run(config, sink, prefer_gpu, rx, worker_tx));
        Self {
            tx,
            worker: Some(worker),
        }
    }

    /// Cloneable sender for capture callbacks running off the runtime
    pub fn sender(&self) -> mpsc::UnboundedSender<Command> {
        self.tx.clone()
    }

    pub fn post(&self, command: Command) {
        if self.tx.send(command).is_err() {
            warn!("Capture queue is gone, dropping command");
        }
    }

    /// Drain and stop the queue task
    pub async fn shutdown(mut self) {
        let _ = self.tx.send(Command::Shutdown);
        if let Some(worker) = self.worker.take() {
            let _ = worker.await;
        }
    }
}

/// Continuity timer tasks owned by the queue
#[derive(Default)]
struct Timers {
    video: Option<JoinHandle<()>>,
    audio: Option<JoinHandle<()>>,
}

impl Timers {
    fn arm(&mut self, plan: &StartPlan, tx: &mpsc::UnboundedSender<Command>) {
        if let Some(period) = plan.video_interval {
            self.disarm_video();
            self.video = Some(spawn_ticker(period, || Command::VideoTick, tx.clone()));
        }
        if let Some(period) = plan.audio_interval {
            self.disarm_audio();
            self.audio = Some(spawn_ticker(period, || Command::AudioTick, tx.clone()));
        }
    }

    fn disarm_video(&mut self) {
        if let Some(task) = self.video.take() {
            task.abort();
        }
    }

    fn disarm_audio(&mut self) {
        if let Some(task) = self.audio.take() {
            task.abort();
        }
    }

    fn disarm(&mut self) {
        self.disarm_video();
        self.disarm_audio();
    }
}

fn spawn_ticker(
    period: std::time::Duration,
    make: impl Fn() -> Command + Send + 'static,
    tx: mpsc::UnboundedSender<Command>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick of tokio's interval fires immediately; the generator
        // already covered now at start time.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if tx.send(make()).is_err() {
                break;
            }
        }
    })
}

async fn run(
    config: SessionConfig,
    sink: Box<dyn EncoderSink>,
    prefer_gpu: bool,
    mut rx: mpsc::UnboundedReceiver<Command>,
    tx: mpsc::UnboundedSender<Command>,
) {
    let mut session = CaptureSession::new(config, sink, prefer_gpu);
    let epoch = Instant::now();
    let mut timers = Timers::default();

    while let Some(command) = rx.recv().await {
        let now = epoch.elapsed().as_secs_f64();
        match command {
            Command::Video(frame) => session.process_video(frame, now),
            Command::PipVideo(frame) => session.process_pip_video(frame),
            Command::Audio(block) => session.process_audio(block, now),
            Command::VideoTick => session.on_video_tick(now),
            Command::AudioTick => session.on_audio_tick(now),
            Command::SetOrientation(slot, orientation) => {
                session.set_orientation(slot, orientation)
            }
            Command::SetPosition(slot, position) => session.set_position(slot, position),
            Command::SetMirror(slot, mirror) => session.set_mirror(slot, mirror),
            Command::SetPaused(paused) => session.set_paused(paused),
            Command::SetInterruption(interruption) => {
                if let Some(plan) = session.set_interruption(interruption, now) {
                    timers.arm(&plan, &tx);
                }
            }
            Command::SetOverlay(overlay) => session.set_overlay(overlay),
            Command::StartContinuity { with_audio } => {
                let plan = session.start_continuity(with_audio, now);
                timers.arm(&plan, &tx);
            }
            Command::StopContinuity => {
                session.stop_continuity();
                timers.disarm();
            }
            Command::StopAudioContinuity => {
                session.stop_audio_continuity();
                timers.disarm_audio();
            }
            Command::BeginCameraSwitch => {
                let plan = session.begin_camera_switch(now);
                timers.arm(&plan, &tx);
            }
            Command::EndCameraSwitch(position) => session.end_camera_switch(position),
            Command::Shutdown => break,
        }

        // Real buffers may have stopped the generator; reap idle timers so
        // stale ticks stop queueing up.
        match session.generator_state() {
            GeneratorState::Idle => timers.disarm(),
            GeneratorState::VideoActive => timers.disarm_audio(),
            _ => {}
        }
    }
    timers.disarm();
    debug!("Capture queue stopped");
}
