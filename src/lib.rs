// SPDX-License-Identifier: GPL-3.0-only

//! Live capture pipeline: frame geometry, composition and stream continuity
//!
//! This library takes raw camera frames and microphone blocks and turns them
//! into a gap-free pair of elementary streams for an encoder:
//!
//! - [`geometry`]: orientation/mirror/placement solving as affine transforms
//! - [`pool`]: the reusable ring of destination frame buffers
//! - [`compose`]: GPU compute composition with a CPU fallback
//! - [`continuity`]: synthetic black frames and silence across dropouts
//! - [`session`]: the single-writer pipeline core tying those together
//! - [`queue`]: the command channel and timers that serialize the session
//!
//! Capture devices and encoders stay outside; frames come in through
//! [`queue::Command`] and leave through the [`frame::EncoderSink`] trait.

pub mod compose;
pub mod config;
pub mod constants;
pub mod continuity;
pub mod errors;
pub mod frame;
pub mod geometry;
pub mod gpu;
pub mod pool;
pub mod queue;
pub mod session;

// Re-export commonly used types
pub use compose::{BackendKind, Compositor};
pub use config::{CompositionLayout, PipWindow, SessionConfig};
pub use continuity::{ContinuityGenerator, GeneratorState};
pub use errors::{PipelineError, PipelineResult};
pub use frame::{AudioBlock, AudioFormat, EncoderSink, VideoFormat, VideoFrame};
pub use geometry::{AffineTransform, CameraPosition, Orientation, SampleMap, ViewTransform};
pub use pool::FramePool;
pub use queue::{CaptureQueue, Command};
pub use session::{CaptureSession, SourceSlot};
