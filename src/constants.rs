// SPDX-License-Identifier: GPL-3.0-only

//! Pipeline-wide constants

use std::time::Duration;

/// Number of destination buffers kept per output stream.
///
/// The 2-slot ring is the sole flow-control mechanism: while the encoder
/// consumes one buffer, the compositor writes the other.
pub const BUFFER_POOL_SIZE: usize = 2;

/// Cadence of the sustained-silence audio timer (~50 Hz).
pub const AUDIO_FRAME_INTERVAL: Duration = Duration::from_millis(20);

/// Minimum gap between a real audio buffer and the last emitted audio end
/// time before silent gap-fill blocks are synthesized, in seconds.
pub const AUDIO_GAP_THRESHOLD: f64 = 0.05;

/// A silent gap-fill block carries at most this multiple of the real block's
/// sample count.
pub const GAP_BLOCK_FACTOR: f64 = 1.5;

/// Synthetic video back-fill kicks in when the gap since the last real frame
/// exceeds this many frame periods at timer activation.
pub const VIDEO_BACKFILL_PERIODS: f64 = 1.5;

/// Synthetic video timer falls back to this rate when the requested fps is
/// below 1.
pub const FALLBACK_FPS: f64 = 30.0;

/// Uniform scale within this distance of 1.0 skips the scale/offset step of
/// the transform solver.
pub const SCALE_EPSILON: f64 = 0.001;

/// A real video frame must lead the last synthetic frame by more than this
/// many seconds or it is dropped.
pub const PTS_EPSILON: f64 = 0.001;

/// Determinants below this magnitude are treated as non-invertible.
pub const DET_EPSILON: f64 = 1e-9;

/// Bytes per sample of synthetic PCM (16-bit only; other depths are not
/// synthesized).
pub const SILENT_PCM_BYTES_PER_SAMPLE: usize = 2;
