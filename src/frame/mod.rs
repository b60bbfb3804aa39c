// SPDX-License-Identifier: GPL-3.0-only
// Shared frame types for the capture pipeline

//! Video/audio frame types and the downstream sink contract

use std::sync::Arc;

/// Reference-counted frame byte storage
///
/// Frames are passed around the pipeline without copying the underlying
/// pixel or sample data; clones only bump the reference count.
#[derive(Clone)]
pub struct FrameData(Arc<Vec<u8>>);

impl FrameData {
    /// Wrap owned bytes
    pub fn new(bytes: Vec<u8>) -> Self {
        FrameData(Arc::new(bytes))
    }

    /// Wrap already-shared bytes (e.g. a pooled destination buffer)
    pub fn from_shared(bytes: Arc<Vec<u8>>) -> Self {
        FrameData(bytes)
    }

    /// Length of the frame data in bytes
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if the frame data is empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Clone the underlying shared handle
    pub fn shared(&self) -> Arc<Vec<u8>> {
        Arc::clone(&self.0)
    }
}

impl std::fmt::Debug for FrameData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "FrameData({} bytes)", self.0.len())
    }
}

impl AsRef<[u8]> for FrameData {
    fn as_ref(&self) -> &[u8] {
        self.0.as_slice()
    }
}

impl std::ops::Deref for FrameData {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.0.as_slice()
    }
}

impl From<Vec<u8>> for FrameData {
    fn from(bytes: Vec<u8>) -> Self {
        FrameData::new(bytes)
    }
}

/// Pixel format of a video frame
///
/// The compositor operates on 4-byte interleaved formats; the channel order
/// is carried through from input to output untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PixelFormat {
    /// RGBA - 32-bit with alpha (4 bytes per pixel)
    #[default]
    RGBA,
    /// BGRA - 32-bit with alpha (B G R A byte order)
    BGRA,
}

impl PixelFormat {
    /// Bytes per pixel
    pub fn bytes_per_pixel(&self) -> usize {
        4
    }
}

impl std::fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PixelFormat::RGBA => write!(f, "RGBA"),
            PixelFormat::BGRA => write!(f, "BGRA"),
        }
    }
}

/// Color-space metadata propagated from the capture device
///
/// The pool copies these from the input frame's descriptor onto destination
/// buffers so output color characteristics track the input.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Colorimetry {
    /// Color primaries (e.g. "bt709")
    pub primaries: Option<String>,
    /// YCbCr matrix used upstream of RGB conversion
    pub matrix: Option<String>,
    /// Transfer function
    pub transfer: Option<String>,
}

/// Video format descriptor (per-frame width/height/format/colorimetry)
#[derive(Debug, Clone, PartialEq, Default)]
pub struct VideoFormat {
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    pub colorimetry: Colorimetry,
}

impl VideoFormat {
    /// Descriptor for a plain RGBA stream of the given size
    pub fn rgba(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixel_format: PixelFormat::RGBA,
            colorimetry: Colorimetry::default(),
        }
    }

    /// Total byte size of one tightly packed frame
    pub fn frame_bytes(&self) -> usize {
        self.width as usize * self.height as usize * self.pixel_format.bytes_per_pixel()
    }
}

/// A single video frame with its presentation timestamp in seconds
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub data: FrameData,
    pub format: VideoFormat,
    pub pts: f64,
}

/// Audio stream format descriptor
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AudioFormat {
    pub sample_rate: f64,
    pub channels: u16,
    pub bits_per_sample: u16,
}

impl AudioFormat {
    /// 16-bit interleaved PCM, the only format silent blocks are
    /// synthesized in
    pub fn is_pcm16(&self) -> bool {
        self.bits_per_sample == 16
    }
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self {
            sample_rate: 48_000.0,
            channels: 2,
            bits_per_sample: 16,
        }
    }
}

/// A block of audio samples with its presentation timestamp in seconds
#[derive(Debug, Clone)]
pub struct AudioBlock {
    pub data: FrameData,
    pub format: AudioFormat,
    pub sample_count: usize,
    pub pts: f64,
}

impl AudioBlock {
    /// Duration of the block in seconds
    pub fn duration(&self) -> f64 {
        self.sample_count as f64 / self.format.sample_rate
    }

    /// Presentation time of the first sample after this block
    pub fn end_pts(&self) -> f64 {
        self.pts + self.duration()
    }
}

/// Pre-composited overlay image, alpha-composited over video frames
///
/// Supplied asynchronously by an external compositing collaborator; the
/// pipeline only ever consumes the latest snapshot. Always straight-alpha
/// RGBA at the output frame size.
#[derive(Debug, Clone)]
pub struct OverlayImage {
    pub data: FrameData,
    pub width: u32,
    pub height: u32,
}

/// Downstream encoding engine contract
///
/// Receives finished buffers with no distinction between real and synthetic
/// origin. Implementations must not block the capture queue.
pub trait EncoderSink: Send {
    /// Deliver a finished video frame tagged with its presentation time
    fn put_video(&mut self, frame: VideoFrame);

    /// Deliver an audio block (real or synthetic)
    fn put_audio(&mut self, block: AudioBlock);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_data_is_shared_not_copied() {
        let data = FrameData::new(vec![1, 2, 3, 4]);
        let clone = data.clone();
        assert!(Arc::ptr_eq(&data.shared(), &clone.shared()));
        assert_eq!(&clone[..], &[1, 2, 3, 4]);
    }

    #[test]
    fn audio_block_end_pts() {
        let block = AudioBlock {
            data: FrameData::new(vec![0; 1024 * 2 * 2]),
            format: AudioFormat::default(),
            sample_count: 1024,
            pts: 10.0,
        };
        let expected = 10.0 + 1024.0 / 48_000.0;
        assert!((block.end_pts() - expected).abs() < 1e-12);
    }

    #[test]
    fn video_format_frame_bytes() {
        assert_eq!(VideoFormat::rgba(1920, 1080).frame_bytes(), 1920 * 1080 * 4);
    }
}
