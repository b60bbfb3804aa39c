// SPDX-License-Identifier: GPL-3.0-only

//! Fixed-size destination buffer pool
//!
//! A 2-slot ring of reusable destination buffers: while the encoder consumes
//! one buffer the compositor writes the other, so steady-state operation is
//! allocation-free. Slot reuse goes through `Arc::make_mut`, which only
//! copies if the downstream sink still holds the previous handle.

use crate::constants::BUFFER_POOL_SIZE;
use crate::errors::PoolError;
use crate::frame::VideoFormat;
use std::sync::Arc;
use tracing::{debug, warn};

/// A destination pixel buffer owned by the pool
#[derive(Debug)]
pub struct PooledBuffer {
    /// Ring slot index (0..BUFFER_POOL_SIZE)
    pub slot: usize,
    /// Format descriptor copied from the input frame, resized to the stream
    /// dimensions, so output color characteristics track the input
    pub format: VideoFormat,
    data: Arc<Vec<u8>>,
}

impl PooledBuffer {
    /// Mutable pixel bytes for the compositor to overwrite.
    ///
    /// Copies only when the sink still holds the buffer from two frames ago
    /// (overload); in steady state this is a plain `&mut` into the slot.
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        Arc::make_mut(&mut self.data).as_mut_slice()
    }

    /// Shared handle for handing the filled buffer downstream
    pub fn shared(&self) -> Arc<Vec<u8>> {
        Arc::clone(&self.data)
    }
}

/// Reusable ring of destination buffers for one output stream
pub struct FramePool {
    stream_width: u32,
    stream_height: u32,
    slots: Vec<Option<PooledBuffer>>,
    index: usize,
    need_invalidate: bool,
    /// Bumped on every (re)allocation cycle so GPU-side caches keyed by slot
    /// can notice that their backing buffers changed
    epoch: u64,
}

impl FramePool {
    pub fn new(stream_width: u32, stream_height: u32) -> Self {
        let mut slots = Vec::with_capacity(BUFFER_POOL_SIZE);
        slots.resize_with(BUFFER_POOL_SIZE, || None);
        Self {
            stream_width,
            stream_height,
            slots,
            index: BUFFER_POOL_SIZE - 1,
            need_invalidate: false,
            epoch: 0,
        }
    }

    /// Request deferred invalidation.
    ///
    /// Reallocation happens lazily on the next `acquire`, never here, so an
    /// in-flight render referencing the old buffers is not freed under it.
    pub fn invalidate(&mut self) {
        self.need_invalidate = true;
    }

    /// Invalidation epoch; changes whenever the backing buffers are replaced
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Advance the ring and return the destination buffer for this frame.
    ///
    /// The buffer is sized to the stream's nominal dimensions with the pixel
    /// format and colorimetry copied from `input_format`. Returns `None` on
    /// allocation failure; the caller skips the frame.
    pub fn acquire(&mut self, input_format: &VideoFormat) -> Option<&mut PooledBuffer> {
        if self.need_invalidate {
            debug!("Invalidating buffer pool");
            for slot in &mut self.slots {
                *slot = None;
            }
            self.need_invalidate = false;
            self.epoch += 1;
        }

        self.index = (self.index + 1) % BUFFER_POOL_SIZE;

        if self.slots[self.index].is_none() {
            let format = VideoFormat {
                width: self.stream_width,
                height: self.stream_height,
                pixel_format: input_format.pixel_format,
                colorimetry: input_format.colorimetry.clone(),
            };
            let bytes = format.frame_bytes();
            let mut data = Vec::new();
            if data.try_reserve_exact(bytes).is_err() {
                warn!(
                    slot = self.index,
                    bytes, "Destination buffer allocation failed, skipping frame"
                );
                return None;
            }
            data.resize(bytes, 0);
            debug!(slot = self.index, bytes, "Allocated destination buffer");
            self.slots[self.index] = Some(PooledBuffer {
                slot: self.index,
                format,
                data: Arc::new(data),
            });
        }

        self.slots[self.index].as_mut()
    }

    /// Like `acquire` but surfacing the failure for callers that log upward
    pub fn try_acquire(&mut self, input_format: &VideoFormat) -> Result<&mut PooledBuffer, PoolError> {
        let bytes = self.stream_width as usize
            * self.stream_height as usize
            * input_format.pixel_format.bytes_per_pixel();
        self.acquire(input_format)
            .ok_or(PoolError::AllocationFailed { bytes })
    }
}
