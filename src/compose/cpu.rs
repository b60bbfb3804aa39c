// SPDX-License-Identifier: MPL-2.0

//! CPU compositor backend (fallback when GPU is unavailable)
//!
//! Algebraically identical to the compute kernels: every destination pixel
//! is mapped through the same inverse affine `SampleMap` and the overlay is
//! alpha-composited on top with the `image` crate.

use crate::compose::CompositionRequest;
use crate::errors::ComposeError;
use crate::frame::VideoFrame;
use crate::geometry::SampleMap;
use image::{ImageBuffer, Rgba, imageops};

/// CPU imaging backend
#[derive(Debug)]
pub struct CpuCompositor {
    out_width: u32,
    out_height: u32,
}

type PixelView<'a> = ImageBuffer<Rgba<u8>, &'a [u8]>;

impl CpuCompositor {
    pub fn new(out_width: u32, out_height: u32) -> Self {
        Self {
            out_width,
            out_height,
        }
    }

    /// Render one destination frame into `out` (tightly packed 4-byte pixels)
    pub fn render(&self, request: &CompositionRequest, out: &mut [u8]) -> Result<(), ComposeError> {
        let expected = self.out_width as usize * self.out_height as usize * 4;
        if out.len() != expected {
            return Err(ComposeError::BadRequest(format!(
                "destination is {} bytes, expected {}",
                out.len(),
                expected
            )));
        }

        let main = source_view(request.main.frame)?;
        let pip = match &request.pip {
            Some(source) => Some(source_view(source.frame)?),
            None => None,
        };

        for y in 0..self.out_height {
            for x in 0..self.out_width {
                let pixel = match (&pip, &request.pip) {
                    (Some(pip_view), Some(pip_source)) => {
                        // Pip replaces main inside its quad; it never blends.
                        if in_quad(pip_source.quad, x as i32, y as i32) {
                            sample(pip_view, &pip_source.map, x, y)
                        } else if in_quad(request.main.quad, x as i32, y as i32) {
                            sample(&main, &request.main.map, x, y)
                        } else {
                            Rgba([0, 0, 0, 255])
                        }
                    }
                    _ => sample(&main, &request.main.map, x, y),
                };
                let offset = ((y * self.out_width + x) * 4) as usize;
                out[offset..offset + 4].copy_from_slice(&pixel.0);
            }
        }

        if let Some(overlay) = request.overlay {
            let top: PixelView = ImageBuffer::from_raw(overlay.width, overlay.height, &overlay.data[..])
                .ok_or_else(|| ComposeError::BadRequest("overlay size mismatch".into()))?;
            let mut bottom: ImageBuffer<Rgba<u8>, &mut [u8]> =
                ImageBuffer::from_raw(self.out_width, self.out_height, out)
                    .ok_or_else(|| ComposeError::BadRequest("destination size mismatch".into()))?;
            imageops::overlay(&mut bottom, &top, 0, 0);
        }

        Ok(())
    }
}

fn source_view(frame: &VideoFrame) -> Result<PixelView<'_>, ComposeError> {
    ImageBuffer::from_raw(frame.format.width, frame.format.height, &frame.data[..]).ok_or_else(
        || {
            ComposeError::BadRequest(format!(
                "source data is {} bytes, expected {}x{}x4",
                frame.data.len(),
                frame.format.width,
                frame.format.height
            ))
        },
    )
}

fn in_quad(quad: [i32; 4], x: i32, y: i32) -> bool {
    x >= quad[0] && y >= quad[1] && x < quad[2] && y < quad[3]
}

/// Sample the source through the inverse map; out-of-bounds is opaque black
fn sample(view: &PixelView, map: &SampleMap, x: u32, y: u32) -> Rgba<u8> {
    let (sx, sy) = map.apply(x as f64, y as f64);
    let ix = sx.floor() as i64;
    let iy = sy.floor() as i64;
    if ix < 0 || iy < 0 || ix >= view.width() as i64 || iy >= view.height() as i64 {
        return Rgba([0, 0, 0, 255]);
    }
    *view.get_pixel(ix as u32, iy as u32)
}
