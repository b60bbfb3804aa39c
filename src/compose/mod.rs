// SPDX-License-Identifier: GPL-3.0-only

//! Frame composition with GPU preference and CPU failover
//!
//! The [`Compositor`] facade owns one backend at a time. It starts on the GPU
//! when one is available and downgrades to the CPU backend permanently after
//! the first dispatch error; the failing frame is re-rendered on the CPU so
//! no frame is lost to the switch.

pub mod cpu;
pub mod gpu;

use crate::errors::ComposeError;
use crate::frame::{OverlayImage, VideoFrame};
use crate::geometry::SampleMap;
use cpu::CpuCompositor;
use gpu::GpuCompositor;
use tracing::{info, warn};

/// One source frame with its solved placement
#[derive(Debug)]
pub struct SourceView<'a> {
    pub frame: &'a VideoFrame,
    /// Inverse map from destination pixel to source pixel
    pub map: SampleMap,
    /// Destination-space bounding quad `[min_x, min_y, max_x, max_y]`
    pub quad: [i32; 4],
}

/// Everything needed to render one destination frame
#[derive(Debug)]
pub struct CompositionRequest<'a> {
    pub main: SourceView<'a>,
    /// Secondary source for dual-camera layouts; replaces main inside its quad
    pub pip: Option<SourceView<'a>>,
    /// Pre-rendered RGBA overlay at destination dimensions
    pub overlay: Option<&'a OverlayImage>,
}

/// Which backend is currently rendering
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Gpu,
    Cpu,
}

enum Backend {
    Gpu(GpuCompositor),
    Cpu(CpuCompositor),
}

/// Compositor facade with one-way GPU to CPU failover
pub struct Compositor {
    backend: Backend,
    out_width: u32,
    out_height: u32,
}

impl Compositor {
    /// Create a compositor for the given output dimensions.
    ///
    /// With `prefer_gpu` set, GPU initialization failure is logged once and
    /// the session runs on the CPU from the start.
    pub fn new(out_width: u32, out_height: u32, prefer_gpu: bool) -> Self {
        let backend = if prefer_gpu {
            match GpuCompositor::new(out_width, out_height) {
                Ok(gpu) => Backend::Gpu(gpu),
                Err(e) => {
                    warn!(error = %e, "GPU compositor unavailable, using CPU backend");
                    Backend::Cpu(CpuCompositor::new(out_width, out_height))
                }
            }
        } else {
            info!("CPU compositor selected");
            Backend::Cpu(CpuCompositor::new(out_width, out_height))
        };
        Self {
            backend,
            out_width,
            out_height,
        }
    }

    /// Create a compositor that never touches the GPU
    pub fn new_cpu(out_width: u32, out_height: u32) -> Self {
        Self::new(out_width, out_height, false)
    }

    pub fn backend_kind(&self) -> BackendKind {
        match &self.backend {
            Backend::Gpu(_) => BackendKind::Gpu,
            Backend::Cpu(_) => BackendKind::Cpu,
        }
    }

    /// Drop GPU-side input caches after a pool invalidation
    pub fn invalidate(&mut self) {
        if let Backend::Gpu(gpu) = &mut self.backend {
            gpu.invalidate();
        }
    }

    /// Render one frame into `out`.
    ///
    /// A GPU dispatch error re-renders this frame on the CPU and downgrades
    /// the backend for the rest of the session.
    pub fn render(
        &mut self,
        request: &CompositionRequest,
        out: &mut [u8],
    ) -> Result<(), ComposeError> {
        match &mut self.backend {
            Backend::Gpu(gpu) => match gpu.render(request, out) {
                Ok(()) => Ok(()),
                Err(e @ ComposeError::BadRequest(_)) => Err(e),
                Err(e) => {
                    warn!(error = %e, "GPU composition failed, switching to CPU backend");
                    let cpu = CpuCompositor::new(self.out_width, self.out_height);
                    let result = cpu.render(request, out);
                    self.backend = Backend::Cpu(cpu);
                    result
                }
            },
            Backend::Cpu(cpu) => cpu.render(request, out),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpu_backend_is_selected_when_gpu_not_preferred() {
        let compositor = Compositor::new_cpu(64, 64);
        assert_eq!(compositor.backend_kind(), BackendKind::Cpu);
    }
}
