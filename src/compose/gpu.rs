// SPDX-License-Identifier: GPL-3.0-only

//! GPU compositor backend
//!
//! Uploads the source frame(s) and overlay as textures, runs the composition
//! compute kernel, and reads the packed RGBA result back into the pooled
//! destination buffer. Any dispatch error is surfaced so the session can
//! downgrade to the CPU backend.

use crate::compose::CompositionRequest;
use crate::errors::ComposeError;
use crate::frame::VideoFrame;
use crate::geometry::SampleMap;
use crate::gpu;
use std::sync::Arc;
use tracing::{debug, info};

/// Uniform data for the composition kernels
#[repr(C)]
#[derive(Debug, Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct ComposeParams {
    out_width: u32,
    out_height: u32,
    has_overlay: u32,
    dual: u32,
    // Column-major inverse maps: src = [m0 m1] * dest + off
    main_m0: [f32; 2],
    main_m1: [f32; 2],
    main_off: [f32; 2],
    pip_m0: [f32; 2],
    pip_m1: [f32; 2],
    pip_off: [f32; 2],
    main_rect: [i32; 4],
    pip_rect: [i32; 4],
}

fn map_columns(map: &SampleMap) -> ([f32; 2], [f32; 2], [f32; 2]) {
    (
        [map.m[0][0] as f32, map.m[1][0] as f32],
        [map.m[0][1] as f32, map.m[1][1] as f32],
        [map.offset[0] as f32, map.offset[1] as f32],
    )
}

/// Cached input texture with its current dimensions
struct SlotTexture {
    texture: wgpu::Texture,
    width: u32,
    height: u32,
}

/// GPU compute backend
pub struct GpuCompositor {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    pipeline_single: wgpu::ComputePipeline,
    pipeline_dual: wgpu::ComputePipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    uniform_buffer: wgpu::Buffer,
    output_buffer: wgpu::Buffer,
    staging_buffer: wgpu::Buffer,
    // Input texture cache, keyed by role; rebuilt when dimensions change
    main_texture: Option<SlotTexture>,
    pip_texture: Option<SlotTexture>,
    overlay_texture: Option<SlotTexture>,
    // Bound in place of absent pip/overlay sources
    dummy_texture: wgpu::Texture,
    out_width: u32,
    out_height: u32,
}

impl GpuCompositor {
    /// Create the compute context, pipelines and fixed-size readback buffers.
    ///
    /// Failure here means the session runs permanently on the CPU backend.
    pub fn new(out_width: u32, out_height: u32) -> Result<Self, ComposeError> {
        let (device, queue, gpu_info) =
            pollster::block_on(gpu::create_compute_device("compositor"))
                .map_err(ComposeError::GpuUnavailable)?;

        info!(
            name = %gpu_info.adapter_name,
            backend = ?gpu_info.backend,
            out_width,
            out_height,
            "GPU device created for frame composition"
        );

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("compose_shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("../shaders/compose.wgsl").into()),
        });

        let texture_entry = |binding| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: false },
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            count: None,
        };

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("compose_bind_group_layout"),
            entries: &[
                // Main source texture
                texture_entry(0),
                // Pip source texture (dummy when absent)
                texture_entry(1),
                // Overlay texture (dummy when absent)
                texture_entry(2),
                // Output packed-RGBA buffer
                wgpu::BindGroupLayoutEntry {
                    binding: 3,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Storage { read_only: false },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                // Uniform parameters
                wgpu::BindGroupLayoutEntry {
                    binding: 4,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("compose_pipeline_layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let make_pipeline = |entry_point| {
            device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(entry_point),
                layout: Some(&pipeline_layout),
                module: &shader,
                entry_point,
                compilation_options: Default::default(),
                cache: None,
            })
        };
        let pipeline_single = make_pipeline("compose_single");
        let pipeline_dual = make_pipeline("compose_dual");

        let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("compose_uniform"),
            size: std::mem::size_of::<ComposeParams>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let out_bytes = (out_width * out_height * 4) as u64;
        let output_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("compose_output"),
            size: out_bytes,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        let staging_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("compose_staging"),
            size: out_bytes,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let dummy_texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("compose_dummy"),
            size: wgpu::Extent3d {
                width: 1,
                height: 1,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });

        Ok(Self {
            device,
            queue,
            pipeline_single,
            pipeline_dual,
            bind_group_layout,
            uniform_buffer,
            output_buffer,
            staging_buffer,
            main_texture: None,
            pip_texture: None,
            overlay_texture: None,
            dummy_texture,
            out_width,
            out_height,
        })
    }

    /// Drop cached input textures; they are rebuilt on the next render.
    /// Called alongside pool invalidation.
    pub fn invalidate(&mut self) {
        self.main_texture = None;
        self.pip_texture = None;
        self.overlay_texture = None;
    }

    /// Render one destination frame into `out` (tightly packed 4-byte pixels)
    pub fn render(&mut self, request: &CompositionRequest, out: &mut [u8]) -> Result<(), ComposeError> {
        let expected = self.out_width as usize * self.out_height as usize * 4;
        if out.len() != expected {
            return Err(ComposeError::BadRequest(format!(
                "destination is {} bytes, expected {}",
                out.len(),
                expected
            )));
        }

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);

        upload_frame(
            &self.device,
            &self.queue,
            &mut self.main_texture,
            "compose_main",
            request.main.frame,
        );
        if let Some(pip) = &request.pip {
            upload_frame(
                &self.device,
                &self.queue,
                &mut self.pip_texture,
                "compose_pip",
                pip.frame,
            );
        }
        if let Some(overlay) = request.overlay {
            upload_raw(
                &self.device,
                &self.queue,
                &mut self.overlay_texture,
                "compose_overlay",
                &overlay.data[..],
                overlay.width,
                overlay.height,
            );
        }

        let (main_m0, main_m1, main_off) = map_columns(&request.main.map);
        let (pip_m0, pip_m1, pip_off) = match &request.pip {
            Some(pip) => map_columns(&pip.map),
            None => map_columns(&SampleMap::identity()),
        };
        let params = ComposeParams {
            out_width: self.out_width,
            out_height: self.out_height,
            has_overlay: request.overlay.is_some() as u32,
            dual: request.pip.is_some() as u32,
            main_m0,
            main_m1,
            main_off,
            pip_m0,
            pip_m1,
            pip_off,
            main_rect: request.main.quad,
            pip_rect: request.pip.as_ref().map(|p| p.quad).unwrap_or([0; 4]),
        };
        self.queue
            .write_buffer(&self.uniform_buffer, 0, bytemuck::bytes_of(&params));

        let dummy_view = self
            .dummy_texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        let main_view = match &self.main_texture {
            Some(slot) => slot.texture.create_view(&wgpu::TextureViewDescriptor::default()),
            None => {
                return Err(ComposeError::DispatchFailed(
                    "main source texture missing".into(),
                ));
            }
        };
        let pip_view = match (&request.pip, &self.pip_texture) {
            (Some(_), Some(slot)) => slot.texture.create_view(&wgpu::TextureViewDescriptor::default()),
            _ => self
                .dummy_texture
                .create_view(&wgpu::TextureViewDescriptor::default()),
        };
        let overlay_view = match (&request.overlay, &self.overlay_texture) {
            (Some(_), Some(slot)) => slot.texture.create_view(&wgpu::TextureViewDescriptor::default()),
            _ => dummy_view,
        };

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("compose_bind_group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&main_view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(&pip_view),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::TextureView(&overlay_view),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: self.output_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: self.uniform_buffer.as_entire_binding(),
                },
            ],
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("compose_encoder"),
            });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("compose_pass"),
                timestamp_writes: None,
            });
            let pipeline = if request.pip.is_some() {
                &self.pipeline_dual
            } else {
                &self.pipeline_single
            };
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            let workgroups_x = self.out_width.div_ceil(16);
            let workgroups_y = self.out_height.div_ceil(16);
            pass.dispatch_workgroups(workgroups_x, workgroups_y, 1);
        }
        encoder.copy_buffer_to_buffer(
            &self.output_buffer,
            0,
            &self.staging_buffer,
            0,
            expected as u64,
        );
        self.queue.submit(std::iter::once(encoder.finish()));

        let slice = self.staging_buffer.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        let _ = self.device.poll(wgpu::Maintain::Wait);

        let map_result = rx
            .recv()
            .map_err(|e| ComposeError::DispatchFailed(format!("Failed to map buffer: {}", e)))
            .and_then(|r| {
                r.map_err(|e| ComposeError::DispatchFailed(format!("Buffer map error: {:?}", e)))
            });

        let oom = pollster::block_on(self.device.pop_error_scope());
        let validation = pollster::block_on(self.device.pop_error_scope());
        if let Some(error) = validation.or(oom) {
            if map_result.is_ok() {
                self.staging_buffer.unmap();
            }
            return Err(ComposeError::DispatchFailed(error.to_string()));
        }
        map_result?;

        {
            let data = slice.get_mapped_range();
            out.copy_from_slice(&data);
        }
        self.staging_buffer.unmap();

        debug!(
            dual = request.pip.is_some(),
            overlay = request.overlay.is_some(),
            "Composed frame on GPU"
        );
        Ok(())
    }
}

/// Upload a video frame, (re)creating the cached texture if dimensions changed
fn upload_frame(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    slot: &mut Option<SlotTexture>,
    label: &str,
    frame: &VideoFrame,
) {
    upload_raw(
        device,
        queue,
        slot,
        label,
        &frame.data[..],
        frame.format.width,
        frame.format.height,
    );
}

fn upload_raw(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    slot: &mut Option<SlotTexture>,
    label: &str,
    bytes: &[u8],
    width: u32,
    height: u32,
) {
    let needs_alloc = match slot {
        Some(existing) => existing.width != width || existing.height != height,
        None => true,
    };
    if needs_alloc {
        debug!(label, width, height, "Allocating source texture");
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        *slot = Some(SlotTexture {
            texture,
            width,
            height,
        });
    }

    let Some(slot) = slot.as_ref() else {
        return;
    };
    queue.write_texture(
        wgpu::ImageCopyTexture {
            texture: &slot.texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        bytes,
        wgpu::ImageDataLayout {
            offset: 0,
            bytes_per_row: Some(width * 4),
            rows_per_image: None,
        },
        wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
    );
}
