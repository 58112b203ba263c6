//! Lighting resolve, screen mip chain, exposure readback, buffer debug view and
//! presentation.

use std::sync::Arc;

use glam::Vec3;
use log::{debug, warn};
use parking_lot::Mutex;

use crate::camera::Camera;
use crate::config::{DebugBuffer, RenderToggles};
use crate::light::LightBlock;
use crate::render::backend::GpuTexture;
use crate::render::common::{self, CompositeUniform, DebugUniform, DynamicUniforms, PresentUniform};
use crate::render::geometry;
use crate::render::resources::{RenderTargets, ShadowTargets, SCREEN_FORMAT, SHADOW_DISTANCE_FORMAT};
use crate::render::shadow::FACE_COUNT;
use crate::render::shaders::{self, bindings};
use crate::scene::FrameUniforms;

pub const DEFAULT_EXPOSURE: f32 = 1.0;
const MIN_EXPOSURE: f32 = 0.1;
const MAX_EXPOSURE: f32 = 16.0;

/// Rec. 709 relative luminance.
pub fn luminance(colour: Vec3) -> f32 {
    colour.dot(Vec3::new(0.2126, 0.7152, 0.0722))
}

/// Exposure that maps the average scene luminance to mid grey under
/// `1 - exp(-c * exposure)`.
pub fn exposure_for(average: Vec3) -> f32 {
    let lum = luminance(average);
    if !lum.is_finite() || lum <= 0.0 {
        return MAX_EXPOSURE;
    }
    (std::f32::consts::LN_2 / lum).clamp(MIN_EXPOSURE, MAX_EXPOSURE)
}

/// Viewport rectangles `(x, y, width, height)` of the 3×2 debug grid, in
/// [`DebugBuffer::ALL`] order.
pub fn debug_tiles(width: u32, height: u32) -> [(f32, f32, f32, f32); 6] {
    let tile_w = width as f32 / 3.0;
    let tile_h = height as f32 / 2.0;
    let mut tiles = [(0.0, 0.0, 0.0, 0.0); 6];
    for (index, tile) in tiles.iter_mut().enumerate() {
        let column = (index % 3) as f32;
        let row = (index / 3) as f32;
        *tile = (column * tile_w, row * tile_h, tile_w, tile_h);
    }
    tiles
}

/// Uniform entries of the debug view: the grid buffers, then the cube faces.
const DEBUG_SLOTS: usize = DebugBuffer::ALL.len() + FACE_COUNT;

/// One draw of the debug view: the viewport it covers (`None` for the whole
/// output) and the uniform slot it reads.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DebugDraw {
    pub viewport: Option<(f32, f32, f32, f32)>,
    pub slot: usize,
}

/// Uniform slots of the debug view: one per grid buffer, then one per cube
/// face.
pub fn debug_entries(near: f32, shadow_far: f32, ambient_occlusion: bool) -> Vec<DebugUniform> {
    let entry = |buffer: DebugBuffer, face: usize| DebugUniform {
        buffer: buffer.index(),
        near_plane: near,
        face: face as u32,
        shadow_far,
        ambient_occlusion: ambient_occlusion as u32,
        _pad: [0; 3],
    };
    DebugBuffer::ALL
        .iter()
        .map(|&buffer| entry(buffer, 0))
        .chain((0..FACE_COUNT).map(|face| entry(DebugBuffer::ShadowCube, face)))
        .collect()
}

/// Draws the debug view issues for `selected`: the overview grid, the six
/// cube faces over the same grid, or one buffer full screen.
pub fn debug_draws(selected: Option<DebugBuffer>, (width, height): (u32, u32)) -> Vec<DebugDraw> {
    let tiles = debug_tiles(width, height);
    match selected {
        None => tiles
            .into_iter()
            .enumerate()
            .map(|(slot, tile)| DebugDraw {
                viewport: Some(tile),
                slot,
            })
            .collect(),
        Some(DebugBuffer::ShadowCube) => tiles
            .into_iter()
            .enumerate()
            .map(|(face, tile)| DebugDraw {
                viewport: Some(tile),
                slot: DebugBuffer::ALL.len() + face,
            })
            .collect(),
        Some(buffer) => vec![DebugDraw {
            viewport: None,
            slot: buffer.index() as usize,
        }],
    }
}

pub struct CompositePass {
    layout: wgpu::BindGroupLayout,
    frame_buffer: wgpu::Buffer,
    light_buffer: wgpu::Buffer,
    group: Option<wgpu::BindGroup>,
    pipeline: Option<wgpu::RenderPipeline>,
    max_lights: usize,
}

impl CompositePass {
    pub fn new(
        device: &wgpu::Device,
        gbuffer_layout: &wgpu::BindGroupLayout,
        samples: u32,
        max_lights: usize,
    ) -> Self {
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("composite-layout"),
            entries: &[
                common::uniform_entry::<CompositeUniform>(0, wgpu::ShaderStages::FRAGMENT, false),
                common::uniform_entry::<LightBlock>(1, wgpu::ShaderStages::FRAGMENT, false),
                common::texture_entry(bindings::SSAO, wgpu::TextureViewDimension::D2, false),
                common::texture_entry(bindings::SHADOW, wgpu::TextureViewDimension::D2, false),
            ],
        });
        let frame_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("composite-uniform"),
            size: std::mem::size_of::<CompositeUniform>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let light_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("light-block"),
            size: std::mem::size_of::<LightBlock>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let mut pass = Self {
            layout,
            frame_buffer,
            light_buffer,
            group: None,
            pipeline: None,
            max_lights,
        };
        pass.rebuild(device, gbuffer_layout, samples);
        pass
    }

    pub fn rebuild(
        &mut self,
        device: &wgpu::Device,
        gbuffer_layout: &wgpu::BindGroupLayout,
        samples: u32,
    ) {
        self.pipeline = common::checked(device, "composite pipeline", || {
            let module = common::shader_module(
                device,
                "composite-shader",
                shaders::composite(samples, crate::light::MAX_LIGHTS),
            );
            common::fullscreen_pipeline(
                device,
                "composite-pipeline",
                &module,
                "fs_composite",
                &[gbuffer_layout, &self.layout],
                SCREEN_FORMAT.wgpu(),
                None,
            )
        });
    }

    pub fn bind_targets(
        &mut self,
        device: &wgpu::Device,
        targets: &RenderTargets<GpuTexture>,
        ssao: &wgpu::TextureView,
    ) {
        self.group = Some(device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("composite-group"),
            layout: &self.layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: self.frame_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: self.light_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: bindings::SSAO,
                    resource: wgpu::BindingResource::TextureView(ssao),
                },
                wgpu::BindGroupEntry {
                    binding: bindings::SHADOW,
                    resource: wgpu::BindingResource::TextureView(&targets.shadow.texture.view),
                },
            ],
        }));
    }

    #[allow(clippy::too_many_arguments)]
    pub fn update(
        &self,
        queue: &wgpu::Queue,
        camera: &Camera,
        frame: &FrameUniforms,
        lights: &LightBlock,
        extent: (u32, u32),
        ssao_texture_scale: f32,
        samples: u32,
        ambient_occlusion: bool,
        shadow_mapping: bool,
    ) {
        let uniform = CompositeUniform {
            inv_view_projection: camera.gpu_view_projection().inverse().to_cols_array_2d(),
            camera_position: frame.camera_position.extend(1.0).into(),
            ambient: frame.ambient.extend(1.0).into(),
            screen_resolution: [extent.0 as f32, extent.1 as f32],
            ssao_texture_scale,
            msaa_samples: samples.max(1),
            ambient_occlusion: ambient_occlusion as u32,
            shadow_mapping: shadow_mapping as u32,
            _pad: [0; 2],
        };
        queue.write_buffer(&self.frame_buffer, 0, bytemuck::bytes_of(&uniform));
        let mut block = *lights;
        block.num_lights = block.num_lights.min(self.max_lights as u32);
        queue.write_buffer(&self.light_buffer, 0, bytemuck::bytes_of(&block));
    }

    /// Resolves the lighting into mip 0 of the screen texture.
    pub fn encode(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        gbuffer_group: &wgpu::BindGroup,
        targets: &RenderTargets<GpuTexture>,
    ) -> bool {
        let (Some(pipeline), Some(group)) = (&self.pipeline, &self.group) else {
            return false;
        };
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("composite-pass"),
            color_attachments: &[geometry::colour_attachment(
                targets.screen.texture.attachment(0),
                wgpu::LoadOp::Clear(wgpu::Color::BLACK),
            )],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        pass.set_pipeline(pipeline);
        pass.set_bind_group(0, gbuffer_group, &[]);
        pass.set_bind_group(1, group, &[]);
        pass.draw(0..3, 0..1);
        true
    }
}

/// Downsamples the screen texture level by level until it reaches 1×1.
pub struct MipChain {
    layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
    pipeline: Option<wgpu::RenderPipeline>,
    groups: Vec<wgpu::BindGroup>,
}

impl MipChain {
    pub fn new(device: &wgpu::Device) -> Self {
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("mip-layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                common::sampler_entry(1, true),
            ],
        });
        let sampler = linear_sampler(device, "mip-sampler");
        let pipeline = common::checked(device, "mip pipeline", || {
            let module = common::shader_module(device, "mip-shader", shaders::downsample());
            common::fullscreen_pipeline(
                device,
                "mip-pipeline",
                &module,
                "fs_downsample",
                &[&layout],
                SCREEN_FORMAT.wgpu(),
                None,
            )
        });
        Self {
            layout,
            sampler,
            pipeline,
            groups: Vec::new(),
        }
    }

    /// One bind group per level, each reading the level above it.
    pub fn bind_targets(&mut self, device: &wgpu::Device, screen: &GpuTexture) {
        self.groups = screen
            .attachments
            .iter()
            .take(screen.attachments.len().saturating_sub(1))
            .map(|source| {
                device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("mip-group"),
                    layout: &self.layout,
                    entries: &[
                        wgpu::BindGroupEntry {
                            binding: 0,
                            resource: wgpu::BindingResource::TextureView(source),
                        },
                        wgpu::BindGroupEntry {
                            binding: 1,
                            resource: wgpu::BindingResource::Sampler(&self.sampler),
                        },
                    ],
                })
            })
            .collect();
    }

    pub fn encode(&self, encoder: &mut wgpu::CommandEncoder, screen: &GpuTexture) -> bool {
        let Some(pipeline) = &self.pipeline else {
            return false;
        };
        for (level, group) in self.groups.iter().enumerate() {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("mip-pass"),
                color_attachments: &[geometry::colour_attachment(
                    screen.attachment(level + 1),
                    wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                )],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, group, &[]);
            pass.draw(0..3, 0..1);
        }
        true
    }
}

enum ReadbackState {
    Idle,
    Copied,
    Mapping,
    Ready(Result<(), wgpu::BufferAsyncError>),
}

/// Reads the 1×1 mip back without stalling: the copy is recorded in one
/// frame, mapped after submission, and consumed once the map completes.
pub struct LuminanceReadback {
    buffer: wgpu::Buffer,
    state: Arc<Mutex<ReadbackState>>,
    average: Option<Vec3>,
}

impl LuminanceReadback {
    pub fn new(device: &wgpu::Device) -> Self {
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("luminance-staging"),
            size: wgpu::COPY_BYTES_PER_ROW_ALIGNMENT as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });
        Self {
            buffer,
            state: Arc::new(Mutex::new(ReadbackState::Idle)),
            average: None,
        }
    }

    /// Last average colour read back, if any completed.
    pub fn average(&self) -> Option<Vec3> {
        self.average
    }

    /// Consumes a completed readback.
    pub fn poll(&mut self) {
        let mut state = self.state.lock();
        match std::mem::replace(&mut *state, ReadbackState::Idle) {
            ReadbackState::Ready(Ok(())) => {
                {
                    let data = self.buffer.slice(..).get_mapped_range();
                    let channel = |index: usize| {
                        half::f16::from_le_bytes([data[index * 2], data[index * 2 + 1]]).to_f32()
                    };
                    let average = Vec3::new(channel(0), channel(1), channel(2));
                    if average.is_finite() {
                        self.average = Some(average);
                    }
                }
                self.buffer.unmap();
            }
            ReadbackState::Ready(Err(err)) => {
                warn!("luminance readback failed: {err}");
            }
            other => *state = other,
        }
    }

    /// Records a copy of the coarsest screen mip when no readback is in flight.
    pub fn record(&self, encoder: &mut wgpu::CommandEncoder, screen: &GpuTexture, mip_levels: u32) {
        let mut state = self.state.lock();
        if !matches!(*state, ReadbackState::Idle) {
            return;
        }
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &screen.texture,
                mip_level: mip_levels.saturating_sub(1),
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &self.buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT),
                    rows_per_image: Some(1),
                },
            },
            wgpu::Extent3d {
                width: 1,
                height: 1,
                depth_or_array_layers: 1,
            },
        );
        *state = ReadbackState::Copied;
    }

    /// Starts mapping a copy recorded this frame. Call after submission.
    pub fn map(&self) {
        let mut guard = self.state.lock();
        if !matches!(*guard, ReadbackState::Copied) {
            return;
        }
        *guard = ReadbackState::Mapping;
        drop(guard);
        let state = Arc::clone(&self.state);
        self.buffer.slice(..).map_async(wgpu::MapMode::Read, move |result| {
            *state.lock() = ReadbackState::Ready(result);
        });
    }
}

/// Shows the G-buffer, SSAO and shadow buffers as a grid or one at a time,
/// and the shadow distance cube one face per tile.
pub struct DebugView {
    layout: wgpu::BindGroupLayout,
    uniforms: DynamicUniforms<DebugUniform>,
    group: Option<wgpu::BindGroup>,
    pipeline: Option<wgpu::RenderPipeline>,
    format: wgpu::TextureFormat,
    /// Bound in place of the distance cube when shadows are unavailable.
    empty_cube: wgpu::TextureView,
}

impl DebugView {
    pub fn new(
        device: &wgpu::Device,
        gbuffer_layout: &wgpu::BindGroupLayout,
        samples: u32,
        format: wgpu::TextureFormat,
    ) -> Self {
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("debug-layout"),
            entries: &[
                common::uniform_entry::<DebugUniform>(0, wgpu::ShaderStages::FRAGMENT, true),
                common::texture_entry(bindings::SSAO, wgpu::TextureViewDimension::D2, false),
                common::texture_entry(bindings::SHADOW, wgpu::TextureViewDimension::D2, false),
                common::texture_entry(
                    bindings::SHADOW_CUBE,
                    wgpu::TextureViewDimension::D2Array,
                    false,
                ),
            ],
        });
        let uniforms = DynamicUniforms::new(device, "debug-uniforms", DEBUG_SLOTS);
        let empty_cube = device
            .create_texture(&wgpu::TextureDescriptor {
                label: Some("debug-empty-cube"),
                size: wgpu::Extent3d {
                    width: 1,
                    height: 1,
                    depth_or_array_layers: FACE_COUNT as u32,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: SHADOW_DISTANCE_FORMAT.wgpu(),
                usage: wgpu::TextureUsages::TEXTURE_BINDING,
                view_formats: &[],
            })
            .create_view(&face_array_view());
        let mut view = Self {
            layout,
            uniforms,
            group: None,
            pipeline: None,
            format,
            empty_cube,
        };
        view.rebuild(device, gbuffer_layout, samples);
        view
    }

    pub fn rebuild(
        &mut self,
        device: &wgpu::Device,
        gbuffer_layout: &wgpu::BindGroupLayout,
        samples: u32,
    ) {
        self.pipeline = common::checked(device, "debug pipeline", || {
            let module = common::shader_module(device, "debug-shader", shaders::debug(samples));
            common::fullscreen_pipeline(
                device,
                "debug-pipeline",
                &module,
                "fs_debug",
                &[gbuffer_layout, &self.layout],
                self.format,
                None,
            )
        });
    }

    pub fn bind_targets(
        &mut self,
        device: &wgpu::Device,
        targets: &RenderTargets<GpuTexture>,
        ssao: &wgpu::TextureView,
        shadow: Option<&ShadowTargets<GpuTexture>>,
    ) {
        let cube_faces = shadow.map(|shadow| {
            let texture = &shadow.distance.texture.texture;
            texture.create_view(&face_array_view())
        });
        let cube_faces = cube_faces.as_ref().unwrap_or(&self.empty_cube);
        self.group = Some(device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("debug-group"),
            layout: &self.layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: self.uniforms.binding(),
                },
                wgpu::BindGroupEntry {
                    binding: bindings::SSAO,
                    resource: wgpu::BindingResource::TextureView(ssao),
                },
                wgpu::BindGroupEntry {
                    binding: bindings::SHADOW,
                    resource: wgpu::BindingResource::TextureView(&targets.shadow.texture.view),
                },
                wgpu::BindGroupEntry {
                    binding: bindings::SHADOW_CUBE,
                    resource: wgpu::BindingResource::TextureView(cube_faces),
                },
            ],
        }));
    }

    /// `ambient_occlusion` is false when the SSAO buffer was not rendered
    /// this frame, which shows the SSAO tile as unoccluded.
    pub fn update(
        &self,
        queue: &wgpu::Queue,
        near: f32,
        shadow_far: f32,
        ambient_occlusion: bool,
    ) {
        let entries = debug_entries(near, shadow_far, ambient_occlusion);
        self.uniforms.write(queue, &entries);
    }

    /// Draws the selected buffer full screen, the grid, or the cube faces.
    pub fn encode(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        gbuffer_group: &wgpu::BindGroup,
        output: &wgpu::TextureView,
        extent: (u32, u32),
        toggles: &RenderToggles,
    ) -> bool {
        let (Some(pipeline), Some(group)) = (&self.pipeline, &self.group) else {
            return false;
        };
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("debug-pass"),
            color_attachments: &[geometry::colour_attachment(
                output,
                wgpu::LoadOp::Clear(wgpu::Color::BLACK),
            )],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        pass.set_pipeline(pipeline);
        pass.set_bind_group(0, gbuffer_group, &[]);
        for draw in debug_draws(toggles.selected_buffer, extent) {
            if let Some((x, y, w, h)) = draw.viewport {
                pass.set_viewport(x, y, w, h, 0.0, 1.0);
            }
            pass.set_bind_group(1, group, &[self.uniforms.offset(draw.slot)]);
            pass.draw(0..3, 0..1);
        }
        true
    }
}

fn face_array_view() -> wgpu::TextureViewDescriptor<'static> {
    wgpu::TextureViewDescriptor {
        label: Some("shadow-cube-faces"),
        dimension: Some(wgpu::TextureViewDimension::D2Array),
        ..Default::default()
    }
}

/// Samples the screen texture into the output target with optional tone
/// adjustment.
pub struct PresentPass {
    layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
    uniform: wgpu::Buffer,
    group: Option<wgpu::BindGroup>,
    pipeline: Option<wgpu::RenderPipeline>,
}

impl PresentPass {
    pub fn new(device: &wgpu::Device, format: wgpu::TextureFormat) -> Self {
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("present-layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                common::sampler_entry(1, true),
                common::uniform_entry::<PresentUniform>(2, wgpu::ShaderStages::FRAGMENT, false),
            ],
        });
        let uniform = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("present-uniform"),
            size: std::mem::size_of::<PresentUniform>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let pipeline = common::checked(device, "present pipeline", || {
            let module = common::shader_module(device, "present-shader", shaders::present());
            common::fullscreen_pipeline(
                device,
                "present-pipeline",
                &module,
                "fs_present",
                &[&layout],
                format,
                None,
            )
        });
        Self {
            sampler: linear_sampler(device, "present-sampler"),
            layout,
            uniform,
            group: None,
            pipeline,
        }
    }

    pub fn bind_targets(&mut self, device: &wgpu::Device, targets: &RenderTargets<GpuTexture>) {
        self.group = Some(device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("present-group"),
            layout: &self.layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(
                        targets.screen.texture.attachment(0),
                    ),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: self.uniform.as_entire_binding(),
                },
            ],
        }));
    }

    pub fn update(&self, queue: &wgpu::Queue, exposure: f32, tone_adjust: bool) {
        let uniform = PresentUniform {
            exposure,
            tone_adjust: tone_adjust as u32,
            _pad: [0; 2],
        };
        queue.write_buffer(&self.uniform, 0, bytemuck::bytes_of(&uniform));
    }

    pub fn encode(&self, encoder: &mut wgpu::CommandEncoder, output: &wgpu::TextureView) -> bool {
        let (Some(pipeline), Some(group)) = (&self.pipeline, &self.group) else {
            debug!("present pass unavailable");
            return false;
        };
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("present-pass"),
            color_attachments: &[geometry::colour_attachment(
                output,
                wgpu::LoadOp::Clear(wgpu::Color::BLACK),
            )],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        pass.set_pipeline(pipeline);
        pass.set_bind_group(0, group, &[]);
        pass.draw(0..3, 0..1);
        true
    }
}

fn linear_sampler(device: &wgpu::Device, label: &str) -> wgpu::Sampler {
    device.create_sampler(&wgpu::SamplerDescriptor {
        label: Some(label),
        address_mode_u: wgpu::AddressMode::ClampToEdge,
        address_mode_v: wgpu::AddressMode::ClampToEdge,
        address_mode_w: wgpu::AddressMode::ClampToEdge,
        mag_filter: wgpu::FilterMode::Linear,
        min_filter: wgpu::FilterMode::Linear,
        mipmap_filter: wgpu::FilterMode::Nearest,
        ..Default::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exposure_brings_average_to_mid_grey() {
        let average = Vec3::splat(0.2);
        let exposure = exposure_for(average);
        let mapped = 1.0 - (-luminance(average) * exposure).exp();
        assert!((mapped - 0.5).abs() < 1e-4);
    }

    #[test]
    fn exposure_is_clamped() {
        assert_eq!(exposure_for(Vec3::ZERO), MAX_EXPOSURE);
        assert_eq!(exposure_for(Vec3::splat(f32::NAN)), MAX_EXPOSURE);
        assert_eq!(exposure_for(Vec3::splat(1000.0)), MIN_EXPOSURE);
    }

    #[test]
    fn debug_grid_covers_the_screen_without_overlap() {
        let tiles = debug_tiles(900, 600);
        let area: f32 = tiles.iter().map(|(_, _, w, h)| w * h).sum();
        assert!((area - 900.0 * 600.0).abs() < 1.0);
        assert_eq!(tiles[0], (0.0, 0.0, 300.0, 300.0));
        assert_eq!(tiles[5], (600.0, 300.0, 300.0, 300.0));
    }

    #[test]
    fn shadow_cube_view_draws_each_face_in_a_tile() {
        let draws = debug_draws(Some(DebugBuffer::ShadowCube), (900, 600));
        assert_eq!(draws.len(), FACE_COUNT);
        let tiles = debug_tiles(900, 600);
        for (face, draw) in draws.iter().enumerate() {
            assert_eq!(draw.viewport, Some(tiles[face]));
            assert_eq!(draw.slot, DebugBuffer::ALL.len() + face);
        }
        assert!(draws.iter().all(|draw| draw.slot < DEBUG_SLOTS));
    }

    #[test]
    fn grid_and_single_buffer_read_their_own_slots() {
        let grid = debug_draws(None, (900, 600));
        let slots: Vec<usize> = grid.iter().map(|draw| draw.slot).collect();
        assert_eq!(slots, vec![0, 1, 2, 3, 4, 5]);

        let depth = debug_draws(Some(DebugBuffer::Depth), (900, 600));
        assert_eq!(
            depth,
            vec![DebugDraw {
                viewport: None,
                slot: DebugBuffer::Depth.index() as usize,
            }]
        );
    }

    #[test]
    fn ssao_tile_is_blank_when_occlusion_was_skipped() {
        let ssao = DebugBuffer::Ssao.index() as usize;
        let skipped = debug_entries(0.1, 25.0, false);
        assert_eq!(skipped.len(), DEBUG_SLOTS);
        assert_eq!(skipped[ssao].buffer, DebugBuffer::Ssao.index());
        assert_eq!(skipped[ssao].ambient_occlusion, 0);

        let rendered = debug_entries(0.1, 25.0, true);
        assert_eq!(rendered[ssao].ambient_occlusion, 1);
    }

    #[test]
    fn cube_slots_address_consecutive_faces() {
        let entries = debug_entries(0.1, 25.0, true);
        let cube = &entries[DebugBuffer::ALL.len()..];
        assert_eq!(cube.len(), FACE_COUNT);
        for (face, entry) in cube.iter().enumerate() {
            assert_eq!(entry.buffer, DebugBuffer::ShadowCube.index());
            assert_eq!(entry.face, face as u32);
            assert_eq!(entry.shadow_far, 25.0);
        }
    }
}
