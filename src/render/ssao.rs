//! Screen-space ambient occlusion.
//!
//! The kernel and noise are generated on the CPU from a seed so two runs with
//! the same settings shade identically. Occlusion is evaluated in a fragment
//! pass at `texture_scale` resolution, then optionally box-blurred by a
//! compute pass whose workgroup size follows the window's aspect ratio.

use glam::Vec3;
use log::{debug, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use wgpu::util::DeviceExt;

use crate::camera::Camera;
use crate::config::SsaoSettings;
use crate::render::backend::GpuTexture;
use crate::render::common::{self, SsaoUniform};
use crate::render::resources::{RenderTargets, WorkgroupSize, SSAO_FORMAT};
use crate::render::shaders;

/// Hemisphere sample offsets in tangent space, +Z along the normal.
#[derive(Debug, Clone, PartialEq)]
pub struct SsaoKernel {
    pub samples: Vec<Vec3>,
}

impl SsaoKernel {
    /// Builds `count` samples. Samples are scaled so they cluster near the
    /// origin, and every sample has length at most one.
    pub fn generate(count: u32, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let samples = (0..count)
            .map(|i| {
                let direction = Vec3::new(
                    rng.gen::<f32>() * 2.0 - 1.0,
                    rng.gen::<f32>() * 2.0 - 1.0,
                    rng.gen::<f32>(),
                )
                .normalize_or_zero();
                let t = i as f32 / count as f32;
                let falloff = 0.1 + (1.0 - 0.1) * t * t;
                direction * rng.gen::<f32>() * falloff
            })
            .collect();
        Self { samples }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Samples padded to `vec4` for the storage buffer. Never empty, so the
    /// buffer binding stays valid with zero samples.
    pub fn to_gpu(&self) -> Vec<[f32; 4]> {
        if self.samples.is_empty() {
            return vec![[0.0; 4]];
        }
        self.samples.iter().map(|sample| sample.extend(0.0).into()).collect()
    }
}

/// Random rotation vectors in the tangent plane, one per texel of a
/// `size`×`size` tiling texture.
pub fn generate_noise(size: u32, seed: u64) -> Vec<[f32; 4]> {
    let mut rng = StdRng::seed_from_u64(seed.wrapping_add(1));
    (0..size * size)
        .map(|_| {
            [
                rng.gen::<f32>() * 2.0 - 1.0,
                rng.gen::<f32>() * 2.0 - 1.0,
                0.0,
                0.0,
            ]
        })
        .collect()
}

/// Kernel and noise texels for `settings`, derived from `seed`.
pub fn generate_inputs(settings: &SsaoSettings, seed: u64) -> (SsaoKernel, Vec<[f32; 4]>) {
    let kernel = SsaoKernel::generate(settings.samples, seed);
    let noise = generate_noise(settings.noise_size.max(1), seed);
    (kernel, noise)
}

/// GPU copies of the kernel and noise plus the group that binds them.
struct SsaoInputs {
    group: wgpu::BindGroup,
    _kernel: wgpu::Buffer,
    _noise: wgpu::Texture,
}

impl SsaoInputs {
    fn upload(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        layout: &wgpu::BindGroupLayout,
        uniform: &wgpu::Buffer,
        kernel: &SsaoKernel,
        noise: &[[f32; 4]],
        noise_size: u32,
    ) -> Self {
        let kernel_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("ssao-kernel"),
            contents: bytemuck::cast_slice(&kernel.to_gpu()),
            usage: wgpu::BufferUsages::STORAGE,
        });
        let noise_texture = device.create_texture_with_data(
            queue,
            &wgpu::TextureDescriptor {
                label: Some("ssao-noise"),
                size: wgpu::Extent3d {
                    width: noise_size,
                    height: noise_size,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: wgpu::TextureFormat::Rgba32Float,
                usage: wgpu::TextureUsages::TEXTURE_BINDING,
                view_formats: &[],
            },
            wgpu::util::TextureDataOrder::LayerMajor,
            bytemuck::cast_slice(noise),
        );
        let noise_view = noise_texture.create_view(&wgpu::TextureViewDescriptor::default());
        let group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("ssao-bind-group"),
            layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: uniform.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: kernel_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::TextureView(&noise_view),
                },
            ],
        });
        Self {
            group,
            _kernel: kernel_buffer,
            _noise: noise_texture,
        }
    }
}

pub struct SsaoPass {
    settings: SsaoSettings,
    kernel: SsaoKernel,
    layout: wgpu::BindGroupLayout,
    blur_layout: wgpu::BindGroupLayout,
    uniform: wgpu::Buffer,
    inputs: SsaoInputs,
    pipeline: Option<wgpu::RenderPipeline>,
    blur_pipeline: Option<wgpu::ComputePipeline>,
    blur_group: Option<wgpu::BindGroup>,
    workgroup: WorkgroupSize,
}

impl SsaoPass {
    pub fn new(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        settings: &SsaoSettings,
        seed: u64,
        gbuffer_layout: &wgpu::BindGroupLayout,
        samples: u32,
        workgroup: WorkgroupSize,
    ) -> Self {
        let (kernel, noise) = generate_inputs(settings, seed);
        debug!("generated {} ssao kernel samples", kernel.len());

        let uniform = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("ssao-uniform"),
            size: std::mem::size_of::<SsaoUniform>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("ssao-layout"),
            entries: &[
                common::uniform_entry::<SsaoUniform>(0, wgpu::ShaderStages::FRAGMENT, false),
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Storage { read_only: true },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                common::texture_entry(2, wgpu::TextureViewDimension::D2, false),
            ],
        });
        let inputs = SsaoInputs::upload(
            device,
            queue,
            &layout,
            &uniform,
            &kernel,
            &noise,
            settings.noise_size.max(1),
        );

        let blur_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("ssao-blur-layout"),
            entries: &[
                common::texture_entry(0, wgpu::TextureViewDimension::D2, false),
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::StorageTexture {
                        access: wgpu::StorageTextureAccess::WriteOnly,
                        format: SSAO_FORMAT.wgpu(),
                        view_dimension: wgpu::TextureViewDimension::D2,
                    },
                    count: None,
                },
            ],
        });

        let mut pass = Self {
            settings: *settings,
            kernel,
            layout,
            blur_layout,
            uniform,
            inputs,
            pipeline: None,
            blur_pipeline: None,
            blur_group: None,
            workgroup,
        };
        pass.rebuild(device, gbuffer_layout, samples, workgroup);
        pass
    }

    pub fn kernel(&self) -> &SsaoKernel {
        &self.kernel
    }

    /// Regenerates the kernel and noise for new sample, radius, offset or
    /// noise settings. Blur and texture scale changes still need
    /// [`SsaoPass::rebuild`] and a target reallocation.
    pub fn reconfigure(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        settings: &SsaoSettings,
        seed: u64,
    ) {
        let (kernel, noise) = generate_inputs(settings, seed);
        self.inputs = SsaoInputs::upload(
            device,
            queue,
            &self.layout,
            &self.uniform,
            &kernel,
            &noise,
            settings.noise_size.max(1),
        );
        debug!(
            "regenerated ssao kernel: {} -> {} samples",
            self.kernel.len(),
            kernel.len()
        );
        self.kernel = kernel;
        self.settings = *settings;
    }

    /// Recompiles the permutations that depend on the G-buffer sample count
    /// and on the blur workgroup size.
    pub fn rebuild(
        &mut self,
        device: &wgpu::Device,
        gbuffer_layout: &wgpu::BindGroupLayout,
        samples: u32,
        workgroup: WorkgroupSize,
    ) {
        self.pipeline = common::checked(device, "ssao pipeline", || {
            let module = common::shader_module(device, "ssao-shader", shaders::ssao(samples));
            common::fullscreen_pipeline(
                device,
                "ssao-pipeline",
                &module,
                "fs_ssao",
                &[gbuffer_layout, &self.layout],
                SSAO_FORMAT.wgpu(),
                None,
            )
        });

        self.workgroup = workgroup;
        self.blur_pipeline = if self.settings.blur {
            common::checked(device, "ssao blur pipeline", || {
                let module = common::shader_module(
                    device,
                    "ssao-blur-shader",
                    shaders::ssao_blur(workgroup.x, workgroup.y),
                );
                let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                    label: Some("ssao-blur-pipeline-layout"),
                    bind_group_layouts: &[&self.blur_layout],
                    push_constant_ranges: &[],
                });
                device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                    label: Some("ssao-blur-pipeline"),
                    layout: Some(&layout),
                    module: &module,
                    entry_point: Some("cs_blur"),
                    compilation_options: Default::default(),
                    cache: None,
                })
            })
        } else {
            None
        };
        if self.settings.blur && self.blur_pipeline.is_none() {
            warn!("ssao blur unavailable, compositing reads the raw buffer");
        }
    }

    /// Rebuilds the bind group over the freshly allocated SSAO targets.
    pub fn bind_targets(&mut self, device: &wgpu::Device, targets: &RenderTargets<GpuTexture>) {
        self.blur_group = Some(device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("ssao-blur-bind-group"),
            layout: &self.blur_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&targets.ssao_raw.texture.view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(&targets.ssao.texture.view),
                },
            ],
        }));
    }

    pub fn update(
        &self,
        queue: &wgpu::Queue,
        camera: &Camera,
        extent: (u32, u32),
        texture_scale: f32,
    ) {
        let projection = camera.gpu_projection();
        let uniform = SsaoUniform {
            projection: projection.to_cols_array_2d(),
            inv_projection: projection.inverse().to_cols_array_2d(),
            view: camera.view().to_cols_array_2d(),
            screen_resolution: [extent.0 as f32, extent.1 as f32],
            ssao_samples: self.kernel.len() as u32,
            ssao_noise_size: self.settings.noise_size.max(1),
            ssao_radius: self.settings.radius,
            ssao_offset: self.settings.offset,
            ssao_texture_scale: texture_scale,
            _pad: 0.0,
        };
        queue.write_buffer(&self.uniform, 0, bytemuck::bytes_of(&uniform));
    }

    /// Whether the blurred buffer holds this frame's result.
    pub fn blurs(&self) -> bool {
        self.blur_pipeline.is_some() && self.blur_group.is_some()
    }

    /// Buffer the compositing pass should read.
    pub fn output<'a>(&self, targets: &'a RenderTargets<GpuTexture>) -> &'a wgpu::TextureView {
        if self.blurs() {
            &targets.ssao.texture.view
        } else {
            &targets.ssao_raw.texture.view
        }
    }

    /// Records the occlusion pass and the blur. Returns false when the pass
    /// pipeline is unavailable and nothing was recorded.
    pub fn encode(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        gbuffer_group: &wgpu::BindGroup,
        targets: &RenderTargets<GpuTexture>,
    ) -> bool {
        let Some(pipeline) = &self.pipeline else {
            return false;
        };
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("ssao-pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &targets.ssao_raw.texture.view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::WHITE),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, gbuffer_group, &[]);
            pass.set_bind_group(1, &self.inputs.group, &[]);
            pass.draw(0..3, 0..1);
        }

        if let (Some(pipeline), Some(group)) = (&self.blur_pipeline, &self.blur_group) {
            let (width, height) = targets.ssao.desc.extent();
            let (groups_x, groups_y) = self.workgroup.dispatch(width, height);
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("ssao-blur-pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, group, &[]);
            pass.dispatch_workgroups(groups_x, groups_y, 1);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kernel_is_deterministic_per_seed() {
        let first = SsaoKernel::generate(32, 7);
        let second = SsaoKernel::generate(32, 7);
        let other = SsaoKernel::generate(32, 8);
        assert_eq!(first, second);
        assert_ne!(first, other);
    }

    #[test]
    fn kernel_samples_lie_in_unit_hemisphere() {
        let kernel = SsaoKernel::generate(256, 42);
        assert_eq!(kernel.len(), 256);
        for sample in &kernel.samples {
            assert!(sample.length() <= 1.0 + 1e-6, "{sample:?} too long");
            assert!(sample.z >= 0.0);
        }
    }

    #[test]
    fn early_samples_cluster_near_origin() {
        let kernel = SsaoKernel::generate(64, 3);
        assert!(kernel.samples[0].length() <= 0.1 + 1e-6);
    }

    #[test]
    fn empty_kernel_still_uploads_one_entry() {
        let kernel = SsaoKernel::generate(0, 1);
        assert!(kernel.is_empty());
        assert_eq!(kernel.to_gpu().len(), 1);
    }

    #[test]
    fn changing_sample_count_regenerates_the_kernel() {
        let mut settings = SsaoSettings::default();
        let (before, noise) = generate_inputs(&settings, 11);
        settings.samples = 48;
        let (after, regenerated_noise) = generate_inputs(&settings, 11);

        assert_eq!(before.len(), 32);
        assert_eq!(after.len(), 48);
        assert_ne!(before.samples[..], after.samples[..32]);
        for sample in &after.samples {
            assert!(sample.length() <= 1.0 + 1e-6, "{sample:?} too long");
            assert!(sample.z >= 0.0);
        }
        assert_eq!(noise, regenerated_noise);
        assert_eq!(noise.len(), (settings.noise_size * settings.noise_size) as usize);
    }

    #[test]
    fn noise_rotates_in_tangent_plane() {
        let noise = generate_noise(4, 9);
        assert_eq!(noise.len(), 16);
        assert_eq!(noise, generate_noise(4, 9));
        for texel in noise {
            assert_eq!(texel[2], 0.0);
            assert!(texel[0].abs() <= 1.0 && texel[1].abs() <= 1.0);
        }
    }
}
