//! Uniform layouts and wgpu plumbing shared by the passes.

use std::marker::PhantomData;
use std::num::NonZeroU64;

use bytemuck::{Pod, Zeroable};
use glam::Mat3;
use log::error;

use crate::light::GpuPointLight;

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct FrameUniform {
    pub view_projection: [[f32; 4]; 4],
    pub camera_position: [f32; 4],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct ObjectUniform {
    pub model: [[f32; 4]; 4],
    pub normal: [[f32; 4]; 3],
    pub diffuse: [f32; 4],
    /// rgb: specular colour, w: shininess.
    pub specular: [f32; 4],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct FaceUniform {
    pub view_projection: [[f32; 4]; 4],
    /// xyz: light position, w: far plane.
    pub light: [f32; 4],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct SsaoUniform {
    pub projection: [[f32; 4]; 4],
    pub inv_projection: [[f32; 4]; 4],
    pub view: [[f32; 4]; 4],
    pub screen_resolution: [f32; 2],
    pub ssao_samples: u32,
    pub ssao_noise_size: u32,
    pub ssao_radius: f32,
    pub ssao_offset: f32,
    pub ssao_texture_scale: f32,
    pub _pad: f32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct ShadowScreenUniform {
    pub inv_view_projection: [[f32; 4]; 4],
    pub light: GpuPointLight,
    pub screen_resolution: [f32; 2],
    pub near_plane: f32,
    pub far_plane: f32,
    pub bias: f32,
    pub weight: f32,
    pub _pad: [f32; 2],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct CompositeUniform {
    pub inv_view_projection: [[f32; 4]; 4],
    pub camera_position: [f32; 4],
    pub ambient: [f32; 4],
    pub screen_resolution: [f32; 2],
    pub ssao_texture_scale: f32,
    pub msaa_samples: u32,
    pub ambient_occlusion: u32,
    pub shadow_mapping: u32,
    pub _pad: [u32; 2],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct DebugUniform {
    pub buffer: u32,
    pub near_plane: f32,
    /// Cube layer shown by a shadow cube tile.
    pub face: u32,
    pub shadow_far: f32,
    /// Zero when no occlusion was computed this frame.
    pub ambient_occlusion: u32,
    pub _pad: [u32; 3],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct PresentUniform {
    pub exposure: f32,
    pub tone_adjust: u32,
    pub _pad: [u32; 2],
}

/// Packs a 3×3 matrix into the column layout of a WGSL `mat3x4<f32>`.
pub fn mat3_to_3x4(matrix: Mat3) -> [[f32; 4]; 3] {
    let cols = matrix.to_cols_array();
    [
        [cols[0], cols[1], cols[2], 0.0],
        [cols[3], cols[4], cols[5], 0.0],
        [cols[6], cols[7], cols[8], 0.0],
    ]
}

/// Rounds `size` up to a multiple of `alignment`.
pub fn align_to(size: u64, alignment: u64) -> u64 {
    let alignment = alignment.max(1);
    size.div_ceil(alignment) * alignment
}

/// Uniform buffer holding an array of `T`, each entry addressed with a
/// dynamic offset.
pub struct DynamicUniforms<T: Pod> {
    label: &'static str,
    buffer: wgpu::Buffer,
    stride: u64,
    capacity: usize,
    _marker: PhantomData<T>,
}

impl<T: Pod> DynamicUniforms<T> {
    pub fn new(device: &wgpu::Device, label: &'static str, capacity: usize) -> Self {
        let stride = align_to(
            std::mem::size_of::<T>() as u64,
            device.limits().min_uniform_buffer_offset_alignment as u64,
        );
        let capacity = capacity.max(1);
        Self {
            label,
            buffer: Self::create_buffer(device, label, stride, capacity),
            stride,
            capacity,
            _marker: PhantomData,
        }
    }

    fn create_buffer(
        device: &wgpu::Device,
        label: &str,
        stride: u64,
        capacity: usize,
    ) -> wgpu::Buffer {
        device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: stride * capacity as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        })
    }

    /// Grows the buffer to hold `count` entries. Returns true when the buffer
    /// was replaced and bind groups referencing it must be rebuilt.
    pub fn reserve(&mut self, device: &wgpu::Device, count: usize) -> bool {
        if count <= self.capacity {
            return false;
        }
        let capacity = count.next_power_of_two();
        self.buffer = Self::create_buffer(device, self.label, self.stride, capacity);
        self.capacity = capacity;
        true
    }

    /// Writes `values` starting at entry zero. The buffer must already hold
    /// `values.len()` entries.
    pub fn write(&self, queue: &wgpu::Queue, values: &[T]) {
        if values.is_empty() {
            return;
        }
        let stride = self.stride as usize;
        let mut staging = vec![0u8; stride * values.len()];
        for (chunk, value) in staging.chunks_exact_mut(stride).zip(values) {
            chunk[..std::mem::size_of::<T>()].copy_from_slice(bytemuck::bytes_of(value));
        }
        queue.write_buffer(&self.buffer, 0, &staging);
    }

    pub fn offset(&self, index: usize) -> u32 {
        (self.stride * index as u64) as u32
    }

    pub fn buffer(&self) -> &wgpu::Buffer {
        &self.buffer
    }

    /// Binding covering a single entry, to be combined with [`Self::offset`].
    pub fn binding(&self) -> wgpu::BindingResource<'_> {
        wgpu::BindingResource::Buffer(wgpu::BufferBinding {
            buffer: &self.buffer,
            offset: 0,
            size: NonZeroU64::new(std::mem::size_of::<T>() as u64),
        })
    }
}

pub fn uniform_entry<T>(
    binding: u32,
    visibility: wgpu::ShaderStages,
    dynamic: bool,
) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: dynamic,
            min_binding_size: NonZeroU64::new(std::mem::size_of::<T>() as u64),
        },
        count: None,
    }
}

/// Unfilterable float texture visible to the fragment stage.
pub fn texture_entry(
    binding: u32,
    dimension: wgpu::TextureViewDimension,
    multisampled: bool,
) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT | wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Texture {
            sample_type: wgpu::TextureSampleType::Float { filterable: false },
            view_dimension: dimension,
            multisampled,
        },
        count: None,
    }
}

pub fn sampler_entry(binding: u32, filtering: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Sampler(if filtering {
            wgpu::SamplerBindingType::Filtering
        } else {
            wgpu::SamplerBindingType::NonFiltering
        }),
        count: None,
    }
}

/// Layout of the G-buffer group shared by every screen pass.
pub fn gbuffer_layout(device: &wgpu::Device, samples: u32) -> wgpu::BindGroupLayout {
    use crate::render::shaders::bindings;

    let multisampled = samples > 1;
    let d2 = wgpu::TextureViewDimension::D2;
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("gbuffer-layout"),
        entries: &[
            texture_entry(bindings::DIFFUSE, d2, multisampled),
            texture_entry(bindings::NORMAL, d2, multisampled),
            texture_entry(bindings::SPECULAR, d2, multisampled),
            wgpu::BindGroupLayoutEntry {
                binding: bindings::DEPTH,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Depth,
                    view_dimension: d2,
                    multisampled,
                },
                count: None,
            },
        ],
    })
}

pub fn shader_module(device: &wgpu::Device, label: &str, source: String) -> wgpu::ShaderModule {
    device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(label),
        source: wgpu::ShaderSource::Wgsl(source.into()),
    })
}

/// Runs `build` inside a validation error scope. Returns `None` and logs the
/// error when shader compilation or pipeline creation failed.
pub fn checked<T>(device: &wgpu::Device, label: &str, build: impl FnOnce() -> T) -> Option<T> {
    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let value = build();
    match pollster::block_on(device.pop_error_scope()) {
        Some(err) => {
            error!("{label}: {err}");
            None
        }
        None => Some(value),
    }
}

/// Fullscreen triangle pipeline writing a single colour target.
pub fn fullscreen_pipeline(
    device: &wgpu::Device,
    label: &str,
    module: &wgpu::ShaderModule,
    fragment_entry: &str,
    layouts: &[&wgpu::BindGroupLayout],
    target: wgpu::TextureFormat,
    blend: Option<wgpu::BlendState>,
) -> wgpu::RenderPipeline {
    let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(label),
        bind_group_layouts: layouts,
        push_constant_ranges: &[],
    });
    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(label),
        layout: Some(&layout),
        vertex: wgpu::VertexState {
            module,
            entry_point: Some("vs_fullscreen"),
            compilation_options: Default::default(),
            buffers: &[],
        },
        primitive: wgpu::PrimitiveState::default(),
        depth_stencil: None,
        multisample: wgpu::MultisampleState::default(),
        fragment: Some(wgpu::FragmentState {
            module,
            entry_point: Some(fragment_entry),
            compilation_options: Default::default(),
            targets: &[Some(wgpu::ColorTargetState {
                format: target,
                blend,
                write_mask: wgpu::ColorWrites::ALL,
            })],
        }),
        multiview: None,
        cache: None,
    })
}

/// Additive blending used to accumulate per-light results.
pub const ADDITIVE: wgpu::BlendState = wgpu::BlendState {
    color: wgpu::BlendComponent {
        src_factor: wgpu::BlendFactor::One,
        dst_factor: wgpu::BlendFactor::One,
        operation: wgpu::BlendOperation::Add,
    },
    alpha: wgpu::BlendComponent {
        src_factor: wgpu::BlendFactor::One,
        dst_factor: wgpu::BlendFactor::One,
        operation: wgpu::BlendOperation::Add,
    },
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_sizes_match_wgsl_layouts() {
        assert_eq!(std::mem::size_of::<ObjectUniform>(), 144);
        assert_eq!(std::mem::size_of::<FaceUniform>(), 80);
        assert_eq!(std::mem::size_of::<SsaoUniform>(), 224);
        assert_eq!(std::mem::size_of::<ShadowScreenUniform>(), 144);
        assert_eq!(std::mem::size_of::<CompositeUniform>(), 128);
        assert_eq!(std::mem::size_of::<DebugUniform>(), 32);
        assert_eq!(std::mem::size_of::<PresentUniform>(), 16);
    }

    #[test]
    fn normal_matrix_columns_are_padded() {
        let packed = mat3_to_3x4(Mat3::from_cols_array(&[
            1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0,
        ]));
        assert_eq!(packed[1], [4.0, 5.0, 6.0, 0.0]);
        assert!(packed.iter().all(|column| column[3] == 0.0));
    }

    #[test]
    fn alignment_rounds_up() {
        assert_eq!(align_to(144, 256), 256);
        assert_eq!(align_to(256, 256), 256);
        assert_eq!(align_to(257, 256), 512);
        assert_eq!(align_to(10, 0), 10);
    }
}
