//! Seam between the resource manager and the GPU.
//!
//! [`ResourceManager`](super::resources::ResourceManager) only talks to a
//! [`GpuBackend`], which lets allocation and completeness rules run against a
//! counting mock in tests and against wgpu in the renderer.

use serde::{Deserialize, Serialize};

/// Logical formats of the pipeline's render targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TargetFormat {
    Rgba32Float,
    /// Three float channels. wgpu has no 3-channel targets, so this is
    /// backed by `Rgba32Float`.
    Rgb32Float,
    Rgba16Float,
    R32Float,
    Depth32Float,
}

impl TargetFormat {
    pub fn wgpu(self) -> wgpu::TextureFormat {
        match self {
            TargetFormat::Rgba32Float | TargetFormat::Rgb32Float => {
                wgpu::TextureFormat::Rgba32Float
            }
            TargetFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
            TargetFormat::R32Float => wgpu::TextureFormat::R32Float,
            TargetFormat::Depth32Float => wgpu::TextureFormat::Depth32Float,
        }
    }

    pub fn is_depth(self) -> bool {
        matches!(self, TargetFormat::Depth32Float)
    }

    pub fn bytes_per_texel(self) -> u32 {
        match self {
            TargetFormat::Rgba32Float | TargetFormat::Rgb32Float => 16,
            TargetFormat::Rgba16Float => 8,
            TargetFormat::R32Float | TargetFormat::Depth32Float => 4,
        }
    }
}

/// Multisampling of a target. Every attachment of a framebuffer must agree
/// on both fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SampleConfig {
    pub count: u32,
    /// wgpu always uses the standard sample positions, so this flag only
    /// participates in the completeness rules.
    pub fixed_locations: bool,
}

impl SampleConfig {
    pub const SINGLE: SampleConfig = SampleConfig {
        count: 1,
        fixed_locations: true,
    };

    pub fn new(count: u32, fixed_locations: bool) -> Self {
        Self {
            count: count.max(1),
            fixed_locations,
        }
    }

    pub fn is_multisampled(&self) -> bool {
        self.count > 1
    }
}

impl Default for SampleConfig {
    fn default() -> Self {
        Self::SINGLE
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureDesc {
    pub label: &'static str,
    pub width: u32,
    pub height: u32,
    /// Array layers; a cube map has six.
    pub layers: u32,
    pub cube: bool,
    pub mip_levels: u32,
    pub format: TargetFormat,
    pub samples: SampleConfig,
    pub storage: bool,
}

impl TextureDesc {
    pub fn new(label: &'static str, width: u32, height: u32, format: TargetFormat) -> Self {
        Self {
            label,
            width,
            height,
            layers: 1,
            cube: false,
            mip_levels: 1,
            format,
            samples: SampleConfig::SINGLE,
            storage: false,
        }
    }

    pub fn with_samples(mut self, samples: SampleConfig) -> Self {
        self.samples = samples;
        self
    }

    pub fn with_mips(mut self, mip_levels: u32) -> Self {
        self.mip_levels = mip_levels.max(1);
        self
    }

    pub fn cube(mut self) -> Self {
        self.layers = 6;
        self.cube = true;
        self
    }

    pub fn storage(mut self) -> Self {
        self.storage = true;
        self
    }

    pub fn extent(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// Compute dispatch limits relevant to workgroup sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkgroupLimits {
    pub max_invocations: u32,
    pub max_size_x: u32,
    pub max_size_y: u32,
}

impl Default for WorkgroupLimits {
    fn default() -> Self {
        Self {
            max_invocations: 256,
            max_size_x: 256,
            max_size_y: 256,
        }
    }
}

pub trait GpuBackend {
    type Texture;

    fn create_texture(&self, desc: &TextureDesc) -> Self::Texture;

    /// Whether `format` can be rendered to with `samples` samples per pixel.
    fn supports_format(&self, format: TargetFormat, samples: u32) -> bool;

    fn workgroup_limits(&self) -> WorkgroupLimits;
}

/// Texture plus the views passes bind.
#[derive(Debug)]
pub struct GpuTexture {
    pub texture: wgpu::Texture,
    /// Whole-resource view used for sampling; a cube view for cube maps.
    pub view: wgpu::TextureView,
    /// One single-mip, single-layer view per mip level, or per layer for
    /// layered textures.
    pub attachments: Vec<wgpu::TextureView>,
}

impl GpuTexture {
    pub fn attachment(&self, index: usize) -> &wgpu::TextureView {
        self.attachments.get(index).unwrap_or(&self.view)
    }
}

/// [`GpuBackend`] backed by a wgpu device.
pub struct WgpuBackend {
    adapter: wgpu::Adapter,
    device: wgpu::Device,
}

impl WgpuBackend {
    pub fn new(adapter: wgpu::Adapter, device: wgpu::Device) -> Self {
        Self { adapter, device }
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn adapter(&self) -> &wgpu::Adapter {
        &self.adapter
    }

    fn format_features(&self, format: wgpu::TextureFormat) -> wgpu::TextureFormatFeatures {
        if self
            .device
            .features()
            .contains(wgpu::Features::TEXTURE_ADAPTER_SPECIFIC_FORMAT_FEATURES)
        {
            self.adapter.get_texture_format_features(format)
        } else {
            format.guaranteed_format_features(self.device.features())
        }
    }
}

impl GpuBackend for WgpuBackend {
    type Texture = GpuTexture;

    fn create_texture(&self, desc: &TextureDesc) -> GpuTexture {
        let mut usage =
            wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING;
        if !desc.samples.is_multisampled() {
            usage |= wgpu::TextureUsages::COPY_SRC;
        }
        if desc.storage {
            usage |= wgpu::TextureUsages::STORAGE_BINDING;
        }
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(desc.label),
            size: wgpu::Extent3d {
                width: desc.width.max(1),
                height: desc.height.max(1),
                depth_or_array_layers: desc.layers.max(1),
            },
            mip_level_count: desc.mip_levels.max(1),
            sample_count: desc.samples.count.max(1),
            dimension: wgpu::TextureDimension::D2,
            format: desc.format.wgpu(),
            usage,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some(desc.label),
            dimension: Some(if desc.cube {
                wgpu::TextureViewDimension::Cube
            } else if desc.layers > 1 {
                wgpu::TextureViewDimension::D2Array
            } else {
                wgpu::TextureViewDimension::D2
            }),
            ..Default::default()
        });
        let attachments = if desc.layers > 1 {
            (0..desc.layers)
                .map(|layer| {
                    texture.create_view(&wgpu::TextureViewDescriptor {
                        label: Some(desc.label),
                        dimension: Some(wgpu::TextureViewDimension::D2),
                        base_array_layer: layer,
                        array_layer_count: Some(1),
                        mip_level_count: Some(1),
                        ..Default::default()
                    })
                })
                .collect()
        } else {
            (0..desc.mip_levels.max(1))
                .map(|level| {
                    texture.create_view(&wgpu::TextureViewDescriptor {
                        label: Some(desc.label),
                        base_mip_level: level,
                        mip_level_count: Some(1),
                        ..Default::default()
                    })
                })
                .collect()
        };
        GpuTexture {
            texture,
            view,
            attachments,
        }
    }

    fn supports_format(&self, format: TargetFormat, samples: u32) -> bool {
        let features = self.format_features(format.wgpu());
        features
            .allowed_usages
            .contains(wgpu::TextureUsages::RENDER_ATTACHMENT)
            && (samples <= 1 || features.flags.sample_count_supported(samples))
    }

    fn workgroup_limits(&self) -> WorkgroupLimits {
        let limits = self.device.limits();
        WorkgroupLimits {
            max_invocations: limits.max_compute_invocations_per_workgroup,
            max_size_x: limits.max_compute_workgroup_size_x,
            max_size_y: limits.max_compute_workgroup_size_y,
        }
    }
}
