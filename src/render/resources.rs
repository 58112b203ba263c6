use std::collections::HashMap;

use log::{debug, error};

use super::backend::{GpuBackend, SampleConfig, TargetFormat, TextureDesc, WorkgroupLimits};
use crate::error::FramebufferError;

pub const DIFFUSE_FORMAT: TargetFormat = TargetFormat::Rgba32Float;
pub const NORMAL_FORMAT: TargetFormat = TargetFormat::Rgb32Float;
pub const SPECULAR_FORMAT: TargetFormat = TargetFormat::Rgba32Float;
pub const DEPTH_FORMAT: TargetFormat = TargetFormat::Depth32Float;
pub const SSAO_FORMAT: TargetFormat = TargetFormat::R32Float;
/// Needs additive blending, which 32-bit float targets lack.
pub const SHADOW_BUFFER_FORMAT: TargetFormat = TargetFormat::Rgba16Float;
pub const SCREEN_FORMAT: TargetFormat = TargetFormat::Rgba16Float;
pub const SHADOW_DISTANCE_FORMAT: TargetFormat = TargetFormat::R32Float;

/// Compute workgroup dimensions for screen-sized dispatches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkgroupSize {
    pub x: u32,
    pub y: u32,
}

impl WorkgroupSize {
    pub fn dispatch(&self, width: u32, height: u32) -> (u32, u32) {
        (width.div_ceil(self.x), height.div_ceil(self.y))
    }
}

impl Default for WorkgroupSize {
    fn default() -> Self {
        Self { x: 8, y: 8 }
    }
}

pub fn gcd(mut a: u32, mut b: u32) -> u32 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

/// Workgroup whose shape follows the reduced screen aspect ratio while
/// staying within the device limits.
pub fn derive_workgroup_size(width: u32, height: u32, limits: &WorkgroupLimits) -> WorkgroupSize {
    if width == 0 || height == 0 {
        return WorkgroupSize { x: 1, y: 1 };
    }
    let divisor = gcd(width, height);
    let (numerator, denominator) = ((width / divisor) as f64, (height / divisor) as f64);
    let scale = (limits.max_invocations.max(1) as f64 / (numerator * denominator)).sqrt();
    let mut x = ((scale * numerator).floor() as u32).clamp(1, limits.max_size_x.max(1));
    let mut y = ((scale * denominator).floor() as u32).clamp(1, limits.max_size_y.max(1));
    while x * y > limits.max_invocations.max(1) {
        if x >= y {
            x -= 1;
        } else {
            y -= 1;
        }
    }
    WorkgroupSize { x, y }
}

/// Mip levels needed to reach a 1×1 level.
pub fn mip_level_count(width: u32, height: u32) -> u32 {
    32 - width.max(height).max(1).leading_zeros()
}

pub struct Target<T> {
    pub desc: TextureDesc,
    pub texture: T,
}

pub struct GBuffer<T> {
    pub diffuse: Target<T>,
    pub normal: Target<T>,
    pub specular: Target<T>,
    pub depth: Target<T>,
}

/// Window-sized targets, recreated together on every reallocation.
pub struct RenderTargets<T> {
    pub gbuffer: GBuffer<T>,
    pub ssao_raw: Target<T>,
    pub ssao: Target<T>,
    pub shadow: Target<T>,
    pub screen: Target<T>,
}

/// Cube map the shadow pass renders each light into.
pub struct ShadowTargets<T> {
    pub distance: Target<T>,
    pub depth: Target<T>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FramebufferId {
    GBuffer,
    Ssao,
    SsaoBlur,
    Shadow,
    Screen,
    ShadowCube,
}

impl FramebufferId {
    pub fn label(self) -> &'static str {
        match self {
            FramebufferId::GBuffer => "gbuffer",
            FramebufferId::Ssao => "ssao",
            FramebufferId::SsaoBlur => "ssao-blur",
            FramebufferId::Shadow => "shadow",
            FramebufferId::Screen => "screen",
            FramebufferId::ShadowCube => "shadow-cube",
        }
    }
}

/// Attachments that are bound together for one pass.
pub struct FramebufferSpec<'a> {
    pub label: &'static str,
    pub attachments: Vec<&'a TextureDesc>,
}

/// Verifies a framebuffer can be rendered into: at least one attachment,
/// formats the device accepts at the requested sample count, and matching
/// extents and sampling across attachments.
pub fn check_complete<B: GpuBackend + ?Sized>(
    backend: &B,
    framebuffer: &FramebufferSpec<'_>,
) -> Result<(), FramebufferError> {
    let Some(first) = framebuffer.attachments.first() else {
        return Err(FramebufferError::MissingAttachment(framebuffer.label));
    };
    for desc in &framebuffer.attachments {
        if !backend.supports_format(desc.format, desc.samples.count) {
            return Err(FramebufferError::UnsupportedFormat {
                framebuffer: framebuffer.label,
                attachment: desc.label,
                format: desc.format,
                samples: desc.samples.count,
            });
        }
        if desc.extent() != first.extent() {
            return Err(FramebufferError::DimensionMismatch {
                framebuffer: framebuffer.label,
                attachment: desc.label,
                expected: first.extent(),
                found: desc.extent(),
            });
        }
        let sampling = (desc.samples.count, desc.samples.fixed_locations);
        let expected = (first.samples.count, first.samples.fixed_locations);
        if sampling != expected {
            return Err(FramebufferError::MultisampleMismatch {
                framebuffer: framebuffer.label,
                attachment: desc.label,
                expected,
                found: sampling,
            });
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Allocation {
    /// Zero-area request; the previous targets stay in place.
    Skipped,
    Allocated { incomplete: usize },
}

/// Owns every size-dependent GPU target of the pipeline.
pub struct ResourceManager<B: GpuBackend> {
    backend: B,
    ssao_scale: f32,
    targets: Option<RenderTargets<B::Texture>>,
    shadow: Option<ShadowTargets<B::Texture>>,
    extent: (u32, u32),
    samples: SampleConfig,
    workgroup: WorkgroupSize,
    incomplete: HashMap<FramebufferId, FramebufferError>,
    generation: u64,
}

impl<B: GpuBackend> ResourceManager<B> {
    pub fn new(backend: B, ssao_scale: f32) -> Self {
        Self {
            backend,
            ssao_scale,
            targets: None,
            shadow: None,
            extent: (0, 0),
            samples: SampleConfig::SINGLE,
            workgroup: WorkgroupSize::default(),
            incomplete: HashMap::new(),
            generation: 0,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Recreates the window-sized targets. The previous set is released
    /// before the new one is created.
    pub fn allocate(&mut self, width: u32, height: u32, samples: SampleConfig) -> Allocation {
        if width == 0 || height == 0 {
            debug!("ignoring {width}x{height} allocation request");
            return Allocation::Skipped;
        }
        self.targets = None;
        self.incomplete.retain(|id, _| *id == FramebufferId::ShadowCube);

        let (ssao_width, ssao_height) = scaled_extent(width, height, self.ssao_scale);
        let targets = RenderTargets {
            gbuffer: GBuffer {
                diffuse: self.target(
                    TextureDesc::new("gbuffer-diffuse", width, height, DIFFUSE_FORMAT)
                        .with_samples(samples),
                ),
                normal: self.target(
                    TextureDesc::new("gbuffer-normal", width, height, NORMAL_FORMAT)
                        .with_samples(samples),
                ),
                specular: self.target(
                    TextureDesc::new("gbuffer-specular", width, height, SPECULAR_FORMAT)
                        .with_samples(samples),
                ),
                depth: self.target(
                    TextureDesc::new("gbuffer-depth", width, height, DEPTH_FORMAT)
                        .with_samples(samples),
                ),
            },
            ssao_raw: self.target(TextureDesc::new(
                "ssao-raw",
                ssao_width,
                ssao_height,
                SSAO_FORMAT,
            )),
            ssao: self.target(
                TextureDesc::new("ssao", ssao_width, ssao_height, SSAO_FORMAT).storage(),
            ),
            shadow: self.target(TextureDesc::new(
                "shadow-buffer",
                width,
                height,
                SHADOW_BUFFER_FORMAT,
            )),
            screen: self.target(
                TextureDesc::new("screen", width, height, SCREEN_FORMAT)
                    .with_mips(mip_level_count(width, height)),
            ),
        };

        let checks = [
            (
                FramebufferId::GBuffer,
                vec![
                    &targets.gbuffer.diffuse.desc,
                    &targets.gbuffer.normal.desc,
                    &targets.gbuffer.specular.desc,
                    &targets.gbuffer.depth.desc,
                ],
            ),
            (FramebufferId::Ssao, vec![&targets.ssao_raw.desc]),
            (FramebufferId::SsaoBlur, vec![&targets.ssao.desc]),
            (FramebufferId::Shadow, vec![&targets.shadow.desc]),
            (FramebufferId::Screen, vec![&targets.screen.desc]),
        ];
        for (id, attachments) in checks {
            self.record(id, attachments);
        }

        self.extent = (width, height);
        self.samples = samples;
        self.workgroup = derive_workgroup_size(width, height, &self.backend.workgroup_limits());
        self.targets = Some(targets);
        self.generation += 1;
        debug!(
            "allocated {width}x{height} targets with {} sample(s), workgroup {}x{}",
            samples.count, self.workgroup.x, self.workgroup.y
        );
        Allocation::Allocated {
            incomplete: self.incomplete.len(),
        }
    }

    /// Creates the shadow cube map and its depth attachment. Returns whether
    /// both are usable.
    pub fn allocate_shadow(&mut self, resolution: u32) -> bool {
        if resolution == 0 {
            return false;
        }
        self.shadow = None;
        let shadow = ShadowTargets {
            distance: self.target(
                TextureDesc::new(
                    "shadow-cube",
                    resolution,
                    resolution,
                    SHADOW_DISTANCE_FORMAT,
                )
                .cube(),
            ),
            depth: self.target(TextureDesc::new(
                "shadow-cube-depth",
                resolution,
                resolution,
                DEPTH_FORMAT,
            )),
        };
        let complete = self.record(
            FramebufferId::ShadowCube,
            vec![&shadow.distance.desc, &shadow.depth.desc],
        );
        self.shadow = Some(shadow);
        self.generation += 1;
        complete
    }

    fn target(&self, desc: TextureDesc) -> Target<B::Texture> {
        Target {
            texture: self.backend.create_texture(&desc),
            desc,
        }
    }

    fn record(&mut self, id: FramebufferId, attachments: Vec<&TextureDesc>) -> bool {
        let spec = FramebufferSpec {
            label: id.label(),
            attachments,
        };
        match check_complete(&self.backend, &spec) {
            Ok(()) => {
                self.incomplete.remove(&id);
                true
            }
            Err(err) => {
                error!("framebuffer incomplete: {err}");
                self.incomplete.insert(id, err);
                false
            }
        }
    }

    pub fn targets(&self) -> Option<&RenderTargets<B::Texture>> {
        self.targets.as_ref()
    }

    pub fn shadow_targets(&self) -> Option<&ShadowTargets<B::Texture>> {
        self.shadow.as_ref()
    }

    pub fn is_complete(&self, id: FramebufferId) -> bool {
        let allocated = match id {
            FramebufferId::ShadowCube => self.shadow.is_some(),
            _ => self.targets.is_some(),
        };
        allocated && !self.incomplete.contains_key(&id)
    }

    pub fn framebuffer_error(&self, id: FramebufferId) -> Option<&FramebufferError> {
        self.incomplete.get(&id)
    }

    pub fn extent(&self) -> (u32, u32) {
        self.extent
    }

    pub fn ssao_extent(&self) -> (u32, u32) {
        scaled_extent(self.extent.0, self.extent.1, self.ssao_scale)
    }

    pub fn ssao_scale(&self) -> f32 {
        self.ssao_scale
    }

    pub fn samples(&self) -> SampleConfig {
        self.samples
    }

    pub fn workgroup_size(&self) -> WorkgroupSize {
        self.workgroup
    }

    /// Bumped on every reallocation so dependants can rebuild bind groups.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Drops every target.
    pub fn release(&mut self) {
        self.targets = None;
        self.shadow = None;
        self.incomplete.clear();
        self.extent = (0, 0);
        self.generation += 1;
    }
}

fn scaled_extent(width: u32, height: u32, scale: f32) -> (u32, u32) {
    let scale = scale.clamp(f32::EPSILON, 1.0);
    (
        ((width as f32 * scale) as u32).max(1),
        ((height as f32 * scale) as u32).max(1),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::mock::MockBackend;

    const TARGETS_PER_SET: usize = 8;

    #[test]
    fn zero_area_keeps_previous_targets() {
        let backend = MockBackend::default();
        let mut manager = ResourceManager::new(backend.clone(), 0.75);
        manager.allocate(800, 600, SampleConfig::SINGLE);
        let generation = manager.generation();

        assert_eq!(manager.allocate(0, 0, SampleConfig::SINGLE), Allocation::Skipped);
        assert_eq!(manager.allocate(800, 0, SampleConfig::SINGLE), Allocation::Skipped);
        assert_eq!(manager.extent(), (800, 600));
        assert_eq!(manager.generation(), generation);
        assert_eq!(backend.live(), TARGETS_PER_SET);
        assert!(manager.targets().is_some());
    }

    #[test]
    fn repeated_allocation_never_leaks() {
        let backend = MockBackend::default();
        let mut manager = ResourceManager::new(backend.clone(), 0.75);
        for _ in 0..5 {
            manager.allocate(800, 600, SampleConfig::SINGLE);
            assert_eq!(backend.live(), TARGETS_PER_SET);
        }
        assert_eq!(backend.peak(), TARGETS_PER_SET);
        assert_eq!(backend.created(), 5 * TARGETS_PER_SET);
        manager.release();
        assert_eq!(backend.live(), 0);
    }

    #[test]
    fn ssao_targets_follow_texture_scale() {
        let mut manager = ResourceManager::new(MockBackend::default(), 0.5);
        manager.allocate(801, 600, SampleConfig::SINGLE);
        let targets = manager.targets().unwrap();
        assert_eq!(targets.ssao_raw.desc.extent(), (400, 300));
        assert_eq!(targets.ssao.texture.desc.extent(), (400, 300));
        assert_eq!(targets.screen.desc.mip_levels, 10);
    }

    #[test]
    fn multisampled_gbuffer_shares_sampling() {
        let mut manager = ResourceManager::new(MockBackend::default(), 0.75);
        manager.allocate(640, 480, SampleConfig::new(4, true));
        let gbuffer = &manager.targets().unwrap().gbuffer;
        assert_eq!(gbuffer.depth.texture.desc.samples.count, 4);
        assert_eq!(gbuffer.normal.desc.samples.count, 4);
        assert!(manager.is_complete(FramebufferId::GBuffer));
        assert_eq!(manager.targets().unwrap().screen.desc.samples.count, 1);
    }

    #[test]
    fn unsupported_format_marks_framebuffer_incomplete() {
        let backend = MockBackend::rejecting(TargetFormat::Rgb32Float, 4);
        let mut manager = ResourceManager::new(backend, 0.75);
        let allocation = manager.allocate(640, 480, SampleConfig::new(4, true));
        assert_eq!(allocation, Allocation::Allocated { incomplete: 1 });
        assert!(!manager.is_complete(FramebufferId::GBuffer));
        assert!(manager.is_complete(FramebufferId::Ssao));
        assert!(matches!(
            manager.framebuffer_error(FramebufferId::GBuffer),
            Some(FramebufferError::UnsupportedFormat {
                attachment: "gbuffer-normal",
                ..
            })
        ));

        manager.allocate(640, 480, SampleConfig::SINGLE);
        assert!(manager.is_complete(FramebufferId::GBuffer));
    }

    #[test]
    fn completeness_detects_mismatches() {
        let backend = MockBackend::default();
        let colour = TextureDesc::new("colour", 64, 64, DIFFUSE_FORMAT);
        let small_depth = TextureDesc::new("depth", 32, 64, DEPTH_FORMAT);
        let spec = FramebufferSpec {
            label: "test",
            attachments: vec![&colour, &small_depth],
        };
        assert!(matches!(
            check_complete(&backend, &spec),
            Err(FramebufferError::DimensionMismatch { .. })
        ));

        let variable = TextureDesc::new("depth", 64, 64, DEPTH_FORMAT)
            .with_samples(SampleConfig::new(1, false));
        let spec = FramebufferSpec {
            label: "test",
            attachments: vec![&colour, &variable],
        };
        assert!(matches!(
            check_complete(&backend, &spec),
            Err(FramebufferError::MultisampleMismatch { .. })
        ));

        let empty = FramebufferSpec {
            label: "empty",
            attachments: Vec::new(),
        };
        assert_eq!(
            check_complete(&backend, &empty),
            Err(FramebufferError::MissingAttachment("empty"))
        );
    }

    #[test]
    fn shadow_cube_is_allocated_once() {
        let backend = MockBackend::default();
        let mut manager = ResourceManager::new(backend.clone(), 0.75);
        assert!(manager.allocate_shadow(1024));
        manager.allocate(320, 240, SampleConfig::SINGLE);
        manager.allocate(640, 480, SampleConfig::SINGLE);
        let shadow = manager.shadow_targets().unwrap();
        assert_eq!(shadow.distance.desc.layers, 6);
        assert!(shadow.distance.desc.cube);
        assert_eq!(backend.live(), TARGETS_PER_SET + 2);
        assert!(manager.is_complete(FramebufferId::ShadowCube));
    }

    #[test]
    fn workgroup_follows_aspect_ratio() {
        let limits = WorkgroupLimits::default();
        assert_eq!(derive_workgroup_size(800, 600, &limits), WorkgroupSize { x: 18, y: 13 });
        let wide = derive_workgroup_size(1920, 1080, &limits);
        assert!(wide.x > wide.y && wide.x * wide.y <= 256);
        assert_eq!(derive_workgroup_size(512, 512, &limits), WorkgroupSize { x: 16, y: 16 });
    }

    #[test]
    fn workgroup_respects_limits_for_extreme_aspect() {
        let limits = WorkgroupLimits {
            max_invocations: 256,
            max_size_x: 64,
            max_size_y: 64,
        };
        let size = derive_workgroup_size(4096, 1, &limits);
        assert!(size.x <= 64 && size.y >= 1);
        assert!(size.x * size.y <= 256);
        let size = derive_workgroup_size(1279, 719, &limits);
        assert!(size.x * size.y <= 256 && size.x >= 1 && size.y >= 1);
    }

    #[test]
    fn mip_chain_reaches_one_texel() {
        assert_eq!(mip_level_count(1, 1), 1);
        assert_eq!(mip_level_count(800, 600), 10);
        assert_eq!(mip_level_count(1024, 1), 11);
        assert_eq!(gcd(800, 600), 200);
    }
}
