//! Frame driver. Owns the device, the targets and every pass, and records
//! them in the order geometry, SSAO, shadows, composite, present.

use std::sync::mpsc;
use std::sync::Arc;

use anyhow::{anyhow, bail, ensure, Context, Result};
use log::{debug, info, warn};
use parking_lot::Mutex;
use winit::window::{Window, WindowId};

use crate::camera::Camera;
use crate::config::{PipelineSettings, RenderToggles, SsaoSettings};
use crate::error::ConfigError;
use crate::light::pack_lights;
use crate::render::backend::{GpuTexture, SampleConfig, TargetFormat, WgpuBackend};
use crate::render::common::{self, ObjectUniform};
use crate::render::composite::{
    exposure_for, CompositePass, DebugView, LuminanceReadback, MipChain, PresentPass,
    DEFAULT_EXPOSURE,
};
use crate::render::geometry::{
    object_uniform, GeometryPass, MeshCache, ObjectDraw, ObjectUniforms,
};
use crate::render::resources::{Allocation, FramebufferId, ResourceManager, Target, WorkgroupSize};
use crate::render::shaders::bindings;
use crate::render::shadow::{plan_shadows, ShadowPass};
use crate::render::ssao::{SsaoKernel, SsaoPass};
use crate::scene::{DrawCommand, DrawList, FrameUniforms, SceneView, ShaderTarget};

const OFFSCREEN_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8UnormSrgb;

/// Everything a frame needs from the caller.
pub struct RenderContext<'a> {
    pub delta: f64,
    pub camera: &'a mut Camera,
    pub scene: &'a dyn SceneView,
    pub toggles: RenderToggles,
}

/// What a frame did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameReport {
    pub draws: usize,
    pub wireframe_draws: usize,
    pub culled: usize,
    pub shadow_lights: usize,
    pub shadow_draws: usize,
    pub ambient_occlusion: bool,
    pub exposure: f32,
    pub presented: bool,
    /// Labels of passes that did not run.
    pub skipped: Vec<&'static str>,
}

/// Cloneable handle for posting window size changes from any thread. The
/// latest request is applied at the start of the next frame.
#[derive(Debug, Clone, Default)]
pub struct ResizeHandle(Arc<Mutex<Option<(u32, u32)>>>);

impl ResizeHandle {
    pub fn request(&self, width: u32, height: u32) {
        *self.0.lock() = Some((width, height));
    }

    fn take(&self) -> Option<(u32, u32)> {
        self.0.lock().take()
    }
}

/// Single-sampled targets [`Renderer::capture`] can read back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    Depth,
    Shadow,
    Ssao,
    Screen,
}

/// Texels of a captured target, decoded to `f32`.
#[derive(Debug, Clone, PartialEq)]
pub struct Capture {
    pub width: u32,
    pub height: u32,
    pub channels: usize,
    pub data: Vec<f32>,
}

impl Capture {
    pub fn texel(&self, x: u32, y: u32) -> &[f32] {
        let start = (y as usize * self.width as usize + x as usize) * self.channels;
        &self.data[start..start + self.channels]
    }

    /// Largest value of `channel` over the whole target.
    pub fn max(&self, channel: usize) -> f32 {
        self.data
            .chunks_exact(self.channels)
            .map(|texel| texel[channel])
            .fold(f32::NEG_INFINITY, f32::max)
    }
}

enum Presenter {
    Surface {
        window: Arc<Window>,
        surface: wgpu::Surface<'static>,
        config: wgpu::SurfaceConfiguration,
    },
    Offscreen {
        _texture: wgpu::Texture,
        view: wgpu::TextureView,
    },
}

impl Presenter {
    fn offscreen(device: &wgpu::Device, width: u32, height: u32) -> Self {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("offscreen-output"),
            size: wgpu::Extent3d {
                width: width.max(1),
                height: height.max(1),
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: OFFSCREEN_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Presenter::Offscreen {
            _texture: texture,
            view,
        }
    }

    fn format(&self) -> wgpu::TextureFormat {
        match self {
            Presenter::Surface { config, .. } => config.format,
            Presenter::Offscreen { .. } => OFFSCREEN_FORMAT,
        }
    }
}

/// Deferred renderer with SSAO and cubemap point-light shadows.
pub struct Renderer {
    settings: PipelineSettings,
    device: wgpu::Device,
    queue: wgpu::Queue,
    presenter: Presenter,
    resources: ResourceManager<WgpuBackend>,
    extent: (u32, u32),
    requested_samples: SampleConfig,
    permutation: (u32, WorkgroupSize),
    bound_generation: u64,
    gbuffer_layout: wgpu::BindGroupLayout,
    gbuffer_group: Option<wgpu::BindGroup>,
    objects: ObjectUniforms,
    meshes: MeshCache,
    geometry: GeometryPass,
    ssao: SsaoPass,
    shadow: ShadowPass,
    composite: CompositePass,
    debug: DebugView,
    mips: MipChain,
    luminance: LuminanceReadback,
    present: PresentPass,
    resize: ResizeHandle,
    exposure: f32,
    disposed: bool,
}

impl Renderer {
    /// Initializes the renderer for a window. The surface follows the
    /// window's inner size.
    pub async fn new_windowed(window: Arc<Window>, settings: PipelineSettings) -> Result<Self> {
        let size = window.inner_size();
        if size.width == 0 || size.height == 0 {
            bail!("window has zero area");
        }
        let instance = create_instance();
        let surface = instance.create_surface(Arc::clone(&window))?;
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .context("failed to acquire GPU adapter")?;
        let (device, queue) = request_device(&adapter).await?;

        let caps = surface.get_capabilities(&adapter);
        let format = caps
            .formats
            .iter()
            .find(|format| format.is_srgb())
            .or_else(|| caps.formats.first())
            .copied()
            .context("surface reports no formats")?;
        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width: size.width,
            height: size.height,
            present_mode: caps
                .present_modes
                .iter()
                .copied()
                .find(|mode| {
                    matches!(mode, wgpu::PresentMode::Mailbox | wgpu::PresentMode::Immediate)
                })
                .unwrap_or(wgpu::PresentMode::Fifo),
            desired_maximum_frame_latency: 2,
            alpha_mode: caps.alpha_modes.first().copied().unwrap_or(wgpu::CompositeAlphaMode::Auto),
            view_formats: vec![],
        };
        surface.configure(&device, &config);
        let presenter = Presenter::Surface {
            window,
            surface,
            config,
        };
        Self::assemble(settings, adapter, device, queue, presenter, (size.width, size.height))
    }

    /// Initializes the renderer against an offscreen colour target.
    pub async fn new_headless(width: u32, height: u32, settings: PipelineSettings) -> Result<Self> {
        ensure!(width > 0 && height > 0, "headless target has zero area");
        let instance = create_instance();
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .context("failed to acquire GPU adapter")?;
        let (device, queue) = request_device(&adapter).await?;
        let presenter = Presenter::offscreen(&device, width, height);
        Self::assemble(settings, adapter, device, queue, presenter, (width, height))
    }

    fn assemble(
        settings: PipelineSettings,
        adapter: wgpu::Adapter,
        device: wgpu::Device,
        queue: wgpu::Queue,
        presenter: Presenter,
        extent: (u32, u32),
    ) -> Result<Self> {
        settings.validate().context("invalid pipeline settings")?;
        info!("rendering with {}", adapter.get_info().name);

        let backend = WgpuBackend::new(adapter, device.clone());
        let mut resources = ResourceManager::new(backend, settings.ssao.texture_scale);
        if !resources.allocate_shadow(settings.shadow.resolution) {
            warn!("shadow cube map unavailable, shadows disabled");
        }
        let requested_samples = settings.sample_config(RenderToggles::default().antialiasing);
        allocate_with_fallback(&mut resources, extent, requested_samples);
        let samples = resources.samples().count;
        let workgroup = resources.workgroup_size();

        let gbuffer_layout = common::gbuffer_layout(&device, samples);
        let objects = ObjectUniforms::new(&device);
        let geometry = GeometryPass::new(&device, objects.layout(), samples);
        let ssao = SsaoPass::new(
            &device,
            &queue,
            &settings.ssao,
            settings.seed,
            &gbuffer_layout,
            samples,
            workgroup,
        );
        let shadow = ShadowPass::new(
            &device,
            &settings.shadow,
            objects.layout(),
            &gbuffer_layout,
            samples,
            settings.max_lights,
        );
        let composite = CompositePass::new(&device, &gbuffer_layout, samples, settings.max_lights);
        let debug = DebugView::new(&device, &gbuffer_layout, samples, presenter.format());
        let mips = MipChain::new(&device);
        let luminance = LuminanceReadback::new(&device);
        let present = PresentPass::new(&device, presenter.format());

        let mut renderer = Self {
            settings,
            device,
            queue,
            presenter,
            resources,
            extent,
            requested_samples,
            permutation: (samples, workgroup),
            bound_generation: 0,
            gbuffer_layout,
            gbuffer_group: None,
            objects,
            meshes: MeshCache::default(),
            geometry,
            ssao,
            shadow,
            composite,
            debug,
            mips,
            luminance,
            present,
            resize: ResizeHandle::default(),
            exposure: DEFAULT_EXPOSURE,
            disposed: false,
        };
        renderer.bind_targets();
        Ok(renderer)
    }

    pub fn window_id(&self) -> Option<WindowId> {
        self.window().map(Window::id)
    }

    pub fn window(&self) -> Option<&Window> {
        match &self.presenter {
            Presenter::Surface { window, .. } => Some(window),
            Presenter::Offscreen { .. } => None,
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn kernel(&self) -> &SsaoKernel {
        self.ssao.kernel()
    }

    /// Changes the SSAO sample count and regenerates the kernel. The new
    /// kernel is used from the next frame.
    pub fn set_ssao_samples(&mut self, samples: u32) -> Result<(), ConfigError> {
        let ssao = SsaoSettings {
            samples,
            ..self.settings.ssao
        };
        ssao.validate()?;
        if ssao == self.settings.ssao {
            return Ok(());
        }
        self.ssao
            .reconfigure(&self.device, &self.queue, &ssao, self.settings.seed);
        self.settings.ssao = ssao;
        info!("ssao now takes {samples} sample(s)");
        Ok(())
    }

    pub fn sample_count(&self) -> u32 {
        self.resources.samples().count
    }

    pub fn extent(&self) -> (u32, u32) {
        self.resources.extent()
    }

    /// Average colour of the last frame whose readback completed.
    pub fn average_colour(&self) -> Option<glam::Vec3> {
        self.luminance.average()
    }

    pub fn exposure(&self) -> f32 {
        self.exposure
    }

    /// Queues a resize; the targets are reallocated when the next frame starts.
    pub fn on_screen_resized(&self, width: u32, height: u32) {
        self.resize.request(width, height);
    }

    pub fn resize_handle(&self) -> ResizeHandle {
        self.resize.clone()
    }

    /// Releases every GPU target. Further frames fail.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.gbuffer_group = None;
        self.meshes.clear();
        self.resources.release();
        self.disposed = true;
        info!("renderer disposed");
    }

    /// Renders one frame.
    pub fn render(&mut self, ctx: RenderContext<'_>) -> Result<FrameReport> {
        ensure!(!self.disposed, "renderer has been disposed");
        let RenderContext {
            delta,
            camera,
            scene,
            toggles,
        } = ctx;

        if let Err(err) = self.device.poll(wgpu::PollType::Poll) {
            warn!("device poll failed: {err}");
        }
        self.luminance.poll();
        if let Some(average) = self.luminance.average() {
            self.exposure = exposure_for(average);
        }

        self.prepare_targets(&toggles);
        let mut report = FrameReport {
            exposure: self.exposure,
            ..FrameReport::default()
        };
        let (width, height) = self.resources.extent();
        if self.resources.targets().is_none() || self.gbuffer_group.is_none() {
            report.skipped.push("frame");
            return Ok(report);
        }

        camera.update(width as f32 / height as f32, toggles.frustum_update);
        let mut frame = FrameUniforms {
            ambient: self.settings.ambient,
            ..FrameUniforms::default()
        };
        camera.apply_uniforms(&mut frame);
        scene.apply_uniforms(&mut frame);

        let frustum = if toggles.frustum_culling {
            camera.frustum().copied()
        } else {
            None
        };
        let mut uniforms: Vec<ObjectUniform> = Vec::new();
        let device = &self.device;
        let meshes = &mut self.meshes;
        let mut submit = |command: &DrawCommand| {
            if !meshes.ensure(device, scene, command.mesh) {
                return None;
            }
            uniforms.push(object_uniform(command));
            Some(ObjectDraw {
                mesh: command.mesh,
                slot: uniforms.len() - 1,
            })
        };

        let filled = if toggles.draw_geometry {
            let mut list = DrawList::new(ShaderTarget::Geometry, frustum);
            scene.render(delta, &mut list);
            report.culled = list.culled();
            Some(list.commands().iter().filter_map(&mut submit).collect::<Vec<_>>())
        } else {
            None
        };
        let wireframe = if toggles.draw_wireframe && self.geometry.supports_wireframe() {
            let mut list = DrawList::new(ShaderTarget::Wireframe, frustum);
            scene.render(delta, &mut list);
            Some(list.commands().iter().filter_map(&mut submit).collect::<Vec<_>>())
        } else {
            None
        };
        let shadows_ready =
            toggles.shadow_mapping && self.resources.is_complete(FramebufferId::ShadowCube);
        let casters = if shadows_ready {
            plan_shadows(
                scene,
                &self.settings.shadow,
                self.settings.max_lights,
                delta,
                toggles.frustum_culling,
                &mut submit,
            )?
        } else {
            Vec::new()
        };
        self.objects.upload(&self.device, &self.queue, &uniforms);

        let output = match self.acquire_output()? {
            Acquired::Ready(output) => output,
            Acquired::Skipped(reason) => {
                report.skipped.push(reason);
                return Ok(report);
            }
        };

        let (Some(targets), Some(gbuffer_group)) =
            (self.resources.targets(), self.gbuffer_group.as_ref())
        else {
            return Ok(report);
        };
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("frame-encoder"),
            });

        if self.resources.is_complete(FramebufferId::GBuffer) {
            self.geometry.update(&self.queue, camera);
            let issued = self.geometry.encode(
                &mut encoder,
                &targets.gbuffer,
                &self.meshes,
                &self.objects,
                filled.as_deref(),
                wireframe.as_deref(),
            );
            report.wireframe_draws = wireframe.as_ref().map_or(0, Vec::len);
            report.draws = issued.saturating_sub(report.wireframe_draws);
        } else {
            report.skipped.push("geometry");
        }

        if toggles.ambient_occlusion && self.resources.is_complete(FramebufferId::Ssao) {
            self.ssao
                .update(&self.queue, camera, (width, height), self.resources.ssao_scale());
            report.ambient_occlusion = self.ssao.encode(&mut encoder, gbuffer_group, targets);
        }
        if !report.ambient_occlusion {
            report.skipped.push("ssao");
        }

        let mut shadow_mapping = false;
        match self.resources.shadow_targets() {
            Some(shadow) if self.resources.is_complete(FramebufferId::Shadow) => {
                self.shadow
                    .prepare(&self.device, &self.queue, &casters, camera, (width, height), shadow);
                report.shadow_lights = self.shadow.encode(
                    &mut encoder,
                    gbuffer_group,
                    targets,
                    shadow,
                    &self.meshes,
                    &self.objects,
                    &casters,
                );
                report.shadow_draws = casters.iter().map(|caster| caster.draw_count()).sum();
                shadow_mapping = toggles.shadow_mapping && report.shadow_lights > 0;
            }
            _ => report.skipped.push("shadow"),
        }

        let screen_ready = self.resources.is_complete(FramebufferId::Screen);
        let mut composited = false;
        if screen_ready {
            self.composite.update(
                &self.queue,
                camera,
                &frame,
                &pack_lights(scene.lights(), self.settings.max_lights),
                (width, height),
                self.resources.ssao_scale(),
                self.resources.samples().count,
                report.ambient_occlusion,
                shadow_mapping,
            );
            composited = self.composite.encode(&mut encoder, gbuffer_group, targets);
        }
        if composited {
            if self.mips.encode(&mut encoder, &targets.screen.texture) {
                self.luminance
                    .record(&mut encoder, &targets.screen.texture, targets.screen.desc.mip_levels);
            }
        } else {
            report.skipped.push("composite");
        }

        let view = &output.view;
        if toggles.show_buffers {
            self.debug.update(
                &self.queue,
                camera.near(),
                self.settings.shadow.far,
                report.ambient_occlusion,
            );
            report.presented =
                self.debug
                    .encode(&mut encoder, gbuffer_group, view, (width, height), &toggles);
        } else if composited {
            self.present.update(&self.queue, self.exposure, toggles.tone_adjust);
            report.presented = self.present.encode(&mut encoder, view);
        }
        if !report.presented {
            report.skipped.push("present");
        }

        self.queue.submit(std::iter::once(encoder.finish()));
        self.luminance.map();
        output.present();
        Ok(report)
    }

    /// Blocking readback of a single-sampled target.
    pub fn capture(&self, kind: TargetKind) -> Result<Capture> {
        let targets = self.resources.targets().context("no render targets allocated")?;
        let (target, aspect, channels): (&Target<GpuTexture>, _, usize) = match kind {
            TargetKind::Depth => (&targets.gbuffer.depth, wgpu::TextureAspect::DepthOnly, 1),
            TargetKind::Shadow => (&targets.shadow, wgpu::TextureAspect::All, 4),
            TargetKind::Ssao if self.ssao.blurs() => (&targets.ssao, wgpu::TextureAspect::All, 1),
            TargetKind::Ssao => (&targets.ssao_raw, wgpu::TextureAspect::All, 1),
            TargetKind::Screen => (&targets.screen, wgpu::TextureAspect::All, 4),
        };
        ensure!(
            !target.desc.samples.is_multisampled(),
            "{kind:?} target is multisampled and cannot be read back"
        );
        let (width, height) = target.desc.extent();
        let bytes = read_texture(
            &self.device,
            &self.queue,
            &target.texture.texture,
            aspect,
            (width, height),
            target.desc.format.bytes_per_texel(),
        )?;
        let data = match target.desc.format {
            TargetFormat::Rgba16Float => bytes
                .chunks_exact(2)
                .map(|pair| half::f16::from_le_bytes([pair[0], pair[1]]).to_f32())
                .collect(),
            _ => bytes
                .chunks_exact(4)
                .map(|quad| f32::from_le_bytes([quad[0], quad[1], quad[2], quad[3]]))
                .collect(),
        };
        Ok(Capture {
            width,
            height,
            channels,
            data,
        })
    }

    fn prepare_targets(&mut self, toggles: &RenderToggles) {
        if let Some((width, height)) = self.resize.take() {
            self.apply_resize(width, height);
        }
        let wanted = self.settings.sample_config(toggles.antialiasing);
        if self.resources.targets().is_none()
            || self.resources.extent() != self.extent
            || wanted != self.requested_samples
        {
            let allocation = allocate_with_fallback(&mut self.resources, self.extent, wanted);
            if let Allocation::Allocated { .. } = allocation {
                self.requested_samples = wanted;
            }
        }

        let permutation = (self.resources.samples().count, self.resources.workgroup_size());
        if permutation != self.permutation {
            self.rebuild_pipelines(permutation);
        }
        if self.resources.generation() != self.bound_generation {
            self.bind_targets();
        }
    }

    fn apply_resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            debug!("ignoring resize to {width}x{height}");
            return;
        }
        self.extent = (width, height);
        match &mut self.presenter {
            Presenter::Surface { surface, config, .. } => {
                config.width = width;
                config.height = height;
                surface.configure(&self.device, config);
            }
            offscreen @ Presenter::Offscreen { .. } => {
                *offscreen = Presenter::offscreen(&self.device, width, height);
            }
        }
    }

    fn rebuild_pipelines(&mut self, permutation: (u32, WorkgroupSize)) {
        let (samples, workgroup) = permutation;
        debug!(
            "rebuilding pipelines for {samples} sample(s), workgroup {}x{}",
            workgroup.x, workgroup.y
        );
        if samples != self.permutation.0 {
            self.gbuffer_layout = common::gbuffer_layout(&self.device, samples);
            self.geometry.rebuild(&self.device, self.objects.layout(), samples);
            self.shadow.rebuild(&self.device, &self.gbuffer_layout, samples);
            self.composite.rebuild(&self.device, &self.gbuffer_layout, samples);
            self.debug.rebuild(&self.device, &self.gbuffer_layout, samples);
        }
        self.ssao.rebuild(&self.device, &self.gbuffer_layout, samples, workgroup);
        self.permutation = permutation;
        self.bind_targets();
    }

    fn bind_targets(&mut self) {
        self.bound_generation = self.resources.generation();
        let Some(targets) = self.resources.targets() else {
            self.gbuffer_group = None;
            return;
        };
        let gbuffer = &targets.gbuffer;
        fn view(target: &Target<GpuTexture>) -> wgpu::BindingResource<'_> {
            wgpu::BindingResource::TextureView(&target.texture.view)
        }
        self.gbuffer_group = Some(self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("gbuffer-group"),
            layout: &self.gbuffer_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: bindings::DIFFUSE,
                    resource: view(&gbuffer.diffuse),
                },
                wgpu::BindGroupEntry {
                    binding: bindings::NORMAL,
                    resource: view(&gbuffer.normal),
                },
                wgpu::BindGroupEntry {
                    binding: bindings::SPECULAR,
                    resource: view(&gbuffer.specular),
                },
                wgpu::BindGroupEntry {
                    binding: bindings::DEPTH,
                    resource: view(&gbuffer.depth),
                },
            ],
        }));
        self.ssao.bind_targets(&self.device, targets);
        if let Some(shadow) = self.resources.shadow_targets() {
            self.shadow.bind_targets(&self.device, shadow);
        }
        let ssao = self.ssao.output(targets);
        self.composite.bind_targets(&self.device, targets, ssao);
        self.debug
            .bind_targets(&self.device, targets, ssao, self.resources.shadow_targets());
        self.mips.bind_targets(&self.device, &targets.screen.texture);
        self.present.bind_targets(&self.device, targets);
    }

    fn acquire_output(&self) -> Result<Acquired> {
        let (surface, config) = match &self.presenter {
            Presenter::Offscreen { view, .. } => {
                return Ok(Acquired::Ready(Output {
                    texture: None,
                    view: view.clone(),
                }))
            }
            Presenter::Surface { surface, config, .. } => (surface, config),
        };
        match surface.get_current_texture() {
            Ok(texture) => {
                let view = texture.texture.create_view(&wgpu::TextureViewDescriptor::default());
                Ok(Acquired::Ready(Output {
                    texture: Some(texture),
                    view,
                }))
            }
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                debug!("surface lost or outdated, reconfiguring");
                surface.configure(&self.device, config);
                Ok(Acquired::Skipped("surface-reconfigured"))
            }
            Err(wgpu::SurfaceError::Timeout) => {
                warn!("surface timed out, skipping frame");
                Ok(Acquired::Skipped("surface-timeout"))
            }
            Err(wgpu::SurfaceError::OutOfMemory) => Err(anyhow!("surface out of memory")),
            Err(err) => {
                warn!("surface error: {err}");
                Ok(Acquired::Skipped("surface-error"))
            }
        }
    }
}

enum Acquired {
    Ready(Output),
    Skipped(&'static str),
}

struct Output {
    texture: Option<wgpu::SurfaceTexture>,
    view: wgpu::TextureView,
}

impl Output {
    fn present(self) {
        if let Some(texture) = self.texture {
            texture.present();
        }
    }
}

fn create_instance() -> wgpu::Instance {
    wgpu::Instance::new(&wgpu::InstanceDescriptor {
        backends: wgpu::Backends::PRIMARY,
        flags: wgpu::InstanceFlags::default(),
        memory_budget_thresholds: Default::default(),
        backend_options: Default::default(),
    })
}

async fn request_device(adapter: &wgpu::Adapter) -> Result<(wgpu::Device, wgpu::Queue)> {
    let optional = wgpu::Features::TEXTURE_ADAPTER_SPECIFIC_FORMAT_FEATURES
        | wgpu::Features::POLYGON_MODE_LINE;
    let descriptor = wgpu::DeviceDescriptor {
        label: Some("renderer-device"),
        required_features: adapter.features() & optional,
        required_limits: adapter.limits(),
        experimental_features: Default::default(),
        memory_hints: Default::default(),
        trace: Default::default(),
    };
    adapter
        .request_device(&descriptor)
        .await
        .context("failed to create GPU device")
}

/// Allocates the window targets, dropping to one sample when the
/// multisampled G-buffer cannot be rendered into.
fn allocate_with_fallback(
    resources: &mut ResourceManager<WgpuBackend>,
    (width, height): (u32, u32),
    samples: SampleConfig,
) -> Allocation {
    let allocation = resources.allocate(width, height, samples);
    if matches!(allocation, Allocation::Allocated { .. })
        && samples.is_multisampled()
        && !resources.is_complete(FramebufferId::GBuffer)
    {
        warn!(
            "{}x multisampled G-buffer unsupported, falling back to single sampling",
            samples.count
        );
        return resources.allocate(width, height, SampleConfig::new(1, samples.fixed_locations));
    }
    allocation
}

/// Copies one mip-0 image into a mappable buffer and waits for it, stripping
/// the row padding the copy requires.
fn read_texture(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    texture: &wgpu::Texture,
    aspect: wgpu::TextureAspect,
    (width, height): (u32, u32),
    bytes_per_texel: u32,
) -> Result<Vec<u8>> {
    let unpadded = width * bytes_per_texel;
    let padded =
        common::align_to(unpadded as u64, wgpu::COPY_BYTES_PER_ROW_ALIGNMENT as u64) as u32;
    let buffer = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("capture-staging"),
        size: padded as u64 * height as u64,
        usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
        mapped_at_creation: false,
    });
    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("capture-encoder"),
    });
    encoder.copy_texture_to_buffer(
        wgpu::TexelCopyTextureInfo {
            texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect,
        },
        wgpu::TexelCopyBufferInfo {
            buffer: &buffer,
            layout: wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(padded),
                rows_per_image: Some(height),
            },
        },
        wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
    );
    queue.submit(std::iter::once(encoder.finish()));

    let slice = buffer.slice(..);
    let (sender, receiver) = mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        if sender.send(result).is_err() {
            debug!("capture receiver dropped before the map completed");
        }
    });
    device
        .poll(wgpu::PollType::wait_indefinitely())
        .context("device poll failed during capture")?;
    receiver
        .recv()
        .map_err(|_| anyhow!("capture map callback dropped"))?
        .context("failed to map capture buffer")?;

    let mut pixels = Vec::with_capacity((unpadded * height) as usize);
    {
        let data = slice.get_mapped_range();
        for row in data.chunks_exact(padded as usize) {
            pixels.extend_from_slice(&row[..unpadded as usize]);
        }
    }
    buffer.unmap();
    Ok(pixels)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resize_handle_keeps_latest_request() {
        let handle = ResizeHandle::default();
        let other = handle.clone();
        handle.request(800, 600);
        other.request(1024, 768);
        assert_eq!(handle.take(), Some((1024, 768)));
        assert_eq!(other.take(), None);
    }

    #[test]
    fn capture_indexes_texels_row_major() {
        let capture = Capture {
            width: 2,
            height: 2,
            channels: 2,
            data: vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0],
        };
        assert_eq!(capture.texel(1, 0), &[2.0, 3.0]);
        assert_eq!(capture.texel(0, 1), &[4.0, 5.0]);
        assert_eq!(capture.max(1), 7.0);
    }
}
