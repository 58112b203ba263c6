//! Omnidirectional shadows.
//!
//! Every active light within the light cap renders linear light distance into
//! the six layers of a cube map, then a screen pass compares each visible
//! pixel against it. Results accumulate in the shadow buffer: `r` holds the
//! occluded share of the total caster intensity and `g` the number of lights
//! that are blocked.

use std::f32::consts::PI;

use glam::{Mat3, Mat4, Quat, Vec3, Vec4};
use log::{debug, warn};

use crate::camera::Camera;
use crate::config::ShadowSettings;
use crate::error::ConfigError;
use crate::light::{shadow_weights, PointLight};
use crate::render::backend::GpuTexture;
use crate::render::common::{self, DynamicUniforms, FaceUniform, ShadowScreenUniform};
use crate::render::geometry::{self, MeshCache, ObjectDraw, ObjectUniforms};
use crate::render::resources::{
    RenderTargets, ShadowTargets, DEPTH_FORMAT, SHADOW_BUFFER_FORMAT, SHADOW_DISTANCE_FORMAT,
};
use crate::render::shaders;
use crate::scene::{DrawCommand, DrawList, SceneView, ShaderTarget};

pub const FACE_COUNT: usize = 6;

/// Rows of each face basis before the half turn about Y, in cube layer
/// order `+X, -X, +Y, -Y, +Z, -Z`.
const FACE_AXES: [[Vec3; 3]; FACE_COUNT] = [
    [Vec3::new(0.0, 0.0, 1.0), Vec3::new(0.0, -1.0, 0.0), Vec3::new(1.0, 0.0, 0.0)],
    [Vec3::new(0.0, 0.0, -1.0), Vec3::new(0.0, -1.0, 0.0), Vec3::new(-1.0, 0.0, 0.0)],
    [Vec3::new(-1.0, 0.0, 0.0), Vec3::new(0.0, 0.0, -1.0), Vec3::new(0.0, -1.0, 0.0)],
    [Vec3::new(-1.0, 0.0, 0.0), Vec3::new(0.0, 0.0, 1.0), Vec3::new(0.0, 1.0, 0.0)],
    [Vec3::new(-1.0, 0.0, 0.0), Vec3::new(0.0, -1.0, 0.0), Vec3::new(0.0, 0.0, 1.0)],
    [Vec3::new(1.0, 0.0, 0.0), Vec3::new(0.0, -1.0, 0.0), Vec3::new(0.0, 0.0, -1.0)],
];

/// Mirrors clip-space Y so rendered faces match cube map addressing.
const FLIP_Y: Mat4 = Mat4::from_cols(
    Vec4::new(1.0, 0.0, 0.0, 0.0),
    Vec4::new(0.0, -1.0, 0.0, 0.0),
    Vec4::new(0.0, 0.0, 1.0, 0.0),
    Vec4::new(0.0, 0.0, 0.0, 1.0),
);

/// World direction a face looks along.
pub fn face_direction(face: usize) -> Vec3 {
    match face % FACE_COUNT {
        0 => Vec3::X,
        1 => Vec3::NEG_X,
        2 => Vec3::Y,
        3 => Vec3::NEG_Y,
        4 => Vec3::Z,
        _ => Vec3::NEG_Z,
    }
}

/// World-to-view rotation of a cube face.
pub fn face_rotation(face: usize) -> Mat3 {
    let [r0, r1, r2] = FACE_AXES[face % FACE_COUNT];
    Mat3::from_cols(r0, r1, r2).transpose() * Mat3::from_rotation_y(PI)
}

/// Camera placed at a light with a 90° square frustum.
pub fn shadow_camera(position: Vec3, settings: &ShadowSettings) -> Result<Camera, ConfigError> {
    let mut camera = Camera::new(settings.near, settings.far, 90.0)?;
    camera.position = position;
    Ok(camera)
}

/// Points `camera` along `face` and refreshes its matrices and frustum.
pub fn orient_face(camera: &mut Camera, face: usize) {
    camera.rotation = Quat::from_mat3(&face_rotation(face)).normalize();
    camera.update(1.0, true);
}

/// View-projection used to render `face`, in wgpu clip space.
pub fn face_view_projection(camera: &Camera) -> Mat4 {
    FLIP_Y * camera.gpu_view_projection()
}

#[derive(Debug, Clone)]
pub struct ShadowFace {
    pub view_projection: Mat4,
    pub draws: Vec<ObjectDraw>,
}

/// A light that renders a cube map this frame.
#[derive(Debug, Clone)]
pub struct ShadowCaster {
    pub slot: usize,
    pub light: PointLight,
    /// Share of the summed caster intensity.
    pub weight: f32,
    pub faces: Vec<ShadowFace>,
}

impl ShadowCaster {
    pub fn draw_count(&self) -> usize {
        self.faces.iter().map(|face| face.draws.len()).sum()
    }
}

/// Collects the draws of every face of every caster. `submit` turns a draw
/// command into a queued object draw, or `None` when it cannot be drawn.
/// Each face is culled against its own frustum when `culling` is set.
pub fn plan_shadows(
    scene: &dyn SceneView,
    settings: &ShadowSettings,
    cap: usize,
    delta: f64,
    culling: bool,
    mut submit: impl FnMut(&DrawCommand) -> Option<ObjectDraw>,
) -> Result<Vec<ShadowCaster>, ConfigError> {
    let lights = scene.lights();
    let mut casters = Vec::new();
    for (slot, weight) in shadow_weights(lights, cap) {
        let light = lights[slot];
        let mut camera = shadow_camera(light.position, settings)?;
        let mut faces = Vec::with_capacity(FACE_COUNT);
        for face in 0..FACE_COUNT {
            orient_face(&mut camera, face);
            let frustum = if culling { camera.frustum().copied() } else { None };
            let mut list = DrawList::new(ShaderTarget::Geometry, frustum);
            scene.render_with(delta, ShaderTarget::ShadowDepth, &mut list);
            faces.push(ShadowFace {
                view_projection: face_view_projection(&camera),
                draws: list.commands().iter().filter_map(&mut submit).collect(),
            });
        }
        casters.push(ShadowCaster {
            slot,
            light,
            weight,
            faces,
        });
    }
    Ok(casters)
}

pub struct ShadowPass {
    settings: ShadowSettings,
    face_layout: wgpu::BindGroupLayout,
    face_uniforms: DynamicUniforms<FaceUniform>,
    face_group: wgpu::BindGroup,
    depth_pipeline: Option<wgpu::RenderPipeline>,
    screen_layout: wgpu::BindGroupLayout,
    screen_uniforms: DynamicUniforms<ShadowScreenUniform>,
    screen_group: Option<wgpu::BindGroup>,
    replace_pipeline: Option<wgpu::RenderPipeline>,
    additive_pipeline: Option<wgpu::RenderPipeline>,
    sampler: wgpu::Sampler,
}

impl ShadowPass {
    pub fn new(
        device: &wgpu::Device,
        settings: &ShadowSettings,
        object_layout: &wgpu::BindGroupLayout,
        gbuffer_layout: &wgpu::BindGroupLayout,
        samples: u32,
        max_lights: usize,
    ) -> Self {
        let face_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("shadow-face-layout"),
            entries: &[common::uniform_entry::<FaceUniform>(
                0,
                wgpu::ShaderStages::VERTEX_FRAGMENT,
                true,
            )],
        });
        let face_uniforms =
            DynamicUniforms::new(device, "shadow-face-uniforms", max_lights.max(1) * FACE_COUNT);
        let face_group = Self::bind_faces(device, &face_layout, &face_uniforms);

        let depth_pipeline = common::checked(device, "shadow depth pipeline", || {
            let module = common::shader_module(
                device,
                "shadow-depth-shader",
                shaders::SHADOW_DEPTH.to_string(),
            );
            let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("shadow-depth-pipeline-layout"),
                bind_group_layouts: &[&face_layout, object_layout],
                push_constant_ranges: &[],
            });
            device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some("shadow-depth-pipeline"),
                layout: Some(&layout),
                vertex: wgpu::VertexState {
                    module: &module,
                    entry_point: Some("vs_shadow"),
                    compilation_options: Default::default(),
                    buffers: &[geometry::vertex_layout()],
                },
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleList,
                    cull_mode: None,
                    ..Default::default()
                },
                depth_stencil: Some(wgpu::DepthStencilState {
                    format: DEPTH_FORMAT.wgpu(),
                    depth_write_enabled: true,
                    depth_compare: wgpu::CompareFunction::Less,
                    stencil: Default::default(),
                    bias: Default::default(),
                }),
                multisample: wgpu::MultisampleState::default(),
                fragment: Some(wgpu::FragmentState {
                    module: &module,
                    entry_point: Some("fs_shadow"),
                    compilation_options: Default::default(),
                    targets: &[Some(wgpu::ColorTargetState {
                        format: SHADOW_DISTANCE_FORMAT.wgpu(),
                        blend: None,
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                }),
                multiview: None,
                cache: None,
            })
        });

        let screen_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("shadow-screen-layout"),
            entries: &[
                common::uniform_entry::<ShadowScreenUniform>(0, wgpu::ShaderStages::FRAGMENT, true),
                common::texture_entry(1, wgpu::TextureViewDimension::Cube, false),
                common::sampler_entry(2, false),
            ],
        });
        let screen_uniforms =
            DynamicUniforms::new(device, "shadow-screen-uniforms", max_lights.max(1));
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("shadow-cube-sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Nearest,
            min_filter: wgpu::FilterMode::Nearest,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        let mut pass = Self {
            settings: *settings,
            face_layout,
            face_uniforms,
            face_group,
            depth_pipeline,
            screen_layout,
            screen_uniforms,
            screen_group: None,
            replace_pipeline: None,
            additive_pipeline: None,
            sampler,
        };
        pass.rebuild(device, gbuffer_layout, samples);
        pass
    }

    fn bind_faces(
        device: &wgpu::Device,
        layout: &wgpu::BindGroupLayout,
        uniforms: &DynamicUniforms<FaceUniform>,
    ) -> wgpu::BindGroup {
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("shadow-face-group"),
            layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: uniforms.binding(),
            }],
        })
    }

    /// Recreates the screen pipelines for a new G-buffer sample count.
    pub fn rebuild(
        &mut self,
        device: &wgpu::Device,
        gbuffer_layout: &wgpu::BindGroupLayout,
        samples: u32,
    ) {
        let build = |label: &str, blend: Option<wgpu::BlendState>| {
            common::checked(device, label, || {
                let module = common::shader_module(
                    device,
                    "shadow-screen-shader",
                    shaders::shadow_screen(samples),
                );
                common::fullscreen_pipeline(
                    device,
                    label,
                    &module,
                    "fs_shadow_screen",
                    &[gbuffer_layout, &self.screen_layout],
                    SHADOW_BUFFER_FORMAT.wgpu(),
                    blend,
                )
            })
        };
        let replace = build("shadow-screen-pipeline", None);
        let additive = build("shadow-screen-additive-pipeline", Some(common::ADDITIVE));
        self.replace_pipeline = replace;
        self.additive_pipeline = additive;
    }

    /// Points the screen pass at a newly allocated cube map.
    pub fn bind_targets(&mut self, device: &wgpu::Device, shadow: &ShadowTargets<GpuTexture>) {
        self.screen_group = Some(device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("shadow-screen-group"),
            layout: &self.screen_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: self.screen_uniforms.binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(&shadow.distance.texture.view),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
            ],
        }));
    }

    /// Uploads face and screen uniforms for the planned casters.
    pub fn prepare(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        casters: &[ShadowCaster],
        camera: &Camera,
        extent: (u32, u32),
        shadow: &ShadowTargets<GpuTexture>,
    ) {
        let far = self.settings.far;
        let faces: Vec<FaceUniform> = casters
            .iter()
            .flat_map(|caster| {
                caster.faces.iter().map(move |face| FaceUniform {
                    view_projection: face.view_projection.to_cols_array_2d(),
                    light: caster.light.position.extend(far).into(),
                })
            })
            .collect();
        if self.face_uniforms.reserve(device, faces.len()) {
            self.face_group = Self::bind_faces(device, &self.face_layout, &self.face_uniforms);
        }
        self.face_uniforms.write(queue, &faces);

        let inv_view_projection = camera.gpu_view_projection().inverse().to_cols_array_2d();
        let screens: Vec<ShadowScreenUniform> = casters
            .iter()
            .map(|caster| ShadowScreenUniform {
                inv_view_projection,
                light: caster.light.to_gpu(),
                screen_resolution: [extent.0 as f32, extent.1 as f32],
                near_plane: self.settings.near,
                far_plane: self.settings.far,
                bias: self.settings.bias,
                weight: caster.weight,
                _pad: [0.0; 2],
            })
            .collect();
        if self.screen_uniforms.reserve(device, screens.len()) || self.screen_group.is_none() {
            self.bind_targets(device, shadow);
        }
        self.screen_uniforms.write(queue, &screens);
    }

    /// Renders every caster's cube map followed by its screen pass. The
    /// shadow buffer is cleared even when nothing casts. Returns the number
    /// of lights accumulated.
    #[allow(clippy::too_many_arguments)]
    pub fn encode(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        gbuffer_group: &wgpu::BindGroup,
        targets: &RenderTargets<GpuTexture>,
        shadow: &ShadowTargets<GpuTexture>,
        meshes: &MeshCache,
        objects: &ObjectUniforms,
        casters: &[ShadowCaster],
    ) -> usize {
        let pipelines = (
            &self.depth_pipeline,
            &self.replace_pipeline,
            &self.additive_pipeline,
            &self.screen_group,
        );
        let (Some(depth), Some(replace), Some(additive), Some(screen_group)) = pipelines else {
            if !casters.is_empty() {
                warn!("shadow pipelines unavailable, skipping {} caster(s)", casters.len());
            }
            clear(encoder, &targets.shadow.texture.view);
            return 0;
        };
        if casters.is_empty() {
            clear(encoder, &targets.shadow.texture.view);
            return 0;
        }

        let far = f64::from(self.settings.far);
        for (index, caster) in casters.iter().enumerate() {
            for (face, planned) in caster.faces.iter().enumerate() {
                let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                    label: Some("shadow-face-pass"),
                    color_attachments: &[geometry::colour_attachment(
                        shadow.distance.texture.attachment(face),
                        wgpu::LoadOp::Clear(wgpu::Color {
                            r: far,
                            g: 0.0,
                            b: 0.0,
                            a: 1.0,
                        }),
                    )],
                    depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                        view: &shadow.depth.texture.view,
                        depth_ops: Some(wgpu::Operations {
                            load: wgpu::LoadOp::Clear(1.0),
                            store: wgpu::StoreOp::Discard,
                        }),
                        stencil_ops: None,
                    }),
                    timestamp_writes: None,
                    occlusion_query_set: None,
                });
                pass.set_pipeline(depth);
                pass.set_bind_group(
                    0,
                    &self.face_group,
                    &[self.face_uniforms.offset(index * FACE_COUNT + face)],
                );
                for draw in &planned.draws {
                    let Some(mesh) = meshes.get(draw.mesh) else {
                        continue;
                    };
                    pass.set_bind_group(1, objects.group(), &[objects.offset(draw.slot)]);
                    mesh.draw(&mut pass);
                }
            }

            let first = index == 0;
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("shadow-screen-pass"),
                color_attachments: &[geometry::colour_attachment(
                    &targets.shadow.texture.view,
                    if first {
                        wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT)
                    } else {
                        wgpu::LoadOp::Load
                    },
                )],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_pipeline(if first { replace } else { additive });
            pass.set_bind_group(0, gbuffer_group, &[]);
            pass.set_bind_group(1, screen_group, &[self.screen_uniforms.offset(index)]);
            pass.draw(0..3, 0..1);
        }
        debug!("accumulated shadows of {} light(s)", casters.len());
        casters.len()
    }
}

fn clear(encoder: &mut wgpu::CommandEncoder, view: &wgpu::TextureView) {
    encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
        label: Some("shadow-clear"),
        color_attachments: &[geometry::colour_attachment(
            view,
            wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
        )],
        depth_stencil_attachment: None,
        timestamp_writes: None,
        occlusion_query_set: None,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::{MeshData, MeshId};
    use crate::scene::{Material, SceneGraph};

    const EPS: f32 = 1e-5;

    #[test]
    fn face_bases_are_orthonormal() {
        for face in 0..FACE_COUNT {
            let rotation = face_rotation(face);
            let product = rotation * rotation.transpose();
            assert!(product.abs_diff_eq(Mat3::IDENTITY, EPS), "face {face}");
            assert!((rotation.determinant() - 1.0).abs() < EPS, "face {face}");
        }
    }

    #[test]
    fn face_bases_map_axes_to_axes() {
        for face in 0..FACE_COUNT {
            let rotation = face_rotation(face);
            for axis in [Vec3::X, Vec3::Y, Vec3::Z] {
                let mapped = rotation * axis;
                let largest = mapped.abs().max_element();
                assert!((largest - 1.0).abs() < EPS, "face {face} maps {axis} to {mapped}");
                assert!((mapped.abs().element_sum() - 1.0).abs() < EPS);
            }
        }
    }

    #[test]
    fn faces_look_along_cube_directions() {
        for face in 0..FACE_COUNT {
            let forward = face_rotation(face).transpose() * Vec3::NEG_Z;
            assert!(
                forward.abs_diff_eq(face_direction(face), EPS),
                "face {face} looks along {forward}"
            );
        }
    }

    #[test]
    fn point_along_face_projects_to_face_centre() {
        let settings = ShadowSettings::default();
        let light = Vec3::new(0.0, 5.0, 0.0);
        let mut camera = shadow_camera(light, &settings).unwrap();
        for face in 0..FACE_COUNT {
            orient_face(&mut camera, face);
            let target = light + face_direction(face) * 3.0;
            let ndc = face_view_projection(&camera).project_point3(target);
            assert!(ndc.x.abs() < 1e-4 && ndc.y.abs() < 1e-4, "face {face}: {ndc}");
            assert!(ndc.z > 0.0 && ndc.z < 1.0);
        }
    }

    #[test]
    fn y_flip_keeps_cube_addressing() {
        let settings = ShadowSettings::default();
        let mut camera = shadow_camera(Vec3::ZERO, &settings).unwrap();
        orient_face(&mut camera, 4);
        // +Z face: world +Y addresses the top rows of the layer.
        let ndc = face_view_projection(&camera).project_point3(Vec3::new(0.0, 1.0, 3.0));
        assert!(ndc.y > 0.0);
        // +X face: world -Z lies to the right.
        orient_face(&mut camera, 0);
        let ndc = face_view_projection(&camera).project_point3(Vec3::new(3.0, 1.0, -1.0));
        assert!(ndc.x > 0.0 && ndc.y > 0.0);
    }

    fn lit_cube(intensity: f32) -> SceneGraph {
        let mut scene = SceneGraph::new();
        let cube = scene.add_mesh(MeshData::cube());
        let node = scene.add_node("Cube", None);
        scene.set_mesh(node, cube, Material::default());
        scene.add_light(PointLight::new(Vec3::new(0.0, 5.0, 0.0), Vec3::ONE, intensity));
        scene
    }

    fn submit_all(command: &DrawCommand) -> Option<ObjectDraw> {
        Some(ObjectDraw {
            mesh: command.mesh,
            slot: 0,
        })
    }

    #[test]
    fn light_above_cube_only_sees_it_from_the_downward_face() {
        let scene = lit_cube(1.5);
        let settings = ShadowSettings::default();
        let casters = plan_shadows(&scene, &settings, 16, 0.0, true, submit_all).unwrap();
        assert_eq!(casters.len(), 1);
        let caster = &casters[0];
        assert_eq!(caster.faces.len(), FACE_COUNT);
        assert_eq!(caster.faces[3].draws.len(), 1);
        assert!(caster.faces[2].draws.is_empty());
        assert!((caster.weight - 1.0).abs() < EPS);
    }

    #[test]
    fn culling_off_draws_every_face() {
        let scene = lit_cube(1.5);
        let settings = ShadowSettings::default();
        let casters = plan_shadows(&scene, &settings, 16, 0.0, false, submit_all).unwrap();
        assert_eq!(casters[0].draw_count(), FACE_COUNT);
    }

    #[test]
    fn dark_lights_plan_nothing() {
        let scene = lit_cube(0.0);
        let settings = ShadowSettings::default();
        let casters = plan_shadows(&scene, &settings, 16, 0.0, true, submit_all).unwrap();
        assert!(casters.is_empty());
    }

    #[test]
    fn undrawable_commands_are_dropped() {
        let scene = lit_cube(1.0);
        let casters = plan_shadows(&scene, &ShadowSettings::default(), 16, 0.0, false, |command| {
            (command.mesh != MeshId(0)).then_some(ObjectDraw {
                mesh: command.mesh,
                slot: 0,
            })
        })
        .unwrap();
        assert_eq!(casters[0].draw_count(), 0);
    }
}
