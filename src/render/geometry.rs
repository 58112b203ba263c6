use std::collections::{HashMap, HashSet};

use glam::{Mat3, Vec4};
use log::{error, warn};
use wgpu::util::DeviceExt;

use crate::camera::Camera;
use crate::mesh::{MeshData, MeshId, Vertex};
use crate::render::backend::GpuTexture;
use crate::render::common::{self, DynamicUniforms, FrameUniform, ObjectUniform};
use crate::render::resources::{
    GBuffer, DEPTH_FORMAT, DIFFUSE_FORMAT, NORMAL_FORMAT, SPECULAR_FORMAT,
};
use crate::render::shaders;
use crate::scene::{DrawCommand, SceneView};

/// Colour the diffuse target is cleared to; compositing passes it through
/// for background pixels.
pub const CLEAR_COLOUR: wgpu::Color = wgpu::Color {
    r: 0.03,
    g: 0.03,
    b: 0.05,
    a: 1.0,
};

pub struct MeshBuffers {
    vertex: wgpu::Buffer,
    index: wgpu::Buffer,
    index_count: u32,
}

impl MeshBuffers {
    fn from_mesh(device: &wgpu::Device, mesh: &MeshData, label: &str) -> Self {
        let vertex = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(&format!("{label}-vertices")),
            contents: bytemuck::cast_slice(&mesh.vertices),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let index = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(&format!("{label}-indices")),
            contents: bytemuck::cast_slice(&mesh.indices),
            usage: wgpu::BufferUsages::INDEX,
        });
        Self {
            vertex,
            index,
            index_count: mesh.indices.len() as u32,
        }
    }

    pub fn draw(&self, pass: &mut wgpu::RenderPass<'_>) {
        pass.set_vertex_buffer(0, self.vertex.slice(..));
        pass.set_index_buffer(self.index.slice(..), wgpu::IndexFormat::Uint32);
        pass.draw_indexed(0..self.index_count, 0, 0..1);
    }
}

/// GPU copies of scene meshes, uploaded the first time a draw needs them.
#[derive(Default)]
pub struct MeshCache {
    meshes: HashMap<MeshId, MeshBuffers>,
    missing: HashSet<MeshId>,
}

impl MeshCache {
    /// Uploads `id` if it is not cached yet. Returns whether the mesh can be
    /// drawn; unknown or empty meshes are reported once.
    pub fn ensure(&mut self, device: &wgpu::Device, scene: &dyn SceneView, id: MeshId) -> bool {
        if self.meshes.contains_key(&id) {
            return true;
        }
        if self.missing.contains(&id) {
            return false;
        }
        match scene.mesh(id) {
            Some(mesh) if !mesh.indices.is_empty() => {
                let buffers = MeshBuffers::from_mesh(device, mesh, &format!("mesh-{}", id.0));
                self.meshes.insert(id, buffers);
                true
            }
            Some(_) => {
                warn!("mesh {} has no triangles, skipping", id.0);
                self.missing.insert(id);
                false
            }
            None => {
                error!("scene references unknown mesh {}", id.0);
                self.missing.insert(id);
                false
            }
        }
    }

    pub fn get(&self, id: MeshId) -> Option<&MeshBuffers> {
        self.meshes.get(&id)
    }

    pub fn len(&self) -> usize {
        self.meshes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.meshes.is_empty()
    }

    pub fn clear(&mut self) {
        self.meshes.clear();
        self.missing.clear();
    }
}

/// One queued draw: the mesh and the slot of its [`ObjectUniform`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectDraw {
    pub mesh: MeshId,
    pub slot: usize,
}

pub fn object_uniform(command: &DrawCommand) -> ObjectUniform {
    let normal = Mat3::from_mat4(command.model).inverse().transpose();
    let material = command.material;
    ObjectUniform {
        model: command.model.to_cols_array_2d(),
        normal: common::mat3_to_3x4(normal),
        diffuse: material.diffuse.into(),
        specular: Vec4::from((material.specular, material.shininess)).into(),
    }
}

/// Per-object uniforms of a frame, shared by the geometry and shadow passes.
pub struct ObjectUniforms {
    layout: wgpu::BindGroupLayout,
    uniforms: DynamicUniforms<ObjectUniform>,
    group: wgpu::BindGroup,
}

impl ObjectUniforms {
    pub fn new(device: &wgpu::Device) -> Self {
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("object-bind-layout"),
            entries: &[common::uniform_entry::<ObjectUniform>(
                0,
                wgpu::ShaderStages::VERTEX_FRAGMENT,
                true,
            )],
        });
        let uniforms = DynamicUniforms::new(device, "object-uniforms", 64);
        let group = Self::bind(device, &layout, &uniforms);
        Self {
            layout,
            uniforms,
            group,
        }
    }

    fn bind(
        device: &wgpu::Device,
        layout: &wgpu::BindGroupLayout,
        uniforms: &DynamicUniforms<ObjectUniform>,
    ) -> wgpu::BindGroup {
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("object-bind-group"),
            layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: uniforms.binding(),
            }],
        })
    }

    pub fn upload(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        objects: &[ObjectUniform],
    ) {
        if self.uniforms.reserve(device, objects.len()) {
            self.group = Self::bind(device, &self.layout, &self.uniforms);
        }
        self.uniforms.write(queue, objects);
    }

    pub fn layout(&self) -> &wgpu::BindGroupLayout {
        &self.layout
    }

    pub fn group(&self) -> &wgpu::BindGroup {
        &self.group
    }

    pub fn offset(&self, slot: usize) -> u32 {
        self.uniforms.offset(slot)
    }
}

pub fn vertex_layout() -> wgpu::VertexBufferLayout<'static> {
    const ATTRIBUTES: [wgpu::VertexAttribute; 2] =
        wgpu::vertex_attr_array![0 => Float32x3, 1 => Float32x3];
    wgpu::VertexBufferLayout {
        array_stride: std::mem::size_of::<Vertex>() as u64,
        step_mode: wgpu::VertexStepMode::Vertex,
        attributes: &ATTRIBUTES,
    }
}

/// Fills the G-buffer. Filled geometry and the wireframe overlay are two
/// independent sub-passes.
pub struct GeometryPass {
    frame_layout: wgpu::BindGroupLayout,
    frame_buffer: wgpu::Buffer,
    frame_group: wgpu::BindGroup,
    fill: Option<wgpu::RenderPipeline>,
    wireframe: Option<wgpu::RenderPipeline>,
    line_mode: bool,
}

impl GeometryPass {
    pub fn new(device: &wgpu::Device, object_layout: &wgpu::BindGroupLayout, samples: u32) -> Self {
        let frame_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("geometry-frame-layout"),
            entries: &[common::uniform_entry::<FrameUniform>(
                0,
                wgpu::ShaderStages::VERTEX_FRAGMENT,
                false,
            )],
        });
        let frame_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("geometry-frame-uniform"),
            size: std::mem::size_of::<FrameUniform>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let frame_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("geometry-frame-group"),
            layout: &frame_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: frame_buffer.as_entire_binding(),
            }],
        });
        let line_mode = device.features().contains(wgpu::Features::POLYGON_MODE_LINE);
        if !line_mode {
            warn!("device lacks POLYGON_MODE_LINE, wireframe overlay disabled");
        }
        let mut pass = Self {
            frame_layout,
            frame_buffer,
            frame_group,
            fill: None,
            wireframe: None,
            line_mode,
        };
        pass.rebuild(device, object_layout, samples);
        pass
    }

    /// Recreates both pipelines for a new G-buffer sample count.
    pub fn rebuild(
        &mut self,
        device: &wgpu::Device,
        object_layout: &wgpu::BindGroupLayout,
        samples: u32,
    ) {
        self.fill = common::checked(device, "geometry pipeline", || {
            self.pipeline(device, object_layout, samples, false)
        });
        self.wireframe = if self.line_mode {
            common::checked(device, "wireframe pipeline", || {
                self.pipeline(device, object_layout, samples, true)
            })
        } else {
            None
        };
    }

    fn pipeline(
        &self,
        device: &wgpu::Device,
        object_layout: &wgpu::BindGroupLayout,
        samples: u32,
        wireframe: bool,
    ) -> wgpu::RenderPipeline {
        let module =
            common::shader_module(device, "geometry-shader", shaders::GEOMETRY.to_string());
        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("geometry-pipeline-layout"),
            bind_group_layouts: &[&self.frame_layout, object_layout],
            push_constant_ranges: &[],
        });
        let target = |format: wgpu::TextureFormat| {
            Some(wgpu::ColorTargetState {
                format,
                blend: None,
                write_mask: wgpu::ColorWrites::ALL,
            })
        };
        let (label, entry, polygon_mode, bias) = if wireframe {
            (
                "wireframe-pipeline",
                "fs_wireframe",
                wgpu::PolygonMode::Line,
                wgpu::DepthBiasState {
                    constant: -2,
                    slope_scale: -1.0,
                    clamp: 0.0,
                },
            )
        } else {
            (
                "geometry-pipeline",
                "fs_geometry",
                wgpu::PolygonMode::Fill,
                wgpu::DepthBiasState::default(),
            )
        };
        device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(label),
            layout: Some(&layout),
            vertex: wgpu::VertexState {
                module: &module,
                entry_point: Some("vs_geometry"),
                compilation_options: Default::default(),
                buffers: &[vertex_layout()],
            },
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                front_face: wgpu::FrontFace::Ccw,
                cull_mode: None,
                polygon_mode,
                ..Default::default()
            },
            depth_stencil: Some(wgpu::DepthStencilState {
                format: DEPTH_FORMAT.wgpu(),
                depth_write_enabled: !wireframe,
                depth_compare: wgpu::CompareFunction::LessEqual,
                stencil: Default::default(),
                bias,
            }),
            multisample: wgpu::MultisampleState {
                count: samples.max(1),
                mask: !0,
                alpha_to_coverage_enabled: false,
            },
            fragment: Some(wgpu::FragmentState {
                module: &module,
                entry_point: Some(entry),
                compilation_options: Default::default(),
                targets: &[
                    target(DIFFUSE_FORMAT.wgpu()),
                    target(NORMAL_FORMAT.wgpu()),
                    target(SPECULAR_FORMAT.wgpu()),
                ],
            }),
            multiview: None,
            cache: None,
        })
    }

    pub fn supports_wireframe(&self) -> bool {
        self.wireframe.is_some()
    }

    pub fn update(&self, queue: &wgpu::Queue, camera: &Camera) {
        let uniform = FrameUniform {
            view_projection: camera.gpu_view_projection().to_cols_array_2d(),
            camera_position: camera.position.extend(1.0).into(),
        };
        queue.write_buffer(&self.frame_buffer, 0, bytemuck::bytes_of(&uniform));
    }

    /// Clears the G-buffer and draws the enabled sub-passes. `None` skips a
    /// sub-pass. Returns the number of draws issued.
    pub fn encode(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        gbuffer: &GBuffer<GpuTexture>,
        meshes: &MeshCache,
        objects: &ObjectUniforms,
        filled: Option<&[ObjectDraw]>,
        wireframe: Option<&[ObjectDraw]>,
    ) -> usize {
        let mut issued = 0;
        let sub_passes = [
            (filled, self.fill.as_ref(), "geometry-pass"),
            (wireframe, self.wireframe.as_ref(), "wireframe-pass"),
        ];
        let mut cleared = false;
        for (draws, pipeline, label) in sub_passes {
            let (Some(draws), Some(pipeline)) = (draws, pipeline) else {
                continue;
            };
            let mut pass = self.begin(encoder, gbuffer, label, !cleared);
            cleared = true;
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, &self.frame_group, &[]);
            for draw in draws {
                let Some(mesh) = meshes.get(draw.mesh) else {
                    continue;
                };
                pass.set_bind_group(1, objects.group(), &[objects.offset(draw.slot)]);
                mesh.draw(&mut pass);
                issued += 1;
            }
        }
        if !cleared {
            drop(self.begin(encoder, gbuffer, "geometry-clear", true));
        }
        issued
    }

    fn begin(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        gbuffer: &GBuffer<GpuTexture>,
        label: &str,
        clear: bool,
    ) -> wgpu::RenderPass<'static> {
        let load = |value: wgpu::Color| {
            if clear {
                wgpu::LoadOp::Clear(value)
            } else {
                wgpu::LoadOp::Load
            }
        };
        encoder
            .begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some(label),
                color_attachments: &[
                    colour_attachment(&gbuffer.diffuse.texture.view, load(CLEAR_COLOUR)),
                    colour_attachment(
                        &gbuffer.normal.texture.view,
                        load(wgpu::Color::TRANSPARENT),
                    ),
                    colour_attachment(
                        &gbuffer.specular.texture.view,
                        load(wgpu::Color::TRANSPARENT),
                    ),
                ],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &gbuffer.depth.texture.view,
                    depth_ops: Some(wgpu::Operations {
                        load: if clear {
                            wgpu::LoadOp::Clear(1.0)
                        } else {
                            wgpu::LoadOp::Load
                        },
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            })
            .forget_lifetime()
    }
}

pub fn colour_attachment(
    view: &wgpu::TextureView,
    load: wgpu::LoadOp<wgpu::Color>,
) -> Option<wgpu::RenderPassColorAttachment<'_>> {
    Some(wgpu::RenderPassColorAttachment {
        view,
        depth_slice: None,
        resolve_target: None,
        ops: wgpu::Operations {
            load,
            store: wgpu::StoreOp::Store,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::Material;
    use glam::{Mat4, Vec3};

    #[test]
    fn object_uniform_carries_material_and_normal_matrix() {
        let command = DrawCommand {
            mesh: MeshId(0),
            model: Mat4::from_scale(Vec3::new(2.0, 1.0, 1.0)),
            material: Material {
                diffuse: Vec4::new(1.0, 0.5, 0.25, 1.0),
                specular: Vec3::splat(0.3),
                shininess: 16.0,
            },
        };
        let uniform = object_uniform(&command);
        assert_eq!(uniform.diffuse, [1.0, 0.5, 0.25, 1.0]);
        assert_eq!(uniform.specular, [0.3, 0.3, 0.3, 16.0]);
        assert!((uniform.normal[0][0] - 0.5).abs() < 1e-6);
        assert_eq!(uniform.model[0][0], 2.0);
    }

    #[test]
    fn vertex_layout_matches_vertex_struct() {
        let layout = vertex_layout();
        assert_eq!(layout.array_stride, 24);
        assert_eq!(layout.attributes[1].offset, 12);
    }
}
