//! Scene graph consumed by the renderer.
//!
//! Nodes live in an arena and are addressed through [`NodeId`] handles.
//! The renderer never walks the graph itself: it hands a [`DrawList`] to
//! [`Renderable::render`] and receives the culled draw commands back.

pub mod description;
pub mod shared;

use std::fmt;

use glam::{Mat4, Quat, Vec3, Vec4};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::frustum::{Aabb, Frustum, Intersection};
use crate::light::PointLight;
use crate::mesh::{MeshData, MeshId, MeshLibrary};

pub use description::{SceneDescription, SceneObject, SceneObjectKind, SettingsOverrides};
pub use shared::SharedScene;

/// Per-frame values nodes and the camera may contribute to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameUniforms {
    pub view: Mat4,
    pub projection: Mat4,
    pub camera_position: Vec3,
    pub near: f32,
    pub far: f32,
    pub ambient: Vec3,
}

impl Default for FrameUniforms {
    fn default() -> Self {
        Self {
            view: Mat4::IDENTITY,
            projection: Mat4::IDENTITY,
            camera_position: Vec3::ZERO,
            near: 0.1,
            far: 100.0,
            ambient: Vec3::splat(0.25),
        }
    }
}

/// Pipeline a draw list is collected for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderTarget {
    Geometry,
    Wireframe,
    ShadowDepth,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Material {
    pub diffuse: Vec4,
    pub specular: Vec3,
    pub shininess: f32,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            diffuse: Vec4::ONE,
            specular: Vec3::splat(0.5),
            shininess: 32.0,
        }
    }
}

impl Material {
    pub fn with_colour(colour: Vec3) -> Self {
        Self {
            diffuse: colour.extend(1.0),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawCommand {
    pub mesh: MeshId,
    pub model: Mat4,
    pub material: Material,
}

/// Draw commands gathered for one pass, culled against an optional frustum.
#[derive(Debug, Clone)]
pub struct DrawList {
    target: ShaderTarget,
    frustum: Option<Frustum>,
    commands: Vec<DrawCommand>,
    culled: usize,
}

impl DrawList {
    pub fn new(target: ShaderTarget, frustum: Option<Frustum>) -> Self {
        Self {
            target,
            frustum,
            commands: Vec::new(),
            culled: 0,
        }
    }

    pub fn target(&self) -> ShaderTarget {
        self.target
    }

    pub fn set_target(&mut self, target: ShaderTarget) {
        self.target = target;
    }

    /// Queues a draw unless its world bounds lie outside the frustum.
    /// Returns whether the command was kept.
    pub fn submit(
        &mut self,
        mesh: MeshId,
        model: Mat4,
        material: Material,
        world_bounds: Option<Aabb>,
    ) -> bool {
        if let (Some(frustum), Some(bounds)) = (&self.frustum, world_bounds) {
            if frustum.classify(&bounds) == Intersection::Outside {
                self.culled += 1;
                return false;
            }
        }
        self.commands.push(DrawCommand {
            mesh,
            model,
            material,
        });
        true
    }

    pub fn commands(&self) -> &[DrawCommand] {
        &self.commands
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn culled(&self) -> usize {
        self.culled
    }
}

/// Capabilities the renderer drives on a scene.
pub trait Renderable {
    /// Emits draw commands for the list's current shader target.
    fn render(&self, delta: f64, draws: &mut DrawList);

    /// Same as [`Renderable::render`] but for an overriding shader target.
    fn render_with(&self, delta: f64, target: ShaderTarget, draws: &mut DrawList) {
        draws.set_target(target);
        self.render(delta, draws);
    }

    fn apply_uniforms(&self, uniforms: &mut FrameUniforms);

    fn dispose(&mut self);
}

/// Read access the renderer needs beyond drawing.
pub trait SceneView: Renderable {
    fn lights(&self) -> &[PointLight];

    fn mesh(&self, id: MeshId) -> Option<&MeshData>;
}

/// Per-node logic ticked from the update thread.
pub trait Behaviour: Send + Sync {
    fn update(&mut self, transform: &mut Transform, delta: f64);
}

/// Constant rotation around an axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Spin {
    pub axis: Vec3,
    /// Degrees per second.
    pub speed: f32,
}

impl Behaviour for Spin {
    fn update(&mut self, transform: &mut Transform, delta: f64) {
        let Some(axis) = self.axis.try_normalize() else {
            return;
        };
        let angle = (self.speed as f64 * delta) as f32;
        transform.rotation = (Quat::from_axis_angle(axis, angle.to_radians()) * transform.rotation)
            .normalize();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub translation: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            translation: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
        }
    }
}

impl Transform {
    /// Builds a transform from Euler angles in degrees, applied X then Y then Z.
    pub fn from_euler_degrees(translation: Vec3, rotation: Vec3, scale: Vec3) -> Self {
        let rotation = Quat::from_rotation_z(rotation.z.to_radians())
            * Quat::from_rotation_y(rotation.y.to_radians())
            * Quat::from_rotation_x(rotation.x.to_radians());
        Self {
            translation,
            rotation,
            scale,
        }
    }

    pub fn matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.translation)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeshInstance {
    pub mesh: MeshId,
    pub material: Material,
}

/// Generational handle into a [`SceneGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId {
    index: u32,
    generation: u32,
}

pub struct Node {
    pub name: String,
    pub transform: Transform,
    pub mesh: Option<MeshInstance>,
    pub visible: bool,
    pub casts_shadows: bool,
    behaviour: Option<Box<dyn Behaviour>>,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("name", &self.name)
            .field("transform", &self.transform)
            .field("mesh", &self.mesh)
            .field("visible", &self.visible)
            .field("casts_shadows", &self.casts_shadows)
            .field("has_behaviour", &self.behaviour.is_some())
            .field("parent", &self.parent)
            .field("children", &self.children)
            .finish()
    }
}

impl Node {
    fn new(name: String, parent: Option<NodeId>) -> Self {
        Self {
            name,
            transform: Transform::default(),
            mesh: None,
            visible: true,
            casts_shadows: true,
            behaviour: None,
            parent,
            children: Vec::new(),
        }
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }
}

#[derive(Debug, Default)]
struct Slot {
    generation: u32,
    node: Option<Node>,
}

/// Arena of nodes plus the lights and meshes they reference.
#[derive(Debug)]
pub struct SceneGraph {
    slots: Vec<Slot>,
    free: Vec<u32>,
    roots: Vec<NodeId>,
    meshes: MeshLibrary,
    lights: Vec<PointLight>,
    pub ambient: Vec3,
}

impl Default for SceneGraph {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            roots: Vec::new(),
            meshes: MeshLibrary::new(),
            lights: Vec::new(),
            ambient: Vec3::splat(0.25),
        }
    }
}

impl SceneGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an empty node under `parent`, or as a root. A stale parent handle
    /// also yields a root node.
    pub fn add_node(&mut self, name: impl Into<String>, parent: Option<NodeId>) -> NodeId {
        let parent = parent.filter(|id| self.node(*id).is_some());
        let node = Node::new(name.into(), parent);
        let id = match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.node = Some(node);
                NodeId {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    node: Some(node),
                });
                NodeId {
                    index: self.slots.len() as u32 - 1,
                    generation: 0,
                }
            }
        };
        match parent.and_then(|parent| self.node_mut(parent)) {
            Some(parent) => parent.children.push(id),
            None => self.roots.push(id),
        }
        id
    }

    /// Removes a node and its whole subtree. Returns the number of nodes removed.
    pub fn remove_node(&mut self, id: NodeId) -> usize {
        let Some(parent) = self.node(id).map(|node| node.parent) else {
            return 0;
        };
        match parent.and_then(|parent| self.node_mut(parent)) {
            Some(parent) => parent.children.retain(|child| *child != id),
            None => self.roots.retain(|root| *root != id),
        }
        let mut removed = 0;
        let mut pending = vec![id];
        while let Some(current) = pending.pop() {
            let slot = &mut self.slots[current.index as usize];
            if let Some(node) = slot.node.take() {
                pending.extend(node.children);
                slot.generation = slot.generation.wrapping_add(1);
                self.free.push(current.index);
                removed += 1;
            }
        }
        removed
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_ref())
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_mut())
    }

    pub fn find(&self, name: &str) -> Option<NodeId> {
        self.node_ids()
            .find(|id| self.node(*id).is_some_and(|node| node.name == name))
    }

    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.node.as_ref().map(|_| NodeId {
                index: index as u32,
                generation: slot.generation,
            })
        })
    }

    pub fn node_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.node.is_some()).count()
    }

    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    pub fn add_mesh(&mut self, mesh: MeshData) -> MeshId {
        self.meshes.insert(mesh)
    }

    pub fn meshes(&self) -> &MeshLibrary {
        &self.meshes
    }

    pub fn set_mesh(&mut self, id: NodeId, mesh: MeshId, material: Material) -> bool {
        match self.node_mut(id) {
            Some(node) => {
                node.mesh = Some(MeshInstance { mesh, material });
                true
            }
            None => false,
        }
    }

    pub fn set_behaviour(&mut self, id: NodeId, behaviour: Box<dyn Behaviour>) -> bool {
        match self.node_mut(id) {
            Some(node) => {
                node.behaviour = Some(behaviour);
                true
            }
            None => false,
        }
    }

    pub fn add_light(&mut self, light: PointLight) -> usize {
        self.lights.push(light);
        self.lights.len() - 1
    }

    pub fn lights_mut(&mut self) -> &mut Vec<PointLight> {
        &mut self.lights
    }

    /// Ticks every node behaviour.
    pub fn update(&mut self, delta: f64) {
        for slot in &mut self.slots {
            if let Some(node) = slot.node.as_mut() {
                if let Some(behaviour) = node.behaviour.as_mut() {
                    behaviour.update(&mut node.transform, delta);
                }
            }
        }
    }

    /// Model matrix of a node including all of its ancestors.
    pub fn world_matrix(&self, id: NodeId) -> Option<Mat4> {
        let mut node = self.node(id)?;
        let mut matrix = node.transform.matrix();
        while let Some(parent) = node.parent.and_then(|parent| self.node(parent)) {
            matrix = parent.transform.matrix() * matrix;
            node = parent;
        }
        Some(matrix)
    }

    /// World-space bounds of a node's mesh.
    pub fn world_bounds(&self, id: NodeId) -> Option<Aabb> {
        let instance = self.node(id)?.mesh?;
        let bounds = self.meshes.bounds(instance.mesh)?;
        Some(bounds.transformed(&self.world_matrix(id)?))
    }
}

impl Renderable for SceneGraph {
    fn render(&self, _delta: f64, draws: &mut DrawList) {
        let shadow_pass = draws.target() == ShaderTarget::ShadowDepth;
        let mut stack: Vec<(NodeId, Mat4)> = self
            .roots
            .iter()
            .rev()
            .map(|id| (*id, Mat4::IDENTITY))
            .collect();
        while let Some((id, parent)) = stack.pop() {
            let Some(node) = self.node(id) else {
                continue;
            };
            if !node.visible {
                continue;
            }
            let world = parent * node.transform.matrix();
            if let Some(instance) = node.mesh {
                if !shadow_pass || node.casts_shadows {
                    let bounds = self
                        .meshes
                        .bounds(instance.mesh)
                        .map(|bounds| bounds.transformed(&world));
                    draws.submit(instance.mesh, world, instance.material, bounds);
                }
            }
            stack.extend(node.children.iter().rev().map(|child| (*child, world)));
        }
    }

    fn apply_uniforms(&self, uniforms: &mut FrameUniforms) {
        uniforms.ambient = self.ambient;
    }

    fn dispose(&mut self) {
        debug!(
            "disposing scene with {} nodes and {} lights",
            self.node_count(),
            self.lights.len()
        );
        self.slots.clear();
        self.free.clear();
        self.roots.clear();
        self.meshes.clear();
        self.lights.clear();
    }
}

impl SceneView for SceneGraph {
    fn lights(&self) -> &[PointLight] {
        &self.lights
    }

    fn mesh(&self, id: MeshId) -> Option<&MeshData> {
        self.meshes.get(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::Camera;

    fn cube_scene() -> (SceneGraph, NodeId) {
        let mut scene = SceneGraph::new();
        let cube = scene.add_mesh(MeshData::cube());
        let node = scene.add_node("Cube", None);
        scene.set_mesh(node, cube, Material::default());
        (scene, node)
    }

    #[test]
    fn traversal_emits_mesh_nodes_with_world_matrices() {
        let (mut scene, parent) = cube_scene();
        let mesh = scene.node(parent).unwrap().mesh.unwrap().mesh;
        scene.node_mut(parent).unwrap().transform.translation = Vec3::new(1.0, 0.0, 0.0);
        let child = scene.add_node("Child", Some(parent));
        scene.set_mesh(child, mesh, Material::default());
        scene.node_mut(child).unwrap().transform.translation = Vec3::new(0.0, 2.0, 0.0);

        let mut draws = DrawList::new(ShaderTarget::Geometry, None);
        scene.render(0.0, &mut draws);
        assert_eq!(draws.len(), 2);
        let child_origin = draws.commands()[1].model.transform_point3(Vec3::ZERO);
        assert_eq!(child_origin, Vec3::new(1.0, 2.0, 0.0));
    }

    #[test]
    fn nodes_outside_frustum_are_culled() {
        let (mut scene, node) = cube_scene();
        let mut camera = Camera::new(0.1, 100.0, 90.0).unwrap();
        camera.position = Vec3::new(0.0, 0.0, 5.0);
        camera.update(1.0, true);

        let mut draws = DrawList::new(ShaderTarget::Geometry, camera.frustum().copied());
        scene.render(0.0, &mut draws);
        assert_eq!((draws.len(), draws.culled()), (1, 0));

        scene.node_mut(node).unwrap().transform.translation = Vec3::new(0.0, 0.0, 20.0);
        let mut draws = DrawList::new(ShaderTarget::Geometry, camera.frustum().copied());
        scene.render(0.0, &mut draws);
        assert_eq!((draws.len(), draws.culled()), (0, 1));
    }

    #[test]
    fn shadow_target_skips_non_casters() {
        let (mut scene, node) = cube_scene();
        scene.node_mut(node).unwrap().casts_shadows = false;
        let mut draws = DrawList::new(ShaderTarget::Geometry, None);
        scene.render_with(0.0, ShaderTarget::ShadowDepth, &mut draws);
        assert!(draws.is_empty());
        scene.render_with(0.0, ShaderTarget::Geometry, &mut draws);
        assert_eq!(draws.len(), 1);
    }

    #[test]
    fn removing_a_node_drops_its_subtree_and_invalidates_handles() {
        let (mut scene, parent) = cube_scene();
        let child = scene.add_node("Child", Some(parent));
        scene.add_node("Grandchild", Some(child));
        assert_eq!(scene.remove_node(parent), 3);
        assert_eq!(scene.node_count(), 0);
        assert!(scene.node(child).is_none());

        let reused = scene.add_node("Fresh", None);
        assert!(scene.node(parent).is_none());
        assert_eq!(scene.node(reused).unwrap().name, "Fresh");
    }

    #[test]
    fn spin_behaviour_rotates_on_update() {
        let (mut scene, node) = cube_scene();
        scene.set_behaviour(
            node,
            Box::new(Spin {
                axis: Vec3::Y,
                speed: 90.0,
            }),
        );
        scene.update(1.0);
        let rotation = scene.node(node).unwrap().transform.rotation;
        let rotated = rotation * Vec3::X;
        assert!(rotated.distance(Vec3::NEG_Z) < 1e-4);
    }

    #[test]
    fn dispose_clears_everything() {
        let (mut scene, _) = cube_scene();
        scene.add_light(PointLight::default());
        scene.dispose();
        assert_eq!(scene.node_count(), 0);
        assert!(scene.lights().is_empty());
        assert!(scene.meshes().is_empty());
    }

    #[test]
    fn world_bounds_follow_scale() {
        let (mut scene, node) = cube_scene();
        scene.node_mut(node).unwrap().transform.scale = Vec3::splat(4.0);
        let bounds = scene.world_bounds(node).unwrap();
        assert_eq!(bounds.half_extents, Vec3::splat(2.0));
    }
}
