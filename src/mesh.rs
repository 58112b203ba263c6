use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::frustum::Aabb;

/// Interleaved position and normal, matching the geometry pipeline's
/// vertex layout.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
}

impl Vertex {
    pub const fn new(position: [f32; 3], normal: [f32; 3]) -> Self {
        Self { position, normal }
    }
}

/// Triangle list resident in CPU memory.
#[derive(Debug, Clone, PartialEq)]
pub struct MeshData {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
}

impl MeshData {
    /// Unit cube centred on the origin.
    pub fn cube() -> Self {
        let vertices = CUBE_VERTICES
            .chunks_exact(6)
            .map(|v| Vertex::new([v[0], v[1], v[2]], [v[3], v[4], v[5]]))
            .collect();
        Self {
            vertices,
            indices: CUBE_INDICES.to_vec(),
        }
    }

    /// Square in the XZ plane facing `+Y`.
    pub fn plane(half_size: f32) -> Self {
        let h = half_size.abs();
        let up = [0.0, 1.0, 0.0];
        Self {
            vertices: vec![
                Vertex::new([-h, 0.0, -h], up),
                Vertex::new([-h, 0.0, h], up),
                Vertex::new([h, 0.0, h], up),
                Vertex::new([h, 0.0, -h], up),
            ],
            indices: vec![0, 1, 2, 0, 2, 3],
        }
    }

    /// Bounds in model space, `None` for an empty mesh.
    pub fn bounds(&self) -> Option<Aabb> {
        Aabb::from_points(self.vertices.iter().map(|v| Vec3::from(v.position)))
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }
}

/// Handle into a [`MeshLibrary`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MeshId(pub u32);

/// Built-in primitives the scene description may reference by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Primitive {
    Cube,
    Plane,
}

impl Primitive {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "cube" | "box" => Some(Primitive::Cube),
            "plane" | "floor" => Some(Primitive::Plane),
            _ => None,
        }
    }

    pub fn build(self) -> MeshData {
        match self {
            Primitive::Cube => MeshData::cube(),
            Primitive::Plane => MeshData::plane(0.5),
        }
    }
}

/// Meshes shared by the nodes of a scene, with cached model-space bounds.
#[derive(Debug, Default, Clone)]
pub struct MeshLibrary {
    meshes: Vec<(Arc<MeshData>, Option<Aabb>)>,
}

impl MeshLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, mesh: MeshData) -> MeshId {
        let bounds = mesh.bounds();
        self.meshes.push((Arc::new(mesh), bounds));
        MeshId(self.meshes.len() as u32 - 1)
    }

    pub fn get(&self, id: MeshId) -> Option<&MeshData> {
        self.meshes.get(id.0 as usize).map(|(mesh, _)| mesh.as_ref())
    }

    pub fn bounds(&self, id: MeshId) -> Option<Aabb> {
        self.meshes.get(id.0 as usize).and_then(|(_, bounds)| *bounds)
    }

    pub fn len(&self) -> usize {
        self.meshes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.meshes.is_empty()
    }

    pub fn clear(&mut self) {
        self.meshes.clear();
    }
}

const CUBE_VERTICES: &[f32] = &[
    // positions        // normals
    -0.5, -0.5, 0.5, 0.0, 0.0, 1.0, 0.5, -0.5, 0.5, 0.0, 0.0, 1.0, 0.5, 0.5, 0.5, 0.0, 0.0, 1.0,
    -0.5, 0.5, 0.5, 0.0, 0.0, 1.0, -0.5, -0.5, -0.5, 0.0, 0.0, -1.0, 0.5, -0.5, -0.5, 0.0, 0.0,
    -1.0, 0.5, 0.5, -0.5, 0.0, 0.0, -1.0, -0.5, 0.5, -0.5, 0.0, 0.0, -1.0, -0.5, -0.5, -0.5, -1.0,
    0.0, 0.0, -0.5, -0.5, 0.5, -1.0, 0.0, 0.0, -0.5, 0.5, 0.5, -1.0, 0.0, 0.0, -0.5, 0.5, -0.5,
    -1.0, 0.0, 0.0, 0.5, -0.5, -0.5, 1.0, 0.0, 0.0, 0.5, -0.5, 0.5, 1.0, 0.0, 0.0, 0.5, 0.5, 0.5,
    1.0, 0.0, 0.0, 0.5, 0.5, -0.5, 1.0, 0.0, 0.0, -0.5, -0.5, -0.5, 0.0, -1.0, 0.0, 0.5, -0.5,
    -0.5, 0.0, -1.0, 0.0, 0.5, -0.5, 0.5, 0.0, -1.0, 0.0, -0.5, -0.5, 0.5, 0.0, -1.0, 0.0, -0.5,
    0.5, -0.5, 0.0, 1.0, 0.0, 0.5, 0.5, -0.5, 0.0, 1.0, 0.0, 0.5, 0.5, 0.5, 0.0, 1.0, 0.0, -0.5,
    0.5, 0.5, 0.0, 1.0, 0.0,
];

const CUBE_INDICES: &[u32] = &[
    0, 1, 2, 0, 2, 3, // front
    4, 6, 5, 4, 7, 6, // back
    8, 9, 10, 8, 10, 11, // left
    12, 14, 13, 12, 15, 14, // right
    16, 18, 17, 16, 19, 18, // bottom
    20, 21, 22, 20, 22, 23, // top
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cube_has_twelve_triangles_and_unit_bounds() {
        let cube = MeshData::cube();
        assert_eq!(cube.vertices.len(), 24);
        assert_eq!(cube.triangle_count(), 12);
        let bounds = cube.bounds().unwrap();
        assert_eq!(bounds.center, Vec3::ZERO);
        assert_eq!(bounds.half_extents, Vec3::splat(0.5));
    }

    #[test]
    fn cube_indices_stay_in_range() {
        let cube = MeshData::cube();
        assert!(cube.indices.iter().all(|&i| (i as usize) < cube.vertices.len()));
    }

    #[test]
    fn flat_plane_has_zero_height_bounds() {
        let bounds = MeshData::plane(2.0).bounds().unwrap();
        assert_eq!(bounds.half_extents, Vec3::new(2.0, 0.0, 2.0));
    }

    #[test]
    fn library_hands_out_sequential_ids() {
        let mut library = MeshLibrary::new();
        let cube = library.insert(MeshData::cube());
        let plane = library.insert(MeshData::plane(1.0));
        assert_eq!((cube, plane), (MeshId(0), MeshId(1)));
        assert_eq!(library.get(plane).unwrap().triangle_count(), 2);
        assert!(library.get(MeshId(7)).is_none());
    }

    #[test]
    fn primitive_names_are_case_insensitive() {
        assert_eq!(Primitive::from_name(" Cube "), Some(Primitive::Cube));
        assert_eq!(Primitive::from_name("teapot"), None);
    }
}
