//! Deferred 3D rendering pipeline built on wgpu.
//!
//! Geometry is rasterised once into a G-buffer (diffuse, normals, specular,
//! depth). Screen-space ambient occlusion, point-light shadows and lighting
//! are then resolved from those buffers before the result is tone mapped
//! onto the window or an offscreen target.
//!
//! Everything that does not need a device (camera maths, frustum culling,
//! scene description and graph, light packing, settings validation) lives
//! outside [`render`] so it can be used by headless tools and tests.

pub mod app;
pub mod camera;
pub mod config;
pub mod error;
pub mod frustum;
pub mod light;
pub mod mesh;
pub mod render;
pub mod scene;

pub use camera::Camera;
pub use config::{DebugBuffer, PipelineSettings, RenderToggles};
pub use error::{ConfigError, FramebufferError};
pub use frustum::{Aabb, Frustum, Intersection};
pub use light::PointLight;
pub use mesh::{MeshData, MeshId, MeshLibrary};
pub use render::{Capture, FrameReport, RenderContext, Renderer, TargetKind};
pub use scene::{Renderable, SceneDescription, SceneGraph, SceneView, SharedScene};
