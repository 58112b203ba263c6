//! GPU side of the pipeline: targets, passes and the frame driver.

pub mod backend;
pub mod common;
pub mod composite;
pub mod geometry;
#[cfg(test)]
pub(crate) mod mock;
pub mod renderer;
pub mod resources;
pub mod shaders;
pub mod shadow;
pub mod ssao;

pub use backend::{GpuBackend, SampleConfig, TargetFormat, WgpuBackend};
pub use renderer::{Capture, FrameReport, RenderContext, Renderer, ResizeHandle, TargetKind};
pub use resources::{FramebufferId, ResourceManager};
pub use ssao::SsaoKernel;
