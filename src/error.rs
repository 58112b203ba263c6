use thiserror::Error;

use crate::render::backend::TargetFormat;

/// Rejected pipeline or camera configuration.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("near plane must be positive (got {0})")]
    InvalidNear(f32),
    #[error("near plane {near} must be closer than far plane {far}")]
    NearBeyondFar { near: f32, far: f32 },
    #[error("field of view must lie within (0, 180) degrees (got {0})")]
    InvalidFov(f32),
    #[error("sample count {0} is not a power of two between 1 and 16")]
    InvalidSampleCount(u32),
    #[error("ssao sample count {requested} exceeds the maximum of {max}")]
    TooManySsaoSamples { requested: u32, max: u32 },
    #[error("ssao texture scale must lie within (0, 1] (got {0})")]
    InvalidSsaoScale(f32),
    #[error("ssao noise size must be at least 1")]
    InvalidNoiseSize,
    #[error("shadow map resolution must be positive")]
    InvalidShadowResolution,
    #[error("light cap {requested} exceeds the maximum of {max}")]
    TooManyLights { requested: usize, max: usize },
}

/// Reason a framebuffer cannot be rendered into.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FramebufferError {
    #[error("framebuffer `{0}` has no attachments")]
    MissingAttachment(&'static str),
    #[error("framebuffer `{framebuffer}`: `{attachment}` {format:?} rejects {samples} samples")]
    UnsupportedFormat {
        framebuffer: &'static str,
        attachment: &'static str,
        format: TargetFormat,
        samples: u32,
    },
    #[error("framebuffer `{framebuffer}`: `{attachment}` is {found:?}, expected {expected:?}")]
    DimensionMismatch {
        framebuffer: &'static str,
        attachment: &'static str,
        expected: (u32, u32),
        found: (u32, u32),
    },
    #[error("framebuffer `{framebuffer}`: `{attachment}` samples {found:?}, expected {expected:?}")]
    MultisampleMismatch {
        framebuffer: &'static str,
        attachment: &'static str,
        expected: (u32, bool),
        found: (u32, bool),
    },
}
