use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::light::MAX_LIGHTS;
use crate::render::backend::SampleConfig;

/// Upper bound for the SSAO kernel length.
pub const MAX_SSAO_SAMPLES: u32 = 256;

/// Tunables for the whole pipeline. Missing fields fall back to the defaults
/// below when deserialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Sample count used while antialiasing is enabled.
    pub msaa_samples: u32,
    pub fixed_sample_locations: bool,
    pub max_lights: usize,
    pub seed: u64,
    pub ambient: Vec3,
    pub camera: CameraSettings,
    pub ssao: SsaoSettings,
    pub shadow: ShadowSettings,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            msaa_samples: 4,
            fixed_sample_locations: true,
            max_lights: MAX_LIGHTS,
            seed: 0x5eed,
            ambient: Vec3::splat(0.25),
            camera: CameraSettings::default(),
            ssao: SsaoSettings::default(),
            shadow: ShadowSettings::default(),
        }
    }
}

impl PipelineSettings {
    /// Checks every value the renderer relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.msaa_samples.is_power_of_two() || self.msaa_samples > 16 {
            return Err(ConfigError::InvalidSampleCount(self.msaa_samples));
        }
        if self.max_lights > MAX_LIGHTS {
            return Err(ConfigError::TooManyLights {
                requested: self.max_lights,
                max: MAX_LIGHTS,
            });
        }
        self.camera.validate()?;
        self.ssao.validate()?;
        self.shadow.validate()
    }

    /// Sampling used for the G-buffer given the antialiasing toggle.
    pub fn sample_config(&self, antialiasing: bool) -> SampleConfig {
        SampleConfig {
            count: if antialiasing { self.msaa_samples } else { 1 },
            fixed_locations: self.fixed_sample_locations,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraSettings {
    pub near: f32,
    pub far: f32,
    /// Vertical field of view in degrees.
    pub fov: f32,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            near: 0.001,
            far: 1000.0,
            fov: 90.0,
        }
    }
}

impl CameraSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_clip(self.near, self.far, self.fov)
    }
}

pub(crate) fn validate_clip(near: f32, far: f32, fov: f32) -> Result<(), ConfigError> {
    if !(near > 0.0) {
        return Err(ConfigError::InvalidNear(near));
    }
    if !(near < far) {
        return Err(ConfigError::NearBeyondFar { near, far });
    }
    if !(fov > 0.0 && fov < 180.0) {
        return Err(ConfigError::InvalidFov(fov));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SsaoSettings {
    pub samples: u32,
    pub radius: f32,
    /// Depth bias applied before a sample counts as occluded.
    pub offset: f32,
    pub noise_size: u32,
    /// SSAO buffer resolution relative to the window.
    pub texture_scale: f32,
    pub blur: bool,
}

impl Default for SsaoSettings {
    fn default() -> Self {
        Self {
            samples: 32,
            radius: 1.5,
            offset: 0.0,
            noise_size: 64,
            texture_scale: 0.75,
            blur: true,
        }
    }
}

impl SsaoSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.samples > MAX_SSAO_SAMPLES {
            return Err(ConfigError::TooManySsaoSamples {
                requested: self.samples,
                max: MAX_SSAO_SAMPLES,
            });
        }
        if !(self.texture_scale > 0.0 && self.texture_scale <= 1.0) {
            return Err(ConfigError::InvalidSsaoScale(self.texture_scale));
        }
        if self.noise_size == 0 {
            return Err(ConfigError::InvalidNoiseSize);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShadowSettings {
    pub resolution: u32,
    pub near: f32,
    pub far: f32,
    pub bias: f32,
}

impl Default for ShadowSettings {
    fn default() -> Self {
        Self {
            resolution: 1024,
            near: 0.0025,
            far: 256.0,
            bias: 0.05,
        }
    }
}

impl ShadowSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.resolution == 0 {
            return Err(ConfigError::InvalidShadowResolution);
        }
        validate_clip(self.near, self.far, 90.0)
    }
}

/// Buffer shown full screen while the buffer view is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DebugBuffer {
    Diffuse,
    Normal,
    Specular,
    Depth,
    Ssao,
    Shadow,
    /// The six faces of the distance cube, one per grid tile. The cube holds
    /// the last caster rendered in the frame.
    ShadowCube,
}

impl DebugBuffer {
    /// Buffers of the overview grid, in tile order.
    pub const ALL: [DebugBuffer; 6] = [
        DebugBuffer::Diffuse,
        DebugBuffer::Normal,
        DebugBuffer::Specular,
        DebugBuffer::Depth,
        DebugBuffer::Ssao,
        DebugBuffer::Shadow,
    ];

    /// Order the buffer view steps through after the grid.
    pub const CYCLE: [DebugBuffer; 7] = [
        DebugBuffer::Diffuse,
        DebugBuffer::Normal,
        DebugBuffer::Specular,
        DebugBuffer::Depth,
        DebugBuffer::Ssao,
        DebugBuffer::Shadow,
        DebugBuffer::ShadowCube,
    ];

    pub fn index(self) -> u32 {
        self as u32
    }
}

/// Per-frame feature switches, read by the renderer at the start of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderToggles {
    pub draw_geometry: bool,
    pub draw_wireframe: bool,
    pub antialiasing: bool,
    pub ambient_occlusion: bool,
    pub shadow_mapping: bool,
    /// When off the culling frustum stays frozen at its last value.
    pub frustum_update: bool,
    pub frustum_culling: bool,
    pub show_buffers: bool,
    pub selected_buffer: Option<DebugBuffer>,
    pub tone_adjust: bool,
}

impl Default for RenderToggles {
    fn default() -> Self {
        Self {
            draw_geometry: true,
            draw_wireframe: false,
            antialiasing: false,
            ambient_occlusion: true,
            shadow_mapping: true,
            frustum_update: true,
            frustum_culling: true,
            show_buffers: false,
            selected_buffer: None,
            tone_adjust: true,
        }
    }
}

impl RenderToggles {
    /// Moves the buffer view to the next single buffer, then back to the grid.
    pub fn cycle_selected_buffer(&mut self) {
        self.selected_buffer = match self.selected_buffer {
            None => Some(DebugBuffer::CYCLE[0]),
            Some(current) => DebugBuffer::CYCLE.get(current.index() as usize + 1).copied(),
        };
    }

    /// Applies the demo binding of function key `F{key}`. Returns whether
    /// the key is bound.
    pub fn apply_function_key(&mut self, key: u8) -> bool {
        match key {
            1 => self.draw_wireframe = !self.draw_wireframe,
            2 => self.draw_geometry = !self.draw_geometry,
            3 => self.ambient_occlusion = !self.ambient_occlusion,
            4 if !self.show_buffers => {
                self.show_buffers = true;
                self.selected_buffer = None;
            }
            4 => {
                self.cycle_selected_buffer();
                self.show_buffers = self.selected_buffer.is_some();
            }
            5 => self.antialiasing = !self.antialiasing,
            6 => self.frustum_update = !self.frustum_update,
            7 => self.frustum_culling = !self.frustum_culling,
            8 => self.tone_adjust = !self.tone_adjust,
            _ => return false,
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let settings = PipelineSettings::default();
        settings.validate().unwrap();
        assert_eq!(settings.ssao.samples, 32);
        assert_eq!(settings.ssao.noise_size, 64);
        assert_eq!(settings.shadow.resolution, 1024);
    }

    #[test]
    fn near_beyond_far_is_rejected() {
        let mut settings = PipelineSettings::default();
        settings.camera.near = 10.0;
        settings.camera.far = 1.0;
        assert_eq!(
            settings.validate(),
            Err(ConfigError::NearBeyondFar {
                near: 10.0,
                far: 1.0
            })
        );
    }

    #[test]
    fn fov_outside_open_range_is_rejected() {
        assert!(validate_clip(0.1, 10.0, 0.0).is_err());
        assert!(validate_clip(0.1, 10.0, 180.0).is_err());
        assert!(validate_clip(0.1, 10.0, f32::NAN).is_err());
        assert!(validate_clip(0.1, 10.0, 179.0).is_ok());
    }

    #[test]
    fn sample_config_follows_antialiasing_toggle() {
        let settings = PipelineSettings::default();
        assert_eq!(settings.sample_config(false).count, 1);
        assert_eq!(settings.sample_config(true).count, 4);
    }

    #[test]
    fn odd_sample_count_is_rejected() {
        let mut settings = PipelineSettings::default();
        settings.msaa_samples = 3;
        assert_eq!(settings.validate(), Err(ConfigError::InvalidSampleCount(3)));
    }

    #[test]
    fn buffer_selection_cycles_back_to_grid() {
        let mut toggles = RenderToggles::default();
        for expected in DebugBuffer::CYCLE {
            toggles.cycle_selected_buffer();
            assert_eq!(toggles.selected_buffer, Some(expected));
        }
        toggles.cycle_selected_buffer();
        assert_eq!(toggles.selected_buffer, None);
    }

    #[test]
    fn buffer_view_key_walks_grid_then_each_buffer() {
        let mut toggles = RenderToggles::default();
        assert!(toggles.apply_function_key(4));
        assert!(toggles.show_buffers);
        assert_eq!(toggles.selected_buffer, None);
        for expected in DebugBuffer::CYCLE {
            toggles.apply_function_key(4);
            assert_eq!(toggles.selected_buffer, Some(expected));
        }
        assert_eq!(toggles.selected_buffer, Some(DebugBuffer::ShadowCube));
        toggles.apply_function_key(4);
        assert!(!toggles.show_buffers);
    }

    #[test]
    fn function_keys_flip_their_toggle() {
        let mut toggles = RenderToggles::default();
        assert!(toggles.apply_function_key(6));
        assert!(!toggles.frustum_update);
        assert!(toggles.apply_function_key(5));
        assert!(toggles.antialiasing);
        assert!(!toggles.apply_function_key(9));
    }
}
