use bytemuck::{Pod, Zeroable};
use glam::Vec3;
use serde::{Deserialize, Serialize};

/// Size of the light array the compositing shader iterates over.
pub const MAX_LIGHTS: usize = 16;

/// Omnidirectional light. Attenuation holds the quadratic, linear and
/// constant terms in that order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PointLight {
    pub position: Vec3,
    pub colour: Vec3,
    pub attenuation: Vec3,
    pub intensity: f32,
}

impl Default for PointLight {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            colour: Vec3::ONE,
            attenuation: Vec3::new(0.02, 0.05, 1.0),
            intensity: 1.0,
        }
    }
}

impl PointLight {
    /// Placeholder occupying unused slots of the light array.
    pub const NULL: PointLight = PointLight {
        position: Vec3::ZERO,
        colour: Vec3::ZERO,
        attenuation: Vec3::new(0.0, 0.0, 1.0),
        intensity: 0.0,
    };

    pub fn new(position: Vec3, colour: Vec3, intensity: f32) -> Self {
        Self {
            position,
            colour,
            intensity,
            ..Self::default()
        }
    }

    /// Lights without positive intensity neither shade nor cast shadows.
    pub fn is_active(&self) -> bool {
        self.intensity.is_finite() && self.intensity > 0.0
    }

    pub fn attenuation_at(&self, distance: f32) -> f32 {
        let denominator = self.attenuation.dot(Vec3::new(distance * distance, distance, 1.0));
        1.0 / denominator.max(1e-4)
    }

    pub fn to_gpu(&self) -> GpuPointLight {
        GpuPointLight {
            position: self.position.into(),
            intensity: self.intensity,
            colour: self.colour.into(),
            _pad0: 0.0,
            attenuation: self.attenuation.into(),
            _pad1: 0.0,
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct GpuPointLight {
    pub position: [f32; 3],
    pub intensity: f32,
    pub colour: [f32; 3],
    pub _pad0: f32,
    pub attenuation: [f32; 3],
    pub _pad1: f32,
}

/// Uniform block holding the fixed-size light array.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct LightBlock {
    pub lights: [GpuPointLight; MAX_LIGHTS],
    pub num_lights: u32,
    pub _pad: [u32; 3],
}

/// Packs up to `cap` lights into the uniform block; further lights are
/// ignored and remaining slots hold [`PointLight::NULL`].
pub fn pack_lights(lights: &[PointLight], cap: usize) -> LightBlock {
    let count = lights.len().min(cap).min(MAX_LIGHTS);
    let mut block = LightBlock {
        lights: [PointLight::NULL.to_gpu(); MAX_LIGHTS],
        num_lights: count as u32,
        _pad: [0; 3],
    };
    for (slot, light) in block.lights.iter_mut().zip(&lights[..count]) {
        *slot = light.to_gpu();
    }
    block
}

/// Lights inside the cap that cast shadows, with their slot index.
pub fn shadow_casters(
    lights: &[PointLight],
    cap: usize,
) -> impl Iterator<Item = (usize, &PointLight)> {
    lights
        .iter()
        .take(cap.min(MAX_LIGHTS))
        .enumerate()
        .filter(|(_, light)| light.is_active())
}

/// Share of the summed caster intensity contributed by each caster.
pub fn shadow_weights(lights: &[PointLight], cap: usize) -> Vec<(usize, f32)> {
    let total: f32 = shadow_casters(lights, cap).map(|(_, light)| light.intensity).sum();
    if total <= 0.0 {
        return Vec::new();
    }
    shadow_casters(lights, cap)
        .map(|(index, light)| (index, light.intensity / total))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gpu_light_matches_shader_layout() {
        assert_eq!(std::mem::size_of::<GpuPointLight>(), 48);
        assert_eq!(std::mem::size_of::<LightBlock>(), 48 * MAX_LIGHTS + 16);
    }

    #[test]
    fn unused_slots_are_null_lights() {
        let lights = [PointLight::new(Vec3::Y, Vec3::ONE, 2.0)];
        let block = pack_lights(&lights, MAX_LIGHTS);
        assert_eq!(block.num_lights, 1);
        assert_eq!(block.lights[0].intensity, 2.0);
        assert!(block.lights[1..].iter().all(|light| light.intensity == 0.0));
    }

    #[test]
    fn lights_beyond_cap_are_ignored() {
        let lights: Vec<_> = (0..MAX_LIGHTS + 4)
            .map(|i| PointLight::new(Vec3::splat(i as f32), Vec3::ONE, 1.0))
            .collect();
        assert_eq!(pack_lights(&lights, 3).num_lights, 3);
        assert_eq!(pack_lights(&lights, 100).num_lights as usize, MAX_LIGHTS);
    }

    #[test]
    fn dark_lights_cast_no_shadows() {
        let lights = [
            PointLight::new(Vec3::ZERO, Vec3::ONE, 0.0),
            PointLight::new(Vec3::ONE, Vec3::ONE, -1.0),
            PointLight::new(Vec3::Y, Vec3::ONE, 3.0),
            PointLight::new(Vec3::X, Vec3::ONE, 1.0),
        ];
        let casters: Vec<_> = shadow_casters(&lights, MAX_LIGHTS).map(|(i, _)| i).collect();
        assert_eq!(casters, vec![2, 3]);
        let weights = shadow_weights(&lights, MAX_LIGHTS);
        assert_eq!(weights, vec![(2, 0.75), (3, 0.25)]);
    }

    #[test]
    fn attenuation_falls_off_with_distance() {
        let light = PointLight::default();
        assert!((light.attenuation_at(0.0) - 1.0).abs() < 1e-6);
        assert!(light.attenuation_at(10.0) < light.attenuation_at(1.0));
    }
}
