use glam::{Mat3, Mat4, Quat, Vec2, Vec3, Vec4};
use log::warn;

use crate::config::{validate_clip, CameraSettings};
use crate::error::ConfigError;
use crate::frustum::{Aabb, Frustum, Intersection};
use crate::scene::FrameUniforms;

/// Remaps GL clip depth `[-w, w]` to the `[0, w]` range wgpu rasterizes.
pub const CLIP_CORRECTION: Mat4 = Mat4::from_cols(
    Vec4::new(1.0, 0.0, 0.0, 0.0),
    Vec4::new(0.0, 1.0, 0.0, 0.0),
    Vec4::new(0.0, 0.0, 0.5, 0.0),
    Vec4::new(0.0, 0.0, 0.5, 1.0),
);

/// Perspective projection with the far plane pushed to infinity.
///
/// Uses GL clip conventions: a point at distance `near` lands on NDC depth
/// `-1` and depth approaches `+1` as distance grows. `far` is accepted for
/// symmetry with the camera settings but never enters the matrix, so any
/// far value (including very large ones) yields finite entries.
pub fn build_projection(near: f32, _far: f32, fov_degrees: f32, aspect: f32) -> Mat4 {
    let aspect = if aspect.is_finite() && aspect > 0.0 {
        aspect
    } else {
        1.0
    };
    let focal = 1.0 / (fov_degrees.to_radians() * 0.5).tan();
    Mat4::from_cols(
        Vec4::new(focal / aspect, 0.0, 0.0, 0.0),
        Vec4::new(0.0, focal, 0.0, 0.0),
        Vec4::new(0.0, 0.0, -1.0, -1.0),
        Vec4::new(0.0, 0.0, -2.0 * near, 0.0),
    )
}

/// World-to-view matrix: rotate after translating the eye to the origin.
pub fn build_view(position: Vec3, rotation: Quat) -> Mat4 {
    Mat4::from_quat(rotation) * Mat4::from_translation(-position)
}

/// Perspective camera owning its projection, view and culling frustum.
#[derive(Debug, Clone)]
pub struct Camera {
    near: f32,
    far: f32,
    fov: f32,
    aspect: f32,
    pub position: Vec3,
    /// World-to-view rotation.
    pub rotation: Quat,
    projection: Mat4,
    view: Mat4,
    frustum: Option<Frustum>,
}

impl Camera {
    /// Creates a camera at the origin looking down `-Z`.
    pub fn new(near: f32, far: f32, fov: f32) -> Result<Self, ConfigError> {
        validate_clip(near, far, fov)?;
        Ok(Self {
            near,
            far,
            fov,
            aspect: 1.0,
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            projection: build_projection(near, far, fov, 1.0),
            view: Mat4::IDENTITY,
            frustum: None,
        })
    }

    pub fn from_settings(settings: &CameraSettings) -> Result<Self, ConfigError> {
        Self::new(settings.near, settings.far, settings.fov)
    }

    pub fn near(&self) -> f32 {
        self.near
    }

    pub fn far(&self) -> f32 {
        self.far
    }

    pub fn fov(&self) -> f32 {
        self.fov
    }

    pub fn aspect(&self) -> f32 {
        self.aspect
    }

    pub fn set_fov(&mut self, fov: f32) -> Result<(), ConfigError> {
        validate_clip(self.near, self.far, fov)?;
        self.fov = fov;
        Ok(())
    }

    /// Recomputes projection and view. The frustum is only rebuilt when
    /// `update_frustum` is set, so culling can be frozen in place.
    pub fn update(&mut self, aspect: f32, update_frustum: bool) {
        self.aspect = if aspect.is_finite() && aspect > 0.0 {
            aspect
        } else {
            1.0
        };
        self.projection = build_projection(self.near, self.far, self.fov, self.aspect);
        self.view = build_view(self.position, self.rotation);
        if update_frustum || self.frustum.is_none() {
            self.frustum = Some(Frustum::from_view_projection(self.view_projection()));
        }
    }

    /// Orients the camera towards `target`. A zero-length look vector keeps
    /// the previous rotation.
    pub fn look_at(&mut self, target: Vec3) {
        let direction = target - self.position;
        if direction.length_squared() <= f32::EPSILON {
            warn!("camera look-at target coincides with its position; keeping rotation");
            return;
        }
        let direction = direction.normalize();
        let up = if direction.cross(Vec3::Y).length_squared() <= 1e-6 {
            Vec3::Z
        } else {
            Vec3::Y
        };
        let view = Mat4::look_to_rh(Vec3::ZERO, direction, up);
        self.rotation = Quat::from_mat3(&Mat3::from_mat4(view)).normalize();
    }

    pub fn projection(&self) -> Mat4 {
        self.projection
    }

    /// Projection remapped to the wgpu depth range.
    pub fn gpu_projection(&self) -> Mat4 {
        CLIP_CORRECTION * self.projection
    }

    pub fn view(&self) -> Mat4 {
        self.view
    }

    pub fn view_projection(&self) -> Mat4 {
        self.projection * self.view
    }

    pub fn gpu_view_projection(&self) -> Mat4 {
        self.gpu_projection() * self.view
    }

    pub fn frustum(&self) -> Option<&Frustum> {
        self.frustum.as_ref()
    }

    /// Without a frustum everything counts as visible.
    pub fn classify(&self, aabb: &Aabb) -> Intersection {
        match &self.frustum {
            Some(frustum) => frustum.classify(aabb),
            None => Intersection::Inside,
        }
    }

    /// Unit forward vector in world space.
    pub fn look_vector(&self) -> Vec3 {
        self.rotation.inverse() * Vec3::NEG_Z
    }

    /// World-space ray direction through a point in normalized device
    /// coordinates, `(-1, -1)` being the bottom-left corner.
    pub fn picking_vector(&self, ndc: Vec2) -> Vec3 {
        let inverse = self.view_projection().inverse();
        let near = inverse.project_point3(Vec3::new(ndc.x, ndc.y, -1.0));
        let direction = near - self.position;
        if direction.length_squared() <= f32::EPSILON {
            self.look_vector()
        } else {
            direction.normalize()
        }
    }

    /// Depth the G-buffer stores for a world-space point.
    pub fn gpu_depth(&self, point: Vec3) -> f32 {
        self.gpu_view_projection().project_point3(point).z
    }

    pub fn apply_uniforms(&self, uniforms: &mut FrameUniforms) {
        uniforms.view = self.view;
        uniforms.projection = self.gpu_projection();
        uniforms.camera_position = self.position;
        uniforms.near = self.near;
        uniforms.far = self.far;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn near_plane_maps_to_minus_one() {
        let near = 0.1;
        let projection = build_projection(near, 100.0, 90.0, 16.0 / 9.0);
        let ndc = projection.project_point3(Vec3::new(0.0, 0.0, -near));
        assert!((ndc.z + 1.0).abs() < 1e-5, "got {}", ndc.z);
    }

    #[test]
    fn depth_increases_with_distance_and_stays_below_one() {
        let projection = build_projection(0.1, 100.0, 60.0, 1.0);
        let mut previous = -1.0;
        for distance in [0.5, 1.0, 10.0, 1.0e3, 1.0e5] {
            let z = projection.project_point3(Vec3::new(0.0, 0.0, -distance)).z;
            assert!(z > previous && z < 1.0, "distance {distance} gave {z}");
            previous = z;
        }
    }

    #[test]
    fn huge_far_values_stay_finite() {
        for far in [1.0, 1.0e3, 1.0e6, f32::INFINITY] {
            let projection = build_projection(0.01, far, 75.0, 1.5);
            assert!(projection.to_cols_array().iter().all(|v| v.is_finite()));
        }
    }

    #[test]
    fn degenerate_aspect_falls_back_to_square() {
        let square = build_projection(0.1, 10.0, 90.0, 1.0);
        assert_eq!(build_projection(0.1, 10.0, 90.0, 0.0), square);
        assert_eq!(build_projection(0.1, 10.0, 90.0, f32::NAN), square);
    }

    #[test]
    fn gpu_depth_of_near_plane_is_zero() {
        let mut camera = Camera::new(0.1, 100.0, 90.0).unwrap();
        camera.update(1.0, true);
        let depth = camera.gpu_depth(Vec3::new(0.0, 0.0, -0.1));
        assert!(depth.abs() < 1e-5);
    }

    #[test]
    fn rejects_invalid_clip_setup() {
        assert!(Camera::new(0.0, 10.0, 90.0).is_err());
        assert!(Camera::new(5.0, 1.0, 90.0).is_err());
        assert!(Camera::new(0.1, 10.0, 180.0).is_err());
    }

    #[test]
    fn look_at_points_forward_at_target() {
        let mut camera = Camera::new(0.1, 100.0, 90.0).unwrap();
        camera.position = Vec3::new(0.0, 2.0, 5.0);
        camera.look_at(Vec3::ZERO);
        let expected = (Vec3::ZERO - camera.position).normalize();
        assert!(camera.look_vector().distance(expected) < 1e-4);
    }

    #[test]
    fn look_at_own_position_keeps_rotation() {
        let mut camera = Camera::new(0.1, 100.0, 90.0).unwrap();
        camera.position = Vec3::ONE;
        camera.rotation = Quat::from_rotation_y(0.3);
        camera.look_at(Vec3::ONE);
        assert_eq!(camera.rotation, Quat::from_rotation_y(0.3));
        assert!(camera.look_vector().is_finite());
    }

    #[test]
    fn look_at_straight_down_is_finite() {
        let mut camera = Camera::new(0.1, 100.0, 90.0).unwrap();
        camera.position = Vec3::new(0.0, 10.0, 0.0);
        camera.look_at(Vec3::ZERO);
        assert!(camera.look_vector().distance(Vec3::NEG_Y) < 1e-4);
    }

    #[test]
    fn frozen_frustum_survives_camera_motion() {
        let mut camera = Camera::new(0.1, 100.0, 90.0).unwrap();
        camera.update(1.0, true);
        let frozen = *camera.frustum().unwrap();
        camera.position = Vec3::new(10.0, 0.0, 0.0);
        camera.update(1.0, false);
        assert_eq!(*camera.frustum().unwrap(), frozen);
        camera.update(1.0, true);
        assert_ne!(*camera.frustum().unwrap(), frozen);
    }

    #[test]
    fn camera_without_frustum_sees_everything() {
        let camera = Camera::new(0.1, 100.0, 90.0).unwrap();
        let behind = Aabb::new(Vec3::new(0.0, 0.0, 50.0), Vec3::ONE);
        assert_eq!(camera.classify(&behind), Intersection::Inside);
    }

    #[test]
    fn picking_vector_through_centre_matches_look_vector() {
        let mut camera = Camera::new(0.1, 100.0, 70.0).unwrap();
        camera.position = Vec3::new(1.0, 2.0, 3.0);
        camera.look_at(Vec3::new(-2.0, 0.0, -4.0));
        camera.update(1.5, true);
        let ray = camera.picking_vector(Vec2::ZERO);
        assert!(ray.distance(camera.look_vector()) < 1e-3);
    }
}
