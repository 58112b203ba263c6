use glam::{Mat4, Vec3, Vec4};
use serde::{Deserialize, Serialize};

/// Plane in Hessian form: points with `normal·p + distance >= 0` lie inside.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Plane {
    pub normal: Vec3,
    pub distance: f32,
}

impl Plane {
    pub fn new(normal: Vec3, distance: f32) -> Self {
        Self { normal, distance }
    }

    /// Builds a plane from `(a, b, c, d)` coefficients, normalized by the
    /// length of `(a, b, c)`. Zero-length normals are left untouched.
    pub fn from_coefficients(coefficients: Vec4) -> Self {
        let length = coefficients.truncate().length();
        let coefficients = if length > f32::EPSILON {
            coefficients / length
        } else {
            coefficients
        };
        Self {
            normal: coefficients.truncate(),
            distance: coefficients.w,
        }
    }

    pub fn signed_distance(&self, point: Vec3) -> f32 {
        self.normal.dot(point) + self.distance
    }
}

/// Result of testing a volume against the frustum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Intersection {
    Inside,
    Outside,
    Intersect,
}

/// Axis-aligned box stored as centre and half extents.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    pub center: Vec3,
    pub half_extents: Vec3,
}

impl Aabb {
    pub fn new(center: Vec3, half_extents: Vec3) -> Self {
        Self {
            center,
            half_extents: half_extents.abs(),
        }
    }

    pub fn from_min_max(min: Vec3, max: Vec3) -> Self {
        Self::new((min + max) * 0.5, (max - min) * 0.5)
    }

    /// Smallest box enclosing every point, or `None` for an empty input.
    pub fn from_points(points: impl IntoIterator<Item = Vec3>) -> Option<Self> {
        let mut points = points.into_iter();
        let first = points.next()?;
        let (min, max) = points.fold((first, first), |(min, max), p| (min.min(p), max.max(p)));
        Some(Self::from_min_max(min, max))
    }

    pub fn min(&self) -> Vec3 {
        self.center - self.half_extents
    }

    pub fn max(&self) -> Vec3 {
        self.center + self.half_extents
    }

    pub fn contains(&self, point: Vec3) -> bool {
        let offset = (point - self.center).abs();
        offset.cmple(self.half_extents).all()
    }

    /// Corner reaching furthest along `direction`.
    pub fn furthest_point(&self, direction: Vec3) -> Vec3 {
        let sign = Vec3::new(
            if direction.x >= 0.0 { 1.0 } else { -1.0 },
            if direction.y >= 0.0 { 1.0 } else { -1.0 },
            if direction.z >= 0.0 { 1.0 } else { -1.0 },
        );
        self.center + self.half_extents * sign
    }

    pub fn corners(&self) -> [Vec3; 8] {
        let (min, max) = (self.min(), self.max());
        [
            Vec3::new(min.x, min.y, min.z),
            Vec3::new(max.x, min.y, min.z),
            Vec3::new(min.x, max.y, min.z),
            Vec3::new(max.x, max.y, min.z),
            Vec3::new(min.x, min.y, max.z),
            Vec3::new(max.x, min.y, max.z),
            Vec3::new(min.x, max.y, max.z),
            Vec3::new(max.x, max.y, max.z),
        ]
    }

    /// World-space box enclosing this box after `transform`.
    pub fn transformed(&self, transform: &Mat4) -> Self {
        let corners = self.corners().map(|corner| transform.transform_point3(corner));
        Self::from_points(corners).unwrap_or(*self)
    }
}

/// Plane order inside a [`Frustum`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrustumSide {
    Right = 0,
    Left = 1,
    Bottom = 2,
    Top = 3,
    Far = 4,
    Near = 5,
}

/// Six culling planes, ordered right, left, bottom, top, far, near.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Frustum {
    pub planes: [Plane; 6],
}

impl Frustum {
    pub fn from_view_projection(view_projection: Mat4) -> Self {
        Self {
            planes: extract_frustum_planes(view_projection),
        }
    }

    pub fn plane(&self, side: FrustumSide) -> &Plane {
        &self.planes[side as usize]
    }

    pub fn classify(&self, aabb: &Aabb) -> Intersection {
        classify_aabb(aabb, &self.planes)
    }

    pub fn contains_point(&self, point: Vec3) -> bool {
        self.classify(&Aabb::new(point, Vec3::ZERO)) != Intersection::Outside
    }
}

/// Extracts normalized clip planes from a combined view-projection matrix
/// using GL clip conventions.
pub fn extract_frustum_planes(view_projection: Mat4) -> [Plane; 6] {
    let (r0, r1, r2, r3) = (
        view_projection.row(0),
        view_projection.row(1),
        view_projection.row(2),
        view_projection.row(3),
    );
    [
        Plane::from_coefficients(r3 - r0),
        Plane::from_coefficients(r3 + r0),
        Plane::from_coefficients(r3 + r1),
        Plane::from_coefficients(r3 - r1),
        Plane::from_coefficients(r3 - r2),
        Plane::from_coefficients(r3 + r2),
    ]
}

/// Classifies a box against a set of planes. The first plane the box lies
/// fully behind short-circuits to `Outside`.
pub fn classify_aabb(aabb: &Aabb, planes: &[Plane]) -> Intersection {
    let mut intersecting = false;
    for plane in planes {
        let positive = plane.signed_distance(aabb.furthest_point(plane.normal));
        if positive < 0.0 {
            return Intersection::Outside;
        }
        let negative = plane.signed_distance(aabb.furthest_point(-plane.normal));
        if negative <= 0.0 {
            intersecting = true;
        }
    }
    if intersecting {
        Intersection::Intersect
    } else {
        Intersection::Inside
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{build_projection, build_view};
    use glam::Quat;

    fn camera_frustum() -> Frustum {
        let projection = build_projection(0.1, 100.0, 90.0, 1.0);
        let view = build_view(Vec3::ZERO, Quat::IDENTITY);
        Frustum::from_view_projection(projection * view)
    }

    #[test]
    fn point_in_front_is_inside() {
        let frustum = camera_frustum();
        let point = Aabb::new(Vec3::new(0.0, 0.0, -5.0), Vec3::ZERO);
        assert_eq!(frustum.classify(&point), Intersection::Inside);
    }

    #[test]
    fn point_behind_is_outside() {
        let frustum = camera_frustum();
        let point = Aabb::new(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO);
        assert_eq!(frustum.classify(&point), Intersection::Outside);
    }

    #[test]
    fn box_around_camera_is_never_outside() {
        let frustum = camera_frustum();
        for half in [0.5, 3.0, 1000.0] {
            let aabb = Aabb::new(Vec3::ZERO, Vec3::splat(half));
            assert_ne!(frustum.classify(&aabb), Intersection::Outside, "half {half}");
        }
    }

    #[test]
    fn box_crossing_side_plane_intersects() {
        let frustum = camera_frustum();
        let aabb = Aabb::new(Vec3::new(5.0, 0.0, -5.0), Vec3::splat(1.0));
        assert_eq!(frustum.classify(&aabb), Intersection::Intersect);
    }

    #[test]
    fn far_plane_of_infinite_projection_never_rejects() {
        let frustum = camera_frustum();
        let far = frustum.plane(FrustumSide::Far);
        assert_eq!(far.normal, Vec3::ZERO);
        assert!(far.distance > 0.0);
        let distant = Aabb::new(Vec3::new(0.0, 0.0, -1.0e6), Vec3::splat(1.0));
        assert_eq!(frustum.classify(&distant), Intersection::Inside);
    }

    #[test]
    fn planes_are_normalized() {
        let frustum = camera_frustum();
        for (index, plane) in frustum.planes.iter().enumerate() {
            if index == FrustumSide::Far as usize {
                continue;
            }
            assert!((plane.normal.length() - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn nan_planes_never_classify_outside() {
        let planes = [Plane::new(Vec3::NAN, f32::NAN); 6];
        let aabb = Aabb::new(Vec3::ONE, Vec3::ONE);
        assert_ne!(classify_aabb(&aabb, &planes), Intersection::Outside);
    }

    #[test]
    fn transformed_box_encloses_rotated_corners() {
        let aabb = Aabb::new(Vec3::ZERO, Vec3::splat(0.5));
        let rotated = aabb.transformed(&Mat4::from_rotation_y(std::f32::consts::FRAC_PI_4));
        let expected = 0.5 * std::f32::consts::SQRT_2;
        assert!((rotated.half_extents.x - expected).abs() < 1e-5);
        assert!((rotated.half_extents.y - 0.5).abs() < 1e-5);
    }
}
