//! View frustum and clipping-plane tests

use crate::core::types::{Mat4, Vec3, Vec4};
use super::aabb::Aabb;

/// A plane defined by normal and distance from origin
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Plane {
    pub normal: Vec3,
    pub distance: f32,
}

impl Plane {
    pub fn new(normal: Vec3, distance: f32) -> Self {
        Self { normal, distance }
    }

    /// Plane from `(a, b, c, d)` coefficients, normalized
    pub fn from_coefficients(v: Vec4) -> Self {
        let normal = v.truncate();
        let len = normal.length();
        if len <= f32::EPSILON {
            return Self { normal, distance: v.w };
        }
        Self {
            normal: normal / len,
            distance: v.w / len,
        }
    }

    /// Signed distance from point to plane (positive = in front)
    pub fn distance_to_point(&self, point: Vec3) -> f32 {
        self.normal.dot(point) + self.distance
    }

    /// Express a world-space plane in the space that `to_world` maps from.
    pub fn in_local_space(&self, to_world: &Mat4) -> Plane {
        let v = to_world.transpose() * self.normal.extend(self.distance);
        Self::from_coefficients(v)
    }

    /// Corner of `aabb` furthest along the normal
    fn positive_vertex(&self, aabb: &Aabb) -> Vec3 {
        Vec3::new(
            if self.normal.x >= 0.0 { aabb.max.x } else { aabb.min.x },
            if self.normal.y >= 0.0 { aabb.max.y } else { aabb.min.y },
            if self.normal.z >= 0.0 { aabb.max.z } else { aabb.min.z },
        )
    }

    /// True if the whole box lies on the negative side
    pub fn rejects(&self, aabb: &Aabb) -> bool {
        self.distance_to_point(self.positive_vertex(aabb)) < 0.0
    }
}

/// View frustum with 6 planes (Near, Far, Left, Right, Top, Bottom)
#[derive(Clone, Copy, Debug)]
pub struct Frustum {
    pub planes: [Plane; 6],
}

impl Frustum {
    /// Extract frustum planes from a (model-)view-projection matrix with
    /// clip depth in [0, 1]. Planes end up in the space the matrix maps from.
    pub fn from_view_projection(vp: &Mat4) -> Self {
        let (r0, r1, r2, r3) = (vp.row(0), vp.row(1), vp.row(2), vp.row(3));
        Self {
            planes: [
                Plane::from_coefficients(r2),
                Plane::from_coefficients(r3 - r2),
                Plane::from_coefficients(r3 + r0),
                Plane::from_coefficients(r3 - r0),
                Plane::from_coefficients(r3 - r1),
                Plane::from_coefficients(r3 + r1),
            ],
        }
    }

    /// Check if point is inside frustum
    pub fn contains_point(&self, point: Vec3) -> bool {
        self.planes.iter().all(|p| p.distance_to_point(point) >= 0.0)
    }

    /// Conservative AABB test, p-vertex against every plane
    pub fn intersects_aabb(&self, aabb: &Aabb) -> bool {
        !self.planes.iter().any(|p| p.rejects(aabb))
    }
}

/// Whether a box survives the active clipping planes.
///
/// In union mode a box is clipped when it lies behind any plane. In
/// intersection mode only the region behind every plane is clipped, so the
/// box is rejected only when it is behind all of them.
pub fn passes_clipping(aabb: &Aabb, planes: &[Plane], intersection: bool) -> bool {
    if planes.is_empty() {
        return true;
    }
    if intersection {
        !planes.iter().all(|p| p.rejects(aabb))
    } else {
        !planes.iter().any(|p| p.rejects(aabb))
    }
}
