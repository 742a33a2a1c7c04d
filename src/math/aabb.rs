//! Sector bounding boxes

use crate::core::types::{Mat4, Vec3};

/// Axis-aligned box in model or world space
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    pub fn center(&self) -> Vec3 {
        self.min.lerp(self.max, 0.5)
    }

    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }

    /// `min <= max` on every axis and nothing is NaN
    pub fn is_valid(&self) -> bool {
        self.min.cmple(self.max).all()
    }

    /// Grow by `margin` on every side
    pub fn inflated(&self, margin: f32) -> Aabb {
        Aabb::new(self.min - Vec3::splat(margin), self.max + Vec3::splat(margin))
    }

    /// Whether `inner` fits entirely inside
    pub fn encloses(&self, inner: &Aabb) -> bool {
        self.min.cmple(inner.min).all() && inner.max.cmple(self.max).all()
    }

    /// Euclidean distance to the nearest point of the box; 0 inside
    pub fn distance_to_point(&self, p: Vec3) -> f32 {
        let outside = (self.min - p).max(p - self.max).max(Vec3::ZERO);
        outside.length()
    }

    /// Box corner selected by the low three bits of `index` (x, y, z)
    pub fn corner(&self, index: usize) -> Vec3 {
        Vec3::select(
            glam::BVec3::new(index & 1 != 0, index & 2 != 0, index & 4 != 0),
            self.max,
            self.min,
        )
    }

    /// Smallest box holding this one after `m` is applied
    pub fn transformed(&self, m: &Mat4) -> Aabb {
        let mut min = Vec3::splat(f32::INFINITY);
        let mut max = Vec3::splat(f32::NEG_INFINITY);
        for i in 0..8 {
            let p = m.transform_point3(self.corner(i));
            min = min.min(p);
            max = max.max(p);
        }
        Aabb::new(min, max)
    }
}
