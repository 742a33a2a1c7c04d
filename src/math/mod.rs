//! Bounding volumes and culling primitives

pub mod aabb;
pub mod frustum;

pub use aabb::Aabb;
pub use frustum::{Plane, Frustum, passes_clipping};
