//! Viewer camera
//!
//! CAD viewers orbit a point of interest, so the camera is stored as an eye
//! position looking at a target rather than as a free-flying orientation.

use crate::core::types::{Mat4, Vec3};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Camera {
    pub position: Vec3,
    /// Point the camera looks at
    pub target: Vec3,
    pub up: Vec3,
    /// Vertical field of view in radians
    pub fov_y: f32,
    /// Width over height
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
}

impl Camera {
    /// Camera at `position` looking down -Z
    pub fn new(position: Vec3, fov_y_degrees: f32, aspect: f32) -> Self {
        Self {
            position,
            target: position - Vec3::Z,
            up: Vec3::Y,
            fov_y: fov_y_degrees.to_radians(),
            aspect,
            near: 0.1,
            far: 10000.0,
        }
    }

    /// 60 degree, 16:9 camera at `position` looking at `target`
    pub fn look_at(position: Vec3, target: Vec3, up: Vec3) -> Self {
        Self {
            target,
            up,
            ..Self::new(position, 60.0, 16.0 / 9.0)
        }
    }

    pub fn with_clip(mut self, near: f32, far: f32) -> Self {
        self.near = near;
        self.far = far;
        self
    }

    /// World to view
    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(self.position, self.target, self.up)
    }

    /// View to clip, depth in [0, 1]
    pub fn projection_matrix(&self) -> Mat4 {
        Mat4::perspective_rh(self.fov_y, self.aspect, self.near, self.far)
    }

    pub fn view_projection(&self) -> Mat4 {
        self.projection_matrix() * self.view_matrix()
    }

    /// Height of the view plane at `distance`, i.e. `2 * d * tan(fov / 2)`
    pub fn screen_height_at(&self, distance: f32) -> f32 {
        2.0 * distance * (self.fov_y * 0.5).tan()
    }
}

impl Default for Camera {
    fn default() -> Self {
        Self::new(Vec3::new(0.0, 0.0, 5.0), 60.0, 16.0 / 9.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn view_space(camera: &Camera, point: Vec3) -> Vec3 {
        camera.view_matrix().transform_point3(point)
    }

    #[test]
    fn test_default_looks_down_negative_z() {
        let camera = Camera::default();
        let ahead = view_space(&camera, Vec3::new(0.0, 0.0, -5.0));
        assert!(ahead.x.abs() < 1e-5 && ahead.y.abs() < 1e-5);
        assert!((ahead.z + 10.0).abs() < 1e-4);
    }

    #[test]
    fn test_look_at() {
        let camera = Camera::look_at(Vec3::new(0.0, 0.0, 10.0), Vec3::new(10.0, 0.0, 10.0), Vec3::Y);

        // The target ends up straight ahead in view space
        let target = view_space(&camera, camera.target);
        assert!(target.x.abs() < 1e-4 && target.y.abs() < 1e-4);
        assert!((target.z + 10.0).abs() < 1e-4);
    }

    #[test]
    fn test_projection_depth_range() {
        let camera = Camera::default().with_clip(1.0, 100.0);
        let vp = camera.view_projection();
        let near = vp.project_point3(Vec3::new(0.0, 0.0, 4.0));
        let far = vp.project_point3(Vec3::new(0.0, 0.0, -95.0));
        assert!(near.z.abs() < 1e-4);
        assert!((far.z - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_screen_height() {
        let camera = Camera::new(Vec3::ZERO, 90.0, 1.0);
        // tan(45deg) == 1
        assert!((camera.screen_height_at(10.0) - 20.0).abs() < 1e-4);
    }
}
