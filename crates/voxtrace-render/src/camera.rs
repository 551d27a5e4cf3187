//! Pinhole camera producing the raycast transform record.

use glam::Vec3;
use voxtrace_core::{CameraSource, CameraTransform};

/// Camera for rendering.
#[derive(Debug, Clone)]
pub struct Camera {
    pub position: Vec3,
    pub direction: Vec3,
    pub up: Vec3,
    /// Vertical field of view in radians.
    pub fov: f32,
    pub aspect: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.5, 0.5, -1.0),
            direction: Vec3::Z,
            up: Vec3::Y,
            fov: std::f32::consts::FRAC_PI_3,
            aspect: 4.0 / 3.0,
        }
    }
}

impl Camera {
    /// Create a camera looking at `target`.
    pub fn looking_at(position: Vec3, target: Vec3, fov: f32, aspect: f32) -> Self {
        Self {
            position,
            direction: (target - position).normalize(),
            up: Vec3::Y,
            fov,
            aspect,
        }
    }

    /// Look at a target position.
    pub fn look_at(&mut self, target: Vec3) {
        self.direction = (target - self.position).normalize();
    }

    /// Set the aspect ratio from a framebuffer size.
    pub fn set_viewport(&mut self, width: u32, height: u32) {
        if width > 0 && height > 0 {
            self.aspect = width as f32 / height as f32;
        }
    }

    /// Right vector of the image plane, unit length.
    pub fn right(&self) -> Vec3 {
        self.direction.cross(self.up).normalize()
    }
}

impl CameraSource for Camera {
    /// Image plane one unit in front of the eye, spanned by half extents.
    fn transform(&self) -> CameraTransform {
        let direction = self.direction.normalize();
        let right = self.right();
        let up = right.cross(direction);
        let half_height = (self.fov * 0.5).tan();
        let half_width = half_height * self.aspect;

        CameraTransform::new(
            self.position,
            direction,
            direction,
            right * half_width,
            up * half_height,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn plane_spans_field_of_view() {
        let camera = Camera {
            position: Vec3::ZERO,
            direction: Vec3::NEG_Z,
            up: Vec3::Y,
            fov: std::f32::consts::FRAC_PI_2,
            aspect: 2.0,
        };
        let t = camera.transform();

        assert_relative_eq!(t.plane[2], -1.0);
        // tan(45 deg) = 1
        assert_relative_eq!(t.plane_up[1], 1.0, epsilon = 1e-6);
        assert_relative_eq!(t.plane_right[0], 2.0, epsilon = 1e-6);
        assert_eq!(t.position[3], 1.0);
    }

    #[test]
    fn basis_is_orthogonal() {
        let camera = Camera::looking_at(Vec3::new(3.0, 2.0, 1.0), Vec3::ZERO, 1.0, 1.5);
        let t = camera.transform();
        let dir = Vec3::from_slice(&t.direction[..3]);
        let right = Vec3::from_slice(&t.plane_right[..3]);
        let up = Vec3::from_slice(&t.plane_up[..3]);

        assert_relative_eq!(dir.length(), 1.0, epsilon = 1e-6);
        assert_relative_eq!(dir.dot(right), 0.0, epsilon = 1e-6);
        assert_relative_eq!(dir.dot(up), 0.0, epsilon = 1e-6);
        assert_relative_eq!(right.dot(up), 0.0, epsilon = 1e-6);
    }

    #[test]
    fn viewport_ignores_zero_size() {
        let mut camera = Camera::default();
        camera.set_viewport(800, 400);
        assert_relative_eq!(camera.aspect, 2.0);
        camera.set_viewport(0, 0);
        assert_relative_eq!(camera.aspect, 2.0);
    }
}
