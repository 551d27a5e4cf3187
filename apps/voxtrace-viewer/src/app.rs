//! Viewer application: an orbiting camera around a pulsing sphere.

use glam::Vec3;
use tracing::info;
use voxtrace_app::{Camera, EngineConfig, OctreeLayout, VoxtraceApp};

use crate::scene::PulsingSphere;

/// Orbit angular speed in radians per second.
const ORBIT_SPEED: f32 = 0.4;

/// Distance from the orbit center.
const ORBIT_RADIUS: f32 = 1.6;

/// Height of the camera above the orbit center.
const ORBIT_HEIGHT: f32 = 0.5;

/// Camera circling the octree cube.
#[derive(Debug, Clone, Copy)]
pub struct Orbit {
    pub center: Vec3,
    pub radius: f32,
    pub height: f32,
    pub angle: f32,
}

impl Default for Orbit {
    fn default() -> Self {
        Self {
            center: PulsingSphere::CENTER,
            radius: ORBIT_RADIUS,
            height: ORBIT_HEIGHT,
            angle: 0.0,
        }
    }
}

impl Orbit {
    pub fn position(&self) -> Vec3 {
        self.center
            + Vec3::new(
                self.angle.cos() * self.radius,
                self.height,
                self.angle.sin() * self.radius,
            )
    }

    /// Place the camera on the orbit, facing the center.
    pub fn apply(&self, camera: &mut Camera) {
        camera.position = self.position();
        camera.look_at(self.center);
    }

    pub fn advance(&mut self, dt: f32) {
        self.angle = (self.angle + ORBIT_SPEED * dt) % std::f32::consts::TAU;
    }
}

/// Viewer application state.
pub struct Viewer {
    orbit: Orbit,
}

impl VoxtraceApp for Viewer {
    type Mutator = PulsingSphere;

    fn init(config: &EngineConfig, camera: &mut Camera) -> anyhow::Result<Self> {
        let orbit = Orbit::default();
        orbit.apply(camera);
        info!(
            "Viewer initialized: octree depth {}, present mode {:?}",
            config.octree_depth, config.present_mode
        );
        Ok(Self { orbit })
    }

    fn mutator(&mut self, layout: OctreeLayout) -> PulsingSphere {
        PulsingSphere::new(layout)
    }

    fn update(&mut self, camera: &mut Camera, dt: f32) {
        self.orbit.advance(dt);
        self.orbit.apply(camera);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn orbit_keeps_distance() {
        let mut orbit = Orbit::default();
        for _ in 0..10 {
            orbit.advance(0.5);
            let offset = orbit.position() - orbit.center;
            assert_relative_eq!(offset.y, ORBIT_HEIGHT);
            assert_relative_eq!(offset.x.hypot(offset.z), ORBIT_RADIUS, epsilon = 1e-5);
        }
    }

    #[test]
    fn camera_faces_center() {
        let mut camera = Camera::default();
        let mut viewer = Viewer::init(&EngineConfig::default(), &mut camera).unwrap();
        viewer.update(&mut camera, 1.0);

        let expected = (viewer.orbit.center - camera.position).normalize();
        assert_relative_eq!(camera.direction.dot(expected), 1.0, epsilon = 1e-5);
    }
}
