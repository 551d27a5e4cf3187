//! Application hooks driven by the runner.

use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use voxtrace_core::{CameraSource, CameraTransform, OctreeLayout};
use voxtrace_render::Camera;
use winit::event::WindowEvent;

use crate::config::EngineConfig;

/// Background producer of octree contents.
///
/// Runs on its own thread and writes straight into the staging buffer.
pub trait OctreeMutator: Send + 'static {
    /// Overwrite the octree words. Returning `false` stops the mutator.
    fn mutate(&mut self, words: &mut [u32]) -> bool;

    /// Pause between two writes.
    fn interval(&self) -> Duration {
        Duration::from_millis(16)
    }
}

/// Trait for applications driven by [`run_app`](crate::run_app).
///
/// All hooks run on the event loop thread.
pub trait VoxtraceApp: Sized + 'static {
    type Mutator: OctreeMutator;

    /// Create the application. The camera's aspect already matches the
    /// window.
    fn init(config: &EngineConfig, camera: &mut Camera) -> anyhow::Result<Self>;

    /// Build the mutator for the allocated octree layout.
    fn mutator(&mut self, layout: OctreeLayout) -> Self::Mutator;

    /// Advance by `dt` seconds.
    fn update(&mut self, camera: &mut Camera, dt: f32);

    /// Handle a window event. Return `true` to consume it.
    fn on_event(&mut self, _event: &WindowEvent) -> bool {
        false
    }
}

/// Camera written by the event loop and sampled by the render thread.
#[derive(Clone, Default)]
pub struct SharedCamera {
    inner: Arc<RwLock<Camera>>,
}

impl SharedCamera {
    pub fn new(camera: Camera) -> Self {
        Self {
            inner: Arc::new(RwLock::new(camera)),
        }
    }

    /// Modify the camera in place.
    pub fn update(&self, f: impl FnOnce(&mut Camera)) {
        f(&mut self.inner.write());
    }
}

impl CameraSource for SharedCamera {
    fn transform(&self) -> CameraTransform {
        self.inner.read().transform()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    #[test]
    fn shared_camera_reflects_updates() {
        let shared = SharedCamera::new(Camera::default());
        let reader = shared.clone();

        shared.update(|camera| camera.position = Vec3::new(1.0, 2.0, 3.0));

        assert_eq!(reader.transform().position, [1.0, 2.0, 3.0, 1.0]);
    }
}
