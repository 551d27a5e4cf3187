//! Core types and collaborator contracts for the Voxtrace renderer.
//!
//! This crate provides the types shared between the renderer and the
//! systems that feed it:
//! - Camera transform record and the `CameraSource` accessor
//! - Octree buffer layout (depth and word capacity)
//! - Framebuffer size polling for resize handling

pub mod camera;
pub mod octree;
pub mod window;

pub use camera::{CameraSource, CameraTransform};
pub use octree::OctreeLayout;
pub use window::{FramebufferSize, FramebufferSource};

/// Engine-wide constants
pub mod constants {
    /// Default number of frames the CPU may record ahead of the GPU.
    pub const DEFAULT_MAX_FRAMES_IN_FLIGHT: usize = 2;
    /// Default octree depth baked into the raycast pipeline.
    pub const DEFAULT_OCTREE_DEPTH: u32 = 8;
    /// Deepest octree the renderer will size buffers for.
    pub const MAX_OCTREE_DEPTH: u32 = 9;
    /// Default window title.
    pub const DEFAULT_TITLE: &str = "Voxtrace";
}
