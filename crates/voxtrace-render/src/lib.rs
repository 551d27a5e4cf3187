//! Compute ray casting renderer for the Voxtrace engine.
//!
//! This crate provides:
//! - Octree, staging and lighting buffers
//! - Swapchain generations rebuilt on resize
//! - Pre-recorded raycast, lighting and render command buffers
//! - Staging handoff between the octree mutator and the render loop
//! - The frame loop and its Vulkan backend
//! - Camera and view management

pub mod buffers;
pub mod camera;
pub mod frame;
pub mod generation;
pub mod pipelines;
pub mod recorder;
pub mod renderer;
pub mod upload;

pub use buffers::OctreeBuffers;
pub use camera::Camera;
pub use frame::{
    wait_for_framebuffer, Acquire, FrameBackend, FrameCursor, FrameLoop, FrameOutcome, FrameStats,
    Present,
};
pub use generation::{GenerationConfig, SwapchainGeneration};
pub use pipelines::{PipelineSet, RaycastSpecialization};
pub use recorder::{table_index, CommandBufferTable, FramePlan, FrameVariant, PlanStep, Stage};
pub use renderer::VulkanRenderer;
pub use upload::{
    upload_channel, StagingRegion, StagingWriteGuard, StagingWriter, UploadCloser, UploadReceiver,
};
