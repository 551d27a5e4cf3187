//! Vulkan abstraction layer for the Voxtrace renderer.
//!
//! This crate provides:
//! - Vulkan instance, debug messenger and device management
//! - GPU capability detection
//! - Memory allocation via gpu-allocator
//! - Swapchain negotiation and handling
//! - Command buffer, descriptor and compute pipeline helpers
//! - Frame synchronization primitives

pub mod capabilities;
pub mod command;
pub mod context;
pub mod descriptors;
pub mod error;
pub mod instance;
pub mod memory;
pub mod pipeline;
pub mod surface;
pub mod swapchain;
pub mod sync;

pub use capabilities::{GpuCapabilities, GpuVendor, Unsupported};
pub use command::{CommandPool, Submission};
pub use context::{GpuContext, GpuContextBuilder, QueueFamilies};
pub use descriptors::{DescriptorPool, DescriptorSetLayoutBuilder, DescriptorWrites};
pub use error::{GpuError, Result};
pub use instance::DiagnosticSeverity;
pub use memory::{GpuAllocator, GpuBuffer, MemoryPolicy};
pub use pipeline::{u32_specialization_entries, ComputePipeline};
pub use surface::{SurfaceContext, SurfaceSupport};
pub use swapchain::{PresentModePolicy, Swapchain, SwapchainPlan};
pub use sync::{FrameSlot, FrameSlots};
