//! Long-lived octree buffers.

use crate::upload::StagingRegion;
use ash::vk;
use std::ptr::NonNull;
use std::sync::Arc;
use voxtrace_core::OctreeLayout;
use voxtrace_gpu::error::{GpuError, Result};
use voxtrace_gpu::memory::{GpuBuffer, MemoryPolicy};
use voxtrace_gpu::GpuContext;

/// Staging, octree and lighting buffers, each `capacity` words long.
///
/// They survive swapchain recreation and are freed through the allocator
/// on drop.
pub struct OctreeBuffers {
    gpu: Arc<GpuContext>,
    layout: OctreeLayout,
    pub staging: GpuBuffer,
    pub octree: GpuBuffer,
    pub lighting: GpuBuffer,
}

impl OctreeBuffers {
    pub fn new(gpu: Arc<GpuContext>, layout: OctreeLayout) -> Result<Self> {
        if layout.capacity == 0 {
            return Err(GpuError::InvalidState(
                "Octree capacity must be nonzero".to_string(),
            ));
        }

        let size = layout.byte_size();
        let (staging, octree, lighting) = {
            let mut allocator = gpu.allocator().lock();
            let staging = allocator.create_buffer(
                size,
                vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::TRANSFER_SRC,
                MemoryPolicy::HostSequentialWrite,
                "octree_staging",
            )?;
            let octree = allocator.create_buffer(
                size,
                vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
                MemoryPolicy::DeviceLocal,
                "octree",
            )?;
            let lighting = allocator.create_buffer(
                size,
                vk::BufferUsageFlags::STORAGE_BUFFER,
                MemoryPolicy::DeviceLocal,
                "lighting",
            )?;
            (staging, octree, lighting)
        };

        tracing::info!(
            "Octree buffers allocated: depth {}, {} words, {} MB each",
            layout.depth,
            layout.capacity,
            size / (1024 * 1024)
        );

        Ok(Self {
            gpu,
            layout,
            staging,
            octree,
            lighting,
        })
    }

    pub fn layout(&self) -> OctreeLayout {
        self.layout
    }

    /// Buffer size in bytes.
    pub fn byte_size(&self) -> u64 {
        self.layout.byte_size()
    }

    /// Mapped view of the staging buffer.
    ///
    /// Valid until these buffers are dropped.
    pub fn staging_region(&self) -> Result<StagingRegion> {
        let ptr = self
            .staging
            .mapped_ptr()
            .and_then(|p| NonNull::new(p.cast::<u32>()))
            .ok_or_else(|| GpuError::InvalidState("Staging buffer not mapped".to_string()))?;
        Ok(unsafe { StagingRegion::new(ptr, self.layout.capacity) })
    }
}

impl Drop for OctreeBuffers {
    fn drop(&mut self) {
        let mut allocator = self.gpu.allocator().lock();
        for buffer in [&mut self.staging, &mut self.octree, &mut self.lighting] {
            if let Err(e) = allocator.free_buffer(buffer) {
                tracing::error!("Failed to free octree buffer: {e}");
            }
        }
    }
}
