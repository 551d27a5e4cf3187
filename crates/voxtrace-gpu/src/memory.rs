//! GPU memory management.

use crate::error::{GpuError, Result};
use ash::vk;
use gpu_allocator::vulkan::{
    Allocation, AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc,
};
use gpu_allocator::MemoryLocation;
use std::sync::Arc;

/// How a buffer is accessed, independent of the allocator's vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryPolicy {
    /// Only the GPU touches the memory.
    DeviceLocal,
    /// Host writes through a persistent mapping and the GPU reads
    /// (staging, per-frame uniforms).
    HostSequentialWrite,
}

impl MemoryPolicy {
    /// Allocator memory location for this policy.
    pub fn location(self) -> MemoryLocation {
        match self {
            Self::DeviceLocal => MemoryLocation::GpuOnly,
            Self::HostSequentialWrite => MemoryLocation::CpuToGpu,
        }
    }

    /// Whether allocations with this policy are host mapped.
    pub fn is_mapped(self) -> bool {
        !matches!(self, Self::DeviceLocal)
    }
}

/// Owns the `gpu-allocator` instance for one device.
///
/// Buffers are freed explicitly through [`GpuAllocator::free_buffer`];
/// whatever is left at [`GpuAllocator::shutdown`] is reported as leaked.
pub struct GpuAllocator {
    allocator: Option<Allocator>,
    device: Arc<ash::Device>,
}

impl GpuAllocator {
    /// # Safety
    /// The instance, device and physical device must be valid and outlive
    /// the allocator.
    pub unsafe fn new(
        instance: &ash::Instance,
        device: Arc<ash::Device>,
        physical_device: vk::PhysicalDevice,
    ) -> Result<Self> {
        let debug_settings = gpu_allocator::AllocatorDebugSettings {
            log_memory_information: cfg!(debug_assertions),
            log_leaks_on_shutdown: true,
            ..Default::default()
        };
        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: (*device).clone(),
            physical_device,
            debug_settings,
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })
        .map_err(|e| GpuError::Allocation(e.to_string()))?;

        Ok(Self {
            allocator: Some(allocator),
            device,
        })
    }

    fn allocator(&mut self) -> Result<&mut Allocator> {
        self.allocator
            .as_mut()
            .ok_or_else(|| GpuError::InvalidState("Allocator already shut down".to_string()))
    }

    /// Create an exclusive buffer of `size` bytes backed by memory chosen
    /// from `policy`. `name` shows up in leak reports.
    pub fn create_buffer(
        &mut self,
        size: u64,
        usage: vk::BufferUsageFlags,
        policy: MemoryPolicy,
        name: &str,
    ) -> Result<GpuBuffer> {
        let info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = unsafe { self.device.create_buffer(&info, None)? };
        let requirements = unsafe { self.device.get_buffer_memory_requirements(buffer) };

        let desc = AllocationCreateDesc {
            name,
            requirements,
            location: policy.location(),
            linear: true,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        };
        let allocation = match self.allocator().and_then(|a| {
            a.allocate(&desc)
                .map_err(|e| GpuError::Allocation(format!("{name}: {e}")))
        }) {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { self.device.destroy_buffer(buffer, None) };
                return Err(e);
            }
        };

        let mut gpu_buffer = GpuBuffer {
            buffer,
            allocation: Some(allocation),
            size,
        };
        let memory = allocation_memory(&gpu_buffer);
        let offset = allocation_offset(&gpu_buffer);
        let bound = unsafe { self.device.bind_buffer_memory(buffer, memory, offset) };
        if let Err(e) = bound {
            self.free_buffer(&mut gpu_buffer)?;
            return Err(e.into());
        }

        tracing::debug!("Allocated buffer '{name}' ({size} bytes, {policy:?})");
        Ok(gpu_buffer)
    }

    /// Release the allocation and destroy the buffer. Calling it twice on
    /// the same buffer is a no-op.
    pub fn free_buffer(&mut self, buffer: &mut GpuBuffer) -> Result<()> {
        if let Some(allocation) = buffer.allocation.take() {
            self.allocator()?
                .free(allocation)
                .map_err(|e| GpuError::Allocation(e.to_string()))?;
        }
        if buffer.buffer != vk::Buffer::null() {
            unsafe { self.device.destroy_buffer(buffer.buffer, None) };
            buffer.buffer = vk::Buffer::null();
        }
        Ok(())
    }

    /// Drop the allocator. Must happen before the device is destroyed.
    pub fn shutdown(&mut self) {
        self.allocator = None;
    }
}

fn allocation_memory(buffer: &GpuBuffer) -> vk::DeviceMemory {
    buffer
        .allocation
        .as_ref()
        .map_or(vk::DeviceMemory::null(), |a| unsafe { a.memory() })
}

fn allocation_offset(buffer: &GpuBuffer) -> vk::DeviceSize {
    buffer.allocation.as_ref().map_or(0, Allocation::offset)
}

impl Drop for GpuAllocator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Buffer handle plus the allocation backing it.
pub struct GpuBuffer {
    pub buffer: vk::Buffer,
    pub allocation: Option<Allocation>,
    pub size: u64,
}

/// Byte range `offset..offset + len` if it fits in `size`.
fn byte_range(size: u64, offset: u64, len: usize) -> Result<std::ops::Range<usize>> {
    let end = offset
        .checked_add(len as u64)
        .filter(|&end| end <= size)
        .ok_or_else(|| {
            GpuError::InvalidState(format!(
                "Write of {len} bytes at offset {offset} exceeds buffer of {size} bytes"
            ))
        })?;
    Ok(offset as usize..end as usize)
}

impl GpuBuffer {
    /// Host pointer to the start of the buffer, if its memory is mapped.
    pub fn mapped_ptr(&self) -> Option<*mut u8> {
        let ptr = self.allocation.as_ref()?.mapped_ptr()?;
        Some(ptr.as_ptr().cast::<u8>())
    }

    pub fn write<T: bytemuck::Pod>(&self, data: &[T]) -> Result<()> {
        self.write_bytes(0, bytemuck::cast_slice(data))
    }

    /// Copy `data` into mapped memory at `offset`.
    pub fn write_bytes(&self, offset: u64, data: &[u8]) -> Result<()> {
        let ptr = self
            .mapped_ptr()
            .ok_or_else(|| GpuError::InvalidState("Buffer not mapped".to_string()))?;
        let range = byte_range(self.size, offset, data.len())?;

        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), ptr.add(range.start), range.len());
        }
        Ok(())
    }
}
