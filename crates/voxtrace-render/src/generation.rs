//! Swapchain-dependent resources, rebuilt as a unit.
//!
//! Recreating the swapchain means dropping the current generation and
//! constructing a new one. Nothing in a generation survives a resize.

use crate::buffers::OctreeBuffers;
use crate::pipelines::PipelineSet;
use crate::recorder::{record_table, CommandBufferTable, RecordTargets};
use ash::vk;
use std::sync::Arc;
use voxtrace_core::{CameraTransform, FramebufferSize};
use voxtrace_gpu::command::CommandPool;
use voxtrace_gpu::descriptors::{DescriptorPool, DescriptorSetLayoutBuilder, DescriptorWrites};
use voxtrace_gpu::error::Result;
use voxtrace_gpu::memory::{GpuBuffer, MemoryPolicy};
use voxtrace_gpu::surface::SurfaceContext;
use voxtrace_gpu::swapchain::{PresentModePolicy, Swapchain};
use voxtrace_gpu::sync::FrameSlots;
use voxtrace_gpu::GpuContext;
use voxtrace_shaders::ShaderCode;

/// Descriptor bindings shared by all three compute stages.
pub mod bindings {
    pub const CAMERA: u32 = 0;
    pub const OCTREE: u32 = 1;
    pub const LIGHTING: u32 = 2;
    pub const IMAGE: u32 = 3;
}

/// Camera uniforms are rewritten by the host every frame and only read by
/// the GPU.
pub const CAMERA_MEMORY: MemoryPolicy = MemoryPolicy::HostSequentialWrite;

/// Log a failed idle wait during teardown. Returns whether it succeeded.
pub(crate) fn idle_for_teardown(result: Result<()>) -> bool {
    match result {
        Ok(()) => true,
        Err(e) => {
            tracing::error!("Failed to wait for device idle: {e}");
            false
        }
    }
}

/// Settings fixed for the renderer's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenerationConfig {
    pub frames_in_flight: usize,
    pub present_mode: PresentModePolicy,
    pub octree_depth: u32,
}

/// Everything that depends on the swapchain.
pub struct SwapchainGeneration {
    gpu: Arc<GpuContext>,
    swapchain_loader: ash::khr::swapchain::Device,
    command_pool: CommandPool,
    swapchain: Swapchain,
    uniform_buffers: Vec<GpuBuffer>,
    descriptor_pool: DescriptorPool,
    sampler: vk::Sampler,
    descriptor_set_layout: vk::DescriptorSetLayout,
    descriptor_sets: Vec<vk::DescriptorSet>,
    pipelines: PipelineSet,
    command_buffers: CommandBufferTable,
    sync: FrameSlots,
}

impl SwapchainGeneration {
    /// Build a generation for the current surface state.
    ///
    /// # Safety
    /// No other generation may be alive for the same surface.
    pub unsafe fn new(
        gpu: Arc<GpuContext>,
        surface: &SurfaceContext,
        framebuffer: FramebufferSize,
        config: &GenerationConfig,
        shaders: &ShaderCode,
        buffers: &OctreeBuffers,
    ) -> Result<Self> {
        let device = gpu.device();

        let command_pool = CommandPool::reusable(device, gpu.queue_families().compute)?;

        let swapchain = Swapchain::new(&gpu, surface, framebuffer, config.present_mode)?;
        let image_count = swapchain.image_count();

        let mut uniform_buffers = Vec::with_capacity(image_count);
        {
            let mut allocator = gpu.allocator().lock();
            for i in 0..image_count {
                uniform_buffers.push(allocator.create_buffer(
                    CameraTransform::SIZE,
                    vk::BufferUsageFlags::UNIFORM_BUFFER,
                    CAMERA_MEMORY,
                    &format!("camera_uniforms_{i}"),
                )?);
            }
        }

        let layout_builder = DescriptorSetLayoutBuilder::new()
            .uniform_buffer(bindings::CAMERA, vk::ShaderStageFlags::COMPUTE)
            .storage_buffer(bindings::OCTREE, vk::ShaderStageFlags::COMPUTE)
            .storage_buffer(bindings::LIGHTING, vk::ShaderStageFlags::COMPUTE)
            .storage_image(bindings::IMAGE, vk::ShaderStageFlags::COMPUTE);

        let descriptor_pool = DescriptorPool::new(
            device,
            image_count as u32,
            &layout_builder.pool_sizes(image_count as u32),
        )?;

        let sampler_info = vk::SamplerCreateInfo::default()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .address_mode_u(vk::SamplerAddressMode::REPEAT)
            .address_mode_v(vk::SamplerAddressMode::REPEAT)
            .address_mode_w(vk::SamplerAddressMode::REPEAT)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
            .max_lod(0.0);
        let sampler = device.create_sampler(&sampler_info, None)?;

        let descriptor_set_layout = layout_builder.build(device)?;

        let layouts = vec![descriptor_set_layout; image_count];
        let descriptor_sets = descriptor_pool.allocate(device, &layouts)?;
        let mut writes = DescriptorWrites::new();
        for (i, &set) in descriptor_sets.iter().enumerate() {
            writes = writes
                .uniform_buffer(
                    set,
                    bindings::CAMERA,
                    uniform_buffers[i].buffer,
                    CameraTransform::SIZE,
                )
                .storage_buffer(set, bindings::OCTREE, buffers.octree.buffer)
                .storage_buffer(set, bindings::LIGHTING, buffers.lighting.buffer)
                .storage_image(set, bindings::IMAGE, sampler, swapchain.image_views[i]);
        }
        writes.apply(device);

        let pipelines = PipelineSet::new(
            device,
            shaders,
            descriptor_set_layout,
            swapchain.extent,
            config.octree_depth,
        )?;

        let command_buffers = record_table(
            device,
            &command_pool,
            &RecordTargets {
                images: &swapchain.images,
                descriptor_sets: &descriptor_sets,
                pipelines: &pipelines,
                extent: swapchain.extent,
                staging: buffers.staging.buffer,
                octree: buffers.octree.buffer,
                lighting: buffers.lighting.buffer,
                octree_bytes: buffers.byte_size(),
            },
        )?;

        let sync = FrameSlots::new(device, config.frames_in_flight)?;

        let swapchain_loader = surface.swapchain_loader().clone();
        let generation = Self {
            gpu,
            swapchain_loader,
            command_pool,
            swapchain,
            uniform_buffers,
            descriptor_pool,
            sampler,
            descriptor_set_layout,
            descriptor_sets,
            pipelines,
            command_buffers,
            sync,
        };
        debug_assert!(generation.is_consistent());

        Ok(generation)
    }

    /// Per-image sequences all have one entry per swapchain image.
    pub fn is_consistent(&self) -> bool {
        let n = self.swapchain.images.len();
        self.swapchain.image_views.len() == n
            && self.uniform_buffers.len() == n
            && self.descriptor_sets.len() == n
            && self.command_buffers.len() == 2 * n
    }

    pub fn image_count(&self) -> usize {
        self.swapchain.image_count()
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.swapchain.extent
    }

    pub fn swapchain(&self) -> &Swapchain {
        &self.swapchain
    }

    pub fn swapchain_loader(&self) -> &ash::khr::swapchain::Device {
        &self.swapchain_loader
    }

    pub fn sync(&self) -> &FrameSlots {
        &self.sync
    }

    pub fn command_buffers(&self) -> &CommandBufferTable {
        &self.command_buffers
    }

    /// Camera uniform buffer of a swapchain image.
    pub fn uniform_buffer(&self, image: usize) -> Option<&GpuBuffer> {
        self.uniform_buffers.get(image)
    }
}

impl Drop for SwapchainGeneration {
    fn drop(&mut self) {
        idle_for_teardown(self.gpu.wait_idle());
        let device = self.gpu.device();
        unsafe {
            self.sync.destroy(device);
            self.pipelines.destroy(device);
            // Sets are freed with their pool
            self.descriptor_pool.destroy(device);
            device.destroy_descriptor_set_layout(self.descriptor_set_layout, None);
            device.destroy_sampler(self.sampler, None);
            self.swapchain.destroy(device, &self.swapchain_loader);
            self.command_pool.destroy(device);
        }

        let mut allocator = self.gpu.allocator().lock();
        for buffer in &mut self.uniform_buffers {
            if let Err(e) = allocator.free_buffer(buffer) {
                tracing::error!("Failed to free uniform buffer: {e}");
            }
        }

        tracing::debug!("Swapchain generation destroyed");
    }
}
