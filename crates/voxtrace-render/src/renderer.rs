//! Vulkan implementation of the frame backend.

use crate::buffers::OctreeBuffers;
use crate::frame::{missing_generation, Acquire, FrameBackend, Present};
use crate::generation::{idle_for_teardown, GenerationConfig, SwapchainGeneration};
use crate::upload::{upload_channel, StagingWriter, UploadCloser, UploadReceiver};
use ash::vk;
use std::sync::Arc;
use voxtrace_core::{CameraTransform, FramebufferSize, OctreeLayout};
use voxtrace_gpu::command::Submission;
use voxtrace_gpu::error::{GpuError, Result};
use voxtrace_gpu::surface::SurfaceContext;
use voxtrace_gpu::GpuContext;
use voxtrace_shaders::ShaderCode;

/// Owns the octree buffers and the current swapchain generation.
pub struct VulkanRenderer {
    gpu: Arc<GpuContext>,
    surface: SurfaceContext,
    buffers: OctreeBuffers,
    generation: Option<SwapchainGeneration>,
    shaders: ShaderCode,
    config: GenerationConfig,
    closer: UploadCloser,
}

impl VulkanRenderer {
    /// Allocate the octree buffers and build the first swapchain generation.
    ///
    /// Also returns both ends of the staging handoff: the writer goes to the
    /// octree mutator, the receiver to the frame loop.
    pub fn new(
        gpu: Arc<GpuContext>,
        surface: SurfaceContext,
        config: GenerationConfig,
        shaders: ShaderCode,
        layout: OctreeLayout,
        framebuffer: FramebufferSize,
    ) -> Result<(Self, StagingWriter, UploadReceiver)> {
        if config.frames_in_flight == 0 {
            return Err(GpuError::InvalidState(
                "At least one frame in flight is required".to_string(),
            ));
        }

        let buffers = OctreeBuffers::new(gpu.clone(), layout)?;
        let (writer, receiver) = upload_channel(buffers.staging_region()?);
        let closer = receiver.closer();

        let generation = unsafe {
            SwapchainGeneration::new(
                gpu.clone(),
                &surface,
                framebuffer,
                &config,
                &shaders,
                &buffers,
            )?
        };

        tracing::info!(
            "Renderer ready: {} swapchain images at {}x{}, {} frames in flight",
            generation.image_count(),
            generation.extent().width,
            generation.extent().height,
            config.frames_in_flight
        );

        let renderer = Self {
            gpu,
            surface,
            buffers,
            generation: Some(generation),
            shaders,
            config,
            closer,
        };
        Ok((renderer, writer, receiver))
    }

    pub fn gpu(&self) -> &Arc<GpuContext> {
        &self.gpu
    }

    pub fn buffers(&self) -> &OctreeBuffers {
        &self.buffers
    }

    pub fn config(&self) -> &GenerationConfig {
        &self.config
    }

    /// Extent of the current swapchain, if one exists.
    pub fn extent(&self) -> Option<vk::Extent2D> {
        self.generation.as_ref().map(SwapchainGeneration::extent)
    }

    fn generation(&self) -> Result<&SwapchainGeneration> {
        self.generation.as_ref().ok_or_else(missing_generation)
    }
}

impl FrameBackend for VulkanRenderer {
    fn frames_in_flight(&self) -> usize {
        self.config.frames_in_flight
    }

    fn image_count(&self) -> usize {
        self.generation
            .as_ref()
            .map_or(0, SwapchainGeneration::image_count)
    }

    fn wait_for_frame(&mut self, frame: usize) -> Result<()> {
        let generation = self.generation()?;
        unsafe { generation.sync().frame(frame).wait(self.gpu.device()) }
    }

    fn acquire_image(&mut self, frame: usize) -> Result<Acquire> {
        let generation = self.generation()?;
        let semaphore = generation.sync().frame(frame).image_available;
        let image = unsafe {
            generation
                .swapchain()
                .acquire_next_image(generation.swapchain_loader(), semaphore)?
        };
        Ok(image.map_or(Acquire::Stale, |i| Acquire::Image(i as usize)))
    }

    fn write_camera(&mut self, image: usize, transform: &CameraTransform) -> Result<()> {
        let buffer = self
            .generation()?
            .uniform_buffer(image)
            .ok_or_else(|| GpuError::InvalidState(format!("No uniform buffer for image {image}")))?;
        buffer.write(std::slice::from_ref(transform))
    }

    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    fn submit(&mut self, frame: usize, command_buffer: usize) -> Result<()> {
        let generation = self.generation()?;
        let device = self.gpu.device();
        let sync = generation.sync().frame(frame);
        let cmd = generation.command_buffers().get(command_buffer).ok_or_else(|| {
            GpuError::InvalidState(format!("No command buffer at index {command_buffer}"))
        })?;

        let submission = Submission {
            command_buffer: cmd,
            wait: sync.image_available,
            wait_stage: vk::PipelineStageFlags2::COMPUTE_SHADER,
            signal: sync.render_finished,
            fence: sync.in_flight,
        };

        unsafe {
            sync.reset(device)?;
            submission.submit(device, self.gpu.compute_queue())
        }
    }

    fn present(&mut self, frame: usize, image: usize) -> Result<Present> {
        let generation = self.generation()?;
        let wait = [generation.sync().frame(frame).render_finished];
        let stale = unsafe {
            generation.swapchain().present(
                generation.swapchain_loader(),
                self.gpu.present_queue(),
                image as u32,
                &wait,
            )?
        };
        Ok(if stale { Present::Stale } else { Present::Done })
    }

    fn recreate(&mut self, framebuffer: FramebufferSize) -> Result<()> {
        self.gpu.wait_idle()?;
        self.generation = None;

        let generation = unsafe {
            SwapchainGeneration::new(
                self.gpu.clone(),
                &self.surface,
                framebuffer,
                &self.config,
                &self.shaders,
                &self.buffers,
            )?
        };

        tracing::info!(
            "Swapchain recreated: {} images at {}x{}",
            generation.image_count(),
            generation.extent().width,
            generation.extent().height
        );
        self.generation = Some(generation);
        Ok(())
    }

    fn wait_idle(&mut self) -> Result<()> {
        self.gpu.wait_idle()
    }
}

impl Drop for VulkanRenderer {
    fn drop(&mut self) {
        idle_for_teardown(self.gpu.wait_idle());
        self.generation = None;
        // The mutator must be done with the mapped staging memory before
        // the buffers are freed.
        self.closer.close();
        unsafe {
            self.surface.destroy();
        }
        tracing::debug!("Renderer destroyed");
    }
}
