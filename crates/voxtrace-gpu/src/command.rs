//! Command pools, recording and queue submission.

use crate::error::Result;
use ash::vk;

/// Pool for command buffers that are recorded once and submitted many times.
pub struct CommandPool {
    pool: vk::CommandPool,
    queue_family: u32,
}

impl CommandPool {
    /// # Safety
    /// The device must be valid and the queue family must exist.
    pub unsafe fn reusable(device: &ash::Device, queue_family: u32) -> Result<Self> {
        let create_info = vk::CommandPoolCreateInfo::default().queue_family_index(queue_family);
        let pool = device.create_command_pool(&create_info, None)?;
        Ok(Self { pool, queue_family })
    }

    pub fn queue_family(&self) -> u32 {
        self.queue_family
    }

    /// Allocate `count` primary command buffers.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn allocate(
        &self,
        device: &ash::Device,
        count: usize,
    ) -> Result<Vec<vk::CommandBuffer>> {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count as u32);
        Ok(device.allocate_command_buffers(&alloc_info)?)
    }

    /// Destroy the pool, freeing every buffer allocated from it.
    ///
    /// # Safety
    /// No buffer from the pool may be pending.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_command_pool(self.pool, None);
    }
}

/// Record `cmd` for repeated submission.
///
/// # Safety
/// `cmd` must be in the initial state.
pub unsafe fn record<F>(device: &ash::Device, cmd: vk::CommandBuffer, commands: F) -> Result<()>
where
    F: FnOnce(vk::CommandBuffer) -> Result<()>,
{
    device.begin_command_buffer(cmd, &vk::CommandBufferBeginInfo::default())?;
    commands(cmd)?;
    device.end_command_buffer(cmd)?;
    Ok(())
}

/// A single command buffer submission for one frame.
#[derive(Debug, Clone, Copy)]
pub struct Submission {
    pub command_buffer: vk::CommandBuffer,
    /// Semaphore waited on before `wait_stage` runs.
    pub wait: vk::Semaphore,
    pub wait_stage: vk::PipelineStageFlags2,
    /// Signaled once all commands complete.
    pub signal: vk::Semaphore,
    pub fence: vk::Fence,
}

impl Submission {
    /// # Safety
    /// All handles must be valid and the fence unsignaled.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub unsafe fn submit(&self, device: &ash::Device, queue: vk::Queue) -> Result<()> {
        let wait = [vk::SemaphoreSubmitInfo::default()
            .semaphore(self.wait)
            .stage_mask(self.wait_stage)];
        let commands = [vk::CommandBufferSubmitInfo::default().command_buffer(self.command_buffer)];
        let signal = [vk::SemaphoreSubmitInfo::default()
            .semaphore(self.signal)
            .stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)];

        let submit_info = vk::SubmitInfo2::default()
            .wait_semaphore_infos(&wait)
            .command_buffer_infos(&commands)
            .signal_semaphore_infos(&signal);

        device.queue_submit2(queue, &[submit_info], self.fence)?;
        Ok(())
    }
}
