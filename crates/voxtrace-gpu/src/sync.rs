//! Per-frame semaphores and fences.

use crate::error::Result;
use ash::vk;

/// Semaphores and fence owned by one frame in flight.
pub struct FrameSlot {
    /// Acquire signals this once the swapchain image may be written.
    pub image_available: vk::Semaphore,
    /// Submission signals this for presentation.
    pub render_finished: vk::Semaphore,
    pub in_flight: vk::Fence,
}

impl FrameSlot {
    /// The fence is created signaled so the first wait returns at once.
    ///
    /// # Safety
    /// The device must be valid.
    unsafe fn new(device: &ash::Device) -> Result<Self> {
        let semaphore_info = vk::SemaphoreCreateInfo::default();
        let fence_info = vk::FenceCreateInfo::default().flags(vk::FenceCreateFlags::SIGNALED);

        let image_available = device.create_semaphore(&semaphore_info, None)?;
        let render_finished = match device.create_semaphore(&semaphore_info, None) {
            Ok(semaphore) => semaphore,
            Err(e) => {
                device.destroy_semaphore(image_available, None);
                return Err(e.into());
            }
        };
        let in_flight = match device.create_fence(&fence_info, None) {
            Ok(fence) => fence,
            Err(e) => {
                device.destroy_semaphore(image_available, None);
                device.destroy_semaphore(render_finished, None);
                return Err(e.into());
            }
        };

        Ok(Self {
            image_available,
            render_finished,
            in_flight,
        })
    }

    /// Block until the slot's previous submission retires.
    ///
    /// # Safety
    /// The device must be valid.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub unsafe fn wait(&self, device: &ash::Device) -> Result<()> {
        device.wait_for_fences(&[self.in_flight], true, u64::MAX)?;
        Ok(())
    }

    /// # Safety
    /// The fence must not be part of a pending submission.
    pub unsafe fn reset(&self, device: &ash::Device) -> Result<()> {
        device.reset_fences(&[self.in_flight])?;
        Ok(())
    }

    unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_semaphore(self.image_available, None);
        device.destroy_semaphore(self.render_finished, None);
        device.destroy_fence(self.in_flight, None);
    }
}

/// One [`FrameSlot`] per frame in flight.
pub struct FrameSlots {
    slots: Vec<FrameSlot>,
}

impl FrameSlots {
    /// # Safety
    /// The device must be valid.
    pub unsafe fn new(device: &ash::Device, frames_in_flight: usize) -> Result<Self> {
        let mut slots = Self {
            slots: Vec::with_capacity(frames_in_flight),
        };
        while slots.slots.len() < frames_in_flight {
            match FrameSlot::new(device) {
                Ok(slot) => slots.slots.push(slot),
                Err(e) => {
                    slots.destroy(device);
                    return Err(e);
                }
            }
        }
        Ok(slots)
    }

    /// Panics if `frame` is not below [`Self::len`].
    pub fn frame(&self, frame: usize) -> &FrameSlot {
        &self.slots[frame]
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// # Safety
    /// No slot may be referenced by pending GPU work.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        for slot in &self.slots {
            slot.destroy(device);
        }
    }
}
