//! Window surface and the loaders that present to it.
//!
//! The surface is created during device bootstrap and outlives every
//! swapchain built on top of it.

use crate::context::GpuContext;
use crate::error::Result;
use ash::vk;

pub struct SurfaceContext {
    handle: vk::SurfaceKHR,
    surface_loader: ash::khr::surface::Instance,
    swapchain_loader: ash::khr::swapchain::Device,
}

impl SurfaceContext {
    pub(crate) fn new(
        handle: vk::SurfaceKHR,
        surface_loader: ash::khr::surface::Instance,
        swapchain_loader: ash::khr::swapchain::Device,
    ) -> Self {
        Self {
            handle,
            surface_loader,
            swapchain_loader,
        }
    }

    pub fn handle(&self) -> vk::SurfaceKHR {
        self.handle
    }

    pub fn swapchain_loader(&self) -> &ash::khr::swapchain::Device {
        &self.swapchain_loader
    }

    /// Current limits, formats and present modes of the surface on the
    /// selected device. Limits change with the window, so query again
    /// before every swapchain.
    pub fn support(&self, gpu: &GpuContext) -> Result<SurfaceSupport> {
        let physical_device = gpu.physical_device();
        let loader = &self.surface_loader;
        unsafe {
            Ok(SurfaceSupport {
                capabilities: loader
                    .get_physical_device_surface_capabilities(physical_device, self.handle)?,
                formats: loader.get_physical_device_surface_formats(physical_device, self.handle)?,
                present_modes: loader
                    .get_physical_device_surface_present_modes(physical_device, self.handle)?,
            })
        }
    }

    /// # Safety
    /// No swapchain may still reference the surface, and the instance
    /// must still be alive.
    pub unsafe fn destroy(&self) {
        self.surface_loader.destroy_surface(self.handle, None);
    }
}

/// Snapshot of what the surface accepts.
#[derive(Debug, Clone)]
pub struct SurfaceSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}
