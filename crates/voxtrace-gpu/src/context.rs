//! Instance, device and queue bootstrap.

use crate::capabilities::GpuCapabilities;
use crate::error::{GpuError, Result};
use crate::instance::{create_instance, select_physical_device, DebugMessenger, DiagnosticSeverity};
use crate::memory::GpuAllocator;
use crate::surface::SurfaceContext;
use ash::vk;
use parking_lot::Mutex;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::sync::Arc;

/// Main GPU context holding Vulkan resources.
///
/// Created once at startup and destroyed last. Every surface created from
/// it must be destroyed first.
pub struct GpuContext {
    // Unloading the library would invalidate every function pointer.
    _entry: ash::Entry,
    instance: ash::Instance,
    debug_messenger: Option<DebugMessenger>,
    physical_device: vk::PhysicalDevice,
    device: Arc<ash::Device>,
    capabilities: GpuCapabilities,
    allocator: Mutex<GpuAllocator>,

    queue_families: QueueFamilies,
    compute_queue: vk::Queue,
    present_queue: vk::Queue,
}

impl GpuContext {
    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    pub fn instance(&self) -> &ash::Instance {
        &self.instance
    }

    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    pub fn capabilities(&self) -> &GpuCapabilities {
        &self.capabilities
    }

    /// Receives every frame's compute chain.
    pub fn compute_queue(&self) -> vk::Queue {
        self.compute_queue
    }

    /// Same queue as [`Self::compute_queue`] unless the families are split.
    pub fn present_queue(&self) -> vk::Queue {
        self.present_queue
    }

    pub fn queue_families(&self) -> QueueFamilies {
        self.queue_families
    }

    /// Lock before creating or freeing buffers.
    pub fn allocator(&self) -> &Mutex<GpuAllocator> {
        &self.allocator
    }

    /// Optimal-tiling features of a format on this device.
    pub fn format_features(&self, format: vk::Format) -> vk::FormatFeatureFlags {
        unsafe {
            self.instance
                .get_physical_device_format_properties(self.physical_device, format)
                .optimal_tiling_features
        }
    }

    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn wait_idle(&self) -> Result<()> {
        unsafe {
            self.device.device_wait_idle()?;
        }
        Ok(())
    }
}

impl Drop for GpuContext {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();

            // Frees all VkDeviceMemory before the device goes away
            self.allocator.lock().shutdown();

            self.device.destroy_device(None);
            if let Some(messenger) = self.debug_messenger.take() {
                messenger.destroy();
            }
            self.instance.destroy_instance(None);
        }
        tracing::debug!("GPU context destroyed");
    }
}

/// Configures instance creation. Validation defaults to on in debug builds.
pub struct GpuContextBuilder {
    app_name: String,
    enable_validation: bool,
    diagnostics: DiagnosticSeverity,
}

impl Default for GpuContextBuilder {
    fn default() -> Self {
        Self {
            app_name: "Voxtrace".to_string(),
            enable_validation: cfg!(debug_assertions),
            diagnostics: DiagnosticSeverity::default(),
        }
    }
}

impl GpuContextBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = name.into();
        self
    }

    /// Enable or disable validation layers and the debug messenger.
    pub fn validation(mut self, enable: bool) -> Self {
        self.enable_validation = enable;
        self
    }

    /// Minimum severity of driver messages to log.
    pub fn diagnostics(mut self, min: DiagnosticSeverity) -> Self {
        self.diagnostics = min;
        self
    }

    /// Build the GPU context and the window surface it presents to.
    pub fn build<W>(self, window: &W) -> Result<(GpuContext, SurfaceContext)>
    where
        W: HasDisplayHandle + HasWindowHandle,
    {
        let display = window
            .display_handle()
            .map_err(|e| GpuError::Surface(format!("Failed to get display handle: {e}")))?;
        let window_handle = window
            .window_handle()
            .map_err(|e| GpuError::Surface(format!("Failed to get window handle: {e}")))?;

        let entry = unsafe { ash::Entry::load() }
            .map_err(|e| GpuError::LoaderUnavailable(e.to_string()))?;

        let surface_extensions = ash_window::enumerate_required_extensions(display.as_raw())
            .map_err(|e| GpuError::MissingExtension(e.to_string()))?;

        let instance = unsafe {
            create_instance(
                &entry,
                &self.app_name,
                surface_extensions,
                self.enable_validation,
            )
        }?;

        let debug_messenger = if self.enable_validation {
            match unsafe { DebugMessenger::new(&entry, &instance, self.diagnostics) } {
                Ok(messenger) => Some(messenger),
                Err(e) => {
                    tracing::warn!("Debug messenger unavailable: {e}");
                    None
                }
            }
        } else {
            None
        };

        // The surface is needed before device selection to check present support
        let surface_loader = ash::khr::surface::Instance::new(&entry, &instance);
        let surface = match unsafe {
            ash_window::create_surface(
                &entry,
                &instance,
                display.as_raw(),
                window_handle.as_raw(),
                None,
            )
        } {
            Ok(surface) => surface,
            Err(e) => {
                unsafe { destroy_instance(&instance, debug_messenger) };
                return Err(GpuError::Surface(e.to_string()));
            }
        };

        let selected = unsafe { select_device(&instance, &surface_loader, surface) };
        let (physical_device, capabilities, queue_families) = match selected {
            Ok(selected) => selected,
            Err(e) => {
                unsafe {
                    surface_loader.destroy_surface(surface, None);
                    destroy_instance(&instance, debug_messenger);
                }
                return Err(e);
            }
        };

        tracing::info!("Selected GPU: {}", capabilities.summary());
        tracing::debug!(
            "Queue families: compute {}, present {}",
            queue_families.compute,
            queue_families.present
        );

        let device = match unsafe { create_device(&instance, physical_device, queue_families) } {
            Ok(device) => Arc::new(device),
            Err(e) => {
                unsafe {
                    surface_loader.destroy_surface(surface, None);
                    destroy_instance(&instance, debug_messenger);
                }
                return Err(e);
            }
        };

        let compute_queue = unsafe { device.get_device_queue(queue_families.compute, 0) };
        let present_queue = unsafe { device.get_device_queue(queue_families.present, 0) };

        let allocator = match unsafe { GpuAllocator::new(&instance, device.clone(), physical_device) }
        {
            Ok(allocator) => allocator,
            Err(e) => {
                unsafe {
                    device.destroy_device(None);
                    surface_loader.destroy_surface(surface, None);
                    destroy_instance(&instance, debug_messenger);
                }
                return Err(e);
            }
        };

        let swapchain_loader = ash::khr::swapchain::Device::new(&instance, &device);
        let surface = SurfaceContext::new(surface, surface_loader, swapchain_loader);

        let context = GpuContext {
            _entry: entry,
            instance,
            debug_messenger,
            physical_device,
            device,
            capabilities,
            allocator: Mutex::new(allocator),
            queue_families,
            compute_queue,
            present_queue,
        };

        Ok((context, surface))
    }
}

unsafe fn destroy_instance(instance: &ash::Instance, messenger: Option<DebugMessenger>) {
    if let Some(messenger) = messenger {
        messenger.destroy();
    }
    instance.destroy_instance(None);
}

/// Queue family indices used by the renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilies {
    /// Family of the compute queue.
    pub compute: u32,
    /// Family of the present queue.
    pub present: u32,
}

impl QueueFamilies {
    /// Whether compute and present live in different families.
    pub fn is_split(&self) -> bool {
        self.compute != self.present
    }
}

/// Pick compute and present families.
///
/// One family with both capabilities wins; otherwise the first compute
/// family is paired with the first present-capable family.
pub fn select_queue_families(
    families: &[vk::QueueFamilyProperties],
    mut supports_present: impl FnMut(u32) -> bool,
) -> Option<QueueFamilies> {
    let mut compute = None;
    let mut present = None;

    for (i, family) in families.iter().enumerate() {
        let i = i as u32;
        let has_compute =
            family.queue_count > 0 && family.queue_flags.contains(vk::QueueFlags::COMPUTE);
        let has_present = family.queue_count > 0 && supports_present(i);

        if has_compute && has_present {
            return Some(QueueFamilies {
                compute: i,
                present: i,
            });
        }
        if has_compute && compute.is_none() {
            compute = Some(i);
        }
        if has_present && present.is_none() {
            present = Some(i);
        }
    }

    Some(QueueFamilies {
        compute: compute?,
        present: present?,
    })
}

/// Select the best physical device with usable queues for the surface.
///
/// # Safety
/// The instance and surface must be valid.
unsafe fn select_device(
    instance: &ash::Instance,
    surface_loader: &ash::khr::surface::Instance,
    surface: vk::SurfaceKHR,
) -> Result<(vk::PhysicalDevice, GpuCapabilities, QueueFamilies)> {
    let families_of = |physical_device: vk::PhysicalDevice| {
        let families = instance.get_physical_device_queue_family_properties(physical_device);
        select_queue_families(&families, |index| {
            surface_loader
                .get_physical_device_surface_support(physical_device, index, surface)
                .unwrap_or(false)
        })
    };

    let (physical_device, capabilities) =
        select_physical_device(instance, |device| families_of(device).is_some())?;
    let queue_families = families_of(physical_device).ok_or(GpuError::NoSuitableDevice)?;

    Ok((physical_device, capabilities, queue_families))
}

/// Create the logical device.
///
/// # Safety
/// The instance and physical device must be valid.
unsafe fn create_device(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    queue_families: QueueFamilies,
) -> Result<ash::Device> {
    let mut unique_families = vec![queue_families.compute];
    if queue_families.is_split() {
        unique_families.push(queue_families.present);
    }

    let queue_priority = 1.0_f32;
    let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = unique_families
        .iter()
        .map(|&family| {
            vk::DeviceQueueCreateInfo::default()
                .queue_family_index(family)
                .queue_priorities(std::slice::from_ref(&queue_priority))
        })
        .collect();

    let extension_names = [ash::khr::swapchain::NAME.as_ptr()];

    let mut vulkan_1_3_features = vk::PhysicalDeviceVulkan13Features::default()
        .synchronization2(true)
        .maintenance4(true);

    let mut features2 = vk::PhysicalDeviceFeatures2::default().push_next(&mut vulkan_1_3_features);

    let device_create_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(&queue_create_infos)
        .enabled_extension_names(&extension_names)
        .push_next(&mut features2);

    let device = instance
        .create_device(physical_device, &device_create_info, None)
        .map_err(GpuError::from)?;

    Ok(device)
}
