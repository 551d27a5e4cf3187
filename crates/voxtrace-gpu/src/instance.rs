//! Vulkan instance creation, debug messenger and physical device selection.

use crate::capabilities::GpuCapabilities;
use crate::error::{GpuError, Result};
use ash::vk;
use std::ffi::{c_void, CStr, CString};
use std::os::raw::c_char;

/// Validation layers to enable when validation is requested.
pub fn validation_layers() -> Vec<&'static CStr> {
    vec![c"VK_LAYER_KHRONOS_validation"]
}

/// Minimum severity of driver messages forwarded to the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum DiagnosticSeverity {
    Verbose,
    Info,
    #[default]
    Warning,
    Error,
}

impl DiagnosticSeverity {
    /// Parse a level name as used on the command line.
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "verbose" | "trace" => Some(Self::Verbose),
            "info" => Some(Self::Info),
            "warning" | "warn" => Some(Self::Warning),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

/// Severities requested from the driver for a given minimum.
pub fn severity_mask(min: DiagnosticSeverity) -> vk::DebugUtilsMessageSeverityFlagsEXT {
    use vk::DebugUtilsMessageSeverityFlagsEXT as S;

    [
        (DiagnosticSeverity::Verbose, S::VERBOSE),
        (DiagnosticSeverity::Info, S::INFO),
        (DiagnosticSeverity::Warning, S::WARNING),
        (DiagnosticSeverity::Error, S::ERROR),
    ]
    .into_iter()
    .filter(|(level, _)| *level >= min)
    .fold(S::empty(), |mask, (_, flag)| mask | flag)
}

/// Create a Vulkan instance.
///
/// `surface_extensions` comes from `ash_window::enumerate_required_extensions`.
///
/// # Safety
/// The entry must be a valid Vulkan entry point.
pub unsafe fn create_instance(
    entry: &ash::Entry,
    app_name: &str,
    surface_extensions: &[*const c_char],
    enable_validation: bool,
) -> Result<ash::Instance> {
    let app_name = CString::new(app_name)
        .map_err(|e| GpuError::InvalidState(format!("Invalid application name: {e}")))?;

    let app_info = vk::ApplicationInfo::default()
        .application_name(&app_name)
        .application_version(vk::make_api_version(0, 0, 1, 0))
        .engine_name(c"Voxtrace")
        .engine_version(vk::make_api_version(0, 0, 1, 0))
        .api_version(vk::API_VERSION_1_3);

    let mut extension_names: Vec<*const c_char> = surface_extensions.to_vec();
    if enable_validation {
        extension_names.push(ash::ext::debug_utils::NAME.as_ptr());
    }
    #[cfg(target_os = "macos")]
    extension_names.push(ash::khr::portability_enumeration::NAME.as_ptr());

    let layers = if enable_validation {
        validation_layers()
    } else {
        vec![]
    };

    // Missing layers only produce a warning
    let available_layers = entry.enumerate_instance_layer_properties()?;
    let layers: Vec<&CStr> = layers
        .into_iter()
        .filter(|layer| {
            let found = available_layers.iter().any(|props| {
                CStr::from_ptr(props.layer_name.as_ptr()) == *layer
            });
            if !found {
                tracing::warn!("Validation layer {} not available", layer.to_string_lossy());
            }
            found
        })
        .collect();

    let layer_names: Vec<*const c_char> = layers.iter().map(|l| l.as_ptr()).collect();

    // Required for MoltenVK on macOS
    #[cfg(target_os = "macos")]
    let create_flags = vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR;
    #[cfg(not(target_os = "macos"))]
    let create_flags = vk::InstanceCreateFlags::empty();

    let create_info = vk::InstanceCreateInfo::default()
        .application_info(&app_info)
        .enabled_extension_names(&extension_names)
        .enabled_layer_names(&layer_names)
        .flags(create_flags);

    let instance = entry.create_instance(&create_info, None)?;

    Ok(instance)
}

/// Debug messenger forwarding driver messages to `tracing`.
pub struct DebugMessenger {
    loader: ash::ext::debug_utils::Instance,
    messenger: vk::DebugUtilsMessengerEXT,
}

impl DebugMessenger {
    /// Install a messenger for severities at or above `min`.
    ///
    /// # Safety
    /// The instance must have been created with `VK_EXT_debug_utils`.
    pub unsafe fn new(
        entry: &ash::Entry,
        instance: &ash::Instance,
        min: DiagnosticSeverity,
    ) -> Result<Self> {
        let loader = ash::ext::debug_utils::Instance::new(entry, instance);

        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
            .message_severity(severity_mask(min))
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        let messenger = loader.create_debug_utils_messenger(&create_info, None)?;

        Ok(Self { loader, messenger })
    }

    /// Destroy the messenger.
    ///
    /// # Safety
    /// Must be called before the instance is destroyed.
    pub unsafe fn destroy(&self) {
        self.loader
            .destroy_debug_utils_messenger(self.messenger, None);
    }
}

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user_data: *mut c_void,
) -> vk::Bool32 {
    let message = if callback_data.is_null() || (*callback_data).p_message.is_null() {
        std::borrow::Cow::Borrowed("<no message>")
    } else {
        CStr::from_ptr((*callback_data).p_message).to_string_lossy()
    };

    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        tracing::error!(target: "vulkan", ?message_type, "{message}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        tracing::warn!(target: "vulkan", ?message_type, "{message}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        tracing::info!(target: "vulkan", ?message_type, "{message}");
    } else {
        tracing::trace!(target: "vulkan", ?message_type, "{message}");
    }

    vk::FALSE
}

/// Select the highest scoring physical device.
///
/// `has_queues` rejects devices without a usable compute/present family.
///
/// # Safety
/// The instance must be valid.
pub unsafe fn select_physical_device(
    instance: &ash::Instance,
    mut has_queues: impl FnMut(vk::PhysicalDevice) -> bool,
) -> Result<(vk::PhysicalDevice, GpuCapabilities)> {
    let devices = instance.enumerate_physical_devices()?;

    let mut best: Option<(u32, vk::PhysicalDevice, GpuCapabilities)> = None;

    for device in devices {
        let capabilities = GpuCapabilities::query(instance, device);
        if let Err(reason) = capabilities.check() {
            tracing::debug!("Skipping GPU {}: {reason}", capabilities.device_name);
            continue;
        }
        if !has_queues(device) {
            tracing::debug!(
                "Skipping GPU {}: no compute queue that can present",
                capabilities.device_name
            );
            continue;
        }

        let score = capabilities.score().unwrap_or(0);
        tracing::debug!("Candidate GPU: {} (score {score})", capabilities.summary());
        if best.as_ref().map_or(true, |(s, _, _)| score > *s) {
            best = Some((score, device, capabilities));
        }
    }

    best.map(|(_, device, caps)| (device, caps))
        .ok_or(GpuError::NoSuitableDevice)
}
