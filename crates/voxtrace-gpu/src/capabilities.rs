//! Physical device limits relevant to the compute ray caster.

use ash::vk;
use std::ffi::CStr;
use std::fmt;

/// Invocations per work group of the widest stage (16x16 tiles).
pub const REQUIRED_WORKGROUP_INVOCATIONS: u32 = 256;

/// Work groups along X dispatched by the lighting stage.
pub const REQUIRED_WORKGROUP_COUNT_X: u32 = 65_536;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GpuVendor {
    Nvidia,
    Amd,
    Intel,
    Apple,
    Other(u32),
}

impl From<u32> for GpuVendor {
    /// PCI vendor id.
    fn from(id: u32) -> Self {
        match id {
            0x10DE => Self::Nvidia,
            0x1002 => Self::Amd,
            0x8086 => Self::Intel,
            0x106B => Self::Apple,
            other => Self::Other(other),
        }
    }
}

/// Why a device cannot run the renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unsupported {
    /// synchronization2 needs Vulkan 1.3.
    ApiVersion { major: u32, minor: u32 },
    WorkgroupInvocations(u32),
    WorkgroupCountX(u32),
}

impl fmt::Display for Unsupported {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ApiVersion { major, minor } => {
                write!(f, "Vulkan {major}.{minor} is older than 1.3")
            }
            Self::WorkgroupInvocations(n) => write!(
                f,
                "{n} invocations per work group, {REQUIRED_WORKGROUP_INVOCATIONS} needed"
            ),
            Self::WorkgroupCountX(n) => write!(
                f,
                "{n} work groups along X, {REQUIRED_WORKGROUP_COUNT_X} needed"
            ),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GpuCapabilities {
    pub vendor: GpuVendor,
    pub device_name: String,
    pub device_type: vk::PhysicalDeviceType,
    pub api_version: u32,
    /// Sum of all device-local heaps.
    pub device_local_memory_mb: u64,
    pub max_compute_workgroup_count: [u32; 3],
    pub max_compute_workgroup_invocations: u32,
}

impl GpuCapabilities {
    /// # Safety
    /// The instance and physical device must be valid.
    pub unsafe fn query(instance: &ash::Instance, physical_device: vk::PhysicalDevice) -> Self {
        let properties = instance.get_physical_device_properties(physical_device);
        let memory = instance.get_physical_device_memory_properties(physical_device);

        let device_local_memory_mb: u64 = memory.memory_heaps[..memory.memory_heap_count as usize]
            .iter()
            .filter(|heap| heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL))
            .map(|heap| heap.size >> 20)
            .sum();

        Self {
            vendor: properties.vendor_id.into(),
            device_name: CStr::from_ptr(properties.device_name.as_ptr())
                .to_string_lossy()
                .into_owned(),
            device_type: properties.device_type,
            api_version: properties.api_version,
            device_local_memory_mb,
            max_compute_workgroup_count: properties.limits.max_compute_work_group_count,
            max_compute_workgroup_invocations: properties.limits.max_compute_work_group_invocations,
        }
    }

    /// First unmet requirement, if any.
    pub fn check(&self) -> Result<(), Unsupported> {
        let major = vk::api_version_major(self.api_version);
        let minor = vk::api_version_minor(self.api_version);
        if (major, minor) < (1, 3) {
            return Err(Unsupported::ApiVersion { major, minor });
        }
        if self.max_compute_workgroup_invocations < REQUIRED_WORKGROUP_INVOCATIONS {
            return Err(Unsupported::WorkgroupInvocations(
                self.max_compute_workgroup_invocations,
            ));
        }
        // One past the guaranteed minimum of 65535.
        let count_x = self.max_compute_workgroup_count[0];
        if count_x < REQUIRED_WORKGROUP_COUNT_X {
            return Err(Unsupported::WorkgroupCountX(count_x));
        }
        Ok(())
    }

    /// Selection score, `None` for unusable devices. Discrete GPUs win,
    /// memory breaks ties.
    pub fn score(&self) -> Option<u32> {
        self.check().ok()?;
        let kind = match self.device_type {
            vk::PhysicalDeviceType::DISCRETE_GPU => 1000,
            vk::PhysicalDeviceType::INTEGRATED_GPU => 100,
            vk::PhysicalDeviceType::VIRTUAL_GPU => 50,
            _ => 0,
        };
        let gigabytes = u32::try_from(self.device_local_memory_mb / 1024).unwrap_or(u32::MAX);
        Some(kind + gigabytes.min(999))
    }

    pub fn summary(&self) -> String {
        format!(
            "{} ({:?}, {:?}) - Vulkan {}.{}.{} - {} MB VRAM",
            self.device_name,
            self.vendor,
            self.device_type,
            vk::api_version_major(self.api_version),
            vk::api_version_minor(self.api_version),
            vk::api_version_patch(self.api_version),
            self.device_local_memory_mb,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(device_type: vk::PhysicalDeviceType, memory_mb: u64) -> GpuCapabilities {
        GpuCapabilities {
            vendor: GpuVendor::Other(0),
            device_name: "test".to_string(),
            device_type,
            api_version: vk::make_api_version(0, 1, 3, 0),
            device_local_memory_mb: memory_mb,
            max_compute_workgroup_count: [u32::MAX, 65_535, 65_535],
            max_compute_workgroup_invocations: 1024,
        }
    }

    #[test]
    fn vendor_identification() {
        assert_eq!(GpuVendor::from(0x10DE), GpuVendor::Nvidia);
        assert_eq!(GpuVendor::from(0x1002), GpuVendor::Amd);
        assert_eq!(GpuVendor::from(0x8086), GpuVendor::Intel);
        assert_eq!(GpuVendor::from(0x1234), GpuVendor::Other(0x1234));
    }

    #[test]
    fn discrete_outscores_integrated() {
        let discrete = caps(vk::PhysicalDeviceType::DISCRETE_GPU, 2048);
        let integrated = caps(vk::PhysicalDeviceType::INTEGRATED_GPU, 16 * 1024);
        assert!(discrete.score() > integrated.score());
    }

    #[test]
    fn old_api_is_rejected() {
        let mut c = caps(vk::PhysicalDeviceType::DISCRETE_GPU, 8192);
        c.api_version = vk::make_api_version(0, 1, 2, 0);
        assert_eq!(c.check(), Err(Unsupported::ApiVersion { major: 1, minor: 2 }));
        assert_eq!(c.score(), None);
    }

    #[test]
    fn lighting_dispatch_width_is_required() {
        let mut c = caps(vk::PhysicalDeviceType::DISCRETE_GPU, 8192);
        c.max_compute_workgroup_count[0] = 65_535;
        assert_eq!(c.check(), Err(Unsupported::WorkgroupCountX(65_535)));
        assert!(c.check().unwrap_err().to_string().contains("65536"));
    }
}
