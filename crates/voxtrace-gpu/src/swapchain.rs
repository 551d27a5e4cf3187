//! Swapchain negotiation and management.
//!
//! Swapchain images are written directly by compute shaders, so every
//! negotiated format must support storage image usage.

use crate::context::{GpuContext, QueueFamilies};
use crate::error::{GpuError, Result};
use crate::surface::{SurfaceContext, SurfaceSupport};
use ash::vk;
use voxtrace_core::FramebufferSize;

/// Usage of every swapchain image.
pub const SWAPCHAIN_IMAGE_USAGE: vk::ImageUsageFlags = vk::ImageUsageFlags::from_raw(
    vk::ImageUsageFlags::STORAGE.as_raw() | vk::ImageUsageFlags::COLOR_ATTACHMENT.as_raw(),
);

/// Present mode preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PresentModePolicy {
    /// Lowest latency, tearing allowed.
    #[default]
    Immediate,
    /// Triple buffering without tearing.
    Mailbox,
    /// Vsync.
    Fifo,
}

impl PresentModePolicy {
    /// Modes to try in order. FIFO always comes last.
    pub fn preference(self) -> &'static [vk::PresentModeKHR] {
        match self {
            Self::Immediate => &[
                vk::PresentModeKHR::IMMEDIATE,
                vk::PresentModeKHR::MAILBOX,
                vk::PresentModeKHR::FIFO,
            ],
            Self::Mailbox => &[vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::FIFO],
            Self::Fifo => &[vk::PresentModeKHR::FIFO],
        }
    }

    /// Parse a policy name.
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "immediate" => Some(Self::Immediate),
            "mailbox" => Some(Self::Mailbox),
            "fifo" | "vsync" => Some(Self::Fifo),
            _ => None,
        }
    }
}

/// Swapchain wrapper.
pub struct Swapchain {
    pub swapchain: vk::SwapchainKHR,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    pub format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
}

impl Swapchain {
    /// Negotiate and create a swapchain for the surface.
    ///
    /// # Safety
    /// The surface must not have another live swapchain.
    pub unsafe fn new(
        gpu: &GpuContext,
        surface: &SurfaceContext,
        framebuffer: FramebufferSize,
        policy: PresentModePolicy,
    ) -> Result<Self> {
        let caps = surface.support(gpu)?;
        let SwapchainPlan {
            image_count,
            format,
            present_mode,
            extent,
        } = SwapchainPlan::negotiate(&caps, |f| gpu.format_features(f), framebuffer, policy)?;
        let (sharing_mode, queue_families) = image_sharing(gpu.queue_families());

        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface.handle())
            .min_image_count(image_count)
            .image_format(format.format)
            .image_color_space(format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(SWAPCHAIN_IMAGE_USAGE)
            .image_sharing_mode(sharing_mode)
            .queue_family_indices(&queue_families)
            .pre_transform(caps.capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true);

        let swapchain = surface
            .swapchain_loader()
            .create_swapchain(&create_info, None)
            .map_err(|e| GpuError::Swapchain(e.to_string()))?;

        let images = match surface.swapchain_loader().get_swapchain_images(swapchain) {
            Ok(images) => images,
            Err(e) => {
                surface.swapchain_loader().destroy_swapchain(swapchain, None);
                return Err(e.into());
            }
        };

        let mut image_views = Vec::with_capacity(images.len());
        for &image in &images {
            let view_info = vk::ImageViewCreateInfo::default()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(format.format)
                .components(vk::ComponentMapping::default())
                .subresource_range(color_subresource_range());

            match gpu.device().create_image_view(&view_info, None) {
                Ok(view) => image_views.push(view),
                Err(e) => {
                    for &view in &image_views {
                        gpu.device().destroy_image_view(view, None);
                    }
                    surface.swapchain_loader().destroy_swapchain(swapchain, None);
                    return Err(e.into());
                }
            }
        }

        tracing::info!(
            "Swapchain created: {}x{}, {} images, {:?}, {:?}",
            extent.width,
            extent.height,
            images.len(),
            format.format,
            present_mode
        );

        Ok(Self {
            swapchain,
            images,
            image_views,
            format,
            present_mode,
            extent,
        })
    }

    /// Number of swapchain images.
    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Acquire the next image.
    ///
    /// Returns `None` when the swapchain is out of date. A suboptimal
    /// swapchain still yields its image.
    ///
    /// # Safety
    /// All handles must be valid.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub unsafe fn acquire_next_image(
        &self,
        swapchain_loader: &ash::khr::swapchain::Device,
        semaphore: vk::Semaphore,
    ) -> Result<Option<u32>> {
        let result = swapchain_loader.acquire_next_image(
            self.swapchain,
            u64::MAX,
            semaphore,
            vk::Fence::null(),
        );

        match result {
            Ok((index, _suboptimal)) => Ok(Some(index)),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(None),
            Err(e) => Err(GpuError::from(e)),
        }
    }

    /// Present an image.
    ///
    /// Returns `true` when the swapchain is out of date or suboptimal.
    ///
    /// # Safety
    /// All handles must be valid.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub unsafe fn present(
        &self,
        swapchain_loader: &ash::khr::swapchain::Device,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphores: &[vk::Semaphore],
    ) -> Result<bool> {
        let swapchains = [self.swapchain];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        match swapchain_loader.queue_present(queue, &present_info) {
            Ok(suboptimal) => Ok(suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(true),
            Err(e) => Err(GpuError::from(e)),
        }
    }

    /// Destroy image views, then the swapchain.
    ///
    /// # Safety
    /// All handles must be valid and the swapchain must not be in use.
    pub unsafe fn destroy(
        &self,
        device: &ash::Device,
        swapchain_loader: &ash::khr::swapchain::Device,
    ) {
        for &view in &self.image_views {
            device.destroy_image_view(view, None);
        }
        swapchain_loader.destroy_swapchain(self.swapchain, None);
    }
}

/// Negotiated swapchain parameters.
#[derive(Debug, Clone, Copy)]
pub struct SwapchainPlan {
    pub image_count: u32,
    pub format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
}

impl SwapchainPlan {
    /// Derive every swapchain parameter from the surface and window state.
    pub fn negotiate(
        surface: &SurfaceSupport,
        features_of: impl FnMut(vk::Format) -> vk::FormatFeatureFlags,
        framebuffer: FramebufferSize,
        policy: PresentModePolicy,
    ) -> Result<Self> {
        Ok(Self {
            image_count: select_image_count(&surface.capabilities),
            format: select_surface_format(&surface.formats, features_of)?,
            present_mode: select_present_mode(&surface.present_modes, policy),
            extent: calculate_extent(&surface.capabilities, framebuffer),
        })
    }
}

/// Single mip, single layer color range.
pub fn color_subresource_range() -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange::default()
        .aspect_mask(vk::ImageAspectFlags::COLOR)
        .base_mip_level(0)
        .level_count(1)
        .base_array_layer(0)
        .layer_count(1)
}

/// One more than the minimum, clamped to the maximum when there is one.
pub fn select_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let count = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 {
        count.min(capabilities.max_image_count)
    } else {
        count
    }
}

/// First format usable both as a storage image and a color attachment.
///
/// There is no fallback: a surface without such a format cannot be
/// rendered to by the compute chain.
pub fn select_surface_format(
    available: &[vk::SurfaceFormatKHR],
    mut features_of: impl FnMut(vk::Format) -> vk::FormatFeatureFlags,
) -> Result<vk::SurfaceFormatKHR> {
    let required = vk::FormatFeatureFlags::STORAGE_IMAGE | vk::FormatFeatureFlags::COLOR_ATTACHMENT;

    available
        .iter()
        .find(|format| features_of(format.format).contains(required))
        .copied()
        .ok_or(GpuError::NoCompatibleSurfaceFormat)
}

/// First mode of the policy's preference list the surface supports.
pub fn select_present_mode(
    available: &[vk::PresentModeKHR],
    policy: PresentModePolicy,
) -> vk::PresentModeKHR {
    policy
        .preference()
        .iter()
        .copied()
        .find(|mode| available.contains(mode))
        // FIFO support is guaranteed
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

/// Framebuffer size clamped to the surface's supported extent range.
pub fn calculate_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    framebuffer: FramebufferSize,
) -> vk::Extent2D {
    let clamp = |value: u32, min: u32, max: u32| value.min(max).max(min);

    vk::Extent2D {
        width: clamp(
            framebuffer.width,
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: clamp(
            framebuffer.height,
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    }
}

/// Concurrent sharing across both families when they differ.
pub fn image_sharing(families: QueueFamilies) -> (vk::SharingMode, Vec<u32>) {
    if families.is_split() {
        (
            vk::SharingMode::CONCURRENT,
            vec![families.compute, families.present],
        )
    } else {
        (vk::SharingMode::EXCLUSIVE, Vec::new())
    }
}
