//! Error type shared by the GPU and render crates.

use ash::vk;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GpuError {
    #[error("Vulkan call failed: {0}")]
    Vulkan(#[from] vk::Result),

    /// The Vulkan loader library could not be opened.
    #[error("Vulkan loader unavailable: {0}")]
    LoaderUnavailable(String),

    #[error("No GPU supports compute ray casting to this surface")]
    NoSuitableDevice,

    /// No surface format can be written from compute and presented.
    #[error("No surface format supports storage image and color attachment usage")]
    NoCompatibleSurfaceFormat,

    #[error("Missing device extension: {0}")]
    MissingExtension(String),

    #[error("GPU allocation failed: {0}")]
    Allocation(String),

    #[error("Surface error: {0}")]
    Surface(String),

    #[error("Swapchain error: {0}")]
    Swapchain(String),

    /// SPIR-V could not be read or turned into a shader module.
    #[error("Shader error: {0}")]
    Shader(String),

    #[error("Pipeline creation failed: {0}")]
    Pipeline(String),

    /// An operation was called on an object in the wrong lifecycle stage.
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

pub type Result<T> = std::result::Result<T, GpuError>;
