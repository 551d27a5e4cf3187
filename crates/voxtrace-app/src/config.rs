//! Engine configuration.

use std::path::PathBuf;
use voxtrace_core::constants::{
    DEFAULT_MAX_FRAMES_IN_FLIGHT, DEFAULT_OCTREE_DEPTH, DEFAULT_TITLE, MAX_OCTREE_DEPTH,
};
use voxtrace_core::OctreeLayout;
use voxtrace_gpu::{DiagnosticSeverity, PresentModePolicy};
use voxtrace_render::GenerationConfig;
use voxtrace_shaders::DEFAULT_SHADER_DIR;

/// Rejected configuration values.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("At least one frame in flight is required")]
    NoFramesInFlight,

    #[error("Window size must be nonzero, got {width}x{height}")]
    ZeroSize { width: u32, height: u32 },

    #[error("Octree depth {0} is outside 1..={MAX_OCTREE_DEPTH}")]
    DepthOutOfRange(u32),
}

/// Engine configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Window title.
    pub title: String,
    /// Initial window width.
    pub width: u32,
    /// Initial window height.
    pub height: u32,
    /// Frames the CPU may record ahead of the GPU.
    pub max_frames_in_flight: usize,
    /// Octree depth, sizes the buffers and specializes the raycast stage.
    pub octree_depth: u32,
    /// Directory holding the precompiled compute shaders.
    pub shader_dir: PathBuf,
    pub present_mode: PresentModePolicy,
    /// Enable Vulkan validation layers (default: debug builds only).
    pub validation: bool,
    /// Lowest validation message severity that gets logged.
    pub diagnostics: DiagnosticSeverity,
    /// Log filter used when `RUST_LOG` is unset.
    pub log_filter: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            title: DEFAULT_TITLE.to_string(),
            width: 800,
            height: 600,
            max_frames_in_flight: DEFAULT_MAX_FRAMES_IN_FLIGHT,
            octree_depth: DEFAULT_OCTREE_DEPTH,
            shader_dir: PathBuf::from(DEFAULT_SHADER_DIR),
            present_mode: PresentModePolicy::default(),
            validation: cfg!(debug_assertions),
            diagnostics: DiagnosticSeverity::default(),
            log_filter: "info".to_string(),
        }
    }
}

impl EngineConfig {
    /// Create a new config with the given title.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    /// Set the window dimensions.
    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn with_frames_in_flight(mut self, frames: usize) -> Self {
        self.max_frames_in_flight = frames;
        self
    }

    pub fn with_octree_depth(mut self, depth: u32) -> Self {
        self.octree_depth = depth;
        self
    }

    pub fn with_shader_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.shader_dir = dir.into();
        self
    }

    pub fn with_present_mode(mut self, mode: PresentModePolicy) -> Self {
        self.present_mode = mode;
        self
    }

    /// Enable or disable validation layers.
    pub fn with_validation(mut self, validation: bool) -> Self {
        self.validation = validation;
        self
    }

    pub fn with_diagnostics(mut self, min: DiagnosticSeverity) -> Self {
        self.diagnostics = min;
        self
    }

    pub fn with_log_filter(mut self, filter: impl Into<String>) -> Self {
        self.log_filter = filter.into();
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_frames_in_flight == 0 {
            return Err(ConfigError::NoFramesInFlight);
        }
        if self.width == 0 || self.height == 0 {
            return Err(ConfigError::ZeroSize {
                width: self.width,
                height: self.height,
            });
        }
        if !(1..=MAX_OCTREE_DEPTH).contains(&self.octree_depth) {
            return Err(ConfigError::DepthOutOfRange(self.octree_depth));
        }
        Ok(())
    }

    /// Octree buffer layout for the configured depth.
    pub fn octree_layout(&self) -> OctreeLayout {
        OctreeLayout::for_depth(self.octree_depth)
    }

    pub fn generation(&self) -> GenerationConfig {
        GenerationConfig {
            frames_in_flight: self.max_frames_in_flight,
            present_mode: self.present_mode,
            octree_depth: self.octree_depth,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        let config = EngineConfig::default();
        assert_eq!(config.validate(), Ok(()));
        assert_eq!(config.max_frames_in_flight, 2);
        assert_eq!(config.present_mode, PresentModePolicy::Immediate);
    }

    #[test]
    fn rejects_zero_frames_in_flight() {
        let config = EngineConfig::default().with_frames_in_flight(0);
        assert_eq!(config.validate(), Err(ConfigError::NoFramesInFlight));
    }

    #[test]
    fn rejects_zero_size() {
        let config = EngineConfig::default().with_size(0, 600);
        assert_eq!(
            config.validate(),
            Err(ConfigError::ZeroSize {
                width: 0,
                height: 600
            })
        );
    }

    #[test]
    fn depth_bounds() {
        for depth in [0, MAX_OCTREE_DEPTH + 1] {
            let config = EngineConfig::default().with_octree_depth(depth);
            assert_eq!(config.validate(), Err(ConfigError::DepthOutOfRange(depth)));
        }
        let config = EngineConfig::default().with_octree_depth(7);
        assert_eq!(config.validate(), Ok(()));
        assert_eq!(config.octree_layout().capacity, 2_396_744);
    }

    #[test]
    fn generation_carries_settings() {
        let generation = EngineConfig::new("test")
            .with_frames_in_flight(3)
            .with_present_mode(PresentModePolicy::Fifo)
            .with_octree_depth(5)
            .generation();
        assert_eq!(generation.frames_in_flight, 3);
        assert_eq!(generation.present_mode, PresentModePolicy::Fifo);
        assert_eq!(generation.octree_depth, 5);
    }
}
