//! Application runner for the Voxtrace renderer.
//!
//! This crate wires the renderer to a winit window:
//! - Engine configuration and validation
//! - Logging setup
//! - Window creation and resize forwarding
//! - Render and octree mutator threads
//!
//! # Example
//!
//! ```no_run
//! use voxtrace_app::{run_app, Camera, EngineConfig, OctreeLayout, OctreeMutator, VoxtraceApp};
//!
//! struct Solid;
//!
//! impl OctreeMutator for Solid {
//!     fn mutate(&mut self, words: &mut [u32]) -> bool {
//!         words.fill(u32::MAX);
//!         false
//!     }
//! }
//!
//! struct MyApp;
//!
//! impl VoxtraceApp for MyApp {
//!     type Mutator = Solid;
//!
//!     fn init(_config: &EngineConfig, _camera: &mut Camera) -> anyhow::Result<Self> {
//!         Ok(MyApp)
//!     }
//!
//!     fn mutator(&mut self, _layout: OctreeLayout) -> Solid {
//!         Solid
//!     }
//!
//!     fn update(&mut self, _camera: &mut Camera, _dt: f32) {}
//! }
//!
//! fn main() -> anyhow::Result<()> {
//!     run_app::<MyApp>(EngineConfig::new("Example"))
//! }
//! ```

mod app;
mod config;
mod logging;
mod runner;
mod window;

pub use app::{OctreeMutator, SharedCamera, VoxtraceApp};
pub use config::{ConfigError, EngineConfig};
pub use logging::Logging;
pub use runner::run_app;
pub use window::{window_link, WindowEvents, WindowLink};

// Re-export commonly used types for convenience
pub use voxtrace_core::OctreeLayout;
pub use voxtrace_gpu::{DiagnosticSeverity, PresentModePolicy};
pub use voxtrace_render::Camera;
pub use winit::event::WindowEvent;
