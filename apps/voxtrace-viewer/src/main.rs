//! Voxtrace Demo Viewer
//!
//! Renders a procedurally animated octree with the compute ray casting
//! renderer. A background thread rewrites the octree while the camera orbits
//! around it.
//!
//! ## Usage
//!
//! ```bash
//! cargo run -p voxtrace-viewer -- [OPTIONS]
//! ```
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: Set log level (e.g., info, debug, trace)

mod app;
mod scene;

use anyhow::{bail, Context};
use voxtrace_app::{run_app, DiagnosticSeverity, EngineConfig, PresentModePolicy};

use crate::app::Viewer;

const WIDTH: u32 = 800;
const HEIGHT: u32 = 600;

/// Default octree depth for the demo. Depth 8 works but each rewrite of
/// the 19M-word buffer takes noticeably longer.
const DEPTH: u32 = 7;

fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    // Check for help flag before starting the app
    if args.iter().any(|arg| arg == "-h" || arg == "--help") {
        print_help();
        return Ok(());
    }

    run_app::<Viewer>(parse_args(&args)?)
}

/// Build the engine configuration from command line arguments.
fn parse_args(args: &[String]) -> anyhow::Result<EngineConfig> {
    let mut config = EngineConfig::new("Voxtrace - Demo Viewer")
        .with_size(WIDTH, HEIGHT)
        .with_octree_depth(DEPTH);

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        let mut value = || {
            iter.next()
                .with_context(|| format!("Missing value for {arg}"))
        };

        match arg.as_str() {
            "--depth" => {
                config.octree_depth = value()?.parse().context("Invalid --depth")?;
            }
            "--frames-in-flight" => {
                config.max_frames_in_flight =
                    value()?.parse().context("Invalid --frames-in-flight")?;
            }
            "--size" => {
                let size = value()?;
                let (w, h) = size
                    .split_once('x')
                    .with_context(|| format!("Invalid --size {size}, expected WxH"))?;
                config.width = w.parse().context("Invalid --size width")?;
                config.height = h.parse().context("Invalid --size height")?;
            }
            "--present-mode" => {
                let name = value()?;
                config.present_mode = PresentModePolicy::parse(name)
                    .with_context(|| format!("Unknown present mode {name}"))?;
            }
            "--shaders" => {
                config.shader_dir = value()?.into();
            }
            "--validation" => config.validation = true,
            "--no-validation" => config.validation = false,
            "--diagnostics" => {
                let name = value()?;
                config.diagnostics = DiagnosticSeverity::parse(name)
                    .with_context(|| format!("Unknown diagnostics level {name}"))?;
            }
            other => bail!("Unknown argument {other}, see --help"),
        }
    }

    config.validate()?;
    Ok(config)
}

fn print_help() {
    eprintln!(
        "Voxtrace Demo Viewer

USAGE:
    cargo run -p voxtrace-viewer -- [OPTIONS]

RENDERING OPTIONS:
    --depth <N>              Octree depth, 1-9 (default: {DEPTH})
    --frames-in-flight <N>   Frames recorded ahead of the GPU (default: 2)
    --size <WxH>             Initial window size (default: {WIDTH}x{HEIGHT})
    --present-mode <MODE>    immediate, mailbox or fifo (default: immediate)
    --shaders <DIR>          Directory with raycast.spv, lighting.spv and
                             render.spv (default: shaders)

DIAGNOSTICS:
    --validation             Enable Vulkan validation layers
    --no-validation          Disable Vulkan validation layers
    --diagnostics <LEVEL>    Lowest validation severity logged:
                             verbose, info, warning, error (default: warning)

OTHER:
    -h, --help               Print this help message

ENVIRONMENT VARIABLES:
    RUST_LOG                 Set log level (e.g., info, debug, trace)"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn defaults() {
        let config = parse_args(&[]).unwrap();
        assert_eq!(config.octree_depth, DEPTH);
        assert_eq!((config.width, config.height), (WIDTH, HEIGHT));
    }

    #[test]
    fn parses_options() {
        let config = parse_args(&args(&[
            "--depth",
            "5",
            "--size",
            "1024x768",
            "--present-mode",
            "fifo",
            "--frames-in-flight",
            "3",
            "--diagnostics",
            "error",
            "--shaders",
            "build/spv",
        ]))
        .unwrap();

        assert_eq!(config.octree_depth, 5);
        assert_eq!((config.width, config.height), (1024, 768));
        assert_eq!(config.present_mode, PresentModePolicy::Fifo);
        assert_eq!(config.max_frames_in_flight, 3);
        assert_eq!(config.diagnostics, DiagnosticSeverity::Error);
        assert_eq!(config.shader_dir, std::path::PathBuf::from("build/spv"));
    }

    #[test]
    fn rejects_bad_input() {
        assert!(parse_args(&args(&["--depth"])).is_err());
        assert!(parse_args(&args(&["--depth", "12"])).is_err());
        assert!(parse_args(&args(&["--size", "800"])).is_err());
        assert!(parse_args(&args(&["--present-mode", "tearing"])).is_err());
        assert!(parse_args(&args(&["--frames-in-flight", "0"])).is_err());
        assert!(parse_args(&args(&["--bogus"])).is_err());
    }
}
