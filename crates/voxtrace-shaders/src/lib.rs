//! SPIR-V shader loading for the Voxtrace renderer.
//!
//! The three compute stages ship as precompiled binaries. Nothing here
//! interprets them beyond checking that they look like SPIR-V.

use std::path::{Path, PathBuf};
use thiserror::Error;

/// SPIR-V magic number, first word of every module.
pub const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Default directory holding the shader binaries.
pub const DEFAULT_SHADER_DIR: &str = "shaders";

/// Shader loading errors.
#[derive(Error, Debug)]
pub enum ShaderError {
    #[error("Failed to read shader {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Shader {path} is {len} bytes, not a multiple of 4")]
    Misaligned { path: PathBuf, len: usize },

    #[error("Shader {path} does not start with the SPIR-V magic number")]
    BadMagic { path: PathBuf },
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, ShaderError>;

/// Convert little-endian bytes to SPIR-V words.
///
/// Returns `None` when the length is not a multiple of 4.
pub fn bytes_to_spirv(bytes: &[u8]) -> Option<Vec<u32>> {
    if bytes.len() % 4 != 0 {
        return None;
    }
    Some(
        bytes
            .chunks_exact(4)
            .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect(),
    )
}

/// Read a SPIR-V binary from disk.
pub fn load_spirv(path: impl AsRef<Path>) -> Result<Vec<u32>> {
    let path = path.as_ref();
    let bytes = std::fs::read(path).map_err(|source| ShaderError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let words = bytes_to_spirv(&bytes).ok_or_else(|| ShaderError::Misaligned {
        path: path.to_path_buf(),
        len: bytes.len(),
    })?;

    if words.first() != Some(&SPIRV_MAGIC) {
        return Err(ShaderError::BadMagic {
            path: path.to_path_buf(),
        });
    }

    tracing::debug!("Loaded shader {} ({} words)", path.display(), words.len());
    Ok(words)
}

/// Locations of the three compute stage binaries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderSet {
    pub raycast: PathBuf,
    pub lighting: PathBuf,
    pub render: PathBuf,
}

impl ShaderSet {
    /// `raycast.spv`, `lighting.spv` and `render.spv` under `dir`.
    pub fn from_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            raycast: dir.join("raycast.spv"),
            lighting: dir.join("lighting.spv"),
            render: dir.join("render.spv"),
        }
    }

    /// Load all three binaries.
    pub fn load(&self) -> Result<ShaderCode> {
        Ok(ShaderCode {
            raycast: load_spirv(&self.raycast)?,
            lighting: load_spirv(&self.lighting)?,
            render: load_spirv(&self.render)?,
        })
    }
}

impl Default for ShaderSet {
    fn default() -> Self {
        Self::from_dir(DEFAULT_SHADER_DIR)
    }
}

/// Loaded SPIR-V words of the three stages.
#[derive(Debug, Clone)]
pub struct ShaderCode {
    pub raycast: Vec<u32>,
    pub lighting: Vec<u32>,
    pub render: Vec<u32>,
}
