//! Camera transform record consumed by the raycast stage.

use glam::Vec3;

/// Camera uniform buffer data for GPU.
///
/// Layout matches binding 0 of the compute descriptor set: five `vec4`s,
/// copied verbatim into the per-image uniform buffer every frame.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct CameraTransform {
    /// Eye position (w = 1).
    pub position: [f32; 4],
    /// Normalized view direction (w = 0).
    pub direction: [f32; 4],
    /// Vector from the eye to the center of the image plane.
    pub plane: [f32; 4],
    /// Half-width of the image plane, pointing right.
    pub plane_right: [f32; 4],
    /// Half-height of the image plane, pointing up.
    pub plane_up: [f32; 4],
}

impl CameraTransform {
    /// Size of the record in bytes.
    pub const SIZE: u64 = std::mem::size_of::<Self>() as u64;

    /// Build a transform from world-space vectors.
    pub fn new(position: Vec3, direction: Vec3, plane: Vec3, right: Vec3, up: Vec3) -> Self {
        Self {
            position: position.extend(1.0).to_array(),
            direction: direction.extend(0.0).to_array(),
            plane: plane.extend(0.0).to_array(),
            plane_right: right.extend(0.0).to_array(),
            plane_up: up.extend(0.0).to_array(),
        }
    }
}

/// Pure accessor for the current camera state.
///
/// Sampled once per frame by the render loop.
pub trait CameraSource {
    fn transform(&self) -> CameraTransform;
}

impl CameraSource for CameraTransform {
    fn transform(&self) -> CameraTransform {
        *self
    }
}

impl<T: CameraSource + ?Sized> CameraSource for &T {
    fn transform(&self) -> CameraTransform {
        (**self).transform()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_is_five_vec4s() {
        assert_eq!(CameraTransform::SIZE, 80);
        assert_eq!(std::mem::align_of::<CameraTransform>(), 4);
    }

    #[test]
    fn new_sets_homogeneous_w() {
        let t = CameraTransform::new(Vec3::ONE, Vec3::Z, Vec3::Z, Vec3::X, Vec3::Y);
        assert_eq!(t.position, [1.0, 1.0, 1.0, 1.0]);
        assert_eq!(t.direction[3], 0.0);
        assert_eq!(t.plane_up, [0.0, 1.0, 0.0, 0.0]);
    }
}
