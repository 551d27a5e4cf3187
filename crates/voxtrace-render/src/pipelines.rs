//! The three compute pipelines of the raycast chain.

use ash::vk;
use voxtrace_gpu::error::Result;
use voxtrace_gpu::pipeline::{u32_specialization_entries, ComputePipeline};
use voxtrace_shaders::ShaderCode;

/// Specialization constants baked into the raycast pipeline.
///
/// Constant ids follow field order: 0 width, 1 height, 2 octree depth.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct RaycastSpecialization {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
}

impl RaycastSpecialization {
    pub const COUNT: u32 = 3;

    pub fn new(extent: vk::Extent2D, depth: u32) -> Self {
        Self {
            width: extent.width,
            height: extent.height,
            depth,
        }
    }
}

/// Raycast, lighting and render pipelines sharing one descriptor-set layout.
pub struct PipelineSet {
    pub raycast: ComputePipeline,
    pub lighting: ComputePipeline,
    pub render: ComputePipeline,
}

impl PipelineSet {
    /// Build all three pipelines for the given extent.
    ///
    /// # Safety
    /// The device and descriptor-set layout must be valid.
    pub unsafe fn new(
        device: &ash::Device,
        shaders: &ShaderCode,
        set_layout: vk::DescriptorSetLayout,
        extent: vk::Extent2D,
        octree_depth: u32,
    ) -> Result<Self> {
        let set_layouts = [set_layout];

        let constants = RaycastSpecialization::new(extent, octree_depth);
        let entries = u32_specialization_entries(RaycastSpecialization::COUNT);
        let specialization = vk::SpecializationInfo::default()
            .map_entries(&entries)
            .data(bytemuck::bytes_of(&constants));

        let raycast =
            ComputePipeline::new(device, &shaders.raycast, &set_layouts, Some(&specialization))?;

        let lighting = match ComputePipeline::new(device, &shaders.lighting, &set_layouts, None) {
            Ok(pipeline) => pipeline,
            Err(e) => {
                raycast.destroy(device);
                return Err(e);
            }
        };

        let render = match ComputePipeline::new(device, &shaders.render, &set_layouts, None) {
            Ok(pipeline) => pipeline,
            Err(e) => {
                raycast.destroy(device);
                lighting.destroy(device);
                return Err(e);
            }
        };

        tracing::debug!(
            "Compute pipelines built for {}x{}, depth {octree_depth}",
            extent.width,
            extent.height
        );

        Ok(Self {
            raycast,
            lighting,
            render,
        })
    }

    /// Destroy all pipelines and their layouts.
    ///
    /// # Safety
    /// The device must be valid and no pipeline may be in use.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        self.raycast.destroy(device);
        self.lighting.destroy(device);
        self.render.destroy(device);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn specialization_bytes_follow_constant_ids() {
        let constants = RaycastSpecialization::new(
            vk::Extent2D {
                width: 1280,
                height: 720,
            },
            8,
        );
        let bytes = bytemuck::bytes_of(&constants);
        let entries = u32_specialization_entries(RaycastSpecialization::COUNT);

        assert_eq!(bytes.len(), 12);
        let read = |id: usize| {
            let offset = entries[id].offset as usize;
            u32::from_ne_bytes(bytes[offset..offset + 4].try_into().unwrap())
        };
        assert_eq!(read(0), 1280);
        assert_eq!(read(1), 720);
        assert_eq!(read(2), 8);
    }
}
