//! Compute pipelines built straight from SPIR-V.

use crate::error::{GpuError, Result};
use ash::vk;

/// A compute pipeline and the layout it owns.
pub struct ComputePipeline {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
}

impl ComputePipeline {
    /// Build a pipeline with entry point `main`. The shader module is
    /// destroyed before returning.
    ///
    /// # Safety
    /// The device must be valid and `code` must be valid SPIR-V.
    pub unsafe fn new(
        device: &ash::Device,
        code: &[u32],
        set_layouts: &[vk::DescriptorSetLayout],
        specialization: Option<&vk::SpecializationInfo<'_>>,
    ) -> Result<Self> {
        let module = device
            .create_shader_module(&vk::ShaderModuleCreateInfo::default().code(code), None)
            .map_err(|e| GpuError::Shader(e.to_string()))?;

        let layout_info = vk::PipelineLayoutCreateInfo::default().set_layouts(set_layouts);
        let layout = match device.create_pipeline_layout(&layout_info, None) {
            Ok(layout) => layout,
            Err(e) => {
                device.destroy_shader_module(module, None);
                return Err(GpuError::Pipeline(e.to_string()));
            }
        };

        let mut stage = vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::COMPUTE)
            .module(module)
            .name(c"main");
        if let Some(info) = specialization {
            stage = stage.specialization_info(info);
        }
        let create_info = vk::ComputePipelineCreateInfo::default()
            .stage(stage)
            .layout(layout);

        let created =
            device.create_compute_pipelines(vk::PipelineCache::null(), &[create_info], None);
        device.destroy_shader_module(module, None);

        match created.map(|pipelines| pipelines.first().copied()) {
            Ok(Some(pipeline)) => Ok(Self { pipeline, layout }),
            Ok(None) => {
                device.destroy_pipeline_layout(layout, None);
                Err(GpuError::Pipeline("Driver returned no pipeline".to_string()))
            }
            Err((_, e)) => {
                device.destroy_pipeline_layout(layout, None);
                Err(GpuError::Pipeline(e.to_string()))
            }
        }
    }

    /// # Safety
    /// No pending command buffer may reference the pipeline.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_pipeline(self.pipeline, None);
        device.destroy_pipeline_layout(self.layout, None);
    }
}

/// Map entries for `count` tightly packed `u32` constants with ids
/// `0..count`.
pub fn u32_specialization_entries(count: u32) -> Vec<vk::SpecializationMapEntry> {
    const WORD: u32 = std::mem::size_of::<u32>() as u32;
    (0..count)
        .map(|id| vk::SpecializationMapEntry {
            constant_id: id,
            offset: id * WORD,
            size: WORD as usize,
        })
        .collect()
}
