//! Pre-recorded command buffers for the compute chain.
//!
//! Every swapchain image gets two command buffers, recorded once per
//! generation: a resident variant that renders from the octree already on
//! the GPU, and an upload variant that first copies the staging buffer into
//! the octree buffer. The table is laid out as `[resident; n][upload; n]`.

use crate::pipelines::PipelineSet;
use ash::vk;
use voxtrace_gpu::command::{record, CommandPool};
use voxtrace_gpu::error::{GpuError, Result};
use voxtrace_gpu::swapchain::color_subresource_range;

/// Work groups dispatched by the lighting stage.
pub const LIGHTING_GROUPS: u32 = 65_536;

/// Which pre-recorded command buffer a frame submits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameVariant {
    /// Render from the octree already resident on the GPU.
    Resident,
    /// Copy staging into the octree buffer, then render.
    Upload,
}

/// Compute stage of the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Raycast,
    Lighting,
    Render,
}

/// One recorded operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanStep {
    /// Full-range copy of the staging buffer into the octree buffer.
    CopyOctree { size: u64 },
    /// Octree writes become visible to compute reads and the image moves
    /// from UNDEFINED to GENERAL.
    PrepareFrame {
        src_stage: vk::PipelineStageFlags2,
        src_access: vk::AccessFlags2,
    },
    /// Bind the stage pipeline and dispatch.
    Dispatch { stage: Stage, groups: [u32; 3] },
    /// Lighting buffer and image writes become visible to the next stage.
    StageBarrier,
    /// Image moves from GENERAL to PRESENT_SRC.
    PresentBarrier,
}

/// The command sequence of one variant for one extent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FramePlan {
    pub variant: FrameVariant,
    pub steps: Vec<PlanStep>,
}

impl FramePlan {
    pub fn new(variant: FrameVariant, extent: vk::Extent2D, octree_bytes: u64) -> Self {
        let (src_stage, src_access) = match variant {
            FrameVariant::Upload => (
                vk::PipelineStageFlags2::TRANSFER,
                vk::AccessFlags2::TRANSFER_WRITE,
            ),
            FrameVariant::Resident => (
                vk::PipelineStageFlags2::COMPUTE_SHADER,
                vk::AccessFlags2::NONE,
            ),
        };

        let mut steps = Vec::with_capacity(8);
        if variant == FrameVariant::Upload {
            steps.push(PlanStep::CopyOctree { size: octree_bytes });
        }
        steps.extend([
            PlanStep::PrepareFrame {
                src_stage,
                src_access,
            },
            PlanStep::Dispatch {
                stage: Stage::Raycast,
                groups: raycast_groups(extent),
            },
            PlanStep::StageBarrier,
            PlanStep::Dispatch {
                stage: Stage::Lighting,
                groups: [LIGHTING_GROUPS, 1, 1],
            },
            PlanStep::StageBarrier,
            PlanStep::Dispatch {
                stage: Stage::Render,
                groups: render_groups(extent),
            },
            PlanStep::PresentBarrier,
        ]);

        Self { variant, steps }
    }

    /// Work-group counts of every dispatch, in order.
    pub fn dispatches(&self) -> impl Iterator<Item = (Stage, [u32; 3])> + '_ {
        self.steps.iter().filter_map(|step| match *step {
            PlanStep::Dispatch { stage, groups } => Some((stage, groups)),
            _ => None,
        })
    }
}

/// One 8x8 group per tile, rounded up.
pub fn raycast_groups(extent: vk::Extent2D) -> [u32; 3] {
    [extent.width.div_ceil(8), extent.height.div_ceil(8), 1]
}

/// One 16x16 group per tile plus one spare row and column.
pub fn render_groups(extent: vk::Extent2D) -> [u32; 3] {
    [extent.width / 16 + 1, extent.height / 16 + 1, 1]
}

/// Command buffers of one generation, `[resident; n][upload; n]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandBufferTable {
    buffers: Vec<vk::CommandBuffer>,
    image_count: usize,
}

impl CommandBufferTable {
    pub fn new(buffers: Vec<vk::CommandBuffer>, image_count: usize) -> Result<Self> {
        if buffers.len() != 2 * image_count {
            return Err(GpuError::InvalidState(format!(
                "Command buffer table needs {} buffers, got {}",
                2 * image_count,
                buffers.len()
            )));
        }
        Ok(Self {
            buffers,
            image_count,
        })
    }

    /// Table index of an image's buffer for a variant.
    pub fn index(&self, image: usize, variant: FrameVariant) -> usize {
        table_index(image, variant, self.image_count)
    }

    pub fn get(&self, index: usize) -> Option<vk::CommandBuffer> {
        self.buffers.get(index).copied()
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    pub fn image_count(&self) -> usize {
        self.image_count
    }
}

/// `image` for the resident variant, `image + image_count` for upload.
pub fn table_index(image: usize, variant: FrameVariant, image_count: usize) -> usize {
    match variant {
        FrameVariant::Resident => image,
        FrameVariant::Upload => image + image_count,
    }
}

/// Everything a recorded command buffer references.
pub struct RecordTargets<'a> {
    pub images: &'a [vk::Image],
    pub descriptor_sets: &'a [vk::DescriptorSet],
    pub pipelines: &'a PipelineSet,
    pub extent: vk::Extent2D,
    pub staging: vk::Buffer,
    pub octree: vk::Buffer,
    pub lighting: vk::Buffer,
    pub octree_bytes: u64,
}

/// Allocate and record the full table for a generation.
///
/// # Safety
/// All handles in `targets` must be valid and outlive the table.
pub unsafe fn record_table(
    device: &ash::Device,
    pool: &CommandPool,
    targets: &RecordTargets<'_>,
) -> Result<CommandBufferTable> {
    let image_count = targets.images.len();
    let buffers = pool.allocate(device, 2 * image_count)?;
    let table = CommandBufferTable::new(buffers, image_count)?;

    for variant in [FrameVariant::Resident, FrameVariant::Upload] {
        let plan = FramePlan::new(variant, targets.extent, targets.octree_bytes);
        for image in 0..image_count {
            let cmd = table.buffers[table.index(image, variant)];
            record_plan(device, cmd, &plan, image, targets)?;
        }
    }

    tracing::debug!("Recorded {} command buffers", table.len());
    Ok(table)
}

unsafe fn record_plan(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    plan: &FramePlan,
    image: usize,
    targets: &RecordTargets<'_>,
) -> Result<()> {
    record(device, cmd, |cmd| {
        for &step in &plan.steps {
            record_step(device, cmd, step, image, targets);
        }
        Ok(())
    })
}

unsafe fn record_step(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    step: PlanStep,
    image: usize,
    targets: &RecordTargets<'_>,
) {
    let swapchain_image = targets.images[image];

    match step {
        PlanStep::CopyOctree { size } => {
            // Earlier frames may still be reading the octree
            let barrier = buffer_barrier(targets.octree)
                .src_stage_mask(vk::PipelineStageFlags2::COMPUTE_SHADER)
                .src_access_mask(vk::AccessFlags2::SHADER_STORAGE_READ)
                .dst_stage_mask(vk::PipelineStageFlags2::TRANSFER)
                .dst_access_mask(vk::AccessFlags2::TRANSFER_WRITE);
            let dependency = vk::DependencyInfo::default()
                .buffer_memory_barriers(std::slice::from_ref(&barrier));
            device.cmd_pipeline_barrier2(cmd, &dependency);

            let region = vk::BufferCopy::default()
                .src_offset(0)
                .dst_offset(0)
                .size(size);
            device.cmd_copy_buffer(cmd, targets.staging, targets.octree, &[region]);
        }
        PlanStep::PrepareFrame {
            src_stage,
            src_access,
        } => {
            let buffers =
                frame_start_barriers(targets.octree, targets.lighting, src_stage, src_access);
            let image_barrier = image_barrier(swapchain_image)
                .src_stage_mask(vk::PipelineStageFlags2::COMPUTE_SHADER)
                .src_access_mask(vk::AccessFlags2::NONE)
                .dst_stage_mask(vk::PipelineStageFlags2::COMPUTE_SHADER)
                .dst_access_mask(vk::AccessFlags2::SHADER_STORAGE_WRITE)
                .old_layout(vk::ImageLayout::UNDEFINED)
                .new_layout(vk::ImageLayout::GENERAL);
            let dependency = vk::DependencyInfo::default()
                .buffer_memory_barriers(&buffers)
                .image_memory_barriers(std::slice::from_ref(&image_barrier));
            device.cmd_pipeline_barrier2(cmd, &dependency);
        }
        PlanStep::Dispatch { stage, groups } => {
            let pipeline = match stage {
                Stage::Raycast => &targets.pipelines.raycast,
                Stage::Lighting => &targets.pipelines.lighting,
                Stage::Render => &targets.pipelines.render,
            };
            device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::COMPUTE, pipeline.pipeline);
            // All three layouts are compatible, the set stays bound
            if stage == Stage::Raycast {
                device.cmd_bind_descriptor_sets(
                    cmd,
                    vk::PipelineBindPoint::COMPUTE,
                    pipeline.layout,
                    0,
                    &[targets.descriptor_sets[image]],
                    &[],
                );
            }
            device.cmd_dispatch(cmd, groups[0], groups[1], groups[2]);
        }
        PlanStep::StageBarrier => {
            let access =
                vk::AccessFlags2::SHADER_STORAGE_READ | vk::AccessFlags2::SHADER_STORAGE_WRITE;
            let lighting = buffer_barrier(targets.lighting)
                .src_stage_mask(vk::PipelineStageFlags2::COMPUTE_SHADER)
                .src_access_mask(vk::AccessFlags2::SHADER_STORAGE_WRITE)
                .dst_stage_mask(vk::PipelineStageFlags2::COMPUTE_SHADER)
                .dst_access_mask(access);
            let image_barrier = image_barrier(swapchain_image)
                .src_stage_mask(vk::PipelineStageFlags2::COMPUTE_SHADER)
                .src_access_mask(vk::AccessFlags2::SHADER_STORAGE_WRITE)
                .dst_stage_mask(vk::PipelineStageFlags2::COMPUTE_SHADER)
                .dst_access_mask(access)
                .old_layout(vk::ImageLayout::GENERAL)
                .new_layout(vk::ImageLayout::GENERAL);
            let dependency = vk::DependencyInfo::default()
                .buffer_memory_barriers(std::slice::from_ref(&lighting))
                .image_memory_barriers(std::slice::from_ref(&image_barrier));
            device.cmd_pipeline_barrier2(cmd, &dependency);
        }
        PlanStep::PresentBarrier => {
            let image_barrier = image_barrier(swapchain_image)
                .src_stage_mask(vk::PipelineStageFlags2::COMPUTE_SHADER)
                .src_access_mask(vk::AccessFlags2::SHADER_STORAGE_WRITE)
                .dst_stage_mask(vk::PipelineStageFlags2::BOTTOM_OF_PIPE)
                .dst_access_mask(vk::AccessFlags2::NONE)
                .old_layout(vk::ImageLayout::GENERAL)
                .new_layout(vk::ImageLayout::PRESENT_SRC_KHR);
            let dependency = vk::DependencyInfo::default()
                .image_memory_barriers(std::slice::from_ref(&image_barrier));
            device.cmd_pipeline_barrier2(cmd, &dependency);
        }
    }
}

/// Buffer barriers opening a frame. The octree waits for the upload copy
/// (or earlier reads), and the shared lighting buffer waits for the
/// previous submission's lighting writes.
fn frame_start_barriers(
    octree: vk::Buffer,
    lighting: vk::Buffer,
    octree_src_stage: vk::PipelineStageFlags2,
    octree_src_access: vk::AccessFlags2,
) -> [vk::BufferMemoryBarrier2<'static>; 2] {
    [
        buffer_barrier(octree)
            .src_stage_mask(octree_src_stage)
            .src_access_mask(octree_src_access)
            .dst_stage_mask(vk::PipelineStageFlags2::COMPUTE_SHADER)
            .dst_access_mask(vk::AccessFlags2::SHADER_STORAGE_READ),
        buffer_barrier(lighting)
            .src_stage_mask(vk::PipelineStageFlags2::COMPUTE_SHADER)
            .src_access_mask(vk::AccessFlags2::SHADER_STORAGE_WRITE)
            .dst_stage_mask(vk::PipelineStageFlags2::COMPUTE_SHADER)
            .dst_access_mask(
                vk::AccessFlags2::SHADER_STORAGE_READ | vk::AccessFlags2::SHADER_STORAGE_WRITE,
            ),
    ]
}

fn buffer_barrier(buffer: vk::Buffer) -> vk::BufferMemoryBarrier2<'static> {
    vk::BufferMemoryBarrier2::default()
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .buffer(buffer)
        .offset(0)
        .size(vk::WHOLE_SIZE)
}

fn image_barrier(image: vk::Image) -> vk::ImageMemoryBarrier2<'static> {
    vk::ImageMemoryBarrier2::default()
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(color_subresource_range())
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXTENT: vk::Extent2D = vk::Extent2D {
        width: 800,
        height: 600,
    };

    #[test]
    fn upload_plan_copies_first() {
        let plan = FramePlan::new(FrameVariant::Upload, EXTENT, 4096);
        assert_eq!(plan.steps[0], PlanStep::CopyOctree { size: 4096 });
        assert_eq!(
            plan.steps[1],
            PlanStep::PrepareFrame {
                src_stage: vk::PipelineStageFlags2::TRANSFER,
                src_access: vk::AccessFlags2::TRANSFER_WRITE,
            }
        );
        assert_eq!(plan.steps.last(), Some(&PlanStep::PresentBarrier));
    }

    #[test]
    fn resident_plan_has_no_copy() {
        let plan = FramePlan::new(FrameVariant::Resident, EXTENT, 4096);
        assert!(!plan
            .steps
            .iter()
            .any(|step| matches!(step, PlanStep::CopyOctree { .. })));
        assert_eq!(
            plan.steps[0],
            PlanStep::PrepareFrame {
                src_stage: vk::PipelineStageFlags2::COMPUTE_SHADER,
                src_access: vk::AccessFlags2::NONE,
            }
        );
        assert_eq!(plan.steps.len(), 7);
    }

    #[test]
    fn dispatch_sizes() {
        let plan = FramePlan::new(FrameVariant::Resident, EXTENT, 0);
        let dispatches: Vec<_> = plan.dispatches().collect();
        assert_eq!(
            dispatches,
            vec![
                (Stage::Raycast, [100, 75, 1]),
                (Stage::Lighting, [65_536, 1, 1]),
                (Stage::Render, [51, 38, 1]),
            ]
        );

        let odd = vk::Extent2D {
            width: 801,
            height: 1,
        };
        assert_eq!(raycast_groups(odd), [101, 1, 1]);
        assert_eq!(render_groups(odd), [51, 1, 1]);
    }

    #[test]
    fn variants_share_lighting_and_render_work() {
        for extent in [
            EXTENT,
            vk::Extent2D {
                width: 1,
                height: 1,
            },
            vk::Extent2D {
                width: 2560,
                height: 1441,
            },
        ] {
            let resident = FramePlan::new(FrameVariant::Resident, extent, 64);
            let upload = FramePlan::new(FrameVariant::Upload, extent, 64);
            assert!(resident.dispatches().eq(upload.dispatches()));
        }
    }

    #[test]
    fn table_layout() {
        let buffers = vec![vk::CommandBuffer::null(); 6];
        let table = CommandBufferTable::new(buffers, 3).unwrap();
        assert_eq!(table.len(), 6);
        assert_eq!(table.index(1, FrameVariant::Resident), 1);
        assert_eq!(table.index(1, FrameVariant::Upload), 4);
        assert!(table.get(6).is_none());
    }

    #[test]
    fn table_rejects_odd_length() {
        let buffers = vec![vk::CommandBuffer::null(); 5];
        assert!(matches!(
            CommandBufferTable::new(buffers, 3),
            Err(GpuError::InvalidState(_))
        ));
    }

    #[test]
    fn frame_start_orders_lighting_after_previous_writes() {
        use ash::vk::Handle;

        let octree = vk::Buffer::from_raw(1);
        let lighting = vk::Buffer::from_raw(2);
        let [octree_barrier, lighting_barrier] = frame_start_barriers(
            octree,
            lighting,
            vk::PipelineStageFlags2::TRANSFER,
            vk::AccessFlags2::TRANSFER_WRITE,
        );

        assert_eq!(octree_barrier.buffer, octree);
        assert_eq!(octree_barrier.src_stage_mask, vk::PipelineStageFlags2::TRANSFER);
        assert_eq!(
            octree_barrier.dst_access_mask,
            vk::AccessFlags2::SHADER_STORAGE_READ
        );

        assert_eq!(lighting_barrier.buffer, lighting);
        assert_eq!(
            lighting_barrier.src_stage_mask,
            vk::PipelineStageFlags2::COMPUTE_SHADER
        );
        assert_eq!(
            lighting_barrier.src_access_mask,
            vk::AccessFlags2::SHADER_STORAGE_WRITE
        );
        assert!(lighting_barrier
            .dst_access_mask
            .contains(vk::AccessFlags2::SHADER_STORAGE_WRITE));
    }
}
