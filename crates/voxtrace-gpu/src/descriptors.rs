//! Descriptor set layouts, pools and batched writes.

use crate::error::Result;
use ash::vk;

/// Builds a layout whose bindings all live in one descriptor set.
#[derive(Default)]
pub struct DescriptorSetLayoutBuilder<'a> {
    bindings: Vec<vk::DescriptorSetLayoutBinding<'a>>,
}

impl<'a> DescriptorSetLayoutBuilder<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Single descriptor of type `ty` visible to `stages`.
    pub fn single(mut self, binding: u32, ty: vk::DescriptorType, stages: vk::ShaderStageFlags) -> Self {
        self.bindings.push(
            vk::DescriptorSetLayoutBinding::default()
                .binding(binding)
                .descriptor_type(ty)
                .descriptor_count(1)
                .stage_flags(stages),
        );
        self
    }

    pub fn uniform_buffer(self, binding: u32, stages: vk::ShaderStageFlags) -> Self {
        self.single(binding, vk::DescriptorType::UNIFORM_BUFFER, stages)
    }

    pub fn storage_buffer(self, binding: u32, stages: vk::ShaderStageFlags) -> Self {
        self.single(binding, vk::DescriptorType::STORAGE_BUFFER, stages)
    }

    pub fn storage_image(self, binding: u32, stages: vk::ShaderStageFlags) -> Self {
        self.single(binding, vk::DescriptorType::STORAGE_IMAGE, stages)
    }

    /// Pool sizes for `sets` copies of this layout, one entry per
    /// descriptor type.
    pub fn pool_sizes(&self, sets: u32) -> Vec<vk::DescriptorPoolSize> {
        let mut sizes: Vec<vk::DescriptorPoolSize> = Vec::new();
        for binding in &self.bindings {
            let count = binding.descriptor_count * sets;
            match sizes.iter_mut().find(|s| s.ty == binding.descriptor_type) {
                Some(size) => size.descriptor_count += count,
                None => sizes.push(vk::DescriptorPoolSize {
                    ty: binding.descriptor_type,
                    descriptor_count: count,
                }),
            }
        }
        sizes
    }

    /// # Safety
    /// The device must be valid.
    pub unsafe fn build(&self, device: &ash::Device) -> Result<vk::DescriptorSetLayout> {
        let info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&self.bindings);
        Ok(device.create_descriptor_set_layout(&info, None)?)
    }
}

/// Fixed-size pool. Sets are never freed individually; destroying the
/// pool releases them all.
pub struct DescriptorPool {
    pool: vk::DescriptorPool,
}

impl DescriptorPool {
    /// # Safety
    /// The device must be valid.
    pub unsafe fn new(
        device: &ash::Device,
        max_sets: u32,
        pool_sizes: &[vk::DescriptorPoolSize],
    ) -> Result<Self> {
        let info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(max_sets)
            .pool_sizes(pool_sizes);
        let pool = device.create_descriptor_pool(&info, None)?;
        Ok(Self { pool })
    }

    pub fn handle(&self) -> vk::DescriptorPool {
        self.pool
    }

    /// One set per entry of `layouts`, in order.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn allocate(
        &self,
        device: &ash::Device,
        layouts: &[vk::DescriptorSetLayout],
    ) -> Result<Vec<vk::DescriptorSet>> {
        let info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(self.pool)
            .set_layouts(layouts);
        Ok(device.allocate_descriptor_sets(&info)?)
    }

    /// # Safety
    /// No set from the pool may be used by pending work.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_descriptor_pool(self.pool, None);
    }
}

enum Resource {
    Buffer(vk::DescriptorBufferInfo),
    Image(vk::DescriptorImageInfo),
}

struct PendingWrite {
    set: vk::DescriptorSet,
    binding: u32,
    ty: vk::DescriptorType,
    resource: Resource,
}

/// Collects descriptor writes and flushes them in one
/// `vkUpdateDescriptorSets` call.
#[derive(Default)]
pub struct DescriptorWrites {
    pending: Vec<PendingWrite>,
}

impl DescriptorWrites {
    pub fn new() -> Self {
        Self::default()
    }

    fn buffer(
        mut self,
        set: vk::DescriptorSet,
        binding: u32,
        ty: vk::DescriptorType,
        buffer: vk::Buffer,
        range: vk::DeviceSize,
    ) -> Self {
        let info = vk::DescriptorBufferInfo::default()
            .buffer(buffer)
            .offset(0)
            .range(range);
        self.pending.push(PendingWrite {
            set,
            binding,
            ty,
            resource: Resource::Buffer(info),
        });
        self
    }

    pub fn uniform_buffer(
        self,
        set: vk::DescriptorSet,
        binding: u32,
        buffer: vk::Buffer,
        range: vk::DeviceSize,
    ) -> Self {
        self.buffer(set, binding, vk::DescriptorType::UNIFORM_BUFFER, buffer, range)
    }

    /// Binds the whole buffer.
    pub fn storage_buffer(self, set: vk::DescriptorSet, binding: u32, buffer: vk::Buffer) -> Self {
        self.buffer(
            set,
            binding,
            vk::DescriptorType::STORAGE_BUFFER,
            buffer,
            vk::WHOLE_SIZE,
        )
    }

    /// Storage image accessed in `GENERAL` layout.
    pub fn storage_image(
        mut self,
        set: vk::DescriptorSet,
        binding: u32,
        sampler: vk::Sampler,
        view: vk::ImageView,
    ) -> Self {
        let info = vk::DescriptorImageInfo::default()
            .sampler(sampler)
            .image_view(view)
            .image_layout(vk::ImageLayout::GENERAL);
        self.pending.push(PendingWrite {
            set,
            binding,
            ty: vk::DescriptorType::STORAGE_IMAGE,
            resource: Resource::Image(info),
        });
        self
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// # Safety
    /// Every set and resource must be valid and the sets not in use.
    pub unsafe fn apply(self, device: &ash::Device) {
        let writes: Vec<vk::WriteDescriptorSet<'_>> = self
            .pending
            .iter()
            .map(|w| {
                let write = vk::WriteDescriptorSet::default()
                    .dst_set(w.set)
                    .dst_binding(w.binding)
                    .descriptor_type(w.ty);
                match &w.resource {
                    Resource::Buffer(info) => write.buffer_info(std::slice::from_ref(info)),
                    Resource::Image(info) => write.image_info(std::slice::from_ref(info)),
                }
            })
            .collect();
        device.update_descriptor_sets(&writes, &[]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_sizes_merge_types() {
        let builder = DescriptorSetLayoutBuilder::new()
            .uniform_buffer(0, vk::ShaderStageFlags::COMPUTE)
            .storage_buffer(1, vk::ShaderStageFlags::COMPUTE)
            .storage_buffer(2, vk::ShaderStageFlags::COMPUTE)
            .storage_image(3, vk::ShaderStageFlags::COMPUTE);

        let sizes = builder.pool_sizes(3);
        assert_eq!(sizes.len(), 3);

        let count = |ty| {
            sizes
                .iter()
                .find(|s| s.ty == ty)
                .map(|s| s.descriptor_count)
        };
        assert_eq!(count(vk::DescriptorType::UNIFORM_BUFFER), Some(3));
        assert_eq!(count(vk::DescriptorType::STORAGE_BUFFER), Some(6));
        assert_eq!(count(vk::DescriptorType::STORAGE_IMAGE), Some(3));
    }

    #[test]
    fn writes_are_batched() {
        let set = vk::DescriptorSet::null();
        let writes = DescriptorWrites::new()
            .uniform_buffer(set, 0, vk::Buffer::null(), 64)
            .storage_buffer(set, 1, vk::Buffer::null())
            .storage_image(set, 3, vk::Sampler::null(), vk::ImageView::null());

        assert_eq!(writes.len(), 3);
        assert!(matches!(
            writes.pending[1].resource,
            Resource::Buffer(info) if info.range == vk::WHOLE_SIZE
        ));
        assert_eq!(writes.pending[2].ty, vk::DescriptorType::STORAGE_IMAGE);
    }
}
