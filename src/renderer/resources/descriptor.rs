use std::sync::Arc;
use ash::vk;
use color_eyre::eyre::eyre;
use color_eyre::Result;

#[derive(Default)]
pub struct DescriptorSetLayoutBuilder<'a> {
    bindings: Vec<vk::DescriptorSetLayoutBinding<'a>>,
}

impl DescriptorSetLayoutBuilder<'_> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_binding(mut self, binding: u32, descriptor_type: vk::DescriptorType) -> Self {
        self.bindings.push(
            vk::DescriptorSetLayoutBinding::default()
                .binding(binding)
                .descriptor_type(descriptor_type)
                .descriptor_count(1),
        );
        self
    }

    pub fn bindings(&self) -> &[vk::DescriptorSetLayoutBinding<'_>] {
        &self.bindings
    }

    /// Creates the layout with every binding visible to `stages`
    pub fn build(
        mut self,
        device: &ash::Device,
        stages: vk::ShaderStageFlags,
    ) -> Result<vk::DescriptorSetLayout> {
        for binding in &mut self.bindings {
            binding.stage_flags |= stages;
        }
        let layout_info = vk::DescriptorSetLayoutCreateInfo::default()
            .bindings(&self.bindings);
        Ok(unsafe {
            device.create_descriptor_set_layout(&layout_info, None)?
        })
    }
}

/// How many descriptors of a type the pool holds per set
#[derive(Clone, Copy, Debug)]
pub struct PoolSizeRatio {
    pub descriptor_type: vk::DescriptorType,
    pub ratio: f32,
}

/// `floor(ratio * max_sets)` descriptors per type. Types that round down to nothing are
/// left out since a pool size may not be zero.
pub fn pool_sizes(max_sets: u32, ratios: &[PoolSizeRatio]) -> Vec<vk::DescriptorPoolSize> {
    ratios
        .iter()
        .map(|ratio| vk::DescriptorPoolSize {
            ty: ratio.descriptor_type,
            descriptor_count: (ratio.ratio * max_sets as f32).floor() as u32,
        })
        .filter(|size| size.descriptor_count > 0)
        .collect()
}

/// Fixed-size descriptor pool that hands out sets until it is reset as a whole
pub struct DescriptorAllocator {
    pool: vk::DescriptorPool,
    device: Arc<ash::Device>,
}

impl DescriptorAllocator {
    pub fn init(
        device: Arc<ash::Device>,
        max_sets: u32,
        ratios: &[PoolSizeRatio],
    ) -> Result<Self> {
        let sizes = pool_sizes(max_sets, ratios);
        if max_sets == 0 || sizes.is_empty() {
            return Err(eyre!("Descriptor pool for {} sets would hold no descriptors", max_sets));
        }

        let pool_info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(max_sets)
            .pool_sizes(&sizes);
        let pool = unsafe { device.create_descriptor_pool(&pool_info, None)? };

        Ok(Self { pool, device })
    }

    pub fn allocate(&self, layout: vk::DescriptorSetLayout) -> Result<vk::DescriptorSet> {
        let layouts = [layout];
        let allocate_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(self.pool)
            .set_layouts(&layouts);
        let sets = unsafe { self.device.allocate_descriptor_sets(&allocate_info)? };
        sets.into_iter()
            .next()
            .ok_or_else(|| eyre!("Descriptor pool returned no sets"))
    }

    /// Returns every set allocated so far to the pool
    pub fn reset(&self) -> Result<()> {
        unsafe {
            self.device.reset_descriptor_pool(self.pool, vk::DescriptorPoolResetFlags::empty())?;
        }
        Ok(())
    }

    pub fn destroy(&mut self) {
        if self.pool == vk::DescriptorPool::null() {
            return;
        }
        unsafe {
            self.device.destroy_descriptor_pool(self.pool, None);
        }
        self.pool = vk::DescriptorPool::null();
    }
}

impl Drop for DescriptorAllocator {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// Points `binding` of `set` at a whole buffer
pub fn write_buffer(
    device: &ash::Device,
    set: vk::DescriptorSet,
    binding: u32,
    descriptor_type: vk::DescriptorType,
    buffer: vk::Buffer,
    range: vk::DeviceSize,
) {
    let buffer_infos = [vk::DescriptorBufferInfo {
        buffer,
        offset: 0,
        range,
    }];
    let write = vk::WriteDescriptorSet::default()
        .dst_set(set)
        .dst_binding(binding)
        .descriptor_type(descriptor_type)
        .buffer_info(&buffer_infos);
    unsafe {
        device.update_descriptor_sets(&[write], &[]);
    }
}

/// Points `binding` of `set` at an image view that will be in `layout` when used
pub fn write_image(
    device: &ash::Device,
    set: vk::DescriptorSet,
    binding: u32,
    descriptor_type: vk::DescriptorType,
    view: vk::ImageView,
    layout: vk::ImageLayout,
) {
    let image_infos = [vk::DescriptorImageInfo {
        sampler: vk::Sampler::null(),
        image_view: view,
        image_layout: layout,
    }];
    let write = vk::WriteDescriptorSet::default()
        .dst_set(set)
        .dst_binding(binding)
        .descriptor_type(descriptor_type)
        .image_info(&image_infos);
    unsafe {
        device.update_descriptor_sets(&[write], &[]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_sizes_scale_with_max_sets() {
        let ratios = [
            PoolSizeRatio { descriptor_type: vk::DescriptorType::UNIFORM_BUFFER, ratio: 1.0 },
            PoolSizeRatio { descriptor_type: vk::DescriptorType::STORAGE_IMAGE, ratio: 2.5 },
        ];
        let sizes = pool_sizes(10, &ratios);

        assert_eq!(sizes.len(), 2);
        assert_eq!((sizes[0].ty, sizes[0].descriptor_count), (vk::DescriptorType::UNIFORM_BUFFER, 10));
        assert_eq!((sizes[1].ty, sizes[1].descriptor_count), (vk::DescriptorType::STORAGE_IMAGE, 25));
    }

    #[test]
    fn fractional_counts_round_down() {
        let ratios = [
            PoolSizeRatio { descriptor_type: vk::DescriptorType::SAMPLER, ratio: 0.5 },
            PoolSizeRatio { descriptor_type: vk::DescriptorType::UNIFORM_BUFFER, ratio: 0.1 },
        ];
        let sizes = pool_sizes(3, &ratios);

        assert_eq!(sizes.len(), 1);
        assert_eq!(sizes[0].descriptor_count, 1);
    }

    #[test]
    fn builder_keeps_bindings_in_order() {
        let builder = DescriptorSetLayoutBuilder::new()
            .add_binding(0, vk::DescriptorType::UNIFORM_BUFFER)
            .add_binding(1, vk::DescriptorType::COMBINED_IMAGE_SAMPLER);

        let bindings = builder.bindings();
        assert_eq!(bindings.len(), 2);
        assert_eq!(bindings[1].binding, 1);
        assert_eq!(bindings[1].descriptor_type, vk::DescriptorType::COMBINED_IMAGE_SAMPLER);
        assert_eq!(bindings[0].descriptor_count, 1);
    }
}
