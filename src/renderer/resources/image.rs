use std::sync::{Arc, PoisonError};
use ash::vk;
use color_eyre::eyre::eyre;
use color_eyre::Result;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use gpu_allocator::MemoryLocation;
use crate::renderer::resources::{release_once, MemoryAllocator};

pub struct ImageDesc {
    pub format: vk::Format,
    pub extent: vk::Extent3D,
    pub usage: vk::ImageUsageFlags,
    pub aspect: vk::ImageAspectFlags,
    pub name: String,
}

/// GPU-only image with a full-range view. Released exactly once, either through
/// [`GpuImage::destroy`] or on drop.
#[derive(Default)]
pub struct GpuImage {
    pub image: vk::Image,
    pub view: vk::ImageView,
    pub format: vk::Format,
    pub extent: vk::Extent3D,
    pub aspect: vk::ImageAspectFlags,

    memory: Option<ImageMemory>,
}

struct ImageMemory {
    allocation: Allocation,
    allocator: MemoryAllocator,
    device: Arc<ash::Device>,
}

impl GpuImage {
    pub fn new(
        desc: &ImageDesc,
        allocator: MemoryAllocator,
        device: Arc<ash::Device>,
    ) -> Result<Self> {
        let image = {
            let info = vk::ImageCreateInfo::default()
                .format(desc.format)
                .usage(desc.usage)
                .extent(desc.extent)
                .image_type(vk::ImageType::TYPE_2D)
                .mip_levels(1)
                .array_layers(1)
                .samples(vk::SampleCountFlags::TYPE_1)
                .tiling(vk::ImageTiling::OPTIMAL);
            unsafe { device.create_image(&info, None)? }
        };

        let requirements = unsafe { device.get_image_memory_requirements(image) };
        let allocation = allocator
            .lock()
            .map_err(|e| eyre!(e.to_string()))?
            .allocate(&AllocationCreateDesc {
                name: &desc.name,
                requirements,
                location: MemoryLocation::GpuOnly,
                linear: false,
                allocation_scheme: AllocationScheme::DedicatedImage(image),
            });
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(err) => {
                unsafe { device.destroy_image(image, None) };
                return Err(err.into());
            }
        };

        let (memory, offset) = unsafe { (allocation.memory(), allocation.offset()) };
        let view_device = device.clone();

        // From here on a failure drops `gpu_image`, which frees the memory and the image
        let mut gpu_image = Self {
            image,
            view: vk::ImageView::null(),
            format: desc.format,
            extent: desc.extent,
            aspect: desc.aspect,
            memory: Some(ImageMemory {
                allocation,
                allocator,
                device,
            }),
        };
        let view_info = vk::ImageViewCreateInfo::default()
            .view_type(vk::ImageViewType::TYPE_2D)
            .image(image)
            .format(desc.format)
            .subresource_range(full_range(desc.aspect));
        gpu_image.view = unsafe {
            view_device.bind_image_memory(image, memory, offset)?;
            view_device.create_image_view(&view_info, None)?
        };

        Ok(gpu_image)
    }

    /// Off-screen color target that frames are drawn into and then blitted to the swapchain
    pub fn new_draw_image(
        extent: vk::Extent2D,
        format: vk::Format,
        allocator: MemoryAllocator,
        device: Arc<ash::Device>,
    ) -> Result<Self> {
        let desc = ImageDesc {
            format,
            extent: vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            },
            usage: vk::ImageUsageFlags::TRANSFER_SRC
                | vk::ImageUsageFlags::TRANSFER_DST
                | vk::ImageUsageFlags::STORAGE
                | vk::ImageUsageFlags::COLOR_ATTACHMENT,
            aspect: vk::ImageAspectFlags::COLOR,
            name: "Draw image".into(),
        };
        Self::new(&desc, allocator, device)
    }

    pub fn extent_2d(&self) -> vk::Extent2D {
        vk::Extent2D {
            width: self.extent.width,
            height: self.extent.height,
        }
    }

    pub fn is_destroyed(&self) -> bool {
        self.memory.is_none()
    }

    /// Releases the view, the memory, and the image. A second call only logs an error.
    pub fn destroy(&mut self) -> bool {
        let (image, view) = (self.image, self.view);
        let released = release_once(&mut self.memory, "Image", |memory| unsafe {
            memory.device.destroy_image_view(view, None);
            let freed = memory.allocator
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .free(memory.allocation);
            if let Err(err) = freed {
                log::error!("Failed to free image memory: {}", err);
            }
            memory.device.destroy_image(image, None);
        });
        self.image = vk::Image::null();
        self.view = vk::ImageView::null();
        released
    }

    pub fn transition(
        device: &ash::Device,
        cmd: vk::CommandBuffer,
        image: vk::Image,
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
    ) {
        if old_layout == new_layout {
            return;
        }

        let barriers = [vk::ImageMemoryBarrier2::default()
            .src_stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
            .src_access_mask(vk::AccessFlags2::MEMORY_WRITE)
            .dst_stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
            .dst_access_mask(vk::AccessFlags2::MEMORY_WRITE | vk::AccessFlags2::MEMORY_READ)
            .old_layout(old_layout)
            .new_layout(new_layout)
            .subresource_range(full_range(aspect_for_layout(new_layout)))
            .image(image)];
        let dep_info = vk::DependencyInfo::default().image_memory_barriers(&barriers);

        unsafe {
            device.cmd_pipeline_barrier2(cmd, &dep_info);
        }
    }

    /// Copies all of `src` onto all of `dst` with linear filtering, scaling as needed.
    /// `src` must be in TRANSFER_SRC_OPTIMAL and `dst` in TRANSFER_DST_OPTIMAL.
    pub fn blit(
        device: &ash::Device,
        cmd: vk::CommandBuffer,
        src: vk::Image,
        dst: vk::Image,
        src_size: vk::Extent2D,
        dst_size: vk::Extent2D,
    ) {
        let color_layer = vk::ImageSubresourceLayers {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            mip_level: 0,
            base_array_layer: 0,
            layer_count: 1,
        };
        let regions = [vk::ImageBlit2::default()
            .src_offsets([vk::Offset3D::default(), far_corner(src_size)])
            .dst_offsets([vk::Offset3D::default(), far_corner(dst_size)])
            .src_subresource(color_layer)
            .dst_subresource(color_layer)];
        let blit_info = vk::BlitImageInfo2::default()
            .src_image(src)
            .src_image_layout(vk::ImageLayout::TRANSFER_SRC_OPTIMAL)
            .dst_image(dst)
            .dst_image_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
            .filter(vk::Filter::LINEAR)
            .regions(&regions);

        unsafe {
            device.cmd_blit_image2(cmd, &blit_info);
        }
    }
}

impl Drop for GpuImage {
    fn drop(&mut self) {
        if !self.is_destroyed() {
            self.destroy();
        }
    }
}

pub fn aspect_for_layout(layout: vk::ImageLayout) -> vk::ImageAspectFlags {
    match layout {
        vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL
        | vk::ImageLayout::DEPTH_READ_ONLY_OPTIMAL => vk::ImageAspectFlags::DEPTH,
        _ => vk::ImageAspectFlags::COLOR,
    }
}

fn full_range(aspect_mask: vk::ImageAspectFlags) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask,
        base_mip_level: 0,
        level_count: vk::REMAINING_MIP_LEVELS,
        base_array_layer: 0,
        layer_count: vk::REMAINING_ARRAY_LAYERS,
    }
}

fn far_corner(size: vk::Extent2D) -> vk::Offset3D {
    vk::Offset3D {
        x: size.width as i32,
        y: size.height as i32,
        z: 1,
    }
}
