use std::sync::Arc;
use ash::vk;
use color_eyre::eyre::{eyre, OptionExt};
use color_eyre::Result;
use smallvec::SmallVec;
use crate::renderer::config::{PresentModePolicy, RenderConfig};
use crate::renderer::core::device::RenderDevice;
use crate::renderer::core::instance::RenderInstance;
use crate::renderer::core::queue::QueueFamilyIndices;
use crate::renderer::core::surface::RenderSurface;

/// Everything needed to rebuild the swapchain without going back to the setup code
struct SwapchainTarget {
    physical: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
    surface_loader: ash::khr::surface::Instance,
    queue_families: QueueFamilyIndices,
    preferred_format: vk::SurfaceFormatKHR,
    present_policy: PresentModePolicy,
}

pub struct Swapchain {
    pub handle: vk::SwapchainKHR,
    pub loader: ash::khr::swapchain::Device,
    pub images: Vec<vk::Image>,
    pub views: Vec<vk::ImageView>,
    pub extent: vk::Extent2D,
    pub format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,

    target: SwapchainTarget,
    device: Arc<ash::Device>,
}

impl Swapchain {
    pub fn new(
        ins: &RenderInstance,
        dev: &RenderDevice,
        surface: &RenderSurface,
        config: &RenderConfig,
        drawable_size: (u32, u32),
    ) -> Result<Self> {
        let mut swapchain = Self {
            handle: vk::SwapchainKHR::null(),
            loader: ash::khr::swapchain::Device::new(&ins.instance, &dev.logical),
            images: Vec::new(),
            views: Vec::new(),
            extent: vk::Extent2D::default(),
            format: config.surface_format,
            present_mode: vk::PresentModeKHR::FIFO,
            target: SwapchainTarget {
                physical: dev.physical,
                surface: surface.surface,
                surface_loader: surface.loader.clone(),
                queue_families: dev.queue_families,
                preferred_format: config.surface_format,
                present_policy: config.present_mode,
            },
            device: dev.logical.clone(),
        };
        swapchain.create_or_recreate(drawable_size)?;
        Ok(swapchain)
    }

    /// Builds a swapchain for the surface's current state, retiring the previous one if
    /// there was one. The device must not be using the old images when this is called.
    pub fn create_or_recreate(&mut self, drawable_size: (u32, u32)) -> Result<()> {
        let target = &self.target;
        let (capabilities, formats, present_modes) = unsafe {
            (
                target.surface_loader
                    .get_physical_device_surface_capabilities(target.physical, target.surface)?,
                target.surface_loader
                    .get_physical_device_surface_formats(target.physical, target.surface)?,
                target.surface_loader
                    .get_physical_device_surface_present_modes(target.physical, target.surface)?,
            )
        };

        let format = choose_surface_format(&formats, target.preferred_format)
            .ok_or_eyre("Surface reports no supported formats")?;
        let present_mode = choose_present_mode(&present_modes, target.present_policy);
        let extent = choose_extent(&capabilities, drawable_size);
        let min_image_count = choose_image_count(&capabilities);
        let (sharing_mode, family_indices) = sharing_mode(&target.queue_families);

        let pre_transform = if capabilities
            .supported_transforms
            .contains(vk::SurfaceTransformFlagsKHR::IDENTITY)
        {
            vk::SurfaceTransformFlagsKHR::IDENTITY
        } else {
            capabilities.current_transform
        };

        let old_swapchain = self.handle;
        let swapchain_info = vk::SwapchainCreateInfoKHR::default()
            .surface(target.surface)
            .min_image_count(min_image_count)
            .image_format(format.format)
            .image_color_space(format.color_space)
            .image_extent(extent)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST)
            .image_sharing_mode(sharing_mode)
            .queue_family_indices(&family_indices)
            .pre_transform(pre_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .image_array_layers(1)
            .old_swapchain(old_swapchain);

        let handle = unsafe {
            self.loader.create_swapchain(&swapchain_info, None)?
        };
        let device = self.device.clone();
        let built = unsafe { self.loader.get_swapchain_images(handle) }
            .map_err(|err| eyre!("Failed to get swapchain images: {}", err))
            .and_then(|images| {
                let views = build_views(
                    &images,
                    format.format,
                    |image, format| create_color_view(&device, image, format),
                    |view| unsafe { device.destroy_image_view(view, None) },
                )?;
                Ok((images, views))
            });
        let (images, views) = match built {
            Ok(built) => built,
            Err(err) => {
                // The old swapchain stays usable, only the new one is discarded
                unsafe { self.loader.destroy_swapchain(handle, None) };
                return Err(err);
            }
        };

        self.destroy();
        self.handle = handle;
        self.images = images;
        self.views = views;
        self.extent = extent;
        self.format = format;
        self.present_mode = present_mode;

        log::info!(
            "Swapchain ready: {}x{}, {:?}/{:?}, {:?}, {} images",
            extent.width,
            extent.height,
            format.format,
            format.color_space,
            present_mode,
            self.images.len(),
        );
        Ok(())
    }

    /// Releases the views and the swapchain. Safe to call more than once.
    pub fn destroy(&mut self) {
        unsafe {
            for view in self.views.drain(..) {
                self.device.destroy_image_view(view, None);
            }
            if self.handle != vk::SwapchainKHR::null() {
                self.loader.destroy_swapchain(self.handle, None);
            }
        }
        self.handle = vk::SwapchainKHR::null();
        self.images.clear();
    }

    pub fn image(&self, index: u32) -> Result<(vk::Image, vk::ImageView)> {
        let index = index as usize;
        match (self.images.get(index), self.views.get(index)) {
            (Some(&image), Some(&view)) => Ok((image, view)),
            _ => Err(eyre!("Swapchain image index {} out of range", index)),
        }
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// The preferred pair if the surface supports it, otherwise whatever the surface lists first
pub fn choose_surface_format(
    available: &[vk::SurfaceFormatKHR],
    preferred: vk::SurfaceFormatKHR,
) -> Option<vk::SurfaceFormatKHR> {
    available
        .iter()
        .find(|f| f.format == preferred.format && f.color_space == preferred.color_space)
        .or_else(|| available.first())
        .copied()
}

pub fn choose_present_mode(
    available: &[vk::PresentModeKHR],
    policy: PresentModePolicy,
) -> vk::PresentModeKHR {
    match policy {
        PresentModePolicy::PreferMailbox if available.contains(&vk::PresentModeKHR::MAILBOX) => {
            vk::PresentModeKHR::MAILBOX
        }
        // FIFO is the only mode every surface must support
        _ => vk::PresentModeKHR::FIFO,
    }
}

/// Uses the extent the surface dictates, or the drawable size clamped into the allowed
/// range when the surface leaves it to us (`u32::MAX` current extent).
pub fn choose_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    drawable_size: (u32, u32),
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }

    let (width, height) = drawable_size;
    vk::Extent2D {
        width: width.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: height.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    }
}

/// One more image than the minimum so acquiring never waits on the driver, capped at the
/// maximum unless the surface reports it as unbounded (0).
pub fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let desired = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 {
        desired.min(capabilities.max_image_count)
    } else {
        desired
    }
}

/// Images are shared concurrently only when graphics and present use different families
pub fn sharing_mode(indices: &QueueFamilyIndices) -> (vk::SharingMode, SmallVec<[u32; 2]>) {
    match (indices.graphics, indices.present) {
        (Some(graphics), Some(present)) if graphics != present => {
            (vk::SharingMode::CONCURRENT, SmallVec::from_buf([graphics, present]))
        }
        _ => (vk::SharingMode::EXCLUSIVE, SmallVec::new()),
    }
}

/// One view per image, in image order. When a view cannot be created, the views built
/// before it are handed to `destroy` and nothing is returned.
pub fn build_views<C, D>(
    images: &[vk::Image],
    format: vk::Format,
    mut create: C,
    mut destroy: D,
) -> Result<Vec<vk::ImageView>>
where
    C: FnMut(vk::Image, vk::Format) -> Result<vk::ImageView>,
    D: FnMut(vk::ImageView),
{
    let mut views = Vec::with_capacity(images.len());
    for &image in images {
        match create(image, format) {
            Ok(view) => views.push(view),
            Err(err) => {
                views.into_iter().for_each(&mut destroy);
                return Err(err);
            }
        }
    }
    Ok(views)
}

fn create_color_view(
    device: &ash::Device,
    image: vk::Image,
    format: vk::Format,
) -> Result<vk::ImageView> {
    let view_info = vk::ImageViewCreateInfo::default()
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(format)
        .components(vk::ComponentMapping {
            r: vk::ComponentSwizzle::IDENTITY,
            g: vk::ComponentSwizzle::IDENTITY,
            b: vk::ComponentSwizzle::IDENTITY,
            a: vk::ComponentSwizzle::IDENTITY,
        })
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        })
        .image(image);
    Ok(unsafe { device.create_image_view(&view_info, None)? })
}
