pub mod config;
pub mod core;
pub mod deletion_queue;
pub mod frame;
pub mod resources;

use std::sync::{Arc, Mutex, Weak};
use ash::vk;
use color_eyre::eyre::{eyre, OptionExt, WrapErr};
use color_eyre::Result;
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use crate::app::window::WindowHost;
use crate::renderer::config::RenderConfig;
use crate::renderer::core::device::RenderDevice;
use crate::renderer::core::immediate::ImmediateSubmit;
use crate::renderer::core::instance::RenderInstance;
use crate::renderer::core::surface::RenderSurface;
use crate::renderer::core::swapchain::Swapchain;
use crate::renderer::core::SetupStage;
use crate::renderer::deletion_queue::DeletionQueue;
use crate::renderer::frame::{AcquireOutcome, FrameBackend, FrameRing, FrameToken, PresentOutcome};
use crate::renderer::resources::descriptor::{
    write_image, DescriptorAllocator, DescriptorSetLayoutBuilder, PoolSizeRatio,
};
use crate::renderer::resources::image::GpuImage;
use crate::renderer::resources::MemoryAllocator;

/// Owns every GPU object the frame loop needs.
///
/// Objects are created in a fixed order (instance, surface, device, memory allocator,
/// swapchain, frame ring, immediate submission, draw image, draw image descriptor) and
/// every one of them is
/// registered for release in the reverse order. Dropping the renderer waits for the
/// device to go idle before releasing anything.
pub struct Renderer {
    config: RenderConfig,
    draw_image: GpuImage,
    draw_image_descriptors: DrawImageDescriptors,
    immediate: ImmediateSubmit,
    ring: FrameRing,
    swapchain: Swapchain,
    allocator: Weak<Mutex<Allocator>>,
    device: RenderDevice,
    instance: RenderInstance,

    /// Slot and image of the frame whose command buffer is open
    recording: Option<(usize, u32)>,
    deletion_queue: DeletionQueue,
}

/// The frame currently being recorded, handed to application hooks
pub struct Frame<'a> {
    pub cmd: vk::CommandBuffer,
    pub slot: usize,
    pub frame_number: u64,
    /// Off-screen target in GENERAL layout. Must be left in GENERAL layout.
    pub draw_image: &'a GpuImage,
    /// Storage-image binding 0 pointing at `draw_image`, for compute passes
    pub draw_image_set: vk::DescriptorSet,
    pub device: &'a ash::Device,
    deletion_queue: &'a mut DeletionQueue,
}

impl Frame<'_> {
    /// Defers `release` until this slot's fence has signaled again, i.e. until the GPU is
    /// done with everything recorded in this frame
    pub fn defer_release<F>(&mut self, release: F, label: impl Into<String>)
    where
        F: FnOnce() + 'static,
    {
        self.deletion_queue.push_back(release, label);
    }
}

impl Renderer {
    pub fn new(window: &dyn WindowHost, config: &RenderConfig) -> Result<Self> {
        config.validate()?;
        let mut deletion_queue = DeletionQueue::new();

        let instance = RenderInstance::new(window, config, &mut deletion_queue)
            .wrap_err(SetupStage::Instance.failed())?;
        let surface = RenderSurface::new(window, &instance, &mut deletion_queue)
            .wrap_err(SetupStage::Surface.failed())?;
        let device = RenderDevice::new(&instance, Some(&surface), &mut deletion_queue)?;

        let allocator = Self::create_allocator(&instance, &device, &mut deletion_queue)
            .wrap_err(SetupStage::MemoryAllocator.failed())?;

        let swapchain = Swapchain::new(&instance, &device, &surface, config, window.framebuffer_size())
            .wrap_err(SetupStage::Swapchain.failed())?;
        let ring = FrameRing::new(
            &device.logical,
            &device.graphics_queue,
            config.frames_in_flight,
            &mut deletion_queue,
        )
        .wrap_err(SetupStage::FrameRing.failed())?;
        let immediate = ImmediateSubmit::new(
            &device.graphics_queue,
            device.logical.clone(),
            &mut deletion_queue,
        )
        .wrap_err(SetupStage::ImmediateSubmit.failed())?;
        let draw_image = GpuImage::new_draw_image(
            swapchain.extent,
            config.draw_format,
            allocator.clone(),
            device.logical.clone(),
        )
        .wrap_err(SetupStage::DrawImage.failed())?;
        let draw_image_descriptors = DrawImageDescriptors::new(
            &device.logical,
            &draw_image,
            &mut deletion_queue,
        )
        .wrap_err(SetupStage::Descriptors.failed())?;

        log::info!("Renderer ready on {}", device.name);

        Ok(Self {
            config: config.clone(),
            draw_image,
            draw_image_descriptors,
            immediate,
            ring,
            swapchain,
            allocator: Arc::downgrade(&allocator),
            device,
            instance,
            recording: None,
            deletion_queue,
        })
    }

    fn create_allocator(
        ins: &RenderInstance,
        dev: &RenderDevice,
        deletion_queue: &mut DeletionQueue,
    ) -> Result<MemoryAllocator> {
        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: ins.instance.clone(),
            device: (*dev.logical).clone(),
            physical_device: dev.physical,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })?;
        let allocator = Arc::new(Mutex::new(allocator));

        // The queue holds the only strong reference, so the allocator is gone before the
        // device it allocates from
        let owned = allocator.clone();
        deletion_queue.push_back(
            move || {
                if Arc::try_unwrap(owned).is_err() {
                    log::error!("Memory allocator is still referenced while the device is released");
                }
            },
            "memory allocator",
        );
        Ok(allocator)
    }

    pub fn device(&self) -> &Arc<ash::Device> {
        &self.device.logical
    }

    pub fn device_name(&self) -> &str {
        &self.device.name
    }

    pub fn allocator(&self) -> Result<MemoryAllocator> {
        self.allocator.upgrade().ok_or_eyre("Memory allocator has already been released")
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    pub fn draw_image(&self) -> &GpuImage {
        &self.draw_image
    }

    /// Layout of [`Frame::draw_image_set`], for building compute pipeline layouts
    pub fn draw_image_layout(&self) -> vk::DescriptorSetLayout {
        self.draw_image_descriptors.layout
    }

    pub fn draw_format(&self) -> vk::Format {
        self.draw_image.format
    }

    pub fn draw_extent(&self) -> vk::Extent2D {
        self.draw_image.extent_2d()
    }

    pub fn swapchain_extent(&self) -> vk::Extent2D {
        self.swapchain.extent
    }

    pub fn wait_idle(&self) -> Result<()> {
        self.device.wait_idle()
    }

    pub fn has_debug_messenger(&self) -> bool {
        self.instance.has_debug_messenger()
    }

    /// Runs `record` on the graphics queue and waits for it to finish. Not allowed while
    /// a frame is being recorded.
    pub fn immediate_submit<F>(&self, record: F) -> Result<()>
    where
        F: FnOnce(vk::CommandBuffer, &ash::Device) -> Result<()>,
    {
        if let Some((slot, _)) = self.recording {
            return Err(eyre!(
                "Immediate submission requested while slot {} is recording a frame",
                slot,
            ));
        }
        self.immediate.submit(record)
    }

    /// Borrows the open frame for application recording
    pub fn frame(&mut self, token: FrameToken) -> Result<Frame<'_>> {
        if self.recording != Some((token.slot, token.image_index)) {
            return Err(eyre!("Frame {} is not being recorded", token.frame_number));
        }
        let slot = self.ring.slot_mut(token.slot);
        Ok(Frame {
            cmd: slot.command_buffer,
            slot: token.slot,
            frame_number: token.frame_number,
            draw_image: &self.draw_image,
            draw_image_set: self.draw_image_descriptors.set,
            device: &self.device.logical,
            deletion_queue: &mut slot.deletion_queue,
        })
    }
}

impl FrameBackend for Renderer {
    fn ring_size(&self) -> usize {
        self.ring.len()
    }

    fn wait_for_slot(&mut self, slot: usize) -> Result<()> {
        let fence = self.ring.slot(slot).render_fence;
        unsafe {
            self.device.logical.wait_for_fences(&[fence], true, u64::MAX)?;
        }
        Ok(())
    }

    fn slot_deletion_queue(&mut self, slot: usize) -> &mut DeletionQueue {
        &mut self.ring.slot_mut(slot).deletion_queue
    }

    fn reset_slot_fence(&mut self, slot: usize) -> Result<()> {
        let fence = self.ring.slot(slot).render_fence;
        unsafe {
            self.device.logical.reset_fences(&[fence])?;
        }
        Ok(())
    }

    fn acquire_image(&mut self, slot: usize) -> Result<AcquireOutcome> {
        let semaphore = self.ring.slot(slot).image_acquired;
        let acquired = unsafe {
            self.swapchain.loader.acquire_next_image(
                self.swapchain.handle,
                u64::MAX,
                semaphore,
                vk::Fence::null(),
            )
        };
        match acquired {
            Ok((image_index, suboptimal)) => Ok(AcquireOutcome::Acquired { image_index, suboptimal }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
            Err(err) => Err(eyre!("Failed to acquire swapchain image: {}", err)),
        }
    }

    fn restore_slot_fence(&mut self, slot: usize) -> Result<()> {
        // An empty submission signals the fence once the queue has drained
        let fence = self.ring.slot(slot).render_fence;
        unsafe {
            self.device.logical.queue_submit(self.device.graphics_queue.handle, &[], fence)?;
        }
        Ok(())
    }

    fn begin_recording(&mut self, slot: usize, image_index: u32) -> Result<()> {
        let device = &self.device.logical;
        let cmd = self.ring.slot(slot).command_buffer;
        unsafe {
            device.reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())?;
            let begin_info = vk::CommandBufferBeginInfo::default()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            device.begin_command_buffer(cmd, &begin_info)?;
        }

        GpuImage::transition(
            device,
            cmd,
            self.draw_image.image,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::GENERAL,
        );

        self.recording = Some((slot, image_index));
        Ok(())
    }

    fn finish_recording(&mut self, slot: usize, image_index: u32) -> Result<()> {
        let device = &self.device.logical;
        let cmd = self.ring.slot(slot).command_buffer;
        let (swapchain_image, _) = self.swapchain.image(image_index)?;

        GpuImage::transition(
            device,
            cmd,
            self.draw_image.image,
            vk::ImageLayout::GENERAL,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        );
        GpuImage::transition(
            device,
            cmd,
            swapchain_image,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        );
        GpuImage::blit(
            device,
            cmd,
            self.draw_image.image,
            swapchain_image,
            self.draw_image.extent_2d(),
            self.swapchain.extent,
        );
        GpuImage::transition(
            device,
            cmd,
            swapchain_image,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::PRESENT_SRC_KHR,
        );

        unsafe {
            device.end_command_buffer(cmd)?;
        }
        self.recording = None;
        Ok(())
    }

    fn submit(&mut self, slot: usize) -> Result<()> {
        let frame = self.ring.slot(slot);

        let cmd_infos = [vk::CommandBufferSubmitInfo::default().command_buffer(frame.command_buffer)];
        let wait_infos = [vk::SemaphoreSubmitInfo::default()
            .semaphore(frame.image_acquired)
            .stage_mask(vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT)
            .value(1)];
        let signal_infos = [vk::SemaphoreSubmitInfo::default()
            .semaphore(frame.render_finished)
            .stage_mask(vk::PipelineStageFlags2::ALL_GRAPHICS)
            .value(1)];
        let submit = vk::SubmitInfo2::default()
            .wait_semaphore_infos(&wait_infos)
            .signal_semaphore_infos(&signal_infos)
            .command_buffer_infos(&cmd_infos);

        unsafe {
            self.device.logical.queue_submit2(
                self.device.graphics_queue.handle,
                &[submit],
                frame.render_fence,
            )?;
        }
        Ok(())
    }

    fn present(&mut self, slot: usize, image_index: u32) -> Result<PresentOutcome> {
        let wait_semaphores = [self.ring.slot(slot).render_finished];
        let swapchains = [self.swapchain.handle];
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let presented = unsafe {
            self.swapchain.loader.queue_present(self.device.present_queue().handle, &present_info)
        };
        match presented {
            Ok(false) => Ok(PresentOutcome::Presented),
            Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::Stale),
            Err(err) => Err(eyre!("Failed to present swapchain image: {}", err)),
        }
    }

    fn recreate_swapchain(&mut self, drawable_size: (u32, u32)) -> Result<()> {
        self.device.wait_idle()?;
        self.swapchain.create_or_recreate(drawable_size)?;

        if self.swapchain.extent != self.draw_image.extent_2d() {
            self.draw_image.destroy();
            self.draw_image = GpuImage::new_draw_image(
                self.swapchain.extent,
                self.config.draw_format,
                self.allocator()?,
                self.device.logical.clone(),
            )
            .wrap_err("Failed to resize draw image")?;
            // Nothing is in flight after the idle wait, so the set can be rewritten in place
            self.draw_image_descriptors.point_at(&self.device.logical, &self.draw_image);
        }
        Ok(())
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        if let Err(err) = self.device.wait_idle() {
            log::error!("Failed to wait for device idle before teardown: {}", err);
        }
        self.ring.flush_all();
        if !self.draw_image.is_destroyed() {
            self.draw_image.destroy();
        }
        self.draw_image_descriptors.allocator.destroy();
        self.swapchain.destroy();
        self.deletion_queue.flush();
        log::info!("Renderer released");
    }
}

/// Storage-image descriptor set that lets compute passes write the draw image
struct DrawImageDescriptors {
    layout: vk::DescriptorSetLayout,
    set: vk::DescriptorSet,
    allocator: DescriptorAllocator,
}

impl DrawImageDescriptors {
    fn new(
        device: &Arc<ash::Device>,
        draw_image: &GpuImage,
        deletion_queue: &mut DeletionQueue,
    ) -> Result<Self> {
        let layout = DescriptorSetLayoutBuilder::new()
            .add_binding(0, vk::DescriptorType::STORAGE_IMAGE)
            .build(device, vk::ShaderStageFlags::COMPUTE)?;
        {
            let device = device.clone();
            deletion_queue.push_back(
                move || unsafe { device.destroy_descriptor_set_layout(layout, None) },
                "draw image descriptor set layout",
            );
        }

        let allocator = DescriptorAllocator::init(
            device.clone(),
            1,
            &[PoolSizeRatio {
                descriptor_type: vk::DescriptorType::STORAGE_IMAGE,
                ratio: 1.0,
            }],
        )?;
        let set = allocator.allocate(layout)?;

        let descriptors = Self {
            layout,
            set,
            allocator,
        };
        descriptors.point_at(device, draw_image);
        Ok(descriptors)
    }

    fn point_at(&self, device: &ash::Device, draw_image: &GpuImage) {
        write_image(
            device,
            self.set,
            0,
            vk::DescriptorType::STORAGE_IMAGE,
            draw_image.view,
            vk::ImageLayout::GENERAL,
        );
    }
}
