use std::sync::Arc;
use ash::vk;
use color_eyre::Result;
use crate::renderer::core::queue::Queue;
use crate::renderer::deletion_queue::DeletionQueue;

/// Synchronous one-shot submission outside the frame ring, used for uploads and other
/// setup work. Blocks the calling thread until the GPU has finished the recorded commands.
pub struct ImmediateSubmit {
    fence: vk::Fence,
    command_pool: vk::CommandPool,
    command_buffer: vk::CommandBuffer,

    queue: vk::Queue,
    device: Arc<ash::Device>,
}

impl ImmediateSubmit {
    pub fn new(
        queue: &Queue,
        device: Arc<ash::Device>,
        deletion_queue: &mut DeletionQueue,
    ) -> Result<Self> {
        let command_pool_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue.family.index)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let command_pool = unsafe {
            device.create_command_pool(&command_pool_info, None)?
        };
        {
            let device = device.clone();
            deletion_queue.push_back(
                move || unsafe { device.destroy_command_pool(command_pool, None) },
                "immediate command pool",
            );
        }

        let command_buffer_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(command_pool)
            .command_buffer_count(1)
            .level(vk::CommandBufferLevel::PRIMARY);
        let command_buffer = unsafe {
            device.allocate_command_buffers(&command_buffer_info)?[0]
        };

        let fence = unsafe {
            device.create_fence(&vk::FenceCreateInfo::default(), None)?
        };
        {
            let device = device.clone();
            deletion_queue.push_back(
                move || unsafe { device.destroy_fence(fence, None) },
                "immediate fence",
            );
        }

        Ok(Self {
            fence,
            command_pool,
            command_buffer,
            queue: queue.handle,
            device,
        })
    }

    /// Records `record` into the dedicated command buffer, submits it with no semaphore
    /// dependencies and waits for the dedicated fence.
    pub fn submit<F>(&self, record: F) -> Result<()>
    where
        F: FnOnce(vk::CommandBuffer, &ash::Device) -> Result<()>,
    {
        let cmd = self.command_buffer;
        unsafe {
            self.device.reset_fences(&[self.fence])?;
            self.device.reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())?;

            let begin_info = vk::CommandBufferBeginInfo::default()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            self.device.begin_command_buffer(cmd, &begin_info)?;
        }

        record(cmd, &self.device)?;

        unsafe {
            self.device.end_command_buffer(cmd)?;

            let cmd_infos = [vk::CommandBufferSubmitInfo::default().command_buffer(cmd)];
            let submit = vk::SubmitInfo2::default().command_buffer_infos(&cmd_infos);
            self.device.queue_submit2(self.queue, &[submit], self.fence)?;

            self.device.wait_for_fences(&[self.fence], true, u64::MAX)?;
        }

        log::trace!("Immediate submission on pool {:?} complete", self.command_pool);
        Ok(())
    }
}
