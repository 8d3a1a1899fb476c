use std::sync::Arc;
use ash::vk;
use color_eyre::eyre::eyre;
use color_eyre::Result;
use crate::renderer::core::queue::Queue;
use crate::renderer::deletion_queue::DeletionQueue;

/// Resources owned by one ring slot. A slot is reused every `len()` frames, and nothing in
/// it may be touched until the GPU has signaled `render_fence` for its previous use.
pub struct FrameSlot {
    pub command_pool: vk::CommandPool,
    pub command_buffer: vk::CommandBuffer,

    // Signaled by the presentation engine once the acquired image can be written.
    pub image_acquired: vk::Semaphore,

    // Signaled when this slot's commands have finished, waited on by present.
    pub render_finished: vk::Semaphore,

    // Signaled when all of this slot's submitted work has finished execution.
    pub render_fence: vk::Fence,

    /// Resources whose last use was recorded in this slot's command buffer
    pub deletion_queue: DeletionQueue,
}

impl FrameSlot {
    fn new(
        device: &Arc<ash::Device>,
        queue: &Queue,
        index: usize,
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
                format!("frame {} command pool", index),
            );
        }

        let command_buffer_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(command_pool)
            .command_buffer_count(1)
            .level(vk::CommandBufferLevel::PRIMARY);
        let command_buffer = unsafe {
            device.allocate_command_buffers(&command_buffer_info)?[0]
        };

        let image_acquired = create_semaphore(device, deletion_queue, format!("frame {} image-acquired semaphore", index))?;
        let render_finished = create_semaphore(device, deletion_queue, format!("frame {} render-finished semaphore", index))?;

        // Starts signaled so the first wait on a fresh slot returns immediately
        let render_fence = unsafe {
            device.create_fence(
                &vk::FenceCreateInfo::default().flags(vk::FenceCreateFlags::SIGNALED),
                None,
            )?
        };
        {
            let device = device.clone();
            deletion_queue.push_back(
                move || unsafe { device.destroy_fence(render_fence, None) },
                format!("frame {} fence", index),
            );
        }

        Ok(Self {
            command_pool,
            command_buffer,
            image_acquired,
            render_finished,
            render_fence,
            deletion_queue: DeletionQueue::new(),
        })
    }
}

fn create_semaphore(
    device: &Arc<ash::Device>,
    deletion_queue: &mut DeletionQueue,
    label: String,
) -> Result<vk::Semaphore> {
    let semaphore = unsafe {
        device.create_semaphore(&vk::SemaphoreCreateInfo::default(), None)?
    };
    let device = device.clone();
    deletion_queue.push_back(
        move || unsafe { device.destroy_semaphore(semaphore, None) },
        label,
    );
    Ok(semaphore)
}

/// Fixed set of slots frames are recorded into, `frame_number % len()` picks the slot
pub struct FrameRing {
    slots: Vec<FrameSlot>,
}

impl FrameRing {
    pub fn new(
        device: &Arc<ash::Device>,
        queue: &Queue,
        size: usize,
        deletion_queue: &mut DeletionQueue,
    ) -> Result<Self> {
        if size == 0 {
            return Err(eyre!("Frame ring needs at least one slot"));
        }

        let slots = (0..size)
            .map(|index| FrameSlot::new(device, queue, index, deletion_queue))
            .collect::<Result<Vec<_>>>()?;
        log::info!("Frame ring created with {} frames in flight", size);

        Ok(Self { slots })
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slot(&self, index: usize) -> &FrameSlot {
        &self.slots[index % self.slots.len()]
    }

    pub fn slot_mut(&mut self, index: usize) -> &mut FrameSlot {
        let len = self.slots.len();
        &mut self.slots[index % len]
    }

    /// Releases every resource deferred to any slot. Only valid once the device is idle.
    pub fn flush_all(&mut self) {
        for slot in &mut self.slots {
            slot.deletion_queue.flush();
        }
    }
}
