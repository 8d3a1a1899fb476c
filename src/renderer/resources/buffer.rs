use std::sync::{Arc, PoisonError};
use ash::vk;
use bytemuck::Pod;
use color_eyre::eyre::{eyre, OptionExt};
use color_eyre::Result;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use gpu_allocator::MemoryLocation;
use crate::renderer::resources::{release_once, MemoryAllocator};

/// Host-visible buffer the CPU writes into directly, e.g. per-frame uniforms
pub struct GpuBuffer {
    pub buffer: vk::Buffer,
    pub size: u64,

    memory: Option<BufferMemory>,
}

struct BufferMemory {
    allocation: Allocation,
    allocator: MemoryAllocator,
    device: Arc<ash::Device>,
}

impl GpuBuffer {
    pub fn new(
        size: u64,
        usage: vk::BufferUsageFlags,
        name: &str,
        allocator: MemoryAllocator,
        device: Arc<ash::Device>,
    ) -> Result<Self> {
        let buffer = {
            let buffer_info = vk::BufferCreateInfo::default()
                .size(size)
                .usage(usage)
                .sharing_mode(vk::SharingMode::EXCLUSIVE);
            unsafe { device.create_buffer(&buffer_info, None)? }
        };

        let requirements = unsafe { device.get_buffer_memory_requirements(buffer) };
        let allocation = allocator
            .lock()
            .map_err(|e| eyre!(e.to_string()))?
            .allocate(&AllocationCreateDesc {
                name,
                requirements,
                location: MemoryLocation::CpuToGpu,
                linear: true,
                allocation_scheme: AllocationScheme::DedicatedBuffer(buffer),
            });
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(err) => {
                unsafe { device.destroy_buffer(buffer, None) };
                return Err(err.into());
            }
        };

        let (memory, offset) = unsafe { (allocation.memory(), allocation.offset()) };
        let bind_device = device.clone();

        // Dropped on a failed bind, which frees the memory and the buffer
        let gpu_buffer = Self {
            buffer,
            size,
            memory: Some(BufferMemory {
                allocation,
                allocator,
                device,
            }),
        };
        unsafe {
            bind_device.bind_buffer_memory(buffer, memory, offset)?;
        }

        Ok(gpu_buffer)
    }

    /// Copies `data` into the mapped memory starting at byte `offset`
    pub fn write<T: Pod>(&mut self, data: &[T], offset: usize) -> Result<()> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        let memory = self.memory
            .as_mut()
            .ok_or_eyre("Cannot write to a destroyed buffer")?;
        let mapped = memory.allocation
            .mapped_slice_mut()
            .ok_or_eyre("Buffer memory is not host visible")?;

        let range = write_range(offset, bytes.len(), mapped.len())?;
        mapped[range].copy_from_slice(bytes);
        Ok(())
    }

    pub fn destroy(&mut self) -> bool {
        let buffer = self.buffer;
        let released = release_once(&mut self.memory, "Buffer", |memory| {
            let freed = memory.allocator
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .free(memory.allocation);
            if let Err(err) = freed {
                log::error!("Failed to free buffer memory: {}", err);
            }
            unsafe {
                memory.device.destroy_buffer(buffer, None);
            }
        });
        self.buffer = vk::Buffer::null();
        released
    }
}

impl Drop for GpuBuffer {
    fn drop(&mut self) {
        if self.memory.is_some() {
            self.destroy();
        }
    }
}

/// Byte range a write of `len` bytes at `offset` covers, if it fits in `capacity`
fn write_range(offset: usize, len: usize, capacity: usize) -> Result<std::ops::Range<usize>> {
    match offset.checked_add(len) {
        Some(end) if end <= capacity => Ok(offset..end),
        _ => Err(eyre!(
            "Write of {} bytes at offset {} exceeds buffer size {}",
            len,
            offset,
            capacity,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_must_fit() {
        assert_eq!(write_range(0, 64, 64).unwrap(), 0..64);
        assert_eq!(write_range(16, 16, 64).unwrap(), 16..32);
        assert!(write_range(60, 8, 64).is_err());
        assert!(write_range(usize::MAX, 2, 64).is_err());
    }
}
