use ash::vk;
use smallvec::SmallVec;

pub struct Queue {
    pub family: QueueFamily,
    pub handle: vk::Queue,
}

impl Queue {
    pub fn new(
        family: QueueFamily,
        handle: vk::Queue,
    ) -> Self {
        Self {
            family,
            handle,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct QueueFamily {
    pub index: u32,
    pub properties: vk::QueueFamilyProperties,
    supports_present: bool,
}

impl QueueFamily {
    pub fn new(
        index: u32,
        properties: vk::QueueFamilyProperties,
        supports_present: bool,
    ) -> Self {
        Self {
            index,
            properties,
            supports_present,
        }
    }

    pub fn supports_present(&self) -> bool {
        self.supports_present
    }

    pub fn supports_graphics(&self) -> bool {
        self.properties.queue_flags.contains(vk::QueueFlags::GRAPHICS)
    }
}

impl PartialEq for QueueFamily {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
    }
}

impl Eq for QueueFamily {}

/// Queue families a device exposes for graphics and presentation
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: Option<u32>,
    pub present: Option<u32>,
}

impl QueueFamilyIndices {
    /// Picks the first graphics-capable family, and for presentation prefers that same
    /// family before falling back to the first family that can present at all.
    pub fn find(
        families: &[vk::QueueFamilyProperties],
        mut supports_present: impl FnMut(u32) -> bool,
    ) -> Self {
        let graphics = families
            .iter()
            .position(|q| q.queue_count > 0 && q.queue_flags.contains(vk::QueueFlags::GRAPHICS))
            .map(|i| i as u32);

        let present = match graphics {
            Some(index) if supports_present(index) => Some(index),
            _ => (0..families.len() as u32)
                .find(|&index| families[index as usize].queue_count > 0 && supports_present(index)),
        };

        Self { graphics, present }
    }

    pub fn is_complete(&self, require_present: bool) -> bool {
        self.graphics.is_some() && (!require_present || self.present.is_some())
    }

    /// Each needed family exactly once, graphics first
    pub fn unique_families(&self) -> SmallVec<[u32; 2]> {
        let mut families = SmallVec::new();
        for index in [self.graphics, self.present].into_iter().flatten() {
            if !families.contains(&index) {
                families.push(index);
            }
        }
        families
    }

    pub fn separate_present(&self) -> bool {
        matches!((self.graphics, self.present), (Some(g), Some(p)) if g != p)
    }
}
