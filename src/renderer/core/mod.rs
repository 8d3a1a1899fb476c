//! "Core" refers to the objects every frame depends on: instance, surface, device,
//! queues, swapchain, and the one-shot submission context.
//! They are created once in a fixed order and released in the opposite order.

pub mod device;
pub mod immediate;
pub mod instance;
pub mod queue;
pub mod surface;
pub mod swapchain;

use std::fmt;

/// Setup steps of the renderer, in the order they run
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum SetupStage {
    Instance,
    Surface,
    DeviceSelection,
    DeviceCreation,
    MemoryAllocator,
    Swapchain,
    FrameRing,
    ImmediateSubmit,
    DrawImage,
    Descriptors,
}

impl fmt::Display for SetupStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SetupStage::Instance => "instance creation",
            SetupStage::Surface => "surface creation",
            SetupStage::DeviceSelection => "physical device selection",
            SetupStage::DeviceCreation => "logical device creation",
            SetupStage::MemoryAllocator => "memory allocator creation",
            SetupStage::Swapchain => "swapchain creation",
            SetupStage::FrameRing => "frame ring creation",
            SetupStage::ImmediateSubmit => "immediate submit context creation",
            SetupStage::DrawImage => "draw image creation",
            SetupStage::Descriptors => "draw image descriptor creation",
        };
        write!(f, "{}", name)
    }
}

impl SetupStage {
    pub fn failed(self) -> String {
        format!("Renderer setup failed during {}", self)
    }
}
