use ash::vk;
use color_eyre::Result;
use crate::app::window::WindowHost;
use crate::renderer::core::instance::RenderInstance;
use crate::renderer::deletion_queue::DeletionQueue;

/// Presentable surface obtained from the window host
pub struct RenderSurface {
    pub surface: vk::SurfaceKHR,
    pub loader: ash::khr::surface::Instance,
}

/// What a surface offers on a given physical device
#[derive(Clone, Debug, Default)]
pub struct SurfaceSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl RenderSurface {
    pub fn new(
        window: &dyn WindowHost,
        ins: &RenderInstance,
        deletion_queue: &mut DeletionQueue,
    ) -> Result<Self> {
        let surface = window.create_surface(&ins.entry, &ins.instance)?;
        let loader = ash::khr::surface::Instance::new(&ins.entry, &ins.instance);
        {
            let loader = loader.clone();
            deletion_queue.push_back(
                move || unsafe { loader.destroy_surface(surface, None) },
                "surface",
            );
        }
        Ok(Self { surface, loader })
    }

    pub fn supports_present(&self, physical_device: vk::PhysicalDevice, queue_family: u32) -> bool {
        unsafe {
            self.loader
                .get_physical_device_surface_support(physical_device, queue_family, self.surface)
                .unwrap_or(false)
        }
    }

    pub fn query_support(&self, physical_device: vk::PhysicalDevice) -> Result<SurfaceSupport> {
        let (capabilities, formats, present_modes) = unsafe {
            (
                self.loader.get_physical_device_surface_capabilities(physical_device, self.surface)?,
                self.loader.get_physical_device_surface_formats(physical_device, self.surface)?,
                self.loader.get_physical_device_surface_present_modes(physical_device, self.surface)?,
            )
        };
        Ok(SurfaceSupport {
            capabilities,
            formats,
            present_modes,
        })
    }
}
