use std::ffi::{c_char, CStr};
use std::sync::Arc;
use ash::vk;
use color_eyre::eyre::{eyre, WrapErr};
use color_eyre::Result;
use crate::renderer::core::instance::RenderInstance;
use crate::renderer::core::queue::{Queue, QueueFamily, QueueFamilyIndices};
use crate::renderer::core::surface::RenderSurface;
use crate::renderer::core::SetupStage;
use crate::renderer::deletion_queue::DeletionQueue;

/// Score of a physical device that must never be picked
pub const DISQUALIFIED: i32 = -1;

/// The selected physical device, its logical device, and the queues used for work
pub struct RenderDevice {
    pub logical: Arc<ash::Device>,
    pub physical: vk::PhysicalDevice,
    pub name: String,

    pub graphics_queue: Queue,
    pub present_queue: Option<Queue>,
    pub queue_families: QueueFamilyIndices,
}

/// Everything the selection policy looks at for one physical device
#[derive(Clone, Debug)]
pub struct DeviceCandidate {
    pub name: String,
    pub device_type: vk::PhysicalDeviceType,
    pub queue_families: QueueFamilyIndices,
    pub missing_extensions: Vec<String>,
    pub has_required_features: bool,
    pub surface_format_count: usize,
    pub present_mode_count: usize,
}

/// Scores a device, returning [`DISQUALIFIED`] if it cannot run the renderer at all.
/// Among usable devices, discrete GPUs rank highest.
pub fn score_device(candidate: &DeviceCandidate, require_present: bool) -> i32 {
    if !candidate.queue_families.is_complete(require_present) {
        return DISQUALIFIED;
    }
    if !candidate.missing_extensions.is_empty() || !candidate.has_required_features {
        return DISQUALIFIED;
    }
    if require_present
        && (candidate.surface_format_count == 0 || candidate.present_mode_count == 0)
    {
        return DISQUALIFIED;
    }

    match candidate.device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 4,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 3,
        vk::PhysicalDeviceType::VIRTUAL_GPU => 2,
        vk::PhysicalDeviceType::CPU => 1,
        _ => 0,
    }
}

/// Index of the highest score, the earliest one on ties. `None` when every device is
/// disqualified.
pub fn pick_best(scores: &[i32]) -> Option<usize> {
    let mut best: Option<(usize, i32)> = None;
    for (index, &score) in scores.iter().enumerate() {
        if score == DISQUALIFIED {
            continue;
        }
        match best {
            Some((_, best_score)) if best_score >= score => {}
            _ => best = Some((index, score)),
        }
    }
    best.map(|(index, _)| index)
}

impl RenderDevice {
    pub fn new(
        ins: &RenderInstance,
        surface: Option<&RenderSurface>,
        deletion_queue: &mut DeletionQueue,
    ) -> Result<Self> {
        let (physical, candidate) = Self::select_physical_device(&ins.instance, surface)
            .wrap_err(SetupStage::DeviceSelection.failed())?;
        log::info!("Using {} ({:?})", candidate.name, candidate.device_type);

        Self::create_logical_device(ins, physical, candidate, deletion_queue)
            .wrap_err(SetupStage::DeviceCreation.failed())
    }

    pub fn wait_idle(&self) -> Result<()> {
        unsafe {
            self.logical.device_wait_idle()?;
        }
        Ok(())
    }

    /// Queue used for presentation, which is the graphics queue unless a separate family was needed
    pub fn present_queue(&self) -> &Queue {
        self.present_queue.as_ref().unwrap_or(&self.graphics_queue)
    }

    fn select_physical_device(
        instance: &ash::Instance,
        surface: Option<&RenderSurface>,
    ) -> Result<(vk::PhysicalDevice, DeviceCandidate)> {
        let devices = unsafe { instance.enumerate_physical_devices()? };
        if devices.is_empty() {
            return Err(eyre!("No Vulkan physical devices available"));
        }

        let mut candidates = devices
            .iter()
            .map(|&device| Self::describe(instance, device, surface))
            .collect::<Vec<_>>();
        let scores = candidates
            .iter()
            .map(|candidate| score_device(candidate, surface.is_some()))
            .collect::<Vec<_>>();

        for (candidate, score) in candidates.iter().zip(&scores) {
            if *score == DISQUALIFIED {
                log::debug!(
                    "Rejected {}: families {:?}, missing extensions {:?}, features ok: {}",
                    candidate.name,
                    candidate.queue_families,
                    candidate.missing_extensions,
                    candidate.has_required_features,
                );
            } else {
                log::debug!("Candidate {} scored {}", candidate.name, score);
            }
        }

        let best = pick_best(&scores).ok_or_else(|| eyre!("No suitable physical device found"))?;
        Ok((devices[best], candidates.swap_remove(best)))
    }

    fn describe(
        instance: &ash::Instance,
        device: vk::PhysicalDevice,
        surface: Option<&RenderSurface>,
    ) -> DeviceCandidate {
        let props = unsafe { instance.get_physical_device_properties(device) };
        let name = props
            .device_name_as_c_str()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "<unnamed device>".into());

        let family_props = unsafe {
            instance.get_physical_device_queue_family_properties(device)
        };
        let queue_families = QueueFamilyIndices::find(&family_props, |index| {
            surface.is_some_and(|surface| surface.supports_present(device, index))
        });

        let supported_exts = unsafe {
            instance
                .enumerate_device_extension_properties(device)
                .unwrap_or_default()
        };
        let missing_extensions = get_required_device_extensions()
            .iter()
            .filter(|req| {
                !supported_exts
                    .iter()
                    .filter_map(|ext| ext.extension_name_as_c_str().ok())
                    .any(|sup| sup == **req)
            })
            .map(|req| req.to_string_lossy().into_owned())
            .collect();

        let (surface_format_count, present_mode_count) = match surface {
            Some(surface) => surface
                .query_support(device)
                .map(|support| (support.formats.len(), support.present_modes.len()))
                .unwrap_or((0, 0)),
            None => (0, 0),
        };

        DeviceCandidate {
            name,
            device_type: props.device_type,
            queue_families,
            missing_extensions,
            has_required_features: RequiredDeviceFeatures::query(instance, device).has_all(),
            surface_format_count,
            present_mode_count,
        }
    }

    fn create_logical_device(
        ins: &RenderInstance,
        physical: vk::PhysicalDevice,
        candidate: DeviceCandidate,
        deletion_queue: &mut DeletionQueue,
    ) -> Result<Self> {
        let queue_families = candidate.queue_families;
        let graphics_index = queue_families
            .graphics
            .ok_or_else(|| eyre!("Selected device has no graphics queue family"))?;

        let queue_priorities = [1.0];
        let queue_create_infos = queue_families
            .unique_families()
            .iter()
            .map(|&index| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(index)
                    .queue_priorities(&queue_priorities)
            })
            .collect::<Vec<_>>();

        let enabled_layer_names = ins.enabled_layers
            .iter()
            .map(|layer| layer.as_ptr())
            .collect::<Vec<*const c_char>>();
        let enabled_extension_names = get_required_device_extensions()
            .iter()
            .map(|ext| ext.as_ptr())
            .collect::<Vec<*const c_char>>();

        let mut vulkan13_features = vk::PhysicalDeviceVulkan13Features::default()
            .dynamic_rendering(true)
            .synchronization2(true);
        let device_create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_layer_names(&enabled_layer_names)
            .enabled_extension_names(&enabled_extension_names)
            .push_next(&mut vulkan13_features);

        let logical = unsafe {
            ins.instance.create_device(physical, &device_create_info, None)?
        };
        let logical = Arc::new(logical);
        {
            let logical = logical.clone();
            deletion_queue.push_back(
                move || unsafe { logical.destroy_device(None) },
                "logical device",
            );
        }

        let family_props = unsafe {
            ins.instance.get_physical_device_queue_family_properties(physical)
        };
        let make_queue = |index: u32, supports_present: bool| {
            let handle = unsafe { logical.get_device_queue(index, 0) };
            Queue::new(
                QueueFamily::new(index, family_props[index as usize], supports_present),
                handle,
            )
        };

        let graphics_queue = make_queue(
            graphics_index,
            queue_families.present == Some(graphics_index),
        );
        let present_queue = match queue_families.present {
            Some(index) if index != graphics_index => Some(make_queue(index, true)),
            _ => None,
        };

        Ok(Self {
            logical,
            physical,
            name: candidate.name,
            graphics_queue,
            present_queue,
            queue_families,
        })
    }
}

pub fn get_required_device_extensions() -> Vec<&'static CStr> {
    vec![
        ash::khr::swapchain::NAME,

        #[cfg(target_os = "macos")]
        ash::khr::portability_subset::NAME,
    ]
}

/// Vulkan 1.3 features the frame loop relies on: dynamic rendering and synchronization2
struct RequiredDeviceFeatures {
    dynamic_rendering: bool,
    synchronization2: bool,
}

impl RequiredDeviceFeatures {
    fn query(instance: &ash::Instance, physical_device: vk::PhysicalDevice) -> Self {
        let mut vulkan13_features = vk::PhysicalDeviceVulkan13Features::default();
        {
            let mut features = vk::PhysicalDeviceFeatures2::default()
                .push_next(&mut vulkan13_features);
            unsafe {
                instance.get_physical_device_features2(physical_device, &mut features);
            }
        }
        Self {
            dynamic_rendering: vulkan13_features.dynamic_rendering == vk::TRUE,
            synchronization2: vulkan13_features.synchronization2 == vk::TRUE,
        }
    }

    fn has_all(&self) -> bool {
        self.dynamic_rendering && self.synchronization2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(
        device_type: vk::PhysicalDeviceType,
        graphics: Option<u32>,
        present: Option<u32>,
    ) -> DeviceCandidate {
        DeviceCandidate {
            name: "test".into(),
            device_type,
            queue_families: QueueFamilyIndices { graphics, present },
            missing_extensions: Vec::new(),
            has_required_features: true,
            surface_format_count: 1,
            present_mode_count: 1,
        }
    }

    #[test]
    fn device_without_graphics_family_is_skipped() {
        let scores = [
            score_device(&candidate(vk::PhysicalDeviceType::DISCRETE_GPU, None, Some(0)), true),
            score_device(&candidate(vk::PhysicalDeviceType::OTHER, Some(0), Some(0)), true),
        ];
        assert_eq!(scores, [DISQUALIFIED, 0]);
        assert_eq!(pick_best(&scores), Some(1));
    }

    #[test]
    fn presentation_requirement_disqualifies_headless_only_devices() {
        let device = candidate(vk::PhysicalDeviceType::DISCRETE_GPU, Some(0), None);
        assert_eq!(score_device(&device, true), DISQUALIFIED);
        assert!(score_device(&device, false) > DISQUALIFIED);
    }

    #[test]
    fn missing_extensions_features_or_surface_support_disqualify() {
        let mut device = candidate(vk::PhysicalDeviceType::DISCRETE_GPU, Some(0), Some(0));
        device.missing_extensions = vec!["VK_KHR_swapchain".into()];
        assert_eq!(score_device(&device, true), DISQUALIFIED);

        let mut device = candidate(vk::PhysicalDeviceType::DISCRETE_GPU, Some(0), Some(0));
        device.has_required_features = false;
        assert_eq!(score_device(&device, true), DISQUALIFIED);

        let mut device = candidate(vk::PhysicalDeviceType::DISCRETE_GPU, Some(0), Some(0));
        device.present_mode_count = 0;
        assert_eq!(score_device(&device, true), DISQUALIFIED);
    }

    #[test]
    fn discrete_beats_integrated() {
        let scores = [
            score_device(&candidate(vk::PhysicalDeviceType::INTEGRATED_GPU, Some(0), Some(0)), true),
            score_device(&candidate(vk::PhysicalDeviceType::DISCRETE_GPU, Some(0), Some(1)), true),
        ];
        assert_eq!(pick_best(&scores), Some(1));
    }

    #[test]
    fn ties_go_to_first_enumerated() {
        assert_eq!(pick_best(&[3, 4, 4, 1]), Some(1));
        assert_eq!(pick_best(&[0, 0]), Some(0));
    }

    #[test]
    fn all_disqualified_selects_nothing() {
        assert_eq!(pick_best(&[DISQUALIFIED, DISQUALIFIED]), None);
        assert_eq!(pick_best(&[]), None);
    }
}
