use std::ffi::{c_char, c_void, CStr, CString};
use ash::vk;
use color_eyre::eyre::eyre;
use color_eyre::Result;
use crate::app::window::WindowHost;
use crate::renderer::config::RenderConfig;
use crate::renderer::deletion_queue::DeletionQueue;

pub const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Initializes Vulkan and keeps the Vulkan instance alive
pub struct RenderInstance {
    pub entry: ash::Entry,
    pub instance: ash::Instance,
    /// Layers requested at instance creation, reused for the logical device
    pub enabled_layers: Vec<&'static CStr>,
    debug_utils: Option<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
}

impl RenderInstance {
    pub fn new(
        window: &dyn WindowHost,
        config: &RenderConfig,
        deletion_queue: &mut DeletionQueue,
    ) -> Result<Self> {
        let entry = ash::Entry::linked();

        let enabled_layers = if config.validation {
            vec![VALIDATION_LAYER]
        } else {
            Vec::new()
        };
        Self::check_layers_supported(&entry, &enabled_layers)?;

        let exts = required_instance_extensions(
            window.required_instance_extensions()?,
            config.validation,
        );
        Self::check_extensions_supported(&entry, &exts)?;

        let instance = Self::create_instance(&entry, config, &enabled_layers, &exts)?;
        {
            let instance = instance.clone();
            deletion_queue.push_back(
                move || unsafe { instance.destroy_instance(None) },
                "instance",
            );
        }

        let debug_utils = if enabled_layers.is_empty() {
            None
        } else {
            let loader = ash::ext::debug_utils::Instance::new(&entry, &instance);
            let info = debug_utils_messenger_create_info(config);
            let messenger = unsafe {
                loader.create_debug_utils_messenger(&info, None)?
            };
            {
                let loader = loader.clone();
                deletion_queue.push_back(
                    move || unsafe { loader.destroy_debug_utils_messenger(messenger, None) },
                    "debug messenger",
                );
            }
            Some((loader, messenger))
        };

        Ok(Self {
            entry,
            instance,
            enabled_layers,
            debug_utils,
        })
    }

    pub fn has_debug_messenger(&self) -> bool {
        self.debug_utils.is_some()
    }

    fn create_instance(
        entry: &ash::Entry,
        config: &RenderConfig,
        layers: &[&'static CStr],
        exts: &[&'static CStr],
    ) -> Result<ash::Instance> {
        let app_name = CString::new(config.app_name.clone())?;
        let application_info = vk::ApplicationInfo::default()
            .application_name(&app_name)
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(c"kindle")
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(vk::API_VERSION_1_3);
        let enabled_layer_names = layers
            .iter()
            .map(|layer| layer.as_ptr())
            .collect::<Vec<*const c_char>>();
        let enabled_extension_names = exts
            .iter()
            .map(|ext| ext.as_ptr())
            .collect::<Vec<*const c_char>>();

        // Chained so instance creation and destruction are covered by validation too
        let mut debug_info = debug_utils_messenger_create_info(config);
        let mut instance_info = vk::InstanceCreateInfo::default()
            .application_info(&application_info)
            .enabled_layer_names(&enabled_layer_names)
            .enabled_extension_names(&enabled_extension_names);
        if !layers.is_empty() {
            instance_info = instance_info.push_next(&mut debug_info);
        }

        #[cfg(target_os = "macos")]
        let instance_info = instance_info
            .flags(vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR);

        Ok(unsafe {
            entry.create_instance(&instance_info, None)?
        })
    }

    fn check_layers_supported(entry: &ash::Entry, required: &[&'static CStr]) -> Result<()> {
        if required.is_empty() {
            return Ok(());
        }

        let layer_props = unsafe { entry.enumerate_instance_layer_properties()? };
        let supported_layers = layer_props
            .iter()
            .filter_map(|props| props.layer_name_as_c_str().ok())
            .collect::<Vec<_>>();

        ensure_supported("Layer", required, &supported_layers)
    }

    fn check_extensions_supported(entry: &ash::Entry, required: &[&'static CStr]) -> Result<()> {
        let ext_props = unsafe { entry.enumerate_instance_extension_properties(None)? };
        let supported_exts = ext_props
            .iter()
            .filter_map(|props| props.extension_name_as_c_str().ok())
            .collect::<Vec<_>>();

        ensure_supported("Instance extension", required, &supported_exts)
    }
}

/// Fails naming every entry of `required` missing from `available`
pub fn ensure_supported(kind: &str, required: &[&CStr], available: &[&CStr]) -> Result<()> {
    let missing = missing_names(required, available);
    if missing.is_empty() {
        return Ok(());
    }
    let names = missing
        .iter()
        .map(|name| name.to_string_lossy())
        .collect::<Vec<_>>()
        .join(", ");
    Err(eyre!("{} not supported: {}", kind, names))
}

/// Platform presentation extensions plus debug utils when validation is on
pub fn required_instance_extensions(
    platform_exts: Vec<&'static CStr>,
    validation: bool,
) -> Vec<&'static CStr> {
    let mut exts = platform_exts;

    if validation {
        exts.push(ash::ext::debug_utils::NAME);
    }

    #[cfg(target_os = "macos")]
    {
        exts.push(ash::khr::portability_enumeration::NAME);
        exts.push(ash::khr::get_physical_device_properties2::NAME);
    }

    exts.dedup();
    exts
}

/// Entries of `required` that do not appear in `available`, in the order they were required
pub fn missing_names<'a>(required: &[&'a CStr], available: &[&CStr]) -> Vec<&'a CStr> {
    required
        .iter()
        .filter(|req| !available.iter().any(|avail| *avail == **req))
        .copied()
        .collect()
}

fn debug_utils_messenger_create_info(
    config: &RenderConfig,
) -> vk::DebugUtilsMessengerCreateInfoEXT<'static> {
    let message_type = vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
        | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
        | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE;
    vk::DebugUtilsMessengerCreateInfoEXT::default()
        .message_severity(config.debug_messages.severity_flags())
        .message_type(message_type)
        .pfn_user_callback(Some(debug_callback))
}

unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _p_user_data: *mut c_void,
) -> vk::Bool32 {
    let msg_type = match message_type {
        vk::DebugUtilsMessageTypeFlagsEXT::GENERAL => "[General]",
        vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE => "[Performance]",
        vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION => "[Validation]",
        _ => "[Unknown]",
    };
    let msg = unsafe {
        if p_callback_data.is_null() || (*p_callback_data).p_message.is_null() {
            c"<no message>"
        } else {
            CStr::from_ptr((*p_callback_data).p_message)
        }
    };
    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE => {
            log::trace!("[Verbose]{} {:?}", msg_type, msg);
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::INFO => {
            log::info!("[Info]{} {:?}", msg_type, msg);
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            log::warn!("[Warning]{} {:?}", msg_type, msg);
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            log::error!("[Error]{} {:?}", msg_type, msg);
        }
        _ => {
            log::warn!("[Unknown]{} {:?}", msg_type, msg);
        }
    }

    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_utils_only_requested_with_validation() {
        let platform = vec![ash::khr::surface::NAME];

        let with = required_instance_extensions(platform.clone(), true);
        let without = required_instance_extensions(platform, false);

        assert!(with.contains(&ash::ext::debug_utils::NAME));
        assert!(with.contains(&ash::khr::surface::NAME));
        assert!(!without.contains(&ash::ext::debug_utils::NAME));
    }

    #[test]
    fn missing_layers_are_reported_by_name() {
        let available = [c"VK_LAYER_MESA_device_select"];
        let missing = missing_names(&[VALIDATION_LAYER], &available);
        assert_eq!(missing, vec![VALIDATION_LAYER]);

        let available = [c"VK_LAYER_MESA_device_select", VALIDATION_LAYER];
        assert!(missing_names(&[VALIDATION_LAYER], &available).is_empty());
    }

    #[test]
    fn missing_instance_extension_is_named_in_the_error() {
        let available = [ash::khr::surface::NAME, ash::khr::xlib_surface::NAME];
        let required = required_instance_extensions(vec![ash::khr::surface::NAME], true);

        let err = ensure_supported("Instance extension", &required, &available).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("VK_EXT_debug_utils"), "{}", message);
        assert!(!message.contains("VK_KHR_surface"), "{}", message);

        let available = [ash::khr::surface::NAME, ash::ext::debug_utils::NAME];
        let required = [ash::ext::debug_utils::NAME, ash::khr::surface::NAME];
        assert!(ensure_supported("Instance extension", &required, &available).is_ok());
    }
}
