use std::time::Duration;
use ash::vk;
use color_eyre::eyre::eyre;
use color_eyre::Result;

/// Number of ring slots used when nothing else is configured (double buffering)
pub const DEFAULT_FRAMES_IN_FLIGHT: usize = 2;

/// How the swapchain present mode is picked from what the surface supports
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresentModePolicy {
    /// Use MAILBOX when available, FIFO otherwise
    PreferMailbox,
    /// Always use FIFO (vsync)
    Fifo,
}

/// Which validation-layer messages are forwarded to the logger
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DebugMessageFilter {
    All,
    WarningsAndErrors,
    ErrorsOnly,
}

impl DebugMessageFilter {
    pub fn severity_flags(self) -> vk::DebugUtilsMessageSeverityFlagsEXT {
        use vk::DebugUtilsMessageSeverityFlagsEXT as Severity;
        match self {
            DebugMessageFilter::All => {
                Severity::VERBOSE | Severity::INFO | Severity::WARNING | Severity::ERROR
            }
            DebugMessageFilter::WarningsAndErrors => Severity::WARNING | Severity::ERROR,
            DebugMessageFilter::ErrorsOnly => Severity::ERROR,
        }
    }
}

/// Contains configuration options for the renderer like validation, vsync, and ring size
#[derive(Clone, Debug)]
pub struct RenderConfig {
    pub app_name: String,
    pub validation: bool,
    pub debug_messages: DebugMessageFilter,
    pub present_mode: PresentModePolicy,
    pub surface_format: vk::SurfaceFormatKHR,
    pub draw_format: vk::Format,
    pub frames_in_flight: usize,
    /// How long the run loop sleeps per tick while the window cannot be rendered to
    pub idle_sleep: Duration,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            app_name: "kindle".into(),
            validation: cfg!(debug_assertions),
            debug_messages: DebugMessageFilter::WarningsAndErrors,
            present_mode: PresentModePolicy::PreferMailbox,
            surface_format: vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
            draw_format: vk::Format::R16G16B16A16_SFLOAT,
            frames_in_flight: DEFAULT_FRAMES_IN_FLIGHT,
            idle_sleep: Duration::from_millis(100),
        }
    }
}

impl RenderConfig {
    pub fn validate(&self) -> Result<()> {
        if self.frames_in_flight == 0 {
            return Err(eyre!("frames_in_flight must be at least 1"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_double_buffered_and_valid() {
        let config = RenderConfig::default();
        assert_eq!(config.frames_in_flight, 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_frames_in_flight_is_rejected() {
        let config = RenderConfig {
            frames_in_flight: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn filters_widen_monotonically() {
        use vk::DebugUtilsMessageSeverityFlagsEXT as Severity;
        let errors = DebugMessageFilter::ErrorsOnly.severity_flags();
        let warnings = DebugMessageFilter::WarningsAndErrors.severity_flags();
        let all = DebugMessageFilter::All.severity_flags();

        assert_eq!(errors, Severity::ERROR);
        assert!(warnings.contains(errors));
        assert!(!warnings.contains(Severity::INFO));
        assert!(all.contains(warnings | Severity::INFO | Severity::VERBOSE));
    }
}
