use crate::renderer::config::RenderConfig;

/// Initial window parameters
#[derive(Clone, Debug)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub resizable: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "kindle".into(),
            width: 1280,
            height: 720,
            resizable: true,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct AppConfig {
    pub window: WindowConfig,
    pub render: RenderConfig,
}
