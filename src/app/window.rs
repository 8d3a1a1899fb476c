use std::ffi::CStr;
use std::sync::Arc;
use std::time::Duration;
use ash::vk;
use color_eyre::eyre::{eyre, OptionExt};
use color_eyre::Result;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::{ElementState, KeyEvent, MouseButton, MouseScrollDelta, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::Key;
use winit::platform::pump_events::{EventLoopExtPumpEvents, PumpStatus};
use winit::window::{Window, WindowAttributes, WindowId};
use crate::app::config::WindowConfig;
use crate::app::subsystem::{Subsystem, SubsystemRef};

/// Events a window host reports to the application, already stripped of platform details
#[derive(Clone, Debug, PartialEq)]
pub enum HostEvent {
    CloseRequested,
    Resized { width: u32, height: u32 },
    Minimized,
    Restored,
    Focused(bool),
    KeyPressed(Key),
    KeyReleased(Key),
    CursorMoved { x: f64, y: f64 },
    MouseInput { button: MouseButton, pressed: bool },
    MouseWheel { delta_y: f32 },
}

/// Capabilities the renderer and run loop need from whatever owns the window
pub trait WindowHost {
    /// Instance extensions needed to present to this host's surfaces
    fn required_instance_extensions(&self) -> Result<Vec<&'static CStr>>;

    /// Creates a presentable surface bound to `instance`. The caller owns the surface.
    fn create_surface(&self, entry: &ash::Entry, instance: &ash::Instance) -> Result<vk::SurfaceKHR>;

    /// Drains every pending event without blocking
    fn poll_events(&mut self) -> Vec<HostEvent>;

    fn should_close(&self) -> bool;

    fn framebuffer_size(&self) -> (u32, u32);
}

fn windowing_init() -> Result<()> {
    log::info!("Windowing subsystem up");
    Ok(())
}

fn windowing_teardown() {
    log::info!("Windowing subsystem down");
}

/// Shared by every window-owning object in the process
pub static WINDOWING: Subsystem = Subsystem::new("windowing", windowing_init, windowing_teardown);

/// [`WindowHost`] backed by a single winit window whose event loop is pumped by the caller
pub struct WinitHost {
    event_loop: EventLoop<()>,
    state: HostState,
    _windowing: SubsystemRef,
}

impl WinitHost {
    pub fn new(config: &WindowConfig) -> Result<Self> {
        let windowing = WINDOWING.acquire()?;

        let event_loop = EventLoop::new()?;
        event_loop.set_control_flow(ControlFlow::Poll);

        let attributes = Window::default_attributes()
            .with_title(config.title.clone())
            .with_inner_size(PhysicalSize::new(config.width, config.height))
            .with_resizable(config.resizable);

        let mut host = Self {
            event_loop,
            state: HostState::new(attributes),
            _windowing: windowing,
        };

        // The window can only be created once the event loop has been resumed
        while host.state.window.is_none() {
            if let PumpStatus::Exit(code) = host
                .event_loop
                .pump_app_events(Some(Duration::ZERO), &mut host.state)
            {
                return Err(eyre!("Event loop exited with code {} before a window was created", code));
            }
            if let Some(err) = host.state.creation_error.take() {
                return Err(eyre!("Failed to create window: {}", err));
            }
        }

        Ok(host)
    }

    pub fn window(&self) -> Option<&Arc<Window>> {
        self.state.window.as_ref()
    }

    fn window_or_err(&self) -> Result<&Arc<Window>> {
        self.state.window.as_ref().ok_or_eyre("Window has not been created")
    }
}

impl WindowHost for WinitHost {
    fn required_instance_extensions(&self) -> Result<Vec<&'static CStr>> {
        let window = self.window_or_err()?;
        let exts = ash_window::enumerate_required_extensions(window.display_handle()?.as_raw())?
            .iter()
            .map(|ext| unsafe { CStr::from_ptr(*ext) })
            .collect();
        Ok(exts)
    }

    fn create_surface(&self, entry: &ash::Entry, instance: &ash::Instance) -> Result<vk::SurfaceKHR> {
        let window = self.window_or_err()?;
        let surface = unsafe {
            ash_window::create_surface(
                entry,
                instance,
                window.display_handle()?.as_raw(),
                window.window_handle()?.as_raw(),
                None,
            )?
        };
        Ok(surface)
    }

    fn poll_events(&mut self) -> Vec<HostEvent> {
        let status = self.event_loop.pump_app_events(Some(Duration::ZERO), &mut self.state);
        if let PumpStatus::Exit(_) = status {
            self.state.close_requested = true;
        }
        std::mem::take(&mut self.state.events)
    }

    fn should_close(&self) -> bool {
        self.state.close_requested
    }

    fn framebuffer_size(&self) -> (u32, u32) {
        self.state.window
            .as_ref()
            .map_or((0, 0), |window| {
                let size = window.inner_size();
                (size.width, size.height)
            })
    }
}

struct HostState {
    attributes: WindowAttributes,
    window: Option<Arc<Window>>,
    creation_error: Option<String>,
    events: Vec<HostEvent>,
    close_requested: bool,
    minimized: bool,
}

impl HostState {
    fn new(attributes: WindowAttributes) -> Self {
        Self {
            attributes,
            window: None,
            creation_error: None,
            events: Vec::new(),
            close_requested: false,
            minimized: false,
        }
    }

    fn set_minimized(&mut self, minimized: bool) {
        if self.minimized == minimized {
            return;
        }
        self.minimized = minimized;
        self.events.push(if minimized {
            HostEvent::Minimized
        } else {
            HostEvent::Restored
        });
    }
}

impl ApplicationHandler for HostState {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        match event_loop.create_window(self.attributes.clone()) {
            Ok(window) => self.window = Some(Arc::new(window)),
            Err(err) => self.creation_error = Some(err.to_string()),
        }
    }

    fn window_event(
        &mut self,
        _event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent,
    ) {
        if self.window.as_ref().map(|w| w.id()) != Some(window_id) {
            return;
        }

        match event {
            WindowEvent::CloseRequested => {
                self.close_requested = true;
                self.events.push(HostEvent::CloseRequested);
            }
            WindowEvent::Resized(size) => {
                if size.width == 0 || size.height == 0 {
                    self.set_minimized(true);
                } else {
                    self.set_minimized(false);
                    self.events.push(HostEvent::Resized {
                        width: size.width,
                        height: size.height,
                    });
                }
            }
            WindowEvent::Occluded(occluded) => {
                self.set_minimized(occluded);
            }
            WindowEvent::Focused(focused) => {
                self.events.push(HostEvent::Focused(focused));
            }
            WindowEvent::KeyboardInput {
                event: KeyEvent {
                    logical_key,
                    state,
                    ..
                },
                ..
            } => {
                self.events.push(match state {
                    ElementState::Pressed => HostEvent::KeyPressed(logical_key),
                    ElementState::Released => HostEvent::KeyReleased(logical_key),
                });
            }
            WindowEvent::CursorMoved { position, .. } => {
                self.events.push(HostEvent::CursorMoved {
                    x: position.x,
                    y: position.y,
                });
            }
            WindowEvent::MouseInput { state, button, .. } => {
                self.events.push(HostEvent::MouseInput {
                    button,
                    pressed: state == ElementState::Pressed,
                });
            }
            WindowEvent::MouseWheel { delta, .. } => {
                let delta_y = match delta {
                    MouseScrollDelta::LineDelta(_x, y) => y.signum(),
                    MouseScrollDelta::PixelDelta(pos) => pos.y.signum() as f32,
                };
                self.events.push(HostEvent::MouseWheel { delta_y });
            }
            _ => {}
        }
    }
}
