pub mod config;
pub mod input_state;
pub mod lifecycle;
pub mod run_loop;
pub mod subsystem;
pub mod window;

use color_eyre::eyre::{eyre, WrapErr};
use color_eyre::Result;
use crate::app::config::AppConfig;
use crate::app::input_state::InputState;
use crate::app::lifecycle::{Lifecycle, LifecycleState};
use crate::app::run_loop::{LoopStep, RunLoop};
use crate::app::window::{HostEvent, WinitHost};
use crate::renderer::frame::FrameToken;
use crate::renderer::{Frame, Renderer};

/// Hooks the run loop calls into. Every hook has a no-op default.
///
/// Per tick the order is: `handle_event` for each pending event, `tick`, then, if the
/// window can be rendered to and an image was acquired, `pre_render`, `render`, and
/// `post_render` on the same open frame. `dt` is the time since the previous tick in
/// seconds.
pub trait AppHandler {
    /// Called once after the renderer has been created
    fn init(&mut self, _renderer: &mut Renderer) -> Result<()> {
        Ok(())
    }

    fn handle_event(&mut self, _control: &mut AppControl, _event: &HostEvent) -> Result<()> {
        Ok(())
    }

    fn tick(&mut self, _control: &mut AppControl, _input: &InputState, _dt: f32) -> Result<()> {
        Ok(())
    }

    fn pre_render(&mut self, _frame: &mut Frame<'_>, _dt: f32) -> Result<()> {
        Ok(())
    }

    fn render(&mut self, _frame: &mut Frame<'_>, _dt: f32) -> Result<()> {
        Ok(())
    }

    fn post_render(&mut self, _frame: &mut Frame<'_>, _dt: f32) -> Result<()> {
        Ok(())
    }

    /// Called once after the device has gone idle and before the renderer is released.
    /// Release application-owned GPU objects here.
    fn shutdown(&mut self, _renderer: &mut Renderer) {}
}

/// Lets hooks stop the run loop. This is the only way to end a running app besides closing
/// the window: the loop checks it after event handling, after `tick`, and at the start
/// of every iteration, and never interrupts a frame that was already started.
#[derive(Debug, Default)]
pub struct AppControl {
    exit_requested: bool,
}

impl AppControl {
    pub fn exit(&mut self) {
        self.exit_requested = true;
    }

    pub fn exit_requested(&self) -> bool {
        self.exit_requested
    }
}

pub struct App<H: AppHandler> {
    config: AppConfig,
    handler: H,
    lifecycle: Lifecycle,
    control: AppControl,

    renderer: Option<Renderer>,
    host: Option<WinitHost>,
    run_loop: RunLoop,
}

impl<H: AppHandler> App<H> {
    pub fn new(config: AppConfig, handler: H) -> Self {
        Self {
            config,
            handler,
            lifecycle: Lifecycle::default(),
            control: AppControl::default(),

            renderer: None,
            host: None,
            run_loop: RunLoop::new(),
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Opens the window and brings up the renderer. Any failure is final: the app moves
    /// to the stopped state and cannot be run.
    pub fn initialize(&mut self) -> Result<()> {
        self.lifecycle.initialize()?;
        if let Err(err) = self.setup() {
            self.lifecycle.stop();
            self.shutdown();
            return Err(err);
        }
        Ok(())
    }

    fn setup(&mut self) -> Result<()> {
        let host = WinitHost::new(&self.config.window).wrap_err("Failed to open window")?;
        let renderer = Renderer::new(&host, &self.config.render)?;
        // Stored before `init` so a failing hook still gets its shutdown call
        let renderer = self.renderer.insert(renderer);
        self.host = Some(host);
        self.handler.init(renderer)
    }

    /// Drives frames until a hook requests an exit through [`AppControl`] or the window
    /// is closed
    pub fn run(&mut self) -> Result<()> {
        self.lifecycle.start()?;
        log::info!("Entering run loop");

        let result = self.drive();

        self.lifecycle.stop();
        self.shutdown();
        log::info!("Run loop stopped after {} frames", self.run_loop.frame_number());
        result
    }

    fn drive(&mut self) -> Result<()> {
        let (Some(host), Some(renderer)) = (self.host.as_mut(), self.renderer.as_mut()) else {
            return Err(eyre!("App is running without a window or renderer"));
        };
        let idle_sleep = renderer.config().idle_sleep;

        loop {
            let step = self.run_loop.step(
                host,
                renderer,
                &mut self.handler,
                &mut self.control,
                record_frame::<H>,
            )?;
            match step {
                LoopStep::Exit => return Ok(()),
                LoopStep::Idle => std::thread::sleep(idle_sleep),
                LoopStep::Rendered | LoopStep::Skipped => {}
            }
        }
    }

    fn shutdown(&mut self) {
        if let Some(mut renderer) = self.renderer.take() {
            if let Err(err) = renderer.wait_idle() {
                log::error!("Failed to wait for device idle on shutdown: {}", err);
            }
            self.handler.shutdown(&mut renderer);
        }
        // The window outlives the surface created from it
        self.host = None;
    }
}

impl<H: AppHandler> Drop for App<H> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Hands the open frame to the application's recording hooks
fn record_frame<H: AppHandler>(
    renderer: &mut Renderer,
    handler: &mut H,
    token: FrameToken,
    dt: f32,
) -> Result<()> {
    let mut frame = renderer.frame(token)?;
    handler.pre_render(&mut frame, dt)?;
    handler.render(&mut frame, dt)?;
    handler.post_render(&mut frame, dt)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopHandler;

    impl AppHandler for NoopHandler {}

    #[test]
    fn run_before_initialize_fails_without_touching_anything() {
        let mut app = App::new(AppConfig::default(), NoopHandler);
        assert!(app.run().is_err());
        assert_eq!(app.state(), LifecycleState::NotInitialized);
        assert!(app.renderer.is_none());
        assert!(app.host.is_none());
    }

    #[test]
    fn exit_is_cooperative() {
        let mut control = AppControl::default();
        assert!(!control.exit_requested());
        control.exit();
        control.exit();
        assert!(control.exit_requested());
    }
}
