use std::time::Instant;
use color_eyre::Result;
use crate::app::input_state::InputState;
use crate::app::window::{HostEvent, WindowHost};
use crate::app::{AppControl, AppHandler};
use crate::renderer::frame::{FrameBackend, FrameDriver, FrameToken};

/// What one pass through the run loop did
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopStep {
    /// A frame was recorded, submitted, and presented
    Rendered,
    /// The swapchain went out of date on acquire, nothing was recorded
    Skipped,
    /// The window cannot be rendered to. The caller should yield before the next step.
    Idle,
    /// Exit was requested; no frame work was started
    Exit,
}

/// State the run loop carries from one iteration to the next
pub struct RunLoop {
    driver: FrameDriver,
    input: InputState,
    rendering_enabled: bool,
    last_tick: Instant,
}

impl Default for RunLoop {
    fn default() -> Self {
        Self {
            driver: FrameDriver::new(),
            input: InputState::default(),
            rendering_enabled: true,
            last_tick: Instant::now(),
        }
    }
}

impl RunLoop {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frame_number(&self) -> u64 {
        self.driver.frame_number()
    }

    pub fn rendering_enabled(&self) -> bool {
        self.rendering_enabled
    }

    /// Runs one iteration: drain host events, tick, then record and present a frame if the
    /// window can be rendered to. `record` is handed the open frame between PreRender
    /// and PostRender.
    ///
    /// An exit requested before the step, by an event, or by `tick` is honored before
    /// any frame work starts.
    pub fn step<B, H, R>(
        &mut self,
        host: &mut dyn WindowHost,
        backend: &mut B,
        handler: &mut H,
        control: &mut AppControl,
        mut record: R,
    ) -> Result<LoopStep>
    where
        B: FrameBackend + ?Sized,
        H: AppHandler + ?Sized,
        R: FnMut(&mut B, &mut H, FrameToken, f32) -> Result<()>,
    {
        if control.exit_requested() {
            return Ok(LoopStep::Exit);
        }

        for event in host.poll_events() {
            self.input.process_host_event(&event);
            match event {
                HostEvent::CloseRequested => control.exit(),
                HostEvent::Minimized => self.rendering_enabled = false,
                HostEvent::Restored => {
                    self.rendering_enabled = true;
                    self.driver.invalidate_swapchain();
                }
                HostEvent::Resized { .. } => self.driver.invalidate_swapchain(),
                _ => {}
            }
            handler.handle_event(control, &event)?;
        }
        if host.should_close() {
            control.exit();
        }

        let now = Instant::now();
        let dt = now.duration_since(self.last_tick).as_secs_f32();
        self.last_tick = now;

        handler.tick(control, &self.input, dt)?;
        self.input.reset_frame();
        if control.exit_requested() {
            return Ok(LoopStep::Exit);
        }

        let drawable_size = host.framebuffer_size();
        if !renderable(self.rendering_enabled, drawable_size) {
            return Ok(LoopStep::Idle);
        }

        let Some(token) = self.driver.pre_render(backend, drawable_size)? else {
            return Ok(LoopStep::Skipped);
        };
        record(backend, handler, token, dt)?;
        self.driver.post_render(backend, token)?;
        Ok(LoopStep::Rendered)
    }
}

/// Frames are only drawn to a visible window with a non-empty framebuffer
fn renderable(rendering_enabled: bool, (width, height): (u32, u32)) -> bool {
    rendering_enabled && width > 0 && height > 0
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::ffi::CStr;
    use ash::vk;
    use color_eyre::eyre::eyre;
    use super::*;
    use crate::renderer::frame::fake::{Call, FakeGpu};
    use crate::renderer::frame::AcquireOutcome;

    /// Window whose events and size are fed in by the test
    struct ScriptedHost {
        polls: VecDeque<Vec<HostEvent>>,
        size: (u32, u32),
        closed: bool,
    }

    impl ScriptedHost {
        fn new(size: (u32, u32)) -> Self {
            Self {
                polls: VecDeque::new(),
                size,
                closed: false,
            }
        }

        fn queue(&mut self, events: Vec<HostEvent>) {
            self.polls.push_back(events);
        }
    }

    impl WindowHost for ScriptedHost {
        fn required_instance_extensions(&self) -> Result<Vec<&'static CStr>> {
            Ok(Vec::new())
        }

        fn create_surface(&self, _entry: &ash::Entry, _instance: &ash::Instance) -> Result<vk::SurfaceKHR> {
            Err(eyre!("no surfaces in tests"))
        }

        fn poll_events(&mut self) -> Vec<HostEvent> {
            self.polls.pop_front().unwrap_or_default()
        }

        fn should_close(&self) -> bool {
            self.closed
        }

        fn framebuffer_size(&self) -> (u32, u32) {
            self.size
        }
    }

    #[derive(Default)]
    struct RecordingHandler {
        events: Vec<HostEvent>,
        ticks: usize,
        recorded: Vec<u64>,
        exit_on_tick: Option<usize>,
    }

    impl AppHandler for RecordingHandler {
        fn handle_event(&mut self, _control: &mut AppControl, event: &HostEvent) -> Result<()> {
            self.events.push(event.clone());
            Ok(())
        }

        fn tick(&mut self, control: &mut AppControl, _input: &InputState, _dt: f32) -> Result<()> {
            self.ticks += 1;
            if self.exit_on_tick == Some(self.ticks) {
                control.exit();
            }
            Ok(())
        }
    }

    struct Harness {
        run_loop: RunLoop,
        host: ScriptedHost,
        gpu: FakeGpu,
        handler: RecordingHandler,
        control: AppControl,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                run_loop: RunLoop::new(),
                host: ScriptedHost::new((800, 600)),
                gpu: FakeGpu::new(2),
                handler: RecordingHandler::default(),
                control: AppControl::default(),
            }
        }

        fn step(&mut self) -> LoopStep {
            self.run_loop
                .step(
                    &mut self.host,
                    &mut self.gpu,
                    &mut self.handler,
                    &mut self.control,
                    |_gpu, handler, token, _dt| {
                        handler.recorded.push(token.frame_number);
                        Ok(())
                    },
                )
                .unwrap()
        }

        fn acquired(&self) -> usize {
            self.gpu.calls().iter().filter(|call| matches!(call, Call::Acquire(_))).count()
        }
    }

    #[test]
    fn renders_a_frame_per_step() {
        let mut harness = Harness::new();

        assert_eq!(harness.step(), LoopStep::Rendered);
        assert_eq!(harness.step(), LoopStep::Rendered);

        assert_eq!(harness.handler.recorded, vec![0, 1]);
        assert_eq!(harness.handler.ticks, 2);
        assert_eq!(harness.run_loop.frame_number(), 2);
    }

    #[test]
    fn minimized_window_idles_without_touching_the_swapchain() {
        let mut harness = Harness::new();
        harness.host.queue(vec![HostEvent::Minimized]);

        assert_eq!(harness.step(), LoopStep::Idle);
        assert_eq!(harness.step(), LoopStep::Idle);

        assert!(!harness.run_loop.rendering_enabled());
        assert_eq!(harness.acquired(), 0);
        assert!(harness.gpu.calls().is_empty());
        assert!(harness.handler.recorded.is_empty());
        // The application keeps ticking while nothing is drawn
        assert_eq!(harness.handler.ticks, 2);
    }

    #[test]
    fn restoring_rebuilds_the_swapchain_before_rendering() {
        let mut harness = Harness::new();
        harness.host.queue(vec![HostEvent::Minimized]);
        harness.host.queue(vec![HostEvent::Restored]);

        assert_eq!(harness.step(), LoopStep::Idle);
        assert_eq!(harness.step(), LoopStep::Rendered);

        let calls = harness.gpu.calls();
        assert_eq!(calls[0], Call::Recreate);
        assert_eq!(calls.iter().filter(|call| **call == Call::Recreate).count(), 1);
    }

    #[test]
    fn zero_sized_framebuffer_is_not_rendered() {
        let mut harness = Harness::new();
        harness.host.size = (0, 600);

        assert_eq!(harness.step(), LoopStep::Idle);
        assert_eq!(harness.acquired(), 0);

        harness.host.size = (800, 600);
        assert_eq!(harness.step(), LoopStep::Rendered);
    }

    #[test]
    fn resize_invalidates_the_swapchain() {
        let mut harness = Harness::new();
        harness.step();
        harness.gpu.clear_log();
        harness.host.queue(vec![HostEvent::Resized { width: 1024, height: 768 }]);

        assert_eq!(harness.step(), LoopStep::Rendered);

        assert_eq!(harness.gpu.calls()[0], Call::Recreate);
        assert_eq!(harness.handler.events, vec![HostEvent::Resized { width: 1024, height: 768 }]);
    }

    #[test]
    fn exit_from_tick_stops_before_pre_render() {
        let mut harness = Harness::new();
        harness.handler.exit_on_tick = Some(1);

        assert_eq!(harness.step(), LoopStep::Exit);

        assert_eq!(harness.handler.ticks, 1);
        assert!(harness.gpu.calls().is_empty());
        assert!(harness.handler.recorded.is_empty());
    }

    #[test]
    fn exit_is_honored_at_the_next_iteration_boundary() {
        let mut harness = Harness::new();
        harness.host.queue(vec![HostEvent::Focused(true)]);
        harness.control.exit();

        assert_eq!(harness.step(), LoopStep::Exit);

        // Nothing of the next iteration ran, not even event polling
        assert_eq!(harness.host.polls.len(), 1);
        assert_eq!(harness.handler.ticks, 0);
        assert!(harness.gpu.calls().is_empty());
    }

    #[test]
    fn close_request_stops_the_loop() {
        let mut harness = Harness::new();
        harness.host.queue(vec![HostEvent::CloseRequested]);

        assert_eq!(harness.step(), LoopStep::Exit);

        assert_eq!(harness.handler.events, vec![HostEvent::CloseRequested]);
        assert_eq!(harness.acquired(), 0);
    }

    #[test]
    fn host_close_flag_stops_the_loop() {
        let mut harness = Harness::new();
        harness.host.closed = true;

        assert_eq!(harness.step(), LoopStep::Exit);
        assert_eq!(harness.acquired(), 0);
    }

    #[test]
    fn out_of_date_frame_is_skipped_without_recording() {
        let mut harness = Harness::new();
        harness.gpu.acquire_script.push_back(AcquireOutcome::OutOfDate);

        assert_eq!(harness.step(), LoopStep::Skipped);
        assert!(harness.handler.recorded.is_empty());
        assert!(!harness.gpu.calls().iter().any(|call| matches!(call, Call::Submit(_))));

        assert_eq!(harness.step(), LoopStep::Rendered);
        assert_eq!(harness.handler.recorded, vec![0]);
    }

    #[test]
    fn minimized_or_empty_windows_are_not_renderable() {
        assert!(renderable(true, (800, 600)));
        assert!(!renderable(false, (800, 600)));
        assert!(!renderable(true, (0, 600)));
        assert!(!renderable(true, (800, 0)));
    }
}
