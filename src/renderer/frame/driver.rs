use color_eyre::Result;
use crate::renderer::deletion_queue::DeletionQueue;

/// Result of asking the presentation engine for the next image
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// The image at `image_index` will be ready once the slot's image-acquired semaphore
    /// signals. `suboptimal` images can still be rendered and presented.
    Acquired { image_index: u32, suboptimal: bool },
    /// The swapchain no longer matches the surface, nothing was acquired
    OutOfDate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    /// Presented (or dropped) but the swapchain must be rebuilt before the next acquire
    Stale,
}

/// The GPU operations a frame needs, in the terms of a single ring slot.
///
/// [`FrameDriver`] decides when each of these runs; implementations only carry them out.
pub trait FrameBackend {
    fn ring_size(&self) -> usize;

    /// Blocks until the slot's fence is signaled
    fn wait_for_slot(&mut self, slot: usize) -> Result<()>;

    fn slot_deletion_queue(&mut self, slot: usize) -> &mut DeletionQueue;

    fn reset_slot_fence(&mut self, slot: usize) -> Result<()>;

    fn acquire_image(&mut self, slot: usize) -> Result<AcquireOutcome>;

    /// Puts a fence that was reset for a frame that never got submitted back into the
    /// signaled state, so the next wait on the slot can return
    fn restore_slot_fence(&mut self, slot: usize) -> Result<()>;

    /// Resets and begins the slot's command buffer
    fn begin_recording(&mut self, slot: usize, image_index: u32) -> Result<()>;

    /// Composes the frame into the acquired image and ends the command buffer
    fn finish_recording(&mut self, slot: usize, image_index: u32) -> Result<()>;

    fn submit(&mut self, slot: usize) -> Result<()>;

    fn present(&mut self, slot: usize, image_index: u32) -> Result<PresentOutcome>;

    fn recreate_swapchain(&mut self, drawable_size: (u32, u32)) -> Result<()>;
}

/// A frame that passed PreRender and is open for recording
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameToken {
    pub slot: usize,
    pub image_index: u32,
    pub frame_number: u64,
}

/// Runs the per-frame protocol and tracks which slot the next frame uses.
///
/// For each frame, on slot `frame_number % ring_size`:
/// 1. wait for the slot's fence
/// 2. flush the slot's deletion queue
/// 3. reset the fence
/// 4. acquire an image
/// 5. begin recording
///
/// and after the application has recorded its work, finish, submit, present, and move on
/// to the next slot. A stale swapchain is rebuilt before the next wait.
#[derive(Debug, Default)]
pub struct FrameDriver {
    frame_number: u64,
    swapchain_stale: bool,
}

impl FrameDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    pub fn current_slot(&self, ring_size: usize) -> usize {
        (self.frame_number % ring_size as u64) as usize
    }

    pub fn swapchain_stale(&self) -> bool {
        self.swapchain_stale
    }

    /// Forces a swapchain rebuild before the next frame, e.g. after the window was resized
    pub fn invalidate_swapchain(&mut self) {
        self.swapchain_stale = true;
    }

    /// Returns `None` when the frame has to be skipped because the swapchain went out of
    /// date; the slot is left ready for the next attempt.
    pub fn pre_render<B: FrameBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        drawable_size: (u32, u32),
    ) -> Result<Option<FrameToken>> {
        if self.swapchain_stale {
            log::debug!("Rebuilding stale swapchain for {}x{}", drawable_size.0, drawable_size.1);
            backend.recreate_swapchain(drawable_size)?;
            self.swapchain_stale = false;
        }

        let slot = self.current_slot(backend.ring_size());
        log::trace!("Frame {} on slot {}", self.frame_number, slot);

        backend.wait_for_slot(slot)?;
        backend.slot_deletion_queue(slot).flush();
        backend.reset_slot_fence(slot)?;

        let image_index = match backend.acquire_image(slot)? {
            AcquireOutcome::Acquired { image_index, suboptimal } => {
                if suboptimal {
                    self.swapchain_stale = true;
                }
                image_index
            }
            AcquireOutcome::OutOfDate => {
                log::debug!("Swapchain out of date on acquire, skipping frame {}", self.frame_number);
                backend.restore_slot_fence(slot)?;
                self.swapchain_stale = true;
                return Ok(None);
            }
        };

        backend.begin_recording(slot, image_index)?;

        Ok(Some(FrameToken {
            slot,
            image_index,
            frame_number: self.frame_number,
        }))
    }

    pub fn post_render<B: FrameBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        frame: FrameToken,
    ) -> Result<()> {
        backend.finish_recording(frame.slot, frame.image_index)?;
        backend.submit(frame.slot)?;

        if backend.present(frame.slot, frame.image_index)? == PresentOutcome::Stale {
            log::debug!("Swapchain stale after presenting frame {}", frame.frame_number);
            self.swapchain_stale = true;
        }

        self.frame_number += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::frame::fake::{Call, FakeGpu};

    fn run_frame(driver: &mut FrameDriver, gpu: &mut FakeGpu) -> Option<FrameToken> {
        let token = driver.pre_render(gpu, (800, 600)).unwrap();
        if let Some(token) = token {
            driver.post_render(gpu, token).unwrap();
        }
        token
    }

    #[test]
    fn protocol_runs_in_order() {
        let mut gpu = FakeGpu::new(2);
        let mut driver = FrameDriver::new();
        gpu.defer_release(0, "staging buffer");

        run_frame(&mut driver, &mut gpu);

        assert_eq!(gpu.calls(), vec![
            Call::Wait(0, false),
            Call::Released("staging buffer"),
            Call::ResetFence(0),
            Call::Acquire(0),
            Call::Begin(0, 0),
            Call::Finish(0, 0),
            Call::Submit(0),
            Call::Present(0, 0),
        ]);
        assert_eq!(driver.frame_number(), 1);
    }

    #[test]
    fn slots_alternate_with_two_frames_in_flight() {
        let mut gpu = FakeGpu::new(2);
        let mut driver = FrameDriver::new();

        let slots = (0..5)
            .map(|_| run_frame(&mut driver, &mut gpu).map(|token| token.slot))
            .collect::<Vec<_>>();

        assert_eq!(slots, vec![Some(0), Some(1), Some(0), Some(1), Some(0)]);
    }

    #[test]
    fn third_frame_blocks_on_first_frames_fence() {
        let mut gpu = FakeGpu::new(2);
        let mut driver = FrameDriver::new();

        run_frame(&mut driver, &mut gpu);
        run_frame(&mut driver, &mut gpu);
        assert_eq!(gpu.fence_signaled, vec![false, false]);
        gpu.defer_release(0, "frame 0 uniforms");
        gpu.clear_log();

        let token = driver.pre_render(&mut gpu, (800, 600)).unwrap().unwrap();

        assert_eq!(token.slot, 0);
        assert_eq!(token.frame_number, 2);
        let calls = gpu.calls();
        assert_eq!(calls[0], Call::Wait(0, true));
        assert_eq!(calls[1], Call::Released("frame 0 uniforms"));
        // Slot 1 is still in flight: the CPU is exactly one frame ahead
        assert!(!gpu.fence_signaled[1]);
        assert!(!calls.iter().any(|call| matches!(call, Call::Wait(1, _))));
    }

    #[test]
    fn deferred_releases_wait_for_their_slot() {
        let mut gpu = FakeGpu::new(2);
        let mut driver = FrameDriver::new();

        run_frame(&mut driver, &mut gpu);
        gpu.defer_release(0, "retired mesh");
        gpu.clear_log();

        // Frame 1 uses slot 1 and must leave slot 0's queue alone
        run_frame(&mut driver, &mut gpu);
        assert!(!gpu.calls().contains(&Call::Released("retired mesh")));
        assert_eq!(gpu.deletion_queues[0].len(), 1);

        run_frame(&mut driver, &mut gpu);
        let calls = gpu.calls();
        let waited = calls.iter().position(|call| *call == Call::Wait(0, true));
        let released = calls.iter().position(|call| *call == Call::Released("retired mesh"));
        assert!(waited.is_some() && released.is_some());
        assert!(waited < released);
    }

    #[test]
    fn stale_present_rebuilds_before_next_acquire() {
        let mut gpu = FakeGpu::new(2);
        let mut driver = FrameDriver::new();
        gpu.present_script.push_back(PresentOutcome::Stale);

        run_frame(&mut driver, &mut gpu);
        assert!(driver.swapchain_stale());
        assert_eq!(driver.frame_number(), 1);
        gpu.clear_log();

        let token = run_frame(&mut driver, &mut gpu);

        assert!(token.is_some());
        let calls = gpu.calls();
        assert_eq!(calls[0], Call::Recreate);
        assert_eq!(calls.iter().filter(|call| **call == Call::Recreate).count(), 1);
        assert!(!driver.swapchain_stale());
    }

    #[test]
    fn out_of_date_acquire_skips_the_frame_cleanly() {
        let mut gpu = FakeGpu::new(2);
        let mut driver = FrameDriver::new();
        gpu.acquire_script.push_back(AcquireOutcome::OutOfDate);

        let token = driver.pre_render(&mut gpu, (800, 600)).unwrap();

        assert_eq!(token, None);
        assert_eq!(driver.frame_number(), 0);
        assert!(driver.swapchain_stale());
        let calls = gpu.calls();
        assert_eq!(calls.last(), Some(&Call::RestoreFence(0)));
        assert!(!calls.iter().any(|call| matches!(call, Call::Begin(..) | Call::Submit(_) | Call::Present(..))));
        gpu.clear_log();

        // Retrying the same slot must not wait on a fence nothing will signal
        let token = run_frame(&mut driver, &mut gpu).unwrap();
        assert_eq!(token.slot, 0);
        assert_eq!(gpu.calls()[..2], [Call::Recreate, Call::Wait(0, false)]);
    }

    #[test]
    fn suboptimal_acquire_still_renders_then_rebuilds() {
        let mut gpu = FakeGpu::new(2);
        let mut driver = FrameDriver::new();
        gpu.acquire_script.push_back(AcquireOutcome::Acquired { image_index: 2, suboptimal: true });

        let token = run_frame(&mut driver, &mut gpu).unwrap();
        assert_eq!(token.image_index, 2);
        assert!(gpu.calls().contains(&Call::Present(0, 2)));
        assert!(driver.swapchain_stale());

        gpu.clear_log();
        run_frame(&mut driver, &mut gpu);
        assert_eq!(gpu.calls()[0], Call::Recreate);
    }

    #[test]
    fn invalidation_is_applied_once() {
        let mut gpu = FakeGpu::new(1);
        let mut driver = FrameDriver::new();
        driver.invalidate_swapchain();

        run_frame(&mut driver, &mut gpu);
        run_frame(&mut driver, &mut gpu);

        assert_eq!(gpu.calls().iter().filter(|call| **call == Call::Recreate).count(), 1);
    }
}
