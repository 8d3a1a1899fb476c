use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use color_eyre::Result;
use crate::renderer::deletion_queue::DeletionQueue;
use crate::renderer::frame::{AcquireOutcome, FrameBackend, PresentOutcome};

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Call {
    /// `true` when the CPU had to block for the GPU
    Wait(usize, bool),
    Released(&'static str),
    ResetFence(usize),
    Acquire(usize),
    RestoreFence(usize),
    Begin(usize, u32),
    Finish(usize, u32),
    Submit(usize),
    Present(usize, u32),
    Recreate,
}

type Log = Rc<RefCell<Vec<Call>>>;

/// GPU stand-in whose queued work only completes when the CPU waits for it
pub(crate) struct FakeGpu {
    log: Log,
    pub(crate) fence_signaled: Vec<bool>,
    pending_submission: Vec<bool>,
    observed_signaled: Vec<bool>,
    pub(crate) deletion_queues: Vec<DeletionQueue>,
    pub(crate) acquire_script: VecDeque<AcquireOutcome>,
    pub(crate) present_script: VecDeque<PresentOutcome>,
    next_image: u32,
}

impl FakeGpu {
    pub(crate) fn new(ring_size: usize) -> Self {
        Self {
            log: Rc::new(RefCell::new(Vec::new())),
            fence_signaled: vec![true; ring_size],
            pending_submission: vec![false; ring_size],
            observed_signaled: vec![false; ring_size],
            deletion_queues: (0..ring_size).map(|_| DeletionQueue::new()).collect(),
            acquire_script: VecDeque::new(),
            present_script: VecDeque::new(),
            next_image: 0,
        }
    }

    fn record(&self, call: Call) {
        self.log.borrow_mut().push(call);
    }

    pub(crate) fn defer_release(&mut self, slot: usize, label: &'static str) {
        let log = self.log.clone();
        self.deletion_queues[slot].push_back(move || log.borrow_mut().push(Call::Released(label)), label);
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.log.borrow().clone()
    }

    pub(crate) fn clear_log(&self) {
        self.log.borrow_mut().clear();
    }

    fn assert_slot_owned(&self, slot: usize) {
        assert!(
            self.observed_signaled[slot],
            "slot {} touched before its fence was observed signaled",
            slot,
        );
    }
}

impl FrameBackend for FakeGpu {
    fn ring_size(&self) -> usize {
        self.fence_signaled.len()
    }

    fn wait_for_slot(&mut self, slot: usize) -> Result<()> {
        let blocked = !self.fence_signaled[slot];
        if blocked {
            assert!(self.pending_submission[slot], "waiting on slot {} would never return", slot);
            self.pending_submission[slot] = false;
            self.fence_signaled[slot] = true;
        }
        self.observed_signaled[slot] = true;
        self.record(Call::Wait(slot, blocked));
        Ok(())
    }

    fn slot_deletion_queue(&mut self, slot: usize) -> &mut DeletionQueue {
        self.assert_slot_owned(slot);
        &mut self.deletion_queues[slot]
    }

    fn reset_slot_fence(&mut self, slot: usize) -> Result<()> {
        self.assert_slot_owned(slot);
        self.fence_signaled[slot] = false;
        self.record(Call::ResetFence(slot));
        Ok(())
    }

    fn acquire_image(&mut self, slot: usize) -> Result<AcquireOutcome> {
        self.record(Call::Acquire(slot));
        let outcome = self.acquire_script.pop_front().unwrap_or_else(|| {
            let image_index = self.next_image;
            self.next_image = (self.next_image + 1) % 3;
            AcquireOutcome::Acquired { image_index, suboptimal: false }
        });
        Ok(outcome)
    }

    fn restore_slot_fence(&mut self, slot: usize) -> Result<()> {
        self.fence_signaled[slot] = true;
        self.record(Call::RestoreFence(slot));
        Ok(())
    }

    fn begin_recording(&mut self, slot: usize, image_index: u32) -> Result<()> {
        self.assert_slot_owned(slot);
        self.record(Call::Begin(slot, image_index));
        Ok(())
    }

    fn finish_recording(&mut self, slot: usize, image_index: u32) -> Result<()> {
        self.record(Call::Finish(slot, image_index));
        Ok(())
    }

    fn submit(&mut self, slot: usize) -> Result<()> {
        self.pending_submission[slot] = true;
        self.observed_signaled[slot] = false;
        self.record(Call::Submit(slot));
        Ok(())
    }

    fn present(&mut self, slot: usize, image_index: u32) -> Result<PresentOutcome> {
        self.record(Call::Present(slot, image_index));
        Ok(self.present_script.pop_front().unwrap_or(PresentOutcome::Presented))
    }

    fn recreate_swapchain(&mut self, _drawable_size: (u32, u32)) -> Result<()> {
        self.record(Call::Recreate);
        Ok(())
    }
}
