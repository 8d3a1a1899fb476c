//! Per-frame state: the fixed ring of slots that frames cycle through and the driver that
//! runs the acquire/record/submit/present protocol over it.

pub mod driver;
pub mod ring;
#[cfg(test)]
pub(crate) mod fake;

pub use driver::{AcquireOutcome, FrameBackend, FrameDriver, FrameToken, PresentOutcome};
pub use ring::{FrameRing, FrameSlot};
