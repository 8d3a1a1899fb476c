//! "Resources" are the objects applications create on top of the core: images, buffers,
//! shaders, descriptor sets, and pipelines. Each one has a single release path.

pub mod buffer;
pub mod descriptor;
pub mod image;
pub mod pipeline;
pub mod shader;

use std::sync::{Arc, Mutex};
use gpu_allocator::vulkan::Allocator;

pub type MemoryAllocator = Arc<Mutex<Allocator>>;

/// Takes the owned state out of `slot` and hands it to `release`. Returns `false` and logs
/// an error instead when the state was already released.
pub(crate) fn release_once<T>(slot: &mut Option<T>, what: &str, release: impl FnOnce(T)) -> bool {
    match slot.take() {
        Some(state) => {
            release(state);
            true
        }
        None => {
            log::error!("{} destroyed more than once", what);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_release_is_a_reported_no_op() {
        let mut slot = Some(7);
        let mut released = Vec::new();

        assert!(release_once(&mut slot, "test", |value| released.push(value)));
        assert!(!release_once(&mut slot, "test", |value| released.push(value)));

        assert_eq!(released, vec![7]);
        assert!(slot.is_none());
    }
}
