use std::sync::{Mutex, PoisonError};
use color_eyre::eyre::WrapErr;
use color_eyre::Result;

/// Process-wide state that is brought up by its first user and torn down by its last.
///
/// `init` runs exactly on the 0 -> 1 transition of the reference count and `teardown`
/// exactly on the 1 -> 0 transition. Both happen under the same lock as the count
/// update, so concurrent acquire/release pairs never interleave with them.
pub struct Subsystem {
    name: &'static str,
    init: fn() -> Result<()>,
    teardown: fn(),
    references: Mutex<usize>,
}

impl Subsystem {
    pub const fn new(name: &'static str, init: fn() -> Result<()>, teardown: fn()) -> Self {
        Self {
            name,
            init,
            teardown,
            references: Mutex::new(0),
        }
    }

    pub fn acquire(&'static self) -> Result<SubsystemRef> {
        let mut references = self.references
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if *references == 0 {
            (self.init)().wrap_err_with(|| format!("Failed to initialize {} subsystem", self.name))?;
            log::debug!("{} subsystem initialized", self.name);
        }
        *references += 1;

        Ok(SubsystemRef { subsystem: self })
    }

    pub fn reference_count(&self) -> usize {
        *self.references
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn add_reference(&self) {
        let mut references = self.references
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *references += 1;
    }

    fn release(&self) {
        let mut references = self.references
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        match *references {
            0 => log::error!("{} subsystem released more times than it was acquired", self.name),
            1 => {
                *references = 0;
                (self.teardown)();
                log::debug!("{} subsystem torn down", self.name);
            }
            _ => *references -= 1,
        }
    }
}

/// Keeps a [`Subsystem`] alive for as long as it exists
pub struct SubsystemRef {
    subsystem: &'static Subsystem,
}

impl Clone for SubsystemRef {
    fn clone(&self) -> Self {
        self.subsystem.add_reference();
        Self { subsystem: self.subsystem }
    }
}

impl Drop for SubsystemRef {
    fn drop(&mut self) {
        self.subsystem.release();
    }
}
