/// Ordered list of release actions for GPU handles.
///
/// Handles are released in the reverse order they were registered in, so a resource
/// registered after another one (a view after its image, a device after its instance)
/// is always released first. The queue flushes itself when dropped.
#[derive(Default)]
pub struct DeletionQueue {
    entries: Vec<(Box<dyn FnOnce()>, String)>,
}

impl DeletionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_back<F>(&mut self, release: F, label: impl Into<String>)
    where
        F: FnOnce() + 'static,
    {
        self.entries.push((Box::new(release), label.into()));
    }

    /// Runs every registered action exactly once, newest first, and empties the queue.
    pub fn flush(&mut self) {
        while let Some((release, label)) = self.entries.pop() {
            release();
            log::debug!("Released {}", label);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Drop for DeletionQueue {
    fn drop(&mut self) {
        self.flush();
    }
}
