//! Scoped cleanup for long-lived components.
//!
//! A component registers teardown callbacks as it acquires resources
//! (subscriptions, scheduled tasks, temp files). They run once, newest first,
//! on [`CleanupStack::dispose`] or when the stack is dropped.

type Callback = Box<dyn FnOnce()>;

#[derive(Default)]
pub struct CleanupStack {
    callbacks: Vec<Callback>,
}

impl CleanupStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, callback: impl FnOnce() + 'static) {
        self.callbacks.push(Box::new(callback));
    }

    /// Keeps `resource` alive until disposal, then drops it.
    pub fn hold<T: 'static>(&mut self, resource: T) {
        self.push(move || drop(resource));
    }

    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }

    /// Runs every callback in reverse registration order.
    pub fn dispose(&mut self) {
        while let Some(callback) = self.callbacks.pop() {
            callback();
        }
    }
}

impl Drop for CleanupStack {
    fn drop(&mut self) {
        self.dispose();
    }
}
