use std::fmt;

use crate::device::GraphicsDevice;

/// Work executed on the render thread with the device handle.
pub type Work = Box<dyn FnOnce(&mut dyn GraphicsDevice) + Send + 'static>;

/// Follow-up invoked on the render thread once the work has returned.
pub type Callback = Box<dyn FnOnce() + Send + 'static>;

/// A unit of render work plus an optional completion callback.
///
/// Holds no GPU resources itself; it is the payload a
/// [`RenderContext`](super::RenderContext) queues.
pub struct WorkItem {
    action: Work,
    on_complete: Option<Callback>,
}

impl WorkItem {
    pub fn new<F>(action: F) -> Self
    where
        F: FnOnce(&mut dyn GraphicsDevice) + Send + 'static,
    {
        Self {
            action: Box::new(action),
            on_complete: None,
        }
    }

    pub fn with_callback<F, C>(action: F, on_complete: C) -> Self
    where
        F: FnOnce(&mut dyn GraphicsDevice) + Send + 'static,
        C: FnOnce() + Send + 'static,
    {
        Self::new(action).then(on_complete)
    }

    /// Replaces the completion callback.
    pub fn then<C>(mut self, on_complete: C) -> Self
    where
        C: FnOnce() + Send + 'static,
    {
        self.on_complete = Some(Box::new(on_complete));
        self
    }

    pub fn has_callback(&self) -> bool {
        self.on_complete.is_some()
    }

    /// Runs the action, then the callback.
    pub fn run(self, device: &mut dyn GraphicsDevice) {
        (self.action)(device);
        if let Some(cb) = self.on_complete {
            cb();
        }
    }

    pub(super) fn into_parts(self) -> (Work, Option<Callback>) {
        (self.action, self.on_complete)
    }
}

impl fmt::Debug for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkItem")
            .field("has_callback", &self.has_callback())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::device::SoftwareDevice;

    #[test]
    fn run_invokes_callback_after_action() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let (a, b) = (Arc::clone(&log), Arc::clone(&log));

        let item = WorkItem::with_callback(
            move |_| a.lock().unwrap().push("work"),
            move || b.lock().unwrap().push("callback"),
        );
        assert!(item.has_callback());
        item.run(&mut SoftwareDevice::new());

        assert_eq!(*log.lock().unwrap(), ["work", "callback"]);
    }

    #[test]
    fn action_receives_device() {
        let seen = Arc::new(Mutex::new(String::new()));
        let s = Arc::clone(&seen);
        let item = WorkItem::new(move |device| *s.lock().unwrap() = device.label().to_string());
        assert!(!item.has_callback());
        item.run(&mut SoftwareDevice::new());
        assert_eq!(*seen.lock().unwrap(), "software");
    }
}
