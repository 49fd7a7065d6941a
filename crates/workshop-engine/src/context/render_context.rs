use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle, ThreadId};

use anyhow::{Context, Result};

use crate::device::{GraphicsDevice, GraphicsError, GraphicsResult, RenderbufferId};

use super::WorkItem;

enum Job {
    Run(WorkItem),
    Shutdown,
}

/// Handle to a graphics device running on its own render thread.
///
/// Cloning is cheap; all clones feed the same queue. Work runs in submission
/// order, one item at a time, and always to completion. The render thread is
/// shut down once the last handle is dropped and the queue has drained.
#[derive(Clone)]
pub struct RenderContext {
    inner: Arc<Inner>,
}

struct Inner {
    jobs: mpsc::Sender<Job>,
    thread: Option<JoinHandle<()>>,
    render_thread: ThreadId,
    label: String,
}

impl RenderContext {
    /// Moves `device` onto a new render thread.
    pub fn new<D>(device: D) -> Result<Self>
    where
        D: GraphicsDevice + 'static,
    {
        Self::from_boxed(Box::new(device))
    }

    pub fn from_boxed(device: Box<dyn GraphicsDevice>) -> Result<Self> {
        let label = device.label().to_string();
        let (jobs, queue) = mpsc::channel();

        let thread = thread::Builder::new()
            .name("workshop-render".to_string())
            .spawn(move || render_loop(device, queue))
            .context("failed to spawn render thread")?;

        log::debug!("render context created ({label})");

        Ok(Self {
            inner: Arc::new(Inner {
                jobs,
                render_thread: thread.thread().id(),
                thread: Some(thread),
                label,
            }),
        })
    }

    /// Label of the device this context drives.
    pub fn label(&self) -> &str {
        &self.inner.label
    }

    /// True when called from this context's render thread.
    pub fn is_render_thread(&self) -> bool {
        thread::current().id() == self.inner.render_thread
    }

    /// Makes the device current on the render thread and waits until it is.
    pub fn set_as_current(&self) -> GraphicsResult<()> {
        self.perform_sync(|device| device.make_current())?
    }

    /// Queues `work`. Returns as soon as the work is queued.
    ///
    /// From the render thread itself, the work runs after the current item.
    pub fn perform<F>(&self, work: F) -> GraphicsResult<()>
    where
        F: FnOnce(&mut dyn GraphicsDevice) + Send + 'static,
    {
        self.submit(WorkItem::new(work))
    }

    /// Queues `work` followed by `callback`. The callback runs on the render
    /// thread and never before `work` has returned.
    pub fn perform_with_callback<F, C>(&self, work: F, callback: C) -> GraphicsResult<()>
    where
        F: FnOnce(&mut dyn GraphicsDevice) + Send + 'static,
        C: FnOnce() + Send + 'static,
    {
        self.submit(WorkItem::with_callback(work, callback))
    }

    pub fn submit(&self, item: WorkItem) -> GraphicsResult<()> {
        self.inner
            .jobs
            .send(Job::Run(item))
            .map_err(|_| GraphicsError::ContextLost)
    }

    /// Queues `work` and blocks until it has produced its value.
    ///
    /// Must not be called from the render thread. A panic in `work` is
    /// returned as [`GraphicsError::WorkPanicked`]; the context keeps running.
    pub fn perform_sync<F, R>(&self, work: F) -> GraphicsResult<R>
    where
        F: FnOnce(&mut dyn GraphicsDevice) -> R + Send + 'static,
        R: Send + 'static,
    {
        if self.is_render_thread() {
            return Err(GraphicsError::Reentrant);
        }
        let (tx, rx) = mpsc::sync_channel(1);
        self.perform(move |device| {
            let result = panic::catch_unwind(AssertUnwindSafe(|| work(device))).map_err(|payload| {
                let message = panic_message(payload.as_ref()).to_string();
                log::error!("render work panicked: {message}");
                GraphicsError::WorkPanicked(message)
            });
            let _ = tx.send(result);
        })?;
        rx.recv().map_err(|_| GraphicsError::ContextLost)?
    }

    /// Presents `renderbuffer` and waits for the result.
    pub fn present_render_buffer(&self, renderbuffer: RenderbufferId) -> GraphicsResult<()> {
        self.perform_sync(move |device| device.present_renderbuffer(renderbuffer))?
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let _ = self.jobs.send(Job::Shutdown);
        let Some(handle) = self.thread.take() else { return };

        // The last handle can be released by work running on the render thread.
        if thread::current().id() == self.render_thread {
            return;
        }
        if handle.join().is_err() {
            log::error!("render thread ({}) terminated abnormally", self.label);
        }
    }
}

fn render_loop(mut device: Box<dyn GraphicsDevice>, queue: mpsc::Receiver<Job>) {
    log::debug!("render thread started ({})", device.label());

    while let Ok(job) = queue.recv() {
        let item = match job {
            Job::Run(item) => item,
            Job::Shutdown => break,
        };

        let (action, on_complete) = item.into_parts();
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| action(device.as_mut()))) {
            log::error!("render work panicked: {}", panic_message(payload.as_ref()));
            continue;
        }
        if let Some(cb) = on_complete {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(cb)) {
                log::error!("render callback panicked: {}", panic_message(payload.as_ref()));
            }
        }
    }

    log::debug!("render thread stopped ({})", device.label());
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        *s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use super::*;
    use crate::coords::BufferSize;
    use crate::device::SoftwareDevice;

    fn context() -> RenderContext {
        RenderContext::new(SoftwareDevice::new()).unwrap()
    }

    #[test]
    fn callback_sees_work_side_effects() {
        let ctx = context();
        let counter = Arc::new(AtomicUsize::new(0));
        let observed = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = mpsc::channel();

        let (c1, c2, o) = (Arc::clone(&counter), Arc::clone(&counter), Arc::clone(&observed));
        ctx.perform_with_callback(
            move |_| {
                c1.fetch_add(1, Ordering::SeqCst);
            },
            move || {
                o.store(c2.load(Ordering::SeqCst), Ordering::SeqCst);
                tx.send(()).unwrap();
            },
        )
        .unwrap();

        rx.recv().unwrap();
        assert!(observed.load(Ordering::SeqCst) >= 1);
    }

    #[test]
    fn work_runs_in_submission_order() {
        let ctx = context();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..16 {
            let order = Arc::clone(&order);
            ctx.perform(move |_| order.lock().unwrap().push(i)).unwrap();
        }
        ctx.perform_sync(|_| ()).unwrap();
        assert_eq!(*order.lock().unwrap(), (0..16).collect::<Vec<_>>());
    }

    #[test]
    fn perform_sync_returns_value() {
        let ctx = context();
        let label = ctx.perform_sync(|device| device.label().to_string()).unwrap();
        assert_eq!(label, "software");
        assert_eq!(ctx.label(), "software");
    }

    #[test]
    fn set_as_current_reaches_device() {
        let device = SoftwareDevice::new();
        let calls = device.make_current_counter();
        let ctx = RenderContext::new(device).unwrap();
        assert_eq!(calls.get(), 0);

        ctx.set_as_current().unwrap();
        assert_eq!(calls.get(), 1);
        assert!(!ctx.is_render_thread());
    }

    #[test]
    fn perform_sync_from_render_thread_is_rejected() {
        let ctx = context();
        let inner = ctx.clone();
        let result = ctx
            .perform_sync(move |_| inner.perform_sync(|_| ()).map(|_| ()))
            .unwrap();
        assert_eq!(result, Err(GraphicsError::Reentrant));
    }

    #[test]
    fn perform_from_render_thread_is_queued() {
        let ctx = context();
        let (tx, rx) = mpsc::channel();
        let inner = ctx.clone();
        ctx.perform(move |_| {
            inner
                .perform(move |_| tx.send("nested").unwrap())
                .unwrap();
        })
        .unwrap();
        assert_eq!(rx.recv().unwrap(), "nested");
    }

    #[test]
    fn present_unknown_renderbuffer_is_an_error() {
        let ctx = context();
        let bogus = RenderbufferId::from_raw(7);
        assert_eq!(
            ctx.present_render_buffer(bogus),
            Err(GraphicsError::InvalidRenderbuffer(bogus))
        );
    }

    #[test]
    fn present_valid_renderbuffer_succeeds() {
        let ctx = context();
        let rb = ctx
            .perform_sync(|device| {
                let rb = device.create_renderbuffer();
                device.renderbuffer_storage(rb, BufferSize::new(4, 4)).map(|_| rb)
            })
            .unwrap()
            .unwrap();
        assert_eq!(ctx.present_render_buffer(rb), Ok(()));
    }

    #[test]
    fn panicking_work_does_not_stop_the_thread() {
        let ctx = context();
        let called = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&called);
        ctx.perform_with_callback(|_| panic!("boom"), move || {
            c.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        assert_eq!(ctx.perform_sync(|_| 5).unwrap(), 5);
        assert_eq!(called.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn panicking_sync_work_is_reported_and_context_survives() {
        let ctx = context();
        let result = ctx.perform_sync(|_| -> u32 { panic!("bad draw state") });
        assert_eq!(result, Err(GraphicsError::WorkPanicked("bad draw state".to_string())));
        assert_eq!(ctx.perform_sync(|_| 1).unwrap(), 1);
    }

    #[test]
    fn dropping_last_handle_drains_queue() {
        let ctx = context();
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..8 {
            let counter = Arc::clone(&counter);
            ctx.perform(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }
        drop(ctx);
        assert_eq!(counter.load(Ordering::SeqCst), 8);
    }
}
