use std::sync::Mutex;

use crate::coords::BufferSize;

/// Something that can back a render target: reports its drawable size in
/// physical pixels.
///
/// Called from the display-link thread while the view's graphics stack is
/// locked, so implementations must not wait on other threads.
pub trait Drawable: Send + Sync {
    fn drawable_size(&self) -> BufferSize;
}

/// Drawable whose size is pushed by its owner.
///
/// Windows report their size through this on the event-loop thread; headless
/// views set it directly.
#[derive(Debug)]
pub struct ViewSize {
    size: Mutex<BufferSize>,
}

impl ViewSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            size: Mutex::new(BufferSize::new(width, height)),
        }
    }

    pub fn set_size(&self, width: u32, height: u32) {
        self.set(BufferSize::new(width, height));
    }

    pub fn set(&self, size: BufferSize) {
        *self.size.lock().unwrap_or_else(|e| e.into_inner()) = size;
    }
}

impl From<BufferSize> for ViewSize {
    fn from(size: BufferSize) -> Self {
        Self::new(size.width, size.height)
    }
}

impl Drawable for ViewSize {
    fn drawable_size(&self) -> BufferSize {
        *self.size.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn size_set_on_another_thread_is_visible() {
        let view = Arc::new(ViewSize::new(4, 4));
        let writer = Arc::clone(&view);
        thread::spawn(move || writer.set(BufferSize::new(800, 600)))
            .join()
            .unwrap();
        assert_eq!(view.drawable_size(), BufferSize::new(800, 600));
    }
}
