use crate::context::RenderContext;
use crate::coords::{BufferSize, Color};
use crate::device::{FramebufferId, GraphicsError, GraphicsResult, RenderbufferId};
use crate::view::Drawable;

/// Which of the pair was bound last.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ActiveTarget {
    FrameBuffer,
    RenderBuffer,
}

/// A framebuffer/renderbuffer pair sized to a view.
///
/// GPU objects are created on the first [`load_buffers_with_view`] and
/// released when the `FrameBuffer` is dropped. Every operation is executed
/// on the render thread of the owning [`RenderContext`] and waited for.
///
/// [`load_buffers_with_view`]: FrameBuffer::load_buffers_with_view
pub struct FrameBuffer {
    context: RenderContext,
    objects: Option<(FramebufferId, RenderbufferId)>,
    buffer_size: BufferSize,
    background_clear_color: Color,
    active: Option<ActiveTarget>,
}

impl FrameBuffer {
    /// Associates a new frame buffer with `context`. No GPU objects are created yet.
    pub fn new(context: RenderContext) -> Self {
        Self {
            context,
            objects: None,
            buffer_size: BufferSize::default(),
            background_clear_color: Color::black(),
            active: None,
        }
    }

    pub fn context(&self) -> &RenderContext {
        &self.context
    }

    /// Size of the allocated buffers; zero until loaded.
    pub fn buffer_size(&self) -> BufferSize {
        self.buffer_size
    }

    pub fn background_clear_color(&self) -> Color {
        self.background_clear_color
    }

    pub fn set_background_clear_color(&mut self, color: Color) {
        self.background_clear_color = color.clamped();
    }

    pub fn is_loaded(&self) -> bool {
        self.objects.is_some()
    }

    pub fn active_target(&self) -> Option<ActiveTarget> {
        self.active
    }

    pub fn framebuffer_id(&self) -> Option<FramebufferId> {
        self.objects.map(|(fb, _)| fb)
    }

    pub fn renderbuffer_id(&self) -> Option<RenderbufferId> {
        self.objects.map(|(_, rb)| rb)
    }

    /// True when the buffers are missing or no longer match `view`.
    pub fn needs_reload(&self, view: &dyn Drawable) -> bool {
        !self.is_loaded() || self.buffer_size != view.drawable_size()
    }

    /// Allocates or resizes both buffers to `view`'s drawable size.
    ///
    /// Must be called again whenever the view changes size.
    pub fn load_buffers_with_view(&mut self, view: &dyn Drawable) -> GraphicsResult<()> {
        let size = view.drawable_size();
        if size.is_empty() {
            return Err(GraphicsError::ZeroSize);
        }

        let existing = self.objects;
        let objects = self.context.perform_sync(move |device| {
            let (fb, rb) = existing.unwrap_or_else(|| {
                (device.create_framebuffer(), device.create_renderbuffer())
            });
            let allocated = device
                .renderbuffer_storage(rb, size)
                .and_then(|_| device.attach_renderbuffer(fb, rb));
            if allocated.is_err() && existing.is_none() {
                device.delete_framebuffer(fb);
                device.delete_renderbuffer(rb);
            }
            allocated.map(|_| (fb, rb))
        })??;

        log::debug!(
            "frame buffer {:?} loaded at {}x{}",
            objects.0,
            size.width,
            size.height
        );
        self.objects = Some(objects);
        self.buffer_size = size;
        Ok(())
    }

    pub fn bind_frame_buffer(&mut self) -> GraphicsResult<()> {
        let (fb, _) = self.ids()?;
        self.context.perform_sync(move |device| device.bind_framebuffer(fb))??;
        self.active = Some(ActiveTarget::FrameBuffer);
        Ok(())
    }

    pub fn bind_render_buffer(&mut self) -> GraphicsResult<()> {
        let (_, rb) = self.ids()?;
        self.context.perform_sync(move |device| device.bind_renderbuffer(rb))??;
        self.active = Some(ActiveTarget::RenderBuffer);
        Ok(())
    }

    /// Clears this frame buffer to the background clear color. Leaves it bound.
    pub fn clear(&mut self) -> GraphicsResult<()> {
        let (fb, _) = self.ids()?;
        let color = self.background_clear_color;
        self.context.perform_sync(move |device| {
            device.bind_framebuffer(fb)?;
            device.clear(color)
        })??;
        self.active = Some(ActiveTarget::FrameBuffer);
        Ok(())
    }

    /// Presents the renderbuffer through the owning context.
    pub fn present(&self) -> GraphicsResult<()> {
        let (_, rb) = self.ids()?;
        self.context.present_render_buffer(rb)
    }

    fn ids(&self) -> GraphicsResult<(FramebufferId, RenderbufferId)> {
        self.objects.ok_or(GraphicsError::BuffersNotLoaded)
    }
}

impl Drop for FrameBuffer {
    fn drop(&mut self) {
        let Some((fb, rb)) = self.objects.take() else { return };
        let released = self.context.perform(move |device| {
            device.delete_framebuffer(fb);
            device.delete_renderbuffer(rb);
        });
        if released.is_err() {
            log::debug!("frame buffer {fb:?} outlived its render context");
        }
    }
}
