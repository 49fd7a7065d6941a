use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result};

use crate::buffers::FrameBuffer;
use crate::context::RenderContext;
use crate::coords::{BufferSize, Color};
use crate::device::{FrontBuffer, GraphicsDevice, GraphicsResult, SoftwareDevice};
use crate::shaders::{Shader, ShaderLibrary, BUILTIN_BASIC};
use crate::time::{FrameClock, FrameTime};

use super::Drawable;

/// Creates the device a view renders with. Called on first initialization.
pub type DeviceFactory = Box<dyn Fn() -> Result<Box<dyn GraphicsDevice>> + Send>;

/// View configuration.
#[derive(Debug, Clone)]
pub struct ViewConfig {
    /// Redraw rate of the animation loop.
    pub frames_per_second: u32,

    /// Background clear color of the view's frame buffer.
    pub clear_color: Color,

    /// Shader names loaded at initialization. Names that fail to load are
    /// logged and left out.
    pub shaders: Vec<String>,

    /// Directory for shader assets not found in memory.
    pub shader_root: Option<PathBuf>,
}

impl Default for ViewConfig {
    fn default() -> Self {
        Self {
            frames_per_second: 60,
            clear_color: Color::black(),
            shaders: vec![BUILTIN_BASIC.to_string()],
            shader_root: None,
        }
    }
}

/// Content drawn by a [`ContainerView`] each frame.
///
/// The frame buffer is bound and cleared before `draw` and presented after it.
pub trait Scene: Send {
    fn draw(&mut self, frame: &mut Frame<'_>) -> GraphicsResult<()>;
}

impl<F> Scene for F
where
    F: FnMut(&mut Frame<'_>) -> GraphicsResult<()> + Send,
{
    fn draw(&mut self, frame: &mut Frame<'_>) -> GraphicsResult<()> {
        self(frame)
    }
}

/// Per-frame access to the view's graphics stack.
pub struct Frame<'a> {
    pub time: FrameTime,
    framebuffer: &'a mut FrameBuffer,
    shaders: &'a HashMap<String, Shader>,
}

impl Frame<'_> {
    /// A shader that loaded successfully at initialization.
    pub fn shader(&self, name: &str) -> Option<&Shader> {
        self.shaders.get(name)
    }

    pub fn framebuffer(&mut self) -> &mut FrameBuffer {
        self.framebuffer
    }

    pub fn size(&self) -> BufferSize {
        self.framebuffer.buffer_size()
    }
}

/// A surface that owns a graphics stack and a redraw loop.
///
/// Lifecycle: uninitialized -> initialized -> animating <-> stopped. The
/// stack (context, frame buffer, shaders) is created once, on the first
/// [`initialize_graphics`](Self::initialize_graphics) or
/// [`start_animating`](Self::start_animating).
pub struct ContainerView {
    config: ViewConfig,
    drawable: Arc<dyn Drawable>,
    factory: DeviceFactory,
    scene: Option<Box<dyn Scene>>,
    stack: Option<Arc<Mutex<GraphicsStack>>>,
    animation: Option<Animation>,
    frames_drawn: Arc<AtomicU64>,
}

struct GraphicsStack {
    context: RenderContext,
    drawable: Arc<dyn Drawable>,
    framebuffer: FrameBuffer,
    shaders: HashMap<String, Shader>,
    scene: Option<Box<dyn Scene>>,
    clock: FrameClock,
}

struct Animation {
    stop: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

impl ContainerView {
    pub fn new<F>(drawable: Arc<dyn Drawable>, config: ViewConfig, factory: F) -> Self
    where
        F: Fn() -> Result<Box<dyn GraphicsDevice>> + Send + 'static,
    {
        Self {
            config,
            drawable,
            factory: Box::new(factory),
            scene: None,
            stack: None,
            animation: None,
            frames_drawn: Arc::new(AtomicU64::new(0)),
        }
    }

    /// View rendering with a [`SoftwareDevice`]; presented frames land in the
    /// returned [`FrontBuffer`].
    pub fn headless(drawable: Arc<dyn Drawable>, config: ViewConfig) -> (Self, FrontBuffer) {
        let front = FrontBuffer::default();
        let shared = front.clone();
        let view = Self::new(drawable, config, move || {
            Ok(Box::new(SoftwareDevice::with_front_buffer(shared.clone())) as Box<dyn GraphicsDevice>)
        });
        (view, front)
    }

    pub fn with_scene<S>(mut self, scene: S) -> Self
    where
        S: Scene + 'static,
    {
        self.set_scene(scene);
        self
    }

    pub fn set_scene<S>(&mut self, scene: S)
    where
        S: Scene + 'static,
    {
        self.set_boxed_scene(Box::new(scene));
    }

    /// Replaces the scene; takes effect on the next frame.
    pub fn set_boxed_scene(&mut self, scene: Box<dyn Scene>) {
        match &self.stack {
            Some(stack) => lock(stack).scene = Some(scene),
            None => self.scene = Some(scene),
        }
    }

    pub fn config(&self) -> &ViewConfig {
        &self.config
    }

    pub fn is_initialized(&self) -> bool {
        self.stack.is_some()
    }

    pub fn is_animating(&self) -> bool {
        self.animation.is_some()
    }

    /// Frames presented since the view was created.
    pub fn frames_drawn(&self) -> u64 {
        self.frames_drawn.load(Ordering::Acquire)
    }

    /// The view's render context, once initialized.
    pub fn context(&self) -> Option<RenderContext> {
        self.stack.as_ref().map(|s| lock(s).context.clone())
    }

    /// Creates the render context, frame buffer and shaders. Idempotent.
    pub fn initialize_graphics(&mut self) -> Result<()> {
        if self.stack.is_some() {
            return Ok(());
        }

        let device = (self.factory)().context("failed to create graphics device")?;
        let context = RenderContext::from_boxed(device)?;
        context
            .set_as_current()
            .context("failed to make render context current")?;

        let mut framebuffer = FrameBuffer::new(context.clone());
        framebuffer.set_background_clear_color(self.config.clear_color);
        if self.drawable.drawable_size().is_empty() {
            log::debug!("drawable has no area yet; deferring buffer allocation");
        } else {
            framebuffer
                .load_buffers_with_view(self.drawable.as_ref())
                .context("failed to allocate frame buffers")?;
        }

        let mut library = ShaderLibrary::new();
        if let Some(root) = &self.config.shader_root {
            library = library.with_root(root);
        }
        let library = Arc::new(library);

        let mut shaders = HashMap::new();
        for name in &self.config.shaders {
            let mut shader = Shader::with_library(context.clone(), Arc::clone(&library));
            if shader.load_shader_source_named(name) {
                shaders.insert(name.clone(), shader);
            }
        }

        log::info!(
            "graphics initialized on {} ({} of {} shaders loaded)",
            context.label(),
            shaders.len(),
            self.config.shaders.len()
        );

        self.stack = Some(Arc::new(Mutex::new(GraphicsStack {
            context,
            drawable: Arc::clone(&self.drawable),
            framebuffer,
            shaders,
            scene: self.scene.take(),
            clock: FrameClock::new(),
        })));
        Ok(())
    }

    /// Starts the redraw loop, initializing graphics first if needed.
    pub fn start_animating(&mut self) -> Result<()> {
        if self.animation.is_some() {
            return Ok(());
        }
        self.initialize_graphics()?;
        let Some(stack) = self.stack.as_ref().map(Arc::clone) else {
            anyhow::bail!("graphics stack missing after initialization");
        };

        let stop = Arc::new(AtomicBool::new(false));
        let frames = Arc::clone(&self.frames_drawn);
        let fps = self.config.frames_per_second;
        let thread = thread::Builder::new()
            .name("workshop-display-link".to_string())
            .spawn({
                let stop = Arc::clone(&stop);
                move || display_link(stack, fps, stop, frames)
            })
            .context("failed to spawn display link thread")?;

        log::debug!("animation started at {fps} fps");
        self.animation = Some(Animation { stop, thread });
        Ok(())
    }

    /// Stops the redraw loop and waits for it to exit. No-op when not animating.
    pub fn stop_animating(&mut self) {
        let Some(animation) = self.animation.take() else { return };
        animation.stop.store(true, Ordering::Release);
        animation.thread.thread().unpark();
        if animation.thread.join().is_err() {
            log::error!("display link thread panicked");
        }
        log::debug!("animation stopped");
    }

    /// Draws and presents one frame on the calling thread.
    ///
    /// Returns false when the drawable has no area.
    pub fn render_once(&mut self) -> Result<bool> {
        self.initialize_graphics()?;
        let Some(stack) = &self.stack else { return Ok(false) };
        let drawn = lock(stack).render_frame()?;
        if drawn {
            self.frames_drawn.fetch_add(1, Ordering::AcqRel);
        }
        Ok(drawn)
    }

    /// Brings the frame buffer and surface in line with the drawable's size.
    pub fn layout(&mut self) -> Result<()> {
        let Some(stack) = &self.stack else { return Ok(()) };
        lock(stack).sync_size()?;
        Ok(())
    }
}

impl Drop for ContainerView {
    fn drop(&mut self) {
        self.stop_animating();
    }
}

impl GraphicsStack {
    /// Returns false when nothing could be drawn (zero-sized drawable).
    fn sync_size(&mut self) -> GraphicsResult<bool> {
        let size = self.drawable.drawable_size();
        if size.is_empty() {
            return Ok(false);
        }
        if self.framebuffer.needs_reload(self.drawable.as_ref()) {
            self.context.perform(move |device| device.resize_surface(size))?;
            self.framebuffer.load_buffers_with_view(self.drawable.as_ref())?;
        }
        Ok(true)
    }

    fn render_frame(&mut self) -> GraphicsResult<bool> {
        if !self.sync_size()? {
            return Ok(false);
        }

        let time = self.clock.tick();
        self.framebuffer.bind_frame_buffer()?;
        self.framebuffer.clear()?;

        if let Some(scene) = self.scene.as_mut() {
            let mut frame = Frame {
                time,
                framebuffer: &mut self.framebuffer,
                shaders: &self.shaders,
            };
            scene.draw(&mut frame)?;
        }

        self.framebuffer.present()?;
        Ok(true)
    }
}

fn lock(stack: &Mutex<GraphicsStack>) -> MutexGuard<'_, GraphicsStack> {
    stack.lock().unwrap_or_else(|e| e.into_inner())
}

fn display_link(
    stack: Arc<Mutex<GraphicsStack>>,
    fps: u32,
    stop: Arc<AtomicBool>,
    frames: Arc<AtomicU64>,
) {
    let mut pacer = FrameClock::paced(fps);
    lock(&stack).clock.reset();

    while !stop.load(Ordering::Acquire) {
        pacer.tick();
        match lock(&stack).render_frame() {
            Ok(true) => {
                frames.fetch_add(1, Ordering::AcqRel);
            }
            Ok(false) => {}
            Err(e) => log::warn!("frame failed: {e}"),
        }

        loop {
            let wait = pacer.until_next_frame();
            if wait.is_zero() || stop.load(Ordering::Acquire) {
                break;
            }
            thread::park_timeout(wait);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::*;
    use crate::device::GraphicsError;
    use crate::view::ViewSize;

    const RED: Color = Color::new(1.0, 0.0, 0.0, 1.0);

    fn headless(width: u32, height: u32) -> (ContainerView, FrontBuffer, Arc<ViewSize>) {
        let drawable = Arc::new(ViewSize::new(width, height));
        let config = ViewConfig {
            frames_per_second: 120,
            clear_color: Color::new(0.0, 0.0, 1.0, 1.0),
            ..ViewConfig::default()
        };
        let (view, front) = ContainerView::headless(drawable.clone(), config);
        (view, front, drawable)
    }

    fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn stop_without_start_is_safe() {
        let (mut view, _, _) = headless(8, 8);
        view.stop_animating();
        view.stop_animating();
        assert!(!view.is_animating());
        assert!(!view.is_initialized());
    }

    #[test]
    fn initialize_is_idempotent() {
        let calls = Arc::new(AtomicU64::new(0));
        let counted = Arc::clone(&calls);
        let mut view = ContainerView::new(
            Arc::new(ViewSize::new(4, 4)),
            ViewConfig::default(),
            move || {
                counted.fetch_add(1, Ordering::SeqCst);
                Ok(Box::new(SoftwareDevice::new()) as Box<dyn GraphicsDevice>)
            },
        );

        view.initialize_graphics().unwrap();
        let context = view.context().map(|c| c.label().to_string());
        view.initialize_graphics().unwrap();
        view.initialize_graphics().unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(context.as_deref(), Some("software"));
    }

    #[test]
    fn failing_factory_leaves_view_uninitialized() {
        let mut view = ContainerView::new(
            Arc::new(ViewSize::new(4, 4)),
            ViewConfig::default(),
            || anyhow::bail!("no adapter"),
        );
        assert!(view.initialize_graphics().is_err());
        assert!(!view.is_initialized());
        assert!(view.start_animating().is_err());
        assert!(!view.is_animating());
    }

    #[test]
    fn render_once_clears_and_draws_scene() {
        let (view, front, _) = headless(10, 10);
        let mut view = view.with_scene(|frame: &mut Frame<'_>| {
            let Some(shader) = frame.shader(BUILTIN_BASIC) else {
                return Err(GraphicsError::ShaderNotLoaded);
            };
            shader.use_program()?;
            shader.set_color(RED)?;
            shader.set_vertex_positions_pointer(&[-1.0, -1.0, 1.0, -1.0, -1.0, 1.0], 2, 0)?;
            shader.draw_arrays(crate::device::Topology::Triangles, 0, 3)
        });

        assert!(view.render_once().unwrap());
        assert_eq!(view.frames_drawn(), 1);
        assert_eq!(front.frames_presented(), 1);
        assert_eq!(front.pixel(0, 9), Some(RED));
        assert_eq!(front.pixel(9, 0), Some(Color::new(0.0, 0.0, 1.0, 1.0)));
    }

    #[test]
    fn zero_sized_drawable_skips_frames() {
        let (mut view, front, drawable) = headless(0, 0);
        assert!(!view.render_once().unwrap());
        assert_eq!(front.frames_presented(), 0);

        drawable.set_size(3, 3);
        assert!(view.render_once().unwrap());
        assert_eq!(front.size(), BufferSize::new(3, 3));
    }

    #[test]
    fn frames_follow_drawable_resize() {
        let (mut view, front, drawable) = headless(4, 4);
        view.render_once().unwrap();
        drawable.set_size(6, 2);
        view.layout().unwrap();
        view.render_once().unwrap();
        assert_eq!(front.size(), BufferSize::new(6, 2));
    }

    #[test]
    fn resize_while_animating_reaches_presented_frames() {
        let (mut view, front, drawable) = headless(4, 4);
        view.start_animating().unwrap();
        assert!(wait_for(|| front.frames_presented() >= 1));

        // Size pushed from the owner's thread while the display link runs.
        drawable.set_size(7, 5);
        view.layout().unwrap();
        assert!(wait_for(|| front.size() == BufferSize::new(7, 5)));

        view.stop_animating();
        assert!(!view.is_animating());
    }

    #[test]
    fn animation_presents_frames_until_stopped() {
        let (mut view, front, _) = headless(4, 4);
        view.start_animating().unwrap();
        assert!(view.is_initialized());
        assert!(view.is_animating());
        view.start_animating().unwrap();

        assert!(wait_for(|| front.frames_presented() >= 3));

        view.stop_animating();
        assert!(!view.is_animating());
        let after_stop = front.frames_presented();
        thread::sleep(Duration::from_millis(50));
        assert_eq!(front.frames_presented(), after_stop);
        assert_eq!(view.frames_drawn(), after_stop);
    }

    #[test]
    fn animation_restarts_after_stop() {
        let (mut view, front, _) = headless(4, 4);
        view.start_animating().unwrap();
        assert!(wait_for(|| front.frames_presented() >= 1));
        view.stop_animating();

        let before = front.frames_presented();
        view.start_animating().unwrap();
        assert!(wait_for(|| front.frames_presented() > before));
        view.stop_animating();
    }

    #[test]
    fn unknown_shader_names_are_left_out() {
        let drawable = Arc::new(ViewSize::new(4, 4));
        let config = ViewConfig {
            shaders: vec![BUILTIN_BASIC.to_string(), "missing".to_string()],
            ..ViewConfig::default()
        };
        let (view, _) = ContainerView::headless(drawable, config);
        let mut view = view.with_scene(|frame: &mut Frame<'_>| {
            assert!(frame.shader(BUILTIN_BASIC).is_some());
            assert!(frame.shader("missing").is_none());
            Ok(())
        });
        assert!(view.render_once().unwrap());
    }
}
