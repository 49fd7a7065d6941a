use std::sync::Arc;

use anyhow::{Context, Result};
use winit::application::ApplicationHandler;
use winit::dpi::LogicalSize;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::{Window, WindowId};

use crate::coords::BufferSize;
use crate::device::{GpuInit, GraphicsDevice, WgpuDevice};
use crate::view::{ContainerView, Drawable, Scene, ViewConfig, ViewSize};

/// Window/runtime configuration.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub title: String,
    pub initial_size: LogicalSize<f64>,
    pub view: ViewConfig,
    pub gpu: GpuInit,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            title: "workshop".to_string(),
            initial_size: LogicalSize::new(1280.0, 720.0),
            view: ViewConfig::default(),
            gpu: GpuInit::default(),
        }
    }
}

/// Entry point for the runtime.
pub struct Runtime;

impl Runtime {
    /// Opens one window and animates `scene` in it until the window closes.
    pub fn run<S>(config: RuntimeConfig, scene: S) -> Result<()>
    where
        S: Scene + 'static,
    {
        let event_loop = EventLoop::new().context("failed to create winit EventLoop")?;
        event_loop.set_control_flow(ControlFlow::Wait);

        let mut state = AppState {
            config,
            scene: Some(Box::new(scene)),
            window: None,
            failed: None,
        };

        event_loop
            .run_app(&mut state)
            .context("winit event loop terminated with error")?;

        match state.failed {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

struct WindowEntry {
    window: Arc<Window>,
    /// Inner size, updated on this thread only. Graphics threads read it
    /// instead of querying the window.
    size: Arc<ViewSize>,
    view: ContainerView,
}

struct AppState {
    config: RuntimeConfig,
    scene: Option<Box<dyn Scene>>,
    window: Option<WindowEntry>,
    failed: Option<anyhow::Error>,
}

impl AppState {
    fn create_window_entry(&mut self, event_loop: &ActiveEventLoop) -> Result<WindowEntry> {
        let attrs = Window::default_attributes()
            .with_title(self.config.title.clone())
            .with_inner_size(self.config.initial_size);

        let window = Arc::new(
            event_loop
                .create_window(attrs)
                .context("failed to create window")?,
        );

        let size = Arc::new(ViewSize::from(BufferSize::from(window.inner_size())));

        let gpu = self.config.gpu.clone();
        let target = Arc::clone(&window);
        let initial = Arc::clone(&size);
        let mut view = ContainerView::new(size.clone(), self.config.view.clone(), move || {
            let device = pollster::block_on(WgpuDevice::new(
                Arc::clone(&target),
                initial.drawable_size(),
                gpu.clone(),
            ))?;
            Ok(Box::new(device) as Box<dyn GraphicsDevice>)
        });
        if let Some(scene) = self.scene.take() {
            view.set_boxed_scene(scene);
        }

        Ok(WindowEntry { window, size, view })
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, error: anyhow::Error) {
        log::error!("{error:#}");
        self.failed = Some(error);
        self.shutdown(event_loop);
    }

    fn shutdown(&mut self, event_loop: &ActiveEventLoop) {
        if let Some(mut entry) = self.window.take() {
            entry.view.stop_animating();
        }
        event_loop.exit();
    }
}

impl ApplicationHandler for AppState {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none() {
            match self.create_window_entry(event_loop) {
                Ok(entry) => self.window = Some(entry),
                Err(e) => return self.fail(event_loop, e),
            }
        }

        let Some(entry) = self.window.as_mut() else { return };
        if let Err(e) = entry.view.start_animating() {
            self.fail(event_loop, e.context("failed to start animating"));
        }
    }

    fn suspended(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(entry) = self.window.as_mut() {
            entry.view.stop_animating();
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent,
    ) {
        let Some(entry) = self.window.as_mut() else { return };
        if entry.window.id() != window_id {
            return;
        }

        match event {
            WindowEvent::CloseRequested | WindowEvent::Destroyed => self.shutdown(event_loop),

            WindowEvent::Resized(_) | WindowEvent::ScaleFactorChanged { .. } => {
                entry.size.set(entry.window.inner_size().into());
                if let Err(e) = entry.view.layout() {
                    log::warn!("layout after resize failed: {e:#}");
                }
            }

            _ => {}
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(mut entry) = self.window.take() {
            entry.view.stop_animating();
        }
    }
}

