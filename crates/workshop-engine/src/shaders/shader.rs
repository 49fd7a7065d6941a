use std::sync::Arc;

use crate::context::RenderContext;
use crate::coords::Color;
use crate::device::{
    GraphicsDevice, GraphicsError, GraphicsResult, ProgramId, Topology, VertexLayout,
};

use super::ShaderLibrary;

/// A linked vertex + fragment program owned by one [`RenderContext`].
///
/// A shader starts unloaded. [`load_shader_source_named`] compiles and links
/// it; a failed load leaves it unloaded and it must not be used. Draw-call
/// state (`set_*`, [`draw_arrays`]) applies only while this shader is the
/// program in use.
///
/// [`load_shader_source_named`]: Shader::load_shader_source_named
/// [`draw_arrays`]: Shader::draw_arrays
pub struct Shader {
    context: RenderContext,
    library: Arc<ShaderLibrary>,
    program: Option<ProgramId>,
    name: Option<String>,
}

impl Shader {
    /// Shader resolving names through the builtin library.
    pub fn new(context: RenderContext) -> Self {
        Self::with_library(context, Arc::new(ShaderLibrary::new()))
    }

    pub fn with_library(context: RenderContext, library: Arc<ShaderLibrary>) -> Self {
        Self {
            context,
            library,
            program: None,
            name: None,
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.program.is_some()
    }

    /// Name of the loaded source, if any.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn program_id(&self) -> Option<ProgramId> {
        self.program
    }

    /// Loads, compiles and links the source pair named `name`.
    ///
    /// Returns false if the source cannot be resolved or fails to compile or
    /// link; the reason is logged. Any previously loaded program is released
    /// either way.
    pub fn load_shader_source_named(&mut self, name: &str) -> bool {
        self.release();

        let source = match self.library.resolve(name) {
            Ok(source) => source,
            Err(e) => {
                log::warn!("shader `{name}` not loaded: {e:#}");
                return false;
            }
        };

        let created = self
            .context
            .perform_sync(move |device| device.create_program(&source.vertex, &source.fragment));

        match created {
            Ok(Ok(program)) => {
                log::debug!("shader `{name}` loaded as {program:?}");
                self.program = Some(program);
                self.name = Some(name.to_string());
                true
            }
            Ok(Err(e)) | Err(e) => {
                log::warn!("shader `{name}` not loaded: {e}");
                false
            }
        }
    }

    /// Makes this program current. Idempotent.
    pub fn use_program(&self) -> GraphicsResult<()> {
        let program = self.program.ok_or(GraphicsError::ShaderNotLoaded)?;
        self.context
            .perform_sync(move |device| device.use_program(program))?
    }

    /// Binds vertex positions: `dimension` floats per vertex, `stride` bytes
    /// between vertices (0 for tightly packed).
    pub fn set_vertex_positions_pointer(
        &self,
        positions: &[f32],
        dimension: u32,
        stride: u32,
    ) -> GraphicsResult<()> {
        let layout = VertexLayout::new(dimension, stride)?;
        let data = positions.to_vec();
        self.with_program(move |device| device.set_vertex_positions(&data, layout))
    }

    /// Sets the color uniform. Channels are clamped to `0..=1` like the
    /// frame buffer's clear color.
    pub fn set_color(&self, color: Color) -> GraphicsResult<()> {
        let color = color.clamped();
        self.with_program(move |device| device.set_uniform_color(color))
    }

    /// Draws `count` vertices starting at `first` into the bound framebuffer.
    pub fn draw_arrays(&self, topology: Topology, first: u32, count: u32) -> GraphicsResult<()> {
        self.with_program(move |device| device.draw_arrays(topology, first, count))
    }

    /// Runs `f` on the render thread if this shader is the program in use.
    fn with_program<F>(&self, f: F) -> GraphicsResult<()>
    where
        F: FnOnce(&mut dyn GraphicsDevice) -> GraphicsResult<()> + Send + 'static,
    {
        let program = self.program.ok_or(GraphicsError::ShaderNotLoaded)?;
        self.context.perform_sync(move |device| {
            if device.current_program() != Some(program) {
                return Err(GraphicsError::NoProgramInUse);
            }
            f(device)
        })?
    }

    fn release(&mut self) {
        self.name = None;
        let Some(program) = self.program.take() else { return };
        if self.context.perform(move |device| device.delete_program(program)).is_err() {
            log::debug!("program {program:?} outlived its render context");
        }
    }
}

impl Drop for Shader {
    fn drop(&mut self) {
        self.release();
    }
}
