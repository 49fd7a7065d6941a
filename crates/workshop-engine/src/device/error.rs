use std::fmt;

use super::{FramebufferId, ProgramId, RenderbufferId, ShaderStage};

/// High-level response after a surface error.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum SurfaceErrorAction {
    /// Surface was reconfigured; rendering may resume next frame.
    Reconfigured,
    /// Transient error; skip the current frame.
    SkipFrame,
    /// Fatal error (commonly OOM); terminate gracefully.
    Fatal,
}

/// Errors reported by graphics devices and the wrappers built on them.
#[derive(Debug, Clone, PartialEq)]
pub enum GraphicsError {
    InvalidFramebuffer(FramebufferId),
    InvalidRenderbuffer(RenderbufferId),
    InvalidProgram(ProgramId),
    /// A clear or draw was issued with no framebuffer bound.
    NoFramebufferBound,
    /// The bound framebuffer has no renderbuffer attached, or it has no storage.
    IncompleteFramebuffer(FramebufferId),
    /// Draw-call state was applied with no program in use.
    NoProgramInUse,
    /// A draw was issued before vertex data was supplied.
    NoVertexData,
    InvalidVertexLayout {
        dimension: u32,
        stride: u32,
    },
    /// Requested vertices lie outside the supplied vertex data.
    VertexRangeOutOfBounds {
        first: u32,
        count: u32,
        available: u32,
    },
    ZeroSize,
    ShaderCompile {
        stage: ShaderStage,
        log: String,
    },
    ProgramLink(String),
    ShaderNotLoaded,
    BuffersNotLoaded,
    Surface(String),
    /// The render thread is gone; no further work can run.
    ContextLost,
    /// Work panicked on the render thread. The thread keeps running.
    WorkPanicked(String),
    /// A blocking call was made from the render thread itself.
    Reentrant,
}

impl fmt::Display for GraphicsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidFramebuffer(id) => write!(f, "invalid framebuffer {id:?}"),
            Self::InvalidRenderbuffer(id) => write!(f, "invalid renderbuffer {id:?}"),
            Self::InvalidProgram(id) => write!(f, "invalid program {id:?}"),
            Self::NoFramebufferBound => f.write_str("no framebuffer bound"),
            Self::IncompleteFramebuffer(id) => write!(f, "framebuffer {id:?} is incomplete"),
            Self::NoProgramInUse => f.write_str("no program in use"),
            Self::NoVertexData => f.write_str("no vertex data bound"),
            Self::InvalidVertexLayout { dimension, stride } => {
                write!(f, "invalid vertex layout (dimension {dimension}, stride {stride})")
            }
            Self::VertexRangeOutOfBounds { first, count, available } => write!(
                f,
                "vertices {first}..{} out of bounds ({available} available)",
                first.saturating_add(*count)
            ),
            Self::ZeroSize => f.write_str("render target size must be non-zero"),
            Self::ShaderCompile { stage, log } => write!(f, "{stage} shader failed to compile: {log}"),
            Self::ProgramLink(log) => write!(f, "program failed to link: {log}"),
            Self::ShaderNotLoaded => f.write_str("shader has no loaded program"),
            Self::BuffersNotLoaded => f.write_str("frame buffers have not been loaded"),
            Self::Surface(msg) => write!(f, "surface error: {msg}"),
            Self::ContextLost => f.write_str("render context is no longer running"),
            Self::WorkPanicked(msg) => write!(f, "render work panicked: {msg}"),
            Self::Reentrant => f.write_str("blocking render call issued from the render thread"),
        }
    }
}

impl std::error::Error for GraphicsError {}

pub type GraphicsResult<T> = Result<T, GraphicsError>;
