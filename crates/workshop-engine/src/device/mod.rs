//! Graphics devices.
//!
//! A [`GraphicsDevice`] is the explicit handle every graphics call goes
//! through. Nothing in this crate relies on an implicit "current context":
//! work scheduled on a [`RenderContext`](crate::context::RenderContext)
//! receives the device as `&mut dyn GraphicsDevice`.
//!
//! Two implementations are provided:
//! - [`SoftwareDevice`]: CPU rasterizer, used headless and in tests
//! - [`WgpuDevice`]: wgpu-backed device presenting into a winit window

mod error;
mod gpu;
mod objects;
mod software;
mod surface;
mod validate;

use std::fmt;

use crate::coords::{BufferSize, Color};

pub use error::{GraphicsError, GraphicsResult, SurfaceErrorAction};
pub use gpu::{GpuInit, WgpuDevice};
pub use software::{CallCounter, FrontBuffer, SoftwareDevice};

macro_rules! object_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(u32);

        impl $name {
            /// Wraps a raw id. The id is only meaningful to the device that issued it.
            #[inline]
            pub const fn from_raw(raw: u32) -> Self {
                Self(raw)
            }

            #[inline]
            pub const fn raw(self) -> u32 {
                self.0
            }
        }
    };
}

object_id!(
    /// Framebuffer object issued by a device.
    FramebufferId
);
object_id!(
    /// Renderbuffer (color storage) issued by a device.
    RenderbufferId
);
object_id!(
    /// Linked shader program issued by a device.
    ProgramId
);

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Vertex => f.write_str("vertex"),
            Self::Fragment => f.write_str("fragment"),
        }
    }
}

/// Primitive assembly for [`GraphicsDevice::draw_arrays`].
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
pub enum Topology {
    #[default]
    Triangles,
    TriangleStrip,
}

/// Layout of the position attribute: `dimension` f32 components per vertex,
/// `stride` bytes between consecutive vertices (0 means tightly packed).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct VertexLayout {
    dimension: u32,
    stride: u32,
}

impl VertexLayout {
    pub fn new(dimension: u32, stride: u32) -> GraphicsResult<Self> {
        let invalid = GraphicsError::InvalidVertexLayout { dimension, stride };
        if !(1..=4).contains(&dimension) {
            return Err(invalid);
        }
        if stride != 0 && (stride % 4 != 0 || stride < dimension * 4) {
            return Err(invalid);
        }
        Ok(Self { dimension, stride })
    }

    #[inline]
    pub fn dimension(self) -> u32 {
        self.dimension
    }

    /// Effective stride in bytes.
    #[inline]
    pub fn stride_bytes(self) -> u32 {
        if self.stride == 0 { self.dimension * 4 } else { self.stride }
    }

    /// Number of complete vertices contained in `len` floats.
    pub fn vertex_count(self, len: usize) -> u32 {
        let dim = self.dimension as usize;
        if len < dim {
            return 0;
        }
        let step = (self.stride_bytes() / 4) as usize;
        ((len - dim) / step + 1) as u32
    }
}

/// The graphics operations the wrappers in this crate are built on.
///
/// Binding state (framebuffer, renderbuffer, program) is per device. Clears
/// and draws target the bound framebuffer; vertex data and color apply to the
/// program in use.
pub trait GraphicsDevice: Send {
    /// Short human-readable name (adapter name, "software", ...).
    fn label(&self) -> &str;

    /// Makes the device current for the calling (render) thread.
    ///
    /// Devices without a thread-affine context accept this as a no-op.
    fn make_current(&mut self) -> GraphicsResult<()> {
        Ok(())
    }

    /// Reconfigures the presentable surface after the backing view changed size.
    fn resize_surface(&mut self, size: BufferSize) {
        let _ = size;
    }

    fn create_framebuffer(&mut self) -> FramebufferId;
    fn create_renderbuffer(&mut self) -> RenderbufferId;

    /// (Re)allocates color storage for `renderbuffer`. Previous contents are discarded.
    fn renderbuffer_storage(
        &mut self,
        renderbuffer: RenderbufferId,
        size: BufferSize,
    ) -> GraphicsResult<()>;

    fn attach_renderbuffer(
        &mut self,
        framebuffer: FramebufferId,
        renderbuffer: RenderbufferId,
    ) -> GraphicsResult<()>;

    fn bind_framebuffer(&mut self, framebuffer: FramebufferId) -> GraphicsResult<()>;
    fn bind_renderbuffer(&mut self, renderbuffer: RenderbufferId) -> GraphicsResult<()>;
    fn bound_framebuffer(&self) -> Option<FramebufferId>;
    fn bound_renderbuffer(&self) -> Option<RenderbufferId>;

    /// Fills the bound framebuffer's color attachment with `color`.
    fn clear(&mut self, color: Color) -> GraphicsResult<()>;

    /// Compiles both stages and links them into a program.
    fn create_program(&mut self, vertex: &str, fragment: &str) -> GraphicsResult<ProgramId>;
    fn use_program(&mut self, program: ProgramId) -> GraphicsResult<()>;
    fn current_program(&self) -> Option<ProgramId>;

    fn set_vertex_positions(&mut self, data: &[f32], layout: VertexLayout) -> GraphicsResult<()>;
    fn set_uniform_color(&mut self, color: Color) -> GraphicsResult<()>;
    fn draw_arrays(&mut self, topology: Topology, first: u32, count: u32) -> GraphicsResult<()>;

    /// Presents the contents of `renderbuffer` to the display.
    fn present_renderbuffer(&mut self, renderbuffer: RenderbufferId) -> GraphicsResult<()>;

    fn delete_framebuffer(&mut self, framebuffer: FramebufferId);
    fn delete_renderbuffer(&mut self, renderbuffer: RenderbufferId);
    fn delete_program(&mut self, program: ProgramId);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertex_layout_rejects_bad_dimension() {
        assert!(VertexLayout::new(0, 0).is_err());
        assert!(VertexLayout::new(5, 0).is_err());
    }

    #[test]
    fn vertex_layout_rejects_short_or_unaligned_stride() {
        assert!(VertexLayout::new(3, 8).is_err());
        assert!(VertexLayout::new(2, 10).is_err());
        assert!(VertexLayout::new(2, 12).is_ok());
    }

    #[test]
    fn vertex_count_packed_and_strided() {
        let packed = VertexLayout::new(2, 0).unwrap();
        assert_eq!(packed.stride_bytes(), 8);
        assert_eq!(packed.vertex_count(6), 3);
        assert_eq!(packed.vertex_count(7), 3);
        assert_eq!(packed.vertex_count(1), 0);

        // xy + rgb interleaved
        let strided = VertexLayout::new(2, 20).unwrap();
        assert_eq!(strided.vertex_count(15), 3);
        assert_eq!(strided.vertex_count(12), 3);
        assert_eq!(strided.vertex_count(11), 2);
    }
}
