//! Small value types shared by the device layer, the buffer wrappers and views.
//!
//! Canonical conventions:
//! - sizes are physical pixels
//! - colors are linear, straight-alpha RGBA

mod color;
mod size;

pub use color::Color;
pub use size::BufferSize;
