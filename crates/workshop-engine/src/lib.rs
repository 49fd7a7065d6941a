//! Workshop engine crate.
//!
//! Rendering scaffolding for a single animated view: a render thread that
//! owns the graphics device, an offscreen frame buffer, named shader
//! programs and a container view driving the redraw loop.

pub mod buffers;
pub mod context;
pub mod coords;
pub mod device;
pub mod logging;
pub mod shaders;
pub mod time;
pub mod view;
pub mod window;
