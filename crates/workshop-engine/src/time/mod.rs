//! Frame timing for the redraw loop.

mod frame_clock;

pub use frame_clock::{FrameClock, FrameTime};
