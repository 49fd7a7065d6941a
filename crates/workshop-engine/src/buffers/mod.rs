mod frame_buffer;

pub use frame_buffer::{ActiveTarget, FrameBuffer};
