//! Render thread scheduling.
//!
//! A [`RenderContext`] owns one graphics device on a dedicated thread and
//! runs [`WorkItem`]s against it in submission order.

mod render_context;
mod work_item;

pub use render_context::RenderContext;
pub use work_item::{Callback, Work, WorkItem};
