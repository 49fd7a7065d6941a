//! Views hosting a graphics stack.

mod container;
mod drawable;

pub use container::{ContainerView, DeviceFactory, Frame, Scene, ViewConfig};
pub use drawable::{Drawable, ViewSize};
