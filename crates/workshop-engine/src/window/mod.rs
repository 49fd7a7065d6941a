//! Window + runtime loop.
//!
//! Owns the `winit` EventLoop and Window and hosts a [`ContainerView`]
//! rendering into it.
//!
//! [`ContainerView`]: crate::view::ContainerView

mod runtime;

pub use runtime::{Runtime, RuntimeConfig};
