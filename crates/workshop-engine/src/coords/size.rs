use winit::dpi::PhysicalSize;

/// Width/height of a render target in physical pixels.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
pub struct BufferSize {
    pub width: u32,
    pub height: u32,
}

impl BufferSize {
    #[inline]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// True when either dimension is zero. Such a size cannot back a renderbuffer.
    #[inline]
    pub const fn is_empty(self) -> bool {
        self.width == 0 || self.height == 0
    }

    #[inline]
    pub const fn pixel_count(self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Component-wise minimum; used when copying between targets of different sizes.
    #[inline]
    pub fn min(self, other: Self) -> Self {
        Self::new(self.width.min(other.width), self.height.min(other.height))
    }
}

impl From<PhysicalSize<u32>> for BufferSize {
    fn from(s: PhysicalSize<u32>) -> Self {
        Self::new(s.width, s.height)
    }
}

impl From<(u32, u32)> for BufferSize {
    fn from((width, height): (u32, u32)) -> Self {
        Self::new(width, height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_empty_on_zero_dimension() {
        assert!(BufferSize::new(0, 10).is_empty());
        assert!(BufferSize::new(10, 0).is_empty());
        assert!(!BufferSize::new(1, 1).is_empty());
    }

    #[test]
    fn min_is_component_wise() {
        let a = BufferSize::new(100, 20);
        let b = BufferSize::new(50, 200);
        assert_eq!(a.min(b), BufferSize::new(50, 20));
    }

    #[test]
    fn converts_from_physical_size() {
        let s: BufferSize = PhysicalSize::new(640u32, 480u32).into();
        assert_eq!(s, BufferSize::new(640, 480));
        assert_eq!(s.pixel_count(), 640 * 480);
    }
}
