use std::collections::HashMap;

use super::{FramebufferId, GraphicsError, GraphicsResult, ProgramId, RenderbufferId, VertexLayout};

/// Id-keyed table of live device objects.
///
/// Ids start at 1 and are never reused, so a stale id cannot alias a newer object.
pub(super) struct Objects<T> {
    next: u32,
    live: HashMap<u32, T>,
}

impl<T> Default for Objects<T> {
    fn default() -> Self {
        Self {
            next: 1,
            live: HashMap::new(),
        }
    }
}

impl<T> Objects<T> {
    pub(super) fn insert(&mut self, value: T) -> u32 {
        let id = self.next;
        self.next += 1;
        self.live.insert(id, value);
        id
    }

    pub(super) fn get(&self, id: u32) -> Option<&T> {
        self.live.get(&id)
    }

    pub(super) fn get_mut(&mut self, id: u32) -> Option<&mut T> {
        self.live.get_mut(&id)
    }

    pub(super) fn remove(&mut self, id: u32) -> Option<T> {
        self.live.remove(&id)
    }

    pub(super) fn contains(&self, id: u32) -> bool {
        self.live.contains_key(&id)
    }

    pub(super) fn values_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.live.values_mut()
    }
}

/// Framebuffer object state shared by both devices: at most one color attachment.
#[derive(Debug, Default)]
pub(super) struct FramebufferObject {
    pub(super) color: Option<RenderbufferId>,
}

/// Per-device binding points.
#[derive(Debug, Default)]
pub(super) struct Bindings {
    pub(super) framebuffer: Option<FramebufferId>,
    pub(super) renderbuffer: Option<RenderbufferId>,
    pub(super) program: Option<ProgramId>,
}

impl Bindings {
    pub(super) fn program(&self) -> GraphicsResult<ProgramId> {
        self.program.ok_or(GraphicsError::NoProgramInUse)
    }
}

/// Client-side copy of the position attribute.
#[derive(Debug, Clone)]
pub(super) struct VertexData {
    pub(super) data: Vec<f32>,
    pub(super) layout: VertexLayout,
}

impl VertexData {
    pub(super) fn vertex_count(&self) -> u32 {
        self.layout.vertex_count(self.data.len())
    }

    /// Checks that `first..first + count` lies within the supplied vertices.
    pub(super) fn check_range(&self, first: u32, count: u32) -> GraphicsResult<()> {
        let available = self.vertex_count();
        match first.checked_add(count) {
            Some(end) if end <= available => Ok(()),
            _ => Err(GraphicsError::VertexRangeOutOfBounds {
                first,
                count,
                available,
            }),
        }
    }

    /// Position of vertex `index`, expanded to `(x, y, z, w)` with GL defaults.
    pub(super) fn position(&self, index: u32) -> [f32; 4] {
        let step = (self.layout.stride_bytes() / 4) as usize;
        let base = index as usize * step;
        let mut out = [0.0, 0.0, 0.0, 1.0];
        for (i, slot) in out.iter_mut().take(self.layout.dimension() as usize).enumerate() {
            *slot = self.data[base + i];
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_not_reused() {
        let mut objects = Objects::default();
        let a = objects.insert("a");
        objects.remove(a);
        let b = objects.insert("b");
        assert_ne!(a, b);
        assert!(!objects.contains(a));
        assert_eq!(objects.get(b), Some(&"b"));
    }

    #[test]
    fn positions_fill_missing_components() {
        let v = VertexData {
            data: vec![0.5, -0.5, 9.0, 1.0, 1.0, 9.0],
            layout: VertexLayout::new(2, 12).unwrap(),
        };
        assert_eq!(v.vertex_count(), 2);
        assert_eq!(v.position(1), [1.0, 1.0, 0.0, 1.0]);
        assert!(v.check_range(0, 2).is_ok());
        assert_eq!(
            v.check_range(1, 2),
            Err(GraphicsError::VertexRangeOutOfBounds { first: 1, count: 2, available: 2 })
        );
    }
}
