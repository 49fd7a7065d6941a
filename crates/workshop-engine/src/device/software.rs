use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::coords::{BufferSize, Color};

use super::objects::{Bindings, FramebufferObject, Objects, VertexData};
use super::validate;
use super::{
    FramebufferId, GraphicsDevice, GraphicsError, GraphicsResult, ProgramId, RenderbufferId,
    ShaderStage, Topology, VertexLayout,
};

/// CPU implementation of [`GraphicsDevice`].
///
/// Renderbuffers are RGBA `f32` pixel arrays with the origin at the top-left.
/// Shader sources are compiled and linked like on the GPU, but draws do not
/// execute shader code: positions are taken as clip-space coordinates and
/// covered pixels are filled with the program's color uniform.
///
/// Presented frames are copied into a [`FrontBuffer`], which can be read from
/// any thread.
pub struct SoftwareDevice {
    framebuffers: Objects<FramebufferObject>,
    renderbuffers: Objects<SoftRenderbuffer>,
    programs: Objects<SoftProgram>,
    bindings: Bindings,
    vertices: Option<VertexData>,
    front: FrontBuffer,
    make_current_calls: CallCounter,
}

struct SoftRenderbuffer {
    size: BufferSize,
    pixels: Vec<Color>,
}

struct SoftProgram {
    color: Color,
}

impl SoftwareDevice {
    pub fn new() -> Self {
        Self::with_front_buffer(FrontBuffer::default())
    }

    /// Device presenting into an existing front buffer.
    pub fn with_front_buffer(front: FrontBuffer) -> Self {
        Self {
            framebuffers: Objects::default(),
            renderbuffers: Objects::default(),
            programs: Objects::default(),
            bindings: Bindings::default(),
            vertices: None,
            front,
            make_current_calls: CallCounter::default(),
        }
    }

    /// Shared handle to the presented image.
    pub fn front_buffer(&self) -> FrontBuffer {
        self.front.clone()
    }

    /// Shared count of [`GraphicsDevice::make_current`] calls, readable after
    /// the device has moved to a render thread.
    pub fn make_current_counter(&self) -> CallCounter {
        self.make_current_calls.clone()
    }

    /// Reads one pixel of a renderbuffer.
    pub fn renderbuffer_pixel(&self, renderbuffer: RenderbufferId, x: u32, y: u32) -> Option<Color> {
        let rb = self.renderbuffers.get(renderbuffer.raw())?;
        pixel_at(rb.size, &rb.pixels, x, y)
    }

    fn bound_target(&mut self) -> GraphicsResult<&mut SoftRenderbuffer> {
        let fb_id = self.bindings.framebuffer.ok_or(GraphicsError::NoFramebufferBound)?;
        let fb = self
            .framebuffers
            .get(fb_id.raw())
            .ok_or(GraphicsError::InvalidFramebuffer(fb_id))?;
        let rb_id = fb.color.ok_or(GraphicsError::IncompleteFramebuffer(fb_id))?;
        match self.renderbuffers.get_mut(rb_id.raw()) {
            Some(rb) if !rb.size.is_empty() => Ok(rb),
            _ => Err(GraphicsError::IncompleteFramebuffer(fb_id)),
        }
    }
}

impl Default for SoftwareDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphicsDevice for SoftwareDevice {
    fn label(&self) -> &str {
        "software"
    }

    fn make_current(&mut self) -> GraphicsResult<()> {
        self.make_current_calls.increment();
        Ok(())
    }

    fn create_framebuffer(&mut self) -> FramebufferId {
        FramebufferId::from_raw(self.framebuffers.insert(FramebufferObject::default()))
    }

    fn create_renderbuffer(&mut self) -> RenderbufferId {
        RenderbufferId::from_raw(self.renderbuffers.insert(SoftRenderbuffer {
            size: BufferSize::default(),
            pixels: Vec::new(),
        }))
    }

    fn renderbuffer_storage(
        &mut self,
        renderbuffer: RenderbufferId,
        size: BufferSize,
    ) -> GraphicsResult<()> {
        if size.is_empty() {
            return Err(GraphicsError::ZeroSize);
        }
        let rb = self
            .renderbuffers
            .get_mut(renderbuffer.raw())
            .ok_or(GraphicsError::InvalidRenderbuffer(renderbuffer))?;
        rb.size = size;
        rb.pixels = vec![Color::transparent(); size.pixel_count()];
        Ok(())
    }

    fn attach_renderbuffer(
        &mut self,
        framebuffer: FramebufferId,
        renderbuffer: RenderbufferId,
    ) -> GraphicsResult<()> {
        if !self.renderbuffers.contains(renderbuffer.raw()) {
            return Err(GraphicsError::InvalidRenderbuffer(renderbuffer));
        }
        let fb = self
            .framebuffers
            .get_mut(framebuffer.raw())
            .ok_or(GraphicsError::InvalidFramebuffer(framebuffer))?;
        fb.color = Some(renderbuffer);
        Ok(())
    }

    fn bind_framebuffer(&mut self, framebuffer: FramebufferId) -> GraphicsResult<()> {
        if !self.framebuffers.contains(framebuffer.raw()) {
            return Err(GraphicsError::InvalidFramebuffer(framebuffer));
        }
        self.bindings.framebuffer = Some(framebuffer);
        Ok(())
    }

    fn bind_renderbuffer(&mut self, renderbuffer: RenderbufferId) -> GraphicsResult<()> {
        if !self.renderbuffers.contains(renderbuffer.raw()) {
            return Err(GraphicsError::InvalidRenderbuffer(renderbuffer));
        }
        self.bindings.renderbuffer = Some(renderbuffer);
        Ok(())
    }

    fn bound_framebuffer(&self) -> Option<FramebufferId> {
        self.bindings.framebuffer
    }

    fn bound_renderbuffer(&self) -> Option<RenderbufferId> {
        self.bindings.renderbuffer
    }

    fn clear(&mut self, color: Color) -> GraphicsResult<()> {
        let target = self.bound_target()?;
        target.pixels.fill(color);
        Ok(())
    }

    fn create_program(&mut self, vertex: &str, fragment: &str) -> GraphicsResult<ProgramId> {
        let vs = validate::compile(ShaderStage::Vertex, vertex)?;
        let fs = validate::compile(ShaderStage::Fragment, fragment)?;
        let linked = validate::link(&vs, &fs)?;
        let id = self.programs.insert(SoftProgram {
            color: Color::white(),
        });
        log::debug!(
            "software: linked program {id} ({} / {})",
            linked.vertex_entry,
            linked.fragment_entry
        );
        Ok(ProgramId::from_raw(id))
    }

    fn use_program(&mut self, program: ProgramId) -> GraphicsResult<()> {
        if !self.programs.contains(program.raw()) {
            return Err(GraphicsError::InvalidProgram(program));
        }
        self.bindings.program = Some(program);
        Ok(())
    }

    fn current_program(&self) -> Option<ProgramId> {
        self.bindings.program
    }

    fn set_vertex_positions(&mut self, data: &[f32], layout: VertexLayout) -> GraphicsResult<()> {
        self.bindings.program()?;
        self.vertices = Some(VertexData {
            data: data.to_vec(),
            layout,
        });
        Ok(())
    }

    fn set_uniform_color(&mut self, color: Color) -> GraphicsResult<()> {
        let id = self.bindings.program()?;
        let program = self
            .programs
            .get_mut(id.raw())
            .ok_or(GraphicsError::InvalidProgram(id))?;
        program.color = color;
        Ok(())
    }

    fn draw_arrays(&mut self, topology: Topology, first: u32, count: u32) -> GraphicsResult<()> {
        let id = self.bindings.program()?;
        let color = self
            .programs
            .get(id.raw())
            .ok_or(GraphicsError::InvalidProgram(id))?
            .color;
        let vertices = self.vertices.clone().ok_or(GraphicsError::NoVertexData)?;
        vertices.check_range(first, count)?;

        let target = self.bound_target()?;
        let size = target.size;
        let to_pixels = |i: u32| clip_to_pixels(vertices.position(i), size);

        match topology {
            Topology::Triangles => {
                for t in 0..count / 3 {
                    let base = first + t * 3;
                    let tri = [to_pixels(base), to_pixels(base + 1), to_pixels(base + 2)];
                    fill_triangle(target, tri, color);
                }
            }
            Topology::TriangleStrip => {
                for t in 0..count.saturating_sub(2) {
                    let base = first + t;
                    let tri = [to_pixels(base), to_pixels(base + 1), to_pixels(base + 2)];
                    fill_triangle(target, tri, color);
                }
            }
        }
        Ok(())
    }

    fn present_renderbuffer(&mut self, renderbuffer: RenderbufferId) -> GraphicsResult<()> {
        let rb = self
            .renderbuffers
            .get(renderbuffer.raw())
            .ok_or(GraphicsError::InvalidRenderbuffer(renderbuffer))?;
        if rb.size.is_empty() {
            return Err(GraphicsError::InvalidRenderbuffer(renderbuffer));
        }
        let mut front = self.front.lock();
        front.size = rb.size;
        front.pixels.clone_from(&rb.pixels);
        front.frames += 1;
        Ok(())
    }

    fn delete_framebuffer(&mut self, framebuffer: FramebufferId) {
        self.framebuffers.remove(framebuffer.raw());
        if self.bindings.framebuffer == Some(framebuffer) {
            self.bindings.framebuffer = None;
        }
    }

    fn delete_renderbuffer(&mut self, renderbuffer: RenderbufferId) {
        self.renderbuffers.remove(renderbuffer.raw());
        for fb in self.framebuffers.values_mut() {
            if fb.color == Some(renderbuffer) {
                fb.color = None;
            }
        }
        if self.bindings.renderbuffer == Some(renderbuffer) {
            self.bindings.renderbuffer = None;
        }
    }

    fn delete_program(&mut self, program: ProgramId) {
        self.programs.remove(program.raw());
        if self.bindings.program == Some(program) {
            self.bindings.program = None;
        }
    }
}

/// Counter shared between a [`SoftwareDevice`] and its observers.
#[derive(Debug, Clone, Default)]
pub struct CallCounter(Arc<AtomicU64>);

impl CallCounter {
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }

    fn increment(&self) {
        self.0.fetch_add(1, Ordering::AcqRel);
    }
}

/// Last image presented by a [`SoftwareDevice`].
#[derive(Clone, Default)]
pub struct FrontBuffer {
    inner: Arc<Mutex<FrontImage>>,
}

#[derive(Default)]
struct FrontImage {
    size: BufferSize,
    pixels: Vec<Color>,
    frames: u64,
}

impl FrontBuffer {
    fn lock(&self) -> MutexGuard<'_, FrontImage> {
        // A poisoned lock only means a reader panicked; the image is still valid.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn frames_presented(&self) -> u64 {
        self.lock().frames
    }

    pub fn size(&self) -> BufferSize {
        self.lock().size
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<Color> {
        let image = self.lock();
        pixel_at(image.size, &image.pixels, x, y)
    }
}

fn pixel_at(size: BufferSize, pixels: &[Color], x: u32, y: u32) -> Option<Color> {
    if x >= size.width || y >= size.height {
        return None;
    }
    pixels.get(y as usize * size.width as usize + x as usize).copied()
}

/// Clip space (`-1..1`, +Y up) to pixel space (top-left origin, +Y down).
fn clip_to_pixels(p: [f32; 4], size: BufferSize) -> [f32; 2] {
    let w = if p[3] != 0.0 { p[3] } else { 1.0 };
    let (x, y) = (p[0] / w, p[1] / w);
    [
        (x * 0.5 + 0.5) * size.width as f32,
        (0.5 - y * 0.5) * size.height as f32,
    ]
}

fn edge(a: [f32; 2], b: [f32; 2], p: [f32; 2]) -> f32 {
    (b[0] - a[0]) * (p[1] - a[1]) - (b[1] - a[1]) * (p[0] - a[0])
}

/// Fills pixels whose centers lie inside the triangle. Both windings are drawn.
fn fill_triangle(target: &mut SoftRenderbuffer, [a, b, c]: [[f32; 2]; 3], color: Color) {
    let area = edge(a, b, c);
    if area == 0.0 || !area.is_finite() {
        return;
    }

    let (w, h) = (target.size.width as f32, target.size.height as f32);
    let min_x = a[0].min(b[0]).min(c[0]).floor().clamp(0.0, w) as u32;
    let max_x = a[0].max(b[0]).max(c[0]).ceil().clamp(0.0, w) as u32;
    let min_y = a[1].min(b[1]).min(c[1]).floor().clamp(0.0, h) as u32;
    let max_y = a[1].max(b[1]).max(c[1]).ceil().clamp(0.0, h) as u32;

    let width = target.size.width as usize;
    for y in min_y..max_y {
        for x in min_x..max_x {
            let p = [x as f32 + 0.5, y as f32 + 0.5];
            let (w0, w1, w2) = (edge(b, c, p), edge(c, a, p), edge(a, b, p));
            let inside = if area > 0.0 {
                w0 >= 0.0 && w1 >= 0.0 && w2 >= 0.0
            } else {
                w0 <= 0.0 && w1 <= 0.0 && w2 <= 0.0
            };
            if inside {
                target.pixels[y as usize * width + x as usize] = color;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::validate::tests::{FRAGMENT, VERTEX};

    const RED: Color = Color::new(1.0, 0.0, 0.0, 1.0);
    const BLUE: Color = Color::new(0.0, 0.0, 1.0, 1.0);

    fn target(device: &mut SoftwareDevice, size: BufferSize) -> (FramebufferId, RenderbufferId) {
        let fb = device.create_framebuffer();
        let rb = device.create_renderbuffer();
        device.renderbuffer_storage(rb, size).unwrap();
        device.attach_renderbuffer(fb, rb).unwrap();
        device.bind_framebuffer(fb).unwrap();
        (fb, rb)
    }

    #[test]
    fn clear_without_bound_framebuffer_fails() {
        let mut device = SoftwareDevice::new();
        assert_eq!(device.clear(RED), Err(GraphicsError::NoFramebufferBound));
    }

    #[test]
    fn clear_on_framebuffer_without_storage_is_incomplete() {
        let mut device = SoftwareDevice::new();
        let fb = device.create_framebuffer();
        device.bind_framebuffer(fb).unwrap();
        assert_eq!(device.clear(RED), Err(GraphicsError::IncompleteFramebuffer(fb)));
    }

    #[test]
    fn clear_fills_every_pixel() {
        let mut device = SoftwareDevice::new();
        let (_, rb) = target(&mut device, BufferSize::new(4, 3));
        device.clear(BLUE).unwrap();
        for (x, y) in [(0, 0), (3, 2), (1, 1)] {
            assert_eq!(device.renderbuffer_pixel(rb, x, y), Some(BLUE));
        }
        assert_eq!(device.renderbuffer_pixel(rb, 4, 0), None);
    }

    #[test]
    fn zero_sized_storage_is_rejected() {
        let mut device = SoftwareDevice::new();
        let rb = device.create_renderbuffer();
        assert_eq!(
            device.renderbuffer_storage(rb, BufferSize::new(0, 5)),
            Err(GraphicsError::ZeroSize)
        );
    }

    #[test]
    fn state_requires_program_in_use() {
        let mut device = SoftwareDevice::new();
        let layout = VertexLayout::new(2, 0).unwrap();
        assert_eq!(
            device.set_vertex_positions(&[0.0, 0.0], layout),
            Err(GraphicsError::NoProgramInUse)
        );
        assert_eq!(device.set_uniform_color(RED), Err(GraphicsError::NoProgramInUse));
    }

    #[test]
    fn draws_triangle_with_uniform_color() {
        let mut device = SoftwareDevice::new();
        let (_, rb) = target(&mut device, BufferSize::new(10, 10));
        device.clear(BLUE).unwrap();

        let program = device.create_program(VERTEX, FRAGMENT).unwrap();
        device.use_program(program).unwrap();
        device.set_uniform_color(RED).unwrap();
        // Lower-left half of clip space.
        let positions = [-1.0, -1.0, 1.0, -1.0, -1.0, 1.0];
        device
            .set_vertex_positions(&positions, VertexLayout::new(2, 0).unwrap())
            .unwrap();
        device.draw_arrays(Topology::Triangles, 0, 3).unwrap();

        // Bottom-left pixel is inside, top-right is outside.
        assert_eq!(device.renderbuffer_pixel(rb, 0, 9), Some(RED));
        assert_eq!(device.renderbuffer_pixel(rb, 9, 0), Some(BLUE));
    }

    #[test]
    fn triangle_strip_covers_quad() {
        let mut device = SoftwareDevice::new();
        let (_, rb) = target(&mut device, BufferSize::new(8, 8));
        let program = device.create_program(VERTEX, FRAGMENT).unwrap();
        device.use_program(program).unwrap();
        device.set_uniform_color(RED).unwrap();
        let quad = [-1.0, -1.0, 1.0, -1.0, -1.0, 1.0, 1.0, 1.0];
        device
            .set_vertex_positions(&quad, VertexLayout::new(2, 0).unwrap())
            .unwrap();
        device.draw_arrays(Topology::TriangleStrip, 0, 4).unwrap();

        for (x, y) in [(0, 0), (7, 7), (0, 7), (7, 0)] {
            assert_eq!(device.renderbuffer_pixel(rb, x, y), Some(RED));
        }
    }

    #[test]
    fn draw_out_of_range_fails() {
        let mut device = SoftwareDevice::new();
        target(&mut device, BufferSize::new(2, 2));
        let program = device.create_program(VERTEX, FRAGMENT).unwrap();
        device.use_program(program).unwrap();
        device
            .set_vertex_positions(&[0.0; 6], VertexLayout::new(2, 0).unwrap())
            .unwrap();
        assert!(matches!(
            device.draw_arrays(Topology::Triangles, 1, 3),
            Err(GraphicsError::VertexRangeOutOfBounds { .. })
        ));
    }

    #[test]
    fn present_copies_into_front_buffer() {
        let mut device = SoftwareDevice::new();
        let front = device.front_buffer();
        let (_, rb) = target(&mut device, BufferSize::new(3, 2));
        device.clear(RED).unwrap();
        device.present_renderbuffer(rb).unwrap();

        assert_eq!(front.frames_presented(), 1);
        assert_eq!(front.size(), BufferSize::new(3, 2));
        assert_eq!(front.pixel(2, 1), Some(RED));
    }

    #[test]
    fn present_unknown_renderbuffer_fails() {
        let mut device = SoftwareDevice::new();
        let bogus = RenderbufferId::from_raw(42);
        assert_eq!(
            device.present_renderbuffer(bogus),
            Err(GraphicsError::InvalidRenderbuffer(bogus))
        );
        assert_eq!(device.front_buffer().frames_presented(), 0);
    }

    #[test]
    fn deleting_bound_objects_unbinds_them() {
        let mut device = SoftwareDevice::new();
        let (fb, rb) = target(&mut device, BufferSize::new(2, 2));
        device.bind_renderbuffer(rb).unwrap();
        let program = device.create_program(VERTEX, FRAGMENT).unwrap();
        device.use_program(program).unwrap();

        device.delete_renderbuffer(rb);
        device.delete_framebuffer(fb);
        device.delete_program(program);

        assert_eq!(device.bound_framebuffer(), None);
        assert_eq!(device.bound_renderbuffer(), None);
        assert_eq!(device.current_program(), None);
        assert_eq!(device.use_program(program), Err(GraphicsError::InvalidProgram(program)));
    }
}
