use std::collections::HashMap;
use std::num::NonZeroU64;
use std::sync::Arc;

use anyhow::{Context, Result};
use wgpu::util::DeviceExt;
use winit::window::Window;

use crate::coords::{BufferSize, Color};

use super::objects::{Bindings, FramebufferObject, Objects, VertexData};
use super::validate::{self, LinkedProgram};
use super::{
    surface, FramebufferId, GraphicsDevice, GraphicsError, GraphicsResult, ProgramId,
    RenderbufferId, ShaderStage, SurfaceErrorAction, Topology, VertexLayout,
};

/// Initialization parameters for [`WgpuDevice`].
#[derive(Debug, Clone)]
pub struct GpuInit {
    /// Prefer an sRGB surface format when available.
    pub prefer_srgb: bool,

    /// Present mode (swap behavior). FIFO is supported everywhere.
    pub present_mode: wgpu::PresentMode,

    pub power_preference: wgpu::PowerPreference,

    /// Hint only; support depends on platform/backend.
    pub desired_maximum_frame_latency: u32,
}

impl Default for GpuInit {
    fn default() -> Self {
        Self {
            prefer_srgb: true,
            present_mode: wgpu::PresentMode::Fifo,
            power_preference: wgpu::PowerPreference::LowPower,
            desired_maximum_frame_latency: 2,
        }
    }
}

/// [`GraphicsDevice`] backed by wgpu and presenting into a winit window.
///
/// Renderbuffers are textures in the surface format. Clears and draws are
/// recorded as one render pass each and submitted immediately. Presenting
/// copies the renderbuffer into the acquired surface texture.
pub struct WgpuDevice {
    surface: wgpu::Surface<'static>,
    device: wgpu::Device,
    queue: wgpu::Queue,
    config: wgpu::SurfaceConfiguration,
    label: String,

    framebuffers: Objects<FramebufferObject>,
    renderbuffers: Objects<GpuRenderbuffer>,
    programs: Objects<GpuProgram>,
    bindings: Bindings,
    vertices: Option<VertexData>,
}

struct GpuRenderbuffer {
    size: BufferSize,
    storage: Option<(wgpu::Texture, wgpu::TextureView)>,
}

struct GpuProgram {
    linked: LinkedProgram,
    vertex: wgpu::ShaderModule,
    fragment: wgpu::ShaderModule,
    layout: wgpu::PipelineLayout,
    color_ubo: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
    pipelines: HashMap<(VertexLayout, Topology), wgpu::RenderPipeline>,
}

const COLOR_UBO_SIZE: u64 = std::mem::size_of::<[f32; 4]>() as u64;

impl WgpuDevice {
    /// Creates a device whose surface is bound to `window`, configured at
    /// `size` (the window's inner size, read on the event-loop thread).
    ///
    /// The device never calls back into `window`: it runs on the render
    /// thread, and window methods may block on the event-loop thread.
    /// Adapter/device acquisition is asynchronous under wgpu.
    pub async fn new(window: Arc<Window>, size: BufferSize, init: GpuInit) -> Result<Self> {
        anyhow::ensure!(!size.is_empty(), "window has zero size");

        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let surface = instance
            .create_surface(window)
            .context("failed to create wgpu surface")?;

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: init.power_preference,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .context("failed to find a suitable GPU adapter")?;

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("workshop device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
                experimental_features: wgpu::ExperimentalFeatures::disabled(),
                memory_hints: wgpu::MemoryHints::Performance,
                trace: wgpu::Trace::Off,
            })
            .await
            .context("failed to create wgpu device/queue")?;

        let caps = surface.get_capabilities(&adapter);
        let format = surface::choose_surface_format(&caps, init.prefer_srgb)
            .context("no supported surface formats")?;
        anyhow::ensure!(
            caps.usages.contains(wgpu::TextureUsages::COPY_DST),
            "surface does not accept copies; renderbuffers cannot be presented"
        );

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_DST,
            format,
            width: size.width,
            height: size.height,
            present_mode: init.present_mode,
            alpha_mode: surface::choose_alpha_mode(&caps),
            view_formats: vec![],
            desired_maximum_frame_latency: init.desired_maximum_frame_latency,
        };
        surface.configure(&device, &config);

        let label = adapter.get_info().name;
        log::info!("wgpu device ready: {label} ({format:?}, {}x{})", size.width, size.height);

        Ok(Self {
            surface,
            device,
            queue,
            config,
            label,
            framebuffers: Objects::default(),
            renderbuffers: Objects::default(),
            programs: Objects::default(),
            bindings: Bindings::default(),
            vertices: None,
        })
    }

    pub fn surface_format(&self) -> wgpu::TextureFormat {
        self.config.format
    }

    fn bound_view(&self) -> GraphicsResult<&wgpu::TextureView> {
        let fb_id = self.bindings.framebuffer.ok_or(GraphicsError::NoFramebufferBound)?;
        let fb = self
            .framebuffers
            .get(fb_id.raw())
            .ok_or(GraphicsError::InvalidFramebuffer(fb_id))?;
        let rb_id = fb.color.ok_or(GraphicsError::IncompleteFramebuffer(fb_id))?;
        self.renderbuffers
            .get(rb_id.raw())
            .and_then(|rb| rb.storage.as_ref())
            .map(|(_, view)| view)
            .ok_or(GraphicsError::IncompleteFramebuffer(fb_id))
    }

    fn ensure_pipeline(&mut self, id: ProgramId, key: (VertexLayout, Topology)) -> GraphicsResult<()> {
        let program = self
            .programs
            .get_mut(id.raw())
            .ok_or(GraphicsError::InvalidProgram(id))?;
        if program.pipelines.contains_key(&key) {
            return Ok(());
        }

        let (layout, topology) = key;
        let attributes = [wgpu::VertexAttribute {
            format: vertex_format(layout),
            offset: 0,
            shader_location: 0,
        }];

        let pipeline = self.device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("workshop program pipeline"),
            layout: Some(&program.layout),

            vertex: wgpu::VertexState {
                module: &program.vertex,
                entry_point: Some(program.linked.vertex_entry.as_str()),
                compilation_options: Default::default(),
                buffers: &[wgpu::VertexBufferLayout {
                    array_stride: layout.stride_bytes() as u64,
                    step_mode: wgpu::VertexStepMode::Vertex,
                    attributes: &attributes,
                }],
            },

            fragment: Some(wgpu::FragmentState {
                module: &program.fragment,
                entry_point: Some(program.linked.fragment_entry.as_str()),
                compilation_options: Default::default(),
                targets: &[Some(wgpu::ColorTargetState {
                    format: self.config.format,
                    blend: Some(wgpu::BlendState::ALPHA_BLENDING),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
            }),

            primitive: wgpu::PrimitiveState {
                topology: match topology {
                    Topology::Triangles => wgpu::PrimitiveTopology::TriangleList,
                    Topology::TriangleStrip => wgpu::PrimitiveTopology::TriangleStrip,
                },
                strip_index_format: None,
                front_face: wgpu::FrontFace::Ccw,
                cull_mode: None,
                polygon_mode: wgpu::PolygonMode::Fill,
                unclipped_depth: false,
                conservative: false,
            },

            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview_mask: None,
            cache: None,
        });

        program.pipelines.insert(key, pipeline);
        Ok(())
    }

    fn submit(&self, encoder: wgpu::CommandEncoder) {
        self.queue.submit(std::iter::once(encoder.finish()));
    }
}

fn vertex_format(layout: VertexLayout) -> wgpu::VertexFormat {
    match layout.dimension() {
        1 => wgpu::VertexFormat::Float32,
        2 => wgpu::VertexFormat::Float32x2,
        3 => wgpu::VertexFormat::Float32x3,
        _ => wgpu::VertexFormat::Float32x4,
    }
}

impl GraphicsDevice for WgpuDevice {
    fn label(&self) -> &str {
        &self.label
    }

    fn resize_surface(&mut self, size: BufferSize) {
        surface::apply_resize(&self.surface, &self.device, &mut self.config, size);
    }

    fn create_framebuffer(&mut self) -> FramebufferId {
        FramebufferId::from_raw(self.framebuffers.insert(FramebufferObject::default()))
    }

    fn create_renderbuffer(&mut self) -> RenderbufferId {
        RenderbufferId::from_raw(self.renderbuffers.insert(GpuRenderbuffer {
            size: BufferSize::default(),
            storage: None,
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

        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("workshop renderbuffer"),
            size: wgpu::Extent3d {
                width: size.width,
                height: size.height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: self.config.format,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        rb.size = size;
        rb.storage = Some((texture, view));
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
        let view = self.bound_view()?;
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("workshop clear encoder"),
            });

        {
            let _rpass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("workshop clear"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(color.to_wgpu()),
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
                multiview_mask: None,
            });
        }

        self.submit(encoder);
        Ok(())
    }

    fn create_program(&mut self, vertex: &str, fragment: &str) -> GraphicsResult<ProgramId> {
        let vs = validate::compile(ShaderStage::Vertex, vertex)?;
        let fs = validate::compile(ShaderStage::Fragment, fragment)?;
        let linked = validate::link(&vs, &fs)?;

        let vertex = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("workshop vertex shader"),
            source: wgpu::ShaderSource::Wgsl(vertex.into()),
        });
        let fragment = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("workshop fragment shader"),
            source: wgpu::ShaderSource::Wgsl(fragment.into()),
        });

        let bind_group_layout = self
            .device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("workshop color bgl"),
                entries: &[wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: NonZeroU64::new(COLOR_UBO_SIZE),
                    },
                    count: None,
                }],
            });

        let layout = self
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("workshop program layout"),
                bind_group_layouts: &[&bind_group_layout],
                immediate_size: 0,
            });

        let color_ubo = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("workshop color ubo"),
                contents: bytemuck::bytes_of(&Color::white().to_array()),
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            });

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("workshop color bind group"),
            layout: &bind_group_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: color_ubo.as_entire_binding(),
            }],
        });

        let id = self.programs.insert(GpuProgram {
            linked,
            vertex,
            fragment,
            layout,
            color_ubo,
            bind_group,
            pipelines: HashMap::new(),
        });
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
            .get(id.raw())
            .ok_or(GraphicsError::InvalidProgram(id))?;
        self.queue
            .write_buffer(&program.color_ubo, 0, bytemuck::bytes_of(&color.to_array()));
        Ok(())
    }

    fn draw_arrays(&mut self, topology: Topology, first: u32, count: u32) -> GraphicsResult<()> {
        let id = self.bindings.program()?;
        let layout = {
            let vertices = self.vertices.as_ref().ok_or(GraphicsError::NoVertexData)?;
            vertices.check_range(first, count)?;
            vertices.layout
        };
        if count == 0 {
            return Ok(());
        }

        self.ensure_pipeline(id, (layout, topology))?;

        let view = self.bound_view()?;
        let program = self
            .programs
            .get(id.raw())
            .ok_or(GraphicsError::InvalidProgram(id))?;
        let Some(pipeline) = program.pipelines.get(&(layout, topology)) else {
            return Err(GraphicsError::InvalidProgram(id));
        };
        let Some(vertices) = self.vertices.as_ref() else {
            return Err(GraphicsError::NoVertexData);
        };

        let vbo = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("workshop positions vbo"),
                contents: bytemuck::cast_slice(&vertices.data),
                usage: wgpu::BufferUsages::VERTEX,
            });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("workshop draw encoder"),
            });

        {
            let mut rpass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("workshop draw"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
                multiview_mask: None,
            });

            rpass.set_pipeline(pipeline);
            rpass.set_bind_group(0, &program.bind_group, &[]);
            rpass.set_vertex_buffer(0, vbo.slice(..));
            rpass.draw(first..first + count, 0..1);
        }

        self.submit(encoder);
        Ok(())
    }

    fn present_renderbuffer(&mut self, renderbuffer: RenderbufferId) -> GraphicsResult<()> {
        let rb = self
            .renderbuffers
            .get(renderbuffer.raw())
            .ok_or(GraphicsError::InvalidRenderbuffer(renderbuffer))?;
        let Some((texture, _)) = rb.storage.as_ref() else {
            return Err(GraphicsError::InvalidRenderbuffer(renderbuffer));
        };

        let frame = match self.surface.get_current_texture() {
            Ok(frame) => frame,
            Err(err) => {
                return match surface::map_surface_error(&self.surface, &self.device, &self.config, &err) {
                    SurfaceErrorAction::Fatal => Err(GraphicsError::Surface(err.to_string())),
                    action => {
                        log::debug!("frame dropped ({action:?}): {err}");
                        Ok(())
                    }
                };
            }
        };

        let surface_size = BufferSize::new(frame.texture.width(), frame.texture.height());
        let extent = rb.size.min(surface_size);

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("workshop present encoder"),
            });
        encoder.copy_texture_to_texture(
            texture.as_image_copy(),
            frame.texture.as_image_copy(),
            wgpu::Extent3d {
                width: extent.width,
                height: extent.height,
                depth_or_array_layers: 1,
            },
        );
        self.submit(encoder);

        frame.present();
        Ok(())
    }

    fn delete_framebuffer(&mut self, framebuffer: FramebufferId) {
        self.framebuffers.remove(framebuffer.raw());
        if self.bindings.framebuffer == Some(framebuffer) {
            self.bindings.framebuffer = None;
        }
    }

    fn delete_renderbuffer(&mut self, renderbuffer: RenderbufferId) {
        if let Some(GpuRenderbuffer { storage: Some((texture, _)), .. }) =
            self.renderbuffers.remove(renderbuffer.raw())
        {
            texture.destroy();
        }
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
