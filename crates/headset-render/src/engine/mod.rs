//! Offscreen wgpu implementation of [`GpuDevice`].
//!
//! The device renders into a colour + depth target sized to the stereo layer.
//! Calls made during a frame are validated immediately and recorded; uniform
//! values are snapshotted into per-draw uniform buffers, so later `set_uniform`
//! calls never affect earlier draws. [`GpuDevice::end_frame`] encodes the
//! recording into a single render pass and submits it.

mod pipelines;
mod rendering;
mod textures;

use std::collections::HashMap;
use std::ops::Range;

use headset_core::{FramebufferId, ViewportRect};
use wgpu::util::DeviceExt;

use crate::device::{
    check_image_size, BufferId, GpuDevice, ProgramId, ProgramInterface, ShaderId, ShaderStage,
    TextureId, UniformLocation, UniformValue, VertexLayout,
};
use crate::error::{RenderError, RenderResult};
use crate::reflection::{self, CompiledStage};

pub use textures::{COLOR_FORMAT, DEPTH_FORMAT};

struct GpuVertexBuffer {
    layout: Option<VertexLayout>,
    buffer: Option<wgpu::Buffer>,
    floats: usize,
}

impl GpuVertexBuffer {
    fn vertex_count(&self) -> usize {
        self.layout
            .as_ref()
            .map_or(0, |layout| self.floats / layout.stride())
    }
}

struct GpuProgram {
    interface: ProgramInterface,
    vertex_module: wgpu::ShaderModule,
    vertex_entry: String,
    fragment_module: wgpu::ShaderModule,
    fragment_entry: String,
    group_layouts: Vec<wgpu::BindGroupLayout>,
    pipeline_layout: wgpu::PipelineLayout,
    values: HashMap<u32, UniformValue>,
}

/// One draw, with everything it needs captured at record time.
struct RecordedDraw {
    pipeline: wgpu::RenderPipeline,
    bind_groups: Vec<wgpu::BindGroup>,
    vertex_buffer: wgpu::Buffer,
    vertices: Range<u32>,
    viewport: ViewportRect,
}

#[derive(Default)]
struct FrameRecording {
    framebuffer: Option<FramebufferId>,
    clear: Option<[f32; 4]>,
    draws: Vec<RecordedDraw>,
}

/// wgpu-backed [`GpuDevice`] rendering to an offscreen target.
pub struct WgpuDevice {
    device: wgpu::Device,
    queue: wgpu::Queue,
    width: u32,
    height: u32,
    color_texture: wgpu::Texture,
    color_view: wgpu::TextureView,
    depth_view: wgpu::TextureView,
    sampler: wgpu::Sampler,
    fallback_view: wgpu::TextureView,

    next_id: u32,
    buffers: HashMap<BufferId, GpuVertexBuffer>,
    shaders: HashMap<ShaderId, CompiledStage>,
    programs: HashMap<ProgramId, GpuProgram>,
    textures: HashMap<TextureId, Option<wgpu::TextureView>>,
    pipelines: HashMap<(ProgramId, VertexLayout), wgpu::RenderPipeline>,

    current_program: Option<ProgramId>,
    texture_units: HashMap<u32, TextureId>,
    viewport: ViewportRect,
    frame: FrameRecording,
    frames: u64,
}

impl WgpuDevice {
    /// Creates a device without a window, rendering to a `width x height` target.
    pub async fn new_headless(width: u32, height: u32) -> RenderResult<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..wgpu::InstanceDescriptor::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .map_err(|_| RenderError::AdapterCreationFailed)?;

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("headset device (headless)"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
                memory_hints: wgpu::MemoryHints::default(),
                trace: wgpu::Trace::default(),
                experimental_features: wgpu::ExperimentalFeatures::default(),
            })
            .await?;

        Ok(Self::from_parts(device, queue, width, height))
    }

    /// Wraps an existing device and queue.
    pub fn from_parts(device: wgpu::Device, queue: wgpu::Queue, width: u32, height: u32) -> Self {
        let width = width.max(1);
        let height = height.max(1);
        let (color_texture, color_view) = textures::create_color_target(&device, width, height);
        let depth_view = textures::create_depth_target(&device, width, height);
        let sampler = textures::create_sampler(&device);
        let fallback_view = textures::create_fallback_texture(&device, &queue);
        log::info!("wgpu device ready, layer target {width}x{height}");

        Self {
            device,
            queue,
            width,
            height,
            color_texture,
            color_view,
            depth_view,
            sampler,
            fallback_view,
            next_id: 0,
            buffers: HashMap::new(),
            shaders: HashMap::new(),
            programs: HashMap::new(),
            textures: HashMap::new(),
            pipelines: HashMap::new(),
            current_program: None,
            texture_units: HashMap::new(),
            viewport: ViewportRect::new(0, 0, width, height),
            frame: FrameRecording::default(),
            frames: 0,
        }
    }

    /// Size of the render target.
    pub fn target_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Frames submitted so far.
    pub fn frame_count(&self) -> u64 {
        self.frames
    }

    /// The underlying wgpu device.
    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    fn allocate_id(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }

    /// Runs `f` inside an out-of-memory error scope.
    fn with_oom_scope<T>(&self, what: &str, f: impl FnOnce(&wgpu::Device) -> T) -> RenderResult<T> {
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let value = f(&self.device);
        match pollster::block_on(self.device.pop_error_scope()) {
            None => Ok(value),
            Some(e) => Err(RenderError::DeviceResource(format!("{what}: {e}"))),
        }
    }

    fn buffer(&self, id: BufferId) -> RenderResult<&GpuVertexBuffer> {
        self.buffers.get(&id).ok_or(RenderError::UseAfterFree {
            kind: "buffer",
            id: id.0,
        })
    }

    fn buffer_mut(&mut self, id: BufferId) -> RenderResult<&mut GpuVertexBuffer> {
        self.buffers.get_mut(&id).ok_or(RenderError::UseAfterFree {
            kind: "buffer",
            id: id.0,
        })
    }

    fn shader(&self, id: ShaderId) -> RenderResult<&CompiledStage> {
        self.shaders.get(&id).ok_or(RenderError::UseAfterFree {
            kind: "shader",
            id: id.0,
        })
    }

    fn check_texture(&self, id: TextureId) -> RenderResult<()> {
        if self.textures.contains_key(&id) {
            Ok(())
        } else {
            Err(RenderError::UseAfterFree {
                kind: "texture",
                id: id.0,
            })
        }
    }
}

impl GpuDevice for WgpuDevice {
    fn create_buffer(&mut self) -> RenderResult<BufferId> {
        let id = BufferId(self.allocate_id());
        self.buffers.insert(
            id,
            GpuVertexBuffer {
                layout: None,
                buffer: None,
                floats: 0,
            },
        );
        Ok(id)
    }

    fn set_vertex_layout(&mut self, buffer: BufferId, layout: &VertexLayout) -> RenderResult<()> {
        self.buffer_mut(buffer)?.layout = Some(layout.clone());
        Ok(())
    }

    fn upload_vertices(&mut self, buffer: BufferId, data: &[f32]) -> RenderResult<()> {
        self.buffer(buffer)?;
        let label = format!("vertex buffer {}", buffer.0);
        let gpu_buffer = if data.is_empty() {
            None
        } else {
            Some(self.with_oom_scope(&label, |device| {
                device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some(label.as_str()),
                    contents: bytemuck::cast_slice(data),
                    usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
                })
            })?)
        };
        let state = self.buffer_mut(buffer)?;
        state.buffer = gpu_buffer;
        state.floats = data.len();
        Ok(())
    }

    fn draw_triangles(&mut self, buffer: BufferId, first: u32, count: u32) -> RenderResult<()> {
        let program_id = self
            .current_program
            .ok_or_else(|| RenderError::InvalidState("draw with no program bound".into()))?;
        let state = self.buffer(buffer)?;
        let layout = state
            .layout
            .clone()
            .ok_or(RenderError::LayoutNotDeclared)?;
        let end = first as usize + count as usize;
        if end > state.vertex_count() {
            return Err(RenderError::InvalidState(format!(
                "draw range {first}..{end} exceeds {} vertices in buffer {}",
                state.vertex_count(),
                buffer.0
            )));
        }
        let Some(vertex_buffer) = state.buffer.clone() else {
            return Ok(());
        };
        if count == 0 {
            return Ok(());
        }

        let pipeline = self.pipeline_for(program_id, &layout)?;
        let bind_groups = self.snapshot_bind_groups(program_id)?;
        self.frame.draws.push(RecordedDraw {
            pipeline,
            bind_groups,
            vertex_buffer,
            vertices: first..first + count,
            viewport: self.viewport,
        });
        Ok(())
    }

    fn delete_buffer(&mut self, buffer: BufferId) -> RenderResult<()> {
        // Draws already recorded this frame keep their own reference.
        self.buffers
            .remove(&buffer)
            .map(|_| ())
            .ok_or(RenderError::UseAfterFree {
                kind: "buffer",
                id: buffer.0,
            })
    }

    fn compile_shader(&mut self, stage: ShaderStage, source: &str) -> RenderResult<ShaderId> {
        let compiled = reflection::compile(stage, source)?;
        let id = ShaderId(self.allocate_id());
        self.shaders.insert(id, compiled);
        Ok(id)
    }

    fn delete_shader(&mut self, shader: ShaderId) -> RenderResult<()> {
        self.shaders
            .remove(&shader)
            .map(|_| ())
            .ok_or(RenderError::UseAfterFree {
                kind: "shader",
                id: shader.0,
            })
    }

    fn link_program(
        &mut self,
        vertex: ShaderId,
        fragment: ShaderId,
    ) -> RenderResult<(ProgramId, ProgramInterface)> {
        let vertex_stage = self.shader(vertex)?;
        let fragment_stage = self.shader(fragment)?;
        let interface = reflection::link(vertex_stage, fragment_stage)?;
        let program = self.create_program(vertex_stage, fragment_stage, interface.clone())?;
        let id = ProgramId(self.allocate_id());
        self.programs.insert(id, program);
        Ok((id, interface))
    }

    fn use_program(&mut self, program: Option<ProgramId>) -> RenderResult<()> {
        if let Some(id) = program {
            if !self.programs.contains_key(&id) {
                return Err(RenderError::UseAfterFree {
                    kind: "program",
                    id: id.0,
                });
            }
        }
        self.current_program = program;
        Ok(())
    }

    fn set_uniform(
        &mut self,
        location: UniformLocation,
        value: &UniformValue,
    ) -> RenderResult<()> {
        let program = self
            .programs
            .get_mut(&location.program)
            .ok_or(RenderError::UseAfterFree {
                kind: "program",
                id: location.program.0,
            })?;
        if self.current_program != Some(location.program) {
            return Err(RenderError::InvalidState(format!(
                "uniform set on program {} while it is not bound",
                location.program.0
            )));
        }
        let info = program
            .interface
            .uniforms
            .get(location.index as usize)
            .ok_or_else(|| {
                RenderError::InvalidState(format!(
                    "program {} has no uniform at index {}",
                    location.program.0, location.index
                ))
            })?;
        if !info.kind.accepts(value) {
            return Err(RenderError::UniformTypeMismatch {
                name: info.name.clone(),
                expected: info.kind,
                actual: value.kind(),
            });
        }
        program.values.insert(location.index, *value);
        Ok(())
    }

    fn delete_program(&mut self, program: ProgramId) -> RenderResult<()> {
        self.programs
            .remove(&program)
            .ok_or(RenderError::UseAfterFree {
                kind: "program",
                id: program.0,
            })?;
        self.pipelines.retain(|(id, _), _| *id != program);
        if self.current_program == Some(program) {
            self.current_program = None;
        }
        Ok(())
    }

    fn create_texture(&mut self) -> RenderResult<TextureId> {
        let id = TextureId(self.allocate_id());
        self.textures.insert(id, None);
        Ok(id)
    }

    fn upload_texture(
        &mut self,
        texture: TextureId,
        width: u32,
        height: u32,
        rgba: &[u8],
    ) -> RenderResult<()> {
        self.check_texture(texture)?;
        check_image_size(width, height, rgba)?;
        let label = format!("texture {}", texture.0);
        let view = self.with_oom_scope(&label, |device| {
            textures::create_rgba_texture(device, &self.queue, &label, width, height, rgba)
        })?;
        self.textures.insert(texture, Some(view));
        Ok(())
    }

    fn bind_texture(&mut self, unit: u32, texture: TextureId) -> RenderResult<()> {
        self.check_texture(texture)?;
        self.texture_units.insert(unit, texture);
        Ok(())
    }

    fn delete_texture(&mut self, texture: TextureId) -> RenderResult<()> {
        self.textures
            .remove(&texture)
            .ok_or(RenderError::UseAfterFree {
                kind: "texture",
                id: texture.0,
            })?;
        self.texture_units.retain(|_, bound| *bound != texture);
        Ok(())
    }

    fn bind_framebuffer(&mut self, framebuffer: FramebufferId) -> RenderResult<()> {
        self.frame.framebuffer = Some(framebuffer);
        Ok(())
    }

    fn clear(&mut self, color: [f32; 4]) -> RenderResult<()> {
        // A clear overwrites everything drawn before it in this frame.
        self.frame.draws.clear();
        self.frame.clear = Some(color);
        Ok(())
    }

    fn set_viewport(&mut self, viewport: ViewportRect) -> RenderResult<()> {
        self.viewport = viewport;
        Ok(())
    }

    fn end_frame(&mut self) -> RenderResult<()> {
        let frame = std::mem::take(&mut self.frame);
        self.submit_frame(frame);
        self.frames += 1;
        Ok(())
    }
}
