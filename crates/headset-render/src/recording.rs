//! Headless device that validates and records every call.
//!
//! [`RecordingDevice`] holds no GPU memory. It tracks which handles are alive,
//! which program and textures are bound and how many vertices each buffer
//! holds, rejects anything a real driver would reject, and appends each
//! accepted call to a [`GpuCommand`] log.

use std::collections::HashMap;

use headset_core::{FramebufferId, ViewportRect};

use crate::device::{
    check_image_size, BufferId, GpuDevice, ProgramId, ProgramInterface, ShaderId, ShaderStage,
    TextureId, UniformLocation, UniformValue, VertexLayout,
};
use crate::error::{RenderError, RenderResult};
use crate::reflection::{self, CompiledStage};

/// One accepted device call.
#[derive(Debug, Clone, PartialEq)]
pub enum GpuCommand {
    CreateBuffer(BufferId),
    SetVertexLayout { buffer: BufferId, stride: usize },
    UploadVertices { buffer: BufferId, floats: usize },
    DrawTriangles {
        buffer: BufferId,
        program: ProgramId,
        first: u32,
        count: u32,
    },
    DeleteBuffer(BufferId),
    CompileShader { shader: ShaderId, stage: ShaderStage },
    DeleteShader(ShaderId),
    LinkProgram {
        program: ProgramId,
        vertex: ShaderId,
        fragment: ShaderId,
    },
    UseProgram(Option<ProgramId>),
    SetUniform {
        program: ProgramId,
        name: String,
        value: UniformValue,
    },
    DeleteProgram(ProgramId),
    CreateTexture(TextureId),
    UploadTexture {
        texture: TextureId,
        width: u32,
        height: u32,
    },
    BindTexture { unit: u32, texture: TextureId },
    DeleteTexture(TextureId),
    BindFramebuffer(FramebufferId),
    Clear([f32; 4]),
    SetViewport(ViewportRect),
    EndFrame,
}

#[derive(Debug, Default)]
struct BufferState {
    layout: Option<VertexLayout>,
    floats: usize,
}

impl BufferState {
    fn vertex_count(&self) -> usize {
        self.layout
            .as_ref()
            .map_or(0, |layout| self.floats / layout.stride())
    }
}

#[derive(Debug)]
struct ProgramState {
    interface: ProgramInterface,
    values: HashMap<u32, UniformValue>,
}

/// Headless [`GpuDevice`].
#[derive(Debug, Default)]
pub struct RecordingDevice {
    next_id: u32,
    allocation_budget: Option<usize>,
    buffers: HashMap<BufferId, BufferState>,
    shaders: HashMap<ShaderId, CompiledStage>,
    programs: HashMap<ProgramId, ProgramState>,
    textures: HashMap<TextureId, Option<(u32, u32)>>,
    current_program: Option<ProgramId>,
    texture_units: HashMap<u32, TextureId>,
    frames: u64,
    commands: Vec<GpuCommand>,
}

impl RecordingDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// A device that refuses allocations after `allocations` successful ones.
    pub fn with_allocation_budget(allocations: usize) -> Self {
        Self {
            allocation_budget: Some(allocations),
            ..Self::default()
        }
    }

    /// Sets (or lifts, with `None`) the remaining allocation budget.
    pub fn set_allocation_budget(&mut self, allocations: Option<usize>) {
        self.allocation_budget = allocations;
    }

    /// Commands accepted so far.
    pub fn commands(&self) -> &[GpuCommand] {
        &self.commands
    }

    /// Drains the command log.
    pub fn take_commands(&mut self) -> Vec<GpuCommand> {
        std::mem::take(&mut self.commands)
    }

    /// Number of draw calls in the log.
    pub fn draw_count(&self) -> usize {
        self.count(|c| matches!(c, GpuCommand::DrawTriangles { .. }))
    }

    /// Number of logged commands matching `predicate`.
    pub fn count(&self, predicate: impl Fn(&GpuCommand) -> bool) -> usize {
        self.commands.iter().filter(|c| predicate(c)).count()
    }

    /// Buffers, shaders, programs and textures not yet deleted.
    pub fn live_resources(&self) -> usize {
        self.buffers.len() + self.shaders.len() + self.programs.len() + self.textures.len()
    }

    /// Completed frames.
    pub fn frame_count(&self) -> u64 {
        self.frames
    }

    pub fn current_program(&self) -> Option<ProgramId> {
        self.current_program
    }

    /// Texture bound to `unit`, if any.
    pub fn bound_texture(&self, unit: u32) -> Option<TextureId> {
        self.texture_units.get(&unit).copied()
    }

    /// Dimensions of the last upload to `texture`.
    pub fn texture_size(&self, texture: TextureId) -> Option<(u32, u32)> {
        self.textures.get(&texture).copied().flatten()
    }

    /// Last value set for the uniform `name` of `program`.
    pub fn uniform_value(&self, program: ProgramId, name: &str) -> Option<UniformValue> {
        let state = self.programs.get(&program)?;
        let (index, _) = state.interface.uniform(name)?;
        state.values.get(&index).copied()
    }

    fn allocate(&mut self, what: &str) -> RenderResult<u32> {
        if let Some(budget) = self.allocation_budget.as_mut() {
            if *budget == 0 {
                return Err(RenderError::DeviceResource(format!(
                    "out of device memory allocating {what}"
                )));
            }
            *budget -= 1;
        }
        self.next_id += 1;
        Ok(self.next_id)
    }

    fn buffer_mut(&mut self, id: BufferId) -> RenderResult<&mut BufferState> {
        self.buffers.get_mut(&id).ok_or(RenderError::UseAfterFree {
            kind: "buffer",
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

    fn shader(&self, id: ShaderId) -> RenderResult<&CompiledStage> {
        self.shaders.get(&id).ok_or(RenderError::UseAfterFree {
            kind: "shader",
            id: id.0,
        })
    }
}

impl GpuDevice for RecordingDevice {
    fn create_buffer(&mut self) -> RenderResult<BufferId> {
        let id = BufferId(self.allocate("vertex buffer")?);
        self.buffers.insert(id, BufferState::default());
        self.commands.push(GpuCommand::CreateBuffer(id));
        Ok(id)
    }

    fn set_vertex_layout(&mut self, buffer: BufferId, layout: &VertexLayout) -> RenderResult<()> {
        let state = self.buffer_mut(buffer)?;
        state.layout = Some(layout.clone());
        let stride = layout.stride();
        self.commands
            .push(GpuCommand::SetVertexLayout { buffer, stride });
        Ok(())
    }

    fn upload_vertices(&mut self, buffer: BufferId, data: &[f32]) -> RenderResult<()> {
        let state = self.buffer_mut(buffer)?;
        state.floats = data.len();
        self.commands.push(GpuCommand::UploadVertices {
            buffer,
            floats: data.len(),
        });
        Ok(())
    }

    fn draw_triangles(&mut self, buffer: BufferId, first: u32, count: u32) -> RenderResult<()> {
        let program = self
            .current_program
            .ok_or_else(|| RenderError::InvalidState("draw with no program bound".into()))?;
        let state = self.buffers.get(&buffer).ok_or(RenderError::UseAfterFree {
            kind: "buffer",
            id: buffer.0,
        })?;
        let layout = state.layout.as_ref().ok_or(RenderError::LayoutNotDeclared)?;
        if let Some(bound) = self.programs.get(&program) {
            bound.interface.check_layout(layout)?;
        }
        let end = first as usize + count as usize;
        if end > state.vertex_count() {
            return Err(RenderError::InvalidState(format!(
                "draw range {first}..{end} exceeds {} vertices in buffer {}",
                state.vertex_count(),
                buffer.0
            )));
        }
        self.commands.push(GpuCommand::DrawTriangles {
            buffer,
            program,
            first,
            count,
        });
        Ok(())
    }

    fn delete_buffer(&mut self, buffer: BufferId) -> RenderResult<()> {
        self.buffers.remove(&buffer).ok_or(RenderError::UseAfterFree {
            kind: "buffer",
            id: buffer.0,
        })?;
        self.commands.push(GpuCommand::DeleteBuffer(buffer));
        Ok(())
    }

    fn compile_shader(&mut self, stage: ShaderStage, source: &str) -> RenderResult<ShaderId> {
        let compiled = reflection::compile(stage, source)?;
        let shader = ShaderId(self.allocate("shader")?);
        self.shaders.insert(shader, compiled);
        self.commands
            .push(GpuCommand::CompileShader { shader, stage });
        Ok(shader)
    }

    fn delete_shader(&mut self, shader: ShaderId) -> RenderResult<()> {
        self.shaders.remove(&shader).ok_or(RenderError::UseAfterFree {
            kind: "shader",
            id: shader.0,
        })?;
        self.commands.push(GpuCommand::DeleteShader(shader));
        Ok(())
    }

    fn link_program(
        &mut self,
        vertex: ShaderId,
        fragment: ShaderId,
    ) -> RenderResult<(ProgramId, ProgramInterface)> {
        let interface = reflection::link(self.shader(vertex)?, self.shader(fragment)?)?;
        let program = ProgramId(self.allocate("program")?);
        self.programs.insert(
            program,
            ProgramState {
                interface: interface.clone(),
                values: HashMap::new(),
            },
        );
        self.commands.push(GpuCommand::LinkProgram {
            program,
            vertex,
            fragment,
        });
        Ok((program, interface))
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
        self.commands.push(GpuCommand::UseProgram(program));
        Ok(())
    }

    fn set_uniform(
        &mut self,
        location: UniformLocation,
        value: &UniformValue,
    ) -> RenderResult<()> {
        let state = self
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
        let info = state
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
        let name = info.name.clone();
        state.values.insert(location.index, *value);
        self.commands.push(GpuCommand::SetUniform {
            program: location.program,
            name,
            value: *value,
        });
        Ok(())
    }

    fn delete_program(&mut self, program: ProgramId) -> RenderResult<()> {
        self.programs
            .remove(&program)
            .ok_or(RenderError::UseAfterFree {
                kind: "program",
                id: program.0,
            })?;
        if self.current_program == Some(program) {
            self.current_program = None;
        }
        self.commands.push(GpuCommand::DeleteProgram(program));
        Ok(())
    }

    fn create_texture(&mut self) -> RenderResult<TextureId> {
        let id = TextureId(self.allocate("texture")?);
        self.textures.insert(id, None);
        self.commands.push(GpuCommand::CreateTexture(id));
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
        self.textures.insert(texture, Some((width, height)));
        self.commands.push(GpuCommand::UploadTexture {
            texture,
            width,
            height,
        });
        Ok(())
    }

    fn bind_texture(&mut self, unit: u32, texture: TextureId) -> RenderResult<()> {
        self.check_texture(texture)?;
        self.texture_units.insert(unit, texture);
        self.commands.push(GpuCommand::BindTexture { unit, texture });
        Ok(())
    }

    fn delete_texture(&mut self, texture: TextureId) -> RenderResult<()> {
        self.textures.remove(&texture).ok_or(RenderError::UseAfterFree {
            kind: "texture",
            id: texture.0,
        })?;
        self.texture_units.retain(|_, bound| *bound != texture);
        self.commands.push(GpuCommand::DeleteTexture(texture));
        Ok(())
    }

    fn bind_framebuffer(&mut self, framebuffer: FramebufferId) -> RenderResult<()> {
        self.commands.push(GpuCommand::BindFramebuffer(framebuffer));
        Ok(())
    }

    fn clear(&mut self, color: [f32; 4]) -> RenderResult<()> {
        self.commands.push(GpuCommand::Clear(color));
        Ok(())
    }

    fn set_viewport(&mut self, viewport: ViewportRect) -> RenderResult<()> {
        self.commands.push(GpuCommand::SetViewport(viewport));
        Ok(())
    }

    fn end_frame(&mut self) -> RenderResult<()> {
        self.frames += 1;
        self.commands.push(GpuCommand::EndFrame);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::VertexAttribute;

    const VERTEX: &str = include_str!("shaders/textured.vert.wgsl");
    const FRAGMENT: &str = include_str!("shaders/textured.frag.wgsl");

    fn textured_program(device: &mut RecordingDevice) -> (ProgramId, ProgramInterface) {
        let vs = device.compile_shader(ShaderStage::Vertex, VERTEX).unwrap();
        let fs = device.compile_shader(ShaderStage::Fragment, FRAGMENT).unwrap();
        device.link_program(vs, fs).unwrap()
    }

    #[test]
    fn test_allocation_budget() {
        let mut device = RecordingDevice::with_allocation_budget(1);
        assert!(device.create_buffer().is_ok());
        assert!(matches!(
            device.create_texture(),
            Err(RenderError::DeviceResource(_))
        ));
        device.set_allocation_budget(None);
        assert!(device.create_texture().is_ok());
    }

    #[test]
    fn test_draw_requires_program() {
        let mut device = RecordingDevice::new();
        let buffer = device.create_buffer().unwrap();
        let layout =
            VertexLayout::new(&[VertexAttribute::new(0, 3), VertexAttribute::new(1, 2)]).unwrap();
        device.set_vertex_layout(buffer, &layout).unwrap();
        device.upload_vertices(buffer, &[0.0; 15]).unwrap();
        assert!(matches!(
            device.draw_triangles(buffer, 0, 3),
            Err(RenderError::InvalidState(_))
        ));
    }

    #[test]
    fn test_draw_range_checked() {
        let mut device = RecordingDevice::new();
        let (program, _) = textured_program(&mut device);
        device.use_program(Some(program)).unwrap();
        let buffer = device.create_buffer().unwrap();
        let layout =
            VertexLayout::new(&[VertexAttribute::new(0, 3), VertexAttribute::new(1, 2)]).unwrap();
        device.set_vertex_layout(buffer, &layout).unwrap();
        device.upload_vertices(buffer, &[0.0; 15]).unwrap();

        device.draw_triangles(buffer, 0, 3).unwrap();
        assert!(device.draw_triangles(buffer, 1, 3).is_err());
        assert_eq!(device.draw_count(), 1);
    }

    #[test]
    fn test_draw_rejects_layout_missing_inputs() {
        let mut device = RecordingDevice::new();
        let (program, _) = textured_program(&mut device);
        device.use_program(Some(program)).unwrap();
        let buffer = device.create_buffer().unwrap();
        let layout = VertexLayout::new(&[VertexAttribute::new(0, 3)]).unwrap();
        device.set_vertex_layout(buffer, &layout).unwrap();
        device.upload_vertices(buffer, &[0.0; 9]).unwrap();
        assert!(matches!(
            device.draw_triangles(buffer, 0, 3),
            Err(RenderError::InvalidState(_))
        ));
    }

    #[test]
    fn test_uniform_type_checked() {
        let mut device = RecordingDevice::new();
        let (program, interface) = textured_program(&mut device);
        let (index, _) = interface.uniform("u_model").unwrap();
        let location = UniformLocation { program, index };

        assert!(matches!(
            device.set_uniform(location, &UniformValue::Mat4(glam::Mat4::IDENTITY)),
            Err(RenderError::InvalidState(_))
        ));

        device.use_program(Some(program)).unwrap();
        let err = device
            .set_uniform(location, &UniformValue::Float(1.0))
            .unwrap_err();
        assert!(matches!(err, RenderError::UniformTypeMismatch { .. }));

        device
            .set_uniform(location, &UniformValue::Mat4(glam::Mat4::IDENTITY))
            .unwrap();
        assert_eq!(
            device.uniform_value(program, "u_model"),
            Some(UniformValue::Mat4(glam::Mat4::IDENTITY))
        );
    }

    #[test]
    fn test_deleted_handles_rejected() {
        let mut device = RecordingDevice::new();
        let (program, _) = textured_program(&mut device);
        device.delete_program(program).unwrap();
        assert!(matches!(
            device.use_program(Some(program)),
            Err(RenderError::UseAfterFree { kind: "program", .. })
        ));

        let texture = device.create_texture().unwrap();
        device.bind_texture(0, texture).unwrap();
        device.delete_texture(texture).unwrap();
        assert_eq!(device.bound_texture(0), None);
        assert!(matches!(
            device.bind_texture(0, texture),
            Err(RenderError::UseAfterFree { kind: "texture", .. })
        ));
        assert!(device.delete_texture(texture).is_err());
    }

    #[test]
    fn test_compile_failure_allocates_nothing() {
        let mut device = RecordingDevice::new();
        assert!(device
            .compile_shader(ShaderStage::Vertex, "not wgsl")
            .is_err());
        assert_eq!(device.live_resources(), 0);
        assert!(device.commands().is_empty());
    }
}
