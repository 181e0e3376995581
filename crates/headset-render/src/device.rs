//! The GPU device abstraction.
//!
//! [`GpuDevice`] is a small immediate-mode interface: handles are plain ids,
//! state (bound program, bound texture units, viewport) lives in the device,
//! and uniforms are set on the currently bound program. The safe wrappers in
//! [`crate::buffer`], [`crate::shader`] and [`crate::texture`] sit on top of it.
//!
//! Every implementation must reject ids that were deleted (or never created)
//! with [`RenderError::UseAfterFree`].

use std::collections::HashSet;
use std::fmt;

use glam::{Mat4, Vec2, Vec3, Vec4};
use headset_core::{FramebufferId, ViewportRect};

use crate::error::{RenderError, RenderResult};

/// Handle to a vertex buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(pub u32);

/// Handle to a compiled shader stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShaderId(pub u32);

/// Handle to a linked program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProgramId(pub u32);

/// Handle to a 2D texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(pub u32);

/// Shader pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ShaderStage::Vertex => "vertex",
            ShaderStage::Fragment => "fragment",
        })
    }
}

/// One vertex attribute: shader location and number of `f32` components.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VertexAttribute {
    pub slot: u32,
    pub components: u32,
}

impl VertexAttribute {
    pub const fn new(slot: u32, components: u32) -> Self {
        Self { slot, components }
    }
}

/// Interleaved `f32` vertex layout.
///
/// Attributes are packed in declaration order; each starts at the byte offset
/// equal to the sum of the preceding attributes' sizes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VertexLayout {
    attributes: Vec<VertexAttribute>,
    stride: usize,
}

impl VertexLayout {
    /// Validates and builds a layout.
    ///
    /// Component counts must be in `1..=4` and slots must be unique.
    pub fn new(attributes: &[VertexAttribute]) -> RenderResult<Self> {
        if attributes.is_empty() {
            return Err(RenderError::InvalidLayout(
                "layout declares no attributes".into(),
            ));
        }
        let mut seen = HashSet::new();
        for attr in attributes {
            if !(1..=4).contains(&attr.components) {
                return Err(RenderError::InvalidLayout(format!(
                    "attribute slot {} has {} components (expected 1..=4)",
                    attr.slot, attr.components
                )));
            }
            if !seen.insert(attr.slot) {
                return Err(RenderError::InvalidLayout(format!(
                    "attribute slot {} declared twice",
                    attr.slot
                )));
            }
        }
        let stride = attributes.iter().map(|a| a.components as usize).sum();
        Ok(Self {
            attributes: attributes.to_vec(),
            stride,
        })
    }

    /// Attributes in declaration order.
    pub fn attributes(&self) -> &[VertexAttribute] {
        &self.attributes
    }

    /// Floats per vertex.
    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Bytes per vertex.
    pub fn stride_bytes(&self) -> usize {
        self.stride * std::mem::size_of::<f32>()
    }

    /// `(attribute, byte offset)` pairs in declaration order.
    pub fn offsets(&self) -> impl Iterator<Item = (VertexAttribute, usize)> + '_ {
        self.attributes.iter().scan(0usize, |offset, attr| {
            let at = *offset;
            *offset += attr.components as usize * std::mem::size_of::<f32>();
            Some((*attr, at))
        })
    }

    /// Whether the layout provides an attribute at `slot`.
    pub fn has_slot(&self, slot: u32) -> bool {
        self.attributes.iter().any(|a| a.slot == slot)
    }

    /// Slots of `self` that are not present in `next`.
    pub fn slots_missing_from(&self, next: &VertexLayout) -> Vec<u32> {
        self.attributes
            .iter()
            .map(|a| a.slot)
            .filter(|slot| !next.has_slot(*slot))
            .collect()
    }
}

/// Declared type of a uniform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UniformKind {
    Int,
    Float,
    Vec2,
    Vec3,
    Vec4,
    Mat4,
    /// A sampled 2D texture. Set with an [`UniformValue::Int`] naming the texture unit.
    Texture,
}

impl UniformKind {
    /// Whether `value` can be assigned to a uniform of this kind.
    pub fn accepts(self, value: &UniformValue) -> bool {
        match self {
            UniformKind::Texture => matches!(value, UniformValue::Int(_)),
            kind => value.kind() == kind,
        }
    }

    /// Size of the value in a uniform buffer, padded to 16 bytes.
    pub fn padded_size(self) -> usize {
        match self {
            UniformKind::Mat4 => 64,
            _ => 16,
        }
    }
}

impl fmt::Display for UniformKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            UniformKind::Int => "i32",
            UniformKind::Float => "f32",
            UniformKind::Vec2 => "vec2<f32>",
            UniformKind::Vec3 => "vec3<f32>",
            UniformKind::Vec4 => "vec4<f32>",
            UniformKind::Mat4 => "mat4x4<f32>",
            UniformKind::Texture => "texture_2d<f32>",
        })
    }
}

/// A uniform value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformValue {
    Int(i32),
    Float(f32),
    Vec2(Vec2),
    Vec3(Vec3),
    Vec4(Vec4),
    Mat4(Mat4),
}

impl UniformValue {
    /// The kind of this value.
    pub fn kind(&self) -> UniformKind {
        match self {
            UniformValue::Int(_) => UniformKind::Int,
            UniformValue::Float(_) => UniformKind::Float,
            UniformValue::Vec2(_) => UniformKind::Vec2,
            UniformValue::Vec3(_) => UniformKind::Vec3,
            UniformValue::Vec4(_) => UniformKind::Vec4,
            UniformValue::Mat4(_) => UniformKind::Mat4,
        }
    }

    /// Little-endian bytes as laid out in a uniform buffer, padded to [`UniformKind::padded_size`].
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes: Vec<u8> = match self {
            UniformValue::Int(v) => bytemuck::bytes_of(v).to_vec(),
            UniformValue::Float(v) => bytemuck::bytes_of(v).to_vec(),
            UniformValue::Vec2(v) => bytemuck::cast_slice(&v.to_array()).to_vec(),
            UniformValue::Vec3(v) => bytemuck::cast_slice(&v.to_array()).to_vec(),
            UniformValue::Vec4(v) => bytemuck::cast_slice(&v.to_array()).to_vec(),
            UniformValue::Mat4(m) => bytemuck::cast_slice(&m.to_cols_array()).to_vec(),
        };
        bytes.resize(self.kind().padded_size(), 0);
        bytes
    }
}

/// Resolved location of a uniform inside a program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UniformLocation {
    pub program: ProgramId,
    pub index: u32,
}

/// A uniform as reflected at link time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniformInfo {
    pub name: String,
    pub kind: UniformKind,
    pub group: u32,
    pub binding: u32,
}

/// Resource interface of a linked program.
///
/// Uniform indices are positions in [`ProgramInterface::uniforms`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgramInterface {
    pub uniforms: Vec<UniformInfo>,
    /// `(group, binding)` of every sampler.
    pub samplers: Vec<(u32, u32)>,
    /// Vertex input locations the vertex stage reads.
    pub vertex_inputs: Vec<u32>,
}

impl ProgramInterface {
    /// Finds a uniform by name, returning its index and info.
    pub fn uniform(&self, name: &str) -> Option<(u32, &UniformInfo)> {
        self.uniforms
            .iter()
            .position(|u| u.name == name)
            .and_then(|i| u32::try_from(i).ok())
            .map(|i| (i, &self.uniforms[i as usize]))
    }

    /// Checks that `layout` feeds every vertex input of the program.
    pub fn check_layout(&self, layout: &VertexLayout) -> RenderResult<()> {
        let missing: Vec<u32> = self
            .vertex_inputs
            .iter()
            .copied()
            .filter(|loc| !layout.has_slot(*loc))
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(RenderError::InvalidState(format!(
                "vertex layout does not provide shader input locations {missing:?}"
            )))
        }
    }

    /// Highest bind group index used, plus one.
    pub fn group_count(&self) -> u32 {
        self.uniforms
            .iter()
            .map(|u| u.group + 1)
            .chain(self.samplers.iter().map(|(g, _)| g + 1))
            .max()
            .unwrap_or(0)
    }
}

/// Immediate-mode GPU device.
///
/// One frame is built by binding a framebuffer, clearing, setting viewports,
/// binding programs and textures, setting uniforms and drawing, followed by
/// [`GpuDevice::end_frame`].
pub trait GpuDevice {
    /// Allocates a vertex buffer with no layout and no data.
    fn create_buffer(&mut self) -> RenderResult<BufferId>;

    /// Sets the interleaved layout of `buffer`. Last call wins.
    fn set_vertex_layout(&mut self, buffer: BufferId, layout: &VertexLayout) -> RenderResult<()>;

    /// Replaces the contents of `buffer`.
    fn upload_vertices(&mut self, buffer: BufferId, data: &[f32]) -> RenderResult<()>;

    /// Draws vertices `first..first + count` of `buffer` as a triangle list
    /// with the bound program.
    fn draw_triangles(&mut self, buffer: BufferId, first: u32, count: u32) -> RenderResult<()>;

    fn delete_buffer(&mut self, buffer: BufferId) -> RenderResult<()>;

    /// Compiles one stage. Failures carry the compiler log.
    fn compile_shader(&mut self, stage: ShaderStage, source: &str) -> RenderResult<ShaderId>;

    fn delete_shader(&mut self, shader: ShaderId) -> RenderResult<()>;

    /// Links a vertex and fragment stage and reflects the program's interface.
    fn link_program(
        &mut self,
        vertex: ShaderId,
        fragment: ShaderId,
    ) -> RenderResult<(ProgramId, ProgramInterface)>;

    /// Makes `program` current, or unbinds with `None`.
    fn use_program(&mut self, program: Option<ProgramId>) -> RenderResult<()>;

    /// Sets a uniform of the currently bound program.
    fn set_uniform(&mut self, location: UniformLocation, value: &UniformValue)
        -> RenderResult<()>;

    fn delete_program(&mut self, program: ProgramId) -> RenderResult<()>;

    /// Allocates an empty texture.
    fn create_texture(&mut self) -> RenderResult<TextureId>;

    /// Replaces the texture's storage with `width x height` RGBA8 pixels.
    fn upload_texture(
        &mut self,
        texture: TextureId,
        width: u32,
        height: u32,
        rgba: &[u8],
    ) -> RenderResult<()>;

    /// Binds `texture` to texture unit `unit`.
    fn bind_texture(&mut self, unit: u32, texture: TextureId) -> RenderResult<()>;

    fn delete_texture(&mut self, texture: TextureId) -> RenderResult<()>;

    /// Makes `framebuffer` the render target for the rest of the frame.
    fn bind_framebuffer(&mut self, framebuffer: FramebufferId) -> RenderResult<()>;

    /// Clears colour to `color` and depth to the far plane.
    fn clear(&mut self, color: [f32; 4]) -> RenderResult<()>;

    fn set_viewport(&mut self, viewport: ViewportRect) -> RenderResult<()>;

    /// Finishes the frame; implementations submit queued work here.
    fn end_frame(&mut self) -> RenderResult<()>;
}

/// Checks that `rgba` holds exactly `width * height` RGBA8 pixels.
pub fn check_image_size(width: u32, height: u32, rgba: &[u8]) -> RenderResult<()> {
    let expected = width as usize * height as usize * 4;
    if width == 0 || height == 0 || rgba.len() != expected {
        return Err(RenderError::ImageSize {
            width,
            height,
            len: rgba.len(),
            expected,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_stride_and_offsets() {
        let layout =
            VertexLayout::new(&[VertexAttribute::new(0, 3), VertexAttribute::new(1, 2)]).unwrap();
        assert_eq!(layout.stride(), 5);
        assert_eq!(layout.stride_bytes(), 20);
        let offsets: Vec<usize> = layout.offsets().map(|(_, o)| o).collect();
        assert_eq!(offsets, vec![0, 12]);
    }

    #[test]
    fn test_layout_rejects_bad_components() {
        assert!(matches!(
            VertexLayout::new(&[VertexAttribute::new(0, 0)]),
            Err(RenderError::InvalidLayout(_))
        ));
        assert!(matches!(
            VertexLayout::new(&[VertexAttribute::new(0, 5)]),
            Err(RenderError::InvalidLayout(_))
        ));
    }

    #[test]
    fn test_layout_rejects_duplicate_slot() {
        let result = VertexLayout::new(&[VertexAttribute::new(0, 3), VertexAttribute::new(0, 2)]);
        assert!(matches!(result, Err(RenderError::InvalidLayout(_))));
    }

    #[test]
    fn test_slots_missing_from() {
        let old =
            VertexLayout::new(&[VertexAttribute::new(0, 3), VertexAttribute::new(1, 2)]).unwrap();
        let new = VertexLayout::new(&[VertexAttribute::new(0, 4)]).unwrap();
        assert_eq!(old.slots_missing_from(&new), vec![1]);
        assert!(new.slots_missing_from(&old).is_empty());
    }

    #[test]
    fn test_texture_kind_accepts_int() {
        assert!(UniformKind::Texture.accepts(&UniformValue::Int(0)));
        assert!(!UniformKind::Texture.accepts(&UniformValue::Float(0.0)));
        assert!(UniformKind::Mat4.accepts(&UniformValue::Mat4(Mat4::IDENTITY)));
        assert!(!UniformKind::Mat4.accepts(&UniformValue::Vec4(Vec4::ONE)));
    }

    #[test]
    fn test_uniform_bytes_padded() {
        assert_eq!(UniformValue::Float(1.0).to_bytes().len(), 16);
        assert_eq!(UniformValue::Vec3(Vec3::ONE).to_bytes().len(), 16);
        assert_eq!(UniformValue::Mat4(Mat4::IDENTITY).to_bytes().len(), 64);
        assert_eq!(&UniformValue::Int(7).to_bytes()[..4], &7i32.to_le_bytes());
    }

    #[test]
    fn test_check_image_size() {
        assert!(check_image_size(2, 2, &[0; 16]).is_ok());
        assert!(matches!(
            check_image_size(2, 2, &[0; 15]),
            Err(RenderError::ImageSize { expected: 16, .. })
        ));
        assert!(check_image_size(0, 0, &[]).is_err());
    }
}
