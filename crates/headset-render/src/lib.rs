//! GPU resource layer for headset.
//!
//! This crate provides:
//! - The [`GpuDevice`] abstraction and its two backends: [`WgpuDevice`]
//!   (offscreen wgpu target) and [`RecordingDevice`] (headless, validating)
//! - Owned wrappers with explicit release: [`VertexBuffer`], [`ShaderProgram`], [`Texture`]
//! - WGSL compilation and uniform reflection
//! - OBJ mesh parsing and placeholder geometry

// Documentation lints - internal functions don't need exhaustive panic/error docs
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]

pub mod buffer;
pub mod device;
pub mod engine;
pub mod error;
pub mod mesh;
pub mod recording;
pub mod reflection;
pub mod shader;
pub mod texture;

pub use buffer::VertexBuffer;
pub use device::{
    BufferId, GpuDevice, ProgramId, ProgramInterface, ShaderId, ShaderStage, TextureId,
    UniformInfo, UniformKind, UniformLocation, UniformValue, VertexAttribute, VertexLayout,
};
pub use engine::WgpuDevice;
pub use error::{RenderError, RenderResult};
pub use mesh::{parse_obj, MESH_ATTRIBUTES, MESH_STRIDE};
pub use recording::{GpuCommand, RecordingDevice};
pub use shader::{ShaderBuilder, ShaderProgram, SubShader, UniformStatus};
pub use texture::{Texture, TextureImage};

/// WGSL source of the textured mesh vertex stage.
pub const TEXTURED_VERTEX_SHADER: &str = include_str!("shaders/textured.vert.wgsl");

/// WGSL source of the textured mesh fragment stage.
pub const TEXTURED_FRAGMENT_SHADER: &str = include_str!("shaders/textured.frag.wgsl");
