//! Rendering error types.

use thiserror::Error;

use crate::device::{ShaderStage, UniformKind};

/// Errors that can occur in the GPU resource layer.
#[derive(Error, Debug)]
pub enum RenderError {
    /// The device refused to allocate a resource.
    #[error("device resource allocation failed: {0}")]
    DeviceResource(String),

    /// Vertex data length is not a multiple of the declared stride.
    #[error("vertex data length {len} is not a multiple of the layout stride {stride}")]
    LayoutMismatch { len: usize, stride: usize },

    /// Vertex data was uploaded or drawn before a layout was declared.
    #[error("vertex layout must be declared before uploading or drawing")]
    LayoutNotDeclared,

    /// The declared vertex layout is malformed.
    #[error("invalid vertex layout: {0}")]
    InvalidLayout(String),

    /// A resource handle was used after it was released (or never existed).
    #[error("{kind} {id} used after release")]
    UseAfterFree { kind: &'static str, id: u32 },

    /// A shader stage failed to compile. `log` is the compiler output.
    #[error("{stage} shader compilation failed:\n{log}")]
    Compile { stage: ShaderStage, log: String },

    /// Linking a vertex and fragment stage failed.
    #[error("program link failed:\n{log}")]
    Link { log: String },

    /// A uniform was set with a value of the wrong kind.
    #[error("uniform '{name}' expects {expected}, got {actual}")]
    UniformTypeMismatch {
        name: String,
        expected: UniformKind,
        actual: UniformKind,
    },

    /// A call was made in a state that does not allow it.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Raw pixel data does not match the stated dimensions.
    #[error("image data has {len} bytes, expected {width}x{height} RGBA ({expected} bytes)")]
    ImageSize {
        width: u32,
        height: u32,
        len: usize,
        expected: usize,
    },

    /// Image decoding failed.
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    /// Mesh parsing failed.
    #[error("mesh error: {0}")]
    Mesh(String),

    /// Failed to create wgpu adapter.
    #[error("failed to create graphics adapter")]
    AdapterCreationFailed,

    /// Failed to create wgpu device.
    #[error("failed to create graphics device: {0}")]
    DeviceCreationFailed(#[from] wgpu::RequestDeviceError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A specialized Result type for rendering operations.
pub type RenderResult<T> = std::result::Result<T, RenderError>;
