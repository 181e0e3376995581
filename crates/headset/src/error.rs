//! Top-level error type.

use headset_core::CoreError;
use headset_render::RenderError;
use thiserror::Error;

/// Errors surfaced by the session lifecycle and the frame loop.
#[derive(Error, Debug)]
pub enum Error {
    /// Platform negotiation or configuration failed.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// A GPU resource operation failed.
    #[error(transparent)]
    Render(#[from] RenderError),

    /// A session is already running.
    #[error("a session is already running")]
    AlreadyRunning,

    /// The operation needs a running session.
    #[error("no session is running")]
    NotRunning,
}

/// A specialized Result type for headset operations.
pub type Result<T> = std::result::Result<T, Error>;
