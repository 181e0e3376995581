//! Error types for the platform-facing side of headset.

use thiserror::Error;

use crate::platform::{ReferenceSpaceType, SessionMode};

/// Errors raised while negotiating with the host XR platform or loading options.
#[derive(Error, Debug)]
pub enum CoreError {
    /// The platform cannot run a session in the requested mode.
    #[error("session mode '{0}' is not supported by this platform")]
    PlatformUnsupported(SessionMode),

    /// The platform refused to create a session.
    #[error("session request failed: {0}")]
    SessionRequestFailed(String),

    /// The platform could not provide the requested reference space.
    #[error("reference space '{0}' is unavailable")]
    ReferenceSpaceUnavailable(ReferenceSpaceType),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A specialized Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
