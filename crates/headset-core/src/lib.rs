//! Core abstractions for headset.
//!
//! This crate provides the backend-independent pieces of the stereo rendering core:
//! - [`platform`] traits describing the host XR runtime (sessions, frames, input sources)
//! - [`PoseTracker`] turning per-frame input snapshots into indexed controller poses
//! - [`compose_model`] for placing tracked objects in the reference space
//! - [`Options`] configuration, including the hand calibration constants

// Documentation lints - internal functions don't need exhaustive panic/error docs
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
// Builder patterns return Self which doesn't need must_use
#![allow(clippy::must_use_candidate)]

pub mod error;
pub mod ground_plane;
pub mod options;
pub mod platform;
pub mod tracking;
pub mod transform;

pub use error::{CoreError, Result};
pub use ground_plane::GroundPlaneConfig;
pub use options::{AssetPaths, HandCalibration, Options};
pub use platform::{
    Eye, FrameRequest, FrameState, FramebufferId, GamepadButton, GamepadState, Handedness,
    InputSource, ReferenceSpace, ReferenceSpaceType, SessionEvent, SessionMode, ViewDescriptor,
    ViewerPose, ViewportRect, XrSession, XrSpace, XrSystem, XrView,
};
pub use tracking::{HandState, PoseTracker, TrackedController};
pub use transform::{compose_model, LocalOffset};

// Re-export glam types for convenience
pub use glam::{Mat4, Vec3, Vec4};
