//! headset: a real-time stereo rendering core for head-mounted displays.
//!
//! Every frame the core takes the platform's pose snapshot, derives one view
//! per eye, and issues the draw calls for the tracked hands and the ground
//! plane. It is split into three crates:
//!
//! - `headset-core`: platform traits, pose tracking, model matrix composition
//!   and options
//! - `headset-render`: the [`GpuDevice`] abstraction, resource wrappers and
//!   the two device backends
//! - `headset` (this crate): session lifecycle, frame scheduling and the
//!   frame renderer
//!
//! # Quick Start
//!
//! ```no_run
//! use headset::*;
//!
//! fn main() -> headset::Result<()> {
//!     init_logging();
//!
//!     let system = SimulatedSystem::new(1280, 720);
//!     let platform = system.handle();
//!     let mut device = RecordingDevice::new();
//!     let mut app = XrApp::new(system, Options::default());
//!
//!     app.toggle(&mut device)?;
//!     platform.set_controllers(&[
//!         SimController::tracked(Handedness::Left, 0.0),
//!         SimController::tracked(Handedness::Right, 0.8),
//!     ]);
//!     platform.fire_frame(0.0);
//!     app.pump(&mut device)?;
//!
//!     app.toggle(&mut device)?;
//!     Ok(())
//! }
//! ```
//!
//! # Devices
//!
//! [`RecordingDevice`] validates every call and keeps a command log; it needs
//! no GPU. [`WgpuDevice`] renders into an offscreen colour and depth target
//! sized to the stereo layer; see [`headless_device`].

// Documentation lints - internal functions don't need exhaustive panic/error docs
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]

pub mod app;
pub mod assets;
pub mod error;
pub mod renderer;
pub mod scene;
pub mod scheduler;
pub mod session;
pub mod simulated;

pub use app::{AppState, XrApp};
pub use assets::{AssetSlot, PendingAssets};
pub use error::{Error, Result};
pub use renderer::{FramePhase, FrameRenderer, FrameStats};
pub use scene::{default_drawables, Anchor, Drawable, MeshRef, SceneResources, TextureRef};
pub use scheduler::FrameScheduler;
pub use session::RenderSession;
pub use simulated::{
    SimController, SimulatedFrame, SimulatedHandle, SimulatedSession, SimulatedSystem,
};

pub use headset_core::{
    compose_model, CoreError, Eye, FrameRequest, FrameState, FramebufferId, HandState,
    Handedness, LocalOffset, Options, PoseTracker, ReferenceSpace, ReferenceSpaceType,
    SessionEvent, SessionMode, TrackedController, ViewDescriptor, ViewerPose, ViewportRect,
    XrSession, XrSystem,
};
pub use headset_render::{
    GpuCommand, GpuDevice, RecordingDevice, RenderError, ShaderProgram, Texture, VertexBuffer,
    WgpuDevice,
};

// Re-export glam types for convenience
pub use glam::{Mat4, Vec3};

/// Initializes `env_logger` from `RUST_LOG`. Later calls are no-ops.
pub fn init_logging() {
    let _ = env_logger::try_init();
}

/// Creates an offscreen wgpu device rendering into a `width x height` layer.
///
/// Blocks until the adapter and device are ready.
pub fn headless_device(width: u32, height: u32) -> Result<WgpuDevice> {
    use pollster::FutureExt;

    let device = WgpuDevice::new_headless(width, height).block_on()?;
    log::info!("headless wgpu device ready ({width}x{height})");
    Ok(device)
}
