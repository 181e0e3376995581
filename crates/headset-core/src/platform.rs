//! Interface to the host XR platform.
//!
//! The platform is an external collaborator: it negotiates sessions, owns the
//! display's frame pacing and hands out one pose snapshot per frame. These
//! traits describe exactly what the rendering core consumes from it.

use std::fmt;

use glam::Mat4;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Kind of session requested from the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionMode {
    /// Exclusive stereo rendering on the headset.
    #[default]
    ImmersiveVr,
    /// Exclusive rendering blended with the real world.
    ImmersiveAr,
    /// Non-exclusive rendering into a page or window.
    Inline,
}

impl fmt::Display for SessionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SessionMode::ImmersiveVr => "immersive-vr",
            SessionMode::ImmersiveAr => "immersive-ar",
            SessionMode::Inline => "inline",
        })
    }
}

/// Kind of coordinate origin requested at session start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReferenceSpaceType {
    /// Origin locked to the viewer.
    Viewer,
    /// Origin near the viewer's position at session start.
    #[default]
    Local,
    /// Like `Local`, with the origin on the floor.
    LocalFloor,
    /// Floor-level origin with known boundaries.
    BoundedFloor,
    /// Large-scale tracking without boundaries.
    Unbounded,
}

impl fmt::Display for ReferenceSpaceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ReferenceSpaceType::Viewer => "viewer",
            ReferenceSpaceType::Local => "local",
            ReferenceSpaceType::LocalFloor => "local-floor",
            ReferenceSpaceType::BoundedFloor => "bounded-floor",
            ReferenceSpaceType::Unbounded => "unbounded",
        })
    }
}

/// Coordinate origin fixed at session start.
///
/// All poses and view transforms are expressed relative to it. The value is
/// opaque to the core; only the platform interprets the id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceSpace {
    id: u32,
    kind: ReferenceSpaceType,
}

impl ReferenceSpace {
    /// Creates a reference space handle. Called by platform implementations.
    pub fn new(id: u32, kind: ReferenceSpaceType) -> Self {
        Self { id, kind }
    }

    /// Platform-assigned id.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// The kind this space was requested as.
    pub fn kind(&self) -> ReferenceSpaceType {
        self.kind
    }
}

/// Opaque tracked space of an input source (e.g. its grip).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct XrSpace(pub u32);

/// Which hand an input source is held in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Handedness {
    /// Not associated with a hand.
    #[default]
    None,
    /// Left hand.
    Left,
    /// Right hand.
    Right,
}

/// One gamepad button.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct GamepadButton {
    /// Analog value in `0.0..=1.0`.
    pub value: f32,
    /// Digital pressed state as reported by the platform.
    pub pressed: bool,
}

impl GamepadButton {
    /// Creates a button reporting `value`; `pressed` follows `value > 0`.
    pub fn with_value(value: f32) -> Self {
        Self {
            value,
            pressed: value > 0.0,
        }
    }
}

/// Gamepad state attached to an input source.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GamepadState {
    /// Buttons in platform mapping order.
    pub buttons: Vec<GamepadButton>,
    /// Axes in platform mapping order.
    pub axes: Vec<f32>,
}

impl GamepadState {
    /// Returns the analog value of the button at `index`, if present.
    pub fn button_value(&self, index: usize) -> Option<f32> {
        self.buttons.get(index).map(|b| b.value)
    }
}

/// A raw input source as delivered in the frame snapshot.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct InputSource {
    /// Hand the source is held in.
    pub handedness: Handedness,
    /// Grip space; absent for sources that cannot be held (gaze, screen).
    pub grip_space: Option<XrSpace>,
    /// Gamepad state; absent when the device exposes no buttons.
    pub gamepad: Option<GamepadState>,
}

/// Which eye a view renders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Eye {
    /// Monoscopic view.
    #[default]
    None,
    /// Left eye.
    Left,
    /// Right eye.
    Right,
}

/// One view of the viewer pose, as delivered by the platform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct XrView {
    /// Eye this view belongs to.
    pub eye: Eye,
    /// Projection matrix.
    pub projection: Mat4,
    /// Eye transform (eye space -> reference space).
    pub transform: Mat4,
}

/// The headset's pose for one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewerPose {
    /// Head transform (viewer space -> reference space).
    pub transform: Mat4,
    /// One view per eye.
    pub views: Vec<XrView>,
}

/// Pixel rectangle inside the layer framebuffer.
///
/// Origin is the top-left corner of the framebuffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ViewportRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl ViewportRect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Returns true if the rectangle covers no pixels.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Per-eye rendering parameters for the current frame.
///
/// Recomputed every frame from the viewer pose; never cached across frames.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewDescriptor {
    pub eye: Eye,
    pub projection: Mat4,
    /// Inverse of the eye transform.
    pub view: Mat4,
    pub viewport: ViewportRect,
}

impl ViewDescriptor {
    /// Builds the descriptor for `view`, placed at `viewport` in the layer.
    pub fn new(view: &XrView, viewport: ViewportRect) -> Self {
        Self {
            eye: view.eye,
            projection: view.projection,
            view: view.transform.inverse(),
            viewport,
        }
    }
}

/// Token identifying one requested frame callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameRequest(pub u64);

/// Framebuffer of the session's render layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FramebufferId(pub u32);

/// Per-frame snapshot handed to the frame callback.
pub trait FrameState {
    /// The viewer pose relative to `space`, or `None` while the headset is untracked.
    fn viewer_pose(&self, space: &ReferenceSpace) -> Option<ViewerPose>;

    /// Input sources in platform order.
    fn input_sources(&self) -> &[InputSource];

    /// The pose of `space` relative to `base`, or `None` if it cannot be computed this frame.
    fn grip_pose(&self, space: XrSpace, base: &ReferenceSpace) -> Option<Mat4>;
}

/// Event delivered by a running session.
#[derive(Debug)]
pub enum SessionEvent<F> {
    /// A previously requested frame callback fires.
    Frame {
        request: FrameRequest,
        timestamp: f64,
        frame: F,
    },
    /// The session ended (user exit, system interruption, or `end()`).
    Ended,
}

/// A running platform session.
pub trait XrSession {
    /// Snapshot type delivered with frame callbacks.
    type Frame: FrameState;

    /// Requests the coordinate origin used for the rest of the session.
    fn request_reference_space(&mut self, kind: ReferenceSpaceType) -> Result<ReferenceSpace>;

    /// Schedules one frame callback.
    fn request_animation_frame(&mut self) -> FrameRequest;

    /// Cancels a scheduled frame callback.
    fn cancel_animation_frame(&mut self, request: FrameRequest);

    /// Framebuffer of the base render layer.
    fn framebuffer(&self) -> FramebufferId;

    /// Region of the layer framebuffer that `view` renders into.
    fn viewport(&self, view: &XrView) -> ViewportRect;

    /// Returns the next pending event, if any.
    fn poll_event(&mut self) -> Option<SessionEvent<Self::Frame>>;

    /// Asks the platform to end the session. An `Ended` event follows.
    fn end(&mut self);
}

/// Entry point to the host XR platform.
pub trait XrSystem {
    /// Session type created by this platform.
    type Session: XrSession;

    /// Whether sessions of `mode` can be created.
    fn is_session_supported(&self, mode: SessionMode) -> bool;

    /// Creates a new session.
    fn request_session(&mut self, mode: SessionMode) -> Result<Self::Session>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    #[test]
    fn test_view_descriptor_inverts_eye_transform() {
        let eye = Mat4::from_translation(Vec3::new(-0.032, 1.6, 0.0));
        let view = XrView {
            eye: Eye::Left,
            projection: Mat4::perspective_rh(1.2, 1.0, 0.1, 100.0),
            transform: eye,
        };
        let desc = ViewDescriptor::new(&view, ViewportRect::new(0, 0, 640, 720));

        let p = desc.view.transform_point3(Vec3::new(-0.032, 1.6, 0.0));
        assert!(p.length() < 1e-6);
        assert_eq!(desc.eye, Eye::Left);
        assert_eq!(desc.viewport.width, 640);
    }

    #[test]
    fn test_mode_and_space_names() {
        assert_eq!(SessionMode::ImmersiveVr.to_string(), "immersive-vr");
        assert_eq!(ReferenceSpaceType::Local.to_string(), "local");
        assert_eq!(ReferenceSpaceType::LocalFloor.to_string(), "local-floor");
    }

    #[test]
    fn test_gamepad_button_value() {
        let pad = GamepadState {
            buttons: vec![GamepadButton::with_value(0.0), GamepadButton::with_value(0.7)],
            axes: vec![],
        };
        assert_eq!(pad.button_value(1), Some(0.7));
        assert_eq!(pad.button_value(4), None);
        assert!(pad.buttons[1].pressed);
    }

    #[test]
    fn test_viewport_empty() {
        assert!(ViewportRect::new(0, 0, 0, 10).is_empty());
        assert!(!ViewportRect::new(0, 0, 1, 1).is_empty());
    }
}
