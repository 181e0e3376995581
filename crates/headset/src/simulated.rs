//! A scriptable in-process XR platform.
//!
//! [`SimulatedSystem`] implements the platform traits without hardware. Tests
//! and demos drive it through a [`SimulatedHandle`]: set the viewer pose and
//! input sources, fire frame callbacks, end the session from the "platform"
//! side, and inspect which frames were requested or cancelled.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use glam::{Mat4, Vec3};
use headset_core::{
    CoreError, Eye, FrameRequest, FrameState, FramebufferId, GamepadButton, GamepadState,
    Handedness, InputSource, ReferenceSpace, ReferenceSpaceType, SessionEvent, SessionMode,
    ViewerPose, ViewportRect, XrSession, XrSpace, XrSystem, XrView,
};

/// Interpupillary distance of the simulated headset, in meters.
pub const SIMULATED_IPD: f32 = 0.064;

/// Eye height of the simulated viewer above the reference origin.
pub const SIMULATED_EYE_HEIGHT: f32 = 1.6;

/// A scripted input source.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimController {
    pub handedness: Handedness,
    /// Grip pose; `None` while the controller is untracked.
    pub pose: Option<Mat4>,
    /// Value of the grip button; `None` for a source without a gamepad.
    pub grip: Option<f32>,
    /// Whether the source has a grip space at all.
    pub grip_space: bool,
}

impl SimController {
    /// A tracked controller held at a default position for its hand.
    pub fn tracked(handedness: Handedness, grip: f32) -> Self {
        let x = match handedness {
            Handedness::Left => -0.2,
            Handedness::Right => 0.2,
            Handedness::None => 0.0,
        };
        Self {
            handedness,
            pose: Some(Mat4::from_translation(Vec3::new(x, 1.2, -0.4))),
            grip: Some(grip),
            grip_space: true,
        }
    }

    /// A controller whose grip pose cannot be computed this frame.
    pub fn untracked(handedness: Handedness) -> Self {
        Self {
            pose: None,
            ..Self::tracked(handedness, 0.0)
        }
    }

    /// A source without a grip space, like gaze or a screen tap.
    pub fn gaze() -> Self {
        Self {
            handedness: Handedness::None,
            pose: None,
            grip: None,
            grip_space: false,
        }
    }

    #[must_use]
    pub fn with_pose(mut self, pose: Mat4) -> Self {
        self.pose = Some(pose);
        self
    }
}

/// Snapshot delivered with a simulated frame callback.
#[derive(Debug, Clone, Default)]
pub struct SimulatedFrame {
    viewer_pose: Option<ViewerPose>,
    sources: Vec<InputSource>,
    grip_poses: HashMap<u32, Mat4>,
}

impl FrameState for SimulatedFrame {
    fn viewer_pose(&self, _space: &ReferenceSpace) -> Option<ViewerPose> {
        self.viewer_pose.clone()
    }

    fn input_sources(&self) -> &[InputSource] {
        &self.sources
    }

    fn grip_pose(&self, space: XrSpace, _base: &ReferenceSpace) -> Option<Mat4> {
        self.grip_poses.get(&space.0).copied()
    }
}

#[derive(Debug)]
struct SimState {
    width: u32,
    height: u32,
    supported: bool,
    space_available: bool,
    fail_session_requests: bool,
    viewer_pose: Option<ViewerPose>,
    controllers: Vec<SimController>,
    next_request: u64,
    next_space: u32,
    requested: Vec<FrameRequest>,
    pending: VecDeque<FrameRequest>,
    cancelled: Vec<FrameRequest>,
    events: VecDeque<SessionEvent<SimulatedFrame>>,
    sessions_created: usize,
    session_active: bool,
}

impl SimState {
    fn snapshot(&self) -> SimulatedFrame {
        let mut sources = Vec::with_capacity(self.controllers.len());
        let mut grip_poses = HashMap::new();
        for (id, controller) in (1u32..).zip(&self.controllers) {
            let grip_space = controller.grip_space.then_some(XrSpace(id));
            if let (true, Some(pose)) = (controller.grip_space, controller.pose) {
                grip_poses.insert(id, pose);
            }
            sources.push(InputSource {
                handedness: controller.handedness,
                grip_space,
                gamepad: controller.grip.map(|grip| GamepadState {
                    buttons: vec![GamepadButton::default(), GamepadButton::with_value(grip)],
                    axes: vec![0.0; 2],
                }),
            });
        }
        SimulatedFrame {
            viewer_pose: self.viewer_pose.clone(),
            sources,
            grip_poses,
        }
    }

    fn push_frame(&mut self, request: FrameRequest, timestamp: f64) {
        let frame = self.snapshot();
        self.events.push_back(SessionEvent::Frame {
            request,
            timestamp,
            frame,
        });
    }

    fn end(&mut self) {
        if self.session_active {
            self.session_active = false;
            self.pending.clear();
            self.events.push_back(SessionEvent::Ended);
        }
    }
}

/// Builds a two-view pose for a viewer at `head`, rendering into a
/// `width x height` side-by-side layer.
pub fn stereo_pose(head: Mat4, width: u32, height: u32) -> ViewerPose {
    #[allow(clippy::cast_precision_loss)]
    let aspect = (width / 2).max(1) as f32 / height.max(1) as f32;
    let projection = Mat4::perspective_rh(80f32.to_radians(), aspect, 0.1, 100.0);
    let views = [(Eye::Left, -0.5), (Eye::Right, 0.5)]
        .into_iter()
        .map(|(eye, side)| XrView {
            eye,
            projection,
            transform: head * Mat4::from_translation(Vec3::new(side * SIMULATED_IPD, 0.0, 0.0)),
        })
        .collect();
    ViewerPose {
        transform: head,
        views,
    }
}

/// Simulated platform entry point.
#[derive(Debug, Clone)]
pub struct SimulatedSystem {
    state: Rc<RefCell<SimState>>,
}

impl SimulatedSystem {
    /// A platform supporting immersive sessions with a `width x height` layer.
    ///
    /// The viewer starts tracked at eye height with no input sources.
    pub fn new(width: u32, height: u32) -> Self {
        let head = Mat4::from_translation(Vec3::new(0.0, SIMULATED_EYE_HEIGHT, 0.0));
        Self {
            state: Rc::new(RefCell::new(SimState {
                width,
                height,
                supported: true,
                space_available: true,
                fail_session_requests: false,
                viewer_pose: Some(stereo_pose(head, width, height)),
                controllers: Vec::new(),
                next_request: 0,
                next_space: 0,
                requested: Vec::new(),
                pending: VecDeque::new(),
                cancelled: Vec::new(),
                events: VecDeque::new(),
                sessions_created: 0,
                session_active: false,
            })),
        }
    }

    /// A platform without immersive support.
    pub fn unsupported() -> Self {
        let system = Self::new(1, 1);
        system.state.borrow_mut().supported = false;
        system
    }

    /// Reference space requests will fail.
    #[must_use]
    pub fn with_unavailable_space(self) -> Self {
        self.state.borrow_mut().space_available = false;
        self
    }

    /// Session requests will fail.
    #[must_use]
    pub fn with_failing_session_requests(self) -> Self {
        self.state.borrow_mut().fail_session_requests = true;
        self
    }

    /// A handle for scripting the platform.
    pub fn handle(&self) -> SimulatedHandle {
        SimulatedHandle {
            state: Rc::clone(&self.state),
        }
    }
}

impl XrSystem for SimulatedSystem {
    type Session = SimulatedSession;

    fn is_session_supported(&self, mode: SessionMode) -> bool {
        mode == SessionMode::Inline || self.state.borrow().supported
    }

    fn request_session(&mut self, mode: SessionMode) -> headset_core::Result<SimulatedSession> {
        let mut state = self.state.borrow_mut();
        if !(mode == SessionMode::Inline || state.supported) {
            return Err(CoreError::PlatformUnsupported(mode));
        }
        if state.fail_session_requests {
            return Err(CoreError::SessionRequestFailed(
                "simulated platform refused the session".into(),
            ));
        }
        state.sessions_created += 1;
        state.session_active = true;
        state.events.clear();
        Ok(SimulatedSession {
            state: Rc::clone(&self.state),
        })
    }
}

/// A running simulated session.
#[derive(Debug)]
pub struct SimulatedSession {
    state: Rc<RefCell<SimState>>,
}

impl XrSession for SimulatedSession {
    type Frame = SimulatedFrame;

    fn request_reference_space(
        &mut self,
        kind: ReferenceSpaceType,
    ) -> headset_core::Result<ReferenceSpace> {
        let mut state = self.state.borrow_mut();
        if !state.space_available {
            return Err(CoreError::ReferenceSpaceUnavailable(kind));
        }
        state.next_space += 1;
        Ok(ReferenceSpace::new(state.next_space, kind))
    }

    fn request_animation_frame(&mut self) -> FrameRequest {
        let mut state = self.state.borrow_mut();
        state.next_request += 1;
        let request = FrameRequest(state.next_request);
        state.requested.push(request);
        state.pending.push_back(request);
        request
    }

    fn cancel_animation_frame(&mut self, request: FrameRequest) {
        let mut state = self.state.borrow_mut();
        state.pending.retain(|pending| *pending != request);
        state.cancelled.push(request);
    }

    fn framebuffer(&self) -> FramebufferId {
        FramebufferId(1)
    }

    /// Side-by-side layout: left eye on the left half.
    fn viewport(&self, view: &XrView) -> ViewportRect {
        let state = self.state.borrow();
        let half = state.width / 2;
        match view.eye {
            Eye::Left => ViewportRect::new(0, 0, half, state.height),
            Eye::Right => ViewportRect::new(half, 0, state.width - half, state.height),
            Eye::None => ViewportRect::new(0, 0, state.width, state.height),
        }
    }

    fn poll_event(&mut self) -> Option<SessionEvent<SimulatedFrame>> {
        self.state.borrow_mut().events.pop_front()
    }

    fn end(&mut self) {
        self.state.borrow_mut().end();
    }
}

/// Scripting and inspection side of a [`SimulatedSystem`].
#[derive(Debug, Clone)]
pub struct SimulatedHandle {
    state: Rc<RefCell<SimState>>,
}

impl SimulatedHandle {
    /// Sets the viewer pose delivered with later frames. `None` = untracked.
    pub fn set_viewer_pose(&self, pose: Option<ViewerPose>) {
        self.state.borrow_mut().viewer_pose = pose;
    }

    /// Moves the viewer to `head`, keeping the stereo layout.
    pub fn set_head(&self, head: Mat4) {
        let mut state = self.state.borrow_mut();
        state.viewer_pose = Some(stereo_pose(head, state.width, state.height));
    }

    /// Replaces the input sources, in platform order.
    pub fn set_controllers(&self, controllers: &[SimController]) {
        self.state.borrow_mut().controllers = controllers.to_vec();
    }

    /// The snapshot the next frame would carry.
    pub fn snapshot(&self) -> SimulatedFrame {
        self.state.borrow().snapshot()
    }

    /// Fires the oldest outstanding frame request. `None` if nothing is pending.
    pub fn fire_frame(&self, timestamp: f64) -> Option<FrameRequest> {
        let mut state = self.state.borrow_mut();
        let request = state.pending.pop_front()?;
        state.push_frame(request, timestamp);
        Some(request)
    }

    /// Delivers a callback for `request` regardless of whether it is pending,
    /// as a platform racing a cancel would.
    pub fn fire_request(&self, request: FrameRequest, timestamp: f64) {
        let mut state = self.state.borrow_mut();
        state.pending.retain(|pending| *pending != request);
        state.push_frame(request, timestamp);
    }

    /// Ends the session from the platform side (user exit, interruption).
    pub fn end_session(&self) {
        self.state.borrow_mut().end();
    }

    /// Every frame request made so far, in order.
    pub fn requested_frames(&self) -> Vec<FrameRequest> {
        self.state.borrow().requested.clone()
    }

    /// Requests neither fired nor cancelled.
    pub fn pending_requests(&self) -> Vec<FrameRequest> {
        self.state.borrow().pending.iter().copied().collect()
    }

    pub fn cancelled_requests(&self) -> Vec<FrameRequest> {
        self.state.borrow().cancelled.clone()
    }

    /// Whether a session is currently running on the platform.
    pub fn session_active(&self) -> bool {
        self.state.borrow().session_active
    }

    pub fn sessions_created(&self) -> usize {
        self.state.borrow().sessions_created
    }

    /// Events queued but not yet polled.
    pub fn queued_events(&self) -> usize {
        self.state.borrow().events.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local() -> ReferenceSpace {
        ReferenceSpace::new(1, ReferenceSpaceType::Local)
    }

    #[test]
    fn test_stereo_views_split_layer() {
        let mut system = SimulatedSystem::new(100, 50);
        let session = system.request_session(SessionMode::ImmersiveVr).unwrap();
        let pose = system.handle().snapshot().viewer_pose(&local()).unwrap();
        assert_eq!(pose.views.len(), 2);
        assert_eq!(session.viewport(&pose.views[0]), ViewportRect::new(0, 0, 50, 50));
        assert_eq!(session.viewport(&pose.views[1]), ViewportRect::new(50, 0, 50, 50));
        let left = pose.views[0].transform.transform_point3(Vec3::ZERO);
        let right = pose.views[1].transform.transform_point3(Vec3::ZERO);
        assert!(((right - left).length() - SIMULATED_IPD).abs() < 1e-6);
    }

    #[test]
    fn test_snapshot_grip_spaces() {
        let system = SimulatedSystem::new(64, 32);
        let handle = system.handle();
        handle.set_controllers(&[
            SimController::gaze(),
            SimController::tracked(Handedness::Left, 0.1),
            SimController::untracked(Handedness::Right),
        ]);
        let frame = handle.snapshot();
        assert_eq!(frame.input_sources().len(), 3);
        assert!(frame.input_sources()[0].grip_space.is_none());
        let left = frame.input_sources()[1].grip_space.unwrap();
        let right = frame.input_sources()[2].grip_space.unwrap();
        assert!(frame.grip_pose(left, &local()).is_some());
        assert!(frame.grip_pose(right, &local()).is_none());
    }

    #[test]
    fn test_unsupported_platform_refuses_sessions() {
        let mut system = SimulatedSystem::unsupported();
        assert!(!system.is_session_supported(SessionMode::ImmersiveVr));
        assert!(system.is_session_supported(SessionMode::Inline));
        assert!(matches!(
            system.request_session(SessionMode::ImmersiveVr),
            Err(CoreError::PlatformUnsupported(_))
        ));
    }

    #[test]
    fn test_end_queues_one_ended_event() {
        let mut system = SimulatedSystem::new(64, 32);
        let handle = system.handle();
        let mut session = system.request_session(SessionMode::ImmersiveVr).unwrap();
        session.request_animation_frame();
        session.end();
        session.end();
        assert!(handle.pending_requests().is_empty());
        assert!(matches!(session.poll_event(), Some(SessionEvent::Ended)));
        assert!(session.poll_event().is_none());
        assert!(!handle.session_active());
    }

    #[test]
    fn test_unavailable_space() {
        let mut system = SimulatedSystem::new(64, 32).with_unavailable_space();
        let mut session = system.request_session(SessionMode::ImmersiveVr).unwrap();
        assert!(matches!(
            session.request_reference_space(ReferenceSpaceType::Local),
            Err(CoreError::ReferenceSpaceUnavailable(ReferenceSpaceType::Local))
        ));
    }
}
