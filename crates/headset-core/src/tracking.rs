//! Controller pose tracking.
//!
//! Controllers carry no identity across frames. Index `i` is simply the
//! `i`-th input source that had a grip pose this frame; if the platform
//! reorders its sources, the index-to-device mapping changes with it.

use glam::Mat4;

use crate::platform::{FrameState, Handedness, InputSource, ReferenceSpace};

/// Default gamepad button carrying the grip (squeeze) value.
pub const DEFAULT_GRIP_BUTTON: usize = 1;

/// Default grip threshold. The grip is closed only when strictly above it.
pub const DEFAULT_GRIP_THRESHOLD: f32 = 0.5;

/// Visual state selected from the grip value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandState {
    /// Grip at or below the threshold.
    Open,
    /// Grip strictly above the threshold.
    Closed,
}

impl HandState {
    /// Classifies a grip value. `value > threshold` is closed.
    pub fn from_grip(value: f32, threshold: f32) -> Self {
        if value > threshold {
            HandState::Closed
        } else {
            HandState::Open
        }
    }
}

/// A controller with a valid grip pose this frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackedController {
    /// Grip space -> reference space.
    pub pose: Mat4,
    pub handedness: Handedness,
    /// Grip value in `0.0..=1.0`.
    pub grip: f32,
}

impl TrackedController {
    /// Hand state for the given threshold.
    pub fn hand_state(&self, threshold: f32) -> HandState {
        HandState::from_grip(self.grip, threshold)
    }
}

/// Rebuilds the controller list from each frame's input snapshot.
#[derive(Debug, Clone)]
pub struct PoseTracker {
    grip_button: usize,
    controllers: Vec<TrackedController>,
}

impl PoseTracker {
    /// Creates a tracker reading the grip from `grip_button`.
    pub fn new(grip_button: usize) -> Self {
        Self {
            grip_button,
            controllers: Vec::new(),
        }
    }

    /// Replaces the controller list with the poses available in `frame`.
    ///
    /// Sources without a grip space, or whose grip pose cannot be computed
    /// this frame, are skipped. Returns the new list.
    pub fn update<F: FrameState + ?Sized>(
        &mut self,
        frame: &F,
        sources: &[InputSource],
        space: &ReferenceSpace,
    ) -> &[TrackedController] {
        self.controllers.clear();
        for source in sources {
            let Some(grip_space) = source.grip_space else {
                continue;
            };
            let Some(pose) = frame.grip_pose(grip_space, space) else {
                log::trace!("{:?} controller untracked this frame", source.handedness);
                continue;
            };
            let grip = source
                .gamepad
                .as_ref()
                .and_then(|pad| pad.button_value(self.grip_button))
                .unwrap_or(0.0)
                .clamp(0.0, 1.0);
            self.controllers.push(TrackedController {
                pose,
                handedness: source.handedness,
                grip,
            });
        }
        &self.controllers
    }

    /// Controllers from the last update.
    pub fn controllers(&self) -> &[TrackedController] {
        &self.controllers
    }

    /// Controller at positional index `index`, if tracked this frame.
    pub fn get(&self, index: usize) -> Option<&TrackedController> {
        self.controllers.get(index)
    }

    /// Number of tracked controllers.
    pub fn len(&self) -> usize {
        self.controllers.len()
    }

    /// Whether no controller is tracked.
    pub fn is_empty(&self) -> bool {
        self.controllers.is_empty()
    }
}

impl Default for PoseTracker {
    fn default() -> Self {
        Self::new(DEFAULT_GRIP_BUTTON)
    }
}
