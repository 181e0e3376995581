//! Configuration options for headset.

use std::path::{Path, PathBuf};

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::ground_plane::GroundPlaneConfig;
use crate::platform::{ReferenceSpaceType, SessionMode};
use crate::tracking::{DEFAULT_GRIP_BUTTON, DEFAULT_GRIP_THRESHOLD};
use crate::transform::LocalOffset;

/// Hand mesh placement for the first tracked controller.
///
/// Hand-tuned against the bundled hand mesh: the mesh is modelled as a right
/// hand, so the left one is mirrored on X and tilted the other way.
pub const LEFT_HAND_OFFSET: LocalOffset = LocalOffset {
    rotation: Vec3::new(-0.6, 0.0, 0.25),
    scale: Vec3::new(-0.05, 0.05, 0.05),
    translation: Vec3::new(0.0, -0.4, 0.8),
};

/// Hand mesh placement for the second tracked controller.
pub const RIGHT_HAND_OFFSET: LocalOffset = LocalOffset {
    rotation: Vec3::new(-0.6, 0.0, -0.25),
    scale: Vec3::new(0.05, 0.05, 0.05),
    translation: Vec3::new(0.0, -0.4, 0.8),
};

/// Per-hand model offsets, indexed by controller position (0 = left, 1 = right).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HandCalibration {
    pub left: LocalOffset,
    pub right: LocalOffset,
}

impl Default for HandCalibration {
    fn default() -> Self {
        Self {
            left: LEFT_HAND_OFFSET,
            right: RIGHT_HAND_OFFSET,
        }
    }
}

/// Optional on-disk assets replacing the built-in placeholders.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetPaths {
    /// OBJ mesh of the open hand.
    pub hand_open_mesh: Option<PathBuf>,
    /// OBJ mesh of the closed hand.
    pub hand_closed_mesh: Option<PathBuf>,
    /// Texture shared by both hands.
    pub controller_texture: Option<PathBuf>,
    /// Ground texture.
    pub ground_texture: Option<PathBuf>,
}

/// Session and rendering options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    /// Session mode requested from the platform.
    pub session_mode: SessionMode,

    /// Reference space requested at session start.
    pub reference_space: ReferenceSpaceType,

    /// Framebuffer clear color (RGBA).
    pub clear_color: [f32; 4],

    /// Gamepad button index carrying the grip value.
    pub grip_button: usize,

    /// Grip values strictly above this select the closed hand.
    pub grip_threshold: f32,

    /// Texture unit used for all drawables.
    pub texture_unit: u32,

    /// Extra shader compile attempts after a failure (0 = no retry).
    pub compile_retries: u32,

    /// Hand mesh placement.
    pub hands: HandCalibration,

    /// Ground plane.
    pub ground_plane: GroundPlaneConfig,

    /// Assets loaded in the background.
    pub assets: AssetPaths,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            session_mode: SessionMode::ImmersiveVr,
            reference_space: ReferenceSpaceType::Local,
            clear_color: [0.4, 0.7, 0.9, 1.0],
            grip_button: DEFAULT_GRIP_BUTTON,
            grip_threshold: DEFAULT_GRIP_THRESHOLD,
            texture_unit: 0,
            compile_retries: 0,
            hands: HandCalibration::default(),
            ground_plane: GroundPlaneConfig::default(),
            assets: AssetPaths::default(),
        }
    }
}

impl Options {
    /// Parses options from JSON. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Loads options from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Serializes the options to pretty-printed JSON.
    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_defaults() {
        let options = Options::default();
        assert_eq!(options.session_mode, SessionMode::ImmersiveVr);
        assert_eq!(options.reference_space, ReferenceSpaceType::Local);
        assert_eq!(options.grip_threshold, 0.5);
        assert_eq!(options.compile_retries, 0);
        assert!(options.assets.hand_open_mesh.is_none());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let options = Options::from_json_str(
            r#"{ "reference_space": "local-floor", "grip_threshold": 0.25 }"#,
        )
        .unwrap();
        assert_eq!(options.reference_space, ReferenceSpaceType::LocalFloor);
        assert_eq!(options.grip_threshold, 0.25);
        assert_eq!(options.hands, HandCalibration::default());
        assert_eq!(options.clear_color, [0.4, 0.7, 0.9, 1.0]);
    }

    #[test]
    fn test_json_round_trip_preserves_calibration() {
        let mut options = Options::default();
        options.hands.left = options.hands.left.with_translation(Vec3::new(0.1, 0.2, 0.3));
        let json = options.to_json_string().unwrap();
        assert_eq!(Options::from_json_str(&json).unwrap(), options);
    }

    #[test]
    fn test_invalid_json_is_an_error() {
        assert!(Options::from_json_str("{ not json").is_err());
    }

    #[test]
    fn test_hands_are_mirrored_on_x() {
        let hands = HandCalibration::default();
        assert!(hands.left.scale.x < 0.0);
        assert!(hands.right.scale.x > 0.0);
        assert_eq!(hands.left.rotation.z, -hands.right.rotation.z);
    }
}
