//! Ground plane configuration and geometry.

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::transform::LocalOffset;

/// Floats per ground vertex: position (3) + texture coordinate (2).
const GROUND_VERTEX_FLOATS: usize = 5;

/// Ground plane configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroundPlaneConfig {
    /// Whether the ground plane is drawn.
    pub enabled: bool,
    /// Height of the plane (Y coordinate) in reference space.
    pub height: f32,
    /// Half the side length of the square plane, in meters.
    pub half_extent: f32,
    /// How many times the ground texture repeats across the plane.
    pub uv_repeat: f32,
}

impl GroundPlaneConfig {
    /// Model offset placing the plane at its configured height.
    pub fn offset(&self) -> LocalOffset {
        LocalOffset::IDENTITY.with_translation(Vec3::new(0.0, self.height, 0.0))
    }

    /// Interleaved `[x, y, z, u, v]` triangle list for the plane at `y = 0`.
    ///
    /// Two counter-clockwise triangles seen from above.
    pub fn vertices(&self) -> Vec<f32> {
        let e = self.half_extent;
        let r = self.uv_repeat;
        let corners = [
            [-e, 0.0, -e, 0.0, 0.0],
            [-e, 0.0, e, 0.0, r],
            [e, 0.0, e, r, r],
            [-e, 0.0, -e, 0.0, 0.0],
            [e, 0.0, e, r, r],
            [e, 0.0, -e, r, 0.0],
        ];
        let mut data = Vec::with_capacity(corners.len() * GROUND_VERTEX_FLOATS);
        for c in corners {
            data.extend_from_slice(&c);
        }
        data
    }
}

impl Default for GroundPlaneConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            height: -1.6,
            half_extent: 5.0,
            uv_repeat: 10.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Mat4;

    #[test]
    fn test_ground_plane_config_default() {
        let config = GroundPlaneConfig::default();
        assert!(config.enabled);
        assert_eq!(config.height, -1.6);
        assert_eq!(config.half_extent, 5.0);
    }

    #[test]
    fn test_ground_vertices_form_two_triangles() {
        let config = GroundPlaneConfig {
            half_extent: 2.0,
            ..GroundPlaneConfig::default()
        };
        let v = config.vertices();
        assert_eq!(v.len(), 6 * GROUND_VERTEX_FLOATS);
        assert!(v.chunks(GROUND_VERTEX_FLOATS).all(|c| c[1] == 0.0));
        assert!(v
            .chunks(GROUND_VERTEX_FLOATS)
            .all(|c| c[0].abs() == 2.0 && c[2].abs() == 2.0));
    }

    #[test]
    fn test_ground_offset_moves_plane_to_height() {
        let config = GroundPlaneConfig {
            height: -1.0,
            ..GroundPlaneConfig::default()
        };
        let m = crate::transform::compose_model(Mat4::IDENTITY, &config.offset());
        assert_eq!(m.transform_point3(Vec3::ZERO), Vec3::new(0.0, -1.0, 0.0));
    }
}
