//! Model matrix composition for tracked and static drawables.

use glam::{Mat4, Vec3};
use serde::{Deserialize, Serialize};

/// Static offset applied in an object's local frame before it is placed in
/// reference space.
///
/// Rotations are in radians and always applied in X, then Y, then Z order.
/// Callers needing another order must pre-compose the base pose.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocalOffset {
    /// Rotation angles around X, Y and Z.
    pub rotation: Vec3,
    /// Per-axis scale. Negative components mirror the mesh.
    pub scale: Vec3,
    /// Translation in the scaled, rotated local frame.
    pub translation: Vec3,
}

impl LocalOffset {
    /// The offset that leaves the base pose untouched.
    pub const IDENTITY: Self = Self {
        rotation: Vec3::ZERO,
        scale: Vec3::ONE,
        translation: Vec3::ZERO,
    };

    /// Sets the rotation angles (radians).
    #[must_use]
    pub fn with_rotation(mut self, x: f32, y: f32, z: f32) -> Self {
        self.rotation = Vec3::new(x, y, z);
        self
    }

    /// Sets the scale.
    #[must_use]
    pub fn with_scale(mut self, scale: Vec3) -> Self {
        self.scale = scale;
        self
    }

    /// Sets the translation.
    #[must_use]
    pub fn with_translation(mut self, translation: Vec3) -> Self {
        self.translation = translation;
        self
    }

    /// The local matrix `Rx · Ry · Rz · S · T`.
    pub fn local_matrix(&self) -> Mat4 {
        Mat4::from_rotation_x(self.rotation.x)
            * Mat4::from_rotation_y(self.rotation.y)
            * Mat4::from_rotation_z(self.rotation.z)
            * Mat4::from_scale(self.scale)
            * Mat4::from_translation(self.translation)
    }
}

impl Default for LocalOffset {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Builds a model matrix: `base · Rx · Ry · Rz · S · T`.
///
/// The offset is applied in the object's local frame, then `base` places it in
/// reference space. No orthonormalization is performed on the result.
pub fn compose_model(base: Mat4, offset: &LocalOffset) -> Mat4 {
    base * offset.local_matrix()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::f32::consts::FRAC_PI_2;

    fn approx_eq(a: Vec3, b: Vec3) -> bool {
        (a - b).length() < 1e-5
    }

    #[test]
    fn test_identity_offset_returns_base_exactly() {
        let base = Mat4::from_cols_array(&[
            0.0, 1.0, 0.0, 0.0, -1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.3, 1.2, -0.5, 1.0,
        ]);
        assert_eq!(compose_model(base, &LocalOffset::IDENTITY), base);
        assert_eq!(compose_model(Mat4::IDENTITY, &LocalOffset::default()), Mat4::IDENTITY);
    }

    #[test]
    fn test_translation_is_applied_in_local_frame() {
        // Rotating 90 degrees about Y maps local +X onto -Z.
        let offset = LocalOffset::IDENTITY
            .with_rotation(0.0, FRAC_PI_2, 0.0)
            .with_translation(Vec3::X);
        let m = compose_model(Mat4::IDENTITY, &offset);
        assert!(approx_eq(m.transform_point3(Vec3::ZERO), Vec3::NEG_Z));
    }

    #[test]
    fn test_scale_applies_before_base_translation() {
        let base = Mat4::from_translation(Vec3::new(0.0, 1.0, 0.0));
        let offset = LocalOffset::IDENTITY.with_scale(Vec3::new(-2.0, 2.0, 2.0));
        let m = compose_model(base, &offset);
        assert!(approx_eq(
            m.transform_point3(Vec3::new(1.0, 0.0, 0.0)),
            Vec3::new(-2.0, 1.0, 0.0)
        ));
    }

    #[test]
    fn test_rotation_order_is_x_then_y_then_z() {
        let offset = LocalOffset::IDENTITY.with_rotation(0.3, -0.7, 1.1);
        let expected = Mat4::from_rotation_x(0.3)
            * Mat4::from_rotation_y(-0.7)
            * Mat4::from_rotation_z(1.1);
        assert_eq!(offset.local_matrix(), expected);
    }

    fn finite() -> impl Strategy<Value = f32> {
        -10.0f32..10.0
    }

    fn arb_mat4() -> impl Strategy<Value = Mat4> {
        proptest::collection::vec(finite(), 16)
            .prop_map(|v| Mat4::from_cols_slice(&v))
    }

    fn arb_offset() -> impl Strategy<Value = LocalOffset> {
        (
            (-3.2f32..3.2, -3.2f32..3.2, -3.2f32..3.2),
            (finite(), finite(), finite()),
            (finite(), finite(), finite()),
        )
            .prop_map(|(r, s, t)| LocalOffset {
                rotation: Vec3::new(r.0, r.1, r.2),
                scale: Vec3::new(s.0, s.1, s.2),
                translation: Vec3::new(t.0, t.1, t.2),
            })
    }

    proptest! {
        #[test]
        fn prop_identity_offset_is_exact(base in arb_mat4()) {
            prop_assert_eq!(compose_model(base, &LocalOffset::IDENTITY), base);
        }

        #[test]
        fn prop_compose_factors_through_base(base in arb_mat4(), offset in arb_offset()) {
            let direct = compose_model(base, &offset);
            let factored = base * compose_model(Mat4::IDENTITY, &offset);
            prop_assert_eq!(direct, factored);
        }
    }
}
