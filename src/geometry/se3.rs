//! SE(3) rigid transforms.
//!
//! Poses are stored as camera-to-world transforms (T_wc): `transform_point`
//! maps a point from camera coordinates into world coordinates. Projection
//! code inverts to world-to-camera (T_cw) where it needs to.

use nalgebra::{Matrix3, Rotation3, UnitQuaternion, Vector3};

/// A rigid transform: rotation followed by translation.
#[derive(Clone, Debug)]
pub struct SE3 {
    pub rotation: UnitQuaternion<f64>,
    pub translation: Vector3<f64>,
}

impl SE3 {
    /// The identity transform.
    pub fn identity() -> Self {
        Self {
            rotation: UnitQuaternion::identity(),
            translation: Vector3::zeros(),
        }
    }

    /// Build from a rotation matrix and translation vector.
    pub fn from_rt(rotation: Matrix3<f64>, translation: Vector3<f64>) -> Self {
        let rotation =
            UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(rotation));
        Self {
            rotation,
            translation,
        }
    }

    /// The inverse transform: (R, t)^-1 = (R^T, -R^T t).
    pub fn inverse(&self) -> Self {
        let inv_rot = self.rotation.inverse();
        Self {
            rotation: inv_rot,
            translation: -(inv_rot * self.translation),
        }
    }

    /// Apply the transform to a point.
    pub fn transform_point(&self, p: &Vector3<f64>) -> Vector3<f64> {
        self.rotation * p + self.translation
    }

    /// Compose with another transform: `self * other`.
    pub fn compose(&self, other: &SE3) -> Self {
        Self {
            rotation: self.rotation * other.rotation,
            translation: self.rotation * other.translation + self.translation,
        }
    }

    /// Rotation matrix form.
    pub fn rotation_matrix(&self) -> Matrix3<f64> {
        self.rotation.to_rotation_matrix().into_inner()
    }

    /// Rotation angle of `self^-1 * other`, in radians.
    pub fn rotation_angle_to(&self, other: &SE3) -> f64 {
        (self.rotation.inverse() * other.rotation).angle()
    }

    /// Translation distance to another transform.
    pub fn translation_distance_to(&self, other: &SE3) -> f64 {
        (self.translation - other.translation).norm()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn inverse_roundtrip() {
        let pose = SE3 {
            rotation: UnitQuaternion::from_euler_angles(0.1, -0.2, 0.3),
            translation: Vector3::new(1.0, 2.0, -0.5),
        };
        let p = Vector3::new(0.3, -0.7, 4.0);

        let q = pose.transform_point(&p);
        let back = pose.inverse().transform_point(&q);

        assert_relative_eq!(p, back, epsilon = 1e-12);
    }

    #[test]
    fn compose_matches_sequential_application() {
        let a = SE3 {
            rotation: UnitQuaternion::from_euler_angles(0.0, 0.5, 0.0),
            translation: Vector3::new(1.0, 0.0, 0.0),
        };
        let b = SE3 {
            rotation: UnitQuaternion::from_euler_angles(0.2, 0.0, -0.1),
            translation: Vector3::new(0.0, -1.0, 2.0),
        };
        let p = Vector3::new(0.4, 0.1, 1.5);

        let composed = a.compose(&b).transform_point(&p);
        let sequential = a.transform_point(&b.transform_point(&p));

        assert_relative_eq!(composed, sequential, epsilon = 1e-12);
    }

    #[test]
    fn from_rt_preserves_rotation() {
        let rot = Rotation3::from_euler_angles(0.3, 0.1, -0.2);
        let pose = SE3::from_rt(rot.into_inner(), Vector3::zeros());

        assert_relative_eq!(
            pose.rotation_matrix(),
            rot.into_inner(),
            epsilon = 1e-12
        );
    }

    #[test]
    fn rotation_angle_between_poses() {
        let a = SE3::identity();
        let b = SE3 {
            rotation: UnitQuaternion::from_axis_angle(&Vector3::y_axis(), 0.25),
            translation: Vector3::zeros(),
        };
        assert_relative_eq!(a.rotation_angle_to(&b), 0.25, epsilon = 1e-12);
    }
}
