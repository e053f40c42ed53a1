//! Constant velocity motion model.

use crate::geometry::SE3;

/// Predicts the next camera pose from the motion between the previous two
/// frames. Used as the prior for absolute pose solving and to scale the
/// 2D-2D fallback translation.
pub struct MotionModel {
    prev_pose: Option<SE3>,
    /// Relative motion between the last two poses, expressed in the
    /// previous camera frame.
    delta: SE3,
    has_delta: bool,
}

impl MotionModel {
    pub fn new() -> Self {
        Self {
            prev_pose: None,
            delta: SE3::identity(),
            has_delta: false,
        }
    }

    /// Feed the pose of a successfully tracked frame.
    pub fn update(&mut self, pose: &SE3) {
        if let Some(ref prev) = self.prev_pose {
            self.delta = prev.inverse().compose(pose);
            self.has_delta = true;
        }
        self.prev_pose = Some(pose.clone());
    }

    /// Predicted pose of the next frame, if enough history exists.
    pub fn predict(&self) -> Option<SE3> {
        let prev = self.prev_pose.as_ref()?;
        if !self.has_delta {
            return Some(prev.clone());
        }
        Some(prev.compose(&self.delta))
    }

    /// Magnitude of the last inter-frame translation. Zero until two poses
    /// have been observed.
    pub fn speed(&self) -> f64 {
        if self.has_delta {
            self.delta.translation.norm()
        } else {
            0.0
        }
    }

    pub fn reset(&mut self) {
        self.prev_pose = None;
        self.delta = SE3::identity();
        self.has_delta = false;
    }
}

impl Default for MotionModel {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Vector3;

    #[test]
    fn predicts_constant_velocity() {
        let mut model = MotionModel::new();

        let mut pose = SE3::identity();
        model.update(&pose);
        pose.translation = Vector3::new(0.1, 0.0, 0.0);
        model.update(&pose);

        let predicted = model.predict().unwrap();
        assert_relative_eq!(
            predicted.translation,
            Vector3::new(0.2, 0.0, 0.0),
            epsilon = 1e-12
        );
        assert_relative_eq!(model.speed(), 0.1, epsilon = 1e-12);
    }

    #[test]
    fn single_pose_predicts_itself() {
        let mut model = MotionModel::new();
        let pose = SE3 {
            rotation: nalgebra::UnitQuaternion::identity(),
            translation: Vector3::new(1.0, 2.0, 3.0),
        };
        model.update(&pose);

        let predicted = model.predict().unwrap();
        assert_relative_eq!(predicted.translation, pose.translation, epsilon = 1e-12);
        assert_eq!(model.speed(), 0.0);
    }
}
