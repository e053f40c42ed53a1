//! MapPoint - a triangulated 3D landmark.

use std::collections::{HashMap, HashSet};

use nalgebra::Vector3;

use super::types::{KeyFrameId, MapPointId};

/// A 3D world point observed by two or more KeyFrames.
///
/// Invalidation is a flag, never a deletion: other entities may still hold
/// the id, so the point stays addressable but is excluded from tracking and
/// optimization.
#[derive(Clone)]
pub struct MapPoint {
    pub id: MapPointId,

    /// Position in world coordinates. Revised by bundle adjustment.
    pub position: Vector3<f64>,

    /// Observing KeyFrames mapped to the feature index in that KeyFrame.
    pub observations: HashMap<KeyFrameId, usize>,

    /// Observations whose reprojection error exceeded the outlier gate at
    /// the last audit. More than half of the observations flagged means the
    /// point is invalidated.
    pub outlier_marks: HashSet<KeyFrameId>,

    /// KeyFrame that first triangulated this point.
    pub first_kf_id: KeyFrameId,

    /// Invalid flag; flagged points are skipped everywhere.
    pub is_bad: bool,
}

impl MapPoint {
    pub fn new(id: MapPointId, position: Vector3<f64>, first_kf_id: KeyFrameId) -> Self {
        Self {
            id,
            position,
            observations: HashMap::new(),
            outlier_marks: HashSet::new(),
            first_kf_id,
            is_bad: false,
        }
    }

    pub fn add_observation(&mut self, kf_id: KeyFrameId, feature_idx: usize) {
        self.observations.insert(kf_id, feature_idx);
    }

    pub fn num_observations(&self) -> usize {
        self.observations.len()
    }

    /// Record that this point's observation in `kf_id` scored as an outlier.
    pub fn mark_outlier(&mut self, kf_id: KeyFrameId) {
        if self.observations.contains_key(&kf_id) {
            self.outlier_marks.insert(kf_id);
        }
    }

    /// Clear the outlier mark for an observation that scores as an inlier
    /// again.
    pub fn clear_outlier(&mut self, kf_id: KeyFrameId) {
        self.outlier_marks.remove(&kf_id);
    }

    /// More than half of the observations are flagged as outliers.
    pub fn is_majority_outlier(&self) -> bool {
        !self.observations.is_empty() && 2 * self.outlier_marks.len() > self.observations.len()
    }

    pub fn set_bad(&mut self) {
        self.is_bad = true;
    }
}

impl std::fmt::Debug for MapPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MapPoint")
            .field("id", &self.id)
            .field("position", &self.position)
            .field("observations", &self.observations.len())
            .field("outlier_marks", &self.outlier_marks.len())
            .field("is_bad", &self.is_bad)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point() -> MapPoint {
        MapPoint::new(MapPointId(0), Vector3::new(1.0, 2.0, 3.0), KeyFrameId(0))
    }

    #[test]
    fn majority_outlier_needs_more_than_half() {
        let mut mp = point();
        mp.add_observation(KeyFrameId(0), 0);
        mp.add_observation(KeyFrameId(1), 3);
        mp.add_observation(KeyFrameId(2), 7);

        mp.mark_outlier(KeyFrameId(0));
        assert!(!mp.is_majority_outlier());

        mp.mark_outlier(KeyFrameId(1));
        assert!(mp.is_majority_outlier());

        mp.clear_outlier(KeyFrameId(1));
        assert!(!mp.is_majority_outlier());
    }

    #[test]
    fn outlier_mark_requires_an_observation() {
        let mut mp = point();
        mp.add_observation(KeyFrameId(0), 0);
        mp.mark_outlier(KeyFrameId(5));
        assert!(mp.outlier_marks.is_empty());
    }
}
