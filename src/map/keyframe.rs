//! KeyFrame - a retained frame that anchors tracking and mapping.

use nalgebra::Vector3;

use crate::features::FeatureSet;
use crate::geometry::SE3;

use super::types::{KeyFrameId, MapPointId};

/// A selected frame kept permanently in the map.
///
/// Once created, only two things about a KeyFrame ever change: its pose
/// (revised by bundle adjustment) and its feature-to-MapPoint association
/// table (which grows as new points are triangulated from it).
#[derive(Clone)]
pub struct KeyFrame {
    pub id: KeyFrameId,

    /// Index of the source frame in the input sequence.
    pub frame_index: u64,

    /// Camera-to-world transform (T_wc).
    pub pose: SE3,

    /// Keypoints and descriptors detected in this frame.
    pub features: FeatureSet,

    /// Feature index -> MapPoint association. `map_point_ids[i] = Some(mp)`
    /// means feature i observes map point mp.
    pub map_point_ids: Vec<Option<MapPointId>>,
}

impl KeyFrame {
    pub fn new(id: KeyFrameId, frame_index: u64, pose: SE3, features: FeatureSet) -> Self {
        let num_features = features.len();
        Self {
            id,
            frame_index,
            pose,
            features,
            map_point_ids: vec![None; num_features],
        }
    }

    /// Camera position in world coordinates.
    pub fn camera_center(&self) -> Vector3<f64> {
        self.pose.translation
    }

    pub fn num_features(&self) -> usize {
        self.features.len()
    }

    /// MapPoint observed by a feature, if any.
    pub fn map_point(&self, feature_idx: usize) -> Option<MapPointId> {
        self.map_point_ids.get(feature_idx).copied().flatten()
    }

    pub fn set_map_point(&mut self, feature_idx: usize, mp_id: MapPointId) {
        if feature_idx < self.map_point_ids.len() {
            self.map_point_ids[feature_idx] = Some(mp_id);
        }
    }

    /// Iterate (feature_idx, MapPointId) over associated features.
    pub fn observed_map_points(&self) -> impl Iterator<Item = (usize, MapPointId)> + '_ {
        self.map_point_ids
            .iter()
            .enumerate()
            .filter_map(|(i, mp)| mp.map(|id| (i, id)))
    }

    /// Number of features currently associated with a map point.
    pub fn num_tracked_points(&self) -> usize {
        self.map_point_ids.iter().filter(|mp| mp.is_some()).count()
    }
}

impl std::fmt::Debug for KeyFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyFrame")
            .field("id", &self.id)
            .field("frame_index", &self.frame_index)
            .field("features", &self.features.len())
            .field("tracked", &self.num_tracked_points())
            .finish()
    }
}
