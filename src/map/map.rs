//! Map - the arena of KeyFrames and MapPoints.
//!
//! Owns both entity kinds, hands out stable ids, and keeps the two-way
//! KeyFrame <-> MapPoint associations consistent. KeyFrames are permanent:
//! there is no removal operation. MapPoints are invalidated in place and
//! excluded from every query.

use std::collections::{HashMap, HashSet};

use nalgebra::{Vector2, Vector3};

use crate::error::{Result, SlamError};
use crate::features::FeatureSet;
use crate::geometry::SE3;

use super::keyframe::KeyFrame;
use super::map_point::MapPoint;
use super::types::{KeyFrameId, MapPointId};

/// One observation row of a snapshot: a keyframe saw a map point at a pixel.
#[derive(Debug, Clone)]
pub struct SnapshotObservation {
    pub kf_id: KeyFrameId,
    pub mp_id: MapPointId,
    pub pixel: Vector2<f64>,
}

/// Copy-on-read view of the map consumed by bundle adjustment. Built under
/// the read lock; the solve runs on it without touching the map.
#[derive(Debug, Clone)]
pub struct WindowSnapshot {
    /// The optimized keyframes, temporal order, oldest first. The oldest one
    /// is the gauge anchor and stays fixed.
    pub window: Vec<(KeyFrameId, SE3)>,
    /// Out-of-window keyframes that observe window points; held fixed.
    pub fixed: Vec<(KeyFrameId, SE3)>,
    /// Live map points observed by the window.
    pub points: Vec<(MapPointId, Vector3<f64>)>,
    pub observations: Vec<SnapshotObservation>,
}

pub struct Map {
    keyframes: HashMap<KeyFrameId, KeyFrame>,
    map_points: HashMap<MapPointId, MapPoint>,

    /// KeyFrame ids in insertion (temporal) order.
    keyframe_order: Vec<KeyFrameId>,

    next_kf_id: u64,
    next_mp_id: u64,
}

impl Map {
    pub fn new() -> Self {
        Self {
            keyframes: HashMap::new(),
            map_points: HashMap::new(),
            keyframe_order: Vec::new(),
            next_kf_id: 0,
            next_mp_id: 0,
        }
    }

    // ------------------------------------------------------------------
    // KeyFrames
    // ------------------------------------------------------------------

    /// Create a new KeyFrame and return its id.
    pub fn add_keyframe(&mut self, frame_index: u64, pose: SE3, features: FeatureSet) -> KeyFrameId {
        let id = KeyFrameId(self.next_kf_id);
        self.next_kf_id += 1;
        self.keyframes
            .insert(id, KeyFrame::new(id, frame_index, pose, features));
        self.keyframe_order.push(id);
        id
    }

    pub fn keyframe(&self, id: KeyFrameId) -> Option<&KeyFrame> {
        self.keyframes.get(&id)
    }

    pub fn keyframe_mut(&mut self, id: KeyFrameId) -> Option<&mut KeyFrame> {
        self.keyframes.get_mut(&id)
    }

    /// KeyFrame ids in temporal order.
    pub fn keyframe_ids(&self) -> &[KeyFrameId] {
        &self.keyframe_order
    }

    pub fn last_keyframe_id(&self) -> Option<KeyFrameId> {
        self.keyframe_order.last().copied()
    }

    pub fn keyframes(&self) -> impl Iterator<Item = &KeyFrame> {
        self.keyframes.values()
    }

    pub fn num_keyframes(&self) -> usize {
        self.keyframes.len()
    }

    // ------------------------------------------------------------------
    // MapPoints
    // ------------------------------------------------------------------

    /// Create a new MapPoint from its two founding observations.
    ///
    /// Monocular points are born from triangulation between two keyframes,
    /// so two observations from distinct existing keyframes are required
    /// up front.
    pub fn add_map_point(
        &mut self,
        position: Vector3<f64>,
        obs_a: (KeyFrameId, usize),
        obs_b: (KeyFrameId, usize),
    ) -> Result<MapPointId> {
        if obs_a.0 == obs_b.0 {
            return Err(SlamError::invalid_input(
                "map point observations must come from distinct keyframes",
            ));
        }
        if !self.keyframes.contains_key(&obs_a.0) || !self.keyframes.contains_key(&obs_b.0) {
            return Err(SlamError::invalid_input(
                "map point observation references a missing keyframe",
            ));
        }

        let id = MapPointId(self.next_mp_id);
        self.next_mp_id += 1;
        self.map_points
            .insert(id, MapPoint::new(id, position, obs_a.0));

        self.add_observation(id, obs_a.0, obs_a.1);
        self.add_observation(id, obs_b.0, obs_b.1);
        Ok(id)
    }

    /// Create the two-way association between a keyframe feature and a map
    /// point. Returns false if either side is missing.
    pub fn add_observation(
        &mut self,
        mp_id: MapPointId,
        kf_id: KeyFrameId,
        feature_idx: usize,
    ) -> bool {
        if !self.keyframes.contains_key(&kf_id) {
            return false;
        }
        match self.map_points.get_mut(&mp_id) {
            Some(mp) => mp.add_observation(kf_id, feature_idx),
            None => return false,
        }
        if let Some(kf) = self.keyframes.get_mut(&kf_id) {
            kf.set_map_point(feature_idx, mp_id);
        }
        true
    }

    /// Flag a MapPoint invalid. The point stays addressable but is excluded
    /// from tracking and optimization from now on.
    pub fn invalidate(&mut self, mp_id: MapPointId) {
        if let Some(mp) = self.map_points.get_mut(&mp_id) {
            mp.set_bad();
        }
    }

    pub fn map_point(&self, id: MapPointId) -> Option<&MapPoint> {
        self.map_points.get(&id)
    }

    pub fn map_point_mut(&mut self, id: MapPointId) -> Option<&mut MapPoint> {
        self.map_points.get_mut(&id)
    }

    /// A map point usable for tracking and optimization.
    pub fn live_map_point(&self, id: MapPointId) -> Option<&MapPoint> {
        self.map_points.get(&id).filter(|mp| !mp.is_bad)
    }

    pub fn map_points(&self) -> impl Iterator<Item = &MapPoint> {
        self.map_points.values()
    }

    pub fn num_map_points(&self) -> usize {
        self.map_points.len()
    }

    pub fn num_live_points(&self) -> usize {
        self.map_points.values().filter(|mp| !mp.is_bad).count()
    }

    // ------------------------------------------------------------------
    // Snapshots
    // ------------------------------------------------------------------

    /// Copy-on-read snapshot of the last `last_n` keyframes, the live points
    /// they observe, the fixed poses of outside observers, and every
    /// observation connecting them.
    pub fn snapshot_window(&self, last_n: usize) -> WindowSnapshot {
        let start = self.keyframe_order.len().saturating_sub(last_n);
        let window_ids: Vec<KeyFrameId> = self.keyframe_order[start..].to_vec();
        let window_set: HashSet<KeyFrameId> = window_ids.iter().copied().collect();

        let window: Vec<(KeyFrameId, SE3)> = window_ids
            .iter()
            .filter_map(|id| self.keyframes.get(id).map(|kf| (*id, kf.pose.clone())))
            .collect();

        // Live points observed by the window.
        let mut point_ids: Vec<MapPointId> = Vec::new();
        let mut seen: HashSet<MapPointId> = HashSet::new();
        for kf_id in &window_ids {
            if let Some(kf) = self.keyframes.get(kf_id) {
                for (_, mp_id) in kf.observed_map_points() {
                    if seen.insert(mp_id) && self.live_map_point(mp_id).is_some() {
                        point_ids.push(mp_id);
                    }
                }
            }
        }

        let mut fixed_ids: HashSet<KeyFrameId> = HashSet::new();
        let mut points = Vec::with_capacity(point_ids.len());
        let mut observations = Vec::new();

        for mp_id in &point_ids {
            let mp = match self.live_map_point(*mp_id) {
                Some(mp) => mp,
                None => continue,
            };
            points.push((*mp_id, mp.position));

            for (&kf_id, &feature_idx) in &mp.observations {
                let kf = match self.keyframes.get(&kf_id) {
                    Some(kf) => kf,
                    None => continue,
                };
                let kp = match kf.features.keypoints.get(feature_idx) {
                    Some(kp) => kp,
                    None => continue,
                };
                if !window_set.contains(&kf_id) {
                    fixed_ids.insert(kf_id);
                }
                observations.push(SnapshotObservation {
                    kf_id,
                    mp_id: *mp_id,
                    pixel: kp.position(),
                });
            }
        }

        let fixed: Vec<(KeyFrameId, SE3)> = fixed_ids
            .into_iter()
            .filter_map(|id| self.keyframes.get(&id).map(|kf| (id, kf.pose.clone())))
            .collect();

        WindowSnapshot {
            window,
            fixed,
            points,
            observations,
        }
    }
}

impl Default for Map {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Map {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Map")
            .field("num_keyframes", &self.keyframes.len())
            .field("num_map_points", &self.map_points.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::{Descriptors, FeatureSet, Keypoint};
    use nalgebra::Vector3;

    fn features(n: usize) -> FeatureSet {
        let mut descriptors = Descriptors::empty(4);
        let mut keypoints = Vec::new();
        for i in 0..n {
            keypoints.push(Keypoint::new(i as f32 * 10.0, i as f32 * 5.0));
            descriptors.push_row(&[i as u8, 0, 0, 0]).unwrap();
        }
        FeatureSet {
            keypoints,
            descriptors,
        }
    }

    fn two_keyframe_map() -> (Map, KeyFrameId, KeyFrameId) {
        let mut map = Map::new();
        let kf_a = map.add_keyframe(0, SE3::identity(), features(10));
        let kf_b = map.add_keyframe(1, SE3::identity(), features(10));
        (map, kf_a, kf_b)
    }

    #[test]
    fn map_point_creation_is_bidirectional() {
        let (mut map, kf_a, kf_b) = two_keyframe_map();
        let mp = map
            .add_map_point(Vector3::new(0.0, 0.0, 5.0), (kf_a, 2), (kf_b, 4))
            .unwrap();

        let point = map.map_point(mp).unwrap();
        assert_eq!(point.num_observations(), 2);
        assert_eq!(point.observations.get(&kf_a), Some(&2));
        assert_eq!(point.observations.get(&kf_b), Some(&4));

        assert_eq!(map.keyframe(kf_a).unwrap().map_point(2), Some(mp));
        assert_eq!(map.keyframe(kf_b).unwrap().map_point(4), Some(mp));
    }

    #[test]
    fn map_point_requires_two_distinct_existing_keyframes() {
        let (mut map, kf_a, _) = two_keyframe_map();

        let same = map.add_map_point(Vector3::zeros(), (kf_a, 0), (kf_a, 1));
        assert!(same.is_err());

        let missing = map.add_map_point(Vector3::zeros(), (kf_a, 0), (KeyFrameId(99), 1));
        assert!(missing.is_err());
    }

    #[test]
    fn invalidation_flags_but_keeps_the_point() {
        let (mut map, kf_a, kf_b) = two_keyframe_map();
        let mp = map
            .add_map_point(Vector3::new(0.0, 0.0, 5.0), (kf_a, 0), (kf_b, 0))
            .unwrap();

        map.invalidate(mp);

        assert!(map.map_point(mp).is_some());
        assert!(map.live_map_point(mp).is_none());
        assert_eq!(map.num_live_points(), 0);
        assert_eq!(map.num_map_points(), 1);
    }

    #[test]
    fn live_points_always_reference_existing_keyframes() {
        let (mut map, kf_a, kf_b) = two_keyframe_map();
        for i in 0..5 {
            map.add_map_point(Vector3::new(i as f64, 0.0, 5.0), (kf_a, i), (kf_b, i))
                .unwrap();
        }
        map.invalidate(MapPointId(1));
        map.invalidate(MapPointId(3));

        for mp in map.map_points().filter(|mp| !mp.is_bad) {
            assert!(mp.num_observations() >= 2);
            for kf_id in mp.observations.keys() {
                assert!(map.keyframe(*kf_id).is_some());
            }
        }
    }

    #[test]
    fn snapshot_window_selects_recent_keyframes_and_live_points() {
        let mut map = Map::new();
        let kfs: Vec<KeyFrameId> = (0..4)
            .map(|i| map.add_keyframe(i, SE3::identity(), features(10)))
            .collect();

        // Point seen by the two oldest keyframes only.
        let old_mp = map
            .add_map_point(Vector3::new(0.0, 0.0, 4.0), (kfs[0], 0), (kfs[1], 0))
            .unwrap();
        // Point bridging the oldest and newest keyframes.
        let bridge_mp = map
            .add_map_point(Vector3::new(1.0, 0.0, 4.0), (kfs[0], 1), (kfs[3], 1))
            .unwrap();
        // Invalidated point inside the window.
        let bad_mp = map
            .add_map_point(Vector3::new(2.0, 0.0, 4.0), (kfs[2], 2), (kfs[3], 2))
            .unwrap();
        map.invalidate(bad_mp);

        let snapshot = map.snapshot_window(2);

        let window_ids: Vec<KeyFrameId> = snapshot.window.iter().map(|(id, _)| *id).collect();
        assert_eq!(window_ids, vec![kfs[2], kfs[3]]);

        let point_ids: Vec<MapPointId> = snapshot.points.iter().map(|(id, _)| *id).collect();
        assert!(point_ids.contains(&bridge_mp));
        assert!(!point_ids.contains(&bad_mp));
        assert!(!point_ids.contains(&old_mp));

        // The out-of-window observer of the bridging point is fixed.
        assert!(snapshot.fixed.iter().any(|(id, _)| *id == kfs[0]));
    }
}
