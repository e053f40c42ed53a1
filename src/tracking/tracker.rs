//! The frame processor: per-frame orchestration of matching, pose
//! estimation, outlier filtering, keyframe selection and local bundle
//! adjustment.
//!
//! State machine: `Uninitialized` -> `Tracking` -> `Lost` (and back to
//! `Tracking` once a pose solve against the last good reference succeeds
//! again). All persistent tracking state lives in this struct and is
//! threaded through each call; the map lives in the `SharedState`.

use std::sync::Arc;

use crossbeam_channel::Sender;
use nalgebra::{Vector2, Vector3};
use tracing::{debug, info, warn};

use crate::config::SlamConfig;
use crate::correction::{accept_new_point, audit_map, score_reprojection};
use crate::error::{Result, SlamError};
use crate::features::{DescriptorMatcher, FeatureMatch, FeatureSet};
use crate::geometry::two_view::estimate_relative_pose;
use crate::geometry::{estimate_absolute_pose, triangulate, CameraModel, SE3};
use crate::map::{KeyFrameId, MapPointId};
use crate::optimizer;
use crate::system::messages::KeyframeEvent;
use crate::system::shared_state::SharedState;
use crate::tracking::initializer::{initialize, Initialization};
use crate::tracking::keyframe_decision::KeyframePolicy;
use crate::tracking::motion_model::MotionModel;
use crate::tracking::result::{FrameOutcome, SkipReason, TrackingMetrics, TrackingResult};
use crate::tracking::TrackingState;

/// Snapshot of the reference keyframe pulled out of the map for one frame.
struct ReferenceView {
    kf_id: KeyFrameId,
    pose: SE3,
    features: FeatureSet,
    /// Live map point (id, position) per feature index, None where the
    /// feature observes nothing.
    points: Vec<Option<(MapPointId, Vector3<f64>)>>,
    num_tracked: usize,
}

/// A 3D-2D correspondence between the reference's map points and the
/// current frame's keypoints.
struct Correspondence {
    mp_id: MapPointId,
    cur_idx: usize,
    point: Vector3<f64>,
    pixel: Vector2<f64>,
}

/// Pose estimate for one frame plus its supporting correspondences.
struct FramePose {
    pose: SE3,
    n_inliers: usize,
    /// Indices into the correspondence list that support the pose.
    /// Empty on the 2D-2D fallback path, which has no map correspondences.
    inlier_indices: Vec<usize>,
    force_keyframe: bool,
}

pub struct Tracker<M: DescriptorMatcher> {
    camera: CameraModel,
    config: SlamConfig,
    matcher: M,
    shared: Arc<SharedState>,
    kf_events: Option<Sender<KeyframeEvent>>,

    pub state: TrackingState,
    reference_kf: Option<KeyFrameId>,
    last_pose: SE3,
    last_kf_pose: SE3,
    motion_model: MotionModel,
    kf_policy: KeyframePolicy,
    consecutive_failures: usize,

    /// One pose per successfully processed frame, arrival order,
    /// append-only.
    pub trajectory: Vec<SE3>,
}

impl<M: DescriptorMatcher> Tracker<M> {
    pub fn new(
        camera: CameraModel,
        config: SlamConfig,
        matcher: M,
        shared: Arc<SharedState>,
        kf_events: Option<Sender<KeyframeEvent>>,
    ) -> Self {
        let kf_policy = KeyframePolicy::new(config.keyframe.clone());
        Self {
            camera,
            config,
            matcher,
            shared,
            kf_events,
            state: TrackingState::Uninitialized,
            reference_kf: None,
            last_pose: SE3::identity(),
            last_kf_pose: SE3::identity(),
            motion_model: MotionModel::new(),
            kf_policy,
            consecutive_failures: 0,
            trajectory: Vec::new(),
        }
    }

    /// Process one frame's features. Returns the per-frame outcome; on
    /// `Skipped` the caller's state is unchanged and no pose is emitted.
    pub fn process_frame(&mut self, frame_index: u64, features: FeatureSet) -> Result<FrameOutcome> {
        match (self.state, self.reference_kf) {
            (TrackingState::Uninitialized, None) => self.start_first_frame(frame_index, features),
            (TrackingState::Uninitialized, Some(ref_kf)) => {
                self.try_initialize(frame_index, features, ref_kf)
            }
            _ => self.track_frame(frame_index, features),
        }
    }

    // ------------------------------------------------------------------
    // Startup and initialization
    // ------------------------------------------------------------------

    fn start_first_frame(&mut self, frame_index: u64, features: FeatureSet) -> Result<FrameOutcome> {
        // Zero keypoints on the very first frame is fatal to startup.
        if features.is_empty() || features.descriptors.is_absent() {
            return Err(SlamError::invalid_input(
                "first frame produced no usable features",
            ));
        }

        let n_features = features.len();
        let kf_id = {
            let mut map = self.shared.map.write();
            map.add_keyframe(frame_index, SE3::identity(), features)
        };

        self.reference_kf = Some(kf_id);
        self.last_pose = SE3::identity();
        self.last_kf_pose = SE3::identity();
        self.trajectory.push(SE3::identity());
        self.motion_model.update(&SE3::identity());
        self.notify_keyframe(kf_id);

        info!(%kf_id, frame_index, "first frame became the reference keyframe");

        Ok(FrameOutcome::Tracked(TrackingResult {
            state: self.state,
            pose: SE3::identity(),
            reference_kf: Some(kf_id),
            newly_initialized: false,
            keyframe_inserted: true,
            metrics: TrackingMetrics {
                n_features,
                ..TrackingMetrics::default()
            },
        }))
    }

    fn try_initialize(
        &mut self,
        frame_index: u64,
        features: FeatureSet,
        ref_kf_id: KeyFrameId,
    ) -> Result<FrameOutcome> {
        if features.is_empty() {
            return Ok(FrameOutcome::Skipped(SkipReason::NoFeatures));
        }

        let (ref_pose, ref_features) = {
            let map = self.shared.map.read();
            match map.keyframe(ref_kf_id) {
                Some(kf) => (kf.pose.clone(), kf.features.clone()),
                None => return Ok(FrameOutcome::Skipped(SkipReason::InitializationFailed)),
            }
        };

        let matches = self
            .matcher
            .match_descriptors(&ref_features.descriptors, &features.descriptors)?;

        let init = match initialize(
            &ref_features,
            &ref_pose,
            &features,
            &matches,
            &self.camera,
            &self.config,
        ) {
            Ok(init) => init,
            Err(err) => {
                debug!(frame_index, %err, "initialization attempt failed");
                return Ok(FrameOutcome::Skipped(SkipReason::InitializationFailed));
            }
        };

        self.commit_initialization(frame_index, features, init, ref_kf_id)
    }

    fn commit_initialization(
        &mut self,
        frame_index: u64,
        features: FeatureSet,
        init: Initialization,
        ref_kf_id: KeyFrameId,
    ) -> Result<FrameOutcome> {
        let n_features = features.len();
        let n_points = init.points.len();

        self.shared.request_abort_ba();
        let (new_kf_id, refined_pose) = {
            let mut map = self.shared.map.write();
            let new_kf_id = map.add_keyframe(frame_index, init.pose.clone(), features);

            let mut created = 0usize;
            for point in &init.points {
                if map
                    .add_map_point(
                        point.position,
                        (ref_kf_id, point.ref_idx),
                        (new_kf_id, point.cur_idx),
                    )
                    .is_ok()
                {
                    created += 1;
                }
            }
            debug!(created, "initial map points created");

            // Refine the infant map immediately.
            optimizer::bundle_adjust_window(&mut map, &self.camera, &self.config.ba, 2);
            audit_map(&mut map, &self.camera, self.config.tracking.reproj_threshold_px);

            let refined_pose = map
                .keyframe(new_kf_id)
                .map(|kf| kf.pose.clone())
                .unwrap_or(init.pose);
            (new_kf_id, refined_pose)
        };
        self.shared.clear_abort_ba();

        self.state = TrackingState::Tracking;
        self.reference_kf = Some(new_kf_id);
        self.last_kf_pose = refined_pose.clone();
        self.last_pose = refined_pose.clone();
        self.consecutive_failures = 0;
        self.trajectory.push(refined_pose.clone());
        // Seed the motion model with the initialization baseline so the
        // fallback path has a scale to work with.
        self.motion_model.reset();
        self.motion_model.update(&SE3::identity());
        self.motion_model.update(&refined_pose);
        self.kf_policy.reset();
        self.notify_keyframe(new_kf_id);

        info!(
            %new_kf_id,
            frame_index,
            points = n_points,
            model = ?init.model,
            "map initialized"
        );

        Ok(FrameOutcome::Tracked(TrackingResult {
            state: self.state,
            pose: refined_pose,
            reference_kf: Some(new_kf_id),
            newly_initialized: true,
            keyframe_inserted: true,
            metrics: TrackingMetrics {
                n_features,
                n_correspondences: n_points,
                n_inliers: n_points,
                inlier_ratio: 1.0,
                ..TrackingMetrics::default()
            },
        }))
    }

    // ------------------------------------------------------------------
    // Steady-state tracking
    // ------------------------------------------------------------------

    fn track_frame(&mut self, frame_index: u64, features: FeatureSet) -> Result<FrameOutcome> {
        if features.is_empty() {
            return Ok(self.record_failure(SkipReason::NoFeatures));
        }

        let reference = match self.load_reference() {
            Some(r) => r,
            None => return Ok(self.record_failure(SkipReason::TrackingLost)),
        };

        let matches = self
            .matcher
            .match_descriptors(&reference.features.descriptors, &features.descriptors)?;

        // 3D-2D correspondences through the reference's map points.
        let mut correspondences: Vec<Correspondence> = Vec::new();
        for m in &matches {
            if let Some(Some((mp_id, point))) = reference.points.get(m.query_idx) {
                correspondences.push(Correspondence {
                    mp_id: *mp_id,
                    cur_idx: m.train_idx,
                    point: *point,
                    pixel: features.keypoints[m.train_idx].position(),
                });
            }
        }

        let estimate = match self.estimate_frame_pose(
            frame_index,
            &reference,
            &features,
            &matches,
            &correspondences,
        ) {
            Ok(estimate) => estimate,
            Err(TrackAttemptError::Degenerate) => {
                return Ok(self.record_failure(SkipReason::DegenerateGeometry))
            }
            Err(TrackAttemptError::Fatal(err)) => return Err(err),
        };

        if estimate.n_inliers < self.config.tracking.min_tracked_points {
            debug!(
                frame_index,
                n_inliers = estimate.n_inliers,
                "too few inliers support the pose"
            );
            return Ok(self.record_failure(SkipReason::DegenerateGeometry));
        }

        // Frame accepted.
        if self.state == TrackingState::Lost {
            info!(frame_index, "tracking re-established against the last reference");
        }
        self.state = TrackingState::Tracking;
        self.consecutive_failures = 0;

        let pose = estimate.pose.clone();
        let metrics = TrackingMetrics {
            n_features: features.len(),
            n_matches: matches.len(),
            n_correspondences: correspondences.len(),
            n_inliers: estimate.n_inliers,
            inlier_ratio: if correspondences.is_empty() {
                0.0
            } else {
                estimate.n_inliers as f64 / correspondences.len() as f64
            },
            delta_translation: self.last_pose.translation_distance_to(&pose),
            delta_rotation_deg: self.last_pose.rotation_angle_to(&pose).to_degrees(),
        };

        self.last_pose = pose.clone();
        self.motion_model.update(&pose);
        self.trajectory.push(pose.clone());

        // Keyframe decision.
        let inlier_corr: Vec<&Correspondence> = estimate
            .inlier_indices
            .iter()
            .map(|&i| &correspondences[i])
            .collect();
        let median_depth = median_tracked_depth(&pose, &inlier_corr);
        let translation_since_kf = self.last_kf_pose.translation_distance_to(&pose);
        let rotation_since_kf = self.last_kf_pose.rotation_angle_to(&pose).to_degrees();
        let should_insert = self.kf_policy.should_insert(
            estimate.n_inliers,
            reference.num_tracked,
            translation_since_kf,
            rotation_since_kf,
            median_depth,
        ) || estimate.force_keyframe;

        let mut keyframe_inserted = false;
        if should_insert {
            self.insert_keyframe(frame_index, &pose, features, &reference, &matches, &inlier_corr);
            keyframe_inserted = true;
        }

        Ok(FrameOutcome::Tracked(TrackingResult {
            state: self.state,
            pose,
            reference_kf: self.reference_kf,
            newly_initialized: false,
            keyframe_inserted,
            metrics,
        }))
    }

    /// Estimate the frame pose: absolute (PnP) against the reference's map
    /// points when enough 3D correspondences exist, otherwise 2D-2D relative
    /// pose composed onto the reference pose. The relative path starves the
    /// map, so it forces keyframe insertion to triangulate replacements.
    fn estimate_frame_pose(
        &mut self,
        frame_index: u64,
        reference: &ReferenceView,
        features: &FeatureSet,
        matches: &[FeatureMatch],
        correspondences: &[Correspondence],
    ) -> std::result::Result<FramePose, TrackAttemptError> {
        if correspondences.len() >= self.config.tracking.min_pnp_points {
            let points3d: Vec<Vector3<f64>> = correspondences.iter().map(|c| c.point).collect();
            let pixels: Vec<Vector2<f64>> = correspondences.iter().map(|c| c.pixel).collect();
            let prior = self.motion_model.predict();

            let result = match estimate_absolute_pose(
                &points3d,
                &pixels,
                &self.camera,
                prior.as_ref(),
                &self.config.pnp,
            ) {
                Ok(result) => result,
                Err(SlamError::DegenerateGeometry(msg)) => {
                    debug!(frame_index, %msg, "absolute pose estimate degenerate");
                    return Err(TrackAttemptError::Degenerate);
                }
                Err(err) => return Err(TrackAttemptError::Fatal(err)),
            };

            // Filter the supporting correspondences; mark reference
            // observations of rejected points so the audit can retire them.
            let mut inlier_indices = Vec::new();
            let mut outlier_points: Vec<MapPointId> = Vec::new();
            for (i, corr) in correspondences.iter().enumerate() {
                let supported = result.inlier_mask[i]
                    && score_reprojection(&corr.point, &result.pose, &corr.pixel, &self.camera)
                        < self.config.tracking.reproj_threshold_px;
                if supported {
                    inlier_indices.push(i);
                } else {
                    outlier_points.push(corr.mp_id);
                }
            }
            if !outlier_points.is_empty() {
                let mut map = self.shared.map.write();
                for mp_id in outlier_points {
                    if let Some(mp) = map.map_point_mut(mp_id) {
                        mp.mark_outlier(reference.kf_id);
                    }
                }
            }

            Ok(FramePose {
                pose: result.pose,
                n_inliers: inlier_indices.len(),
                inlier_indices,
                force_keyframe: false,
            })
        } else {
            let pixels_a: Vec<Vector2<f64>> = matches
                .iter()
                .map(|m| reference.features.keypoints[m.query_idx].position())
                .collect();
            let pixels_b: Vec<Vector2<f64>> = matches
                .iter()
                .map(|m| features.keypoints[m.train_idx].position())
                .collect();

            let relative = match estimate_relative_pose(
                &pixels_a,
                &pixels_b,
                &self.camera,
                &self.config.two_view,
            ) {
                Ok(relative) => relative,
                Err(SlamError::DegenerateGeometry(msg)) => {
                    debug!(frame_index, %msg, "relative fallback degenerate");
                    return Err(TrackAttemptError::Degenerate);
                }
                Err(err) => return Err(TrackAttemptError::Fatal(err)),
            };

            // The two-view translation is unit norm; scale it by the motion
            // model's last inter-frame speed (constant velocity assumption).
            let speed = self.motion_model.speed();
            let scale = if speed > 1e-9 { speed } else { 1.0 };
            let relative_cw = SE3 {
                rotation: relative.rotation,
                translation: relative.translation * scale,
            };
            let pose = relative_cw.compose(&reference.pose.inverse()).inverse();

            Ok(FramePose {
                pose,
                n_inliers: relative.num_inliers(),
                inlier_indices: Vec::new(),
                force_keyframe: true,
            })
        }
    }

    fn load_reference(&self) -> Option<ReferenceView> {
        let kf_id = self.reference_kf?;
        let map = self.shared.map.read();
        let kf = map.keyframe(kf_id)?;

        let mut points = vec![None; kf.num_features()];
        let mut num_tracked = 0usize;
        for (feature_idx, mp_id) in kf.observed_map_points() {
            if let Some(mp) = map.live_map_point(mp_id) {
                points[feature_idx] = Some((mp_id, mp.position));
                num_tracked += 1;
            }
        }

        Some(ReferenceView {
            kf_id,
            pose: kf.pose.clone(),
            features: kf.features.clone(),
            points,
            num_tracked,
        })
    }

    /// Promote the current frame to a keyframe: associate tracked points,
    /// triangulate new points from still-unassociated matches against the
    /// reference, refine the local window and advance the reference.
    fn insert_keyframe(
        &mut self,
        frame_index: u64,
        pose: &SE3,
        features: FeatureSet,
        reference: &ReferenceView,
        matches: &[FeatureMatch],
        inlier_corr: &[&Correspondence],
    ) {
        // Current-frame pixel positions, captured before the features move
        // into the map.
        let cur_pixels: Vec<Vector2<f64>> =
            features.keypoints.iter().map(|kp| kp.position()).collect();

        self.shared.request_abort_ba();
        let new_kf_id = {
            let mut map = self.shared.map.write();
            let new_kf_id = map.add_keyframe(frame_index, pose.clone(), features);

            for corr in inlier_corr {
                map.add_observation(corr.mp_id, new_kf_id, corr.cur_idx);
            }

            // Triangulate new points from matches whose reference feature
            // observes nothing yet.
            let mut created = 0usize;
            for m in matches {
                if reference.points.get(m.query_idx).map_or(true, |p| p.is_some()) {
                    continue;
                }
                let px_ref = reference.features.keypoints[m.query_idx].position();
                let px_cur = cur_pixels[m.train_idx];
                let position = match triangulate(
                    &px_ref,
                    &px_cur,
                    &reference.pose,
                    pose,
                    &self.camera,
                    self.config.triangulation.max_reproj_error_px,
                ) {
                    Some(p) => p,
                    None => continue,
                };
                if !accept_new_point(
                    &position,
                    &reference.pose,
                    pose,
                    &px_ref,
                    &px_cur,
                    &self.camera,
                    &self.config.triangulation,
                ) {
                    continue;
                }
                if map
                    .add_map_point(
                        position,
                        (reference.kf_id, m.query_idx),
                        (new_kf_id, m.train_idx),
                    )
                    .is_ok()
                {
                    created += 1;
                }
            }

            optimizer::bundle_adjust_window(
                &mut map,
                &self.camera,
                &self.config.ba,
                self.config.ba.local_window,
            );
            audit_map(&mut map, &self.camera, self.config.tracking.reproj_threshold_px);

            debug!(
                %new_kf_id,
                frame_index,
                new_points = created,
                live_points = map.num_live_points(),
                "keyframe inserted"
            );

            if let Some(kf) = map.keyframe(new_kf_id) {
                // Track from the refined pose; the already-emitted trajectory
                // entry stays as it was (the trajectory is append-only).
                self.last_kf_pose = kf.pose.clone();
                self.last_pose = kf.pose.clone();
            }
            new_kf_id
        };
        self.shared.clear_abort_ba();

        self.reference_kf = Some(new_kf_id);
        self.kf_policy.reset();
        self.notify_keyframe(new_kf_id);
    }

    fn record_failure(&mut self, reason: SkipReason) -> FrameOutcome {
        self.consecutive_failures += 1;
        if self.state == TrackingState::Tracking
            && self.consecutive_failures >= self.config.tracking.max_consecutive_failures
        {
            warn!(
                failures = self.consecutive_failures,
                "tracking lost; skipping frames until geometry recovers"
            );
            self.state = TrackingState::Lost;
        }

        let reason = if self.state == TrackingState::Lost {
            SkipReason::TrackingLost
        } else {
            reason
        };
        FrameOutcome::Skipped(reason)
    }

    fn notify_keyframe(&self, keyframe_id: KeyFrameId) {
        if let Some(ref sender) = self.kf_events {
            let _ = sender.try_send(KeyframeEvent { keyframe_id });
        }
    }
}

/// Internal error split: degenerate geometry is recovered by skipping the
/// frame, anything else aborts the call.
enum TrackAttemptError {
    Degenerate,
    Fatal(SlamError),
}

/// Median depth of the tracked points in the current camera, used to make
/// the keyframe translation bound scale free.
fn median_tracked_depth(pose: &SE3, correspondences: &[&Correspondence]) -> f64 {
    if correspondences.is_empty() {
        return 1.0;
    }
    let pose_cw = pose.inverse();
    let mut depths: Vec<f64> = correspondences
        .iter()
        .map(|c| pose_cw.transform_point(&c.point).z)
        .collect();
    depths.sort_by(|a, b| a.partial_cmp(b).unwrap());
    depths[depths.len() / 2]
}
