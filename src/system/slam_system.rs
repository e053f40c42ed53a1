//! Top-level system handle: owns the tracker, the shared map and the
//! background mapping worker.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::Result;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use image::GrayImage;
use tracing::{debug, info};

use crate::config::SlamConfig;
use crate::correction::audit_map;
use crate::features::{DescriptorMatcher, FeatureExtractor, FeatureSet};
use crate::geometry::{CameraModel, SE3};
use crate::optimizer;
use crate::tracking::{FrameOutcome, Tracker, TrackingState};

use super::messages::KeyframeEvent;
use super::shared_state::SharedState;

/// Capacity of the keyframe event channel. Events only gate the periodic
/// global refinement, so dropping one under pressure is harmless.
const KEYFRAME_CHANNEL_CAPACITY: usize = 16;

/// Monocular visual odometry system.
///
/// Frame processing is synchronous and frame-sequential: `process_frame`
/// returns only when the frame is fully handled, preserving trajectory
/// order. The one concurrent piece is the mapping worker, which refines the
/// whole map at intervals on an immutable snapshot and applies the result
/// under the write lock.
pub struct SlamSystem<E: FeatureExtractor, M: DescriptorMatcher> {
    shared: Arc<SharedState>,
    extractor: E,
    tracker: Tracker<M>,
    worker: Option<JoinHandle<()>>,
}

impl<E: FeatureExtractor, M: DescriptorMatcher> SlamSystem<E, M> {
    pub fn new(camera: CameraModel, config: SlamConfig, extractor: E, matcher: M) -> Self {
        let shared = SharedState::new();
        let (kf_sender, kf_receiver) = bounded::<KeyframeEvent>(KEYFRAME_CHANNEL_CAPACITY);

        let tracker = Tracker::new(
            camera,
            config.clone(),
            matcher,
            shared.clone(),
            Some(kf_sender),
        );
        let worker = spawn_mapping_worker(shared.clone(), kf_receiver, camera, config);

        Self {
            shared,
            extractor,
            tracker,
            worker: Some(worker),
        }
    }

    /// Extract features from the image and process them. The per-frame
    /// outcome signals either an updated pose or an explicit skip.
    pub fn process_frame(&mut self, frame_index: u64, image: &GrayImage) -> Result<FrameOutcome> {
        let features = self.extractor.extract(image)?;
        Ok(self.tracker.process_frame(frame_index, features)?)
    }

    /// Process pre-extracted features (for callers that run their own
    /// extraction pipeline).
    pub fn process_features(
        &mut self,
        frame_index: u64,
        features: FeatureSet,
    ) -> Result<FrameOutcome> {
        Ok(self.tracker.process_frame(frame_index, features)?)
    }

    pub fn state(&self) -> TrackingState {
        self.tracker.state
    }

    /// Poses of all successfully processed frames, arrival order.
    pub fn trajectory(&self) -> &[SE3] {
        &self.tracker.trajectory
    }

    pub fn shared_state(&self) -> &Arc<SharedState> {
        &self.shared
    }

    /// Stop the mapping worker and wait for it.
    pub fn shutdown(&mut self) {
        self.shared.request_shutdown();
        self.shared.request_abort_ba();
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}

impl<E: FeatureExtractor, M: DescriptorMatcher> Drop for SlamSystem<E, M> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn spawn_mapping_worker(
    shared: Arc<SharedState>,
    events: Receiver<KeyframeEvent>,
    camera: CameraModel,
    config: SlamConfig,
) -> JoinHandle<()> {
    thread::spawn(move || {
        let mut keyframes_since_global = 0usize;

        loop {
            if shared.is_shutdown_requested() {
                break;
            }
            match events.recv_timeout(Duration::from_millis(50)) {
                Ok(event) => {
                    debug!(keyframe = %event.keyframe_id, "mapping worker received keyframe");
                    keyframes_since_global += 1;
                    if keyframes_since_global >= config.ba.global_interval {
                        keyframes_since_global = 0;
                        run_global_ba(&shared, &camera, &config);
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
    })
}

/// Global bundle adjustment in three phases: snapshot under the read lock,
/// solve lock-free (yielding to the abort flag), apply + re-audit under one
/// write lock so tracking never sees a half-updated map.
fn run_global_ba(shared: &Arc<SharedState>, camera: &CameraModel, config: &SlamConfig) {
    shared.clear_abort_ba();

    let problem = {
        let map = shared.map.read();
        let snapshot = map.snapshot_window(usize::MAX);
        optimizer::collect_problem(&snapshot)
    };
    let problem = match problem {
        Some(p) => p,
        None => return,
    };

    let solution = optimizer::solve(&problem, camera, &config.ba, &|| shared.should_abort_ba());

    {
        let mut map = shared.map.write();
        let updated = optimizer::apply(&mut map, &solution);
        audit_map(&mut map, camera, config.tracking.reproj_threshold_px);
        info!(
            updated,
            iterations = solution.iterations,
            initial_error = solution.initial_error,
            final_error = solution.final_error,
            "global bundle adjustment applied"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::HammingMatcher;
    use crate::test_utils::{
        feature_set_from_pixels, feature_set_with_salt, planar_grid, project_pixels, test_camera,
        ScriptedExtractor,
    };
    use crate::tracking::SkipReason;
    use nalgebra::Vector3;

    fn dummy_image() -> GrayImage {
        GrayImage::new(64, 64)
    }

    fn planar_system(
        frames: Vec<FeatureSet>,
    ) -> SlamSystem<ScriptedExtractor, HammingMatcher> {
        SlamSystem::new(
            test_camera(),
            SlamConfig::default(),
            ScriptedExtractor::new(frames),
            HammingMatcher::default(),
        )
    }

    fn planar_frames(offsets_x: &[f64]) -> Vec<FeatureSet> {
        let camera = test_camera();
        let points = planar_grid(10, 8, 5.0);
        offsets_x
            .iter()
            .map(|&x| {
                let pose = SE3 {
                    rotation: nalgebra::UnitQuaternion::identity(),
                    translation: Vector3::new(x, 0.0, 0.0),
                };
                feature_set_from_pixels(&project_pixels(&points, &pose, &camera))
            })
            .collect()
    }

    #[test]
    fn planar_translation_initializes_and_tracks() {
        let frames = planar_frames(&[0.0, 0.5, 0.7, 0.9]);
        let mut system = planar_system(frames);
        let image = dummy_image();

        let mut initialized_at = None;
        for i in 0..4u64 {
            let outcome = system.process_frame(i, &image).unwrap();
            if let FrameOutcome::Tracked(result) = &outcome {
                if result.newly_initialized {
                    initialized_at = Some(i);
                }
            }
        }

        assert_eq!(initialized_at, Some(1));
        assert_eq!(system.state(), TrackingState::Tracking);
        assert_eq!(system.trajectory().len(), 4);

        // The initial map carries at least the configured minimum of points.
        {
            let map = system.shared_state().map.read();
            assert!(map.num_live_points() >= 50, "{} points", map.num_live_points());
        }

        // Recovered motion is +x within 5 degrees (scale is arbitrary).
        let last = system.trajectory().last().unwrap();
        let direction = last.translation.normalize();
        let angle = direction.dot(&Vector3::x_axis()).clamp(-1.0, 1.0).acos();
        assert!(
            angle < 5.0_f64.to_radians(),
            "direction off by {} degrees",
            angle.to_degrees()
        );

        // Forward motion is monotonic along the trajectory.
        let xs: Vec<f64> = system.trajectory().iter().map(|p| p.translation.x).collect();
        for pair in xs.windows(2) {
            assert!(pair[1] >= pair[0] - 1e-9, "trajectory regressed: {:?}", xs);
        }

        system.shutdown();
    }

    #[test]
    fn zero_motion_sequence_stays_uninitialized() {
        // Ten identical frames: no parallax, nothing to triangulate.
        let frames = planar_frames(&[0.0; 10]);
        let mut system = planar_system(frames);
        let image = dummy_image();

        let mut skips = 0;
        for i in 0..10u64 {
            match system.process_frame(i, &image).unwrap() {
                FrameOutcome::Tracked(result) => {
                    // Only the very first frame produces an update.
                    assert_eq!(i, 0);
                    assert!(result.pose.translation.norm() < 1e-12);
                }
                FrameOutcome::Skipped(reason) => {
                    assert_eq!(reason, SkipReason::InitializationFailed);
                    skips += 1;
                }
            }
        }

        assert_eq!(skips, 9);
        assert_eq!(system.state(), TrackingState::Uninitialized);
        // No keyframe beyond the first was inserted.
        assert_eq!(system.shared_state().map.read().num_keyframes(), 1);
        assert_eq!(system.trajectory().len(), 1);

        system.shutdown();
    }

    #[test]
    fn garbage_frames_lose_tracking_and_recovery_works() {
        let camera = test_camera();
        let points = planar_grid(10, 8, 5.0);
        let pose_b = SE3 {
            rotation: nalgebra::UnitQuaternion::identity(),
            translation: Vector3::new(0.5, 0.0, 0.0),
        };
        let pose_recover = SE3 {
            rotation: nalgebra::UnitQuaternion::identity(),
            translation: Vector3::new(0.6, 0.0, 0.0),
        };

        let mut frames = planar_frames(&[0.0, 0.5]);
        // Frames whose descriptors match nothing in the reference.
        for _ in 0..4 {
            frames.push(feature_set_with_salt(
                &project_pixels(&points, &pose_b, &camera),
                1000,
            ));
        }
        frames.push(feature_set_from_pixels(&project_pixels(
            &points,
            &pose_recover,
            &camera,
        )));

        let mut system = planar_system(frames);
        let image = dummy_image();

        for i in 0..2u64 {
            assert!(system.process_frame(i, &image).unwrap().is_tracked());
        }
        for i in 2..6u64 {
            let outcome = system.process_frame(i, &image).unwrap();
            assert!(!outcome.is_tracked(), "garbage frame {i} must be skipped");
        }
        assert_eq!(system.state(), TrackingState::Lost);

        // A frame that matches the last good reference re-establishes
        // tracking without any relocalization machinery.
        let outcome = system.process_frame(6, &image).unwrap();
        assert!(outcome.is_tracked());
        assert_eq!(system.state(), TrackingState::Tracking);

        system.shutdown();
    }

    #[test]
    fn empty_first_frame_is_fatal() {
        let mut system = planar_system(vec![FeatureSet::default()]);
        let err = system.process_frame(0, &dummy_image());
        assert!(err.is_err());
        system.shutdown();
    }
}
