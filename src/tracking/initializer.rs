//! Two-view map initialization.

use nalgebra::Vector2;
use tracing::debug;

use crate::config::SlamConfig;
use crate::correction::accept_new_point;
use crate::error::{Result, SlamError};
use crate::features::{FeatureMatch, FeatureSet};
use crate::geometry::two_view::estimate_relative_pose;
use crate::geometry::{triangulate, CameraModel, TwoViewModel, SE3};

/// A triangulated point of the initial map, indexed into both frames.
pub struct InitialPoint {
    pub ref_idx: usize,
    pub cur_idx: usize,
    pub position: nalgebra::Vector3<f64>,
}

/// Result of a successful initialization attempt.
pub struct Initialization {
    /// Pose of the second frame, camera-to-world. Scale is fixed by the
    /// unit-norm two-view baseline.
    pub pose: SE3,
    pub points: Vec<InitialPoint>,
    pub model: TwoViewModel,
}

/// Try to initialize a map from the reference frame and the current frame.
///
/// Fails with `InitializationFailed` when the relative pose estimate is
/// degenerate or too few triangulated points survive validation; the caller
/// retries with the next frame.
pub fn initialize(
    reference: &FeatureSet,
    reference_pose: &SE3,
    current: &FeatureSet,
    matches: &[FeatureMatch],
    camera: &CameraModel,
    config: &SlamConfig,
) -> Result<Initialization> {
    if matches.len() < 8 {
        return Err(SlamError::InitializationFailed(format!(
            "{} matches with the reference frame",
            matches.len()
        )));
    }

    let pixels_a: Vec<Vector2<f64>> = matches
        .iter()
        .map(|m| reference.keypoints[m.query_idx].position())
        .collect();
    let pixels_b: Vec<Vector2<f64>> = matches
        .iter()
        .map(|m| current.keypoints[m.train_idx].position())
        .collect();

    let relative = estimate_relative_pose(&pixels_a, &pixels_b, camera, &config.two_view)
        .map_err(|e| SlamError::InitializationFailed(e.to_string()))?;

    // T_c2w = T_c2c1 * T_c1w, then back to camera-to-world.
    let relative_cw = SE3 {
        rotation: relative.rotation,
        translation: relative.translation,
    };
    let current_pose = relative_cw.compose(&reference_pose.inverse()).inverse();

    let mut points = Vec::new();
    for (i, m) in matches.iter().enumerate() {
        if !relative.inliers[i] {
            continue;
        }
        let position = match triangulate(
            &pixels_a[i],
            &pixels_b[i],
            reference_pose,
            &current_pose,
            camera,
            config.triangulation.max_reproj_error_px,
        ) {
            Some(p) => p,
            None => continue,
        };
        if !accept_new_point(
            &position,
            reference_pose,
            &current_pose,
            &pixels_a[i],
            &pixels_b[i],
            camera,
            &config.triangulation,
        ) {
            continue;
        }
        points.push(InitialPoint {
            ref_idx: m.query_idx,
            cur_idx: m.train_idx,
            position,
        });
    }

    if points.len() < config.tracking.min_init_points {
        return Err(SlamError::InitializationFailed(format!(
            "{} triangulated points, need {}",
            points.len(),
            config.tracking.min_init_points
        )));
    }

    debug!(
        points = points.len(),
        model = ?relative.model,
        "two-view initialization succeeded"
    );

    Ok(Initialization {
        pose: current_pose,
        points,
        model: relative.model,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{feature_set_from_pixels, planar_grid, project_pixels, test_camera};
    use nalgebra::Vector3;

    fn identity_matches(n: usize) -> Vec<FeatureMatch> {
        (0..n)
            .map(|i| FeatureMatch {
                query_idx: i,
                train_idx: i,
                distance: 0,
            })
            .collect()
    }

    #[test]
    fn initializes_from_planar_translation() {
        let camera = test_camera();
        let config = SlamConfig::default();
        let points = planar_grid(10, 8, 5.0);

        let pose_a = SE3::identity();
        let pose_b = SE3 {
            rotation: nalgebra::UnitQuaternion::identity(),
            translation: Vector3::new(0.5, 0.0, 0.0),
        };

        let px_a = project_pixels(&points, &pose_a, &camera);
        let px_b = project_pixels(&points, &pose_b, &camera);
        let ref_set = feature_set_from_pixels(&px_a);
        let cur_set = feature_set_from_pixels(&px_b);

        let init = initialize(
            &ref_set,
            &SE3::identity(),
            &cur_set,
            &identity_matches(points.len()),
            &camera,
            &config,
        )
        .expect("planar pure translation must initialize");

        assert!(init.points.len() >= config.tracking.min_init_points);

        // Recovered motion direction within 5 degrees of ground truth (+x),
        // up to monocular scale.
        let dir = init.pose.translation.normalize();
        let angle = dir.dot(&Vector3::x_axis()).clamp(-1.0, 1.0).acos();
        assert!(
            angle < 5.0_f64.to_radians(),
            "direction off by {} degrees",
            angle.to_degrees()
        );
    }

    #[test]
    fn zero_motion_fails_without_panicking() {
        let camera = test_camera();
        let config = SlamConfig::default();
        let points = planar_grid(10, 8, 5.0);

        let px = project_pixels(&points, &SE3::identity(), &camera);
        let set = feature_set_from_pixels(&px);

        let err = initialize(
            &set,
            &SE3::identity(),
            &set,
            &identity_matches(points.len()),
            &camera,
            &config,
        );
        assert!(matches!(err, Err(SlamError::InitializationFailed(_))));
    }

    #[test]
    fn too_few_matches_fail() {
        let camera = test_camera();
        let config = SlamConfig::default();
        let set = feature_set_from_pixels(&[Vector2::new(10.0, 10.0)]);

        let err = initialize(
            &set,
            &SE3::identity(),
            &set,
            &identity_matches(1),
            &camera,
            &config,
        );
        assert!(matches!(err, Err(SlamError::InitializationFailed(_))));
    }
}
