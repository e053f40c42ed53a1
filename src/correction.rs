//! Error correction: reprojection scoring, outlier partitioning, geometric
//! consistency checks and the post-optimization map audit.
//!
//! Consumed by both tracking (after every pose estimate) and the optimizer
//! (after every bundle adjustment pass).

use nalgebra::{Vector2, Vector3};
use tracing::debug;

use crate::config::TriangulationConfig;
use crate::geometry::{CameraModel, SE3};
use crate::map::{Map, MapPointId};

/// Pixel distance between an observed keypoint and the projection of a 3D
/// point through a camera pose (T_wc). Infinite for non-positive depth.
pub fn score_reprojection(
    point: &Vector3<f64>,
    pose: &SE3,
    observed: &Vector2<f64>,
    camera: &CameraModel,
) -> f64 {
    let p_cam = pose.inverse().transform_point(point);
    match camera.project(&p_cam) {
        Some(projected) => (projected - observed).norm(),
        None => f64::INFINITY,
    }
}

/// Partition 3D-2D correspondences into inliers and outliers by reprojection
/// error against a pose estimate. Returns index lists into the input slice.
pub fn partition_by_reprojection(
    candidates: &[(Vector3<f64>, Vector2<f64>)],
    pose: &SE3,
    camera: &CameraModel,
    threshold_px: f64,
) -> (Vec<usize>, Vec<usize>) {
    let mut inliers = Vec::new();
    let mut outliers = Vec::new();
    for (i, (point, observed)) in candidates.iter().enumerate() {
        if score_reprojection(point, pose, observed, camera) < threshold_px {
            inliers.push(i);
        } else {
            outliers.push(i);
        }
    }
    (inliers, outliers)
}

/// Geometric acceptance test for a newly triangulated point.
///
/// Requires positive depth in both views, reprojection within the configured
/// bound in both views, and sufficient parallax between the observing rays.
/// The parallax check rejects points produced by rotation-only motion, whose
/// rays are near parallel and whose depths are meaningless.
pub fn accept_new_point(
    point: &Vector3<f64>,
    pose_a: &SE3,
    pose_b: &SE3,
    observed_a: &Vector2<f64>,
    observed_b: &Vector2<f64>,
    camera: &CameraModel,
    config: &TriangulationConfig,
) -> bool {
    let p_cam_a = pose_a.inverse().transform_point(point);
    let p_cam_b = pose_b.inverse().transform_point(point);
    if p_cam_a.z <= 0.0 || p_cam_b.z <= 0.0 {
        return false;
    }

    let reproj_a = match camera.project(&p_cam_a) {
        Some(p) => p,
        None => return false,
    };
    let reproj_b = match camera.project(&p_cam_b) {
        Some(p) => p,
        None => return false,
    };
    if (reproj_a - observed_a).norm() > config.max_reproj_error_px
        || (reproj_b - observed_b).norm() > config.max_reproj_error_px
    {
        return false;
    }

    let ray_a = point - pose_a.translation;
    let ray_b = point - pose_b.translation;
    if ray_a.norm() < 1e-9 || ray_b.norm() < 1e-9 {
        return false;
    }
    let cos_parallax = (ray_a.normalize().dot(&ray_b.normalize())).clamp(-1.0, 1.0);
    cos_parallax < config.min_parallax_deg.to_radians().cos()
}

/// Re-score every observation of every live map point and invalidate the
/// points that fail the consistency rules: outlier status in more than half
/// of the observations, or negative depth in any observing keyframe.
/// Returns the number of points invalidated.
///
/// Run after each bundle adjustment pass, when poses and points have moved.
pub fn audit_map(map: &mut Map, camera: &CameraModel, threshold_px: f64) -> usize {
    let mut to_invalidate: Vec<MapPointId> = Vec::new();
    let mut marks: Vec<(MapPointId, crate::map::KeyFrameId, bool)> = Vec::new();

    for mp in map.map_points().filter(|mp| !mp.is_bad) {
        let mut behind_any = false;

        for (&kf_id, &feature_idx) in &mp.observations {
            let kf = match map.keyframe(kf_id) {
                Some(kf) => kf,
                None => continue,
            };
            let observed = match kf.features.keypoints.get(feature_idx) {
                Some(kp) => kp.position(),
                None => continue,
            };

            let p_cam = kf.pose.inverse().transform_point(&mp.position);
            if p_cam.z <= 0.0 {
                behind_any = true;
                marks.push((mp.id, kf_id, true));
                continue;
            }
            let err = score_reprojection(&mp.position, &kf.pose, &observed, camera);
            marks.push((mp.id, kf_id, err >= threshold_px));
        }

        if behind_any {
            to_invalidate.push(mp.id);
        }
    }

    for (mp_id, kf_id, is_outlier) in marks {
        if let Some(mp) = map.map_point_mut(mp_id) {
            if is_outlier {
                mp.mark_outlier(kf_id);
            } else {
                mp.clear_outlier(kf_id);
            }
        }
    }

    for mp in map.map_points().filter(|mp| !mp.is_bad) {
        if mp.is_majority_outlier() && !to_invalidate.contains(&mp.id) {
            to_invalidate.push(mp.id);
        }
    }

    let count = to_invalidate.len();
    for mp_id in to_invalidate {
        map.invalidate(mp_id);
    }
    if count > 0 {
        debug!(invalidated = count, "map audit invalidated points");
    }
    count
}
