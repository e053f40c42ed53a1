//! Perspective-n-point pose estimation.
//!
//! A 6-point DLT minimal solver inside RANSAC seeds a pose-only damped
//! Gauss-Newton refinement with Huber weighting. Below 6 correspondences the
//! solver refines directly from the caller's prior pose instead of sampling.

use nalgebra::{DMatrix, Matrix3, Matrix6, Matrix2x6, UnitQuaternion, Vector2, Vector3, Vector6};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::config::PnPConfig;
use crate::error::{Result, SlamError};
use crate::geometry::{CameraModel, SE3};

/// Result of an absolute pose solve.
pub struct PnPResult {
    /// Estimated camera pose, camera-to-world (T_wc).
    pub pose: SE3,
    /// Inlier flag per correspondence.
    pub inlier_mask: Vec<bool>,
    /// Reprojection error per correspondence, in pixels.
    pub reproj_errors: Vec<f64>,
}

impl PnPResult {
    pub fn num_inliers(&self) -> usize {
        self.inlier_mask.iter().filter(|&&b| b).count()
    }
}

/// Estimate the camera pose from 3D-2D correspondences.
///
/// `prior` seeds the refinement and serves as a fallback model; it is
/// required below 6 correspondences (identity is assumed if absent).
/// Fails with `DegenerateGeometry` below 4 correspondences or when too few
/// inliers survive.
pub fn estimate_absolute_pose(
    points3d: &[Vector3<f64>],
    pixels: &[Vector2<f64>],
    camera: &CameraModel,
    prior: Option<&SE3>,
    config: &PnPConfig,
) -> Result<PnPResult> {
    if points3d.len() != pixels.len() {
        return Err(SlamError::invalid_input(
            "3D and 2D correspondence slices differ in length",
        ));
    }
    let n = points3d.len();
    if n < 4 {
        return Err(SlamError::degenerate(format!(
            "{} correspondences, need at least 4",
            n
        )));
    }

    let prior_cw = prior.map(|p| p.inverse());
    let threshold = config.inlier_threshold_px;

    // Seed A: RANSAC over 6-point DLT samples. The DLT is rank deficient
    // for coplanar points, so its winner is a candidate, never the only
    // answer.
    let mut ransac_cw: Option<SE3> = None;
    let mut ransac_count = 0usize;
    if n >= 6 {
        let mut rng = StdRng::seed_from_u64(config.ransac_seed);
        for _ in 0..config.ransac_iterations {
            let idx = rand::seq::index::sample(&mut rng, n, 6);
            let s_p: Vec<Vector3<f64>> = idx.iter().map(|j| points3d[j]).collect();
            let s_px: Vec<Vector2<f64>> = idx.iter().map(|j| pixels[j]).collect();

            let cw = match pnp_dlt(&s_p, &s_px, camera) {
                Some(cw) => cw,
                None => continue,
            };
            let count = count_inliers(&cw, points3d, pixels, camera, threshold);
            if count > ransac_count || ransac_cw.is_none() {
                ransac_count = count;
                ransac_cw = Some(cw);
            }
        }
    }

    // Refine each available seed and keep whichever pose explains the most
    // correspondences. The prior-seeded refinement is what survives planar
    // maps, where the DLT cannot be trusted.
    let mut refined_cw: Option<(SE3, usize)> = None;
    let mut consider = |seed_cw: &SE3, seed_count: usize| {
        let support: Vec<usize> = if seed_count >= 6 {
            (0..n)
                .filter(|&i| reproj_error(seed_cw, &points3d[i], &pixels[i], camera) < threshold)
                .collect()
        } else {
            (0..n).collect()
        };
        let candidate = refine_pose(
            seed_cw,
            &support,
            points3d,
            pixels,
            camera,
            config.refine_iterations,
            threshold,
        );
        let count = count_inliers(&candidate, points3d, pixels, camera, threshold);
        if refined_cw.as_ref().map_or(true, |(_, best)| count > *best) {
            refined_cw = Some((candidate, count));
        }
    };

    if let Some(ref cw) = ransac_cw {
        consider(cw, ransac_count);
    }
    if let Some(ref cw) = prior_cw {
        let count = count_inliers(cw, points3d, pixels, camera, threshold);
        consider(cw, count);
    } else if ransac_cw.is_none() {
        // Below 6 points with no prior: refine from identity.
        consider(&SE3::identity(), 0);
    }

    let (refined_cw, _) = refined_cw
        .ok_or_else(|| SlamError::degenerate("no initial pose model could be estimated"))?;

    // Final per-correspondence scores.
    let mut reproj_errors = Vec::with_capacity(n);
    let mut inlier_mask = Vec::with_capacity(n);
    for i in 0..n {
        let err = reproj_error(&refined_cw, &points3d[i], &pixels[i], camera);
        inlier_mask.push(err < threshold);
        reproj_errors.push(err);
    }

    let num_inliers = inlier_mask.iter().filter(|&&b| b).count();
    let required = config.min_inliers.min(n).max(4);
    if num_inliers < required {
        return Err(SlamError::degenerate(format!(
            "{num_inliers} inliers after refinement, need {required}"
        )));
    }

    Ok(PnPResult {
        pose: refined_cw.inverse(),
        inlier_mask,
        reproj_errors,
    })
}

fn reproj_error(
    pose_cw: &SE3,
    point: &Vector3<f64>,
    pixel: &Vector2<f64>,
    camera: &CameraModel,
) -> f64 {
    let p_cam = pose_cw.transform_point(point);
    match camera.project(&p_cam) {
        Some(projected) => (projected - pixel).norm(),
        None => f64::INFINITY,
    }
}

fn count_inliers(
    pose_cw: &SE3,
    points3d: &[Vector3<f64>],
    pixels: &[Vector2<f64>],
    camera: &CameraModel,
    threshold: f64,
) -> usize {
    points3d
        .iter()
        .zip(pixels.iter())
        .filter(|(p, px)| reproj_error(pose_cw, p, px, camera) < threshold)
        .count()
}

/// Direct linear transform over normalized coordinates. Returns the
/// world-to-camera transform, rotation orthogonalized by SVD.
fn pnp_dlt(
    points3d: &[Vector3<f64>],
    pixels: &[Vector2<f64>],
    camera: &CameraModel,
) -> Option<SE3> {
    let n = points3d.len();
    if n < 6 {
        return None;
    }

    let mut a = DMatrix::<f64>::zeros(2 * n, 12);
    for (i, (obj, pix)) in points3d.iter().zip(pixels.iter()).enumerate() {
        let norm = camera.normalize(pix);
        let (xn, yn) = (norm.x, norm.y);
        let (xw, yw, zw) = (obj.x, obj.y, obj.z);

        let r0 = 2 * i;
        let r1 = r0 + 1;

        a[(r0, 0)] = xw;
        a[(r0, 1)] = yw;
        a[(r0, 2)] = zw;
        a[(r0, 3)] = 1.0;
        a[(r0, 8)] = -xn * xw;
        a[(r0, 9)] = -xn * yw;
        a[(r0, 10)] = -xn * zw;
        a[(r0, 11)] = -xn;

        a[(r1, 4)] = xw;
        a[(r1, 5)] = yw;
        a[(r1, 6)] = zw;
        a[(r1, 7)] = 1.0;
        a[(r1, 8)] = -yn * xw;
        a[(r1, 9)] = -yn * yw;
        a[(r1, 10)] = -yn * zw;
        a[(r1, 11)] = -yn;
    }

    let svd = a.svd(true, true);
    let vt = svd.v_t?;
    let p = vt.row(vt.nrows() - 1);

    let m = Matrix3::new(p[0], p[1], p[2], p[4], p[5], p[6], p[8], p[9], p[10]);
    let mut t = Vector3::new(p[3], p[7], p[11]);

    let svd_m = m.svd(true, true);
    let u = svd_m.u?;
    let vt_m = svd_m.v_t?;

    let mut r = u * vt_m;
    let scale = (svd_m.singular_values[0] + svd_m.singular_values[1] + svd_m.singular_values[2])
        / 3.0;
    if scale.abs() < 1e-12 {
        return None;
    }
    t /= scale;

    if r.determinant() < 0.0 {
        r = -r;
        t = -t;
    }

    Some(SE3::from_rt(r, t))
}

/// Pose-only damped Gauss-Newton over the supporting correspondences.
/// Left-multiplicative update on T_cw with the standard 2x6 projection
/// Jacobian; Huber weighting at the inlier threshold. Only error-decreasing
/// steps are accepted, so the result is never worse than the seed.
fn refine_pose(
    initial_cw: &SE3,
    support: &[usize],
    points3d: &[Vector3<f64>],
    pixels: &[Vector2<f64>],
    camera: &CameraModel,
    iterations: usize,
    huber_threshold: f64,
) -> SE3 {
    if support.is_empty() {
        return initial_cw.clone();
    }

    let mut pose_cw = initial_cw.clone();
    let mut lambda = 1e-3;

    let total_error = |cw: &SE3| -> f64 {
        support
            .iter()
            .map(|&i| {
                let err = reproj_error(cw, &points3d[i], &pixels[i], camera).min(1e6);
                huber_cost(err, huber_threshold)
            })
            .sum()
    };

    let mut current_error = total_error(&pose_cw);

    for _ in 0..iterations {
        let mut h = Matrix6::<f64>::zeros();
        let mut b = Vector6::<f64>::zeros();

        for &i in support {
            let p_cam = pose_cw.transform_point(&points3d[i]);
            if p_cam.z <= 1e-6 {
                continue;
            }
            let projected = Vector2::new(
                camera.fx * p_cam.x / p_cam.z + camera.cx,
                camera.fy * p_cam.y / p_cam.z + camera.cy,
            );
            let residual = pixels[i] - projected;
            let weight = huber_weight(residual.norm(), huber_threshold);

            let jac = projection_jacobian(&p_cam, camera);
            h += weight * jac.transpose() * jac;
            b += weight * jac.transpose() * residual;
        }

        let mut damped = h;
        for d in 0..6 {
            damped[(d, d)] += lambda * damped[(d, d)].max(1e-9);
        }

        let delta = match damped.lu().solve(&(-b)) {
            Some(d) => d,
            None => break,
        };
        if !delta.iter().all(|v| v.is_finite()) {
            break;
        }

        let trial = apply_left_update(&pose_cw, &delta);
        let trial_error = total_error(&trial);

        if trial_error < current_error {
            pose_cw = trial;
            current_error = trial_error;
            lambda = (lambda * 0.1).max(1e-10);
            if delta.norm() < 1e-10 {
                break;
            }
        } else {
            lambda = (lambda * 10.0).min(1e8);
        }
    }

    pose_cw
}

/// Jacobian of the residual (observed - projected) with respect to a left
/// multiplicative se(3) perturbation of T_cw, columns
/// [rot_x, rot_y, rot_z, trans_x, trans_y, trans_z] (g2o convention).
fn projection_jacobian(p_cam: &Vector3<f64>, camera: &CameraModel) -> Matrix2x6<f64> {
    let x = p_cam.x;
    let y = p_cam.y;
    let z = p_cam.z;
    let invz = 1.0 / z;
    let invz2 = invz * invz;
    let fx = camera.fx;
    let fy = camera.fy;

    Matrix2x6::new(
        x * y * invz2 * fx,
        -(1.0 + x * x * invz2) * fx,
        y * invz * fx,
        -invz * fx,
        0.0,
        x * invz2 * fx,
        (1.0 + y * y * invz2) * fy,
        -x * y * invz2 * fy,
        -x * invz * fy,
        0.0,
        -invz * fy,
        y * invz2 * fy,
    )
}

fn huber_weight(error: f64, threshold: f64) -> f64 {
    if error <= threshold {
        1.0
    } else {
        threshold / error
    }
}

fn huber_cost(error: f64, threshold: f64) -> f64 {
    if error <= threshold {
        0.5 * error * error
    } else {
        threshold * (error - 0.5 * threshold)
    }
}

/// Apply a left-multiplicative update Exp(delta) * T to a world-to-camera
/// transform, delta = [rotation; translation].
fn apply_left_update(pose_cw: &SE3, delta: &Vector6<f64>) -> SE3 {
    let omega = Vector3::new(delta[0], delta[1], delta[2]);
    let upsilon = Vector3::new(delta[3], delta[4], delta[5]);

    let angle = omega.norm();
    let rotation = if angle > 1e-12 {
        UnitQuaternion::from_axis_angle(&nalgebra::Unit::new_normalize(omega), angle)
    } else {
        UnitQuaternion::identity()
    };

    SE3 {
        rotation: rotation * pose_cw.rotation,
        translation: rotation * pose_cw.translation + upsilon,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{scattered_cloud, test_camera};
    use approx::assert_relative_eq;
    use nalgebra::UnitQuaternion;

    fn make_observations(
        points: &[Vector3<f64>],
        pose: &SE3,
        camera: &CameraModel,
    ) -> Vec<Vector2<f64>> {
        let cw = pose.inverse();
        points
            .iter()
            .map(|p| camera.project(&cw.transform_point(p)).unwrap())
            .collect()
    }

    #[test]
    fn recovers_known_pose() {
        let camera = test_camera();
        let points = scattered_cloud(60);
        let pose = SE3 {
            rotation: UnitQuaternion::from_euler_angles(0.02, -0.05, 0.01),
            translation: Vector3::new(0.3, -0.1, 0.2),
        };
        let pixels = make_observations(&points, &pose, &camera);

        let result =
            estimate_absolute_pose(&points, &pixels, &camera, None, &PnPConfig::default())
                .expect("noise-free PnP must succeed");

        assert_relative_eq!(result.pose.translation, pose.translation, epsilon = 1e-4);
        assert!((result.pose.rotation.inverse() * pose.rotation).angle() < 1e-4);
        assert_eq!(result.num_inliers(), points.len());
    }

    #[test]
    fn tolerates_outliers() {
        let camera = test_camera();
        let points = scattered_cloud(60);
        let pose = SE3 {
            rotation: UnitQuaternion::from_euler_angles(0.0, 0.03, 0.0),
            translation: Vector3::new(-0.2, 0.1, 0.1),
        };
        let mut pixels = make_observations(&points, &pose, &camera);
        for i in 0..12 {
            pixels[i * 5].x = (pixels[i * 5].x + 211.0) % camera.width as f64;
            pixels[i * 5].y = (pixels[i * 5].y + 97.0) % camera.height as f64;
        }

        let result =
            estimate_absolute_pose(&points, &pixels, &camera, None, &PnPConfig::default())
                .expect("20% outliers must not break PnP");

        assert_relative_eq!(result.pose.translation, pose.translation, epsilon = 1e-3);
        assert!(result.num_inliers() >= 48);
        // Corrupted correspondences must be flagged.
        assert!(!result.inlier_mask[0]);
    }

    #[test]
    fn refines_from_prior_with_few_points() {
        let camera = test_camera();
        let points = scattered_cloud(5);
        let pose = SE3 {
            rotation: UnitQuaternion::identity(),
            translation: Vector3::new(0.05, 0.02, 0.0),
        };
        let pixels = make_observations(&points, &pose, &camera);

        // Slightly perturbed prior.
        let prior = SE3 {
            rotation: UnitQuaternion::identity(),
            translation: Vector3::new(0.03, 0.0, 0.01),
        };

        let result = estimate_absolute_pose(
            &points,
            &pixels,
            &camera,
            Some(&prior),
            &PnPConfig::default(),
        )
        .expect("prior-seeded refinement must succeed");

        for err in &result.reproj_errors {
            assert!(*err < 4.0, "reprojection error {err}");
        }
    }

    #[test]
    fn too_few_correspondences_is_degenerate() {
        let camera = test_camera();
        let points = scattered_cloud(3);
        let pixels: Vec<Vector2<f64>> =
            points.iter().map(|p| camera.project(p).unwrap()).collect();

        let err = estimate_absolute_pose(&points, &pixels, &camera, None, &PnPConfig::default());
        assert!(matches!(err, Err(SlamError::DegenerateGeometry(_))));
    }
}
