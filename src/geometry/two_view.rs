//! Two-view relative pose estimation.
//!
//! Estimates the motion between two calibrated views from 2D-2D
//! correspondences. Two models are fitted with RANSAC over normalized image
//! coordinates: an essential matrix (8-point) and a homography (4-point DLT).
//! The homography path exists because the linear 8-point system is rank
//! deficient when the observed points are coplanar; a planar scene is
//! reconstructed from the homography via the Faugeras decomposition instead.
//!
//! Candidate motions from either decomposition are disambiguated by
//! triangulating the inliers and voting on positive depth, reprojection
//! error and parallax.

use nalgebra::{DMatrix, Matrix3, Matrix3x4, UnitQuaternion, Vector2, Vector3};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::config::TwoViewConfig;
use crate::error::{Result, SlamError};
use crate::geometry::triangulation::triangulate_from_projections;
use crate::geometry::CameraModel;

/// Model the winning reconstruction came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TwoViewModel {
    Essential,
    Homography,
}

/// Relative motion of the second camera with respect to the first:
/// `p_cam2 = rotation * p_cam1 + translation`, translation unit norm
/// (monocular scale is unobservable).
#[derive(Debug, Clone)]
pub struct RelativePose {
    pub rotation: UnitQuaternion<f64>,
    pub translation: Vector3<f64>,
    /// Per-correspondence inlier mask; true entries both supported the
    /// winning model and triangulated in front of both cameras.
    pub inliers: Vec<bool>,
    pub model: TwoViewModel,
}

impl RelativePose {
    pub fn num_inliers(&self) -> usize {
        self.inliers.iter().filter(|&&b| b).count()
    }
}

/// Minimum parallax (degrees) of the winning candidate's triangulated
/// points; below this the motion is indistinguishable from rotation only.
const MIN_MOTION_PARALLAX_DEG: f64 = 0.2;

/// Estimate the relative pose between two views from pixel correspondences.
///
/// Fails with `DegenerateGeometry` when fewer than 8 correspondences are
/// available, when the best model's inlier ratio falls below the configured
/// threshold, or when no candidate motion wins the cheirality vote cleanly
/// (e.g. zero baseline).
pub fn estimate_relative_pose(
    pixels_a: &[Vector2<f64>],
    pixels_b: &[Vector2<f64>],
    camera: &CameraModel,
    config: &TwoViewConfig,
) -> Result<RelativePose> {
    if pixels_a.len() != pixels_b.len() {
        return Err(SlamError::invalid_input(
            "correspondence slices differ in length",
        ));
    }
    let n = pixels_a.len();
    if n < 8 {
        return Err(SlamError::degenerate(format!(
            "{} correspondences, need at least 8",
            n
        )));
    }

    let norm_a: Vec<Vector2<f64>> = pixels_a.iter().map(|p| camera.normalize(p)).collect();
    let norm_b: Vec<Vector2<f64>> = pixels_b.iter().map(|p| camera.normalize(p)).collect();

    let thresh = config.inlier_threshold_px / camera.mean_focal();
    let thresh2 = thresh * thresh;

    let mut rng = StdRng::seed_from_u64(config.ransac_seed);

    let essential = ransac_essential(&norm_a, &norm_b, thresh2, config.ransac_iterations, &mut rng);
    let homography =
        ransac_homography(&norm_a, &norm_b, thresh2, config.ransac_iterations, &mut rng);

    let e_count = essential.as_ref().map_or(0, |m| m.num_inliers);
    let h_count = homography.as_ref().map_or(0, |m| m.num_inliers);

    let best_count = e_count.max(h_count);
    if (best_count as f64) < config.min_inlier_ratio * n as f64 {
        return Err(SlamError::degenerate(format!(
            "best model explains {}/{} correspondences",
            best_count, n
        )));
    }

    // Planar-dominant scenes: the homography explains (almost) everything the
    // essential matrix does, and the 8-point estimate cannot be trusted.
    let prefer_homography =
        h_count as f64 / (h_count + e_count).max(1) as f64 > config.planar_score_ratio;

    let order: [TwoViewModel; 2] = if prefer_homography {
        [TwoViewModel::Homography, TwoViewModel::Essential]
    } else {
        [TwoViewModel::Essential, TwoViewModel::Homography]
    };

    for model in order {
        let reconstructed = match model {
            TwoViewModel::Essential => essential.as_ref().and_then(|m| {
                let candidates = decompose_essential(&m.matrix);
                select_motion(&candidates, &norm_a, &norm_b, &m.inliers, thresh2)
            }),
            TwoViewModel::Homography => homography.as_ref().and_then(|m| {
                let candidates = decompose_homography(&m.matrix);
                select_motion(&candidates, &norm_a, &norm_b, &m.inliers, thresh2)
            }),
        };

        if let Some(motion) = reconstructed {
            return Ok(RelativePose {
                rotation: UnitQuaternion::from_matrix(&motion.rotation),
                translation: motion.translation,
                inliers: motion.supported,
                model,
            });
        }
    }

    Err(SlamError::degenerate(
        "no candidate motion passed the cheirality vote",
    ))
}

struct RansacModel {
    matrix: Matrix3<f64>,
    inliers: Vec<bool>,
    num_inliers: usize,
}

fn ransac_essential(
    norm_a: &[Vector2<f64>],
    norm_b: &[Vector2<f64>],
    thresh2: f64,
    iterations: usize,
    rng: &mut StdRng,
) -> Option<RansacModel> {
    let n = norm_a.len();
    let mut best: Option<RansacModel> = None;

    for _ in 0..iterations {
        let idx = rand::seq::index::sample(rng, n, 8);
        let s_a: Vec<Vector2<f64>> = idx.iter().map(|j| norm_a[j]).collect();
        let s_b: Vec<Vector2<f64>> = idx.iter().map(|j| norm_b[j]).collect();

        let e = match eight_point(&s_a, &s_b) {
            Some(e) => e,
            None => continue,
        };

        let mut mask = vec![false; n];
        let mut count = 0usize;
        for j in 0..n {
            if sampson_error(&e, &norm_a[j], &norm_b[j]) <= thresh2 {
                mask[j] = true;
                count += 1;
            }
        }

        if best.as_ref().map_or(true, |b| count > b.num_inliers) {
            best = Some(RansacModel {
                matrix: e,
                inliers: mask,
                num_inliers: count,
            });
        }
    }

    // Refit on the consensus set.
    let mut best = best?;
    if best.num_inliers >= 8 {
        let in_a: Vec<Vector2<f64>> = select(norm_a, &best.inliers);
        let in_b: Vec<Vector2<f64>> = select(norm_b, &best.inliers);
        if let Some(refined) = eight_point(&in_a, &in_b) {
            best.matrix = refined;
        }
    }
    Some(best)
}

fn ransac_homography(
    norm_a: &[Vector2<f64>],
    norm_b: &[Vector2<f64>],
    thresh2: f64,
    iterations: usize,
    rng: &mut StdRng,
) -> Option<RansacModel> {
    let n = norm_a.len();
    let mut best: Option<RansacModel> = None;

    for _ in 0..iterations {
        let idx = rand::seq::index::sample(rng, n, 4);
        let s_a: Vec<Vector2<f64>> = idx.iter().map(|j| norm_a[j]).collect();
        let s_b: Vec<Vector2<f64>> = idx.iter().map(|j| norm_b[j]).collect();

        let h = match homography_dlt(&s_a, &s_b) {
            Some(h) => h,
            None => continue,
        };

        let mut mask = vec![false; n];
        let mut count = 0usize;
        for j in 0..n {
            // Symmetric transfer error, so double the one-way budget.
            if homography_symmetric_error(&h, &norm_a[j], &norm_b[j]) <= 2.0 * thresh2 {
                mask[j] = true;
                count += 1;
            }
        }

        if best.as_ref().map_or(true, |b| count > b.num_inliers) {
            best = Some(RansacModel {
                matrix: h,
                inliers: mask,
                num_inliers: count,
            });
        }
    }

    let mut best = best?;
    if best.num_inliers >= 4 {
        let in_a: Vec<Vector2<f64>> = select(norm_a, &best.inliers);
        let in_b: Vec<Vector2<f64>> = select(norm_b, &best.inliers);
        if let Some(refined) = homography_dlt(&in_a, &in_b) {
            best.matrix = refined;
        }
    }
    Some(best)
}

fn select(points: &[Vector2<f64>], mask: &[bool]) -> Vec<Vector2<f64>> {
    points
        .iter()
        .zip(mask.iter())
        .filter_map(|(p, &m)| m.then_some(*p))
        .collect()
}

/// Eight-point estimate of the essential matrix from normalized coordinates,
/// with the (s, s, 0) singular value constraint enforced.
fn eight_point(pts_a: &[Vector2<f64>], pts_b: &[Vector2<f64>]) -> Option<Matrix3<f64>> {
    let n = pts_a.len();
    if n < 8 {
        return None;
    }

    // x_b^T E x_a = 0, row per correspondence over vec(E). Padding to at
    // least 9 rows keeps the SVD full so the null direction is available
    // (a thin SVD of an 8x9 system drops it).
    let mut a = DMatrix::<f64>::zeros(n.max(9), 9);
    for i in 0..n {
        let (x1, y1) = (pts_a[i].x, pts_a[i].y);
        let (x2, y2) = (pts_b[i].x, pts_b[i].y);
        a[(i, 0)] = x2 * x1;
        a[(i, 1)] = x2 * y1;
        a[(i, 2)] = x2;
        a[(i, 3)] = y2 * x1;
        a[(i, 4)] = y2 * y1;
        a[(i, 5)] = y2;
        a[(i, 6)] = x1;
        a[(i, 7)] = y1;
        a[(i, 8)] = 1.0;
    }

    let svd = a.svd(true, true);
    let vt = svd.v_t?;
    let ev = vt.row(vt.nrows() - 1);
    let e = Matrix3::new(
        ev[0], ev[1], ev[2], ev[3], ev[4], ev[5], ev[6], ev[7], ev[8],
    );
    if !e.iter().all(|v| v.is_finite()) {
        return None;
    }

    // Project onto the essential manifold.
    let svd3 = e.svd(true, true);
    let u = svd3.u?;
    let vt3 = svd3.v_t?;
    let s = 0.5 * (svd3.singular_values[0] + svd3.singular_values[1]);
    let sigma = Matrix3::new(s, 0.0, 0.0, 0.0, s, 0.0, 0.0, 0.0, 0.0);
    Some(u * sigma * vt3)
}

/// First-order (Sampson) approximation of the squared epipolar distance.
fn sampson_error(e: &Matrix3<f64>, p_a: &Vector2<f64>, p_b: &Vector2<f64>) -> f64 {
    let x1 = Vector3::new(p_a.x, p_a.y, 1.0);
    let x2 = Vector3::new(p_b.x, p_b.y, 1.0);
    let ex1 = e * x1;
    let etx2 = e.transpose() * x2;
    let num = x2.dot(&ex1);
    let den = ex1[0] * ex1[0] + ex1[1] * ex1[1] + etx2[0] * etx2[0] + etx2[1] * etx2[1];
    if den <= 1e-18 {
        f64::INFINITY
    } else {
        num * num / den
    }
}

/// DLT estimate of the homography x_b ~ H x_a.
fn homography_dlt(pts_a: &[Vector2<f64>], pts_b: &[Vector2<f64>]) -> Option<Matrix3<f64>> {
    let n = pts_a.len();
    if n < 4 {
        return None;
    }

    // Two rows per correspondence; padded to at least 9 rows so the SVD
    // stays full and exposes the null direction for the 4-point sample.
    let mut a = DMatrix::<f64>::zeros((2 * n).max(9), 9);
    for i in 0..n {
        let (x, y) = (pts_a[i].x, pts_a[i].y);
        let (xp, yp) = (pts_b[i].x, pts_b[i].y);

        a[(2 * i, 0)] = -x;
        a[(2 * i, 1)] = -y;
        a[(2 * i, 2)] = -1.0;
        a[(2 * i, 6)] = xp * x;
        a[(2 * i, 7)] = xp * y;
        a[(2 * i, 8)] = xp;

        a[(2 * i + 1, 3)] = -x;
        a[(2 * i + 1, 4)] = -y;
        a[(2 * i + 1, 5)] = -1.0;
        a[(2 * i + 1, 6)] = yp * x;
        a[(2 * i + 1, 7)] = yp * y;
        a[(2 * i + 1, 8)] = yp;
    }

    let svd = a.svd(true, true);
    let vt = svd.v_t?;
    let hv = vt.row(vt.nrows() - 1);
    let h = Matrix3::new(
        hv[0], hv[1], hv[2], hv[3], hv[4], hv[5], hv[6], hv[7], hv[8],
    );
    h.iter().all(|v| v.is_finite()).then_some(h)
}

/// Symmetric transfer error of a homography, in squared normalized units.
fn homography_symmetric_error(h: &Matrix3<f64>, p_a: &Vector2<f64>, p_b: &Vector2<f64>) -> f64 {
    let x1 = Vector3::new(p_a.x, p_a.y, 1.0);
    let x2 = Vector3::new(p_b.x, p_b.y, 1.0);

    let fwd = h * x1;
    if fwd.z.abs() < 1e-12 {
        return f64::INFINITY;
    }
    let forward = (Vector2::new(fwd.x / fwd.z, fwd.y / fwd.z) - p_b).norm_squared();

    let h_inv = match h.try_inverse() {
        Some(inv) => inv,
        None => return f64::INFINITY,
    };
    let bwd = h_inv * x2;
    if bwd.z.abs() < 1e-12 {
        return f64::INFINITY;
    }
    let backward = (Vector2::new(bwd.x / bwd.z, bwd.y / bwd.z) - p_a).norm_squared();

    forward + backward
}

/// A candidate rigid motion (second camera w.r.t. the first).
struct MotionCandidate {
    rotation: Matrix3<f64>,
    translation: Vector3<f64>,
}

struct SelectedMotion {
    rotation: Matrix3<f64>,
    translation: Vector3<f64>,
    supported: Vec<bool>,
}

/// The four (R, t) candidates of an essential matrix.
fn decompose_essential(e: &Matrix3<f64>) -> Vec<MotionCandidate> {
    let svd = e.svd(true, true);
    let (mut u, mut vt) = match (svd.u, svd.v_t) {
        (Some(u), Some(vt)) => (u, vt),
        _ => return Vec::new(),
    };

    if u.determinant() < 0.0 {
        u = -u;
    }
    if vt.determinant() < 0.0 {
        vt = -vt;
    }

    let w = Matrix3::new(0.0, -1.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0);
    let r1 = u * w * vt;
    let r2 = u * w.transpose() * vt;
    let t = u.column(2).into_owned();

    vec![
        MotionCandidate { rotation: r1, translation: t },
        MotionCandidate { rotation: r1, translation: -t },
        MotionCandidate { rotation: r2, translation: t },
        MotionCandidate { rotation: r2, translation: -t },
    ]
}

/// The eight (R, t) hypotheses of a homography between calibrated views
/// (Faugeras SVD decomposition). Returns an empty set when the singular
/// values are too close together, which is the rotation-only case.
fn decompose_homography(h: &Matrix3<f64>) -> Vec<MotionCandidate> {
    let svd = h.svd(true, true);
    let (u, vt) = match (svd.u, svd.v_t) {
        (Some(u), Some(vt)) => (u, vt),
        _ => return Vec::new(),
    };
    let d1 = svd.singular_values[0];
    let d2 = svd.singular_values[1];
    let d3 = svd.singular_values[2];

    if d1 / d2 < 1.00001 || d2 / d3 < 1.00001 {
        return Vec::new();
    }

    let s = u.determinant() * vt.determinant();

    let aux1 = ((d1 * d1 - d2 * d2) / (d1 * d1 - d3 * d3)).max(0.0).sqrt();
    let aux3 = ((d2 * d2 - d3 * d3) / (d1 * d1 - d3 * d3)).max(0.0).sqrt();
    let x1 = [aux1, aux1, -aux1, -aux1];
    let x3 = [aux3, -aux3, aux3, -aux3];

    let mut candidates = Vec::with_capacity(8);

    // Case d' = d2.
    let aux_stheta =
        ((d1 * d1 - d2 * d2) * (d2 * d2 - d3 * d3)).max(0.0).sqrt() / ((d1 + d3) * d2);
    let ctheta = (d2 * d2 + d1 * d3) / ((d1 + d3) * d2);
    let stheta = [aux_stheta, -aux_stheta, -aux_stheta, aux_stheta];

    for i in 0..4 {
        let rp = Matrix3::new(
            ctheta, 0.0, -stheta[i],
            0.0, 1.0, 0.0,
            stheta[i], 0.0, ctheta,
        );
        let rotation = s * u * rp * vt;
        let tp = Vector3::new(x1[i], 0.0, -x3[i]) * (d1 - d3);
        let translation = u * tp;
        candidates.push(MotionCandidate { rotation, translation });
    }

    // Case d' = -d2.
    let aux_sphi =
        ((d1 * d1 - d2 * d2) * (d2 * d2 - d3 * d3)).max(0.0).sqrt() / ((d1 - d3) * d2);
    let cphi = (d1 * d3 - d2 * d2) / ((d1 - d3) * d2);
    let sphi = [aux_sphi, -aux_sphi, -aux_sphi, aux_sphi];

    for i in 0..4 {
        let rp = Matrix3::new(
            cphi, 0.0, sphi[i],
            0.0, -1.0, 0.0,
            sphi[i], 0.0, -cphi,
        );
        let rotation = s * u * rp * vt;
        let tp = Vector3::new(x1[i], 0.0, x3[i]) * (d1 + d3);
        let translation = u * tp;
        candidates.push(MotionCandidate { rotation, translation });
    }

    candidates
}

/// Disambiguate candidate motions by triangulating the inliers and voting on
/// positive depth in both views, reprojection error and parallax. Returns
/// `None` when no candidate clearly dominates.
fn select_motion(
    candidates: &[MotionCandidate],
    norm_a: &[Vector2<f64>],
    norm_b: &[Vector2<f64>],
    mask: &[bool],
    thresh2: f64,
) -> Option<SelectedMotion> {
    let n = norm_a.len();
    let n_masked = mask.iter().filter(|&&b| b).count();
    let p1 = Matrix3x4::new(
        1.0, 0.0, 0.0, 0.0,
        0.0, 1.0, 0.0, 0.0,
        0.0, 0.0, 1.0, 0.0,
    );

    struct Evaluation {
        rotation: Matrix3<f64>,
        translation: Vector3<f64>,
        supported: Vec<bool>,
        count: usize,
        median_parallax_cos: f64,
    }

    let mut evaluations: Vec<Evaluation> = Vec::new();

    for candidate in candidates {
        if candidate.translation.norm() < 1e-9 {
            continue;
        }
        let t = candidate.translation.normalize();
        let r = candidate.rotation;
        let p2 = Matrix3x4::new(
            r[(0, 0)], r[(0, 1)], r[(0, 2)], t.x,
            r[(1, 0)], r[(1, 1)], r[(1, 2)], t.y,
            r[(2, 0)], r[(2, 1)], r[(2, 2)], t.z,
        );
        // Camera-2 center expressed in camera-1 coordinates.
        let center_b = -(r.transpose() * t);

        let mut supported = vec![false; n];
        let mut count = 0usize;
        let mut parallax_cos: Vec<f64> = Vec::new();

        for i in 0..n {
            if !mask[i] {
                continue;
            }
            let point = match triangulate_from_projections(&p1, &p2, &norm_a[i], &norm_b[i]) {
                Some(p) if p.iter().all(|v| v.is_finite()) => p,
                _ => continue,
            };
            if point.z <= 0.0 {
                continue;
            }
            let in_b = r * point + t;
            if in_b.z <= 0.0 {
                continue;
            }

            let err_a = (Vector2::new(point.x / point.z, point.y / point.z) - norm_a[i])
                .norm_squared();
            let err_b =
                (Vector2::new(in_b.x / in_b.z, in_b.y / in_b.z) - norm_b[i]).norm_squared();
            // 2-sigma gate on the triangulated reprojection.
            if err_a > 4.0 * thresh2 || err_b > 4.0 * thresh2 {
                continue;
            }

            let ray_a = point.normalize();
            let ray_b = (point - center_b).normalize();
            parallax_cos.push(ray_a.dot(&ray_b).clamp(-1.0, 1.0));

            supported[i] = true;
            count += 1;
        }

        if count == 0 {
            continue;
        }

        parallax_cos.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let median_parallax_cos = parallax_cos[parallax_cos.len() / 2];

        evaluations.push(Evaluation {
            rotation: r,
            translation: t,
            supported,
            count,
            median_parallax_cos,
        });
    }

    evaluations.sort_by(|a, b| b.count.cmp(&a.count));
    let best = evaluations.first()?;

    let min_good = 8.max(n_masked / 2);
    if best.count < min_good {
        return None;
    }
    // Ambiguous twin candidate: cheirality cannot decide.
    if let Some(second) = evaluations.get(1) {
        if second.count as f64 > 0.9 * best.count as f64 {
            return None;
        }
    }
    let min_cos = MIN_MOTION_PARALLAX_DEG.to_radians().cos();
    if best.median_parallax_cos > min_cos {
        return None;
    }

    Some(SelectedMotion {
        rotation: best.rotation,
        translation: best.translation,
        supported: best.supported.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{planar_grid, project_pixels, scattered_cloud, test_camera};
    use crate::geometry::SE3;
    use approx::assert_relative_eq;
    use nalgebra::UnitQuaternion;

    fn angle_between(a: &Vector3<f64>, b: &Vector3<f64>) -> f64 {
        (a.normalize().dot(&b.normalize())).clamp(-1.0, 1.0).acos()
    }

    #[test]
    fn recovers_pose_for_general_scene() {
        let camera = test_camera();
        let points = scattered_cloud(120);

        let pose_a = SE3::identity();
        let pose_b = SE3 {
            rotation: UnitQuaternion::from_euler_angles(0.01, 0.04, -0.02),
            translation: Vector3::new(0.3, 0.05, 0.1),
        };

        let px_a = project_pixels(&points, &pose_a, &camera);
        let px_b = project_pixels(&points, &pose_b, &camera);

        let rel = estimate_relative_pose(&px_a, &px_b, &camera, &TwoViewConfig::default())
            .expect("general scene must reconstruct");

        // Ground truth extrinsics of camera B w.r.t. camera A.
        let cw_b = pose_b.inverse();
        let gt_rotation = cw_b.rotation;
        let gt_translation = cw_b.translation;

        let rot_err = (rel.rotation.inverse() * gt_rotation).angle();
        assert!(rot_err < 0.5_f64.to_radians(), "rotation error {rot_err}");
        assert!(
            angle_between(&rel.translation, &gt_translation) < 1.0_f64.to_radians(),
            "translation direction off by {}",
            angle_between(&rel.translation, &gt_translation).to_degrees()
        );
        assert_relative_eq!(rel.translation.norm(), 1.0, epsilon = 1e-9);
        assert!(rel.num_inliers() >= 100);
    }

    #[test]
    fn recovers_pose_for_planar_scene() {
        let camera = test_camera();
        let points = planar_grid(10, 8, 5.0);

        let pose_a = SE3::identity();
        let pose_b = SE3 {
            rotation: UnitQuaternion::identity(),
            translation: Vector3::new(0.5, 0.0, 0.0),
        };

        let px_a = project_pixels(&points, &pose_a, &camera);
        let px_b = project_pixels(&points, &pose_b, &camera);

        let rel = estimate_relative_pose(&px_a, &px_b, &camera, &TwoViewConfig::default())
            .expect("planar scene must reconstruct via the homography path");

        assert_eq!(rel.model, TwoViewModel::Homography);

        let gt_translation = pose_b.inverse().translation;
        assert!(
            angle_between(&rel.translation, &gt_translation) < 2.0_f64.to_radians(),
            "translation direction off by {}",
            angle_between(&rel.translation, &gt_translation).to_degrees()
        );
        assert!(rel.rotation.angle() < 0.5_f64.to_radians());
    }

    #[test]
    fn survives_outlier_contamination() {
        let camera = test_camera();
        let points = scattered_cloud(100);

        let pose_a = SE3::identity();
        let pose_b = SE3 {
            rotation: UnitQuaternion::from_euler_angles(0.0, 0.02, 0.0),
            translation: Vector3::new(0.25, 0.0, 0.05),
        };

        let px_a = project_pixels(&points, &pose_a, &camera);
        let mut px_b = project_pixels(&points, &pose_b, &camera);
        // Corrupt a fifth of the correspondences.
        for i in 0..20 {
            px_b[i * 5].x = (px_b[i * 5].x + 137.0) % camera.width as f64;
            px_b[i * 5].y = (px_b[i * 5].y + 89.0) % camera.height as f64;
        }

        let rel = estimate_relative_pose(&px_a, &px_b, &camera, &TwoViewConfig::default())
            .expect("20% outliers must not break RANSAC");

        let gt_translation = pose_b.inverse().translation;
        assert!(angle_between(&rel.translation, &gt_translation) < 2.0_f64.to_radians());
    }

    #[test]
    fn too_few_correspondences_is_degenerate() {
        let camera = test_camera();
        let px: Vec<Vector2<f64>> = (0..5).map(|i| Vector2::new(i as f64, 0.0)).collect();
        let err = estimate_relative_pose(&px, &px, &camera, &TwoViewConfig::default());
        assert!(matches!(err, Err(SlamError::DegenerateGeometry(_))));
    }

    #[test]
    fn zero_motion_is_degenerate_not_a_crash() {
        let camera = test_camera();
        let points = scattered_cloud(80);
        let pose = SE3::identity();
        let px = project_pixels(&points, &pose, &camera);

        let err = estimate_relative_pose(&px, &px, &camera, &TwoViewConfig::default());
        assert!(matches!(err, Err(SlamError::DegenerateGeometry(_))));
    }
}
