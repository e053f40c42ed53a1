//! Windowed bundle adjustment.
//!
//! Minimizes total reprojection error over a window of keyframe poses and
//! the map points they observe, with a Levenberg-Marquardt loop and a Huber
//! robust loss. The oldest keyframe of the window is held fixed as the gauge
//! anchor (monocular reconstruction has a 7-DOF unobservable ambiguity).
//!
//! The work is split into three phases so the solve never holds the map
//! lock:
//! 1. **collect** - extract a `BaProblem` from a map snapshot (read access),
//! 2. **solve**   - run LM on the extracted data, lock free,
//! 3. **apply**   - write refined poses/points back (write access), skipping
//!    entities invalidated in the meantime.
//!
//! The solver never fails: on non-convergence it returns the best iterate
//! found, and the error corrector re-filters outliers afterwards.

use std::collections::HashMap;

use nalgebra::{DMatrix, DVector, Matrix2x3, Matrix2x6, UnitQuaternion, Vector2, Vector3};
use tracing::debug;

use crate::config::BaConfig;
use crate::geometry::{CameraModel, SE3};
use crate::map::{KeyFrameId, Map, MapPointId, WindowSnapshot};

/// A single reprojection edge of the problem.
#[derive(Clone)]
struct BaObservation {
    /// Index into the optimized pose block, or None if the keyframe is fixed.
    pose_idx: Option<usize>,
    /// Index into the point block.
    point_idx: usize,
    /// Pose to use when the keyframe is fixed (T_cw).
    fixed_cw: Option<SE3>,
    observed: Vector2<f64>,
}

/// Extracted problem data; self-contained, no references into the map.
pub struct BaProblem {
    anchor: KeyFrameId,
    optimized_ids: Vec<KeyFrameId>,
    point_ids: Vec<MapPointId>,
    initial_poses_cw: Vec<SE3>,
    initial_points: Vec<Vector3<f64>>,
    observations: Vec<BaObservation>,
}

/// Refined values ready to be applied to the map.
pub struct BaSolution {
    /// Refined keyframe poses, camera-to-world.
    pub poses: HashMap<KeyFrameId, SE3>,
    /// Refined point positions.
    pub points: HashMap<MapPointId, Vector3<f64>>,
    pub iterations: usize,
    /// RMS reprojection error (pixels, Huber-weighted) before refinement.
    pub initial_error: f64,
    /// RMS reprojection error after refinement.
    pub final_error: f64,
}

/// PHASE 1: build the problem from a window snapshot.
///
/// The snapshot's oldest window keyframe becomes the anchor and is treated
/// as fixed together with all out-of-window observers. Returns `None` when
/// there is nothing to optimize.
pub fn collect_problem(snapshot: &WindowSnapshot) -> Option<BaProblem> {
    if snapshot.window.is_empty() || snapshot.points.is_empty() {
        return None;
    }

    let anchor = snapshot.window[0].0;
    let optimized: Vec<(KeyFrameId, SE3)> = snapshot.window[1..].to_vec();

    let optimized_ids: Vec<KeyFrameId> = optimized.iter().map(|(id, _)| *id).collect();
    let initial_poses_cw: Vec<SE3> = optimized.iter().map(|(_, pose)| pose.inverse()).collect();

    let pose_index: HashMap<KeyFrameId, usize> = optimized_ids
        .iter()
        .enumerate()
        .map(|(i, &id)| (id, i))
        .collect();

    let mut fixed_cw: HashMap<KeyFrameId, SE3> = HashMap::new();
    fixed_cw.insert(anchor, snapshot.window[0].1.inverse());
    for (id, pose) in &snapshot.fixed {
        fixed_cw.insert(*id, pose.inverse());
    }

    let point_ids: Vec<MapPointId> = snapshot.points.iter().map(|(id, _)| *id).collect();
    let initial_points: Vec<Vector3<f64>> = snapshot.points.iter().map(|(_, p)| *p).collect();
    let point_index: HashMap<MapPointId, usize> = point_ids
        .iter()
        .enumerate()
        .map(|(i, &id)| (id, i))
        .collect();

    let mut observations = Vec::with_capacity(snapshot.observations.len());
    for obs in &snapshot.observations {
        let point_idx = match point_index.get(&obs.mp_id) {
            Some(&i) => i,
            None => continue,
        };
        match pose_index.get(&obs.kf_id) {
            Some(&i) => observations.push(BaObservation {
                pose_idx: Some(i),
                point_idx,
                fixed_cw: None,
                observed: obs.pixel,
            }),
            None => {
                let cw = match fixed_cw.get(&obs.kf_id) {
                    Some(cw) => cw.clone(),
                    None => continue,
                };
                observations.push(BaObservation {
                    pose_idx: None,
                    point_idx,
                    fixed_cw: Some(cw),
                    observed: obs.pixel,
                });
            }
        }
    }

    if observations.is_empty() {
        return None;
    }

    Some(BaProblem {
        anchor,
        optimized_ids,
        point_ids,
        initial_poses_cw,
        initial_points,
        observations,
    })
}

/// PHASE 2: Levenberg-Marquardt over the extracted problem.
///
/// Pose updates are applied left-multiplicatively on T_cw with the standard
/// g2o 2x6 projection Jacobian; point updates are additive. Only
/// error-decreasing steps are accepted, so the returned iterate is never
/// worse than the input. `should_stop` is polled each iteration so an
/// in-flight solve can be aborted when tracking inserts a keyframe.
pub fn solve(
    problem: &BaProblem,
    camera: &CameraModel,
    config: &BaConfig,
    should_stop: &dyn Fn() -> bool,
) -> BaSolution {
    let num_poses = problem.initial_poses_cw.len();
    let num_points = problem.initial_points.len();
    let num_params = num_poses * 6 + num_points * 3;
    let num_residuals = problem.observations.len() * 2;

    let mut poses_cw = problem.initial_poses_cw.clone();
    let mut points = problem.initial_points.clone();

    let initial_error = rms_error(problem, camera, &poses_cw, &points, config.huber_threshold);
    let mut current_error = initial_error;

    let mut lambda = 1e-3;
    let mut iterations = 0usize;

    if num_params > 0 {
        for _ in 0..config.max_iterations {
            if should_stop() {
                break;
            }
            iterations += 1;

            let (jacobian, residuals) =
                linearize(problem, camera, &poses_cw, &points, config.huber_threshold);

            let gradient = jacobian.transpose() * &residuals;
            if gradient.norm() < config.gradient_tolerance {
                break;
            }

            let jtj = jacobian.transpose() * &jacobian;
            let mut damped = jtj;
            for i in 0..num_params {
                damped[(i, i)] += lambda * damped[(i, i)].max(1e-6);
            }

            let delta = match damped.lu().solve(&(-&gradient)) {
                Some(d) => d,
                None => break,
            };
            if !delta.iter().all(|v| v.is_finite()) {
                break;
            }
            if delta.norm() < config.param_tolerance {
                break;
            }

            let (trial_poses, trial_points) = apply_delta(&poses_cw, &points, &delta);
            let trial_error =
                rms_error(problem, camera, &trial_poses, &trial_points, config.huber_threshold);

            if trial_error < current_error {
                poses_cw = trial_poses;
                points = trial_points;
                current_error = trial_error;
                lambda = (lambda * 0.1).max(1e-10);
            } else {
                lambda = (lambda * 10.0).min(1e10);
            }
        }
    }

    debug!(
        iterations,
        initial_error, final_error = current_error, num_residuals, "bundle adjustment solve"
    );

    let poses = problem
        .optimized_ids
        .iter()
        .zip(poses_cw.iter())
        .map(|(id, cw)| (*id, cw.inverse()))
        .collect();
    let points = problem
        .point_ids
        .iter()
        .zip(points.iter())
        .map(|(id, p)| (*id, *p))
        .collect();

    BaSolution {
        poses,
        points,
        iterations,
        initial_error,
        final_error: current_error,
    }
}

/// PHASE 3: write refined values back. Entities invalidated while the solve
/// ran are skipped silently. Returns the number of entities updated.
pub fn apply(map: &mut Map, solution: &BaSolution) -> usize {
    let mut updated = 0;

    for (kf_id, pose) in &solution.poses {
        if let Some(kf) = map.keyframe_mut(*kf_id) {
            kf.pose = pose.clone();
            updated += 1;
        }
    }
    for (mp_id, position) in &solution.points {
        if let Some(mp) = map.map_point_mut(*mp_id) {
            if !mp.is_bad {
                mp.position = *position;
                updated += 1;
            }
        }
    }

    updated
}

/// Collect-solve-apply over the most recent `window` keyframes of a map the
/// caller already has exclusive access to. Returns `None` when there was
/// nothing to optimize.
pub fn bundle_adjust_window(
    map: &mut Map,
    camera: &CameraModel,
    config: &BaConfig,
    window: usize,
) -> Option<BaSolution> {
    let snapshot = map.snapshot_window(window);
    let problem = collect_problem(&snapshot)?;
    let solution = solve(&problem, camera, config, &|| false);
    apply(map, &solution);
    Some(solution)
}

impl BaProblem {
    pub fn anchor(&self) -> KeyFrameId {
        self.anchor
    }

    pub fn num_optimized_poses(&self) -> usize {
        self.optimized_ids.len()
    }
}

// ----------------------------------------------------------------------
// LM internals
// ----------------------------------------------------------------------

fn observation_cw<'a>(
    obs: &'a BaObservation,
    poses_cw: &'a [SE3],
) -> &'a SE3 {
    match obs.pose_idx {
        Some(i) => &poses_cw[i],
        None => obs.fixed_cw.as_ref().expect("fixed observation carries its pose"),
    }
}

/// Weighted residual of one observation, or a large finite penalty for
/// points that have wandered behind the camera.
fn residual(
    obs: &BaObservation,
    camera: &CameraModel,
    pose_cw: &SE3,
    point: &Vector3<f64>,
    huber_threshold: f64,
) -> Vector2<f64> {
    let p_cam = pose_cw.transform_point(point);
    if p_cam.z <= 1e-3 {
        return Vector2::new(100.0, 100.0);
    }
    let projected = Vector2::new(
        camera.fx * p_cam.x / p_cam.z + camera.cx,
        camera.fy * p_cam.y / p_cam.z + camera.cy,
    );
    let error = obs.observed - projected;
    let weight = huber_weight(error.norm(), huber_threshold);
    error * weight.sqrt()
}

fn rms_error(
    problem: &BaProblem,
    camera: &CameraModel,
    poses_cw: &[SE3],
    points: &[Vector3<f64>],
    huber_threshold: f64,
) -> f64 {
    let mut sum_sq = 0.0;
    for obs in &problem.observations {
        let r = residual(
            obs,
            camera,
            observation_cw(obs, poses_cw),
            &points[obs.point_idx],
            huber_threshold,
        );
        sum_sq += r.norm_squared();
    }
    (sum_sq / problem.observations.len().max(1) as f64).sqrt()
}

fn linearize(
    problem: &BaProblem,
    camera: &CameraModel,
    poses_cw: &[SE3],
    points: &[Vector3<f64>],
    huber_threshold: f64,
) -> (DMatrix<f64>, DVector<f64>) {
    let num_poses = poses_cw.len();
    let num_params = num_poses * 6 + points.len() * 3;
    let num_residuals = problem.observations.len() * 2;

    let mut jacobian = DMatrix::<f64>::zeros(num_residuals, num_params);
    let mut residuals = DVector::<f64>::zeros(num_residuals);

    for (i, obs) in problem.observations.iter().enumerate() {
        let pose_cw = observation_cw(obs, poses_cw);
        let point = &points[obs.point_idx];

        let r = residual(obs, camera, pose_cw, point, huber_threshold);
        residuals[2 * i] = r.x;
        residuals[2 * i + 1] = r.y;

        let p_cam = pose_cw.transform_point(point);
        if p_cam.z.abs() < 1e-6 {
            continue;
        }
        let weight_sqrt = huber_weight(r.norm(), huber_threshold).sqrt();

        if let Some(pose_idx) = obs.pose_idx {
            let j_pose = pose_jacobian(&p_cam, camera) * weight_sqrt;
            write_block_2x6(&mut jacobian, 2 * i, pose_idx * 6, &j_pose);
        }

        let j_point = point_jacobian(&p_cam, pose_cw, camera) * weight_sqrt;
        write_block_2x3(&mut jacobian, 2 * i, num_poses * 6 + obs.point_idx * 3, &j_point);
    }

    (jacobian, residuals)
}

/// Jacobian of (observed - projected) w.r.t. a left-multiplicative se(3)
/// perturbation of T_cw; columns [rot, trans] (g2o's EdgeSE3ProjectXYZ).
fn pose_jacobian(p_cam: &Vector3<f64>, camera: &CameraModel) -> Matrix2x6<f64> {
    let x = p_cam.x;
    let y = p_cam.y;
    let invz = 1.0 / p_cam.z;
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

/// Jacobian of (observed - projected) w.r.t. the world point position:
/// -1/z * [fx, 0, -fx x/z; 0, fy, -fy y/z] * R_cw.
fn point_jacobian(
    p_cam: &Vector3<f64>,
    pose_cw: &SE3,
    camera: &CameraModel,
) -> Matrix2x3<f64> {
    let x = p_cam.x;
    let y = p_cam.y;
    let invz = 1.0 / p_cam.z;
    let fx = camera.fx;
    let fy = camera.fy;

    let tmp = Matrix2x3::new(fx, 0.0, -fx * x * invz, 0.0, fy, -fy * y * invz);
    (-invz) * tmp * pose_cw.rotation_matrix()
}

fn write_block_2x6(jacobian: &mut DMatrix<f64>, row: usize, col: usize, block: &Matrix2x6<f64>) {
    for r in 0..2 {
        for c in 0..6 {
            jacobian[(row + r, col + c)] = block[(r, c)];
        }
    }
}

fn write_block_2x3(jacobian: &mut DMatrix<f64>, row: usize, col: usize, block: &Matrix2x3<f64>) {
    for r in 0..2 {
        for c in 0..3 {
            jacobian[(row + r, col + c)] = block[(r, c)];
        }
    }
}

fn apply_delta(
    poses_cw: &[SE3],
    points: &[Vector3<f64>],
    delta: &DVector<f64>,
) -> (Vec<SE3>, Vec<Vector3<f64>>) {
    let num_poses = poses_cw.len();

    let new_poses = poses_cw
        .iter()
        .enumerate()
        .map(|(i, cw)| {
            let base = i * 6;
            let omega = Vector3::new(delta[base], delta[base + 1], delta[base + 2]);
            let upsilon = Vector3::new(delta[base + 3], delta[base + 4], delta[base + 5]);
            left_update(cw, &omega, &upsilon)
        })
        .collect();

    let new_points = points
        .iter()
        .enumerate()
        .map(|(j, p)| {
            let base = num_poses * 6 + j * 3;
            p + Vector3::new(delta[base], delta[base + 1], delta[base + 2])
        })
        .collect();

    (new_poses, new_points)
}

fn left_update(pose_cw: &SE3, omega: &Vector3<f64>, upsilon: &Vector3<f64>) -> SE3 {
    let angle = omega.norm();
    let rotation = if angle > 1e-12 {
        UnitQuaternion::from_axis_angle(&nalgebra::Unit::new_normalize(*omega), angle)
    } else {
        UnitQuaternion::identity()
    };
    SE3 {
        rotation: rotation * pose_cw.rotation,
        translation: rotation * pose_cw.translation + upsilon,
    }
}

fn huber_weight(error: f64, threshold: f64) -> f64 {
    if error <= threshold {
        1.0
    } else {
        threshold / error
    }
}
