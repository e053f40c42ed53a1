//! Two-view triangulation by direct linear transform.

use nalgebra::{Matrix3x4, Matrix4, Vector2, Vector3};

use crate::geometry::{CameraModel, SE3};

/// Build a 3x4 projection matrix [R | t] from a world-to-camera transform.
pub fn projection_matrix(pose_cw: &SE3) -> Matrix3x4<f64> {
    let r = pose_cw.rotation_matrix();
    let t = &pose_cw.translation;
    Matrix3x4::from_columns(&[
        r.column(0).into(),
        r.column(1).into(),
        r.column(2).into(),
        (*t).into(),
    ])
}

/// DLT triangulation from two projection matrices and normalized image
/// coordinates. Returns `None` when the homogeneous solution degenerates.
pub fn triangulate_from_projections(
    p_a: &Matrix3x4<f64>,
    p_b: &Matrix3x4<f64>,
    xn_a: &Vector2<f64>,
    xn_b: &Vector2<f64>,
) -> Option<Vector3<f64>> {
    // Each view contributes two rows: x * P[2] - P[0] and y * P[2] - P[1].
    let mut a = Matrix4::<f64>::zeros();
    for j in 0..4 {
        a[(0, j)] = xn_a.x * p_a[(2, j)] - p_a[(0, j)];
        a[(1, j)] = xn_a.y * p_a[(2, j)] - p_a[(1, j)];
        a[(2, j)] = xn_b.x * p_b[(2, j)] - p_b[(0, j)];
        a[(3, j)] = xn_b.y * p_b[(2, j)] - p_b[(1, j)];
    }

    let svd = a.svd(true, true);
    let v = svd.v_t?.transpose();
    let xh = v.column(3);

    if xh[3].abs() < 1e-10 {
        return None;
    }

    Some(Vector3::new(xh[0] / xh[3], xh[1] / xh[3], xh[2] / xh[3]))
}

/// Triangulate a 3D world point from its pixel observations in two keyframes.
///
/// `pose_a` and `pose_b` are camera-to-world transforms. Returns `None` if
/// the point has non-positive depth in either view or reprojects with more
/// than `max_reproj_px` error in either view; such a point is discarded.
pub fn triangulate(
    pixel_a: &Vector2<f64>,
    pixel_b: &Vector2<f64>,
    pose_a: &SE3,
    pose_b: &SE3,
    camera: &CameraModel,
    max_reproj_px: f64,
) -> Option<Vector3<f64>> {
    let cw_a = pose_a.inverse();
    let cw_b = pose_b.inverse();
    let p_a = projection_matrix(&cw_a);
    let p_b = projection_matrix(&cw_b);

    let xn_a = camera.normalize(pixel_a);
    let xn_b = camera.normalize(pixel_b);

    let p_world = triangulate_from_projections(&p_a, &p_b, &xn_a, &xn_b)?;

    // Cheirality: the point must lie in front of both cameras.
    let p_cam_a = cw_a.transform_point(&p_world);
    let p_cam_b = cw_b.transform_point(&p_world);
    if p_cam_a.z <= 0.0 || p_cam_b.z <= 0.0 {
        return None;
    }

    let reproj_a = camera.project(&p_cam_a)?;
    let reproj_b = camera.project(&p_cam_b)?;
    if (reproj_a - pixel_a).norm() > max_reproj_px || (reproj_b - pixel_b).norm() > max_reproj_px
    {
        return None;
    }

    Some(p_world)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Vector3;

    fn camera() -> CameraModel {
        CameraModel::new(500.0, 500.0, 320.0, 240.0, 640, 480)
    }

    #[test]
    fn recovers_point_seen_from_two_views() {
        let cam = camera();
        let pose_a = SE3::identity();
        let mut pose_b = SE3::identity();
        pose_b.translation = Vector3::new(0.4, 0.0, 0.0);

        let p_world = Vector3::new(0.3, -0.2, 5.0);
        let px_a = cam.project(&pose_a.inverse().transform_point(&p_world)).unwrap();
        let px_b = cam.project(&pose_b.inverse().transform_point(&p_world)).unwrap();

        let recovered = triangulate(&px_a, &px_b, &pose_a, &pose_b, &cam, 1.0).unwrap();
        assert_relative_eq!(recovered, p_world, epsilon = 1e-6);
    }

    #[test]
    fn rejects_point_behind_either_camera() {
        let cam = camera();
        let pose_a = SE3::identity();
        let mut pose_b = SE3::identity();
        pose_b.translation = Vector3::new(0.4, 0.0, 0.0);

        // Observations of a point in front, fed in swapped order so the DLT
        // solution lands behind the cameras.
        let p_world = Vector3::new(0.0, 0.0, -4.0);
        // Project manually without the positive-depth guard.
        let px = |p: &Vector3<f64>| {
            Vector2::new(
                cam.fx * p.x / p.z + cam.cx,
                cam.fy * p.y / p.z + cam.cy,
            )
        };
        let p_cam_a = pose_a.inverse().transform_point(&p_world);
        let p_cam_b = pose_b.inverse().transform_point(&p_world);

        assert!(triangulate(&px(&p_cam_a), &px(&p_cam_b), &pose_a, &pose_b, &cam, 1.0).is_none());
    }

    #[test]
    fn rejects_inconsistent_observations() {
        let cam = camera();
        let pose_a = SE3::identity();
        let mut pose_b = SE3::identity();
        pose_b.translation = Vector3::new(0.4, 0.0, 0.0);

        let p_world = Vector3::new(0.3, -0.2, 5.0);
        let px_a = cam.project(&pose_a.inverse().transform_point(&p_world)).unwrap();
        let px_b = cam.project(&pose_b.inverse().transform_point(&p_world)).unwrap();

        // A mismatched observation must exceed the reprojection gate.
        let bad_b = px_b + Vector2::new(25.0, -12.0);
        assert!(triangulate(&px_a, &bad_b, &pose_a, &pose_b, &cam, 2.0).is_none());
    }
}
