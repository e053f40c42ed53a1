//! Pinhole camera model.

use nalgebra::{Vector2, Vector3};

/// Intrinsics of a calibrated pinhole camera (no distortion; inputs are
/// assumed rectified upstream).
#[derive(Debug, Clone, Copy)]
pub struct CameraModel {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
    pub width: u32,
    pub height: u32,
}

impl CameraModel {
    pub fn new(fx: f64, fy: f64, cx: f64, cy: f64, width: u32, height: u32) -> Self {
        Self {
            fx,
            fy,
            cx,
            cy,
            width,
            height,
        }
    }

    /// Project a point in camera coordinates to pixel coordinates.
    /// Returns `None` for points at or behind the camera plane.
    pub fn project(&self, p_cam: &Vector3<f64>) -> Option<Vector2<f64>> {
        if p_cam.z <= 0.0 {
            return None;
        }
        Some(Vector2::new(
            self.fx * p_cam.x / p_cam.z + self.cx,
            self.fy * p_cam.y / p_cam.z + self.cy,
        ))
    }

    /// Back-project a pixel to normalized image coordinates (z = 1 plane).
    pub fn normalize(&self, pixel: &Vector2<f64>) -> Vector2<f64> {
        Vector2::new((pixel.x - self.cx) / self.fx, (pixel.y - self.cy) / self.fy)
    }

    /// Viewing ray through a pixel, in camera coordinates (not unit length).
    pub fn bearing(&self, pixel: &Vector2<f64>) -> Vector3<f64> {
        let n = self.normalize(pixel);
        Vector3::new(n.x, n.y, 1.0)
    }

    /// Mean focal length, used to convert pixel thresholds to normalized
    /// coordinates.
    pub fn mean_focal(&self) -> f64 {
        0.5 * (self.fx + self.fy)
    }

    /// Whether a pixel lies inside the image bounds, with a margin.
    pub fn in_bounds(&self, pixel: &Vector2<f64>, margin: f64) -> bool {
        pixel.x >= -margin
            && pixel.x < self.width as f64 + margin
            && pixel.y >= -margin
            && pixel.y < self.height as f64 + margin
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn camera() -> CameraModel {
        CameraModel::new(500.0, 500.0, 320.0, 240.0, 640, 480)
    }

    #[test]
    fn project_normalize_roundtrip() {
        let cam = camera();
        let p = Vector3::new(0.4, -0.2, 3.0);

        let pixel = cam.project(&p).unwrap();
        let ray = cam.bearing(&pixel);

        // The ray through the pixel must pass through the point.
        assert_relative_eq!(ray * p.z, p, epsilon = 1e-9);
    }

    #[test]
    fn project_rejects_points_behind_camera() {
        let cam = camera();
        assert!(cam.project(&Vector3::new(0.0, 0.0, -1.0)).is_none());
        assert!(cam.project(&Vector3::new(0.1, 0.1, 0.0)).is_none());
    }

    #[test]
    fn principal_point_projects_to_center() {
        let cam = camera();
        let pixel = cam.project(&Vector3::new(0.0, 0.0, 5.0)).unwrap();
        assert_relative_eq!(pixel, Vector2::new(320.0, 240.0), epsilon = 1e-12);
    }
}
