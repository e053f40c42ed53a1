//! Synthetic scenes and feature builders shared across tests.

use std::collections::VecDeque;

use image::GrayImage;
use nalgebra::{Vector2, Vector3};

use crate::error::Result;
use crate::features::{Descriptors, FeatureExtractor, FeatureSet, Keypoint};
use crate::geometry::{CameraModel, SE3};
use crate::map::Map;

pub fn test_camera() -> CameraModel {
    CameraModel::new(500.0, 500.0, 320.0, 240.0, 640, 480)
}

/// Grid of points on the fronto-parallel plane z = `depth`, spanning
/// x in [-2, 2] and y in [-1.5, 1.5].
pub fn planar_grid(nx: usize, ny: usize, depth: f64) -> Vec<Vector3<f64>> {
    let mut points = Vec::with_capacity(nx * ny);
    for iy in 0..ny {
        for ix in 0..nx {
            let x = -2.0 + 4.0 * ix as f64 / (nx - 1) as f64;
            let y = -1.5 + 3.0 * iy as f64 / (ny - 1) as f64;
            points.push(Vector3::new(x, y, depth));
        }
    }
    points
}

/// Deterministic pseudo-random cloud with depths in [4, 10], spread across
/// the view frustum.
pub fn scattered_cloud(n: usize) -> Vec<Vector3<f64>> {
    let mut state = 0x1234_5678_9ABC_DEF0_u64;
    let mut next = move || {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        (state >> 11) as f64 / (1u64 << 53) as f64
    };
    (0..n)
        .map(|_| {
            let x = -2.0 + 4.0 * next();
            let y = -1.5 + 3.0 * next();
            let z = 4.0 + 6.0 * next();
            Vector3::new(x, y, z)
        })
        .collect()
}

/// Project world points through a camera-to-world pose. Panics if a point
/// lands behind the camera; test scenes are built so they never do.
pub fn project_pixels(
    points: &[Vector3<f64>],
    pose: &SE3,
    camera: &CameraModel,
) -> Vec<Vector2<f64>> {
    let cw = pose.inverse();
    points
        .iter()
        .map(|p| {
            camera
                .project(&cw.transform_point(p))
                .expect("test point must be in front of the camera")
        })
        .collect()
}

/// 256-bit descriptor pattern derived from a key (splitmix64).
fn descriptor_bytes(key: u64) -> [u8; 32] {
    let mut out = [0u8; 32];
    let mut state = key.wrapping_add(0x9E3779B97F4A7C15);
    for word in 0..4 {
        state = state.wrapping_add(0x9E3779B97F4A7C15);
        let mut z = state;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
        z ^= z >> 31;
        out[word * 8..word * 8 + 8].copy_from_slice(&z.to_le_bytes());
    }
    out
}

/// Feature set at the given pixels whose descriptor for index i encodes
/// `salt + i`: two sets built from the same point order (and salt) match
/// exactly, while different salts share nothing.
pub fn feature_set_with_salt(pixels: &[Vector2<f64>], salt: u64) -> FeatureSet {
    let mut keypoints = Vec::with_capacity(pixels.len());
    let mut descriptors = Descriptors::empty(Descriptors::BINARY_256);
    for (i, px) in pixels.iter().enumerate() {
        keypoints.push(Keypoint::new(px.x as f32, px.y as f32));
        descriptors
            .push_row(&descriptor_bytes(salt + i as u64))
            .expect("row width is constant");
    }
    FeatureSet {
        keypoints,
        descriptors,
    }
}

pub fn feature_set_from_pixels(pixels: &[Vector2<f64>]) -> FeatureSet {
    feature_set_with_salt(pixels, 0)
}

/// Build a map with one keyframe per pose and one map point per world point,
/// observed (at the exact projections) in every keyframe. Requires at least
/// two poses.
pub fn build_synthetic_map(
    points: &[Vector3<f64>],
    poses: &[SE3],
    camera: &CameraModel,
) -> Map {
    assert!(poses.len() >= 2, "map points need two observing keyframes");

    let mut map = Map::new();
    let mut kf_ids = Vec::with_capacity(poses.len());
    for (i, pose) in poses.iter().enumerate() {
        let pixels = project_pixels(points, pose, camera);
        kf_ids.push(map.add_keyframe(i as u64, pose.clone(), feature_set_from_pixels(&pixels)));
    }

    for (j, point) in points.iter().enumerate() {
        let mp = map
            .add_map_point(*point, (kf_ids[0], j), (kf_ids[1], j))
            .expect("founding keyframes exist");
        for kf_id in &kf_ids[2..] {
            map.add_observation(mp, *kf_id, j);
        }
    }
    map
}

/// Extractor that replays a scripted sequence of feature sets, ignoring the
/// image content. Runs dry into empty sets.
pub struct ScriptedExtractor {
    frames: VecDeque<FeatureSet>,
}

impl ScriptedExtractor {
    pub fn new(frames: Vec<FeatureSet>) -> Self {
        Self {
            frames: frames.into(),
        }
    }
}

impl FeatureExtractor for ScriptedExtractor {
    fn extract(&mut self, _image: &GrayImage) -> Result<FeatureSet> {
        Ok(self.frames.pop_front().unwrap_or_default())
    }
}
