//! Pipeline configuration.
//!
//! Every component reads its parameters from a plain struct with documented
//! defaults. The aggregate `SlamConfig` is serde-serializable so callers can
//! load it from whatever format they ingest configuration in; the core does
//! no file I/O.

use serde::{Deserialize, Serialize};

/// Two-view relative pose estimation (essential / homography RANSAC).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TwoViewConfig {
    /// RANSAC iterations per model.
    pub ransac_iterations: usize,
    /// Inlier gate on the Sampson / transfer error, in pixels.
    pub inlier_threshold_px: f64,
    /// Minimum inlier ratio of the winning model; below this the estimate
    /// is reported as degenerate.
    pub min_inlier_ratio: f64,
    /// Homography-vs-essential score ratio above which the scene is treated
    /// as planar and reconstructed from the homography.
    pub planar_score_ratio: f64,
    /// Seed for the RANSAC sampler (reproducible estimates).
    pub ransac_seed: u64,
}

impl Default for TwoViewConfig {
    fn default() -> Self {
        Self {
            ransac_iterations: 300,
            inlier_threshold_px: 2.0,
            min_inlier_ratio: 0.5,
            planar_score_ratio: 0.45,
            ransac_seed: 42,
        }
    }
}

/// Perspective-n-point solving.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PnPConfig {
    /// RANSAC iterations for the 6-point DLT sampler.
    pub ransac_iterations: usize,
    /// Reprojection error gate for inliers, in pixels.
    pub inlier_threshold_px: f64,
    /// Iterations of the pose-only refinement loop.
    pub refine_iterations: usize,
    /// Minimum surviving inliers for a pose to be accepted.
    pub min_inliers: usize,
    /// Seed for the RANSAC sampler.
    pub ransac_seed: u64,
}

impl Default for PnPConfig {
    fn default() -> Self {
        Self {
            ransac_iterations: 100,
            inlier_threshold_px: 4.0,
            refine_iterations: 15,
            min_inliers: 8,
            ransac_seed: 42,
        }
    }
}

/// Triangulation and new-point acceptance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriangulationConfig {
    /// Maximum reprojection error of an accepted point, in pixels,
    /// checked in both views.
    pub max_reproj_error_px: f64,
    /// Minimum parallax angle between the observing rays, in degrees.
    /// Rejects points triangulated from near-parallel rays (rotation-only
    /// motion).
    pub min_parallax_deg: f64,
}

impl Default for TriangulationConfig {
    fn default() -> Self {
        Self {
            max_reproj_error_px: 2.0,
            min_parallax_deg: 0.5,
        }
    }
}

/// Keyframe insertion policy. The numeric defaults are policy choices, not
/// contracts; see DESIGN.md.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyframePolicyConfig {
    /// Insert when tracked points fall below this fraction of the reference
    /// keyframe's point count.
    pub min_tracked_ratio: f64,
    /// Insert when translation since the last keyframe exceeds this fraction
    /// of the median tracked depth.
    pub max_translation_ratio: f64,
    /// Insert when rotation since the last keyframe exceeds this angle.
    pub max_rotation_deg: f64,
    /// Hard cap: always insert after this many frames without a keyframe.
    pub max_frames_between: usize,
}

impl Default for KeyframePolicyConfig {
    fn default() -> Self {
        Self {
            min_tracked_ratio: 0.6,
            max_translation_ratio: 0.15,
            max_rotation_deg: 10.0,
            max_frames_between: 30,
        }
    }
}

/// Bundle adjustment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaConfig {
    /// Maximum Levenberg-Marquardt iterations.
    pub max_iterations: usize,
    /// Convergence threshold on the parameter update norm.
    pub param_tolerance: f64,
    /// Convergence threshold on the gradient norm.
    pub gradient_tolerance: f64,
    /// Huber kernel threshold in pixels.
    pub huber_threshold: f64,
    /// Number of recent keyframes optimized by local BA.
    pub local_window: usize,
    /// Run global BA every this many keyframe insertions.
    pub global_interval: usize,
}

impl Default for BaConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            param_tolerance: 1e-8,
            gradient_tolerance: 1e-8,
            // ~2.45 px, 95% chi-square with 2 DOF
            huber_threshold: 5.991_f64.sqrt(),
            local_window: 5,
            global_interval: 10,
        }
    }
}

/// Frame processor thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingConfig {
    /// Minimum triangulated points for two-view initialization to succeed.
    pub min_init_points: usize,
    /// Minimum 3D-2D correspondences to attempt an absolute pose solve;
    /// below this the tracker falls back to 2D-2D relative pose.
    pub min_pnp_points: usize,
    /// Minimum inliers supporting a pose for the frame to count as tracked.
    pub min_tracked_points: usize,
    /// Consecutive pose failures before the state machine declares LOST.
    pub max_consecutive_failures: usize,
    /// Outlier gate for per-frame reprojection filtering, in pixels.
    pub reproj_threshold_px: f64,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            min_init_points: 50,
            min_pnp_points: 10,
            min_tracked_points: 8,
            max_consecutive_failures: 3,
            reproj_threshold_px: 4.0,
        }
    }
}

/// Aggregate configuration for the whole pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SlamConfig {
    pub two_view: TwoViewConfig,
    pub pnp: PnPConfig,
    pub triangulation: TriangulationConfig,
    pub keyframe: KeyframePolicyConfig,
    pub ba: BaConfig,
    pub tracking: TrackingConfig,
}
