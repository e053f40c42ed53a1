//! Per-frame processing outcome.

use crate::geometry::SE3;
use crate::map::KeyFrameId;
use crate::tracking::TrackingState;

/// What happened to a frame. `Skipped` is the explicit "no update" signal:
/// the caller keeps its previous state and no pose is appended to the
/// trajectory.
#[derive(Debug)]
pub enum FrameOutcome {
    Tracked(TrackingResult),
    Skipped(SkipReason),
}

impl FrameOutcome {
    pub fn is_tracked(&self) -> bool {
        matches!(self, FrameOutcome::Tracked(_))
    }
}

/// Why a frame produced no update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The frame had no usable features.
    NoFeatures,
    /// Two-view initialization did not succeed; the next frame becomes the
    /// new second candidate.
    InitializationFailed,
    /// Pose estimation was degenerate for this frame but tracking is not
    /// lost yet.
    DegenerateGeometry,
    /// Tracking is lost; frames are skipped until re-established.
    TrackingLost,
}

/// Summary of a successfully processed frame.
#[derive(Debug)]
pub struct TrackingResult {
    pub state: TrackingState,
    /// Camera pose of this frame, camera-to-world.
    pub pose: SE3,
    /// Reference keyframe used (and possibly just created) for tracking.
    pub reference_kf: Option<KeyFrameId>,
    /// True exactly once, on the frame that initialized the map.
    pub newly_initialized: bool,
    /// True when this frame was promoted to a keyframe.
    pub keyframe_inserted: bool,
    pub metrics: TrackingMetrics,
}

/// Scalar diagnostics for one frame.
#[derive(Debug, Default, Clone)]
pub struct TrackingMetrics {
    pub n_features: usize,
    pub n_matches: usize,
    /// 3D-2D correspondences fed to the pose solver.
    pub n_correspondences: usize,
    /// Inliers supporting the accepted pose.
    pub n_inliers: usize,
    pub inlier_ratio: f64,
    /// Translation relative to the previous tracked frame.
    pub delta_translation: f64,
    /// Rotation relative to the previous tracked frame, degrees.
    pub delta_rotation_deg: f64,
}
