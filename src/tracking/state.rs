//! Tracking state machine states.

/// State of the frame processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrackingState {
    /// No map yet; waiting for a second frame that initializes one.
    #[default]
    Uninitialized,
    /// Tracking against the reference keyframe.
    Tracking,
    /// Pose estimation failed repeatedly; frames are skipped until tracking
    /// can be re-established against the last good reference.
    Lost,
}
