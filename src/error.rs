//! Failure taxonomy for the visual odometry pipeline.
//!
//! Geometry failures are recoverable: the tracker skips the frame or falls
//! back to an alternate estimator. `InvalidInput` is always surfaced to the
//! caller. Bundle adjustment never raises; it degrades to best-effort output.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SlamError {
    /// Malformed or absent input (descriptor blocks, first-frame features).
    /// Aborts the affected call.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Insufficient or ill-conditioned correspondences for a pose or
    /// triangulation solve.
    #[error("degenerate geometry: {0}")]
    DegenerateGeometry(String),

    /// Two-view map initialization did not produce a usable map. The caller
    /// retries with the next frame as the new second candidate.
    #[error("initialization failed: {0}")]
    InitializationFailed(String),

    /// Tracking lost after repeated pose failures. Frames are skipped until
    /// geometry succeeds against the last good reference.
    #[error("tracking lost after {consecutive_failures} consecutive failures")]
    TrackingLost { consecutive_failures: usize },
}

pub type Result<T> = std::result::Result<T, SlamError>;

impl SlamError {
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn degenerate(msg: impl Into<String>) -> Self {
        Self::DegenerateGeometry(msg.into())
    }
}
