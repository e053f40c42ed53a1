//! Frame processing: the tracking state machine and its policies.

pub mod initializer;
pub mod keyframe_decision;
pub mod motion_model;
pub mod result;
pub mod state;
pub mod tracker;

pub use result::{FrameOutcome, SkipReason, TrackingMetrics, TrackingResult};
pub use state::TrackingState;
pub use tracker::Tracker;
