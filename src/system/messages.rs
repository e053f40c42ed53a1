//! Messages from tracking to the mapping worker.

use crate::map::KeyFrameId;

/// Sent whenever tracking inserts a keyframe. The worker counts these and
/// periodically refines the whole map.
#[derive(Debug, Clone, Copy)]
pub struct KeyframeEvent {
    pub keyframe_id: KeyFrameId,
}
