//! Map store: KeyFrames, MapPoints and their mutual references, kept in
//! id-indexed arenas with enforced referential invariants.

pub mod keyframe;
pub mod map;
pub mod map_point;
pub mod types;

pub use keyframe::KeyFrame;
pub use map::{Map, SnapshotObservation, WindowSnapshot};
pub use map_point::MapPoint;
pub use types::{KeyFrameId, MapPointId};
