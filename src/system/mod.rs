//! System assembly: shared state, worker messages and the top-level handle.

pub mod messages;
pub mod shared_state;
pub mod slam_system;

pub use messages::KeyframeEvent;
pub use shared_state::SharedState;
pub use slam_system::SlamSystem;
