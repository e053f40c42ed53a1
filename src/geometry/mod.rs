//! Geometry kernel: SE3 transforms, camera model, two-view reconstruction,
//! triangulation and PnP solving. Pure functions over points and matrices.

pub mod camera;
pub mod pnp;
pub mod se3;
pub mod triangulation;
pub mod two_view;

pub use camera::CameraModel;
pub use pnp::{estimate_absolute_pose, PnPResult};
pub use se3::SE3;
pub use triangulation::triangulate;
pub use two_view::{estimate_relative_pose, RelativePose, TwoViewModel};
