//! Nonlinear refinement of poses and map points.

pub mod bundle_adjustment;

pub use bundle_adjustment::{
    apply, bundle_adjust_window, collect_problem, solve, BaProblem, BaSolution,
};
