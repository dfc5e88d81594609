//! # Perception primitives
//!
//! Reusable point cloud operations: robust plane fitting, surface normal estimation, axis
//! aligned region filtering, downsampling and outlier rejection.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

mod filter;
mod normals;
mod plane;

// ------------------------------------------------------------------------------------------------
// EXPORTS
// ------------------------------------------------------------------------------------------------

pub use filter::{
    bounding_box, range_filter, region_filter, remove_non_finite, remove_statistical_outliers,
    voxel_downsample, Aabb,
};
pub use normals::estimate_normals;
pub use plane::{fit_plane, PlaneFit, PlaneFitParams};

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, thiserror::Error)]
pub enum PerError {
    #[error("Not enough points to fit a plane (got {0})")]
    InsufficientPoints(usize),

    #[error("No plane consistent with the points was found")]
    NoInliers,

    #[error("The ground plane is degenerate")]
    DegenerateGround,

    #[error("No vertical structure left after removing horizontal surfaces")]
    NoVerticalStructure,
}
