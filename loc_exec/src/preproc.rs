//! # Frame preprocessing
//!
//! Crops the raw sensor cloud to the working volume, downsamples it and splits off the patch of
//! ground just in front of the vehicle that the ground tracker fits.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::{
    eqpt::cloud::{Axis, PointCloud},
    nav::SideMode,
};
use log::trace;
use serde::{Deserialize, Serialize};

use crate::per::{range_filter, region_filter, voxel_downsample};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreprocParams {
    /// Depth range kept, meters.
    pub z_range: [f64; 2],

    /// Lateral range kept on the left side, mirrored for the right side, meters.
    pub x_range: [f64; 2],

    /// Voxel size, meters.
    pub leaf_m: f64,

    /// Lateral range of the ground patch, meters.
    pub ground_x_range: [f64; 2],

    /// Depth range of the ground patch, meters.
    pub ground_z_range: [f64; 2],
}

/// A cropped and downsampled frame.
#[derive(Debug, Clone, Default)]
pub struct PreprocessedFrame {
    /// The working cloud.
    pub filtered: PointCloud,

    /// Subset of `filtered` the ground is fitted to.
    pub ground: PointCloud,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Default for PreprocParams {
    fn default() -> Self {
        Self {
            z_range: [0.0, 2.0],
            x_range: [-1.5, 1.0],
            leaf_m: 0.025,
            ground_x_range: [-0.5, 0.5],
            ground_z_range: [0.0, 1.0],
        }
    }
}

// ------------------------------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Crop, clean and downsample a raw frame.
///
/// Non-finite points are dropped by the crop. The working volume is wider on the side of the
/// fence the vehicle follows.
pub fn preprocess(raw: &PointCloud, side: SideMode, params: &PreprocParams) -> PreprocessedFrame {
    let (x_min, x_max) = side.mirror_span(params.x_range[0], params.x_range[1]);

    let cropped = range_filter(raw, Axis::Z, params.z_range[0], params.z_range[1]);
    let cropped = range_filter(&cropped, Axis::X, x_min, x_max);
    let filtered = voxel_downsample(&cropped, params.leaf_m);

    let ground_idx = region_filter(
        &filtered,
        Axis::Z,
        params.ground_z_range[0],
        params.ground_z_range[1],
        None,
    );
    let ground_idx = region_filter(
        &filtered,
        Axis::X,
        params.ground_x_range[0],
        params.ground_x_range[1],
        Some(&ground_idx),
    );
    let ground = filtered.select(&ground_idx);

    trace!(
        "Preprocessed {} points into {} ({} ground)",
        raw.len(),
        filtered.len(),
        ground.len()
    );

    PreprocessedFrame { filtered, ground }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
