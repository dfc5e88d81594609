//! Parameters of the navigation stage machine

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

use crate::roi::{Margins, RoiParams, RoiSet};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NavParams {
    /// Maximum time the vision stages wait for a frame alignment, seconds. Waits forever if not
    /// set.
    #[serde(default)]
    pub handoff_timeout_s: Option<f64>,

    /// Starting regions, left side values.
    pub rois: RoiSet,

    /// Plane extraction inside regions.
    pub roi_fit: RoiParams,

    pub dune: DuneParams,

    pub course: CourseConstants,
}

/// Region tracking and acceptance distances of the stages before the dune crossing.
///
/// X offsets and clamps are left side values. Distances are meters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuneParams {
    /// Height below the sensor at which obstacle distances are measured, taken from the ground.
    pub ground_clearance_m: f64,

    /// Far fence margins in the first stage, grown along x and z.
    pub s1_far_margins: Margins,

    /// Near fence margins in the first stage, grown along x only.
    pub s1_near_margins: Margins,

    /// Dune ROI x span relative to the far fence `x_max` in the first stage.
    pub s1_dune_x_offsets: [f64; 2],

    /// Dune ROI z span relative to the far fence `z_min` and `z_max` in the first stage.
    pub s1_dune_z_offsets: [f64; 2],

    /// The first stage passes once the far fence ends closer than this.
    pub s1_far_fence_end_z: f64,

    /// Near fence margins in the second stage, grown along x only.
    pub s2_near_margins: Margins,

    /// Below this absolute cosine between the near and far fence normals the far fit is taken
    /// to be on the wrong plane and redone without its inliers.
    pub s2_parallel_cosine: f64,

    /// Far fence margins in the second stage, grown along x and z.
    pub s2_far_margins: Margins,

    pub s2_far_x_clamp: [f64; 2],

    /// Dune ROI x span relative to the far fence `x_max` in the second stage.
    pub s2_dune_x_offsets: [f64; 2],

    /// Dune ROI z span relative to the far fence `z_max` in the second stage.
    pub s2_dune_z_offsets: [f64; 2],

    pub s2_dune_x_clamp: [f64; 2],

    /// The second stage passes once the dune is closer than this.
    pub s2_dune_distance: f64,

    /// Dune margins in the third stage, grown along x and z.
    pub s3_dune_margins: Margins,

    pub s3_dune_x_clamp: [f64; 2],

    /// The third stage passes once the dune is closer than this.
    pub s3_dune_distance: f64,
}

/// Measured distances between course features, millimeters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CourseConstants {
    /// From the fence line seen after the dune to the dune itself, left side.
    pub line_to_left_dune: f64,

    /// From the fence line seen after the dune to the dune itself, right side.
    pub line_to_right_dune: f64,

    /// From the front fence corner to the side fence.
    pub fence_corner_to_fence: f64,

    pub pillar_radius: f64,

    /// From the crossing of the two ground lines to the second rope.
    pub line_cross_to_rope: f64,

    /// From the end of the ground line to the side fence.
    pub line_end_to_beside_fence: f64,

    /// From the end of the ground line to the second rope.
    pub line_end_to_second_rope: f64,

    /// Width of the mountain approach lane, the lateral reference flips to its far side once
    /// the line end is close.
    pub mountain_lane_width: f64,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Default for NavParams {
    fn default() -> Self {
        Self {
            handoff_timeout_s: Some(1.0),
            rois: RoiSet::default(),
            roi_fit: RoiParams::default(),
            dune: DuneParams::default(),
            course: CourseConstants::default(),
        }
    }
}

impl Default for DuneParams {
    fn default() -> Self {
        Self {
            ground_clearance_m: 0.05,
            s1_far_margins: Margins::new(0.3, 0.3, 0.1, 0.1),
            s1_near_margins: Margins::new(0.3, 0.3, 0.1, 0.1),
            s1_dune_x_offsets: [-0.3, 0.9],
            s1_dune_z_offsets: [0.3, 0.9],
            s1_far_fence_end_z: 1.5,
            s2_near_margins: Margins::new(0.2, 0.2, 0.0, 0.0),
            s2_parallel_cosine: 0.9,
            s2_far_margins: Margins::uniform(0.3),
            s2_far_x_clamp: [-1.0, 0.0],
            s2_dune_x_offsets: [-0.2, 0.9],
            s2_dune_z_offsets: [-0.2, 0.9],
            s2_dune_x_clamp: [-0.8, 0.5],
            s2_dune_distance: 1.2,
            s3_dune_margins: Margins::uniform(0.3),
            s3_dune_x_clamp: [-1.0, 0.1],
            s3_dune_distance: 0.45,
        }
    }
}

impl Default for CourseConstants {
    fn default() -> Self {
        Self {
            line_to_left_dune: 350.0,
            line_to_right_dune: 350.0,
            fence_corner_to_fence: 1500.0,
            pillar_radius: 700.0,
            line_cross_to_rope: 1000.0,
            line_end_to_beside_fence: 720.0,
            line_end_to_second_rope: 1500.0,
            mountain_lane_width: 1440.0,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
