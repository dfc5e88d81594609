//! # ROI segmenter
//!
//! Obstacle planes are searched for inside axis aligned regions of the `(x, z)` plane of the
//! aligned frame. Each region is refined frame to frame from the bounding box of the plane found
//! inside it, so that the search follows the obstacle as the vehicle moves.
//!
//! All default regions and clamps are written for the left side of the course, right side values
//! are obtained by mirroring along x.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::{
    eqpt::cloud::{Axis, PlaneModel, PointCloud},
    nav::SideMode,
};
use log::trace;
use serde::{Deserialize, Serialize};

use crate::per::{
    bounding_box, estimate_normals, fit_plane, region_filter, PerError, PlaneFitParams,
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Axis aligned region in the `(x, z)` plane, y is unconstrained. Meters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Roi {
    pub x_min: f64,
    pub x_max: f64,
    pub z_min: f64,
    pub z_max: f64,
}

/// The named regions tracked over the course.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RoiSet {
    /// Side fence, whole visible length.
    pub fence_far: Roi,

    /// Side fence, part closest to the vehicle.
    pub fence_near: Roi,

    pub dune: Roi,

    pub front_fence: Roi,

    pub grassland_fence: Roi,
}

/// Distances by which an ROI is grown around a bounding box. Meters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Margins {
    pub x_minus: f64,
    pub x_plus: f64,
    pub z_minus: f64,
    pub z_plus: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoiParams {
    /// Neighbourhood radius of the normals used to refine plane membership, meters.
    pub refine_normal_radius_m: f64,

    /// Minimum absolute cosine between a point's normal and the plane normal.
    pub refine_min_cosine: f64,

    /// Maximum distance of a point to the plane, meters.
    pub refine_max_distance_m: f64,

    pub plane_fit: PlaneFitParams,
}

/// A plane found inside an ROI.
#[derive(Debug, Clone, PartialEq)]
pub struct RoiPlane {
    pub model: PlaneModel,

    /// Indices into the searched cloud.
    pub inliers: Vec<usize>,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Roi {
    pub fn new(x_min: f64, x_max: f64, z_min: f64, z_max: f64) -> Self {
        Self {
            x_min,
            x_max,
            z_min,
            z_max,
        }
    }

    /// Map a left side region onto the given side.
    pub fn for_side(&self, side: SideMode) -> Self {
        let (x_min, x_max) = side.mirror_span(self.x_min, self.x_max);
        Self { x_min, x_max, ..*self }
    }

    /// Raise `x_min` to at least `lo` and lower `x_max` to at most `hi`, with the bounds given
    /// for the left side and mirrored for the right.
    pub fn clamp_x(&self, side: SideMode, lo: f64, hi: f64) -> Self {
        let (lo, hi) = side.mirror_span(lo, hi);
        Self {
            x_min: self.x_min.max(lo),
            x_max: self.x_max.min(hi),
            ..*self
        }
    }

    /// Indices of the points of the cloud inside the region.
    pub fn select(&self, cloud: &PointCloud, indices: Option<&[usize]>) -> Vec<usize> {
        let x = region_filter(cloud, Axis::X, self.x_min, self.x_max, indices);
        region_filter(cloud, Axis::Z, self.z_min, self.z_max, Some(&x))
    }
}

impl RoiSet {
    /// Default starting regions for the given side.
    pub fn for_side(side: SideMode) -> Self {
        Self::default().mirrored(side)
    }

    /// Map a set of left side regions onto the given side.
    pub fn mirrored(&self, side: SideMode) -> Self {
        Self {
            fence_far: self.fence_far.for_side(side),
            fence_near: self.fence_near.for_side(side),
            dune: self.dune.for_side(side),
            front_fence: self.front_fence.for_side(side),
            grassland_fence: self.grassland_fence.for_side(side),
        }
    }
}

impl Default for RoiSet {
    /// Left side starting regions.
    fn default() -> Self {
        Self {
            fence_far: Roi::new(-1.2, -0.1, 0.0, 2.0),
            fence_near: Roi::new(-1.2, -0.1, 0.0, 1.5),
            dune: Roi::new(-0.7, 0.1, 0.0, 2.0),
            front_fence: Roi::new(-0.7, 0.1, 0.0, 1.7),
            grassland_fence: Roi::new(-0.6, 0.4, 0.0, 3.0),
        }
    }
}

impl Margins {
    pub fn new(x_minus: f64, x_plus: f64, z_minus: f64, z_plus: f64) -> Self {
        Self {
            x_minus,
            x_plus,
            z_minus,
            z_plus,
        }
    }

    pub fn uniform(m: f64) -> Self {
        Self::new(m, m, m, m)
    }
}

impl Default for RoiParams {
    fn default() -> Self {
        Self {
            refine_normal_radius_m: 0.04,
            refine_min_cosine: 0.8,
            refine_max_distance_m: 0.1,
            plane_fit: PlaneFitParams::default(),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Find the dominant plane inside the region.
///
/// After the fit, membership is decided again from the local surface orientation: a point of
/// the region is kept if its normal is close to the plane normal and it lies near the plane.
/// Fails if no plane is found or if no point survives this refinement.
pub fn extract_plane_within_roi(
    cloud: &PointCloud,
    roi: &Roi,
    params: &RoiParams,
) -> Result<RoiPlane, PerError> {
    let candidates = roi.select(cloud, None);
    let fit = fit_plane(cloud, Some(&candidates), &params.plane_fit)?;
    let model = fit.model;

    let normals = estimate_normals(cloud, params.refine_normal_radius_m, Some(&candidates));

    let inliers: Vec<usize> = candidates
        .iter()
        .copied()
        .filter(|&i| {
            let cos = match normals[i].as_ref().and_then(|n| model.abs_cosine_to(n)) {
                Some(c) => c,
                None => return false,
            };

            cos > params.refine_min_cosine
                && model.distance_to(&cloud.points[i].position) < params.refine_max_distance_m
        })
        .collect();

    trace!(
        "ROI {:?}: {} candidates, {} fit inliers, {} refined",
        roi,
        candidates.len(),
        fit.inliers.len(),
        inliers.len()
    );

    if inliers.is_empty() {
        return Err(PerError::NoInliers);
    }

    Ok(RoiPlane { model, inliers })
}

/// Fit a plane on the points of the region which are not in `exclude`.
///
/// Used when the plane found in a region is not the expected one, to look for the next plane in
/// the same region. No normal based refinement is applied.
pub fn extract_plane_excluding(
    cloud: &PointCloud,
    exclude: &[usize],
    roi: &Roi,
    params: &RoiParams,
) -> Result<RoiPlane, PerError> {
    let mut excluded = vec![false; cloud.len()];
    for &i in exclude {
        if let Some(e) = excluded.get_mut(i) {
            *e = true;
        }
    }

    let rest: Vec<usize> = (0..cloud.len()).filter(|&i| !excluded[i]).collect();
    let candidates = roi.select(cloud, Some(&rest));

    let fit = fit_plane(cloud, Some(&candidates), &params.plane_fit)?;

    Ok(RoiPlane {
        model: fit.model,
        inliers: fit.inliers,
    })
}

/// Region around the bounding box of the inliers, grown by the margins.
///
/// Only the axes enabled by `grow_x` and `grow_z` are updated, the others keep the bounds of
/// `prev`. With no (finite) inliers `prev` is returned unchanged.
pub fn update_object_roi(
    cloud: &PointCloud,
    inliers: &[usize],
    margins: &Margins,
    grow_x: bool,
    grow_z: bool,
    prev: &Roi,
) -> Roi {
    let bbox = match bounding_box(cloud, inliers) {
        Some(b) => b,
        None => return *prev,
    };

    let mut roi = *prev;

    if grow_x {
        roi.x_min = bbox.min.x - margins.x_minus;
        roi.x_max = bbox.max.x + margins.x_plus;
    }
    if grow_z {
        roi.z_min = bbox.min.z - margins.z_minus;
        roi.z_max = bbox.max.z + margins.z_plus;
    }

    roi
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::test_utils::{front_wall, side_wall};
    use comms_if::eqpt::cloud::ColorPoint;
    use nalgebra::Vector3;

    fn approx(a: &Roi, b: &Roi) -> bool {
        (a.x_min - b.x_min).abs() < 1e-9
            && (a.x_max - b.x_max).abs() < 1e-9
            && (a.z_min - b.z_min).abs() < 1e-9
            && (a.z_max - b.z_max).abs() < 1e-9
    }

    #[test]
    fn test_update_object_roi() {
        let cloud = PointCloud::from_points(vec![
            ColorPoint::new(-1.0, 0.1, 0.2),
            ColorPoint::new(-0.3, 0.3, 1.8),
            ColorPoint::new(-0.6, -0.2, 1.0),
            ColorPoint::new(5.0, 0.0, 5.0),
        ]);
        let prev = Roi::new(-1.2, -0.1, 0.0, 2.0);
        let margins = Margins::new(0.3, 0.3, 0.1, 0.1);

        let roi = update_object_roi(&cloud, &[0, 1, 2], &margins, true, true, &prev);
        assert!(approx(&roi, &Roi::new(-1.3, 0.0, 0.1, 1.9)), "{:?}", roi);

        // Disabled axes keep the previous bounds
        let roi = update_object_roi(&cloud, &[0, 1, 2], &margins, true, false, &prev);
        assert!(approx(&roi, &Roi::new(-1.3, 0.0, 0.0, 2.0)), "{:?}", roi);

        // Nothing to grow around
        assert_eq!(
            update_object_roi(&cloud, &[], &margins, true, true, &prev),
            prev
        );
    }

    #[test]
    fn test_side_mirroring() {
        let left = RoiSet::for_side(SideMode::Left);
        let right = RoiSet::for_side(SideMode::Right);

        assert_eq!(left, RoiSet::default());
        assert_eq!(right.fence_far, Roi::new(0.1, 1.2, 0.0, 2.0));
        assert_eq!(right.fence_near, Roi::new(0.1, 1.2, 0.0, 1.5));
        assert_eq!(right.dune, Roi::new(-0.1, 0.7, 0.0, 2.0));
        assert_eq!(right.front_fence, Roi::new(-0.1, 0.7, 0.0, 1.7));
        assert_eq!(right.grassland_fence, Roi::new(-0.4, 0.6, 0.0, 3.0));

        let roi = Roi::new(-1.4, 0.3, 0.0, 2.0);
        assert_eq!(
            roi.clamp_x(SideMode::Left, -1.0, 0.0),
            Roi::new(-1.0, 0.0, 0.0, 2.0)
        );
        // Right side clamp is [0, 1]
        let roi = Roi::new(-0.2, 1.3, 0.0, 2.0);
        assert_eq!(
            roi.clamp_x(SideMode::Right, -1.0, 0.0),
            Roi::new(0.0, 1.0, 0.0, 2.0)
        );
    }

    #[test]
    fn test_extract_plane_within_roi() {
        // Side fence on the left and a front obstacle outside the fence ROI
        let mut cloud = side_wall(-0.7, (-0.3, 0.3), (0.2, 1.8), 3000, 0.002, 51);
        let fence_len = cloud.len();
        cloud
            .points
            .extend(front_wall((-0.5, 0.5), (-0.3, 0.3), 2.5, 2000, 0.002, 52).points);

        let roi = Roi::new(-1.2, -0.1, 0.0, 2.0);
        let plane = extract_plane_within_roi(&cloud, &roi, &RoiParams::default()).unwrap();

        assert!(plane.model.abs_cosine_to(&Vector3::x()).unwrap() > 0.99);
        assert!((plane.model.origin_offset().abs() - 0.7).abs() < 0.01);
        assert!(plane.inliers.iter().all(|&i| i < fence_len));
        assert!(plane.inliers.len() as f64 > 0.8 * fence_len as f64);

        // Empty region
        let far = Roi::new(3.0, 4.0, 0.0, 2.0);
        assert!(extract_plane_within_roi(&cloud, &far, &RoiParams::default()).is_err());
    }

    #[test]
    fn test_extract_plane_excluding() {
        // Two fences in the same region, the closer one being larger
        let mut cloud = side_wall(-0.4, (-0.3, 0.3), (0.2, 1.8), 3000, 0.002, 53);
        let near_len = cloud.len();
        cloud
            .points
            .extend(side_wall(-1.0, (-0.3, 0.3), (0.2, 1.8), 1500, 0.002, 54).points);

        let roi = Roi::new(-1.2, -0.1, 0.0, 2.0);
        let params = RoiParams::default();

        let first = extract_plane_within_roi(&cloud, &roi, &params).unwrap();
        assert!((first.model.origin_offset().abs() - 0.4).abs() < 0.01);

        let second = extract_plane_excluding(&cloud, &first.inliers, &roi, &params).unwrap();
        assert!((second.model.origin_offset().abs() - 1.0).abs() < 0.01);
        assert!(second.inliers.iter().all(|&i| i >= near_len));
    }
}
