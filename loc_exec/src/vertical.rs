//! # Vertical structure extractor
//!
//! Strips horizontal surfaces from an aligned cloud, leaving fences, the dune face and other
//! obstacles for the ROI segmenter.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::eqpt::cloud::{ColorPoint, PlaneModel, PointCloud};
use log::trace;
use serde::{Deserialize, Serialize};

use crate::per::{estimate_normals, remove_statistical_outliers, PerError};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerticalParams {
    /// Neighbourhood radius of the normal estimation, meters.
    pub normal_radius_m: f64,

    /// Points whose normal has an absolute cosine to the ground normal below this are vertical.
    pub max_ground_cosine: f64,

    /// Cosine threshold used when only the ground itself is removed.
    pub ground_only_max_cosine: f64,

    /// Points further than this from the ground are kept when only the ground is removed,
    /// meters.
    pub ground_only_min_distance_m: f64,

    /// Number of neighbours used by the outlier removal.
    pub outlier_k: usize,

    /// Standard deviation multiplier of the outlier removal.
    pub outlier_std_mul: f64,
}

/// Output of the extractor.
#[derive(Debug, Clone, Default)]
pub struct VerticalScene {
    /// Retained vertical points with their original colors.
    pub vertical: PointCloud,

    /// Copy of `vertical` with colors reset, painted by the stage machine as it recognises
    /// obstacles.
    pub dst: PointCloud,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerticalMode {
    /// Remove every horizontal surface.
    General,

    /// Remove only the ground plane itself, keeping horizontal surfaces above it.
    GroundOnly,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Default for VerticalParams {
    fn default() -> Self {
        Self {
            normal_radius_m: 0.03,
            max_ground_cosine: 0.90,
            ground_only_max_cosine: 0.80,
            ground_only_min_distance_m: 0.05,
            outlier_k: 30,
            outlier_std_mul: 0.1,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Extract the vertical structure of an aligned cloud.
///
/// `ground_rot` is the ground plane in the aligned frame as produced by
/// [`crate::align::rotate_ground`], its offset being the sensor height. Points with no normal
/// (isolated points) are dropped.
pub fn extract_vertical(
    cloud: &PointCloud,
    ground_rot: &PlaneModel,
    mode: VerticalMode,
    params: &VerticalParams,
) -> Result<VerticalScene, PerError> {
    if ground_rot.is_degenerate() {
        return Err(PerError::DegenerateGround);
    }

    let ground_normal = ground_rot.normal();
    let unit_normal = ground_normal / ground_rot.normal_norm();
    let height = ground_rot.origin_offset().abs();

    let normals = estimate_normals(cloud, params.normal_radius_m, None);

    let kept: Vec<ColorPoint> = cloud
        .points
        .iter()
        .zip(normals.iter())
        .filter_map(|(p, n)| {
            let cos = ground_rot.abs_cosine_to(n.as_ref()?)?;

            let keep = match mode {
                VerticalMode::General => cos < params.max_ground_cosine,
                VerticalMode::GroundOnly => {
                    let dist = (unit_normal.dot(&p.position.coords).abs() - height).abs();
                    cos < params.ground_only_max_cosine || dist > params.ground_only_min_distance_m
                }
            };

            if keep {
                Some(*p)
            } else {
                None
            }
        })
        .collect();

    let vertical = remove_statistical_outliers(
        &PointCloud::from_points(kept),
        params.outlier_k,
        params.outlier_std_mul,
    );

    trace!(
        "Vertical extraction ({:?}) kept {}/{} points",
        mode,
        vertical.len(),
        cloud.len()
    );

    if vertical.is_empty() {
        return Err(PerError::NoVerticalStructure);
    }

    let dst = PointCloud::from_points(
        vertical
            .points
            .iter()
            .map(|p| p.with_rgb([0, 0, 0]))
            .collect(),
    );

    Ok(VerticalScene { vertical, dst })
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::test_utils::{front_wall, noisy_plane_cloud, uniform_box};

    fn floor() -> PointCloud {
        noisy_plane_cloud(&PlaneModel::new(0.0, 1.0, 0.0, -0.4), 8000, 0.001, 41)
    }

    #[test]
    fn test_general_removes_ground() {
        let mut cloud = floor();
        cloud
            .points
            .extend(front_wall((-0.5, 0.5), (-0.3, 0.35), 1.2, 3000, 0.001, 42).points);
        let ground_rot = PlaneModel::new(0.0, 1.0, 0.0, 0.4);

        let scene = extract_vertical(
            &cloud,
            &ground_rot,
            VerticalMode::General,
            &VerticalParams::default(),
        )
        .unwrap();

        assert!(scene.vertical.len() > 500);
        let floor_pts = scene
            .vertical
            .points
            .iter()
            .filter(|p| p.position.z < 0.9)
            .count();
        assert!(floor_pts < 25, "{} floor points kept", floor_pts);

        assert_eq!(scene.dst.len(), scene.vertical.len());
        assert!(scene.dst.points.iter().all(|p| p.rgb == [0, 0, 0]));
    }

    #[test]
    fn test_ground_only_keeps_raised_surfaces() {
        let mut cloud = floor();
        // Horizontal step 0.2 m above the ground
        cloud
            .points
            .extend(uniform_box([0.6, 0.199, 0.2], [1.0, 0.201, 1.0], 3000, 43).points);
        let ground_rot = PlaneModel::new(0.0, 1.0, 0.0, 0.4);
        let params = VerticalParams::default();

        let step = |c: &PointCloud| {
            c.points
                .iter()
                .filter(|p| p.position.x > 0.6 && (p.position.y - 0.2).abs() < 0.01)
                .count()
        };

        let general = extract_vertical(&cloud, &ground_rot, VerticalMode::General, &params);
        assert!(general.map_or(0, |s| step(&s.vertical)) < 20);

        let ground_only =
            extract_vertical(&cloud, &ground_rot, VerticalMode::GroundOnly, &params).unwrap();
        assert!(step(&ground_only.vertical) > 800);
    }

    #[test]
    fn test_no_vertical_structure() {
        let ground_rot = PlaneModel::new(0.0, 1.0, 0.0, 0.4);

        match extract_vertical(
            &PointCloud::new(),
            &ground_rot,
            VerticalMode::General,
            &VerticalParams::default(),
        ) {
            Err(PerError::NoVerticalStructure) => (),
            r => panic!("Unexpected result {:?}", r.map(|s| s.vertical.len())),
        }

        match extract_vertical(
            &floor(),
            &PlaneModel::default(),
            VerticalMode::General,
            &VerticalParams::default(),
        ) {
            Err(PerError::DegenerateGround) => (),
            r => panic!("Unexpected result {:?}", r.map(|s| s.vertical.len())),
        }
    }
}
