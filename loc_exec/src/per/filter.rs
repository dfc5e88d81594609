//! Point cloud filters

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::collections::BTreeMap;

use comms_if::eqpt::cloud::{Axis, ColorPoint, PointCloud};
use kiddo::SquaredEuclidean;
use log::trace;
use nalgebra::{Point3, Vector3};
use rayon::prelude::*;
use serde::Serialize;

use super::normals::{build_tree, tree_key};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Axis aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Aabb {
    pub min: Point3<f64>,
    pub max: Point3<f64>,
}

struct VoxelAccumulator {
    sum: Vector3<f64>,
    rgb_sum: [u32; 3],
    count: u32,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl VoxelAccumulator {
    fn new() -> Self {
        Self {
            sum: Vector3::zeros(),
            rgb_sum: [0; 3],
            count: 0,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Indices of the points whose coordinate along `axis` lies in `[min, max]`.
///
/// When `indices` is given only those points are considered, so that two calls along different
/// axes select a 2D region. Non-finite points are never kept.
pub fn region_filter(
    cloud: &PointCloud,
    axis: Axis,
    min: f64,
    max: f64,
    indices: Option<&[usize]>,
) -> Vec<usize> {
    let keep = |i: &usize| -> bool {
        match cloud.points.get(*i) {
            Some(p) if p.is_finite() => {
                let v = p.coord(axis);
                v >= min && v <= max
            }
            _ => false,
        }
    };

    match indices {
        Some(idx) => idx.iter().copied().filter(|i| keep(i)).collect(),
        None => (0..cloud.points.len()).filter(|i| keep(i)).collect(),
    }
}

/// Copy of the cloud keeping only points with a coordinate along `axis` in `[min, max]`.
pub fn range_filter(cloud: &PointCloud, axis: Axis, min: f64, max: f64) -> PointCloud {
    cloud.select(&region_filter(cloud, axis, min, max, None))
}

/// Copy of the cloud without its non-finite points.
pub fn remove_non_finite(cloud: &PointCloud) -> PointCloud {
    PointCloud::from_points(
        cloud
            .points
            .iter()
            .filter(|p| p.is_finite())
            .copied()
            .collect(),
    )
}

/// Replace all points falling in the same cubic voxel of side `leaf` by their centroid, with the
/// mean color of the voxel.
///
/// Output order follows the voxel grid, not the input order.
pub fn voxel_downsample(cloud: &PointCloud, leaf: f64) -> PointCloud {
    if leaf <= 0.0 || !leaf.is_finite() {
        return remove_non_finite(cloud);
    }

    let mut voxels: BTreeMap<(i64, i64, i64), VoxelAccumulator> = BTreeMap::new();

    for p in cloud.points.iter().filter(|p| p.is_finite()) {
        let key = (
            (p.position.x / leaf).floor() as i64,
            (p.position.y / leaf).floor() as i64,
            (p.position.z / leaf).floor() as i64,
        );

        let acc = voxels.entry(key).or_insert_with(VoxelAccumulator::new);
        acc.sum += p.position.coords;
        for c in 0..3 {
            acc.rgb_sum[c] += p.rgb[c] as u32;
        }
        acc.count += 1;
    }

    let points = voxels
        .values()
        .map(|acc| {
            let n = acc.count as f64;
            let centroid = acc.sum / n;
            ColorPoint {
                position: Point3::from(centroid),
                rgb: [
                    (acc.rgb_sum[0] / acc.count) as u8,
                    (acc.rgb_sum[1] / acc.count) as u8,
                    (acc.rgb_sum[2] / acc.count) as u8,
                ],
            }
        })
        .collect();

    PointCloud::from_points(points)
}

/// Remove points whose mean distance to their `k` nearest neighbours is more than
/// `std_mul` standard deviations above the mean over the whole cloud.
pub fn remove_statistical_outliers(cloud: &PointCloud, k: usize, std_mul: f64) -> PointCloud {
    let finite = remove_non_finite(cloud);
    if finite.len() <= 1 || k == 0 {
        return finite;
    }

    let tree = build_tree(&finite);

    let mean_dists: Vec<f64> = finite
        .points
        .par_iter()
        .enumerate()
        .map(|(i, p)| {
            let neighbours = tree.nearest_n::<SquaredEuclidean>(&tree_key(i, p), k + 1);

            // First neighbour is the point itself
            let (sum, count) = neighbours
                .iter()
                .skip(1)
                .fold((0.0, 0usize), |(s, c), n| (s + n.distance.sqrt(), c + 1));

            if count > 0 {
                sum / count as f64
            } else {
                0.0
            }
        })
        .collect();

    let (mean, std) = match util::maths::mean_std(&mean_dists) {
        Some(ms) => ms,
        None => return finite,
    };
    let threshold = mean + std_mul * std;

    let points: Vec<ColorPoint> = finite
        .points
        .iter()
        .zip(mean_dists.iter())
        .filter(|(_, &d)| d <= threshold)
        .map(|(p, _)| *p)
        .collect();

    trace!(
        "Outlier removal kept {}/{} points (threshold {:.4})",
        points.len(),
        finite.len(),
        threshold
    );

    PointCloud::from_points(points)
}

/// Bounding box of the points at the given indices, `None` if there are none.
pub fn bounding_box(cloud: &PointCloud, indices: &[usize]) -> Option<Aabb> {
    let mut iter = indices
        .iter()
        .filter_map(|&i| cloud.points.get(i))
        .filter(|p| p.is_finite());

    let first = iter.next()?.position;
    let mut aabb = Aabb {
        min: first,
        max: first,
    };

    for p in iter {
        aabb.min = Point3::from(aabb.min.coords.inf(&p.position.coords));
        aabb.max = Point3::from(aabb.max.coords.sup(&p.position.coords));
    }

    Some(aabb)
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
