//! Surface normal estimation

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::eqpt::cloud::{ColorPoint, PointCloud};
use kiddo::{KdTree, SquaredEuclidean};
use nalgebra::Vector3;
use rayon::prelude::*;

use super::plane::principal_normal;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Offset per point index added to every coordinate of the indexed points, meters.
///
/// The tree cannot split a bucket whose points all share a value on the split axis, which depth
/// quantisation produces on walls square to the sensor. The offset keeps indexed coordinates
/// distinct while staying far below any search radius.
const TREE_KEY_STEP_M: f64 = 1e-12;

// ------------------------------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Estimate an unoriented surface normal for points of the cloud.
///
/// Each normal is the direction of least variance of all neighbours within `radius` of the
/// point. The returned vector is indexed like the cloud. Entries are `None` for points not listed
/// in `indices` (when given), for non-finite points, and for points with fewer than 3
/// neighbours.
pub fn estimate_normals(
    cloud: &PointCloud,
    radius: f64,
    indices: Option<&[usize]>,
) -> Vec<Option<Vector3<f64>>> {
    let tree = build_tree(cloud);
    let radius_sq = radius * radius;

    let normal_at = |i: usize| -> Option<Vector3<f64>> {
        let p = cloud.points.get(i)?;
        if !p.is_finite() {
            return None;
        }

        let neighbours = tree.within::<SquaredEuclidean>(&tree_key(i, p), radius_sq);
        if neighbours.len() < 3 {
            return None;
        }

        principal_normal(
            neighbours
                .iter()
                .map(|n| &cloud.points[n.item as usize].position),
        )
        .map(|(_, normal)| normal)
    };

    match indices {
        Some(idx) => {
            let computed: Vec<(usize, Option<Vector3<f64>>)> =
                idx.par_iter().map(|&i| (i, normal_at(i))).collect();

            let mut normals = vec![None; cloud.points.len()];
            for (i, n) in computed {
                if let Some(slot) = normals.get_mut(i) {
                    *slot = n;
                }
            }
            normals
        }
        None => (0..cloud.points.len())
            .into_par_iter()
            .map(normal_at)
            .collect(),
    }
}

/// Build a k-d tree over the finite points of the cloud, items are point indices.
///
/// Points are indexed under [`tree_key`], queries about a point of the cloud should use the same
/// key.
pub(super) fn build_tree(cloud: &PointCloud) -> KdTree<f64, 3> {
    let mut tree: KdTree<f64, 3> = KdTree::new();

    for (i, p) in cloud.points.iter().enumerate() {
        if p.is_finite() {
            tree.add(&tree_key(i, p), i as u64);
        }
    }

    tree
}

/// Position under which the point at index `i` is stored in the tree.
pub(super) fn tree_key(i: usize, p: &ColorPoint) -> [f64; 3] {
    let offset = i as f64 * TREE_KEY_STEP_M;
    let [x, y, z] = p.as_array();

    [x + offset, y + offset, z + offset]
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::test_utils::{noisy_plane_cloud, one_depth_grid};
    use comms_if::eqpt::cloud::PlaneModel;

    #[test]
    fn test_normals_of_wall_and_floor() {
        let mut cloud = noisy_plane_cloud(&PlaneModel::new(0.0, 1.0, 0.0, -0.4), 3000, 0.001, 11);
        let floor_len = cloud.len();
        cloud.points.extend(
            noisy_plane_cloud(&PlaneModel::new(1.0, 0.0, 0.0, 2.5), 3000, 0.001, 12).points,
        );

        let normals = estimate_normals(&cloud, 0.1, None);
        assert_eq!(normals.len(), cloud.len());

        let floor_ok = normals[..floor_len]
            .iter()
            .flatten()
            .filter(|n| n.y.abs() > 0.95)
            .count();
        let wall_ok = normals[floor_len..]
            .iter()
            .flatten()
            .filter(|n| n.x.abs() > 0.95)
            .count();

        assert!(floor_ok as f64 > 0.9 * floor_len as f64);
        assert!(wall_ok as f64 > 0.9 * (cloud.len() - floor_len) as f64);
    }

    #[test]
    fn test_normals_subset_and_sparse_points() {
        let mut cloud = noisy_plane_cloud(&PlaneModel::new(0.0, 0.0, 1.0, -1.0), 2000, 0.001, 13);
        // An isolated point has no neighbourhood
        cloud.points.push(ColorPoint::new(5.0, 5.0, 5.0));
        cloud.points.push(ColorPoint::new(f64::NAN, 0.0, 0.0));
        let isolated = cloud.len() - 2;

        let normals = estimate_normals(&cloud, 0.1, Some(&[0, 1, isolated, isolated + 1]));

        assert!(normals[0].is_some());
        assert!(normals[1].is_some());
        assert!(normals[2].is_none());
        assert!(normals[isolated].is_none());
        assert!(normals[isolated + 1].is_none());

        let n = normals[0].unwrap();
        assert!((n.norm() - 1.0).abs() < 1e-9);
        assert!(n.z.abs() > 0.95);
    }

    #[test]
    fn test_normals_of_one_depth_wall() {
        let cloud = one_depth_grid(40, 0.025, 1.2);

        let normals = estimate_normals(&cloud, 0.05, None);

        assert_eq!(normals.len(), 1600);
        for n in normals.iter() {
            let n = n.unwrap();
            assert!(n.z.abs() > 0.99, "{:?}", n);
        }
    }
}
