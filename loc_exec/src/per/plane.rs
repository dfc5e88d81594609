//! Random sample consensus plane fitting

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::eqpt::cloud::{PlaneModel, PointCloud};
use log::trace;
use nalgebra::{Matrix3, Point3, SymmetricEigen, Vector3};
use rand::{rngs::StdRng, seq::index::sample, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::PerError;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Below this number of candidates inlier counting is not worth splitting across threads.
const PAR_COUNT_MIN_POINTS: usize = 4096;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaneFitParams {
    /// Maximum point to plane distance for a point to be an inlier, meters.
    pub distance_threshold: f64,

    /// Upper bound on the number of hypotheses tested.
    pub max_iterations: usize,

    /// Desired probability of drawing at least one outlier free sample, used to stop early.
    pub probability: f64,

    /// Refine the best hypothesis with a least squares fit over its inliers.
    pub optimise_coefficients: bool,

    /// Seed of the sampler, fits are reproducible for a given seed and input.
    pub seed: u64,
}

/// Result of a plane fit.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaneFit {
    /// Plane coefficients, sign canonicalised so that `d <= 0`.
    pub model: PlaneModel,

    /// Indices into the input cloud of the points within the distance threshold.
    pub inliers: Vec<usize>,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Default for PlaneFitParams {
    fn default() -> Self {
        Self {
            distance_threshold: 0.01,
            max_iterations: 100,
            probability: 0.99,
            optimise_coefficients: true,
            seed: 0x5eed,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Fit a plane to the cloud, or to the subset of it given by `indices`.
///
/// Non-finite points are never candidates.
pub fn fit_plane(
    cloud: &PointCloud,
    indices: Option<&[usize]>,
    params: &PlaneFitParams,
) -> Result<PlaneFit, PerError> {
    let candidates: Vec<usize> = match indices {
        Some(idx) => idx
            .iter()
            .copied()
            .filter(|&i| cloud.points.get(i).map_or(false, |p| p.is_finite()))
            .collect(),
        None => (0..cloud.points.len())
            .filter(|&i| cloud.points[i].is_finite())
            .collect(),
    };

    let n = candidates.len();
    if n < 3 {
        return Err(PerError::InsufficientPoints(n));
    }

    let mut rng = StdRng::seed_from_u64(params.seed);
    let log_one_minus_p = (1.0 - params.probability).max(f64::EPSILON).ln();

    let mut best: Option<(PlaneModel, usize)> = None;
    let mut required_iterations = params.max_iterations as f64;
    let mut iteration = 0usize;

    while iteration < params.max_iterations && (iteration as f64) < required_iterations {
        iteration += 1;

        let s = sample(&mut rng, n, 3);
        let p0 = cloud.points[candidates[s.index(0)]].position;
        let p1 = cloud.points[candidates[s.index(1)]].position;
        let p2 = cloud.points[candidates[s.index(2)]].position;

        let model = match plane_through(&p0, &p1, &p2) {
            Some(m) => m,
            None => continue,
        };

        let count = count_inliers(cloud, &candidates, &model, params.distance_threshold);

        if best.map_or(true, |(_, c)| count > c) {
            best = Some((model, count));

            // Adaptive number of iterations from the current inlier ratio
            let w = count as f64 / n as f64;
            let p_good_sample = w.powi(3);
            if p_good_sample >= 1.0 {
                required_iterations = 0.0;
            } else if p_good_sample > 0.0 {
                required_iterations = log_one_minus_p / (1.0 - p_good_sample).ln();
            }
        }
    }

    let (mut model, _) = match best {
        Some(b) if b.1 > 0 => b,
        _ => return Err(PerError::NoInliers),
    };

    let mut inliers = select_inliers(cloud, &candidates, &model, params.distance_threshold);

    if params.optimise_coefficients {
        if let Some(refined) = least_squares_plane(cloud, &inliers) {
            let refined_inliers =
                select_inliers(cloud, &candidates, &refined, params.distance_threshold);
            if !refined_inliers.is_empty() {
                model = refined;
                inliers = refined_inliers;
            }
        }
    }

    if inliers.is_empty() {
        return Err(PerError::NoInliers);
    }

    trace!(
        "Plane fit: {:?} with {}/{} inliers after {} iterations",
        model.coeffs(),
        inliers.len(),
        n,
        iteration
    );

    Ok(PlaneFit {
        model: model.canonical(),
        inliers,
    })
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Plane through three points, `None` if they are collinear.
fn plane_through(p0: &Point3<f64>, p1: &Point3<f64>, p2: &Point3<f64>) -> Option<PlaneModel> {
    let normal = (p1 - p0).cross(&(p2 - p0));
    let norm = normal.norm();

    if norm < 1e-12 || !norm.is_finite() {
        return None;
    }

    let normal = normal / norm;
    Some(PlaneModel::new(
        normal.x,
        normal.y,
        normal.z,
        -normal.dot(&p0.coords),
    ))
}

fn count_inliers(
    cloud: &PointCloud,
    candidates: &[usize],
    model: &PlaneModel,
    threshold: f64,
) -> usize {
    let is_inlier = |i: &usize| model.distance_to(&cloud.points[*i].position) <= threshold;

    if candidates.len() >= PAR_COUNT_MIN_POINTS {
        candidates.par_iter().filter(|i| is_inlier(i)).count()
    } else {
        candidates.iter().filter(|i| is_inlier(i)).count()
    }
}

fn select_inliers(
    cloud: &PointCloud,
    candidates: &[usize],
    model: &PlaneModel,
    threshold: f64,
) -> Vec<usize> {
    candidates
        .iter()
        .copied()
        .filter(|&i| model.distance_to(&cloud.points[i].position) <= threshold)
        .collect()
}

/// Total least squares plane through the given points: the centroid and the direction of least
/// variance.
pub(super) fn least_squares_plane(cloud: &PointCloud, indices: &[usize]) -> Option<PlaneModel> {
    let (centroid, normal) = principal_normal(indices.iter().map(|&i| &cloud.points[i].position))?;

    Some(PlaneModel::new(
        normal.x,
        normal.y,
        normal.z,
        -normal.dot(&centroid),
    ))
}

/// Centroid and unit eigenvector of smallest eigenvalue of the covariance of a point set.
///
/// `None` with fewer than 3 points or if the points are all coincident.
pub(super) fn principal_normal<'a, I>(points: I) -> Option<(Vector3<f64>, Vector3<f64>)>
where
    I: Iterator<Item = &'a Point3<f64>> + Clone,
{
    let mut count = 0usize;
    let mut sum = Vector3::zeros();
    for p in points.clone() {
        sum += p.coords;
        count += 1;
    }

    if count < 3 {
        return None;
    }

    let centroid = sum / count as f64;

    let mut cov = Matrix3::zeros();
    for p in points {
        let d = p.coords - centroid;
        cov += d * d.transpose();
    }
    cov /= count as f64;

    if cov.iter().all(|v| v.abs() < 1e-18) {
        return None;
    }

    let eig = SymmetricEigen::new(cov);
    let imin = eig.eigenvalues.imin();
    let normal = eig.eigenvectors.column(imin).into_owned();
    let norm = normal.norm();

    if norm == 0.0 || !norm.is_finite() {
        return None;
    }

    Some((centroid, normal / norm))
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
