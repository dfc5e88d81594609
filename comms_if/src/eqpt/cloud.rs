//! # Point cloud and plane definitions
//!
//! Clouds are expressed in the sensor frame: x to the right, y down, z forward along the optical
//! axis. All lengths are in meters.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use nalgebra::{Matrix3, Point3, Rotation3, Vector3};
use serde::{Deserialize, Serialize};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A single point with its color.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ColorPoint {
    pub position: Point3<f64>,

    #[serde(default)]
    pub rgb: [u8; 3],
}

/// A colored point cloud.
///
/// Point order carries no meaning, `width` and `height` only describe the sensor grid the cloud
/// was acquired from (`height == 1` for unorganised clouds).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PointCloud {
    pub points: Vec<ColorPoint>,

    #[serde(default)]
    pub width: u32,

    #[serde(default)]
    pub height: u32,
}

/// Coefficients of the plane `a*x + b*y + c*z + d = 0`.
///
/// The normal `(a, b, c)` is not necessarily of unit length, every derived quantity divides by its
/// norm explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlaneModel {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
}

/// The rotation aligning the current frame to the horizontal, with the ground plane it was
/// computed from.
///
/// This is what the locator hands to the image processing collaborator once per frame so that it
/// can project image detections into the aligned frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrameAlignment {
    pub rotation: Matrix3<f64>,

    pub ground: PlaneModel,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Cartesian axis of the sensor frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Axis {
    X,
    Y,
    Z,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl ColorPoint {
    /// A black point at the given position.
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self {
            position: Point3::new(x, y, z),
            rgb: [0; 3],
        }
    }

    pub fn with_rgb(mut self, rgb: [u8; 3]) -> Self {
        self.rgb = rgb;
        self
    }

    /// Coordinate of the point along the given axis.
    pub fn coord(&self, axis: Axis) -> f64 {
        match axis {
            Axis::X => self.position.x,
            Axis::Y => self.position.y,
            Axis::Z => self.position.z,
        }
    }

    /// True if all coordinates are finite (sensors report invalid depth as NaN).
    pub fn is_finite(&self) -> bool {
        self.position.iter().all(|v| v.is_finite())
    }

    pub fn as_array(&self) -> [f64; 3] {
        [self.position.x, self.position.y, self.position.z]
    }
}

impl PointCloud {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an unorganised cloud from a set of points.
    pub fn from_points(points: Vec<ColorPoint>) -> Self {
        let width = points.len() as u32;
        Self {
            points,
            width,
            height: 1,
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn clear(&mut self) {
        self.points.clear();
        self.width = 0;
        self.height = 0;
    }

    /// Copy the points at the given indices into a new unorganised cloud.
    ///
    /// Out of range indices are ignored.
    pub fn select(&self, indices: &[usize]) -> PointCloud {
        PointCloud::from_points(
            indices
                .iter()
                .filter_map(|&i| self.points.get(i).copied())
                .collect(),
        )
    }

    /// Set the color of the points at the given indices.
    pub fn paint(&mut self, indices: &[usize], rgb: [u8; 3]) {
        for &i in indices {
            if let Some(p) = self.points.get_mut(i) {
                p.rgb = rgb;
            }
        }
    }

    /// Rotate every point of the cloud about the origin, in place.
    pub fn rotate(&mut self, rotation: &Rotation3<f64>) {
        for p in self.points.iter_mut() {
            p.position = rotation * p.position;
        }
    }
}

impl PlaneModel {
    pub fn new(a: f64, b: f64, c: f64, d: f64) -> Self {
        Self { a, b, c, d }
    }

    pub fn from_coeffs(coeffs: [f64; 4]) -> Self {
        Self::new(coeffs[0], coeffs[1], coeffs[2], coeffs[3])
    }

    pub fn coeffs(&self) -> [f64; 4] {
        [self.a, self.b, self.c, self.d]
    }

    /// The (non-normalised) plane normal.
    pub fn normal(&self) -> Vector3<f64> {
        Vector3::new(self.a, self.b, self.c)
    }

    pub fn normal_norm(&self) -> f64 {
        self.normal().norm()
    }

    /// True if the normal has zero length or any coefficient is not finite.
    pub fn is_degenerate(&self) -> bool {
        !self.coeffs().iter().all(|c| c.is_finite()) || self.normal_norm() == 0.0
    }

    /// Signed distance of the plane from the origin, `d / |n|`.
    pub fn origin_offset(&self) -> f64 {
        self.d / self.normal_norm()
    }

    /// Perpendicular distance from a point to the plane.
    pub fn distance_to(&self, point: &Point3<f64>) -> f64 {
        (self.normal().dot(&point.coords) + self.d).abs() / self.normal_norm()
    }

    /// Absolute cosine of the angle between this plane's normal and the given vector.
    ///
    /// `None` if either has zero length.
    pub fn abs_cosine_to(&self, vec: &Vector3<f64>) -> Option<f64> {
        let denom = self.normal_norm() * vec.norm();
        if denom == 0.0 || !denom.is_finite() {
            None
        } else {
            Some((self.normal().dot(vec) / denom).abs())
        }
    }

    /// Multiply all four coefficients by `k`, which describes the same plane for any `k != 0`.
    pub fn scaled(&self, k: f64) -> Self {
        Self::new(self.a * k, self.b * k, self.c * k, self.d * k)
    }

    /// Choose the sign of the coefficients so that `d <= 0`.
    ///
    /// For planes through the origin the largest normal component is made positive instead.
    pub fn canonical(&self) -> Self {
        let flip = if self.d != 0.0 {
            self.d > 0.0
        } else {
            let n = self.normal();
            let imax = n.iamax();
            n[imax] < 0.0
        };

        if flip {
            self.scaled(-1.0)
        } else {
            *self
        }
    }
}

impl Default for PlaneModel {
    fn default() -> Self {
        Self::new(0.0, 0.0, 0.0, 0.0)
    }
}

impl FrameAlignment {
    pub fn new(rotation: Rotation3<f64>, ground: PlaneModel) -> Self {
        Self {
            rotation: rotation.into_inner(),
            ground,
        }
    }

    pub fn rotation(&self) -> Rotation3<f64> {
        Rotation3::from_matrix_unchecked(self.rotation)
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_plane_distance() {
        let plane = PlaneModel::new(0.0, 2.0, 0.0, -1.6);

        assert!((plane.distance_to(&Point3::new(3.0, 0.0, 1.0)) - 0.8).abs() < 1e-12);
        assert!((plane.distance_to(&Point3::new(0.0, 0.8, 5.0))).abs() < 1e-12);
        assert!((plane.origin_offset() + 0.8).abs() < 1e-12);
    }

    #[test]
    fn test_canonical() {
        let p = PlaneModel::new(0.0, -1.0, -0.02, 0.8).canonical();
        assert_eq!(p, PlaneModel::new(0.0, 1.0, 0.02, -0.8));

        let p = PlaneModel::new(0.0, 1.0, 0.02, -0.8).canonical();
        assert_eq!(p, PlaneModel::new(0.0, 1.0, 0.02, -0.8));

        let p = PlaneModel::new(-1.0, 0.1, 0.0, 0.0).canonical();
        assert_eq!(p, PlaneModel::new(1.0, -0.1, 0.0, 0.0));
    }

    #[test]
    fn test_select_and_paint() {
        let mut cloud = PointCloud::from_points(vec![
            ColorPoint::new(0.0, 0.0, 0.0),
            ColorPoint::new(1.0, 0.0, 0.0),
            ColorPoint::new(2.0, 0.0, 0.0),
        ]);

        let sub = cloud.select(&[2, 0, 7]);
        assert_eq!(sub.len(), 2);
        assert_eq!(sub.points[0].position.x, 2.0);

        cloud.paint(&[1], [234, 67, 53]);
        assert_eq!(cloud.points[1].rgb, [234, 67, 53]);
        assert_eq!(cloud.points[0].rgb, [0, 0, 0]);
    }
}
