//! # Horizontal alignment
//!
//! Computes the rotation that brings the sensor frame level with the ground. Before the dune
//! crossing an extra yaw bias is applied, turning the frame towards the side fence the vehicle
//! follows.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::{
    eqpt::cloud::{FrameAlignment, PlaneModel, PointCloud},
    nav::SideMode,
};
use log::trace;
use nalgebra::{Rotation3, Unit, Vector3};
use util::maths;

use crate::nav::Stage;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// An aligned frame's rotation and ground.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aligned {
    /// Rotation with the ground plane it was computed from, as handed to the image processing
    /// collaborator.
    pub alignment: FrameAlignment,

    /// Ground plane in the aligned frame, see [`rotate_ground`].
    pub ground_rot: PlaneModel,
}

// ------------------------------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Rotation bringing the ground normal onto the sensor's vertical axis.
///
/// Degenerate planes (zero normal, plane through the sensor) and planes that are already level
/// give the identity.
pub fn ground_rotation(ground: &PlaneModel) -> Rotation3<f64> {
    let norm = ground.normal_norm();
    if ground.is_degenerate() || ground.d == 0.0 {
        return Rotation3::identity();
    }

    // y is down in the sensor frame
    let to_ground = ground_direction(ground);
    let up = Vector3::new(0.0, -1.0, 0.0);

    let cos = -ground.b * ground.d / (norm * ground.d.abs());
    let angle = maths::clamp(&cos, &-1.0, &1.0).acos();

    match Unit::try_new(up.cross(&to_ground), 1e-12) {
        Some(axis) => Rotation3::from_axis_angle(&axis, angle),
        None => Rotation3::identity(),
    }
}

/// Normal of the ground pointing from the sensor towards the plane, not normalised.
pub fn ground_direction(ground: &PlaneModel) -> Vector3<f64> {
    -ground.d.signum() * ground.normal()
}

/// Full alignment rotation for the given stage.
///
/// Before `PassingDune` the ground rotation is followed by a rotation of `bias_deg` about the
/// vertical axis, negative on the left side and positive on the right.
pub fn alignment_rotation(
    ground: &PlaneModel,
    stage: Stage,
    side: SideMode,
    bias_deg: f64,
) -> Rotation3<f64> {
    let align = ground_rotation(ground);

    if stage < Stage::PassingDune {
        let bias = -side.sign() * bias_deg.to_radians();
        Rotation3::from_axis_angle(&Vector3::y_axis(), bias) * align
    } else {
        align
    }
}

/// Ground plane expressed in the rotated frame.
///
/// The normal is rotated and scaled to unit length, the offset is the (unsigned) height of the
/// sensor above the ground.
pub fn rotate_ground(ground: &PlaneModel, rotation: &Rotation3<f64>) -> PlaneModel {
    let norm = ground.normal_norm();
    if norm == 0.0 || !norm.is_finite() {
        return *ground;
    }

    let n = rotation * (ground.normal() / norm);
    PlaneModel::new(n.x, n.y, n.z, ground.d.abs() / norm)
}

/// Rotate the cloud in place into the aligned frame.
pub fn align_cloud(
    cloud: &mut PointCloud,
    ground: &PlaneModel,
    stage: Stage,
    side: SideMode,
    bias_deg: f64,
) -> Aligned {
    let rotation = alignment_rotation(ground, stage, side, bias_deg);
    cloud.rotate(&rotation);

    let ground_rot = rotate_ground(ground, &rotation);
    trace!("Rotated ground: {:?}", ground_rot.coeffs());

    Aligned {
        alignment: FrameAlignment::new(rotation, *ground),
        ground_rot,
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use comms_if::eqpt::cloud::ColorPoint;
    use nalgebra::Point3;

    #[test]
    fn test_ground_rotation_levels_plane() {
        for ground in &[
            PlaneModel::new(0.0, 1.0, 0.02, -0.8),
            PlaneModel::new(0.1, 0.9, -0.3, -0.5),
            PlaneModel::new(0.0, -2.0, -0.4, 1.6),
        ] {
            let r = ground_rotation(ground);
            let n = r * ground_direction(ground);

            assert!(n.x.abs() < 1e-3 * n.norm(), "{:?} -> {:?}", ground, n);
            assert!(n.z.abs() < 1e-3 * n.norm(), "{:?} -> {:?}", ground, n);
            assert!(n.y > 0.0);
        }
    }

    #[test]
    fn test_ground_direction_points_down() {
        // Floor 0.8 m below the sensor, whichever sign the coefficients carry
        for ground in &[
            PlaneModel::new(0.0, 1.0, 0.0, -0.8),
            PlaneModel::new(0.0, -2.0, 0.0, 1.6),
        ] {
            let dir = ground_direction(ground);
            assert!(dir.x == 0.0 && dir.z == 0.0 && dir.y > 0.0, "{:?}", dir);

            // Walking along it from the sensor reaches the plane
            let foot = dir * (ground.d.abs() / ground.normal_norm().powi(2));
            assert!(ground.distance_to(&Point3::from(foot)) < 1e-12);
        }
    }

    #[test]
    fn test_degenerate_ground_is_identity() {
        let id = Rotation3::identity();

        assert_eq!(ground_rotation(&PlaneModel::default()), id);
        assert_eq!(ground_rotation(&PlaneModel::new(0.0, 1.0, 0.0, 0.0)), id);
        assert_eq!(ground_rotation(&PlaneModel::new(0.0, 1.0, 0.0, -0.8)), id);
    }

    #[test]
    fn test_bias_before_dune() {
        let ground = PlaneModel::new(0.0, 1.0, 0.0, -0.8);

        // Straight ahead is turned towards the followed fence
        let ahead = Vector3::new(0.0, 0.0, 1.0);
        let left = alignment_rotation(&ground, Stage::BeforeDuneStage1, SideMode::Left, 25.0);
        let right = alignment_rotation(&ground, Stage::BeforeDuneStage1, SideMode::Right, 25.0);

        let l = left * ahead;
        let r = right * ahead;
        assert!((l.x + 25f64.to_radians().sin()).abs() < 1e-9);
        assert!((r.x - 25f64.to_radians().sin()).abs() < 1e-9);

        // No bias once past the dune
        let after = alignment_rotation(&ground, Stage::PassingDune, SideMode::Left, 25.0);
        assert_eq!(after, Rotation3::identity());
    }

    #[test]
    fn test_align_cloud() {
        let ground = PlaneModel::new(0.0, 2.0, 0.2, -1.6);
        let h = 1.6 / ground.normal_norm();
        // Point on the ground straight below the sensor
        let foot = ground.normal() * (h / ground.normal_norm());

        let mut cloud = PointCloud::from_points(vec![ColorPoint::new(foot.x, foot.y, foot.z)]);
        let aligned = align_cloud(
            &mut cloud,
            &ground,
            Stage::ClimbingMountain,
            SideMode::Right,
            25.0,
        );

        let p = cloud.points[0].position;
        assert!((p - Point3::new(0.0, h, 0.0)).norm() < 1e-9);

        assert_eq!(aligned.alignment.ground, ground);

        let g = aligned.ground_rot;
        assert!((g.normal_norm() - 1.0).abs() < 1e-12);
        assert!((g.d - h).abs() < 1e-12);
        assert!(g.b.abs() > 1.0 - 1e-9);
    }
}
