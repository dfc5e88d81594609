//! Approach and crossing of the dune
//!
//! The three approach stages measure from the segmented cloud: the side fence is tracked in two
//! regions (its whole visible length and the part closest to the vehicle), and the dune face is
//! searched for beyond the end of the fence. The crossing itself is measured from the fence line
//! seen on the image once over the dune.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::{
    eqpt::{
        cloud::PlaneModel,
        vision::{FenceOrientation, LineSearch},
    },
    nav::{NavSignals, SideMode},
};
use log::{debug, trace};

use crate::{
    per::{bounding_box, PerError},
    roi::{extract_plane_excluding, extract_plane_within_roi, update_object_roi, Roi},
};

use super::{
    in_band,
    io::{Detect, VisionIo},
    GeometryFrame, NavContext, NavError, StageOutput, DUNE_RGB, FENCE_RGB,
};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Front fence distances in which the dune counts as crossed, millimeters.
const CROSSED_FENCE_BAND_MM: (f64, f64) = (600.0, 800.0);

/// The fence line is searched near its last position while it was seen in this band, bounds
/// included, millimeters.
const NARROW_SEARCH_BAND_MM: (f64, f64) = (100.0, 1000.0);

// ------------------------------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Distance from the point `clearance` above the ground straight below the sensor to the plane.
///
/// `ground_rot` is the ground in the aligned frame, whose offset gives the sensor height. The
/// result does not depend on the scale of either plane.
pub fn calculate_distance(ground_rot: &PlaneModel, plane: &PlaneModel, clearance: f64) -> f64 {
    let height = ground_rot.d.abs() / ground_rot.normal_norm();

    (plane.b * (height - clearance) + plane.d).abs() / plane.normal_norm()
}

// ------------------------------------------------------------------------------------------------
// STAGE HANDLERS
// ------------------------------------------------------------------------------------------------

/// Follow the side fence until its far end comes close.
pub(super) fn before_dune_stage1(
    ctx: &mut NavContext,
    frame: &mut GeometryFrame,
) -> Result<StageOutput, NavError> {
    let params = ctx.params;
    let p = &params.dune;
    let cloud = &frame.scene.vertical;
    let mut rois = *ctx.rois;

    let far = extract_plane_within_roi(cloud, &rois.fence_far, &params.roi_fit)?;
    let far_box = bounding_box(cloud, &far.inliers).ok_or(PerError::NoInliers)?;
    rois.fence_far = update_object_roi(
        cloud,
        &far.inliers,
        &p.s1_far_margins,
        true,
        true,
        &rois.fence_far,
    );

    let near = extract_plane_within_roi(cloud, &rois.fence_near, &params.roi_fit)?;
    rois.fence_near = update_object_roi(
        cloud,
        &near.inliers,
        &p.s1_near_margins,
        true,
        false,
        &rois.fence_near,
    );

    let x_dist = calculate_distance(&frame.ground_rot, &near.model, p.ground_clearance_m);

    rois.dune = dune_roi(
        ctx.side,
        &rois.fence_far,
        p.s1_dune_x_offsets,
        (
            rois.fence_far.z_min + p.s1_dune_z_offsets[0],
            rois.fence_far.z_max + p.s1_dune_z_offsets[1],
        ),
    );

    *ctx.rois = rois;
    ctx.memory.far_fence_end_z = far_box.max.z;

    frame.scene.dst.paint(&far.inliers, FENCE_RGB);
    frame.scene.dst.paint(&near.inliers, FENCE_RGB);

    trace!(
        "Side fence at {:.3} m, ends at z = {:.3} m",
        x_dist,
        far_box.max.z
    );

    Ok(StageOutput {
        signals: NavSignals {
            lateral_mm: x_dist * 1000.0,
            forward_mm: 0.0,
            measurement_m: far_box.max.z,
            phase: 0,
        },
        pass: far_box.max.z < p.s1_far_fence_end_z,
    })
}

/// Keep following the fence while looking for the dune face beyond its end.
pub(super) fn before_dune_stage2(
    ctx: &mut NavContext,
    frame: &mut GeometryFrame,
) -> Result<StageOutput, NavError> {
    let params = ctx.params;
    let p = &params.dune;
    let cloud = &frame.scene.vertical;
    let mut rois = *ctx.rois;

    let near = extract_plane_within_roi(cloud, &rois.fence_near, &params.roi_fit)?;
    rois.fence_near = update_object_roi(
        cloud,
        &near.inliers,
        &p.s2_near_margins,
        true,
        false,
        &rois.fence_near,
    );
    let x_dist = calculate_distance(&frame.ground_rot, &near.model, p.ground_clearance_m);

    let mut far = extract_plane_within_roi(cloud, &rois.fence_far, &params.roi_fit)?;
    let parallel = far
        .model
        .abs_cosine_to(&near.model.normal())
        .unwrap_or(0.0);

    if parallel < p.s2_parallel_cosine {
        // Locked onto something across the fence region, look for the next plane in it
        debug!(
            "Far fence fit not parallel to the near fence (cos {:.3}), refitting",
            parallel
        );
        far = extract_plane_excluding(cloud, &far.inliers, &rois.fence_far, &params.roi_fit)?;
    }

    rois.fence_far = update_object_roi(
        cloud,
        &far.inliers,
        &p.s2_far_margins,
        true,
        true,
        &rois.fence_far,
    )
    .clamp_x(ctx.side, p.s2_far_x_clamp[0], p.s2_far_x_clamp[1]);

    rois.dune = dune_roi(
        ctx.side,
        &rois.fence_far,
        p.s2_dune_x_offsets,
        (
            rois.fence_far.z_max + p.s2_dune_z_offsets[0],
            rois.fence_far.z_max + p.s2_dune_z_offsets[1],
        ),
    )
    .clamp_x(ctx.side, p.s2_dune_x_clamp[0], p.s2_dune_x_clamp[1]);

    let dune = extract_plane_within_roi(cloud, &rois.dune, &params.roi_fit)?;
    let dune_dist = calculate_distance(&frame.ground_rot, &dune.model, p.ground_clearance_m);

    *ctx.rois = rois;
    frame.scene.dst.paint(&far.inliers, FENCE_RGB);
    frame.scene.dst.paint(&dune.inliers, DUNE_RGB);

    trace!("Side fence at {:.3} m, dune at {:.3} m", x_dist, dune_dist);

    Ok(StageOutput {
        signals: NavSignals {
            lateral_mm: x_dist * 1000.0,
            forward_mm: dune_dist * 1000.0,
            measurement_m: dune_dist,
            phase: 1,
        },
        pass: dune_dist < p.s2_dune_distance,
    })
}

/// Close in on the dune face.
pub(super) fn before_dune_stage3(
    ctx: &mut NavContext,
    frame: &mut GeometryFrame,
) -> Result<StageOutput, NavError> {
    let params = ctx.params;
    let p = &params.dune;
    let cloud = &frame.scene.vertical;

    let dune = extract_plane_within_roi(cloud, &ctx.rois.dune, &params.roi_fit)?;
    ctx.rois.dune = update_object_roi(
        cloud,
        &dune.inliers,
        &p.s3_dune_margins,
        true,
        true,
        &ctx.rois.dune,
    )
    .clamp_x(ctx.side, p.s3_dune_x_clamp[0], p.s3_dune_x_clamp[1]);

    let dune_dist = calculate_distance(&frame.ground_rot, &dune.model, p.ground_clearance_m);
    frame.scene.dst.paint(&dune.inliers, DUNE_RGB);

    trace!("Dune at {:.3} m", dune_dist);

    Ok(StageOutput {
        signals: NavSignals {
            lateral_mm: 0.0,
            forward_mm: dune_dist * 1000.0,
            measurement_m: dune_dist,
            phase: 1,
        },
        pass: dune_dist < p.s3_dune_distance,
    })
}

/// Cross the dune, watching the fence ahead come into range.
pub(super) fn passing_dune(
    ctx: &mut NavContext,
    io: &mut VisionIo,
) -> Result<StageOutput, NavError> {
    let params = ctx.params;
    let course = &params.course;

    let search = fence_line_search(ctx.memory.front_fence_mm);
    let frame = io.process(
        ctx.memory,
        Detect::HorizontalLine(search),
        FenceOrientation::Horizontal,
    )?;

    // Frames without any line depth read as no fence in range
    let ffd = io.mean_line_depth(&frame).unwrap_or(0.0);
    ctx.memory.front_fence_mm = ffd;

    let line_to_dune = match ctx.side {
        SideMode::Left => course.line_to_left_dune,
        SideMode::Right => course.line_to_right_dune,
    };

    Ok(StageOutput {
        signals: NavSignals {
            lateral_mm: 0.0,
            forward_mm: ffd - line_to_dune,
            measurement_m: 0.0,
            phase: 1,
        },
        pass: in_band(ffd, CROSSED_FENCE_BAND_MM),
    })
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Search mode of the fence line given its last distance.
fn fence_line_search(front_fence_mm: f64) -> LineSearch {
    let (lo, hi) = NARROW_SEARCH_BAND_MM;

    if front_fence_mm >= lo && front_fence_mm <= hi {
        LineSearch::Narrow
    } else {
        LineSearch::Wide
    }
}

/// Dune search region anchored on the far end of the fence region.
fn dune_roi(side: SideMode, fence: &Roi, x_offsets: [f64; 2], z: (f64, f64)) -> Roi {
    let (lo, hi) = side.mirror_span(x_offsets[0], x_offsets[1]);

    Roi::new(fence.x_max + lo, fence.x_max + hi, z.0, z.1)
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        nav::{NavCtrl, NavParams, Stage, StepOutcome},
        test_utils::{front_wall, side_wall},
        vertical::VerticalScene,
    };
    use comms_if::eqpt::cloud::PointCloud;

    fn geometry_frame(cloud: PointCloud) -> GeometryFrame {
        GeometryFrame {
            scene: VerticalScene {
                dst: PointCloud::from_points(
                    cloud.points.iter().map(|p| p.with_rgb([0, 0, 0])).collect(),
                ),
                vertical: cloud,
            },
            ground_rot: PlaneModel::new(0.0, 1.0, 0.0, 0.4),
        }
    }

    fn painted(frame: &GeometryFrame, rgb: [u8; 3]) -> usize {
        frame.scene.dst.points.iter().filter(|p| p.rgb == rgb).count()
    }

    #[test]
    fn test_distance_scale_invariant() {
        let ground = PlaneModel::new(0.0, 1.0, 0.0, 0.4);
        let plane = PlaneModel::new(0.3, 0.1, 0.9, -1.2);
        let d = calculate_distance(&ground, &plane, 0.05);

        for k in &[0.01, 0.5, 3.0, 1000.0] {
            let scaled = calculate_distance(&ground.scaled(*k), &plane.scaled(*k), 0.05);
            assert!((scaled - d).abs() < 1e-9 * d.max(1.0));
        }

        // Wall facing the sensor 1.2 m away
        let wall = PlaneModel::new(0.0, 0.0, -2.0, 2.4);
        assert!((calculate_distance(&ground, &wall, 0.05) - 1.2).abs() < 1e-12);
    }

    #[test]
    fn test_fence_line_search_band() {
        assert_eq!(fence_line_search(0.0), LineSearch::Wide);
        assert_eq!(fence_line_search(99.9), LineSearch::Wide);
        assert_eq!(fence_line_search(100.0), LineSearch::Narrow);
        assert_eq!(fence_line_search(550.0), LineSearch::Narrow);
        assert_eq!(fence_line_search(1000.0), LineSearch::Narrow);
        assert_eq!(fence_line_search(1000.1), LineSearch::Wide);
    }

    #[test]
    fn test_stage1_follows_fence() {
        let cloud = side_wall(-0.7, (-0.3, 0.35), (0.2, 1.3), 3000, 0.002, 61);
        let mut nav = NavCtrl::new(NavParams::default(), SideMode::Left);

        let mut frame = geometry_frame(cloud.clone());
        match nav.step_geometry(&mut frame).unwrap() {
            StepOutcome::Held { signals, count } => {
                assert_eq!(count, 1);
                assert!((signals.lateral_mm - 700.0).abs() < 10.0, "{:?}", signals);
                assert_eq!(signals.forward_mm, 0.0);
                assert_eq!(signals.phase, 0);
            }
            o => panic!("Unexpected outcome {:?}", o),
        }
        assert!(painted(&frame, FENCE_RGB) > 2000);

        let rois = *nav.rois();
        assert!((rois.fence_far.x_min + 1.0).abs() < 0.02, "{:?}", rois.fence_far);
        assert!((rois.fence_far.x_max + 0.4).abs() < 0.02, "{:?}", rois.fence_far);
        assert!((rois.fence_far.z_max - 1.4).abs() < 0.02, "{:?}", rois.fence_far);
        // Near fence keeps its depth span
        assert_eq!(rois.fence_near.z_max, 1.5);
        // Dune searched past the fence region
        assert!((rois.dune.x_min + 0.7).abs() < 0.02, "{:?}", rois.dune);
        assert!((rois.dune.x_max - 0.5).abs() < 0.02, "{:?}", rois.dune);
        assert!((rois.dune.z_max - 2.3).abs() < 0.02, "{:?}", rois.dune);

        let mut frame = geometry_frame(cloud);
        assert!(matches!(
            nav.step_geometry(&mut frame).unwrap(),
            StepOutcome::Advanced {
                to: Stage::BeforeDuneStage2,
                ..
            }
        ));
    }

    #[test]
    fn test_stage1_right_side() {
        let cloud = side_wall(0.7, (-0.3, 0.35), (0.2, 1.8), 3000, 0.002, 62);
        let mut nav = NavCtrl::new(NavParams::default(), SideMode::Right);

        match nav.step_geometry(&mut geometry_frame(cloud)).unwrap() {
            StepOutcome::Held { signals, count } => {
                // The fence runs past the end distance
                assert_eq!(count, 0);
                assert!((signals.lateral_mm - 700.0).abs() < 10.0, "{:?}", signals);
                assert!(signals.measurement_m > 1.5);
            }
            o => panic!("Unexpected outcome {:?}", o),
        }

        let rois = nav.rois();
        assert!((rois.fence_far.x_min - 0.4).abs() < 0.02, "{:?}", rois.fence_far);
        assert!((rois.dune.x_min - 0.1).abs() < 0.02, "{:?}", rois.dune);
        assert!((rois.dune.x_max - 1.3).abs() < 0.02, "{:?}", rois.dune);
    }

    #[test]
    fn test_stage1_aborts_without_fence() {
        let cloud = front_wall((-0.3, 0.3), (-0.3, 0.3), 1.8, 1000, 0.002, 63);
        let mut nav = NavCtrl::new(NavParams::default(), SideMode::Left);
        let before = *nav.rois();

        assert!(matches!(
            nav.step_geometry(&mut geometry_frame(cloud)).unwrap(),
            StepOutcome::Aborted(_)
        ));
        assert_eq!(nav.hysteresis(), 0);
        assert_eq!(*nav.signals(), NavSignals::default());
        assert_eq!(nav.rois().fence_far, before.fence_far);
    }

    #[test]
    fn test_stage2_finds_dune() {
        let mut cloud = side_wall(-0.7, (-0.3, 0.35), (0.2, 0.9), 3000, 0.002, 64);
        cloud
            .points
            .extend(front_wall((-0.5, 0.4), (-0.3, 0.35), 1.1, 2000, 0.002, 65).points);

        let mut nav = NavCtrl::new(NavParams::default(), SideMode::Left)
            .starting_at(Stage::BeforeDuneStage2);
        let mut frame = geometry_frame(cloud);

        match nav.step_geometry(&mut frame).unwrap() {
            StepOutcome::Held { signals, count } => {
                assert_eq!(count, 1);
                assert!((signals.lateral_mm - 700.0).abs() < 10.0, "{:?}", signals);
                assert!((signals.forward_mm - 1100.0).abs() < 10.0, "{:?}", signals);
                assert!((signals.measurement_m - 1.1).abs() < 0.01);
                assert_eq!(signals.phase, 1);
            }
            o => panic!("Unexpected outcome {:?}", o),
        }

        assert!(painted(&frame, DUNE_RGB) > 1000);
        assert!(painted(&frame, FENCE_RGB) > 2000);

        let dune = nav.rois().dune;
        assert!(dune.x_min >= -0.8 && dune.x_max <= 0.5, "{:?}", dune);
    }

    #[test]
    fn test_stage3_hands_over() {
        let cloud = front_wall((-0.6, 0.0), (-0.3, 0.35), 0.4, 2000, 0.002, 66);
        let mut nav = NavCtrl::new(NavParams::default(), SideMode::Left)
            .starting_at(Stage::BeforeDuneStage3);

        match nav.step_geometry(&mut geometry_frame(cloud)).unwrap() {
            StepOutcome::Advanced { from, to, signals } => {
                assert_eq!(from, Stage::BeforeDuneStage3);
                assert_eq!(to, Stage::PassingDune);
                assert!((signals.forward_mm - 400.0).abs() < 10.0, "{:?}", signals);
                assert_eq!(signals.lateral_mm, 0.0);
            }
            o => panic!("Unexpected outcome {:?}", o),
        }

        let dune = nav.rois().dune;
        assert!(dune.x_min >= -1.0 && dune.x_max <= 0.1, "{:?}", dune);
    }
}
