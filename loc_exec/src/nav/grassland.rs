//! Approach and crossing of the grassland
//!
//! All four stages are measured from the image. The lateral reference moves from the side fence
//! (found through the front fence corner) to the pillar holding the ropes, then to the ground
//! line behind the grassland.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::{
    eqpt::vision::{FenceOrientation, LineSearch},
    nav::NavSignals,
};
use log::trace;

use super::{
    in_band,
    io::{Detect, VisionIo},
    NavContext, NavError, StageOutput,
};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

const CORNER_BESIDE_BAND_MM: (f64, f64) = (1400.0, 1600.0);
const CORNER_FRONT_BAND_MM: (f64, f64) = (500.0, 1000.0);

const ROPE_BESIDE_BAND_MM: (f64, f64) = (550.0, 850.0);
const ROPE_FRONT_BAND_MM: (f64, f64) = (500.0, 2000.0);

/// Rope distances at which the grassland counts as crossed.
const ROPE_CROSSED_BAND_MM: (f64, f64) = (300.0, 500.0);

const LINE_BESIDE_BAND_MM: (f64, f64) = (650.0, 850.0);

/// Below this mirrored lateral position the pillar is the closest lateral reference.
const PILLAR_SWITCH_X_MM: f64 = -400.0;

/// Beyond this rope distance the rope line is searched with the detector defaults.
const FAR_ROPE_MM: f64 = 800.0;

// ------------------------------------------------------------------------------------------------
// STAGE HANDLERS
// ------------------------------------------------------------------------------------------------

/// Line up on the front fence corner.
pub(super) fn before_grassland_stage1(
    ctx: &mut NavContext,
    io: &mut VisionIo,
) -> Result<StageOutput, NavError> {
    let course = &ctx.params.course;

    let frame = io.process(
        ctx.memory,
        Detect::FenceCorner(FenceOrientation::Horizontal),
        FenceOrientation::Horizontal,
    )?;
    let d = &frame.detections;

    let front = io.depth(d.fence_corner, "fence corner", &frame.alignment)?;
    let beside = course.fence_corner_to_fence - ctx.side.sign() * d.now_x_pos_mm;
    ctx.memory.front_fence_mm = front;

    trace!("Front fence {:.0} mm, side fence {:.0} mm", front, beside);

    // Without the fence line the corner is not trusted for driving
    let (lateral_mm, forward_mm) = if d.line_found {
        (beside, front)
    } else {
        (0.0, 0.0)
    };

    Ok(StageOutput {
        signals: NavSignals {
            lateral_mm,
            forward_mm,
            measurement_m: 0.0,
            phase: 2,
        },
        pass: in_band(beside, CORNER_BESIDE_BAND_MM) && in_band(front, CORNER_FRONT_BAND_MM),
    })
}

/// Drive up to the second rope, keeping clear of the pillar.
pub(super) fn before_grassland_stage2(
    ctx: &mut NavContext,
    io: &mut VisionIo,
) -> Result<StageOutput, NavError> {
    let course = &ctx.params.course;

    let frame = io.process(ctx.memory, Detect::Nothing, FenceOrientation::Vertical)?;
    let d = &frame.detections;

    let rope = io.depth(d.rope_center, "rope", &frame.alignment)?;
    ctx.memory.rope_mm = rope;

    let x = ctx.side.sign() * d.now_x_pos_mm;
    let beside = if x < PILLAR_SWITCH_X_MM {
        course.pillar_radius - x
    } else {
        course.fence_corner_to_fence - course.pillar_radius - x
    };

    trace!("Rope {:.0} mm, beside {:.0} mm", rope, beside);

    Ok(StageOutput {
        signals: NavSignals {
            lateral_mm: beside,
            forward_mm: rope,
            measurement_m: 0.0,
            phase: 3,
        },
        pass: in_band(beside, ROPE_BESIDE_BAND_MM) && in_band(rope, ROPE_FRONT_BAND_MM),
    })
}

/// Cross the grassland along the pillar.
pub(super) fn passing_grassland_stage1(
    ctx: &mut NavContext,
    io: &mut VisionIo,
) -> Result<StageOutput, NavError> {
    let course = &ctx.params.course;

    let search = if ctx.memory.rope_mm > FAR_ROPE_MM {
        LineSearch::Default
    } else {
        LineSearch::Wide
    };

    let frame = io.process(
        ctx.memory,
        Detect::VerticalLine(search),
        FenceOrientation::Vertical,
    )?;
    let d = &frame.detections;

    let rope = io.depth(d.rope_center, "rope", &frame.alignment)?;
    ctx.memory.rope_mm = rope;
    let beside = course.pillar_radius - ctx.side.sign() * d.now_x_pos_mm;

    Ok(StageOutput {
        signals: NavSignals {
            lateral_mm: beside,
            forward_mm: rope,
            measurement_m: 0.0,
            phase: 3,
        },
        pass: in_band(rope, ROPE_CROSSED_BAND_MM),
    })
}

/// Follow the ground line past the rope, measured from the line crossing.
pub(super) fn passing_grassland_stage2(
    ctx: &mut NavContext,
    io: &mut VisionIo,
) -> Result<StageOutput, NavError> {
    let course = &ctx.params.course;

    let frame = io.process(ctx.memory, Detect::Nothing, FenceOrientation::Vertical)?;
    let d = &frame.detections;

    let front = io.depth(d.line_cross, "line cross", &frame.alignment)?;
    let rope = front - course.line_cross_to_rope;
    let beside = -ctx.side.sign() * d.now_x_pos_mm;

    ctx.memory.front_fence_mm = front;
    ctx.memory.rope_mm = rope;

    Ok(StageOutput {
        signals: NavSignals {
            lateral_mm: beside,
            forward_mm: rope,
            measurement_m: 0.0,
            phase: 3,
        },
        pass: in_band(beside, LINE_BESIDE_BAND_MM),
    })
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        nav::{NavCtrl, NavParams, Stage, StepOutcome},
        sync::Shared,
    };
    use comms_if::{
        eqpt::{
            cloud::PlaneModel,
            vision::{Detections, Pixel, ScriptedFrame, ScriptedVision},
        },
        nav::SideMode,
    };
    use nalgebra::Rotation3;

    const CORNER: Pixel = Pixel { u: 320, v: 200 };
    const ROPE: Pixel = Pixel { u: 300, v: 150 };
    const CROSS: Pixel = Pixel { u: 330, v: 260 };

    fn pair(shared: &Shared) {
        shared
            .grounds
            .put(PlaneModel::new(0.0, 1.0, 0.0, -0.4))
            .unwrap();
        shared.rotations.put(Rotation3::identity()).unwrap();
    }

    fn frame(detections: Detections, depths: Vec<(Pixel, f64)>) -> ScriptedFrame {
        ScriptedFrame {
            detections,
            depths,
            climbing_stage: 0,
        }
    }

    fn corner_frame(x: f64, depth: f64, line_found: bool) -> ScriptedFrame {
        frame(
            Detections {
                line_pt1: Some(Pixel::new(100, 210)),
                line_pt2: Some(Pixel::new(320, 200)),
                fence_corner: Some(CORNER),
                now_x_pos_mm: x,
                line_found,
                ..Default::default()
            },
            vec![(CORNER, depth)],
        )
    }

    fn rope_frame(x: f64, depth: f64) -> ScriptedFrame {
        frame(
            Detections {
                rope_center: Some(ROPE),
                now_x_pos_mm: x,
                ..Default::default()
            },
            vec![(ROPE, depth)],
        )
    }

    fn run(nav: &mut NavCtrl, vision: &mut ScriptedVision, shared: &Shared) -> StepOutcome {
        pair(shared);
        nav.step_vision(vision, shared).unwrap()
    }

    #[test]
    fn test_corner_stage_left() {
        let shared = Shared::new(Stage::BeforeGrasslandStage1, false);
        let mut vision = ScriptedVision::new(vec![
            corner_frame(20.0, 800.0, true),
            corner_frame(-30.0, 700.0, true),
        ]);
        let mut nav = NavCtrl::new(NavParams::default(), SideMode::Left)
            .starting_at(Stage::BeforeGrasslandStage1);

        match run(&mut nav, &mut vision, &shared) {
            StepOutcome::Held { signals, count } => {
                assert_eq!(count, 1);
                assert!((signals.lateral_mm - 1480.0).abs() < 1e-9);
                assert!((signals.forward_mm - 800.0).abs() < 1e-9);
                assert_eq!(signals.phase, 2);
            }
            o => panic!("Unexpected outcome {:?}", o),
        }

        assert!(matches!(
            run(&mut nav, &mut vision, &shared),
            StepOutcome::Advanced {
                to: Stage::BeforeGrasslandStage2,
                ..
            }
        ));
        assert!((nav.memory().front_fence_mm - 700.0).abs() < 1e-9);
    }

    #[test]
    fn test_corner_stage_without_line() {
        let shared = Shared::new(Stage::BeforeGrasslandStage1, false);
        let mut vision = ScriptedVision::new(vec![corner_frame(-20.0, 800.0, false)]);
        let mut nav = NavCtrl::new(NavParams::default(), SideMode::Right)
            .starting_at(Stage::BeforeGrasslandStage1);

        match run(&mut nav, &mut vision, &shared) {
            StepOutcome::Held { signals, count } => {
                // Right side mirrors the lateral position, 1500 - 20 still passes
                assert_eq!(count, 1);
                assert_eq!(signals.lateral_mm, 0.0);
                assert_eq!(signals.forward_mm, 0.0);
            }
            o => panic!("Unexpected outcome {:?}", o),
        }
    }

    #[test]
    fn test_rope_stage_pillar_reference() {
        let shared = Shared::new(Stage::BeforeGrasslandStage2, false);
        let mut vision =
            ScriptedVision::new(vec![rope_frame(-500.0, 1500.0), rope_frame(200.0, 1500.0)]);
        let mut nav = NavCtrl::new(NavParams::default(), SideMode::Left)
            .starting_at(Stage::BeforeGrasslandStage2);

        // Far enough left that the pillar is the reference
        match run(&mut nav, &mut vision, &shared) {
            StepOutcome::Held { signals, count } => {
                assert!((signals.lateral_mm - 1200.0).abs() < 1e-9);
                assert!((signals.forward_mm - 1500.0).abs() < 1e-9);
                assert_eq!(count, 0);
            }
            o => panic!("Unexpected outcome {:?}", o),
        }

        // Otherwise the side fence less the pillar
        match run(&mut nav, &mut vision, &shared) {
            StepOutcome::Held { signals, count } => {
                assert!((signals.lateral_mm - 600.0).abs() < 1e-9);
                assert_eq!(count, 1);
            }
            o => panic!("Unexpected outcome {:?}", o),
        }
        assert!((nav.memory().rope_mm - 1500.0).abs() < 1e-9);
    }

    #[test]
    fn test_crossing_skips_line_stage() {
        let shared = Shared::new(Stage::PassingGrasslandStage1, false);
        let mut vision =
            ScriptedVision::new(vec![rope_frame(100.0, 450.0), rope_frame(100.0, 400.0)]);
        let mut nav = NavCtrl::new(NavParams::default(), SideMode::Left)
            .starting_at(Stage::PassingGrasslandStage1);

        match run(&mut nav, &mut vision, &shared) {
            StepOutcome::Held { signals, count } => {
                assert!((signals.lateral_mm - 600.0).abs() < 1e-9);
                assert_eq!(count, 1);
            }
            o => panic!("Unexpected outcome {:?}", o),
        }

        assert!(matches!(
            run(&mut nav, &mut vision, &shared),
            StepOutcome::Advanced {
                from: Stage::PassingGrasslandStage1,
                to: Stage::UnderMountain,
                ..
            }
        ));
    }

    #[test]
    fn test_line_stage() {
        let shared = Shared::new(Stage::PassingGrasslandStage2, false);
        let cross = |x| {
            frame(
                Detections {
                    line_cross: Some(CROSS),
                    now_x_pos_mm: x,
                    ..Default::default()
                },
                vec![(CROSS, 1800.0)],
            )
        };
        let mut vision = ScriptedVision::new(vec![cross(-700.0), cross(700.0)]);
        let mut nav = NavCtrl::new(NavParams::default(), SideMode::Left)
            .starting_at(Stage::PassingGrasslandStage2);

        match run(&mut nav, &mut vision, &shared) {
            StepOutcome::Held { signals, count } => {
                assert!((signals.lateral_mm - 700.0).abs() < 1e-9);
                assert!((signals.forward_mm - 800.0).abs() < 1e-9);
                assert_eq!(count, 1);
            }
            o => panic!("Unexpected outcome {:?}", o),
        }

        match run(&mut nav, &mut vision, &shared) {
            StepOutcome::Held { signals, count } => {
                assert!((signals.lateral_mm + 700.0).abs() < 1e-9);
                assert_eq!(count, 0);
            }
            o => panic!("Unexpected outcome {:?}", o),
        }
    }

    #[test]
    fn test_missing_rope_depth_aborts() {
        let shared = Shared::new(Stage::PassingGrasslandStage1, false);
        let mut vision = ScriptedVision::new(vec![frame(
            Detections {
                rope_center: Some(ROPE),
                ..Default::default()
            },
            vec![],
        )]);
        let mut nav = NavCtrl::new(NavParams::default(), SideMode::Left)
            .starting_at(Stage::PassingGrasslandStage1);

        assert!(matches!(
            run(&mut nav, &mut vision, &shared),
            StepOutcome::Aborted(crate::nav::FrameAbort::MissingDepth("rope"))
        ));
        assert_eq!(nav.memory().rope_mm, 0.0);
    }
}
