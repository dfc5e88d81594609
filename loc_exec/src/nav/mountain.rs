//! Approach, climb and top of the mountain

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::{eqpt::vision::FenceOrientation, nav::NavSignals};
use log::{debug, trace};

use super::{
    io::{Detect, VisionIo},
    NavContext, NavError, StageOutput,
};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// The line end stays the forward reference until it is this much closer than the second rope.
const ROPE_LEAD_MM: f64 = 310.0;

/// Climb phase in which the peak line may first be seen.
const CLIMB_PHASE_SLOPE: u8 = 2;

/// Climb phase at the top of the slope.
const CLIMB_PHASE_TOP: u8 = 3;

/// Number of filtered lines seen when both edges of the peak line are in view.
const PEAK_LINES: usize = 2;

// ------------------------------------------------------------------------------------------------
// STAGE HANDLERS
// ------------------------------------------------------------------------------------------------

/// Drive to the foot of the mountain along the ground line.
///
/// Never passes, the climb is started by the operator.
pub(super) fn under_mountain(
    ctx: &mut NavContext,
    io: &mut VisionIo,
) -> Result<StageOutput, NavError> {
    let course = &ctx.params.course;

    let frame = io.process(ctx.memory, Detect::LineEnd, FenceOrientation::Vertical)?;
    let d = &frame.detections;

    let line_end = io.depth(d.line_end, "line end", &frame.alignment)?;
    let beside = course.line_end_to_beside_fence - ctx.side.sign() * d.now_x_pos_mm;
    ctx.memory.front_fence_mm = line_end;

    let (lateral_mm, forward_mm, phase) =
        if line_end > course.line_end_to_second_rope - ROPE_LEAD_MM {
            (beside, line_end - course.line_end_to_second_rope, 3)
        } else {
            // Past the rope, the far side of the lane is closer
            (course.mountain_lane_width - beside, line_end, 4)
        };

    trace!("Line end {:.0} mm, beside {:.0} mm", line_end, lateral_mm);

    Ok(StageOutput {
        signals: NavSignals {
            lateral_mm,
            forward_mm,
            measurement_m: 0.0,
            phase,
        },
        pass: false,
    })
}

/// Climb, centring on the peak line once both its edges are in view.
pub(super) fn climbing_mountain(
    ctx: &mut NavContext,
    io: &mut VisionIo,
) -> Result<StageOutput, NavError> {
    let frame = io.process(
        ctx.memory,
        Detect::ClimbingLineCross,
        FenceOrientation::Horizontal,
    )?;
    let d = &frame.detections;

    let front = io.depth(d.line_cross, "line cross", &frame.alignment)?;
    ctx.memory.front_fence_mm = front;

    let climb = frame.climb_stage.unwrap_or_default();
    let x = ctx.side.sign() * d.now_x_pos_mm;
    let both_edges = d.filtered_lines == PEAK_LINES;
    let mut phase = 5;

    match climb {
        CLIMB_PHASE_SLOPE => ctx.memory.peak_mm = if both_edges && x > 0.0 { x } else { 0.0 },
        CLIMB_PHASE_TOP => {
            if both_edges {
                ctx.memory.peak_mm = x;
                phase = 6;
            } else {
                ctx.memory.peak_mm = 0.0;
            }
        }
        _ => (),
    }

    debug!(
        "Climb phase {}, {} lines, peak {:.0} mm",
        climb, d.filtered_lines, ctx.memory.peak_mm
    );

    Ok(StageOutput {
        signals: NavSignals {
            lateral_mm: ctx.memory.peak_mm,
            forward_mm: front,
            measurement_m: 0.0,
            phase,
        },
        pass: climb == CLIMB_PHASE_TOP && !both_edges,
    })
}

/// Hold position on top of the mountain.
pub(super) fn reaching_mountain(
    ctx: &mut NavContext,
    io: &mut VisionIo,
) -> Result<StageOutput, NavError> {
    let frame = io.process(ctx.memory, Detect::LineCross, FenceOrientation::Horizontal)?;
    let d = &frame.detections;

    let front = io.depth(d.line_cross, "line cross", &frame.alignment)?;
    let x = ctx.side.sign() * d.now_x_pos_mm;

    ctx.memory.front_fence_mm = front;
    ctx.memory.peak_mm = if d.filtered_lines == PEAK_LINES && x > 0.0 {
        x
    } else {
        0.0
    };

    Ok(StageOutput {
        signals: NavSignals {
            lateral_mm: ctx.memory.peak_mm,
            forward_mm: front,
            measurement_m: 0.0,
            phase: 7,
        },
        pass: false,
    })
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
