//! # Navigation stage machine
//!
//! The course is driven as a fixed sequence of [`Stage`]s. Each frame the handler of the current
//! stage turns either the segmented cloud (the stages before the dune crossing) or the image
//! detections (every stage after it) into [`NavSignals`] for the drive controller, and says
//! whether the stage's acceptance predicate holds. A stage is left once the predicate has held
//! for enough consecutive frames, see [`Stage::transition`].
//!
//! A frame that cannot be measured (no plane in a region, missing detection, no alignment from
//! the acquisition loop) is aborted: the signals and the hysteresis counter are left untouched.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

mod dune;
mod grassland;
mod io;
mod mountain;
mod params;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{fmt, str::FromStr, time::Duration};

use comms_if::{
    eqpt::{
        cloud::PlaneModel,
        vision::{Vision, VisionError},
    },
    nav::{NavSignals, SideMode},
};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use util::{session, time};

use crate::{
    per::PerError,
    roi::RoiSet,
    sync::{Shared, SyncError},
    vertical::VerticalScene,
};

use self::io::VisionIo;

// ------------------------------------------------------------------------------------------------
// EXPORTS
// ------------------------------------------------------------------------------------------------

pub use self::dune::calculate_distance;
pub use self::params::{CourseConstants, DuneParams, NavParams};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Color given to fence inliers in the display cloud.
pub const FENCE_RGB: [u8; 3] = [234, 67, 53];

/// Color given to dune inliers in the display cloud.
pub const DUNE_RGB: [u8; 3] = [251, 188, 5];

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// The navigation stage machine.
#[derive(Debug)]
pub struct NavCtrl {
    params: NavParams,
    side: SideMode,

    stage: Stage,
    hysteresis: Hysteresis,

    /// Tracked regions, already mirrored for the side.
    rois: RoiSet,

    memory: StageMemory,

    /// Signals of the last measured frame.
    signals: NavSignals,
}

/// Acceptance and step of a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    /// Number of consecutive passing frames needed to leave the stage.
    pub threshold: u32,

    /// Number of stages skipped forward when leaving.
    pub step: u8,
}

/// Consecutive success counter gating the stage transitions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Hysteresis {
    count: u32,
}

/// Measurements carried from one frame to the next.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct StageMemory {
    /// Last distance to the front fence, millimeters.
    pub front_fence_mm: f64,

    /// Last distance to the second grassland rope, millimeters.
    pub rope_mm: f64,

    /// Last lateral offset to the mountain peak line, millimeters.
    pub peak_mm: f64,

    /// Where the far side fence ended in the last frame of the first stage, meters.
    pub far_fence_end_z: f64,

    /// Last ground coefficients received with a rotation.
    pub last_ground: Option<PlaneModel>,
}

/// Everything a stage handler may read or update.
pub(crate) struct NavContext<'a> {
    pub side: SideMode,
    pub params: &'a NavParams,
    pub rois: &'a mut RoiSet,
    pub memory: &'a mut StageMemory,
}

/// Input of the geometry driven stages.
#[derive(Debug, Clone, Default)]
pub struct GeometryFrame {
    pub scene: VerticalScene,

    /// Ground plane in the aligned frame.
    pub ground_rot: PlaneModel,
}

/// Output of one stage handler call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct StageOutput {
    pub signals: NavSignals,

    /// Whether the stage's acceptance predicate holds for this frame.
    pub pass: bool,
}

/// State saved to the session on every stage change.
#[derive(Debug, Clone, Serialize)]
pub struct StageSnapshot {
    pub stage: Stage,
    pub stage_index: u8,
    pub side: SideMode,
    pub elapsed_s: f64,
    pub signals: NavSignals,
    pub rois: RoiSet,
    pub memory: StageMemory,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Mission stages, in course order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum Stage {
    BeforeDuneStage1,
    BeforeDuneStage2,
    BeforeDuneStage3,
    PassingDune,
    BeforeGrasslandStage1,
    BeforeGrasslandStage2,
    PassingGrasslandStage1,
    PassingGrasslandStage2,
    UnderMountain,
    ClimbingMountain,
    ReachingMountain,
}

/// What a stage measures from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StageSource {
    /// The segmented cloud.
    Geometry,

    /// The image processing collaborator.
    Vision,
}

/// Result of one navigation step.
#[derive(Debug)]
pub enum StepOutcome {
    /// The stage is unchanged.
    Held { signals: NavSignals, count: u32 },

    /// The stage changed.
    Advanced {
        from: Stage,
        to: Stage,
        signals: NavSignals,
    },

    /// The frame could not be measured, nothing was updated.
    Aborted(FrameAbort),
}

/// Reasons for giving up on a single frame.
#[derive(Debug, thiserror::Error)]
pub enum FrameAbort {
    #[error("Plane extraction failed: {0}")]
    Per(#[from] PerError),

    #[error("Image processing failed: {0}")]
    Vision(#[from] VisionError),

    #[error("No {0} detected")]
    MissingDetection(&'static str),

    #[error("No depth available at the {0}")]
    MissingDepth(&'static str),

    #[error("Timed out waiting for the {0} hand-off")]
    HandoffTimeout(&'static str),
}

#[derive(Debug, thiserror::Error)]
pub enum NavError {
    #[error("Frame aborted: {0}")]
    FrameAborted(#[from] FrameAbort),

    #[error("Synchronisation error: {0}")]
    Sync(#[from] SyncError),

    #[error("Stage {stage:?} is not driven by {expected:?} frames")]
    WrongSource { stage: Stage, expected: StageSource },

    #[error("Cannot go back from {from:?} to {to:?}")]
    Regression { from: Stage, to: Stage },
}

#[derive(Debug, thiserror::Error)]
#[error("Unknown stage \"{0}\"")]
pub struct ParseStageError(String);

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Stage {
    pub const ALL: [Stage; 11] = [
        Stage::BeforeDuneStage1,
        Stage::BeforeDuneStage2,
        Stage::BeforeDuneStage3,
        Stage::PassingDune,
        Stage::BeforeGrasslandStage1,
        Stage::BeforeGrasslandStage2,
        Stage::PassingGrasslandStage1,
        Stage::PassingGrasslandStage2,
        Stage::UnderMountain,
        Stage::ClimbingMountain,
        Stage::ReachingMountain,
    ];

    /// Position of the stage in the course, 0 to 10.
    pub fn index(&self) -> u8 {
        *self as u8
    }

    pub fn from_index(index: u8) -> Option<Self> {
        Self::ALL.get(index as usize).copied()
    }

    pub fn source(&self) -> StageSource {
        if *self < Stage::PassingDune {
            StageSource::Geometry
        } else {
            StageSource::Vision
        }
    }

    /// Transition table. Stages without a transition are only left on operator request.
    pub fn transition(&self) -> Option<Transition> {
        let (threshold, step) = match self {
            Stage::BeforeDuneStage1 => (2, 1),
            Stage::BeforeDuneStage2 => (3, 1),
            Stage::BeforeDuneStage3 => (1, 1),
            Stage::PassingDune => (2, 1),
            Stage::BeforeGrasslandStage1 => (2, 1),
            Stage::BeforeGrasslandStage2 => (2, 1),
            Stage::PassingGrasslandStage1 => (2, 2),
            Stage::PassingGrasslandStage2 => (2, 1),
            Stage::ClimbingMountain => (2, 1),
            Stage::UnderMountain | Stage::ReachingMountain => return None,
        };

        Some(Transition { threshold, step })
    }

    /// The stage `step` stages further, saturating at the last one.
    pub fn advanced_by(&self, step: u8) -> Self {
        let last = Self::ALL.len() - 1;
        Self::ALL[(self.index() as usize + step as usize).min(last)]
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} ({})", self, self.index())
    }
}

impl FromStr for Stage {
    type Err = ParseStageError;

    /// Accepts the stage index or its name.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();

        if let Ok(i) = s.parse::<u8>() {
            return Stage::from_index(i).ok_or_else(|| ParseStageError(s.into()));
        }

        Stage::ALL
            .iter()
            .find(|st| format!("{:?}", st).eq_ignore_ascii_case(s))
            .copied()
            .ok_or_else(|| ParseStageError(s.into()))
    }
}

impl Hysteresis {
    pub fn count(&self) -> u32 {
        self.count
    }

    /// Record one measured frame, returning true once `threshold` consecutive frames passed.
    ///
    /// The counter restarts from zero on a failing frame and after reaching the threshold.
    pub fn record(&mut self, pass: bool, threshold: u32) -> bool {
        if !pass {
            self.count = 0;
            return false;
        }

        self.count += 1;
        if self.count >= threshold {
            self.count = 0;
            true
        } else {
            false
        }
    }

    pub fn reset(&mut self) {
        self.count = 0;
    }
}

impl From<PerError> for NavError {
    fn from(e: PerError) -> Self {
        NavError::FrameAborted(e.into())
    }
}

impl From<VisionError> for NavError {
    fn from(e: VisionError) -> Self {
        NavError::FrameAborted(e.into())
    }
}

impl NavCtrl {
    /// Create the stage machine at the first stage of the course.
    pub fn new(params: NavParams, side: SideMode) -> Self {
        let rois = params.rois.mirrored(side);

        Self {
            params,
            side,
            stage: Stage::BeforeDuneStage1,
            hysteresis: Hysteresis::default(),
            rois,
            memory: StageMemory::default(),
            signals: NavSignals::default(),
        }
    }

    /// Start from a later stage, used to resume a run part way through the course.
    pub fn starting_at(mut self, stage: Stage) -> Self {
        self.stage = stage;
        self
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn side(&self) -> SideMode {
        self.side
    }

    pub fn signals(&self) -> &NavSignals {
        &self.signals
    }

    pub fn rois(&self) -> &RoiSet {
        &self.rois
    }

    pub fn memory(&self) -> &StageMemory {
        &self.memory
    }

    pub fn hysteresis(&self) -> u32 {
        self.hysteresis.count()
    }

    pub fn handoff_timeout(&self) -> Option<Duration> {
        time::secs_to_duration(self.params.handoff_timeout_s)
    }

    /// Run the current stage on a segmented frame.
    pub fn step_geometry(&mut self, frame: &mut GeometryFrame) -> Result<StepOutcome, NavError> {
        let stage = self.stage;
        let mut ctx = self.context();

        let result = match stage {
            Stage::BeforeDuneStage1 => dune::before_dune_stage1(&mut ctx, frame),
            Stage::BeforeDuneStage2 => dune::before_dune_stage2(&mut ctx, frame),
            Stage::BeforeDuneStage3 => dune::before_dune_stage3(&mut ctx, frame),
            _ => {
                return Err(NavError::WrongSource {
                    stage,
                    expected: StageSource::Geometry,
                })
            }
        };

        self.apply(result)
    }

    /// Run the current stage on the next image, paired with the next alignment published by the
    /// acquisition loop.
    pub fn step_vision(
        &mut self,
        vision: &mut dyn Vision,
        shared: &Shared,
    ) -> Result<StepOutcome, NavError> {
        let stage = self.stage;
        let mut io = VisionIo::new(vision, shared, self.side, self.handoff_timeout());
        let mut ctx = self.context();

        let result = match stage {
            Stage::PassingDune => dune::passing_dune(&mut ctx, &mut io),
            Stage::BeforeGrasslandStage1 => grassland::before_grassland_stage1(&mut ctx, &mut io),
            Stage::BeforeGrasslandStage2 => grassland::before_grassland_stage2(&mut ctx, &mut io),
            Stage::PassingGrasslandStage1 => {
                grassland::passing_grassland_stage1(&mut ctx, &mut io)
            }
            Stage::PassingGrasslandStage2 => {
                grassland::passing_grassland_stage2(&mut ctx, &mut io)
            }
            Stage::UnderMountain => mountain::under_mountain(&mut ctx, &mut io),
            Stage::ClimbingMountain => mountain::climbing_mountain(&mut ctx, &mut io),
            Stage::ReachingMountain => mountain::reaching_mountain(&mut ctx, &mut io),
            _ => {
                return Err(NavError::WrongSource {
                    stage,
                    expected: StageSource::Vision,
                })
            }
        };

        self.apply(result)
    }

    /// Move forward to `target` on operator request.
    pub fn operator_advance(&mut self, target: Stage) -> Result<StepOutcome, NavError> {
        let from = self.stage;

        if target < from {
            return Err(NavError::Regression { from, to: target });
        }
        if target == from {
            return Ok(StepOutcome::Held {
                signals: self.signals,
                count: self.hysteresis.count(),
            });
        }

        info!("Operator advance requested");
        self.advance_to(target);

        Ok(StepOutcome::Advanced {
            from,
            to: target,
            signals: self.signals,
        })
    }

    pub fn snapshot(&self) -> StageSnapshot {
        StageSnapshot {
            stage: self.stage,
            stage_index: self.stage.index(),
            side: self.side,
            elapsed_s: session::get_elapsed_seconds(),
            signals: self.signals,
            rois: self.rois,
            memory: self.memory,
        }
    }

    fn context(&mut self) -> NavContext<'_> {
        NavContext {
            side: self.side,
            params: &self.params,
            rois: &mut self.rois,
            memory: &mut self.memory,
        }
    }

    fn apply(&mut self, result: Result<StageOutput, NavError>) -> Result<StepOutcome, NavError> {
        let out = match result {
            Ok(o) => o,
            Err(NavError::FrameAborted(reason)) => {
                debug!("{} frame aborted: {}", self.stage, reason);
                return Ok(StepOutcome::Aborted(reason));
            }
            Err(e) => return Err(e),
        };

        self.signals = out.signals;
        let from = self.stage;

        let target = match from.transition() {
            Some(t) => {
                if self.hysteresis.record(out.pass, t.threshold) {
                    Some(from.advanced_by(t.step))
                } else {
                    None
                }
            }
            None => {
                self.hysteresis.reset();
                None
            }
        };

        match target {
            Some(to) => {
                self.advance_to(to);
                Ok(StepOutcome::Advanced {
                    from,
                    to,
                    signals: self.signals,
                })
            }
            None => Ok(StepOutcome::Held {
                signals: self.signals,
                count: self.hysteresis.count(),
            }),
        }
    }

    fn advance_to(&mut self, to: Stage) {
        if to == Stage::ReachingMountain {
            warn!("Final stage reached");
        }
        info!("Stage {} -> {}", self.stage, to);

        self.stage = to;
        self.hysteresis.reset();

        session::save_with_timestamp("nav/stage.json", self.snapshot());
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Whether the value lies strictly inside the band.
fn in_band(value: f64, band: (f64, f64)) -> bool {
    value > band.0 && value < band.1
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use comms_if::eqpt::vision::{Detections, Pixel, ScriptedFrame, ScriptedVision};
    use nalgebra::Rotation3;

    fn pair(shared: &Shared) {
        shared
            .grounds
            .put(PlaneModel::new(0.0, 1.0, 0.0, -0.4))
            .unwrap();
        shared.rotations.put(Rotation3::identity()).unwrap();
    }

    /// Scripted passing dune frame seeing the front fence at `ffd` mm.
    fn fence_frame(ffd: f64) -> ScriptedFrame {
        let pts = vec![Pixel::new(100, 240), Pixel::new(300, 242)];
        ScriptedFrame {
            detections: Detections {
                line_pt1: Some(pts[0]),
                line_pt2: Some(pts[1]),
                line_points: pts.clone(),
                line_found: true,
                ..Default::default()
            },
            depths: pts.iter().map(|p| (*p, ffd)).collect(),
            climbing_stage: 0,
        }
    }

    #[test]
    fn test_stage_order() {
        for (i, s) in Stage::ALL.iter().enumerate() {
            assert_eq!(s.index() as usize, i);
            assert_eq!(Stage::from_index(i as u8), Some(*s));
        }
        assert_eq!(Stage::from_index(11), None);

        assert_eq!(Stage::BeforeDuneStage3.source(), StageSource::Geometry);
        assert_eq!(Stage::PassingDune.source(), StageSource::Vision);

        // The second grassland stage is skipped
        assert_eq!(
            Stage::PassingGrasslandStage1
                .advanced_by(Stage::PassingGrasslandStage1.transition().unwrap().step),
            Stage::UnderMountain
        );
        assert_eq!(Stage::ReachingMountain.advanced_by(1), Stage::ReachingMountain);
        assert!(Stage::UnderMountain.transition().is_none());

        assert_eq!("4".parse::<Stage>().unwrap(), Stage::BeforeGrasslandStage1);
        assert_eq!("climbingmountain".parse::<Stage>().unwrap(), Stage::ClimbingMountain);
        assert!("11".parse::<Stage>().is_err());
    }

    #[test]
    fn test_hysteresis() {
        let mut h = Hysteresis::default();

        assert!(!h.record(true, 3));
        assert!(!h.record(true, 3));
        assert_eq!(h.count(), 2);

        // A single failure restarts the count
        assert!(!h.record(false, 3));
        assert_eq!(h.count(), 0);

        assert!(!h.record(true, 3));
        assert!(!h.record(true, 3));
        assert!(h.record(true, 3));
        assert_eq!(h.count(), 0);

        assert!(h.record(true, 1));
    }

    #[test]
    fn test_passing_dune_advances_after_threshold() {
        let shared = Shared::new(Stage::PassingDune, false);
        let mut vision = ScriptedVision::new(vec![
            fence_frame(900.0),
            fence_frame(700.0),
            fence_frame(710.0),
        ]);
        let mut nav = NavCtrl::new(NavParams::default(), SideMode::Left)
            .starting_at(Stage::PassingDune);

        pair(&shared);
        match nav.step_vision(&mut vision, &shared).unwrap() {
            StepOutcome::Held { signals, count } => {
                assert_eq!(count, 0);
                assert!((signals.forward_mm - (900.0 - 350.0)).abs() < 1e-9);
                assert_eq!(signals.lateral_mm, 0.0);
            }
            o => panic!("Unexpected outcome {:?}", o),
        }

        pair(&shared);
        assert!(matches!(
            nav.step_vision(&mut vision, &shared).unwrap(),
            StepOutcome::Held { count: 1, .. }
        ));

        pair(&shared);
        match nav.step_vision(&mut vision, &shared).unwrap() {
            StepOutcome::Advanced { from, to, .. } => {
                assert_eq!(from, Stage::PassingDune);
                assert_eq!(to, Stage::BeforeGrasslandStage1);
            }
            o => panic!("Unexpected outcome {:?}", o),
        }
        assert_eq!(nav.hysteresis(), 0);
        assert!((nav.memory().front_fence_mm - 710.0).abs() < 1e-9);
        assert_eq!(vision.yaw_calls(), 3);
    }

    #[test]
    fn test_timeout_aborts_frame() {
        let shared = Shared::new(Stage::PassingDune, false);
        let mut vision = ScriptedVision::new(vec![fence_frame(700.0), fence_frame(700.0)]);
        let mut params = NavParams::default();
        params.handoff_timeout_s = Some(0.01);
        let mut nav = NavCtrl::new(params, SideMode::Right).starting_at(Stage::PassingDune);

        pair(&shared);
        assert!(matches!(
            nav.step_vision(&mut vision, &shared).unwrap(),
            StepOutcome::Held { count: 1, .. }
        ));
        let signals = *nav.signals();

        // No rotation published for this frame
        match nav.step_vision(&mut vision, &shared).unwrap() {
            StepOutcome::Aborted(FrameAbort::HandoffTimeout("rotation")) => (),
            o => panic!("Unexpected outcome {:?}", o),
        }
        assert_eq!(nav.hysteresis(), 1);
        assert_eq!(*nav.signals(), signals);
        assert_eq!(nav.stage(), Stage::PassingDune);
    }

    #[test]
    fn test_missing_detection_consumes_alignment() {
        let shared = Shared::new(Stage::BeforeGrasslandStage2, false);
        // No rope in the image
        let mut vision = ScriptedVision::new(vec![ScriptedFrame::default()]);
        let mut nav = NavCtrl::new(NavParams::default(), SideMode::Left)
            .starting_at(Stage::BeforeGrasslandStage2);

        pair(&shared);
        match nav.step_vision(&mut vision, &shared).unwrap() {
            StepOutcome::Aborted(FrameAbort::MissingDepth(_))
            | StepOutcome::Aborted(FrameAbort::MissingDetection(_)) => (),
            o => panic!("Unexpected outcome {:?}", o),
        }

        // The pair was consumed so the acquisition loop is free to publish the next one
        assert!(shared.rotations.try_take().unwrap().is_none());
        assert!(shared.grounds.try_take().unwrap().is_none());
        assert_eq!(
            nav.memory().last_ground,
            Some(PlaneModel::new(0.0, 1.0, 0.0, -0.4))
        );
    }

    #[test]
    fn test_wrong_source() {
        let shared = Shared::new(Stage::BeforeDuneStage1, false);
        let mut nav = NavCtrl::new(NavParams::default(), SideMode::Left);

        assert!(matches!(
            nav.step_vision(&mut ScriptedVision::default(), &shared),
            Err(NavError::WrongSource { .. })
        ));

        let mut nav = nav.starting_at(Stage::PassingDune);
        assert!(matches!(
            nav.step_geometry(&mut GeometryFrame::default()),
            Err(NavError::WrongSource { .. })
        ));
    }

    #[test]
    fn test_operator_advance_never_regresses() {
        let mut nav = NavCtrl::new(NavParams::default(), SideMode::Left)
            .starting_at(Stage::UnderMountain);

        assert!(matches!(
            nav.operator_advance(Stage::PassingDune),
            Err(NavError::Regression { .. })
        ));
        assert_eq!(nav.stage(), Stage::UnderMountain);

        assert!(matches!(
            nav.operator_advance(Stage::UnderMountain).unwrap(),
            StepOutcome::Held { .. }
        ));

        match nav.operator_advance(Stage::ClimbingMountain).unwrap() {
            StepOutcome::Advanced { from, to, .. } => {
                assert_eq!(from, Stage::UnderMountain);
                assert_eq!(to, Stage::ClimbingMountain);
            }
            o => panic!("Unexpected outcome {:?}", o),
        }
        assert_eq!(nav.stage(), Stage::ClimbingMountain);
    }

    #[test]
    fn test_right_side_rois_mirrored() {
        let nav = NavCtrl::new(NavParams::default(), SideMode::Right);

        assert_eq!(nav.rois().fence_far.x_min, 0.1);
        assert_eq!(nav.rois().fence_far.x_max, 1.2);
        assert_eq!(nav.snapshot().stage_index, 0);
    }
}
