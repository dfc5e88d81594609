//! # Navigation loop
//!
//! Drives the stage machine frame by frame. Before the dune crossing each frame is pulled from
//! the sensor, its ground tracked, aligned and stripped of horizontal surfaces before being
//! measured by the geometry stages. On reaching the crossing the ground tracker is handed to the
//! acquisition loop and the remaining stages are measured from the image processing collaborator,
//! one alignment per image.
//!
//! An operator may move the stage forward or stop the run through [`OperatorCmd`]s.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{
    fmt,
    str::FromStr,
    sync::{
        mpsc::{Receiver, TryRecvError},
        Arc, Mutex,
    },
};

use comms_if::{
    eqpt::{
        sensor::{Sensor, SensorError},
        viewer::Viewer,
        vision::Vision,
    },
    nav::SideMode,
};
use log::{debug, info, warn};
use serde::Serialize;

use crate::{
    align::align_cloud,
    ground::{GroundTracker, GroundUpdateStatus},
    nav::{FrameAbort, GeometryFrame, NavCtrl, NavError, Stage, StageSource, StepOutcome},
    params::{LocParams, PerParams},
    per::PerError,
    preproc::preprocess,
    sync::{Shared, SyncError},
    vertical::{extract_vertical, VerticalMode},
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// The navigation loop.
pub struct Locator<S: Sensor + ?Sized, V: Viewer> {
    per: PerParams,
    side: SideMode,

    sensor: Arc<Mutex<S>>,
    shared: Arc<Shared>,
    vision: Box<dyn Vision>,
    viewer: V,
    operator: Option<Receiver<OperatorCmd>>,

    nav: NavCtrl,

    /// Owned until the dune crossing, then handed to the acquisition loop.
    tracker: Option<GroundTracker>,
}

/// Totals of a finished run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// Stage the run ended in.
    pub stage: Stage,

    pub frames: usize,
    pub aborted: usize,
    pub advances: usize,

    pub reason: StopReason,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Commands accepted from the operator while running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorCmd {
    /// Move forward to the given stage.
    Advance(Stage),

    Stop,
}

/// Why the navigation loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StopReason {
    /// The sensor ran out of frames.
    EndOfStream,

    /// The shared state was stopped, usually by the acquisition loop.
    Stopped,

    Operator,

    ViewerClosed,
}

#[derive(Debug, thiserror::Error)]
pub enum LocError {
    #[error("Sensor error: {0}")]
    Sensor(#[from] SensorError),

    #[error("Synchronisation error: {0}")]
    Sync(#[from] SyncError),

    #[error("Navigation error: {0}")]
    Nav(#[from] NavError),

    #[error("Geometry stage {0} reached without a ground tracker")]
    NoTracker(Stage),
}

#[derive(Debug, thiserror::Error)]
#[error("Unknown operator command \"{0}\", expected \"advance <stage>\" or \"stop\"")]
pub struct ParseCmdError(String);

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl<S: Sensor + ?Sized, V: Viewer> Locator<S, V> {
    pub fn new(
        params: &LocParams,
        side: SideMode,
        sensor: Arc<Mutex<S>>,
        shared: Arc<Shared>,
        vision: Box<dyn Vision>,
        viewer: V,
        tracker: GroundTracker,
    ) -> Self {
        Self {
            per: params.per.clone(),
            side,
            sensor,
            shared,
            vision,
            viewer,
            operator: None,
            nav: NavCtrl::new(params.nav.clone(), side),
            tracker: Some(tracker),
        }
    }

    /// Resume the course from a later stage.
    pub fn starting_at(mut self, stage: Stage) -> Self {
        self.nav = self.nav.starting_at(stage);
        self
    }

    /// Accept operator commands from the given channel.
    pub fn with_operator(mut self, rx: Receiver<OperatorCmd>) -> Self {
        self.operator = Some(rx);
        self
    }

    pub fn stage(&self) -> Stage {
        self.nav.stage()
    }

    pub fn viewer(&self) -> &V {
        &self.viewer
    }

    /// Run until the end of the data, an operator stop or a fatal error.
    ///
    /// The shared state is always stopped on return so the acquisition loop can be joined.
    pub fn run(&mut self) -> Result<RunSummary, LocError> {
        let result = self.run_loop();
        self.shared.stop();

        if let Ok(s) = &result {
            info!(
                "Navigation stopped ({:?}) in stage {} after {} frames ({} aborted)",
                s.reason, s.stage, s.frames, s.aborted
            );
        }

        result
    }

    fn run_loop(&mut self) -> Result<RunSummary, LocError> {
        let mut summary = RunSummary {
            stage: self.nav.stage(),
            frames: 0,
            aborted: 0,
            advances: 0,
            reason: StopReason::Stopped,
        };

        self.enter_stage(self.nav.stage())?;

        summary.reason = loop {
            if let Some(reason) = self.poll_operator(&mut summary)? {
                break reason;
            }
            if self.viewer.was_stopped() {
                info!("Viewer closed");
                break StopReason::ViewerClosed;
            }
            let outcome = match self.nav.stage().source() {
                // Vision stages see the stop on the hand-off, after the queued alignments
                StageSource::Geometry if self.shared.is_stopped() => break StopReason::Stopped,
                StageSource::Geometry => match self.step_geometry() {
                    Ok(o) => o,
                    Err(LocError::Sensor(SensorError::EndOfStream)) => {
                        info!("Sensor stream ended");
                        break StopReason::EndOfStream;
                    }
                    Err(e) => return Err(e),
                },
                StageSource::Vision => {
                    match self.nav.step_vision(self.vision.as_mut(), &self.shared) {
                        Ok(o) => o,
                        Err(NavError::Sync(SyncError::Stopped)) => break StopReason::Stopped,
                        Err(e) => return Err(e.into()),
                    }
                }
            };

            summary.frames += 1;
            self.record(outcome, &mut summary)?;
        };

        summary.stage = self.nav.stage();

        Ok(summary)
    }

    /// Measure one sensor frame in a geometry stage.
    fn step_geometry(&mut self) -> Result<StepOutcome, LocError> {
        let stage = self.nav.stage();

        let raw = {
            let mut sensor = self.sensor.lock().map_err(SyncError::from)?;
            sensor.set_stage(stage.index());
            sensor.update()?;
            sensor.cloud().clone()
        };

        let frame = preprocess(&raw, self.side, &self.per.preproc);

        let tracker = self.tracker.as_mut().ok_or(LocError::NoTracker(stage))?;
        let update = tracker.update(&frame.ground, stage);
        if update.status == GroundUpdateStatus::FitFailed {
            return Ok(StepOutcome::Aborted(FrameAbort::Per(PerError::NoInliers)));
        }

        let mut cloud = frame.filtered;
        let aligned = align_cloud(
            &mut cloud,
            tracker.estimate(),
            stage,
            self.side,
            self.per.bias_angle_deg,
        );

        let scene = match extract_vertical(
            &cloud,
            &aligned.ground_rot,
            VerticalMode::General,
            &self.per.vertical,
        ) {
            Ok(s) => s,
            Err(e) => return Ok(StepOutcome::Aborted(e.into())),
        };

        let mut geometry = GeometryFrame {
            scene,
            ground_rot: aligned.ground_rot,
        };
        let outcome = self.nav.step_geometry(&mut geometry)?;

        self.viewer.show(&frame.ground, &geometry.scene.dst);

        Ok(outcome)
    }

    fn record(&mut self, outcome: StepOutcome, summary: &mut RunSummary) -> Result<(), LocError> {
        match outcome {
            StepOutcome::Held { signals, count } => {
                debug!("{} held ({}): {:?}", self.nav.stage(), count, signals)
            }
            StepOutcome::Advanced { to, signals, .. } => {
                debug!("Signals on leaving: {:?}", signals);
                summary.advances += 1;
                self.enter_stage(to)?;
            }
            StepOutcome::Aborted(reason) => {
                summary.aborted += 1;
                debug!("Frame aborted: {}", reason);
            }
        }

        Ok(())
    }

    /// Mirror the stage to the other loop and the sensor, handing the tracker over once past the
    /// geometry stages.
    fn enter_stage(&mut self, stage: Stage) -> Result<(), LocError> {
        self.shared.set_stage(stage)?;
        self.sensor
            .lock()
            .map_err(SyncError::from)?
            .set_stage(stage.index());

        if stage.source() == StageSource::Vision {
            if let Some(tracker) = self.tracker.take() {
                info!("Handing the ground tracker over to the acquisition loop");
                self.shared.start_acquisition(tracker)?;
            }
        }

        Ok(())
    }

    fn poll_operator(&mut self, summary: &mut RunSummary) -> Result<Option<StopReason>, LocError> {
        let cmd = match &self.operator {
            Some(rx) => match rx.try_recv() {
                Ok(c) => c,
                Err(TryRecvError::Empty) => return Ok(None),
                Err(TryRecvError::Disconnected) => {
                    self.operator = None;
                    return Ok(None);
                }
            },
            None => return Ok(None),
        };

        info!("Operator command: {}", cmd);

        match cmd {
            OperatorCmd::Stop => Ok(Some(StopReason::Operator)),
            OperatorCmd::Advance(target) => {
                match self.nav.operator_advance(target) {
                    Ok(StepOutcome::Advanced { to, .. }) => {
                        summary.advances += 1;
                        self.enter_stage(to)?;
                    }
                    Ok(_) => (),
                    Err(e @ NavError::Regression { .. }) => warn!("{}", e),
                    Err(e) => return Err(e.into()),
                }
                Ok(None)
            }
        }
    }
}

impl fmt::Display for OperatorCmd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperatorCmd::Advance(s) => write!(f, "advance {}", s),
            OperatorCmd::Stop => write!(f, "stop"),
        }
    }
}

impl FromStr for OperatorCmd {
    type Err = ParseCmdError;

    /// `stop`, or `advance <stage>` with the stage given by name or index.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut words = s.split_whitespace();

        match (words.next(), words.next(), words.next()) {
            (Some(w), None, None) if w.eq_ignore_ascii_case("stop") => Ok(OperatorCmd::Stop),
            (Some(w), Some(stage), None) if w.eq_ignore_ascii_case("advance") => stage
                .parse()
                .map(OperatorCmd::Advance)
                .map_err(|_| ParseCmdError(s.trim().into())),
            _ => Err(ParseCmdError(s.trim().into())),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
