//! # Acquisition loop
//!
//! From the dune crossing onward the ground is tracked on a thread of its own. Each frame the
//! loop pulls a cloud from the sensor, refreshes the ground estimate on the patch in front of
//! the vehicle and publishes the ground coefficients, then the alignment rotation, for the next
//! image processed by the navigation loop.
//!
//! The loop stays idle until the navigation loop hands it the ground tracker through
//! [`Shared::start_acquisition`].

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{
    sync::{Arc, Mutex},
    thread::{self, JoinHandle},
};

use comms_if::{
    eqpt::sensor::{Sensor, SensorError},
    nav::SideMode,
};
use log::{debug, info, trace, warn};
use serde::{Deserialize, Serialize};

use crate::{
    align::alignment_rotation,
    ground::{GroundTracker, GroundUpdateStatus},
    preproc::{preprocess, PreprocParams},
    sync::{Shared, SyncError},
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcqParams {
    /// Serve one frame per navigation step rather than running freely.
    pub single_shot: bool,

    /// Voxel size of the acquired frames, meters.
    pub leaf_m: f64,
}

/// The acquisition loop.
pub struct Acquisition<S: Sensor + ?Sized> {
    sensor: Arc<Mutex<S>>,
    shared: Arc<Shared>,
    side: SideMode,
    bias_deg: f64,
    preproc: PreprocParams,

    /// Handed over by the navigation loop on the first request.
    tracker: Option<GroundTracker>,

    stats: AcqStats,
}

/// Frame counts of a finished acquisition loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AcqStats {
    pub frames: usize,
    pub rejected: usize,
    pub fit_failed: usize,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum AcqError {
    #[error("Sensor error: {0}")]
    Sensor(#[from] SensorError),

    #[error("Synchronisation error: {0}")]
    Sync(#[from] SyncError),

    #[error("A frame was requested before the ground tracker was handed over")]
    NoTracker,

    #[error("Could not spawn the acquisition thread: {0}")]
    Spawn(std::io::Error),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Default for AcqParams {
    fn default() -> Self {
        Self {
            single_shot: false,
            leaf_m: 0.025,
        }
    }
}

impl<S: Sensor + ?Sized> Acquisition<S> {
    pub fn new(
        sensor: Arc<Mutex<S>>,
        shared: Arc<Shared>,
        side: SideMode,
        bias_deg: f64,
        preproc: &PreprocParams,
        params: &AcqParams,
    ) -> Self {
        Self {
            sensor,
            shared,
            side,
            bias_deg,
            preproc: PreprocParams {
                leaf_m: params.leaf_m,
                ..preproc.clone()
            },
            tracker: None,
            stats: AcqStats::default(),
        }
    }

    /// Run until stopped or until the sensor runs out of frames.
    ///
    /// Both loops are stopped when this returns, so that the navigation loop never waits on a
    /// hand-off that will not come.
    pub fn run(mut self) -> Result<AcqStats, AcqError> {
        let result = loop {
            match self.step() {
                Ok(()) => (),
                Err(AcqError::Sync(SyncError::Stopped)) => break Ok(()),
                Err(AcqError::Sensor(SensorError::EndOfStream)) => {
                    info!("Sensor stream ended, stopping");
                    break Ok(());
                }
                Err(e) => break Err(e),
            }
        };

        self.shared.stop();

        info!(
            "Acquisition stopped after {} frames ({} rejected, {} failed fits)",
            self.stats.frames, self.stats.rejected, self.stats.fit_failed
        );

        result.map(|_| self.stats)
    }

    /// Acquire and publish one frame.
    fn step(&mut self) -> Result<(), AcqError> {
        let request = self.shared.wait_for_frame()?;

        if let Some(t) = request.tracker {
            debug!("Ground tracker received, estimate {:?}", t.estimate().coeffs());
            self.tracker = Some(t);
        }
        let tracker = self.tracker.as_mut().ok_or(AcqError::NoTracker)?;

        // The cloud is copied out so the sensor is free while the frame is processed
        let raw = {
            let mut sensor = self.sensor.lock().map_err(SyncError::from)?;
            sensor.set_stage(request.stage.index());
            sensor.update()?;
            sensor.cloud().clone()
        };

        let frame = preprocess(&raw, self.side, &self.preproc);
        let update = tracker.update(&frame.ground, request.stage);

        match update.status {
            GroundUpdateStatus::Accepted => (),
            GroundUpdateStatus::Rejected => self.stats.rejected += 1,
            GroundUpdateStatus::FitFailed => {
                warn!("No ground plane in frame {}", self.stats.frames);
                self.stats.fit_failed += 1;
            }
        }

        let rotation =
            alignment_rotation(tracker.estimate(), request.stage, self.side, self.bias_deg);

        // Ground first, the navigation loop waits on the rotation then picks up its ground
        if let Some(ground) = update.publish {
            self.shared.grounds.put(ground)?;
        }
        self.shared.rotations.put(rotation)?;

        self.shared.frame_done()?;
        self.stats.frames += 1;

        trace!("Acquisition frame {} published", self.stats.frames);

        Ok(())
    }
}

// ------------------------------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Start the acquisition loop on its own thread.
pub fn spawn<S>(acq: Acquisition<S>) -> Result<JoinHandle<Result<AcqStats, AcqError>>, AcqError>
where
    S: Sensor + ?Sized + 'static,
{
    thread::Builder::new()
        .name("loc::acq".into())
        .spawn(move || acq.run())
        .map_err(AcqError::Spawn)
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
