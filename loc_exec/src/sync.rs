//! # Cross thread synchronisation
//!
//! From the dune crossing onward two loops run at once: the acquisition loop aligns every frame
//! and produces a rotation and a ground plane for the image processing side, while the
//! navigation loop consumes them one frame at a time. The pairs are exchanged through two
//! single slot [`Handoff`]s, and the acquisition loop itself is started, paused and stepped
//! through [`Shared`].

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{
    collections::VecDeque,
    sync::{Condvar, Mutex, PoisonError},
    time::Duration,
};

use comms_if::eqpt::cloud::PlaneModel;
use log::{debug, trace};
use nalgebra::Rotation3;

use crate::{ground::GroundTracker, nav::Stage};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Bounded blocking queue used to pass one item at a time between the two loops.
#[derive(Debug)]
pub struct Handoff<T> {
    name: &'static str,
    capacity: usize,
    slot: Mutex<Slot<T>>,
    not_empty: Condvar,
    not_full: Condvar,
}

#[derive(Debug)]
struct Slot<T> {
    items: VecDeque<T>,
    stopped: bool,
}

/// State shared between the navigation and acquisition loops.
#[derive(Debug)]
pub struct Shared {
    acq: Mutex<AcqControl>,
    acq_cv: Condvar,

    /// Alignment rotations, produced by the acquisition loop.
    pub rotations: Handoff<Rotation3<f64>>,

    /// Ground coefficients matching the rotations, produced by the acquisition loop.
    pub grounds: Handoff<PlaneModel>,
}

#[derive(Debug)]
struct AcqControl {
    mode: AcqMode,
    single_shot: bool,
    stage: Stage,
    tracker: Option<GroundTracker>,
    stop: bool,
}

/// What the acquisition loop should do with its next frame.
#[derive(Debug)]
pub struct AcqRequest {
    pub stage: Stage,

    /// The ground tracker, only present on the first request after the hand over.
    pub tracker: Option<GroundTracker>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcqMode {
    /// Acquisition is paused.
    Hold,

    /// Acquire continuously.
    Run,

    /// Acquire a single frame then go back to `Hold`.
    Once,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum SyncError {
    #[error("A synchronisation primitive is poisoned")]
    Poisoned,

    #[error("The loops have been asked to stop")]
    Stopped,

    #[error("Timed out waiting on the {0} hand-off")]
    Timeout(&'static str),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl<T> From<PoisonError<T>> for SyncError {
    fn from(_: PoisonError<T>) -> Self {
        SyncError::Poisoned
    }
}

impl<T> Handoff<T> {
    pub fn new(name: &'static str, capacity: usize) -> Self {
        Self {
            name,
            capacity: capacity.max(1),
            slot: Mutex::new(Slot {
                items: VecDeque::with_capacity(capacity.max(1)),
                stopped: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    /// Add an item, waiting while the queue is full.
    pub fn put(&self, item: T) -> Result<(), SyncError> {
        let guard = self.slot.lock()?;
        let mut slot = self.not_full.wait_while(guard, |s| {
            !s.stopped && s.items.len() >= self.capacity
        })?;

        if slot.stopped {
            return Err(SyncError::Stopped);
        }

        slot.items.push_back(item);
        self.not_empty.notify_one();

        trace!("{} hand-off: put", self.name);

        Ok(())
    }

    /// Remove the oldest item, waiting while the queue is empty.
    ///
    /// With a timeout the wait gives up with `SyncError::Timeout`. Items still queued when the
    /// hand-off is stopped are returned before `SyncError::Stopped`.
    pub fn take(&self, timeout: Option<Duration>) -> Result<T, SyncError> {
        let guard = self.slot.lock()?;
        let waiting = |s: &mut Slot<T>| !s.stopped && s.items.is_empty();

        let mut slot = match timeout {
            Some(t) => self.not_empty.wait_timeout_while(guard, t, waiting)?.0,
            None => self.not_empty.wait_while(guard, waiting)?,
        };

        match slot.items.pop_front() {
            Some(item) => {
                self.not_full.notify_one();
                trace!("{} hand-off: take", self.name);
                Ok(item)
            }
            None if slot.stopped => Err(SyncError::Stopped),
            None => Err(SyncError::Timeout(self.name)),
        }
    }

    /// Remove the oldest item if there is one.
    pub fn try_take(&self) -> Result<Option<T>, SyncError> {
        let mut slot = self.slot.lock()?;

        let item = slot.items.pop_front();
        if item.is_some() {
            self.not_full.notify_one();
        }

        Ok(item)
    }

    /// Wake every waiter, later waits fail immediately.
    pub fn stop(&self) {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        slot.stopped = true;

        self.not_empty.notify_all();
        self.not_full.notify_all();
    }
}

impl Shared {
    /// Create the shared state, acquisition starts held.
    ///
    /// In single shot mode the acquisition loop serves one frame per [`Shared::request_frame`]
    /// call instead of running freely once started.
    pub fn new(stage: Stage, single_shot: bool) -> Self {
        Self {
            acq: Mutex::new(AcqControl {
                mode: AcqMode::Hold,
                single_shot,
                stage,
                tracker: None,
                stop: false,
            }),
            acq_cv: Condvar::new(),
            rotations: Handoff::new("rotation", 1),
            grounds: Handoff::new("ground", 1),
        }
    }

    pub fn stage(&self) -> Result<Stage, SyncError> {
        Ok(self.acq.lock()?.stage)
    }

    /// Mirror a stage change to the acquisition loop.
    pub fn set_stage(&self, stage: Stage) -> Result<(), SyncError> {
        self.acq.lock()?.stage = stage;
        Ok(())
    }

    pub fn mode(&self) -> Result<AcqMode, SyncError> {
        Ok(self.acq.lock()?.mode)
    }

    /// Hand the ground tracker over to the acquisition loop and start it.
    pub fn start_acquisition(&self, tracker: GroundTracker) -> Result<(), SyncError> {
        let mut acq = self.acq.lock()?;

        acq.tracker = Some(tracker);
        if !acq.single_shot {
            acq.mode = AcqMode::Run;
        }

        debug!("Acquisition started (single shot: {})", acq.single_shot);
        self.acq_cv.notify_all();

        Ok(())
    }

    /// Ask for one frame in single shot mode, does nothing otherwise.
    pub fn request_frame(&self) -> Result<(), SyncError> {
        let mut acq = self.acq.lock()?;

        if acq.single_shot {
            acq.mode = AcqMode::Once;
            self.acq_cv.notify_all();
        }

        Ok(())
    }

    /// Block the acquisition loop until a frame is wanted.
    pub fn wait_for_frame(&self) -> Result<AcqRequest, SyncError> {
        let guard = self.acq.lock()?;
        let mut acq = self
            .acq_cv
            .wait_while(guard, |a| !a.stop && a.mode == AcqMode::Hold)?;

        if acq.stop {
            return Err(SyncError::Stopped);
        }

        Ok(AcqRequest {
            stage: acq.stage,
            tracker: acq.tracker.take(),
        })
    }

    /// Called by the acquisition loop once its frame is published.
    pub fn frame_done(&self) -> Result<(), SyncError> {
        let mut acq = self.acq.lock()?;

        if acq.mode == AcqMode::Once {
            acq.mode = AcqMode::Hold;
        }

        Ok(())
    }

    /// Stop both loops, waking anything blocked on the shared state.
    pub fn stop(&self) {
        {
            let mut acq = self.acq.lock().unwrap_or_else(PoisonError::into_inner);
            acq.stop = true;
        }
        self.acq_cv.notify_all();

        self.rotations.stop();
        self.grounds.stop();
    }

    pub fn is_stopped(&self) -> bool {
        self.acq.lock().map(|a| a.stop).unwrap_or(true)
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
