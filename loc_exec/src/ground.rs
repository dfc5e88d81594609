//! # Ground plane tracker
//!
//! Keeps a smoothed estimate of the plane the vehicle drives on. The estimate is seeded by
//! averaging plane fits over several frames at startup, then refreshed every frame from the
//! near-ground part of the cloud. Before the dune crossing only fits close to the current
//! estimate are accepted, so that a single frame dominated by an obstacle cannot corrupt it.
//! From the dune crossing onward the tracker also publishes the coefficients it used for the
//! image processing collaborator.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::eqpt::{
    cloud::{Axis, PlaneModel, PointCloud},
    sensor::{Sensor, SensorError},
};
use log::{debug, info, trace, warn};
use serde::{Deserialize, Serialize};

use crate::{
    nav::Stage,
    per::{fit_plane, range_filter, voxel_downsample, PlaneFitParams},
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroundTrackerParams {
    /// Frames dropped before calibration while the sensor settles.
    pub warmup_frames: usize,

    /// Number of successful fits averaged by the calibration.
    pub calib_frames: usize,

    /// Number of failed calibration frames tolerated before giving up.
    pub max_calib_retries: usize,

    /// Depth range of the calibration cloud, meters.
    pub calib_z_range: [f64; 2],

    /// Voxel size of the calibration cloud, meters.
    pub calib_leaf_m: f64,

    /// Minimum absolute cosine between the new and current normals for a fit to be accepted.
    pub min_angle_cosine: f64,

    /// Maximum change of the plane's distance to the origin for a fit to be accepted before the
    /// dune crossing, meters.
    pub max_offset_diff_m: f64,

    /// Offset correction applied in the first grassland approach stage, meters.
    pub offset_nudge_m: f64,

    /// The correction is only applied while the offset is below this value, meters.
    pub offset_nudge_limit_m: f64,

    pub plane_fit: PlaneFitParams,
}

/// Smoothed ground plane estimate.
#[derive(Debug, Clone, Serialize)]
pub struct GroundTracker {
    #[serde(skip)]
    params: GroundTrackerParams,

    /// Current smoothed estimate.
    estimate: PlaneModel,

    /// Last coefficients published to the image processing collaborator.
    published: PlaneModel,
}

/// How close a new ground fit is to the current estimate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Similarity {
    /// Absolute cosine of the angle between the two normals.
    pub angle_cosine: f64,

    /// Absolute difference of the signed distances of the planes from the origin, meters.
    pub offset_diff: f64,
}

/// Outcome of one tracker update.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GroundUpdate {
    pub status: GroundUpdateStatus,

    /// Similarity of the new fit to the previous estimate, `None` if the fit failed.
    pub similarity: Option<Similarity>,

    /// Coefficients to hand to the image processing collaborator, always present from the dune
    /// crossing onward so that every published rotation has a matching ground plane.
    pub publish: Option<PlaneModel>,
}

struct Calibration {
    sum: [f64; 4],
    collected: usize,
    failed: usize,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum GroundUpdateStatus {
    /// No plane could be fitted to the frame.
    FitFailed,

    /// A plane was fitted but it is too far from the current estimate.
    Rejected,

    /// The fit replaced the current estimate.
    Accepted,
}

#[derive(Debug, thiserror::Error)]
pub enum GroundError {
    #[error("Sensor error during ground calibration: {0}")]
    Sensor(#[from] SensorError),

    #[error(
        "Ground calibration failed: {failed} frames had no plane, only {collected} good frames \
         collected"
    )]
    CalibrationFailed { collected: usize, failed: usize },

    #[error("Ground calibration requires at least one frame")]
    NoCalibrationFrames,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Default for GroundTrackerParams {
    fn default() -> Self {
        Self {
            warmup_frames: 3,
            calib_frames: 10,
            max_calib_retries: 20,
            calib_z_range: [0.0, 1.5],
            calib_leaf_m: 0.02,
            min_angle_cosine: 0.8,
            max_offset_diff_m: 0.04,
            offset_nudge_m: 0.1,
            offset_nudge_limit_m: 0.51,
            plane_fit: PlaneFitParams::default(),
        }
    }
}

impl GroundTracker {
    /// Seed the tracker from the sensor.
    ///
    /// Drops the warmup frames then averages the ground fits of `calib_frames` frames. Frames in
    /// which no plane can be found are skipped, up to `max_calib_retries` of them.
    pub fn calibrate<S>(sensor: &mut S, params: GroundTrackerParams) -> Result<Self, GroundError>
    where
        S: Sensor + ?Sized,
    {
        info!("Initialising ground coefficients...");

        for _ in 0..params.warmup_frames {
            sensor.update()?;
        }

        let mut calib = Calibration::new();

        while calib.collected < params.calib_frames {
            sensor.update()?;
            calib.add_frame(sensor.cloud(), &params)?;
        }

        calib.finish(params)
    }

    /// Seed the tracker from already acquired frames.
    ///
    /// Unlike `calibrate` no warmup frames are dropped and every frame is used.
    pub fn from_frames(
        frames: &[PointCloud],
        params: GroundTrackerParams,
    ) -> Result<Self, GroundError> {
        let mut calib = Calibration::new();

        for frame in frames {
            calib.add_frame(frame, &params)?;
        }

        calib.finish(params)
    }

    /// Create a tracker with a known estimate.
    pub fn with_estimate(estimate: PlaneModel, params: GroundTrackerParams) -> Self {
        Self {
            params,
            estimate,
            published: estimate,
        }
    }

    pub fn estimate(&self) -> &PlaneModel {
        &self.estimate
    }

    pub fn published(&self) -> &PlaneModel {
        &self.published
    }

    /// Update the estimate from the near-ground cloud of the current frame.
    pub fn update(&mut self, cloud: &PointCloud, stage: Stage) -> GroundUpdate {
        let publishing = stage >= Stage::PassingDune;

        let fit = match fit_plane(cloud, None, &self.params.plane_fit) {
            Ok(f) => f,
            Err(e) => {
                debug!("Ground fit failed: {}", e);
                return GroundUpdate {
                    status: GroundUpdateStatus::FitFailed,
                    similarity: None,
                    publish: self.republish(publishing),
                };
            }
        };

        let sim = match similarity(&self.estimate, &fit.model) {
            Some(s) => s,
            None => {
                warn!("Degenerate ground plane {:?}", fit.model.coeffs());
                return GroundUpdate {
                    status: GroundUpdateStatus::FitFailed,
                    similarity: None,
                    publish: self.republish(publishing),
                };
            }
        };

        trace!(
            "Ground fit {:?}: cos {:.4}, offset diff {:.4}",
            fit.model.coeffs(),
            sim.angle_cosine,
            sim.offset_diff
        );

        if !publishing {
            let accepted = sim.angle_cosine > self.params.min_angle_cosine
                && sim.offset_diff < self.params.max_offset_diff_m;

            if accepted {
                self.estimate = fit.model;
            }

            return GroundUpdate {
                status: if accepted {
                    GroundUpdateStatus::Accepted
                } else {
                    GroundUpdateStatus::Rejected
                },
                similarity: Some(sim),
                publish: None,
            };
        }

        if sim.angle_cosine > self.params.min_angle_cosine {
            self.estimate = fit.model;

            let mut published = fit.model;
            if stage == Stage::BeforeGrasslandStage1 {
                published = self.nudge(published);
            }
            self.published = published;

            GroundUpdate {
                status: GroundUpdateStatus::Accepted,
                similarity: Some(sim),
                publish: Some(published),
            }
        } else {
            GroundUpdate {
                status: GroundUpdateStatus::Rejected,
                similarity: Some(sim),
                publish: Some(self.published),
            }
        }
    }

    fn republish(&self, publishing: bool) -> Option<PlaneModel> {
        if publishing {
            Some(self.published)
        } else {
            None
        }
    }

    /// Raise the sensor height encoded in the offset while it is below the limit.
    fn nudge(&self, plane: PlaneModel) -> PlaneModel {
        let height = plane.d.abs();

        if height < self.params.offset_nudge_limit_m {
            let d = height + self.params.offset_nudge_m;
            PlaneModel {
                d: if plane.d > 0.0 { d } else { -d },
                ..plane
            }
        } else {
            plane
        }
    }
}

impl Calibration {
    fn new() -> Self {
        Self {
            sum: [0.0; 4],
            collected: 0,
            failed: 0,
        }
    }

    fn add_frame(
        &mut self,
        frame: &PointCloud,
        params: &GroundTrackerParams,
    ) -> Result<(), GroundError> {
        let cloud = voxel_downsample(
            &range_filter(
                frame,
                Axis::Z,
                params.calib_z_range[0],
                params.calib_z_range[1],
            ),
            params.calib_leaf_m,
        );

        match fit_plane(&cloud, None, &params.plane_fit) {
            Ok(fit) => {
                let c = fit.model.coeffs();
                for i in 0..4 {
                    self.sum[i] += c[i];
                }
                self.collected += 1;

                debug!(
                    "Calibration frame {}: {:.4} {:.4} {:.4} {:.4}",
                    self.collected, c[0], c[1], c[2], c[3]
                );
            }
            Err(e) => {
                self.failed += 1;
                warn!("Calibration frame rejected ({}), retrying", e);

                if self.failed > params.max_calib_retries {
                    return Err(GroundError::CalibrationFailed {
                        collected: self.collected,
                        failed: self.failed,
                    });
                }
            }
        }

        Ok(())
    }

    fn finish(self, params: GroundTrackerParams) -> Result<GroundTracker, GroundError> {
        if self.collected == 0 {
            return Err(GroundError::NoCalibrationFrames);
        }

        let n = self.collected as f64;
        let estimate = PlaneModel::new(
            self.sum[0] / n,
            self.sum[1] / n,
            self.sum[2] / n,
            self.sum[3] / n,
        );

        info!(
            "Ground coefficients: {:.4} {:.4} {:.4} {:.4}",
            estimate.a, estimate.b, estimate.c, estimate.d
        );

        Ok(GroundTracker::with_estimate(estimate, params))
    }
}

// ------------------------------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Compare two planes, `None` if either is degenerate.
pub fn similarity(prev: &PlaneModel, new: &PlaneModel) -> Option<Similarity> {
    if prev.is_degenerate() || new.is_degenerate() {
        return None;
    }

    Some(Similarity {
        angle_cosine: prev.abs_cosine_to(&new.normal())?,
        offset_diff: (new.origin_offset() - prev.origin_offset()).abs(),
    })
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
