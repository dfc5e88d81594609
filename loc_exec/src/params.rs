//! # Locator Executable Parameters
//!
//! One parameter file per component, all under `<sw_root>/params`.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};
use util::params::{self, LoadError};

use crate::{
    acq::AcqParams, ground::GroundTrackerParams, nav::NavParams, preproc::PreprocParams,
    vertical::VerticalParams,
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Parameters of the geometric processing of each frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerParams {
    /// Yaw applied towards the followed fence before the dune crossing, degrees.
    pub bias_angle_deg: f64,

    pub preproc: PreprocParams,

    pub vertical: VerticalParams,
}

/// Every parameter of the locator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LocParams {
    pub per: PerParams,
    pub ground: GroundTrackerParams,
    pub nav: NavParams,
    pub acq: AcqParams,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Default for PerParams {
    fn default() -> Self {
        Self {
            bias_angle_deg: 25.0,
            preproc: PreprocParams::default(),
            vertical: VerticalParams::default(),
        }
    }
}

impl LocParams {
    /// Load all parameter files.
    pub fn load() -> Result<Self, LoadError> {
        Ok(Self {
            per: params::load("per.toml")?,
            ground: params::load("ground.toml")?,
            nav: params::load("nav.toml")?,
            acq: params::load("acq.toml")?,
        })
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
