//! # Navigation interface
//!
//! Signals produced by the locator for the external drive controller, and the course side the
//! vehicle runs on.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Distance signals for the drive controller.
///
/// `lateral_mm` and `forward_mm` are always expressed in millimeters. Geometry derived stages
/// additionally report their raw measurement in meters in `measurement_m`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct NavSignals {
    /// Distance to the side reference (fence, pillar, line), millimeters.
    pub lateral_mm: f64,

    /// Distance to the forward reference (obstacle, rope, line), millimeters.
    pub forward_mm: f64,

    /// Last geometric measurement used by the stage predicate, meters.
    pub measurement_m: f64,

    /// Drive phase code telling the controller which behaviour to use.
    pub phase: u8,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Side of the course the vehicle runs on.
///
/// All course constants are written for the left side; right side values are obtained by
/// mirroring along x.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SideMode {
    Left,
    Right,
}

#[derive(Debug, thiserror::Error)]
#[error("Unknown side \"{0}\", expected \"left\" or \"right\"")]
pub struct ParseSideError(String);

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl SideMode {
    /// `+1` on the left side, `-1` on the right.
    ///
    /// Lateral positions reported by the vision collaborator are multiplied by this to get a
    /// position measured away from the side fence.
    pub fn sign(&self) -> f64 {
        match self {
            SideMode::Left => 1.0,
            SideMode::Right => -1.0,
        }
    }

    /// Map a left-side x coordinate onto this side.
    pub fn mirror_x(&self, x: f64) -> f64 {
        match self {
            SideMode::Left => x,
            SideMode::Right => -x,
        }
    }

    /// Map a left-side span `(lo, hi)` along x onto this side, keeping `lo <= hi`.
    pub fn mirror_span(&self, lo: f64, hi: f64) -> (f64, f64) {
        match self {
            SideMode::Left => (lo, hi),
            SideMode::Right => (-hi, -lo),
        }
    }
}

impl fmt::Display for SideMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SideMode::Left => write!(f, "left"),
            SideMode::Right => write!(f, "right"),
        }
    }
}

impl FromStr for SideMode {
    type Err = ParseSideError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "left" | "l" => Ok(SideMode::Left),
            "right" | "r" => Ok(SideMode::Right),
            _ => Err(ParseSideError(s.to_string())),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_mirror() {
        assert_eq!(SideMode::Left.mirror_span(-1.2, -0.1), (-1.2, -0.1));
        assert_eq!(SideMode::Right.mirror_span(-1.2, -0.1), (0.1, 1.2));
        assert_eq!(SideMode::Right.mirror_x(-0.7), 0.7);
        assert_eq!(SideMode::Right.sign(), -1.0);
    }

    #[test]
    fn test_parse() {
        assert_eq!("Left".parse::<SideMode>().unwrap(), SideMode::Left);
        assert_eq!("r".parse::<SideMode>().unwrap(), SideMode::Right);
        assert!("up".parse::<SideMode>().is_err());
    }
}
