//! # Image processing collaborator interface
//!
//! From the dune crossing onward the locator stops segmenting the cloud itself and relies on 2D
//! detections (fence lines, corners, ropes) made on the color image. The collaborator runs its
//! detectors when asked, exposes the results through [`Detections`], and converts detections
//! into metric quantities using the frame alignment published by the locator.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::cloud::FrameAlignment;
use crate::nav::SideMode;

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// Image based feature detection.
pub trait Vision: Send {
    /// Grab and preprocess the latest color image, must be called before any `find_*` routine.
    fn img_process(&mut self) -> Result<(), VisionError>;

    /// Look for the fence running across the image.
    fn find_horizontal_hough_line(&mut self, search: LineSearch) -> Result<(), VisionError>;

    /// Look for the fence running along the direction of travel.
    fn find_vertical_hough_line(&mut self, search: LineSearch) -> Result<(), VisionError>;

    /// Look for the corner where the side fence meets the front fence.
    fn find_fence_corner(
        &mut self,
        orientation: FenceOrientation,
        side: SideMode,
    ) -> Result<(), VisionError>;

    /// Look for the end of the ground line under the mountain.
    fn find_line_end(&mut self) -> Result<(), VisionError>;

    /// Look for the crossing point of the two detected ground lines.
    fn find_hough_line_cross(&mut self) -> Result<(), VisionError>;

    /// Classify the current part of the mountain climb (1 to 3).
    fn climbing_stage(&mut self) -> Result<u8, VisionError>;

    /// Estimate the vehicle yaw relative to a fence from two points on its detected line,
    /// radians.
    ///
    /// Also refreshes the lateral position estimate in [`Detections::now_x_pos_mm`].
    fn yaw_angle(
        &mut self,
        p1: Pixel,
        p2: Pixel,
        orientation: FenceOrientation,
        alignment: &FrameAlignment,
    ) -> Option<f64>;

    /// Forward distance to the world point seen at the given pixel, in the aligned frame,
    /// millimeters.
    fn depth_mm(&self, pixel: Pixel, alignment: &FrameAlignment) -> Option<f64>;

    /// Results of the most recent detection calls.
    fn detections(&self) -> &Detections;
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Image coordinates, pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Pixel {
    pub u: i32,
    pub v: i32,
}

/// Features found by the detection routines.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Detections {
    /// End points of the main detected fence line.
    pub line_pt1: Option<Pixel>,
    pub line_pt2: Option<Pixel>,

    /// Sample points along the main detected line.
    pub line_points: Vec<Pixel>,

    pub fence_corner: Option<Pixel>,

    /// Centre of the second rope of the grassland.
    pub rope_center: Option<Pixel>,

    pub line_cross: Option<Pixel>,

    pub line_end: Option<Pixel>,

    /// Lateral position of the vehicle relative to the tracked line, millimeters, positive
    /// to the right of the sensor.
    pub now_x_pos_mm: f64,

    /// Whether the last line search succeeded.
    pub line_found: bool,

    /// Number of lines kept after filtering by the last search.
    pub filtered_lines: usize,
}

/// A vision collaborator replaying scripted detections, one entry per `img_process` call.
///
/// Depths are looked up by exact pixel match in the current frame.
#[derive(Debug, Clone, Default)]
pub struct ScriptedVision {
    frames: Vec<ScriptedFrame>,
    next: usize,
    current: Detections,
    current_depths: Vec<(Pixel, f64)>,
    current_stage: u8,
    yaw_calls: usize,
}

/// One scripted frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScriptedFrame {
    pub detections: Detections,

    #[serde(default)]
    pub depths: Vec<(Pixel, f64)>,

    #[serde(default)]
    pub climbing_stage: u8,
}

/// Placeholder used when no image processing is available, every call fails.
#[derive(Debug, Clone, Default)]
pub struct NullVision {
    detections: Detections,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Orientation of a fence in the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FenceOrientation {
    Horizontal,
    Vertical,
}

/// Search window of the Hough line detectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LineSearch {
    /// Detector defaults.
    Default,

    /// Whole image, used when the fence distance is unknown or out of the expected band.
    Wide,

    /// Window around the expected fence position.
    Narrow,
}

#[derive(Debug, Error)]
pub enum VisionError {
    #[error("No image available")]
    NoImage,

    #[error("Feature not found: {0}")]
    NotFound(&'static str),

    #[error("Vision device error: {0}")]
    Device(String),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Pixel {
    pub fn new(u: i32, v: i32) -> Self {
        Self { u, v }
    }
}

impl ScriptedVision {
    pub fn new(frames: Vec<ScriptedFrame>) -> Self {
        Self {
            frames,
            ..Default::default()
        }
    }

    /// Number of `yaw_angle` calls served so far.
    pub fn yaw_calls(&self) -> usize {
        self.yaw_calls
    }
}

impl Vision for ScriptedVision {
    fn img_process(&mut self) -> Result<(), VisionError> {
        let frame = self.frames.get(self.next).ok_or(VisionError::NoImage)?;

        self.current = frame.detections.clone();
        self.current_depths = frame.depths.clone();
        self.current_stage = frame.climbing_stage;
        self.next += 1;

        Ok(())
    }

    fn find_horizontal_hough_line(&mut self, _search: LineSearch) -> Result<(), VisionError> {
        Ok(())
    }

    fn find_vertical_hough_line(&mut self, _search: LineSearch) -> Result<(), VisionError> {
        Ok(())
    }

    fn find_fence_corner(
        &mut self,
        _orientation: FenceOrientation,
        _side: SideMode,
    ) -> Result<(), VisionError> {
        Ok(())
    }

    fn find_line_end(&mut self) -> Result<(), VisionError> {
        Ok(())
    }

    fn find_hough_line_cross(&mut self) -> Result<(), VisionError> {
        Ok(())
    }

    fn climbing_stage(&mut self) -> Result<u8, VisionError> {
        Ok(self.current_stage)
    }

    fn yaw_angle(
        &mut self,
        p1: Pixel,
        p2: Pixel,
        _orientation: FenceOrientation,
        _alignment: &FrameAlignment,
    ) -> Option<f64> {
        self.yaw_calls += 1;
        let du = (p2.u - p1.u) as f64;
        let dv = (p2.v - p1.v) as f64;
        if du == 0.0 && dv == 0.0 {
            None
        } else {
            Some(dv.atan2(du))
        }
    }

    fn depth_mm(&self, pixel: Pixel, _alignment: &FrameAlignment) -> Option<f64> {
        self.current_depths
            .iter()
            .find(|(p, _)| *p == pixel)
            .map(|(_, d)| *d)
    }

    fn detections(&self) -> &Detections {
        &self.current
    }
}

impl Vision for NullVision {
    fn img_process(&mut self) -> Result<(), VisionError> {
        Err(VisionError::NoImage)
    }

    fn find_horizontal_hough_line(&mut self, _search: LineSearch) -> Result<(), VisionError> {
        Err(VisionError::NoImage)
    }

    fn find_vertical_hough_line(&mut self, _search: LineSearch) -> Result<(), VisionError> {
        Err(VisionError::NoImage)
    }

    fn find_fence_corner(
        &mut self,
        _orientation: FenceOrientation,
        _side: SideMode,
    ) -> Result<(), VisionError> {
        Err(VisionError::NoImage)
    }

    fn find_line_end(&mut self) -> Result<(), VisionError> {
        Err(VisionError::NoImage)
    }

    fn find_hough_line_cross(&mut self) -> Result<(), VisionError> {
        Err(VisionError::NoImage)
    }

    fn climbing_stage(&mut self) -> Result<u8, VisionError> {
        Err(VisionError::NoImage)
    }

    fn yaw_angle(
        &mut self,
        _p1: Pixel,
        _p2: Pixel,
        _orientation: FenceOrientation,
        _alignment: &FrameAlignment,
    ) -> Option<f64> {
        None
    }

    fn depth_mm(&self, _pixel: Pixel, _alignment: &FrameAlignment) -> Option<f64> {
        None
    }

    fn detections(&self) -> &Detections {
        &self.detections
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::eqpt::cloud::PlaneModel;
    use nalgebra::Rotation3;

    #[test]
    fn test_scripted_vision() {
        let corner = Pixel::new(320, 200);
        let mut vision = ScriptedVision::new(vec![ScriptedFrame {
            detections: Detections {
                fence_corner: Some(corner),
                now_x_pos_mm: 120.0,
                ..Default::default()
            },
            depths: vec![(corner, 750.0)],
            climbing_stage: 2,
        }]);
        let align = FrameAlignment::new(Rotation3::identity(), PlaneModel::new(0., 1., 0., -0.3));

        vision.img_process().unwrap();
        assert_eq!(vision.detections().fence_corner, Some(corner));
        assert_eq!(vision.depth_mm(corner, &align), Some(750.0));
        assert_eq!(vision.depth_mm(Pixel::new(0, 0), &align), None);
        assert_eq!(vision.climbing_stage().unwrap(), 2);

        assert!(vision.img_process().is_err());
    }
}
