//! Image processing side of the vision driven stages

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::time::Duration;

use comms_if::{
    eqpt::{
        cloud::FrameAlignment,
        vision::{Detections, FenceOrientation, LineSearch, Pixel, Vision, VisionError},
    },
    nav::SideMode,
};
use log::{debug, trace};

use crate::sync::{Shared, SyncError};

use super::{FrameAbort, NavError, StageMemory};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Access to the collaborator and to the alignments published by the acquisition loop.
pub(crate) struct VisionIo<'a> {
    vision: &'a mut dyn Vision,
    shared: &'a Shared,
    side: SideMode,
    timeout: Option<Duration>,
}

/// One processed image.
#[derive(Debug, Clone)]
pub(crate) struct VisionFrame {
    /// Alignment the detections were measured with.
    pub alignment: FrameAlignment,

    /// Detections, read after the yaw estimate refreshed the lateral position.
    pub detections: Detections,

    /// Climb phase reported by the collaborator, only for [`Detect::ClimbingLineCross`].
    pub climb_stage: Option<u8>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Detection routine run on an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Detect {
    Nothing,
    HorizontalLine(LineSearch),
    VerticalLine(LineSearch),
    FenceCorner(FenceOrientation),
    LineEnd,
    LineCross,

    /// Climb phase classification followed by the line cross search.
    ClimbingLineCross,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl<'a> VisionIo<'a> {
    pub fn new(
        vision: &'a mut dyn Vision,
        shared: &'a Shared,
        side: SideMode,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            vision,
            shared,
            side,
            timeout,
        }
    }

    /// Process the next image.
    ///
    /// The alignment of the frame is always consumed, even if the detection failed, so that the
    /// acquisition loop can go on publishing. The yaw relative to the fence of the given
    /// orientation is estimated whenever the detected line has both end points.
    pub fn process(
        &mut self,
        memory: &mut StageMemory,
        detect: Detect,
        orientation: FenceOrientation,
    ) -> Result<VisionFrame, NavError> {
        self.shared.request_frame()?;

        let detection = self.detect(detect);
        let alignment = self.alignment(memory)?;
        let climb_stage = detection?;

        let d = self.vision.detections();
        if let (Some(p1), Some(p2)) = (d.line_pt1, d.line_pt2) {
            let yaw = self.vision.yaw_angle(p1, p2, orientation, &alignment);
            trace!("Yaw to the {:?} fence: {:?}", orientation, yaw);
        }

        Ok(VisionFrame {
            alignment,
            detections: self.vision.detections().clone(),
            climb_stage,
        })
    }

    /// Depth of a detected feature, millimeters.
    pub fn depth(
        &self,
        pixel: Option<Pixel>,
        what: &'static str,
        alignment: &FrameAlignment,
    ) -> Result<f64, NavError> {
        let pixel = pixel.ok_or(FrameAbort::MissingDetection(what))?;

        match self.vision.depth_mm(pixel, alignment) {
            Some(d) if d.is_finite() => Ok(d),
            _ => Err(FrameAbort::MissingDepth(what).into()),
        }
    }

    /// Mean depth over the points of the detected line, `None` if none of them has a depth.
    pub fn mean_line_depth(&self, frame: &VisionFrame) -> Option<f64> {
        let depths: Vec<f64> = frame
            .detections
            .line_points
            .iter()
            .filter_map(|p| self.vision.depth_mm(*p, &frame.alignment))
            .filter(|d| d.is_finite())
            .collect();

        if depths.is_empty() {
            None
        } else {
            Some(depths.iter().sum::<f64>() / depths.len() as f64)
        }
    }

    fn detect(&mut self, detect: Detect) -> Result<Option<u8>, VisionError> {
        self.vision.img_process()?;

        match detect {
            Detect::Nothing => (),
            Detect::HorizontalLine(search) => self.vision.find_horizontal_hough_line(search)?,
            Detect::VerticalLine(search) => self.vision.find_vertical_hough_line(search)?,
            Detect::FenceCorner(orientation) => {
                self.vision.find_fence_corner(orientation, self.side)?
            }
            Detect::LineEnd => self.vision.find_line_end()?,
            Detect::LineCross => self.vision.find_hough_line_cross()?,
            Detect::ClimbingLineCross => {
                let stage = self.vision.climbing_stage()?;
                self.vision.find_hough_line_cross()?;
                return Ok(Some(stage));
            }
        }

        Ok(None)
    }

    /// Wait for the next rotation and pair it with the ground it was computed from.
    fn alignment(&mut self, memory: &mut StageMemory) -> Result<FrameAlignment, NavError> {
        let rotation = match self.shared.rotations.take(self.timeout) {
            Ok(r) => r,
            Err(SyncError::Timeout(what)) => return Err(FrameAbort::HandoffTimeout(what).into()),
            Err(e) => return Err(e.into()),
        };

        let ground = match self.shared.grounds.try_take()? {
            Some(g) => {
                memory.last_ground = Some(g);
                g
            }
            None => {
                debug!("No ground published with the rotation, using the last one");
                memory.last_ground.unwrap_or_default()
            }
        };

        Ok(FrameAlignment::new(rotation, ground))
    }
}
