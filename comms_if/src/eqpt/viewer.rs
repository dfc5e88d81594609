//! # Viewer interface
//!
//! The viewer only observes the locator, nothing is ever read back from it apart from whether the
//! operator closed it.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use super::cloud::PointCloud;

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

pub trait Viewer: Send {
    /// Display the near-ground cloud and the colored destination cloud of the current frame.
    fn show(&mut self, ground: &PointCloud, dst: &PointCloud);

    /// True once the operator has closed the viewer, which ends the run.
    fn was_stopped(&self) -> bool {
        false
    }
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A viewer that drops every frame.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullViewer;

/// A viewer that keeps the size of the last clouds it was shown.
#[derive(Debug, Default, Clone, Copy)]
pub struct CountingViewer {
    pub frames: usize,
    pub last_ground_len: usize,
    pub last_dst_len: usize,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Viewer for NullViewer {
    fn show(&mut self, _ground: &PointCloud, _dst: &PointCloud) {}
}

impl Viewer for CountingViewer {
    fn show(&mut self, ground: &PointCloud, dst: &PointCloud) {
        self.frames += 1;
        self.last_ground_len = ground.len();
        self.last_dst_len = dst.len();
    }
}
