//! # Track locator library.
//!
//! This library holds everything the locator executable is built from, so that the processing
//! chain can be benchmarked and driven from replayed data outside of the executable.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Acquisition loop - aligns every frame and feeds the image processing side after the dune
pub mod acq;

/// Horizontal alignment - rotation bringing the ground plane level
pub mod align;

/// Ground plane tracker - calibration and per frame update of the ground estimate
pub mod ground;

/// Navigation stage machine - turns measurements into drive signals and mission stages
pub mod nav;

/// Navigation loop - runs the stage machine on sensor frames and images
pub mod locator;

/// Executable parameters
pub mod params;

/// Geometric primitives - filters, normals and plane fitting
pub mod per;

/// Frame preprocessing - crops the raw cloud and splits off the near ground
pub mod preproc;

/// ROI segmenter - bounded plane extraction and ROI tracking
pub mod roi;

/// Cross thread synchronisation between the acquisition and navigation loops
pub mod sync;

/// Vertical structure extractor - removes the ground from aligned clouds
pub mod vertical;

#[cfg(test)]
pub(crate) mod test_utils;
