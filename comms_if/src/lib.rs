//! # Communications interface crate.
//!
//! Provides the interfaces between the locator core and the equipment around it: the depth
//! sensor, the image processing collaborator, the viewer, and the navigation signals consumed by
//! the drive system.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Interfaces and data types for equipment (sensor, vision, viewer)
pub mod eqpt;

/// Navigation outputs and course-side definitions
pub mod nav;
