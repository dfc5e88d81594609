//! # Equipment Interface
//!
//! This module defines the data exchanged with the equipment surrounding the locator core, and
//! the traits that equipment drivers implement.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

pub mod cloud;
pub mod sensor;
pub mod viewer;
pub mod vision;
