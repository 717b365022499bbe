//! # wp-types
//!
//! Shared data model for Waypoint: the trial life-cycle, the run record and
//! its query surface, and the error taxonomy used across the workspace.

pub mod errors;
pub mod record;
pub mod trial;

pub use errors::*;
pub use record::*;
pub use trial::*;
