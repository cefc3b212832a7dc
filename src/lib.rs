//! Automated hydrophone field scanner.
//!
//! Moves a hydrophone through a raster of points with a stepper gantry,
//! acquires peak voltages at each point through an auto-ranging digitizer,
//! and reconstructs the serpentine acquisition order back into spatial
//! pressure maps.
//!
//! # Architecture
//!
//! ```text
//! config::Settings -> scan::ScanPlan -> path::generate
//!                                          |
//!        motion::MotionCoordinator <- scan::ScanRunner -> ranging::AutoRanger
//!                |                                              |
//!        core::Positioner                               core::Digitizer
//!        (instruments::gantry)                       (instruments::siglent)
//!                                          |
//!                       grid::reconstruct -> storage::ScanWriter
//! ```
//!
//! Hardware access is isolated behind the [`core::Positioner`] and
//! [`core::Digitizer`] traits; everything above them is deterministic and
//! testable against the simulated instruments in [`instruments::mock`].

pub mod adapters;
pub mod config;
pub mod core;
pub mod error;
pub mod grid;
pub mod instruments;
pub mod motion;
pub mod path;
pub mod ranging;
pub mod scan;
pub mod storage;
