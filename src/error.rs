//! Custom error types for the scanner.
//!
//! This module defines the primary error type, `ScanError`, for the entire
//! application. Using the `thiserror` crate, it provides a centralized and
//! consistent way to handle the different kinds of failures a scan can hit:
//!
//! - **`Config`** wraps parse/format errors from the `config` crate.
//! - **`Configuration`** represents semantic errors in the configuration,
//!   such as values that parse fine but are logically invalid (non-positive
//!   resolution, an axis set that does not match the extents). These are
//!   raised before any hardware interaction and never retried.
//! - **`Io`** wraps standard `std::io::Error` for file output.
//! - **`Instrument`** is the general category for errors originating from
//!   instrument drivers (communication failures, malformed responses).
//! - **`Motion`** marks a commanded move that did not succeed. During the
//!   scan body this aborts only the current point; during teardown moves it
//!   is logged and skipped instead.
//! - **`Processing`** covers data-shape problems during grid reconstruction.
//! - **`Aborted`** carries the cancellation reason together with whatever
//!   records were acquired before the abort, so callers can decide whether
//!   to retain partial results.
//!
//! Ranging exhaustion deliberately does **not** appear here: a measurement
//! that fails to settle yields a sentinel [`crate::core::Measurement`]
//! rather than an error, keeping downstream grids rectangular.

use crate::core::{Axis, ScanRecord};
use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type ScanResult<T> = std::result::Result<T, ScanError>;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Instrument error: {0}")]
    Instrument(String),

    #[error("Move failed on {axis} axis ({distance_mm:+.3} mm)")]
    Motion { axis: Axis, distance_mm: f64 },

    #[error("Data processing error: {0}")]
    Processing(String),

    #[error("Scan aborted: {reason}")]
    Aborted {
        reason: String,
        /// Records acquired before the abort, in acquisition order.
        records: Vec<ScanRecord>,
    },
}

impl ScanError {
    /// Wrap a driver-level error in the instrument category, preserving the
    /// full anyhow context chain in the message.
    pub fn instrument(err: anyhow::Error) -> Self {
        ScanError::Instrument(format!("{err:#}"))
    }
}
