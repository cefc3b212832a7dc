//! Core traits and data types for the scanner.
//!
//! This module defines the foundational abstractions shared by the whole
//! crate: the axis/coordinate vocabulary, the measurement and record types
//! that flow from acquisition into reconstruction and storage, and the two
//! capability traits the scan engine consumes:
//!
//! - [`Positioner`]: a motorized stage that executes relative moves one
//!   axis at a time. No independent position read-back is assumed; the
//!   [`crate::motion::MotionCoordinator`] tracks position by accumulating
//!   commanded deltas.
//! - [`Digitizer`]: a waveform digitizer with a programmable vertical range.
//!   Vendor command sets live entirely behind this trait; the ranging
//!   algorithm never branches on instrument identity.
//!
//! # Data Flow
//!
//! ```text
//! path::generate --[ScanPoint]--> MotionCoordinator --> AutoRanger
//!     --[ScanRecord]--> grid::reconstruct --> storage
//! ```

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// =============================================================================
// Axes and coordinates
// =============================================================================

/// One mechanical axis of the positioner.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    /// All axes in canonical order. Multi-axis moves are commanded in this
    /// order, one axis at a time.
    pub const ALL: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];

    /// Single-letter name used in commands and file headers.
    pub fn letter(&self) -> char {
        match self {
            Axis::X => 'x',
            Axis::Y => 'y',
            Axis::Z => 'z',
        }
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.letter())
    }
}

impl FromStr for Axis {
    type Err = crate::error::ScanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "x" | "X" => Ok(Axis::X),
            "y" | "Y" => Ok(Axis::Y),
            "z" | "Z" => Ok(Axis::Z),
            other => Err(crate::error::ScanError::Configuration(format!(
                "invalid axis '{other}' (expected x, y, or z)"
            ))),
        }
    }
}

/// The ordered set of axes active in a scan.
///
/// The first axis is the primary (innermost traversal loop), the second the
/// secondary row axis, the optional third the outer layer axis. Parsed from
/// the conventional short form: `x`, `y`, `z`, `xy`, `xz`, `yz`, or `xyz`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AxisSet {
    axes: Vec<Axis>,
}

impl AxisSet {
    /// Number of active axes (1 to 3).
    pub fn len(&self) -> usize {
        self.axes.len()
    }

    /// Always false; an `AxisSet` cannot be constructed empty.
    pub fn is_empty(&self) -> bool {
        self.axes.is_empty()
    }

    /// Innermost traversal axis.
    pub fn primary(&self) -> Axis {
        self.axes[0]
    }

    /// Row axis for 2- and 3-axis scans.
    pub fn secondary(&self) -> Option<Axis> {
        self.axes.get(1).copied()
    }

    /// Layer axis for 3-axis scans.
    pub fn tertiary(&self) -> Option<Axis> {
        self.axes.get(2).copied()
    }

    /// Active axes in traversal order.
    pub fn iter(&self) -> impl Iterator<Item = Axis> + '_ {
        self.axes.iter().copied()
    }

    /// True if the given axis participates in the scan.
    pub fn contains(&self, axis: Axis) -> bool {
        self.axes.contains(&axis)
    }
}

impl FromStr for AxisSet {
    type Err = crate::error::ScanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let axes = match s.to_ascii_lowercase().as_str() {
            "x" => vec![Axis::X],
            "y" => vec![Axis::Y],
            "z" => vec![Axis::Z],
            "xy" => vec![Axis::X, Axis::Y],
            "xz" => vec![Axis::X, Axis::Z],
            "yz" => vec![Axis::Y, Axis::Z],
            "xyz" => vec![Axis::X, Axis::Y, Axis::Z],
            other => {
                return Err(crate::error::ScanError::Configuration(format!(
                    "invalid axis combination '{other}' (expected one of x, y, z, xy, xz, yz, xyz)"
                )))
            }
        };
        Ok(AxisSet { axes })
    }
}

impl fmt::Display for AxisSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for axis in &self.axes {
            write!(f, "{axis}")?;
        }
        Ok(())
    }
}

/// Per-axis quantity in millimetres.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Vector3 {
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    #[serde(default)]
    pub z: f64,
}

impl Vector3 {
    pub const ZERO: Vector3 = Vector3 {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Vector3 { x, y, z }
    }

    /// Value along one axis.
    pub fn component(&self, axis: Axis) -> f64 {
        match axis {
            Axis::X => self.x,
            Axis::Y => self.y,
            Axis::Z => self.z,
        }
    }

    /// Mutable value along one axis.
    pub fn component_mut(&mut self, axis: Axis) -> &mut f64 {
        match axis {
            Axis::X => &mut self.x,
            Axis::Y => &mut self.y,
            Axis::Z => &mut self.z,
        }
    }

    /// Copy of this vector shifted along one axis.
    pub fn translated(mut self, axis: Axis, delta: f64) -> Self {
        *self.component_mut(axis) += delta;
        self
    }
}

impl fmt::Display for Vector3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "X={:.3}mm, Y={:.3}mm, Z={:.3}mm",
            self.x, self.y, self.z
        )
    }
}

/// Absolute tracked coordinates of the positioner. Exclusively owned and
/// mutated by the [`crate::motion::MotionCoordinator`].
pub type Position = Vector3;

/// Target coordinates of one scan point, produced in traversal order by
/// [`crate::path::generate`] and immutable once produced.
pub type ScanPoint = Vector3;

// =============================================================================
// Measurements and records
// =============================================================================

/// How a measurement was (or was not) obtained.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AcquisitionMethod {
    /// Peaks derived from a calibrated waveform buffer read.
    Waveform,
    /// Sentinel: the ranging loop exhausted its retry budget or the
    /// digitizer could not be read.
    Failed,
}

impl fmt::Display for AcquisitionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AcquisitionMethod::Waveform => write!(f, "WAVEFORM"),
            AcquisitionMethod::Failed => write!(f, "FAILED"),
        }
    }
}

/// Peak voltages observed at one scan point.
///
/// Immutable once recorded. A failed acquisition is represented by the
/// [`Measurement::failed`] sentinel (NaN peaks, `Failed` method tag) rather
/// than an error, so the record list and the grids built from it stay
/// rectangular.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    /// Maximum of the waveform, volts.
    pub positive_peak: f64,
    /// Minimum of the waveform, volts.
    pub negative_peak: f64,
    /// Vertical range (volts per division) in effect for the read.
    pub range: f64,
    /// How the values were obtained.
    pub method: AcquisitionMethod,
}

impl Measurement {
    /// Build a measurement from a calibrated waveform buffer. Returns `None`
    /// for an empty buffer.
    pub fn from_waveform(samples: &[f64], range: f64) -> Option<Self> {
        let mut iter = samples.iter();
        let first = *iter.next()?;
        let (min, max) = samples
            .iter()
            .fold((first, first), |(lo, hi), &v| (lo.min(v), hi.max(v)));
        Some(Measurement {
            positive_peak: max,
            negative_peak: min,
            range,
            method: AcquisitionMethod::Waveform,
        })
    }

    /// The "measurement unavailable" sentinel.
    pub fn failed(range: f64) -> Self {
        Measurement {
            positive_peak: f64::NAN,
            negative_peak: f64::NAN,
            range,
            method: AcquisitionMethod::Failed,
        }
    }

    pub fn is_failed(&self) -> bool {
        self.method == AcquisitionMethod::Failed
    }

    /// Peak-to-peak amplitude in volts (NaN for the sentinel).
    pub fn peak_to_peak(&self) -> f64 {
        self.positive_peak - self.negative_peak
    }
}

/// One acquired point: target position plus measurement, appended in
/// acquisition order. The ordered record list is the sole input to grid
/// reconstruction.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScanRecord {
    /// Zero-based acquisition index.
    pub index: usize,
    /// Commanded target coordinates for this point.
    pub position: ScanPoint,
    pub measurement: Measurement,
    pub timestamp: DateTime<Utc>,
}

// =============================================================================
// Capability traits
// =============================================================================

/// A motorized positioner that executes relative moves.
///
/// `Ok(true)` means the move completed; `Ok(false)` means the hardware
/// refused it (e.g. a limit switch); `Err` means the command could not be
/// exchanged at all. There is no position query: callers track position by
/// accumulating commanded deltas.
#[async_trait]
pub trait Positioner: Send {
    /// Move one axis by a signed distance in millimetres, blocking until the
    /// hardware acknowledges completion.
    async fn move_axis(&mut self, axis: Axis, distance_mm: f64) -> Result<bool>;

    /// Release the hardware at end of session. Default: nothing to release.
    async fn shutdown(&mut self) -> Result<()> {
        Ok(())
    }
}

/// A waveform digitizer with a programmable vertical range.
#[async_trait]
pub trait Digitizer: Send {
    /// Program the vertical range in volts per division.
    async fn set_range(&mut self, volts_per_div: f64) -> Result<()>;

    /// Read one calibrated waveform buffer, in volts.
    async fn read_waveform(&mut self) -> Result<Vec<f64>>;

    /// Query a named instrument setting (e.g. `vdiv`, `offset`).
    async fn query(&mut self, setting: &str) -> Result<String>;
}
