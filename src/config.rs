//! Layered configuration loading and validation.
//!
//! Settings come from three layers, later layers overriding earlier ones:
//!
//! 1. `config/default.toml` shipped alongside the binary;
//! 2. an optional operator-supplied TOML file (`--config`);
//! 3. environment variables prefixed `HYDROSCAN_` (e.g.
//!    `HYDROSCAN_SCAN__RESOLUTION_MM=0.25`, with `__` separating sections).
//!
//! [`Settings::validate`] runs after loading and before any hardware is
//! touched; every rejected field names the value it saw.

use crate::core::{Axis, AxisSet, Vector3};
use crate::error::{ScanError, ScanResult};
use crate::ranging::{RangingConfig, RANGE_LADDER};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level settings tree.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Settings {
    pub hardware: HardwareSettings,
    pub scan: ScanSettings,
    #[serde(default)]
    pub ranging: RangingSettings,
}

/// Instrument endpoints and the one mechanical calibration constant.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HardwareSettings {
    /// Serial device of the gantry controller, e.g. `/dev/ttyACM0`.
    pub gantry_port: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// VISA-style address or serial device of the digitizer.
    pub scope_address: String,
    /// Motor steps per millimetre of travel, identical on all axes.
    pub steps_per_mm: f64,
}

/// Geometry and timing of a scan.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScanSettings {
    /// Active axes in traversal order: `x`, `y`, `z`, `xy`, `xz`, `yz`, `xyz`.
    pub axes: String,
    /// Signed scan extent per axis in millimetres. Axes not named in `axes`
    /// must be zero.
    pub extents: Vector3,
    /// Spatial step between scan points, millimetres.
    pub resolution_mm: f64,
    /// Hydrophone sensitivity, volts per megapascal. Divides recorded peak
    /// voltages during grid reconstruction; use 1.0 to keep volts.
    #[serde(default = "default_calibration")]
    pub calibration_v_per_mpa: f64,
    /// Pause after arriving at a point before acquisition, milliseconds.
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
    /// Treat the starting position as the centre of the scan volume rather
    /// than its corner.
    #[serde(default)]
    pub center_on_start: bool,
    /// Directory under which each scan creates its timestamped output dir.
    #[serde(default = "default_base_path")]
    pub base_path: PathBuf,
}

/// Auto-ranging tunables. All fields default sensibly; the section may be
/// omitted entirely.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RangingSettings {
    #[serde(default = "default_initial_range")]
    pub initial_range_v: f64,
    #[serde(default = "default_range_min")]
    pub range_min_v: f64,
    #[serde(default = "default_range_max")]
    pub range_max_v: f64,
    #[serde(default = "default_noise_floor")]
    pub noise_floor_v: f64,
    #[serde(default = "default_ranging_settle_ms")]
    pub settle_ms: u64,
}

fn default_baud_rate() -> u32 {
    115_200
}
fn default_calibration() -> f64 {
    1.0
}
fn default_settle_ms() -> u64 {
    100
}
fn default_base_path() -> PathBuf {
    PathBuf::from("scans")
}
fn default_initial_range() -> f64 {
    1.0
}
fn default_range_min() -> f64 {
    RANGE_LADDER[0]
}
fn default_range_max() -> f64 {
    RANGE_LADDER[RANGE_LADDER.len() - 1]
}
fn default_noise_floor() -> f64 {
    0.002
}
fn default_ranging_settle_ms() -> u64 {
    500
}

impl Default for RangingSettings {
    fn default() -> Self {
        Self {
            initial_range_v: default_initial_range(),
            range_min_v: default_range_min(),
            range_max_v: default_range_max(),
            noise_floor_v: default_noise_floor(),
            settle_ms: default_ranging_settle_ms(),
        }
    }
}

impl Settings {
    /// Load the layered configuration. `override_path` is the operator's
    /// `--config` file, applied on top of `config/default.toml` when given.
    pub fn load(override_path: Option<&Path>) -> ScanResult<Self> {
        let mut builder = Config::builder()
            .add_source(File::with_name("config/default").format(FileFormat::Toml).required(false));
        if let Some(path) = override_path {
            builder = builder.add_source(
                File::from(path).format(FileFormat::Toml).required(true),
            );
        }
        let settings: Settings = builder
            .add_source(Environment::with_prefix("HYDROSCAN").separator("__"))
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Parse a settings tree from a TOML string. Used by tests and by
    /// embedded defaults; applies the same validation as [`Self::load`].
    pub fn from_toml(toml: &str) -> ScanResult<Self> {
        let settings: Settings = Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject physically meaningless values before any hardware is touched.
    pub fn validate(&self) -> ScanResult<()> {
        let axes = self.axis_set()?;

        if !(self.scan.resolution_mm > 0.0) {
            return Err(ScanError::Configuration(format!(
                "scan.resolution_mm must be positive, got {}",
                self.scan.resolution_mm
            )));
        }
        if !(self.scan.calibration_v_per_mpa > 0.0) {
            return Err(ScanError::Configuration(format!(
                "scan.calibration_v_per_mpa must be positive, got {}",
                self.scan.calibration_v_per_mpa
            )));
        }
        if !(self.hardware.steps_per_mm > 0.0) {
            return Err(ScanError::Configuration(format!(
                "hardware.steps_per_mm must be positive, got {}",
                self.hardware.steps_per_mm
            )));
        }

        if self.scan.base_path.as_os_str().is_empty() {
            return Err(ScanError::Configuration(
                "scan.base_path must not be empty".into(),
            ));
        }

        for axis in Axis::ALL {
            let extent = self.scan.extents.component(axis);
            if axes.contains(axis) {
                if extent == 0.0 {
                    return Err(ScanError::Configuration(format!(
                        "axis {axis} is scanned but scan.extents.{axis} is zero"
                    )));
                }
                if extent.abs() < self.scan.resolution_mm {
                    return Err(ScanError::Configuration(format!(
                        "scan.extents.{axis} ({extent} mm) is smaller than one \
                         resolution step ({} mm)",
                        self.scan.resolution_mm
                    )));
                }
            } else if extent != 0.0 {
                return Err(ScanError::Configuration(format!(
                    "scan.extents.{axis} is {extent} but axis {axis} is not in \
                     scan.axes '{}'",
                    self.scan.axes
                )));
            }
        }

        let r = &self.ranging;
        if !(r.range_min_v > 0.0) || r.range_max_v < r.range_min_v {
            return Err(ScanError::Configuration(format!(
                "ranging bounds invalid: min {} V/div, max {} V/div",
                r.range_min_v, r.range_max_v
            )));
        }
        if !(r.initial_range_v >= r.range_min_v && r.initial_range_v <= r.range_max_v) {
            return Err(ScanError::Configuration(format!(
                "ranging.initial_range_v {} outside [{}, {}]",
                r.initial_range_v, r.range_min_v, r.range_max_v
            )));
        }
        if r.noise_floor_v < 0.0 {
            return Err(ScanError::Configuration(format!(
                "ranging.noise_floor_v must be non-negative, got {}",
                r.noise_floor_v
            )));
        }
        Ok(())
    }

    /// The parsed axis set.
    pub fn axis_set(&self) -> ScanResult<AxisSet> {
        self.scan.axes.parse()
    }

    /// Settle delay after each move.
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.scan.settle_ms)
    }

    /// Ranging tunables in the controller's terms.
    pub fn ranging_config(&self) -> RangingConfig {
        RangingConfig {
            initial_range: self.ranging.initial_range_v,
            range_min: self.ranging.range_min_v,
            range_max: self.ranging.range_max_v,
            noise_floor_v: self.ranging.noise_floor_v,
            settle: Duration::from_millis(self.ranging.settle_ms),
        }
    }
}
