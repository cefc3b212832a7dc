//! Reconstruction of serially acquired records into spatial grids.
//!
//! Records arrive in serpentine acquisition order; [`reconstruct`] places
//! them back on a rectangular raster by inverting that ordering with row
//! parity alone: record `i` lands at `row = i / primary_count`,
//! `col = i % primary_count`, and odd rows are reflected
//! (`col = primary_count - 1 - col`). This reflection is coupled one-to-one
//! with the traversal rules in [`crate::path`]; changing either side alone
//! silently mirrors or transposes the output.
//!
//! Failed (sentinel) measurements become NaN cells, so the grids stay
//! rectangular no matter how many points failed. Derived metrics — the
//! global positive and negative peaks and the full-width-half-maximum of
//! the profile through the peak — ignore NaN cells.

use crate::core::{Axis, ScanRecord};
use crate::error::{ScanError, ScanResult};
use serde::Serialize;

/// Geometry of the rectangular raster a scan covered.
///
/// Produced by the scan runner from the plan, consumed here. `*_step_mm`
/// are signed: a negative step means the scan walked that axis downward,
/// and grid indices then map to descending physical coordinates.
#[derive(Clone, Debug, Serialize)]
pub struct GridSpec {
    /// Innermost traversal axis (grid columns).
    pub primary: Axis,
    /// Row axis; `None` for a 1-D scan.
    pub secondary: Option<Axis>,
    /// Number of grid columns.
    pub primary_count: usize,
    /// Number of grid rows (1 for a 1-D scan).
    pub secondary_count: usize,
    /// Signed column pitch in millimetres.
    pub primary_step_mm: f64,
    /// Signed row pitch in millimetres (0 for a 1-D scan).
    pub secondary_step_mm: f64,
    /// Physical coordinates of grid cell (0, 0).
    pub origin: crate::core::Position,
}

impl GridSpec {
    fn cell_count(&self) -> usize {
        self.primary_count * self.secondary_count
    }
}

/// A 1-D or 2-D map of derived values indexed by physical coordinate.
///
/// Values are stored row-major; cell `(row, col)` denotes the same physical
/// location in every grid built from the same [`GridSpec`].
#[derive(Clone, Debug, Serialize)]
pub struct PressureGrid {
    values: Vec<f64>,
    primary_count: usize,
    secondary_count: usize,
    primary_step_mm: f64,
    secondary_step_mm: f64,
}

impl PressureGrid {
    fn filled_nan(spec: &GridSpec) -> Self {
        Self {
            values: vec![f64::NAN; spec.cell_count()],
            primary_count: spec.primary_count,
            secondary_count: spec.secondary_count,
            primary_step_mm: spec.primary_step_mm,
            secondary_step_mm: spec.secondary_step_mm,
        }
    }

    /// Number of rows (secondary-axis cells).
    pub fn rows(&self) -> usize {
        self.secondary_count
    }

    /// Number of columns (primary-axis cells).
    pub fn cols(&self) -> usize {
        self.primary_count
    }

    /// Value at (row, col). NaN marks a failed measurement.
    ///
    /// # Panics
    ///
    /// Panics if `row >= rows()` or `col >= cols()`.
    pub fn get(&self, row: usize, col: usize) -> f64 {
        assert!(
            row < self.secondary_count && col < self.primary_count,
            "cell ({row}, {col}) outside {}x{} grid",
            self.secondary_count,
            self.primary_count
        );
        self.values[row * self.primary_count + col]
    }

    fn set(&mut self, row: usize, col: usize, value: f64) {
        self.values[row * self.primary_count + col] = value;
    }

    /// Offsets (primary, secondary) in millimetres of a cell from the scan
    /// origin.
    pub fn cell_offset_mm(&self, row: usize, col: usize) -> (f64, f64) {
        (
            col as f64 * self.primary_step_mm,
            row as f64 * self.secondary_step_mm,
        )
    }

    /// Descriptive statistics over the finite cells; `None` if every cell
    /// failed.
    pub fn stats(&self) -> Option<GridStats> {
        let finite: Vec<f64> = self.values.iter().copied().filter(|v| !v.is_nan()).collect();
        if finite.is_empty() {
            return None;
        }
        let count = finite.len();
        let min = finite.iter().copied().fold(f64::INFINITY, f64::min);
        let max = finite.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let mean = finite.iter().sum::<f64>() / count as f64;
        let variance = finite.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / count as f64;
        Some(GridStats {
            count,
            min,
            max,
            mean,
            std_dev: variance.sqrt(),
        })
    }

    /// Location and value of the largest finite cell.
    pub fn global_max(&self) -> Option<(usize, usize, f64)> {
        self.extreme(|candidate, best| candidate > best)
    }

    /// Location and value of the smallest finite cell.
    pub fn global_min(&self) -> Option<(usize, usize, f64)> {
        self.extreme(|candidate, best| candidate < best)
    }

    fn extreme(&self, better: impl Fn(f64, f64) -> bool) -> Option<(usize, usize, f64)> {
        let mut best: Option<(usize, usize, f64)> = None;
        for row in 0..self.rows() {
            for col in 0..self.cols() {
                let v = self.get(row, col);
                if v.is_nan() {
                    continue;
                }
                if best.map_or(true, |(_, _, b)| better(v, b)) {
                    best = Some((row, col, v));
                }
            }
        }
        best
    }

    /// Full-width-half-maximum through the cell `(row, col)`, in mm.
    ///
    /// The profile is taken along the longer grid axis through the peak
    /// cell. Crossings of half the peak value are located by linear
    /// interpolation on the two sides nearest the peak; if fewer than two
    /// crossings exist (flat profile, edge-clipped beam, NaN neighbors),
    /// the width is unavailable and `None` is returned.
    pub fn fwhm_mm(&self, row: usize, col: usize) -> Option<f64> {
        let along_cols = self.cols() >= self.rows();
        let (profile, peak_idx, pitch): (Vec<f64>, usize, f64) = if along_cols {
            (
                (0..self.cols()).map(|c| self.get(row, c)).collect(),
                col,
                self.primary_step_mm.abs(),
            )
        } else {
            (
                (0..self.rows()).map(|r| self.get(r, col)).collect(),
                row,
                self.secondary_step_mm.abs(),
            )
        };
        let peak = profile[peak_idx];
        if peak.is_nan() || peak == 0.0 || pitch == 0.0 {
            return None;
        }

        // Work on the profile normalized by the peak so one rule covers
        // positive and negative lobes: 1.0 at the peak, falling toward 0.
        let normalized: Vec<f64> = profile.iter().map(|&v| v / peak).collect();
        let left = half_crossing(&normalized, peak_idx, Side::Left)?;
        let right = half_crossing(&normalized, peak_idx, Side::Right)?;
        Some((right - left) * pitch)
    }
}

enum Side {
    Left,
    Right,
}

/// Fractional index of the half-maximum crossing nearest the peak on one
/// side of a peak-normalized profile.
fn half_crossing(normalized: &[f64], peak_idx: usize, side: Side) -> Option<f64> {
    let indices: Vec<usize> = match side {
        Side::Left => (0..peak_idx).rev().collect(),
        Side::Right => (peak_idx + 1..normalized.len()).collect(),
    };
    let mut inner = peak_idx;
    for idx in indices {
        let v = normalized[idx];
        if v.is_nan() {
            return None;
        }
        if v <= 0.5 {
            let inner_v = normalized[inner];
            let t = (inner_v - 0.5) / (inner_v - v);
            let frac = inner as f64 + t * (idx as f64 - inner as f64);
            return Some(frac);
        }
        inner = idx;
    }
    None
}

/// Descriptive statistics over the finite cells of one grid.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct GridStats {
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std_dev: f64,
}

/// The positive- and negative-peak maps of one scan.
#[derive(Clone, Debug, Serialize)]
pub struct FieldGrids {
    pub positive: PressureGrid,
    pub negative: PressureGrid,
}

/// Summary metrics derived from the grids.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct FieldSummary {
    /// Largest positive-peak cell value.
    pub peak_positive: Option<f64>,
    /// Smallest negative-peak cell value.
    pub peak_negative: Option<f64>,
    /// FWHM of the positive-peak profile through its global peak, mm.
    pub fwhm_mm: Option<f64>,
}

impl FieldGrids {
    pub fn summary(&self) -> FieldSummary {
        let max = self.positive.global_max();
        FieldSummary {
            peak_positive: max.map(|(_, _, v)| v),
            peak_negative: self.negative.global_min().map(|(_, _, v)| v),
            fwhm_mm: max.and_then(|(row, col, _)| self.positive.fwhm_mm(row, col)),
        }
    }
}

/// Rebuild the positive- and negative-peak grids from the ordered record
/// list, undoing the serpentine acquisition order.
///
/// `calibration_v_per_unit` divides the recorded peak voltages, converting
/// them to pressure units; pass 1.0 to keep volts.
pub fn reconstruct(
    records: &[ScanRecord],
    spec: &GridSpec,
    calibration_v_per_unit: f64,
) -> ScanResult<FieldGrids> {
    if !(calibration_v_per_unit > 0.0) {
        return Err(ScanError::Configuration(format!(
            "calibration must be positive, got {calibration_v_per_unit}"
        )));
    }
    if records.len() != spec.cell_count() {
        return Err(ScanError::Processing(format!(
            "{} records cannot fill a {}x{} grid",
            records.len(),
            spec.secondary_count,
            spec.primary_count
        )));
    }

    let mut positive = PressureGrid::filled_nan(spec);
    let mut negative = PressureGrid::filled_nan(spec);

    for (i, record) in records.iter().enumerate() {
        let row = i / spec.primary_count;
        let mut col = i % spec.primary_count;
        if row % 2 == 1 {
            // Odd rows were acquired right-to-left; reflect them back.
            col = spec.primary_count - 1 - col;
        }
        if record.measurement.is_failed() {
            continue; // cell stays NaN
        }
        positive.set(row, col, record.measurement.positive_peak / calibration_v_per_unit);
        negative.set(row, col, record.measurement.negative_peak / calibration_v_per_unit);
    }

    Ok(FieldGrids { positive, negative })
}
