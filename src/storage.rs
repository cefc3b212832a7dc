//! On-disk persistence of scan results.
//!
//! Each scan gets its own timestamped directory under the configured base
//! path:
//!
//! ```text
//! scans/scan_20260830_141503/
//!   scan_config.json    scan parameters and timing
//!   scan_data.csv       one row per point in acquisition order
//!   positive_grid.csv   reconstructed positive-peak map (1/2-axis scans)
//!   negative_grid.csv   reconstructed negative-peak map
//!   scan_summary.txt    human-readable stats
//! ```
//!
//! Failed points appear in `scan_data.csv` with empty voltage fields and
//! the `FAILED` method tag, and as empty cells in the grid files. Partial
//! results from an aborted scan are persisted through the same writer so
//! no acquired data is ever dropped.

use crate::core::ScanRecord;
use crate::error::ScanResult;
use crate::grid::PressureGrid;
use crate::scan::{ScanMetadata, ScanOutcome};
use chrono::Utc;
use log::info;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Writes one scan's files into its timestamped directory.
pub struct ScanWriter {
    dir: PathBuf,
}

impl ScanWriter {
    /// Create the output directory `base/scan_<timestamp>/`.
    pub fn create(base: &Path) -> ScanResult<Self> {
        let dir = base.join(format!("scan_{}", Utc::now().format("%Y%m%d_%H%M%S")));
        fs::create_dir_all(&dir)?;
        info!("writing scan output to {}", dir.display());
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Persist a completed scan: config, data, grids, summary.
    pub fn write_outcome(&self, outcome: &ScanOutcome) -> ScanResult<()> {
        self.write_metadata(&outcome.metadata)?;
        self.write_records(&outcome.records)?;
        if let Some(grids) = &outcome.grids {
            self.write_grid("positive_grid.csv", &grids.positive)?;
            self.write_grid("negative_grid.csv", &grids.negative)?;
        }
        self.write_summary(outcome)?;
        Ok(())
    }

    /// Persist what an aborted scan managed to acquire.
    pub fn write_partial(&self, records: &[ScanRecord], reason: &str) -> ScanResult<()> {
        self.write_records(records)?;
        let mut file = fs::File::create(self.dir.join("scan_summary.txt"))?;
        writeln!(file, "SCAN ABORTED: {reason}")?;
        writeln!(file, "points acquired before abort: {}", records.len())?;
        Ok(())
    }

    fn write_metadata(&self, metadata: &ScanMetadata) -> ScanResult<()> {
        let file = fs::File::create(self.dir.join("scan_config.json"))?;
        serde_json::to_writer_pretty(file, metadata)
            .map_err(|e| crate::error::ScanError::Processing(e.to_string()))?;
        Ok(())
    }

    fn write_records(&self, records: &[ScanRecord]) -> ScanResult<()> {
        let mut writer = csv::Writer::from_path(self.dir.join("scan_data.csv"))
            .map_err(csv_error)?;
        writer
            .write_record([
                "point_num",
                "x_mm",
                "y_mm",
                "z_mm",
                "positive_peak_v",
                "negative_peak_v",
                "peak_to_peak_v",
                "method",
                "timestamp",
            ])
            .map_err(csv_error)?;

        for record in records {
            let m = &record.measurement;
            let (pos, neg, pkpk) = if m.is_failed() {
                (String::new(), String::new(), String::new())
            } else {
                (
                    format!("{:.6}", m.positive_peak),
                    format!("{:.6}", m.negative_peak),
                    format!("{:.6}", m.peak_to_peak()),
                )
            };
            writer
                .write_record([
                    record.index.to_string(),
                    format!("{:.3}", record.position.x),
                    format!("{:.3}", record.position.y),
                    format!("{:.3}", record.position.z),
                    pos,
                    neg,
                    pkpk,
                    m.method.to_string(),
                    record.timestamp.to_rfc3339(),
                ])
                .map_err(csv_error)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// One CSV row per grid row, primary axis across the columns. Failed
    /// cells are left empty.
    fn write_grid(&self, name: &str, grid: &PressureGrid) -> ScanResult<()> {
        let mut writer =
            csv::Writer::from_path(self.dir.join(name)).map_err(csv_error)?;
        for row in 0..grid.rows() {
            let cells: Vec<String> = (0..grid.cols())
                .map(|col| {
                    let v = grid.get(row, col);
                    if v.is_nan() {
                        String::new()
                    } else {
                        format!("{v:.6}")
                    }
                })
                .collect();
            writer.write_record(&cells).map_err(csv_error)?;
        }
        writer.flush()?;
        Ok(())
    }

    fn write_summary(&self, outcome: &ScanOutcome) -> ScanResult<()> {
        let m = &outcome.metadata;
        let mut file = fs::File::create(self.dir.join("scan_summary.txt"))?;
        writeln!(file, "axes:            {}", m.axes)?;
        writeln!(
            file,
            "extents:         {} @ {} mm",
            m.extents_mm, m.resolution_mm
        )?;
        writeln!(file, "origin:          {}", m.origin)?;
        writeln!(file, "points:          {}", m.total_points)?;
        writeln!(file, "failed points:   {}", m.failed_points)?;
        writeln!(file, "started:         {}", m.started.to_rfc3339())?;
        writeln!(file, "finished:        {}", m.finished.to_rfc3339())?;
        writeln!(
            file,
            "duration:        {:.1} s",
            (m.finished - m.started).num_milliseconds() as f64 / 1000.0
        )?;

        if let Some(grids) = &outcome.grids {
            let summary = grids.summary();
            match summary.peak_positive {
                Some(v) => writeln!(file, "peak positive:   {v:.6}")?,
                None => writeln!(file, "peak positive:   unavailable")?,
            }
            match summary.peak_negative {
                Some(v) => writeln!(file, "peak negative:   {v:.6}")?,
                None => writeln!(file, "peak negative:   unavailable")?,
            }
            match summary.fwhm_mm {
                Some(v) => writeln!(file, "fwhm:            {v:.3} mm")?,
                None => writeln!(file, "fwhm:            unavailable")?,
            }
            write_stats(&mut file, "positive", grids.positive.stats())?;
            write_stats(&mut file, "negative", grids.negative.stats())?;
        }
        Ok(())
    }
}

fn write_stats(
    file: &mut fs::File,
    label: &str,
    stats: Option<crate::grid::GridStats>,
) -> ScanResult<()> {
    match stats {
        Some(s) => writeln!(
            file,
            "{label} peaks:  n={} min={:.6} max={:.6} mean={:.6} std={:.6}",
            s.count, s.min, s.max, s.mean, s.std_dev
        )?,
        None => writeln!(file, "{label} peaks:  no valid cells")?,
    }
    Ok(())
}

fn csv_error(err: csv::Error) -> crate::error::ScanError {
    crate::error::ScanError::Processing(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Axis, Measurement, ScanPoint, Vector3};
    use crate::grid::{self, GridSpec};
    use crate::scan::ScanMetadata;
    use chrono::Utc;
    use tempfile::tempdir;

    fn record(index: usize, value: f64) -> ScanRecord {
        ScanRecord {
            index,
            position: ScanPoint::new(index as f64, 0.0, 0.0),
            measurement: Measurement {
                positive_peak: value,
                negative_peak: -value,
                range: 1.0,
                method: crate::core::AcquisitionMethod::Waveform,
            },
            timestamp: Utc::now(),
        }
    }

    fn outcome() -> ScanOutcome {
        let mut records: Vec<ScanRecord> = (0..4).map(|i| record(i, 1.0 + i as f64)).collect();
        records[2].measurement = Measurement::failed(1.0);
        let spec = GridSpec {
            primary: Axis::X,
            secondary: Some(Axis::Y),
            primary_count: 2,
            secondary_count: 2,
            primary_step_mm: 1.0,
            secondary_step_mm: 1.0,
            origin: ScanPoint::ZERO,
        };
        let grids = grid::reconstruct(&records, &spec, 1.0).unwrap();
        let now = Utc::now();
        ScanOutcome {
            records,
            grids: Some(grids),
            metadata: ScanMetadata {
                started: now,
                finished: now,
                axes: "xy".into(),
                extents_mm: Vector3::new(1.0, 1.0, 0.0),
                resolution_mm: 1.0,
                origin: ScanPoint::ZERO,
                calibration_v_per_mpa: 1.0,
                total_points: 4,
                failed_points: 1,
            },
        }
    }

    #[test]
    fn test_writer_creates_timestamped_dir() {
        let base = tempdir().unwrap();
        let writer = ScanWriter::create(base.path()).unwrap();
        assert!(writer.dir().is_dir());
        assert!(writer
            .dir()
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("scan_"));
    }

    #[test]
    fn test_outcome_files_written() {
        let base = tempdir().unwrap();
        let writer = ScanWriter::create(base.path()).unwrap();
        writer.write_outcome(&outcome()).unwrap();

        for name in [
            "scan_config.json",
            "scan_data.csv",
            "positive_grid.csv",
            "negative_grid.csv",
            "scan_summary.txt",
        ] {
            assert!(writer.dir().join(name).is_file(), "{name} missing");
        }
    }

    #[test]
    fn test_data_csv_rows_and_failed_fields() {
        let base = tempdir().unwrap();
        let writer = ScanWriter::create(base.path()).unwrap();
        writer.write_outcome(&outcome()).unwrap();

        let data = fs::read_to_string(writer.dir().join("scan_data.csv")).unwrap();
        let lines: Vec<&str> = data.lines().collect();
        assert_eq!(lines.len(), 5); // header + 4 points
        assert!(lines[0].starts_with("point_num,x_mm,y_mm,z_mm,positive_peak_v"));
        // The failed point keeps its row but has empty voltage fields.
        assert!(lines[3].contains(",,,FAILED,"));
        assert!(lines[1].contains("1.000000"));
    }

    #[test]
    fn test_grid_csv_shape_and_empty_failed_cell() {
        let base = tempdir().unwrap();
        let writer = ScanWriter::create(base.path()).unwrap();
        writer.write_outcome(&outcome()).unwrap();

        let grid = fs::read_to_string(writer.dir().join("positive_grid.csv")).unwrap();
        let lines: Vec<&str> = grid.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].split(',').count(), 2);
        // Record 2 sits on the reflected odd row; one cell is empty.
        let empties = grid
            .lines()
            .flat_map(|l| l.split(','))
            .filter(|c| c.is_empty())
            .count();
        assert_eq!(empties, 1);
    }

    #[test]
    fn test_summary_mentions_stats() {
        let base = tempdir().unwrap();
        let writer = ScanWriter::create(base.path()).unwrap();
        writer.write_outcome(&outcome()).unwrap();

        let summary = fs::read_to_string(writer.dir().join("scan_summary.txt")).unwrap();
        assert!(summary.contains("points:          4"));
        assert!(summary.contains("failed points:   1"));
        assert!(summary.contains("peak positive:   4.000000"));
        assert!(summary.contains("positive peaks:  n=3"));
        assert!(summary.contains("negative peaks:  n=3"));
    }

    #[test]
    fn test_partial_write_notes_abort() {
        let base = tempdir().unwrap();
        let writer = ScanWriter::create(base.path()).unwrap();
        let records = vec![record(0, 1.0)];
        writer.write_partial(&records, "cancelled by operator").unwrap();

        let summary = fs::read_to_string(writer.dir().join("scan_summary.txt")).unwrap();
        assert!(summary.contains("SCAN ABORTED: cancelled by operator"));
        let data = fs::read_to_string(writer.dir().join("scan_data.csv")).unwrap();
        assert_eq!(data.lines().count(), 2);
    }
}
