//! End-to-end scan tests against the simulated instruments.
//!
//! Run with: cargo test --test mock_scan_test

use hydroscan::config::Settings;
use hydroscan::core::{AcquisitionMethod, Position};
use hydroscan::error::ScanError;
use hydroscan::instruments::{MockDigitizer, MockPositioner};
use hydroscan::motion::MotionCoordinator;
use hydroscan::ranging::{AutoRanger, RangingConfig};
use hydroscan::scan::{CancelToken, ScanPlan, ScanRunner};
use hydroscan::storage::ScanWriter;
use std::time::Duration;
use tempfile::tempdir;

fn test_settings() -> Settings {
    Settings::from_toml(
        r#"
        [hardware]
        gantry_port = "/dev/null"
        scope_address = "/dev/null"
        steps_per_mm = 800.0

        [scan]
        axes = "xy"
        extents = { x = 6.0, y = 6.0 }
        resolution_mm = 2.0
        settle_ms = 0
        calibration_v_per_mpa = 2.0
        "#,
    )
    .unwrap()
}

fn runner_with(positioner: MockPositioner, amplitude_v: f64) -> ScanRunner {
    ScanRunner::new(
        MotionCoordinator::new(Box::new(positioner)),
        AutoRanger::new(&RangingConfig {
            settle: Duration::ZERO,
            ..RangingConfig::default()
        }),
        Box::new(MockDigitizer::new(amplitude_v)),
    )
}

#[tokio::test]
async fn test_full_pipeline_scan_to_disk() {
    let settings = test_settings();
    let plan = ScanPlan::from_settings(&settings, Position::ZERO).unwrap();
    // extents 6 mm at 2 mm: 3 points per axis.
    assert_eq!(plan.points().unwrap().len(), 9);

    let mut runner = runner_with(MockPositioner::new(), 4.0);
    let outcome = runner.run(&plan, &CancelToken::new()).await.unwrap();

    assert_eq!(outcome.records.len(), 9);
    assert!(outcome
        .records
        .iter()
        .all(|r| r.measurement.method == AcquisitionMethod::Waveform));

    // Calibration divides volts by 2: +2 V peaks become +1 MPa.
    let grids = outcome.grids.as_ref().unwrap();
    assert_eq!(grids.positive.get(0, 0), 1.0);
    assert_eq!(grids.negative.get(2, 2), -1.0);

    let base = tempdir().unwrap();
    let writer = ScanWriter::create(base.path()).unwrap();
    writer.write_outcome(&outcome).unwrap();
    let data = std::fs::read_to_string(writer.dir().join("scan_data.csv")).unwrap();
    assert_eq!(data.lines().count(), 10); // header + 9 points
    assert!(writer.dir().join("positive_grid.csv").is_file());
    assert!(writer.dir().join("scan_config.json").is_file());
}

#[tokio::test]
async fn test_scan_continues_past_a_refused_move() {
    let mut runner = runner_with(MockPositioner::new().refuse_at(2), 4.0);
    let plan = ScanPlan::from_settings(&test_settings(), Position::ZERO).unwrap();

    let outcome = runner.run(&plan, &CancelToken::new()).await.unwrap();
    assert_eq!(outcome.metadata.failed_points, 1);
    assert_eq!(outcome.records.len(), 9);
    // The unreachable point shows up as one empty cell in the grid.
    let grids = outcome.grids.as_ref().unwrap();
    let nan_cells = (0..3)
        .flat_map(|r| (0..3).map(move |c| (r, c)))
        .filter(|&(r, c)| grids.positive.get(r, c).is_nan())
        .count();
    assert_eq!(nan_cells, 1);
}

#[tokio::test]
async fn test_scan_homes_probe_at_completion() {
    let mock = MockPositioner::new();
    let log = mock.move_log();
    let mut runner = runner_with(mock, 4.0);
    let plan = ScanPlan::from_settings(&test_settings(), Position::ZERO).unwrap();
    runner.run(&plan, &CancelToken::new()).await.unwrap();

    // Net commanded travel per axis is zero: the probe ended where it began.
    let moves = log.lock().unwrap();
    for axis in hydroscan::core::Axis::ALL {
        let net: f64 = moves
            .iter()
            .filter(|(a, _)| *a == axis)
            .map(|(_, d)| d)
            .sum();
        assert!(net.abs() < 1e-9, "{axis} net travel {net}");
    }
}

#[tokio::test]
async fn test_cancelled_scan_persists_partial_records() {
    let mut runner = runner_with(MockPositioner::new(), 4.0);
    let plan = ScanPlan::from_settings(&test_settings(), Position::ZERO).unwrap();
    let cancel = CancelToken::new();
    cancel.cancel();

    let err = runner.run(&plan, &cancel).await.unwrap_err();
    let ScanError::Aborted { reason, records } = err else {
        panic!("expected abort");
    };

    let base = tempdir().unwrap();
    let writer = ScanWriter::create(base.path()).unwrap();
    writer.write_partial(&records, &reason).unwrap();
    let summary = std::fs::read_to_string(writer.dir().join("scan_summary.txt")).unwrap();
    assert!(summary.contains("SCAN ABORTED"));
}
