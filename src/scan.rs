//! Scan planning and execution.
//!
//! [`ScanPlan`] turns validated [`crate::config::Settings`] plus the current
//! position into concrete traversal inputs: per-axis signed distances, the
//! scan origin, and the grid geometry for reconstruction. [`ScanRunner`]
//! then drives the hardware point by point:
//!
//! ```text
//! for each point: cancel check -> move -> settle -> auto-ranged measure
//! ```
//!
//! Every point yields exactly one record, failed moves and failed
//! acquisitions included, so the record list always matches the planned
//! raster. The probe is returned to its starting position on every exit
//! path; cancellation surfaces as [`ScanError::Aborted`] carrying the
//! records collected so far.

use crate::config::Settings;
use crate::core::{Axis, Digitizer, Measurement, Position, ScanPoint, ScanRecord, Vector3};
use crate::error::{ScanError, ScanResult};
use crate::grid::{self, FieldGrids, GridSpec};
use crate::motion::MotionCoordinator;
use crate::path;
use crate::ranging::AutoRanger;
use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Cooperative cancellation flag, checked between points.
///
/// Cancelling never interrupts a move or an acquisition in flight; the
/// current point finishes and the scan then winds down through the normal
/// teardown path.
#[derive(Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Fully derived inputs of one scan.
#[derive(Clone, Debug)]
pub struct ScanPlan {
    pub axes: crate::core::AxisSet,
    /// Signed realized travel per axis: `(points - 1) * resolution`.
    pub distances: Vector3,
    pub resolution_mm: f64,
    /// Physical coordinates of the first scan point.
    pub origin: ScanPoint,
    /// Pause between arrival and acquisition.
    pub settle: Duration,
    /// Volts per megapascal applied during reconstruction.
    pub calibration_v_per_mpa: f64,
    /// Raw per-axis extents as configured, kept for metadata.
    pub extents: Vector3,
}

/// Points along one axis: the largest inclusive stepping that fits the
/// configured extent. Extent 10 mm at 0.5 mm resolution gives 20 points
/// spanning 9.5 mm of travel.
fn points_along(extent_mm: f64, resolution_mm: f64) -> usize {
    if extent_mm == 0.0 {
        return 1;
    }
    (extent_mm.abs() / resolution_mm + 1e-9).floor() as usize
}

/// Points an inclusive traversal of `distance_mm` visits. The counterpart of
/// [`points_along`] for realized travel rather than configured extent.
fn points_spanning(distance_mm: f64, resolution_mm: f64) -> usize {
    if distance_mm == 0.0 {
        return 1;
    }
    (distance_mm.abs() / resolution_mm + 1e-9).floor() as usize + 1
}

impl ScanPlan {
    /// Derive a plan from validated settings and the probe's current
    /// position.
    pub fn from_settings(settings: &Settings, start: Position) -> ScanResult<Self> {
        settings.validate()?;
        let axes = settings.axis_set()?;
        let resolution = settings.scan.resolution_mm;

        let mut distances = Vector3::ZERO;
        let mut origin = start;
        for axis in axes.iter() {
            let extent = settings.scan.extents.component(axis);
            let points = points_along(extent, resolution);
            *distances.component_mut(axis) =
                (points - 1) as f64 * resolution * extent.signum();
            if settings.scan.center_on_start {
                *origin.component_mut(axis) -= extent / 2.0;
            }
        }

        Ok(ScanPlan {
            axes,
            distances,
            resolution_mm: resolution,
            origin,
            settle: settings.settle(),
            calibration_v_per_mpa: settings.scan.calibration_v_per_mpa,
            extents: settings.scan.extents,
        })
    }

    /// Ordered traversal this plan describes.
    pub fn points(&self) -> ScanResult<Vec<ScanPoint>> {
        path::generate(&self.axes, self.distances, self.resolution_mm, self.origin)
    }

    /// Grid geometry for reconstruction; `None` for 3-axis scans, which
    /// have no 2-D grid representation.
    pub fn grid_spec(&self) -> Option<GridSpec> {
        if self.axes.len() > 2 {
            return None;
        }
        let primary = self.axes.primary();
        let primary_distance = self.distances.component(primary);
        let (secondary_count, secondary_step) = match self.axes.secondary() {
            Some(secondary) => {
                let d = self.distances.component(secondary);
                (
                    points_spanning(d, self.resolution_mm),
                    self.resolution_mm * d.signum(),
                )
            }
            None => (1, 0.0),
        };
        Some(GridSpec {
            primary,
            secondary: self.axes.secondary(),
            primary_count: points_spanning(primary_distance, self.resolution_mm),
            secondary_count,
            primary_step_mm: self.resolution_mm * primary_distance.signum(),
            secondary_step_mm: secondary_step,
            origin: self.origin,
        })
    }
}

/// Descriptive metadata persisted alongside the data files.
#[derive(Clone, Debug, Serialize)]
pub struct ScanMetadata {
    pub started: DateTime<Utc>,
    pub finished: DateTime<Utc>,
    pub axes: String,
    pub extents_mm: Vector3,
    pub resolution_mm: f64,
    pub origin: ScanPoint,
    pub calibration_v_per_mpa: f64,
    pub total_points: usize,
    pub failed_points: usize,
}

/// Everything one completed scan produced.
#[derive(Debug)]
pub struct ScanOutcome {
    pub records: Vec<ScanRecord>,
    /// Present for 1- and 2-axis scans only.
    pub grids: Option<FieldGrids>,
    pub metadata: ScanMetadata,
}

/// Drives one scan through the motion coordinator and auto-ranger.
pub struct ScanRunner {
    motion: MotionCoordinator,
    ranger: AutoRanger,
    digitizer: Box<dyn Digitizer>,
}

impl ScanRunner {
    pub fn new(
        motion: MotionCoordinator,
        ranger: AutoRanger,
        digitizer: Box<dyn Digitizer>,
    ) -> Self {
        Self {
            motion,
            ranger,
            digitizer,
        }
    }

    /// Release the hardware at end of session.
    pub async fn shutdown(&mut self) -> ScanResult<()> {
        self.motion.shutdown().await
    }

    /// Execute the plan. The probe returns to its starting position on
    /// every exit path, including cancellation and errors.
    pub async fn run(&mut self, plan: &ScanPlan, cancel: &CancelToken) -> ScanResult<ScanOutcome> {
        let points = plan.points()?;
        let started = Utc::now();
        info!(
            "scanning {} points over axes '{}' at {} mm resolution",
            points.len(),
            plan.axes,
            plan.resolution_mm
        );

        self.motion.record_start();
        let result = self.acquire_all(&points, plan, cancel).await;
        self.motion.return_to_start().await;

        let records = match result {
            Ok(records) => records,
            Err(err) => return Err(err),
        };
        let finished = Utc::now();

        let failed_points = records
            .iter()
            .filter(|r| r.measurement.is_failed())
            .count();
        if failed_points > 0 {
            warn!("{failed_points} of {} points failed", records.len());
        }

        let grids = match plan.grid_spec() {
            Some(spec) => Some(grid::reconstruct(
                &records,
                &spec,
                plan.calibration_v_per_mpa,
            )?),
            None => None,
        };

        Ok(ScanOutcome {
            metadata: ScanMetadata {
                started,
                finished,
                axes: plan.axes.to_string(),
                extents_mm: plan.extents,
                resolution_mm: plan.resolution_mm,
                origin: plan.origin,
                calibration_v_per_mpa: plan.calibration_v_per_mpa,
                total_points: records.len(),
                failed_points,
            },
            records,
            grids,
        })
    }

    /// The acquisition loop proper. Teardown is the caller's business; this
    /// only collects records or reports why it stopped early.
    async fn acquire_all(
        &mut self,
        points: &[ScanPoint],
        plan: &ScanPlan,
        cancel: &CancelToken,
    ) -> ScanResult<Vec<ScanRecord>> {
        let mut records = Vec::with_capacity(points.len());

        for (index, &point) in points.iter().enumerate() {
            if cancel.is_cancelled() {
                info!("scan cancelled after {index} of {} points", points.len());
                return Err(ScanError::Aborted {
                    reason: "cancelled by operator".into(),
                    records,
                });
            }

            // A refused move and a transport fault get the same disposition:
            // the point is recorded as failed and the scan moves on.
            let measurement = match self.motion.move_to(point).await {
                Ok(true) => {
                    tokio::time::sleep(plan.settle).await;
                    self.ranger.measure(self.digitizer.as_mut()).await
                }
                Ok(false) => {
                    warn!("point {index} unreachable ({point}), recording as failed");
                    Measurement::failed(self.ranger.range_state().current())
                }
                Err(err) => {
                    warn!("point {index} move failed ({point}): {err}; recording as failed");
                    Measurement::failed(self.ranger.range_state().current())
                }
            };

            records.push(ScanRecord {
                index,
                position: point,
                measurement,
                timestamp: Utc::now(),
            });
        }

        Ok(records)
    }
}

/// Probe one axis move outside of a scan. Used by the `move` subcommand.
pub async fn jog(motion: &mut MotionCoordinator, axis: Axis, distance_mm: f64) -> ScanResult<()> {
    if motion.move_relative(axis, distance_mm).await? {
        info!("now at {}", motion.position());
        Ok(())
    } else {
        Err(ScanError::Motion { axis, distance_mm })
    }
}
