//! Position tracking and move coordination.
//!
//! [`MotionCoordinator`] owns the tracked absolute [`Position`] — the sole
//! source of truth for where the probe is. There is no independent position
//! feedback from the hardware: a successful relative move advances the
//! tracked position by exactly the commanded delta, and a failed move leaves
//! it frozen.
//!
//! Multi-axis targets are reached one axis at a time, never concurrently.
//! [`MotionCoordinator::move_to`] aborts the remaining axes on the first
//! failure, which leaves the tracked position reflecting only the moves that
//! actually succeeded — a known consistency risk accepted here rather than
//! papered over. [`MotionCoordinator::return_to_start`] is the teardown
//! counterpart and must not itself fail: a per-axis failure there is logged
//! and skipped so the remaining axes still get a chance to home.

use crate::core::{Axis, Position, Positioner};
use crate::error::{ScanError, ScanResult};
use log::{debug, warn};

/// Per-axis deltas smaller than this (1 µm) are not worth commanding.
pub const POSITION_EPSILON_MM: f64 = 1e-3;

/// Tracks absolute position and executes moves through a [`Positioner`].
pub struct MotionCoordinator {
    positioner: Box<dyn Positioner>,
    position: Position,
    anchor: Option<Position>,
}

impl MotionCoordinator {
    /// Create a coordinator with the tracked position at the origin.
    pub fn new(positioner: Box<dyn Positioner>) -> Self {
        Self::with_position(positioner, Position::ZERO)
    }

    /// Create a coordinator with a known starting position.
    pub fn with_position(positioner: Box<dyn Positioner>, position: Position) -> Self {
        Self {
            positioner,
            position,
            anchor: None,
        }
    }

    /// Current tracked position.
    pub fn position(&self) -> Position {
        self.position
    }

    /// The scan anchor recorded by [`record_start`](Self::record_start).
    pub fn anchor(&self) -> Option<Position> {
        self.anchor
    }

    /// Snapshot the current position as the scan anchor.
    pub fn record_start(&mut self) {
        self.anchor = Some(self.position);
        debug!("scan anchor recorded at {}", self.position);
    }

    /// Move one axis by a signed delta.
    ///
    /// On `Ok(true)` the tracked position has been advanced by exactly
    /// `delta_mm`. `Ok(false)` means the hardware refused the move (position
    /// unchanged); a communication failure surfaces as an error. No retry
    /// happens here; the caller decides disposition.
    pub async fn move_relative(&mut self, axis: Axis, delta_mm: f64) -> ScanResult<bool> {
        match self.positioner.move_axis(axis, delta_mm).await {
            Ok(true) => {
                let old = self.position.component(axis);
                *self.position.component_mut(axis) += delta_mm;
                debug!(
                    "{axis} moved {delta_mm:+.3}mm: {old:.3} -> {:.3}",
                    self.position.component(axis)
                );
                Ok(true)
            }
            Ok(false) => {
                warn!("{axis} move of {delta_mm:+.3}mm refused by hardware");
                Ok(false)
            }
            Err(e) => {
                warn!("{axis} move of {delta_mm:+.3}mm failed: {e:#}");
                Err(ScanError::instrument(e))
            }
        }
    }

    /// Move to an absolute target, one axis at a time in canonical order.
    ///
    /// Axes whose delta is below [`POSITION_EPSILON_MM`] are skipped. The
    /// first failing axis aborts the remaining ones; the tracked position
    /// then reflects only the moves that succeeded.
    pub async fn move_to(&mut self, target: Position) -> ScanResult<bool> {
        for axis in Axis::ALL {
            let delta = target.component(axis) - self.position.component(axis);
            if delta.abs() < POSITION_EPSILON_MM {
                continue;
            }
            if !self.move_relative(axis, delta).await? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Release the underlying hardware at end of session.
    pub async fn shutdown(&mut self) -> ScanResult<()> {
        self.positioner
            .shutdown()
            .await
            .map_err(ScanError::instrument)
    }

    /// Return to the recorded scan anchor.
    ///
    /// Teardown runs on every exit path (completion, error, cancellation)
    /// and must not itself fail: a failure on one axis is logged and the
    /// remaining axes are still attempted.
    pub async fn return_to_start(&mut self) {
        let Some(anchor) = self.anchor else {
            debug!("no scan anchor recorded, nothing to restore");
            return;
        };
        for axis in Axis::ALL {
            let delta = anchor.component(axis) - self.position.component(axis);
            if delta.abs() < POSITION_EPSILON_MM {
                continue;
            }
            match self.positioner.move_axis(axis, delta).await {
                Ok(true) => {
                    *self.position.component_mut(axis) += delta;
                }
                Ok(false) => {
                    warn!("return-to-start: {axis} move of {delta:+.3}mm refused, skipping axis");
                }
                Err(e) => {
                    warn!("return-to-start: {axis} move of {delta:+.3}mm failed, skipping axis: {e:#}");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruments::mock::MockPositioner;

    fn coordinator(positioner: MockPositioner) -> MotionCoordinator {
        MotionCoordinator::new(Box::new(positioner))
    }

    #[tokio::test]
    async fn test_successful_move_updates_position() {
        let mock = MockPositioner::new();
        let mut motion = coordinator(mock);
        assert!(motion.move_relative(Axis::X, 2.5).await.unwrap());
        assert!(motion.move_relative(Axis::X, -1.0).await.unwrap());
        assert_eq!(motion.position().x, 1.5);
    }

    #[tokio::test]
    async fn test_refused_move_freezes_position() {
        let mock = MockPositioner::new().refuse_at(0);
        let mut motion = coordinator(mock);
        assert!(!motion.move_relative(Axis::Y, 3.0).await.unwrap());
        assert_eq!(motion.position(), Position::ZERO);
    }

    #[tokio::test]
    async fn test_move_to_skips_sub_micron_deltas() {
        let mock = MockPositioner::new();
        let log = mock.move_log();
        let mut motion = coordinator(mock);
        let target = Position::new(1.0, 0.0005, 0.0);
        assert!(motion.move_to(target).await.unwrap());
        let moves = log.lock().unwrap();
        assert_eq!(moves.len(), 1);
        assert_eq!(moves[0].0, Axis::X);
    }

    #[tokio::test]
    async fn test_move_to_aborts_remaining_axes_on_failure() {
        // Y refused: Z must not be commanded, X stays applied.
        let mock = MockPositioner::new().refuse_at(1);
        let log = mock.move_log();
        let mut motion = coordinator(mock);
        let ok = motion
            .move_to(Position::new(1.0, 2.0, 3.0))
            .await
            .unwrap();
        assert!(!ok);
        assert_eq!(log.lock().unwrap().len(), 2);
        assert_eq!(motion.position(), Position::new(1.0, 0.0, 0.0));
    }

    #[tokio::test]
    async fn test_return_to_start_restores_anchor() {
        let mock = MockPositioner::new();
        let mut motion = coordinator(mock);
        motion.record_start();
        motion.move_relative(Axis::X, 4.0).await.unwrap();
        motion.move_relative(Axis::Z, -2.0).await.unwrap();
        motion.return_to_start().await;
        assert_eq!(motion.position(), Position::ZERO);
    }

    #[tokio::test]
    async fn test_return_to_start_skips_failed_axis_and_continues() {
        let mock = MockPositioner::new().error_at(2);
        let mut motion = coordinator(mock);
        motion.record_start();
        motion.move_relative(Axis::X, 1.0).await.unwrap();
        motion.move_relative(Axis::Y, 1.0).await.unwrap();
        // Third command (the X leg of the return) errors; Y must still home.
        motion.return_to_start().await;
        assert_eq!(motion.position(), Position::new(1.0, 0.0, 0.0));
    }

    #[tokio::test]
    async fn test_return_without_anchor_is_a_no_op() {
        let mock = MockPositioner::new();
        let log = mock.move_log();
        let mut motion = coordinator(mock);
        motion.return_to_start().await;
        assert!(log.lock().unwrap().is_empty());
    }
}
