//! Closed-loop auto-ranging acquisition.
//!
//! [`AutoRanger`] keeps the digitizer's input window matched to the signal
//! amplitude at each scan point. It is a discrete-time feedback controller:
//! the control variable is the fraction of the full-scale window occupied by
//! the observed peak-to-peak amplitude ("usage"), the actuator is the
//! vertical range, and the plant only accepts values from a discrete ladder.
//!
//! The loop is tuned to avoid churn at steady state while still converging
//! quickly from a badly mismatched starting range:
//!
//! - a wide dead band (5–90% usage) where the range is simply held;
//! - asymmetric dwell windows (2 s up, 3 s down) so one noisy sample after
//!   a change cannot trigger another change;
//! - a noise-floor guard so a genuinely quiet signal is never chased
//!   downward through the whole ladder;
//! - an acceleration factor that moves fast when far from the 70% target
//!   and slowly near it, damping overshoot;
//! - a hard bound of three range changes per measurement, after which an
//!   explicit sentinel measurement is returned instead of an error.
//!
//! All range state lives in [`RangeState`], owned by the ranger and threaded
//! through calls; nothing here knows which instrument vendor is attached.

use crate::core::{Digitizer, Measurement};
use log::{debug, warn};
use std::time::{Duration, Instant};

/// Instrument-supported vertical ranges, volts per division.
pub const RANGE_LADDER: [f64; 9] = [0.02, 0.05, 0.1, 0.2, 0.5, 1.0, 2.0, 5.0, 10.0];

/// Vertical divisions spanned by the digitizer's acquisition window.
pub const TOTAL_DIVISIONS: f64 = 8.0;

/// Weight of the newest sample in the smoothed usage estimate.
const EMA_WEIGHT: f64 = 0.3;
/// Usage the controller steers toward when it does rescale.
const TARGET_USAGE_PCT: f64 = 70.0;
/// Above this usage the signal risks clipping and the range scales up.
const SCALE_UP_PCT: f64 = 90.0;
/// Below this usage the signal is under-resolved and the range scales down.
const SCALE_DOWN_PCT: f64 = 5.0;
/// Smoothed usage is reset here after a failed settle.
const NEUTRAL_USAGE_PCT: f64 = 50.0;
/// Minimum time since the last change before scaling up again.
const UP_DWELL: Duration = Duration::from_secs(2);
/// Minimum time since the last change before scaling down again.
const DOWN_DWELL: Duration = Duration::from_secs(3);
/// Range changes allowed within one measurement before giving up.
const MAX_RESCALE_ATTEMPTS: u32 = 3;
/// Snapped candidates closer than this (relative) to the current range are
/// not worth a settling delay.
const MIN_RELATIVE_CHANGE: f64 = 0.01;

/// Ranging tunables, normally taken from [`crate::config::RangingSettings`].
#[derive(Clone, Debug)]
pub struct RangingConfig {
    /// Range applied before the first measurement, volts per division.
    pub initial_range: f64,
    /// Lower bound the controller may reach.
    pub range_min: f64,
    /// Upper bound the controller may reach.
    pub range_max: f64,
    /// Assumed peak-to-peak noise floor in volts. Scaling down requires the
    /// signal to exceed three times this value.
    pub noise_floor_v: f64,
    /// Settling delay after programming a new range.
    pub settle: Duration,
}

impl Default for RangingConfig {
    fn default() -> Self {
        Self {
            initial_range: 1.0,
            range_min: RANGE_LADDER[0],
            range_max: RANGE_LADDER[RANGE_LADDER.len() - 1],
            noise_floor_v: 0.002,
            settle: Duration::from_millis(500),
        }
    }
}

/// Explicit range-controller state, threaded through measurements.
#[derive(Clone, Debug)]
pub struct RangeState {
    current: f64,
    range_min: f64,
    range_max: f64,
    smoothed_usage: Option<f64>,
    last_change: Option<Instant>,
}

impl RangeState {
    fn new(config: &RangingConfig) -> Self {
        Self {
            current: config.initial_range.clamp(config.range_min, config.range_max),
            range_min: config.range_min,
            range_max: config.range_max,
            smoothed_usage: None,
            last_change: None,
        }
    }

    /// Range currently programmed into the digitizer, volts per division.
    pub fn current(&self) -> f64 {
        self.current
    }

    /// Exponentially smoothed usage percentage, `None` before the first
    /// sample.
    pub fn smoothed_usage(&self) -> Option<f64> {
        self.smoothed_usage
    }

    fn observe_usage(&mut self, usage_pct: f64) {
        self.smoothed_usage = Some(match self.smoothed_usage {
            None => usage_pct,
            Some(s) => s * (1.0 - EMA_WEIGHT) + usage_pct * EMA_WEIGHT,
        });
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Trend {
    Up,
    Down,
}

enum Decision {
    Hold,
    Rescale(f64),
}

/// Per-point measurement loop with closed-loop range adjustment.
pub struct AutoRanger {
    state: RangeState,
    noise_floor_v: f64,
    settle: Duration,
}

impl AutoRanger {
    pub fn new(config: &RangingConfig) -> Self {
        Self {
            state: RangeState::new(config),
            noise_floor_v: config.noise_floor_v,
            settle: config.settle,
        }
    }

    /// Current controller state (range, smoothed usage).
    pub fn range_state(&self) -> &RangeState {
        &self.state
    }

    /// Acquire one measurement, adjusting the range as needed.
    ///
    /// Never returns an error: a digitizer that cannot be read, or a range
    /// that will not settle within [`MAX_RESCALE_ATTEMPTS`], yields the
    /// [`Measurement::failed`] sentinel so the record list stays complete.
    pub async fn measure(&mut self, digitizer: &mut dyn Digitizer) -> Measurement {
        // Dwell windows are judged against the last change made *before*
        // this measurement began; the retry loop below is bounded on its
        // own and must be free to walk the ladder within one point.
        let dwell_reference = self.state.last_change;
        let mut rescales = 0u32;

        loop {
            if let Err(e) = digitizer.set_range(self.state.current).await {
                warn!("range programming failed: {e:#}");
                return Measurement::failed(self.state.current);
            }
            tokio::time::sleep(self.settle).await;

            let samples = match digitizer.read_waveform().await {
                Ok(samples) => samples,
                Err(e) => {
                    warn!("waveform read failed: {e:#}");
                    return Measurement::failed(self.state.current);
                }
            };
            let Some(measurement) = Measurement::from_waveform(&samples, self.state.current)
            else {
                warn!("empty waveform buffer");
                return Measurement::failed(self.state.current);
            };

            let peak_to_peak = measurement.peak_to_peak();
            let usage_pct = peak_to_peak / (self.state.current * TOTAL_DIVISIONS) * 100.0;
            self.state.observe_usage(usage_pct);

            match self.decide(usage_pct, peak_to_peak, dwell_reference) {
                Decision::Hold => return measurement,
                Decision::Rescale(new_range) => {
                    if rescales == MAX_RESCALE_ATTEMPTS {
                        warn!(
                            "auto-ranging did not settle after {MAX_RESCALE_ATTEMPTS} changes \
                             (usage {usage_pct:.1}% at {} V/div)",
                            self.state.current
                        );
                        self.state.smoothed_usage = Some(NEUTRAL_USAGE_PCT);
                        return Measurement::failed(self.state.current);
                    }
                    debug!(
                        "range {} -> {} V/div (usage {usage_pct:.1}%)",
                        self.state.current, new_range
                    );
                    self.state.current = new_range;
                    self.state.last_change = Some(Instant::now());
                    rescales += 1;
                }
            }
        }
    }

    fn decide(
        &self,
        usage_pct: f64,
        peak_to_peak: f64,
        dwell_reference: Option<Instant>,
    ) -> Decision {
        let dwell_elapsed =
            |dwell: Duration| dwell_reference.map_or(true, |t| t.elapsed() > dwell);

        let trend = if usage_pct > SCALE_UP_PCT && dwell_elapsed(UP_DWELL) {
            Trend::Up
        } else if usage_pct < SCALE_DOWN_PCT
            && dwell_elapsed(DOWN_DWELL)
            && peak_to_peak > 3.0 * self.noise_floor_v
        {
            // Below the noise guard the signal is genuinely near zero; do
            // not chase the range downward indefinitely.
            Trend::Down
        } else {
            return Decision::Hold;
        };

        // Range that would put the observed amplitude at the usage target.
        let ideal = peak_to_peak / (TOTAL_DIVISIONS * TARGET_USAGE_PCT / 100.0);
        // Far from target: move most of the way at once. Near target: small
        // steps, damping overshoot.
        let accel = ((TARGET_USAGE_PCT - usage_pct).abs() / 50.0).min(2.0);
        let step = (accel / 2.0).min(1.0);
        let candidate = (self.state.current + (ideal - self.state.current) * step)
            .clamp(self.state.range_min, self.state.range_max);

        let snapped = self.snap_to_ladder(candidate, trend);
        let relative = (snapped - self.state.current).abs() / self.state.current;
        if relative > MIN_RELATIVE_CHANGE {
            Decision::Rescale(snapped)
        } else {
            Decision::Hold
        }
    }

    /// Snap a candidate range to the nearest ladder value within bounds.
    /// When the nearest rung is the one already in use, take one rung in the
    /// trend direction instead so the loop always makes progress.
    fn snap_to_ladder(&self, candidate: f64, trend: Trend) -> f64 {
        let allowed: Vec<f64> = RANGE_LADDER
            .iter()
            .copied()
            .filter(|&v| v >= self.state.range_min && v <= self.state.range_max)
            .collect();
        let Some(&nearest) = allowed.iter().min_by(|a, b| {
            let da = (**a - candidate).abs();
            let db = (**b - candidate).abs();
            da.total_cmp(&db)
        }) else {
            return self.state.current;
        };

        if (nearest - self.state.current).abs() / self.state.current > MIN_RELATIVE_CHANGE {
            return nearest;
        }
        let adjacent = match trend {
            Trend::Up => allowed
                .iter()
                .copied()
                .find(|&v| v > self.state.current * (1.0 + MIN_RELATIVE_CHANGE)),
            Trend::Down => allowed
                .iter()
                .rev()
                .copied()
                .find(|&v| v < self.state.current * (1.0 - MIN_RELATIVE_CHANGE)),
        };
        adjacent.unwrap_or(self.state.current)
    }
}
