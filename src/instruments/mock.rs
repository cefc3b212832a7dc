//! Simulated instruments for tests and `--mock` runs.

use crate::core::{Axis, Digitizer, Positioner};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use rand::Rng;
use std::sync::{Arc, Mutex};

/// A positioner that always succeeds unless told otherwise.
///
/// Every commanded move is appended to a shared log so tests can assert on
/// the exact command sequence. `refuse_at` / `error_at` arm a one-shot
/// fault at the nth commanded move (zero-based).
#[derive(Default)]
pub struct MockPositioner {
    log: Arc<Mutex<Vec<(Axis, f64)>>>,
    refuse_at: Option<usize>,
    error_at: Option<usize>,
    calls: usize,
}

impl MockPositioner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse (limit-switch style, `Ok(false)`) the nth commanded move.
    pub fn refuse_at(mut self, call: usize) -> Self {
        self.refuse_at = Some(call);
        self
    }

    /// Fail (transport error) the nth commanded move.
    pub fn error_at(mut self, call: usize) -> Self {
        self.error_at = Some(call);
        self
    }

    /// Shared handle to the commanded-move log.
    pub fn move_log(&self) -> Arc<Mutex<Vec<(Axis, f64)>>> {
        Arc::clone(&self.log)
    }
}

#[async_trait]
impl Positioner for MockPositioner {
    async fn move_axis(&mut self, axis: Axis, distance_mm: f64) -> Result<bool> {
        let call = self.calls;
        self.calls += 1;
        self.log.lock().unwrap().push((axis, distance_mm));
        if self.error_at == Some(call) {
            return Err(anyhow!("simulated transport failure on move {call}"));
        }
        if self.refuse_at == Some(call) {
            return Ok(false);
        }
        Ok(true)
    }
}

/// A digitizer producing a synthetic waveform of known amplitude.
///
/// The default waveform has exact peaks at plus and minus half the set
/// amplitude, so usage percentages come out exactly as computed. The
/// `full_scale` variant instead fills the acquisition window completely at
/// whatever range is applied, which keeps any ranging loop from settling.
pub struct MockDigitizer {
    amplitude_v: f64,
    full_scale: bool,
    fail_reads: bool,
    noise_v: f64,
    applied_range: f64,
    last_set: Option<f64>,
    changes: usize,
}

/// Samples per simulated waveform buffer.
const BUFFER_LEN: usize = 256;

impl MockDigitizer {
    /// A signal with the given exact peak-to-peak amplitude in volts.
    pub fn new(amplitude_v: f64) -> Self {
        Self {
            amplitude_v,
            full_scale: false,
            fail_reads: false,
            noise_v: 0.0,
            applied_range: 1.0,
            last_set: None,
            changes: 0,
        }
    }

    /// A signal that spans the full window at every range.
    pub fn full_scale() -> Self {
        Self {
            full_scale: true,
            ..Self::new(0.0)
        }
    }

    /// Make every waveform read fail.
    pub fn failing_reads(mut self) -> Self {
        self.fail_reads = true;
        self
    }

    /// Add uniform jitter to the samples. Used by `--mock` runs so the
    /// output looks alive; tests stay on the exact waveform.
    pub fn with_noise(mut self, noise_v: f64) -> Self {
        self.noise_v = noise_v;
        self
    }

    pub fn set_amplitude(&mut self, amplitude_v: f64) {
        self.amplitude_v = amplitude_v;
    }

    /// Number of range programmings that changed the value.
    pub fn range_changes(&self) -> usize {
        self.changes
    }
}

#[async_trait]
impl Digitizer for MockDigitizer {
    async fn set_range(&mut self, volts_per_div: f64) -> Result<()> {
        if let Some(previous) = self.last_set {
            if previous != volts_per_div {
                self.changes += 1;
            }
        }
        self.last_set = Some(volts_per_div);
        self.applied_range = volts_per_div;
        Ok(())
    }

    async fn read_waveform(&mut self) -> Result<Vec<f64>> {
        if self.fail_reads {
            return Err(anyhow!("simulated acquisition failure"));
        }
        let amplitude = if self.full_scale {
            self.applied_range * crate::ranging::TOTAL_DIVISIONS
        } else {
            self.amplitude_v
        };
        let half = amplitude / 2.0;
        let mut rng = rand::thread_rng();
        let samples = (0..BUFFER_LEN)
            .map(|i| {
                let base = match i % 4 {
                    1 => half,
                    3 => -half,
                    _ => 0.0,
                };
                if self.noise_v > 0.0 {
                    base + rng.gen_range(-self.noise_v..self.noise_v)
                } else {
                    base
                }
            })
            .collect();
        Ok(samples)
    }

    async fn query(&mut self, setting: &str) -> Result<String> {
        match setting {
            "vdiv" => Ok(self.applied_range.to_string()),
            _ => Ok(String::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_positioner_one_shot_faults() {
        let mut positioner = MockPositioner::new().refuse_at(1);
        assert!(positioner.move_axis(Axis::X, 1.0).await.unwrap());
        assert!(!positioner.move_axis(Axis::X, 1.0).await.unwrap());
        assert!(positioner.move_axis(Axis::X, 1.0).await.unwrap());
        assert_eq!(positioner.move_log().lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_digitizer_exact_peaks() {
        let mut scope = MockDigitizer::new(4.0);
        let samples = scope.read_waveform().await.unwrap();
        let max = samples.iter().cloned().fold(f64::MIN, f64::max);
        let min = samples.iter().cloned().fold(f64::MAX, f64::min);
        assert_eq!(max, 2.0);
        assert_eq!(min, -2.0);
    }

    #[tokio::test]
    async fn test_digitizer_counts_only_real_changes() {
        let mut scope = MockDigitizer::new(1.0);
        scope.set_range(1.0).await.unwrap();
        scope.set_range(1.0).await.unwrap();
        scope.set_range(0.5).await.unwrap();
        assert_eq!(scope.range_changes(), 1);
    }

    #[tokio::test]
    async fn test_full_scale_tracks_applied_range() {
        let mut scope = MockDigitizer::full_scale();
        scope.set_range(0.1).await.unwrap();
        let samples = scope.read_waveform().await.unwrap();
        let max = samples.iter().cloned().fold(f64::MIN, f64::max);
        assert_eq!(max, 0.4); // half of 0.1 V/div * 8 divisions
    }
}
