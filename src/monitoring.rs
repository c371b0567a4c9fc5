//! In this module, we implement all the runtime stats for the capture loop.
//! The paced capture mode never corrects for scheduling jitter, so the measured
//! rate and its drift from nominal are tracked here instead.

use std::time::Duration;

use tracing::{debug, info};

use crate::{error::Error, exfil::Outcome};

/// Log a summary every this many cycles
pub const SUMMARY_INTERVAL: u64 = 16;

#[derive(Debug, Default, Clone)]
pub struct Monitor {
    nominal_rate_hz: f32,
    pub cycles: u64,
    pub decisions: u64,
    pub detections: u64,
    pub streamed_chars: u64,
    pub silent: u64,
    pub skipped: u64,
    pub last_capture: Duration,
    pub last_rate_hz: f32,
}

impl Monitor {
    pub fn new(nominal_rate_hz: f32) -> Self {
        Self {
            nominal_rate_hz,
            ..Default::default()
        }
    }

    /// Drift of the measured rate from nominal, in parts per million (negative is slow)
    pub fn drift_ppm(&self) -> f32 {
        if self.nominal_rate_hz <= 0.0 || self.last_rate_hz <= 0.0 {
            return 0.0;
        }
        (self.last_rate_hz / self.nominal_rate_hz - 1.0) * 1e6
    }

    pub fn record_capture(&mut self, samples: usize, elapsed: Duration) {
        self.last_capture = elapsed;
        let secs = elapsed.as_secs_f32();
        self.last_rate_hz = if secs > 0.0 {
            samples as f32 / secs
        } else {
            0.0
        };
        debug!(
            elapsed_ms = elapsed.as_secs_f32() * 1e3,
            rate_hz = self.last_rate_hz,
            drift_ppm = self.drift_ppm(),
            "capture complete"
        );
    }

    pub fn record(&mut self, result: &Result<Outcome, Error>) {
        self.cycles += 1;
        match result {
            Ok(Outcome::Decision(d)) => {
                self.decisions += 1;
                if d.detected {
                    self.detections += 1;
                }
            }
            Ok(Outcome::Streamed { chars }) => self.streamed_chars += *chars as u64,
            Ok(Outcome::Silent { .. }) => self.silent += 1,
            Err(_) => self.skipped += 1,
        }
        if self.cycles % SUMMARY_INTERVAL == 0 {
            info!(
                cycles = self.cycles,
                decisions = self.decisions,
                detections = self.detections,
                streamed_chars = self.streamed_chars,
                silent = self.silent,
                skipped = self.skipped,
                rate_hz = self.last_rate_hz,
                drift_ppm = self.drift_ppm(),
                "pipeline stats"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::Decision;

    #[test]
    fn test_drift() {
        let mut monitor = Monitor::new(16000.0);
        monitor.record_capture(16000, Duration::from_secs(2));
        assert_eq!(monitor.last_rate_hz, 8000.0);
        assert!((monitor.drift_ppm() + 500_000.0).abs() < 1.0);
    }

    #[test]
    fn test_counts() {
        let mut monitor = Monitor::new(1.0);
        monitor.record(&Ok(Outcome::Decision(Decision::new(0.9, 0.5))));
        monitor.record(&Ok(Outcome::Decision(Decision::new(0.1, 0.5))));
        monitor.record(&Ok(Outcome::Streamed { chars: 8 }));
        monitor.record(&Ok(Outcome::Silent { variance: 0.0 }));
        monitor.record(&Err(Error::TransferBusy));
        assert_eq!(monitor.cycles, 5);
        assert_eq!(monitor.decisions, 2);
        assert_eq!(monitor.detections, 1);
        assert_eq!(monitor.streamed_chars, 8);
        assert_eq!(monitor.silent, 1);
        assert_eq!(monitor.skipped, 1);
    }
}
