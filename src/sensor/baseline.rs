//! Baseline establishment and rate-limited deviation checks.
//!
//! The baseline is the mean of a short burst of readings taken when a
//! session starts. Later readings are compared against it; a deviation
//! larger than the threshold marks the session as anomalous.

use crate::sensor::types::{RangeSampler, Reading, SensorError};
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::debug;

/// Number of attempts in the establishment burst.
pub const BASELINE_SAMPLES: usize = 3;

/// Spacing between establishment attempts.
pub const BASELINE_SPACING: Duration = Duration::from_millis(100);

/// Default deviation threshold (cm for the rangefinder).
pub const DEFAULT_THRESHOLD: f64 = 10.0;

/// Default minimum time between two checks.
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(2);

/// Reference value for a session.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Baseline(f64);

impl Baseline {
    pub fn value(&self) -> f64 {
        self.0
    }
}

/// Every establishment attempt failed.
#[derive(Debug, Error)]
#[error("no usable sensor samples in {attempts} baseline attempts")]
pub struct NoBaseline {
    pub attempts: usize,
}

/// Result of one rate-limited check.
#[derive(Debug)]
pub enum CheckOutcome {
    /// Too soon after the previous check; nothing was sampled.
    Suppressed,
    /// No baseline has been established.
    Disabled,
    /// The sample attempt failed or was discarded.
    NoSample(Option<SensorError>),
    /// Reading within the threshold.
    Normal { reading: Reading, deviation: f64 },
    /// Reading deviates by more than the threshold.
    Anomalous { reading: Reading, deviation: f64 },
}

impl CheckOutcome {
    pub fn is_anomalous(&self) -> bool {
        matches!(self, CheckOutcome::Anomalous { .. })
    }

    /// Whether this check consumed a sample attempt.
    pub fn sampled(&self) -> bool {
        !matches!(self, CheckOutcome::Suppressed | CheckOutcome::Disabled)
    }
}

/// Holds the session baseline and applies the deviation rule.
#[derive(Debug, Clone)]
pub struct BaselineTracker {
    threshold: f64,
    check_interval: Duration,
    spacing: Duration,
    baseline: Option<Baseline>,
    last_check: Option<Instant>,
}

impl Default for BaselineTracker {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD, DEFAULT_CHECK_INTERVAL)
    }
}

impl BaselineTracker {
    pub fn new(threshold: f64, check_interval: Duration) -> Self {
        Self {
            threshold,
            check_interval,
            spacing: BASELINE_SPACING,
            baseline: None,
            last_check: None,
        }
    }

    /// Override the spacing between establishment attempts.
    pub fn with_spacing(mut self, spacing: Duration) -> Self {
        self.spacing = spacing;
        self
    }

    pub fn baseline(&self) -> Option<Baseline> {
        self.baseline
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Establish the baseline from a burst of samples.
    ///
    /// Failed and discarded samples are ignored. Once set, the baseline is
    /// returned unchanged by later calls.
    pub fn establish<S: RangeSampler + ?Sized>(
        &mut self,
        sampler: &mut S,
    ) -> Result<Baseline, NoBaseline> {
        if let Some(baseline) = self.baseline {
            return Ok(baseline);
        }

        let mut values = Vec::with_capacity(BASELINE_SAMPLES);
        for attempt in 0..BASELINE_SAMPLES {
            if attempt > 0 {
                thread::sleep(self.spacing);
            }
            match sampler.sample() {
                Ok(Some(reading)) => values.push(reading.value),
                Ok(None) => debug!(attempt, "baseline sample discarded"),
                Err(e) => debug!(attempt, "baseline sample failed: {e}"),
            }
        }

        if values.is_empty() {
            return Err(NoBaseline {
                attempts: BASELINE_SAMPLES,
            });
        }

        let baseline = Baseline(values.iter().mean());
        self.baseline = Some(baseline);
        Ok(baseline)
    }

    /// Whether `current` deviates from the baseline by more than the threshold.
    pub fn exceeds(&self, current: f64, baseline: Baseline) -> bool {
        (current - baseline.value()).abs() > self.threshold
    }

    /// Rate-limited check using the current time.
    pub fn check<S: RangeSampler + ?Sized>(&mut self, sampler: &mut S) -> bool {
        self.check_at(Instant::now(), sampler).is_anomalous()
    }

    /// Rate-limited check at an explicit instant.
    ///
    /// Checks closer than the check interval to the previous one are
    /// suppressed without touching the sensor. A failed sample still
    /// counts as a check.
    pub fn check_at<S: RangeSampler + ?Sized>(
        &mut self,
        now: Instant,
        sampler: &mut S,
    ) -> CheckOutcome {
        let Some(baseline) = self.baseline else {
            return CheckOutcome::Disabled;
        };

        if let Some(last) = self.last_check {
            if now.saturating_duration_since(last) < self.check_interval {
                return CheckOutcome::Suppressed;
            }
        }
        self.last_check = Some(now);

        let reading = match sampler.sample() {
            Ok(Some(reading)) => reading,
            Ok(None) => return CheckOutcome::NoSample(None),
            Err(e) => return CheckOutcome::NoSample(Some(e)),
        };

        let deviation = (reading.value - baseline.value()).abs();
        if self.exceeds(reading.value, baseline) {
            CheckOutcome::Anomalous { reading, deviation }
        } else {
            CheckOutcome::Normal { reading, deviation }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensor::testing::ScriptedSampler;

    fn tracker() -> BaselineTracker {
        BaselineTracker::default().with_spacing(Duration::ZERO)
    }

    #[test]
    fn test_establish_averages_successes() {
        let mut sampler = ScriptedSampler::new([Some(100.0), None, Some(110.0)]);
        let baseline = tracker().establish(&mut sampler).unwrap();

        assert!((baseline.value() - 105.0).abs() < 1e-9);
        assert_eq!(sampler.calls(), 3);
    }

    #[test]
    fn test_establish_fails_only_when_all_attempts_fail() {
        let mut sampler = ScriptedSampler::new([None, None, None]);
        let err = tracker().establish(&mut sampler).unwrap_err();
        assert_eq!(err.attempts, 3);

        let mut sampler = ScriptedSampler::new([None, None, Some(50.0)]);
        assert!(tracker().establish(&mut sampler).is_ok());
    }

    #[test]
    fn test_baseline_is_immutable_once_set() {
        let mut tracker = tracker();
        let mut first = ScriptedSampler::new([Some(40.0)]);
        let mut second = ScriptedSampler::new([Some(90.0)]);

        let a = tracker.establish(&mut first).unwrap();
        let b = tracker.establish(&mut second).unwrap();
        assert_eq!(a, b);
        assert_eq!(second.calls(), 0);
    }

    #[test]
    fn test_threshold_is_strict() {
        let tracker = tracker();
        let baseline = Baseline(100.0);

        assert!(!tracker.exceeds(110.0, baseline));
        assert!(!tracker.exceeds(90.0, baseline));
        assert!(tracker.exceeds(110.5, baseline));
        assert!(tracker.exceeds(89.9, baseline));
    }

    #[test]
    fn test_checks_inside_interval_are_suppressed() {
        let mut tracker = tracker();
        let mut sampler = ScriptedSampler::new([Some(100.0), Some(100.0), Some(100.0), Some(130.0)]);
        tracker.establish(&mut sampler).unwrap();
        let calls_after_baseline = sampler.calls();

        let t0 = Instant::now();
        assert!(tracker.check_at(t0, &mut sampler).is_anomalous());
        assert_eq!(sampler.calls(), calls_after_baseline + 1);

        let second = tracker.check_at(t0 + Duration::from_secs(1), &mut sampler);
        assert!(matches!(second, CheckOutcome::Suppressed));
        assert!(!second.is_anomalous());
        assert_eq!(sampler.calls(), calls_after_baseline + 1);

        let third = tracker.check_at(t0 + Duration::from_secs(2), &mut sampler);
        assert!(third.sampled());
        assert_eq!(sampler.calls(), calls_after_baseline + 2);
    }

    #[test]
    fn test_check_without_baseline_is_disabled() {
        let mut tracker = tracker();
        let mut sampler = ScriptedSampler::new([Some(100.0)]);
        assert!(matches!(
            tracker.check_at(Instant::now(), &mut sampler),
            CheckOutcome::Disabled
        ));
        assert_eq!(sampler.calls(), 0);
    }

    #[test]
    fn test_failed_sample_is_not_anomalous() {
        let mut tracker = tracker();
        let mut sampler = ScriptedSampler::new([Some(100.0), Some(100.0), Some(100.0), None]);
        tracker.establish(&mut sampler).unwrap();

        let outcome = tracker.check_at(Instant::now(), &mut sampler);
        assert!(matches!(outcome, CheckOutcome::NoSample(Some(_))));
        assert!(!outcome.is_anomalous());
    }
}
