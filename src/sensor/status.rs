//! Sensor self-test: a short series of measurements with a summary.

use crate::sensor::types::{RangeSampler, Reading, SensorError};
use statrs::statistics::Statistics;
use std::fmt;
use std::thread;
use std::time::Duration;

pub const STATUS_SAMPLES: usize = 5;
pub const STATUS_SPACING: Duration = Duration::from_secs(1);

/// Result of one self-test measurement.
#[derive(Debug)]
pub enum Probe {
    Reading(Reading),
    Discarded,
    Failed(SensorError),
}

#[derive(Debug)]
pub struct StatusReport {
    pub probes: Vec<Probe>,
}

impl StatusReport {
    fn values(&self) -> Vec<f64> {
        self.probes
            .iter()
            .filter_map(|p| match p {
                Probe::Reading(r) => Some(r.value),
                _ => None,
            })
            .collect()
    }

    pub fn successful(&self) -> usize {
        self.values().len()
    }

    pub fn mean(&self) -> Option<f64> {
        let values = self.values();
        (!values.is_empty()).then(|| values.iter().mean())
    }

    /// Sample standard deviation; needs two readings.
    pub fn std_dev(&self) -> Option<f64> {
        let values = self.values();
        (values.len() >= 2).then(|| values.iter().std_dev())
    }
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, probe) in self.probes.iter().enumerate() {
            match probe {
                Probe::Reading(r) => writeln!(f, "  {}. {:.2}", i + 1, r.value)?,
                Probe::Discarded => writeln!(f, "  {}. out of range", i + 1)?,
                Probe::Failed(e) => writeln!(f, "  {}. failed: {e}", i + 1)?,
            }
        }
        write!(f, "  {}/{} readings", self.successful(), self.probes.len())?;
        if let Some(mean) = self.mean() {
            write!(f, ", mean {mean:.2}")?;
        }
        if let Some(sd) = self.std_dev() {
            write!(f, ", std dev {sd:.2}")?;
        }
        Ok(())
    }
}

/// Take `count` measurements `spacing` apart.
pub fn probe<S: RangeSampler + ?Sized>(
    sampler: &mut S,
    count: usize,
    spacing: Duration,
) -> StatusReport {
    let mut probes = Vec::with_capacity(count);
    for i in 0..count {
        if i > 0 {
            thread::sleep(spacing);
        }
        probes.push(match sampler.sample() {
            Ok(Some(reading)) => Probe::Reading(reading),
            Ok(None) => Probe::Discarded,
            Err(e) => Probe::Failed(e),
        });
    }
    StatusReport { probes }
}
