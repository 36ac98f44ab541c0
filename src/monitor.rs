//! Session-scoped anomaly monitoring.
//!
//! The monitor owns the sensor. While a session is active it samples on a
//! background thread and raises a shared flag once any reading deviates
//! from the session baseline. The flag stays raised until the next session
//! starts.

use crate::config::SensorConfig;
use crate::sensor::{Baseline, BaselineTracker, CheckOutcome, RangeSampler};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Shared "anomaly observed" flag.
///
/// Written only by the sampling thread; read by the session owner and the
/// ingest pipeline.
#[derive(Debug, Clone, Default)]
pub struct AnomalyFlag(Arc<AtomicBool>);

impl AnomalyFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub(crate) fn raise(&self) -> bool {
        !self.0.swap(true, Ordering::SeqCst)
    }

    fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Timing knobs for the sampling loop.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub threshold: f64,
    pub check_interval: Duration,
    pub tick: Duration,
    pub baseline_spacing: Duration,
}

impl From<&SensorConfig> for MonitorConfig {
    fn from(sensor: &SensorConfig) -> Self {
        Self {
            threshold: sensor.threshold,
            check_interval: sensor.check_interval,
            tick: sensor.tick,
            baseline_spacing: crate::sensor::baseline::BASELINE_SPACING,
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self::from(&SensorConfig::default())
    }
}

/// Monitor lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Idle,
    Monitoring,
}

/// Errors from starting or stopping the monitor.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("anomaly monitor is already running")]
    AlreadyRunning,
    #[error("anomaly monitor is not running")]
    NotRunning,
    #[error("sensor handle has been released")]
    Released,
    #[error("failed to spawn sampling thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Final state of a monitored session.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorOutcome {
    pub anomaly: bool,
    pub baseline: Option<Baseline>,
    pub samples: u64,
    pub anomalous_samples: u64,
}

struct LoopReport<S> {
    sampler: S,
    baseline: Option<Baseline>,
    samples: u64,
    anomalous_samples: u64,
}

/// Runs the sampling loop for one session at a time.
pub struct AnomalyMonitor<S: RangeSampler + 'static> {
    config: MonitorConfig,
    flag: AnomalyFlag,
    running: Arc<AtomicBool>,
    sampler: Option<S>,
    handle: Option<JoinHandle<LoopReport<S>>>,
}

impl<S: RangeSampler + 'static> AnomalyMonitor<S> {
    /// Create an idle monitor that owns `sampler`.
    pub fn new(sampler: S, config: MonitorConfig, flag: AnomalyFlag) -> Self {
        Self {
            config,
            flag,
            running: Arc::new(AtomicBool::new(false)),
            sampler: Some(sampler),
            handle: None,
        }
    }

    pub fn state(&self) -> MonitorState {
        if self.handle.is_some() {
            MonitorState::Monitoring
        } else {
            MonitorState::Idle
        }
    }

    pub fn flag(&self) -> AnomalyFlag {
        self.flag.clone()
    }

    /// Enter `Monitoring`: reset the flag and start sampling.
    pub fn start(&mut self) -> Result<(), MonitorError> {
        if self.handle.is_some() {
            return Err(MonitorError::AlreadyRunning);
        }
        let sampler = self.sampler.take().ok_or(MonitorError::Released)?;

        self.flag.reset();
        self.running.store(true, Ordering::SeqCst);

        let config = self.config.clone();
        let flag = self.flag.clone();
        let running = self.running.clone();

        let handle = thread::Builder::new()
            .name("anomaly-monitor".to_string())
            .spawn(move || run_sampling_loop(sampler, config, flag, running))
            .inspect_err(|_| self.running.store(false, Ordering::SeqCst))?;

        self.handle = Some(handle);
        Ok(())
    }

    /// Leave `Monitoring` and report the session verdict.
    ///
    /// Blocks until the sampling thread has exited, so any in-flight
    /// measurement completes before the sensor is handed back.
    pub fn stop(&mut self) -> Result<MonitorOutcome, MonitorError> {
        let handle = self.handle.take().ok_or(MonitorError::NotRunning)?;
        self.running.store(false, Ordering::SeqCst);

        match handle.join() {
            Ok(report) => {
                self.sampler = Some(report.sampler);
                Ok(MonitorOutcome {
                    anomaly: self.flag.is_raised(),
                    baseline: report.baseline,
                    samples: report.samples,
                    anomalous_samples: report.anomalous_samples,
                })
            }
            Err(_) => {
                error!("sampling thread panicked; sensor handle lost");
                Ok(MonitorOutcome {
                    anomaly: self.flag.is_raised(),
                    baseline: None,
                    samples: 0,
                    anomalous_samples: 0,
                })
            }
        }
    }

    /// Stop sampling if needed, then release the sensor handle.
    pub fn release(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if self.handle.is_some() {
            let _ = self.stop();
        }
        if let Some(mut sampler) = self.sampler.take() {
            sampler.release();
            debug!("sensor handle released");
        }
    }
}

impl<S: RangeSampler + 'static> Drop for AnomalyMonitor<S> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_sampling_loop<S: RangeSampler>(
    sampler: S,
    config: MonitorConfig,
    flag: AnomalyFlag,
    running: Arc<AtomicBool>,
) -> LoopReport<S> {
    let mut tracker = BaselineTracker::new(config.threshold, config.check_interval)
        .with_spacing(config.baseline_spacing);

    let mut report = LoopReport {
        baseline: None,
        samples: 0,
        anomalous_samples: 0,
        sampler,
    };

    match tracker.establish(&mut report.sampler) {
        Ok(baseline) => {
            info!(
                baseline = baseline.value(),
                threshold = config.threshold,
                "sensor baseline established"
            );
            report.baseline = Some(baseline);
        }
        Err(e) => {
            warn!("{e}; anomaly detection disabled for this session");
            return report;
        }
    }

    while running.load(Ordering::SeqCst) {
        let outcome = tracker.check_at(Instant::now(), &mut report.sampler);
        if outcome.sampled() {
            report.samples += 1;
        }

        match outcome {
            CheckOutcome::Anomalous { reading, deviation } => {
                report.anomalous_samples += 1;
                if flag.raise() {
                    warn!(
                        reading = reading.value,
                        deviation, "anomaly detected; session marked anomalous"
                    );
                } else {
                    debug!(reading = reading.value, deviation, "anomalous reading");
                }
            }
            CheckOutcome::Normal { reading, deviation } => {
                debug!(reading = reading.value, deviation, "reading within threshold");
            }
            CheckOutcome::NoSample(Some(e)) => debug!("sample skipped: {e}"),
            CheckOutcome::NoSample(None) => debug!("implausible sample discarded"),
            CheckOutcome::Suppressed | CheckOutcome::Disabled => {}
        }

        thread::sleep(config.tick);
    }

    report
}
