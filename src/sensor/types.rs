//! Sensor readings and the hardware capabilities the samplers drive.
//!
//! Readings are ephemeral: only the baseline derived from them outlives a
//! single check.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// A single instantaneous physical reading.
///
/// `value` is a distance in centimetres for the rangefinder and a raw
/// acceleration magnitude for the accelerometer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub value: f64,
    pub taken_at: DateTime<Utc>,
}

impl Reading {
    pub fn new(value: f64) -> Self {
        Self {
            value,
            taken_at: Utc::now(),
        }
    }
}

/// Which physical sensor drives anomaly detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorKind {
    /// Ultrasonic trigger/echo rangefinder on two GPIO lines
    Rangefinder,
    /// Three-axis accelerometer on an I2C bus
    Accelerometer,
    /// No sensor attached; detection stays disabled
    None,
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SensorKind::Rangefinder => write!(f, "rangefinder"),
            SensorKind::Accelerometer => write!(f, "accelerometer"),
            SensorKind::None => write!(f, "none"),
        }
    }
}

/// Logic level of a GPIO line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Low,
    High,
}

impl From<bool> for Level {
    fn from(high: bool) -> Self {
        if high {
            Level::High
        } else {
            Level::Low
        }
    }
}

/// Which echo transition a measurement was waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EchoEdge {
    Rise,
    Fall,
}

impl fmt::Display for EchoEdge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EchoEdge::Rise => write!(f, "rise"),
            EchoEdge::Fall => write!(f, "fall"),
        }
    }
}

/// Errors raised while talking to the sensor.
///
/// None of these are fatal: `Unavailable` disables detection, the others
/// skip a single tick.
#[derive(Debug, Error)]
pub enum SensorError {
    #[error("sensor unavailable: {0}")]
    Unavailable(String),
    #[error("timed out waiting for echo {edge}")]
    Timeout { edge: EchoEdge },
    #[error("sensor bus error: {0}")]
    Bus(String),
}

/// GPIO line access for the rangefinder.
///
/// Backends are opened by their own constructor; `close` releases any
/// claimed lines and must be safe to call more than once.
pub trait GpioChip: Send {
    fn claim_output(&mut self, pin: u32, initial: Level) -> Result<(), SensorError>;
    fn claim_input(&mut self, pin: u32) -> Result<(), SensorError>;
    fn write(&mut self, pin: u32, level: Level) -> Result<(), SensorError>;
    fn read(&mut self, pin: u32) -> Result<Level, SensorError>;
    fn close(&mut self);
}

/// Register access for the accelerometer.
pub trait I2cBus: Send {
    fn write_register(&mut self, register: u8, value: u8) -> Result<(), SensorError>;
    fn read_block(&mut self, register: u8, count: usize) -> Result<Vec<u8>, SensorError>;
    fn close(&mut self);
}

/// One measurement cycle against an opened sensor.
pub trait RangeSampler: Send {
    /// Take one reading.
    ///
    /// `Ok(None)` means the cycle completed but the value was implausible
    /// and has been discarded.
    fn sample(&mut self) -> Result<Option<Reading>, SensorError>;

    /// Release the underlying hardware handle.
    fn release(&mut self);

    fn kind(&self) -> SensorKind;
}

impl<S: RangeSampler + ?Sized> RangeSampler for Box<S> {
    fn sample(&mut self) -> Result<Option<Reading>, SensorError> {
        (**self).sample()
    }

    fn release(&mut self) {
        (**self).release()
    }

    fn kind(&self) -> SensorKind {
        (**self).kind()
    }
}
