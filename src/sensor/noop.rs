//! Backends for hosts with no sensor hardware access.
//!
//! These exist so the crate (and binary) build everywhere. Opening them
//! always fails with `SensorError::Unavailable`, which callers treat as
//! "anomaly detection disabled".

use crate::sensor::types::{GpioChip, I2cBus, Level, SensorError};

/// A GPIO backend that is never available.
#[derive(Debug)]
pub struct NoopGpio {
    _private: (),
}

impl NoopGpio {
    pub fn open() -> Result<Self, SensorError> {
        Err(SensorError::Unavailable(
            "no GPIO backend on this platform".to_string(),
        ))
    }
}

impl GpioChip for NoopGpio {
    fn claim_output(&mut self, pin: u32, _initial: Level) -> Result<(), SensorError> {
        Err(SensorError::Unavailable(format!("cannot claim GPIO {pin}")))
    }

    fn claim_input(&mut self, pin: u32) -> Result<(), SensorError> {
        Err(SensorError::Unavailable(format!("cannot claim GPIO {pin}")))
    }

    fn write(&mut self, _pin: u32, _level: Level) -> Result<(), SensorError> {
        Ok(())
    }

    fn read(&mut self, _pin: u32) -> Result<Level, SensorError> {
        Ok(Level::Low)
    }

    fn close(&mut self) {}
}

/// An I2C backend that is never available.
///
/// Register-level bus drivers are supplied by the host integration.
#[derive(Debug)]
pub struct NoopI2c {
    _private: (),
}

impl NoopI2c {
    pub fn open(address: u16) -> Result<Self, SensorError> {
        Err(SensorError::Unavailable(format!(
            "no I2C backend for device 0x{address:02x}"
        )))
    }
}

impl I2cBus for NoopI2c {
    fn write_register(&mut self, _register: u8, _value: u8) -> Result<(), SensorError> {
        Err(SensorError::Unavailable("no I2C backend".to_string()))
    }

    fn read_block(&mut self, _register: u8, _count: usize) -> Result<Vec<u8>, SensorError> {
        Err(SensorError::Unavailable("no I2C backend".to_string()))
    }

    fn close(&mut self) {}
}
