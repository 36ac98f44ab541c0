//! Physical sensor access for anomaly detection.
//!
//! Samplers are built on top of small hardware capability traits
//! (`GpioChip`, `I2cBus`) so the measurement logic is independent of the
//! driver binding in use.

pub mod accelerometer;
pub mod baseline;
pub mod noop;
pub mod rangefinder;
pub mod status;
pub mod types;

#[cfg(target_os = "linux")]
pub mod sysfs;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types
pub use accelerometer::Accelerometer;
pub use baseline::{Baseline, BaselineTracker, CheckOutcome, NoBaseline};
pub use rangefinder::{Rangefinder, RangefinderPins};
pub use status::{Probe, StatusReport};
pub use types::{GpioChip, I2cBus, Level, RangeSampler, Reading, SensorError, SensorKind};

use crate::config::SensorConfig;

/// Platform GPIO backend
#[cfg(target_os = "linux")]
pub type SystemGpio = sysfs::SysfsGpio;

/// Platform GPIO backend
#[cfg(not(target_os = "linux"))]
pub type SystemGpio = noop::NoopGpio;

/// Platform I2C backend
pub type SystemI2c = noop::NoopI2c;

/// Open the configured sensor on the platform backends.
pub fn open_sampler(config: &SensorConfig) -> Result<Box<dyn RangeSampler>, SensorError> {
    match config.kind {
        SensorKind::Rangefinder => {
            let chip = SystemGpio::open()?;
            let pins = RangefinderPins {
                trigger: config.trigger_pin,
                echo: config.echo_pin,
            };
            Ok(Box::new(Rangefinder::open(chip, pins)?))
        }
        SensorKind::Accelerometer => {
            let bus = SystemI2c::open(config.i2c_address)?;
            Ok(Box::new(Accelerometer::open(bus)?))
        }
        SensorKind::None => Err(SensorError::Unavailable(
            "no sensor configured".to_string(),
        )),
    }
}
