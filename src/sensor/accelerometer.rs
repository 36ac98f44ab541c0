//! Three-axis accelerometer read over I2C.
//!
//! Register layout follows the MPU-6050 family: a power management register
//! that must be cleared to wake the device, and six consecutive output
//! registers holding X, Y and Z as big-endian two's complement words.

use crate::sensor::types::{I2cBus, RangeSampler, Reading, SensorError, SensorKind};

/// Default 7-bit bus address (AD0 low).
pub const DEFAULT_ADDRESS: u16 = 0x68;

const PWR_MGMT_1: u8 = 0x6B;
const ACCEL_XOUT_H: u8 = 0x3B;
const AXIS_BLOCK_LEN: usize = 6;

/// Decode the raw X/Y/Z block.
pub fn decode_axes(block: &[u8]) -> Option<[i16; 3]> {
    if block.len() < AXIS_BLOCK_LEN {
        return None;
    }
    let word = |i: usize| i16::from_be_bytes([block[i], block[i + 1]]);
    Some([word(0), word(2), word(4)])
}

/// Euclidean magnitude of the three axes.
pub fn magnitude(axes: [i16; 3]) -> f64 {
    axes.iter()
        .map(|&a| {
            let a = f64::from(a);
            a * a
        })
        .sum::<f64>()
        .sqrt()
}

/// Accelerometer over any I2C backend.
pub struct Accelerometer<B: I2cBus> {
    bus: B,
    released: bool,
}

impl<B: I2cBus> Accelerometer<B> {
    /// Wake the device.
    pub fn open(mut bus: B) -> Result<Self, SensorError> {
        if let Err(e) = bus.write_register(PWR_MGMT_1, 0) {
            bus.close();
            return Err(SensorError::Unavailable(format!(
                "failed to wake accelerometer: {e}"
            )));
        }
        Ok(Self {
            bus,
            released: false,
        })
    }
}

impl<B: I2cBus> RangeSampler for Accelerometer<B> {
    fn sample(&mut self) -> Result<Option<Reading>, SensorError> {
        if self.released {
            return Err(SensorError::Unavailable(
                "accelerometer released".to_string(),
            ));
        }

        let block = self.bus.read_block(ACCEL_XOUT_H, AXIS_BLOCK_LEN)?;
        let axes = decode_axes(&block).ok_or_else(|| {
            SensorError::Bus(format!(
                "short axis read: {} of {AXIS_BLOCK_LEN} bytes",
                block.len()
            ))
        })?;

        // No plausibility window: raw magnitude has no fixed ceiling.
        Ok(Some(Reading::new(magnitude(axes))))
    }

    fn release(&mut self) {
        if !self.released {
            self.bus.close();
            self.released = true;
        }
    }

    fn kind(&self) -> SensorKind {
        SensorKind::Accelerometer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[derive(Default)]
    struct RegisterBus {
        written: HashMap<u8, u8>,
        block: Vec<u8>,
        refuse_writes: bool,
        closed: bool,
    }

    impl I2cBus for RegisterBus {
        fn write_register(&mut self, register: u8, value: u8) -> Result<(), SensorError> {
            if self.refuse_writes {
                return Err(SensorError::Bus("nack".to_string()));
            }
            self.written.insert(register, value);
            Ok(())
        }

        fn read_block(&mut self, _register: u8, count: usize) -> Result<Vec<u8>, SensorError> {
            Ok(self.block.iter().copied().take(count).collect())
        }

        fn close(&mut self) {
            self.closed = true;
        }
    }

    #[test]
    fn test_decode_big_endian_twos_complement() {
        let axes = decode_axes(&[0x00, 0x03, 0xFF, 0xFC, 0x80, 0x00]).unwrap();
        assert_eq!(axes, [3, -4, i16::MIN]);
    }

    #[test]
    fn test_decode_rejects_short_block() {
        assert!(decode_axes(&[0x00, 0x01, 0x02]).is_none());
    }

    #[test]
    fn test_magnitude() {
        assert!((magnitude([3, -4, 0]) - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_open_wakes_device_and_samples_magnitude() {
        let bus = RegisterBus {
            block: vec![0x00, 0x03, 0xFF, 0xFC, 0x00, 0x00],
            ..Default::default()
        };
        let mut sensor = Accelerometer::open(bus).unwrap();
        assert_eq!(sensor.bus.written.get(&PWR_MGMT_1), Some(&0));

        let reading = sensor.sample().unwrap().unwrap();
        assert!((reading.value - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_large_magnitude_is_not_discarded() {
        let bus = RegisterBus {
            block: vec![0x7F, 0xFF, 0x7F, 0xFF, 0x7F, 0xFF],
            ..Default::default()
        };
        let mut sensor = Accelerometer::open(bus).unwrap();
        let reading = sensor.sample().unwrap().unwrap();
        assert!(reading.value > 50_000.0);
    }

    #[test]
    fn test_short_read_is_bus_error() {
        let bus = RegisterBus {
            block: vec![0x00, 0x01],
            ..Default::default()
        };
        let mut sensor = Accelerometer::open(bus).unwrap();
        assert!(matches!(sensor.sample(), Err(SensorError::Bus(_))));
    }

    #[test]
    fn test_wake_failure_is_unavailable() {
        let bus = RegisterBus {
            refuse_writes: true,
            ..Default::default()
        };
        assert!(matches!(
            Accelerometer::open(bus),
            Err(SensorError::Unavailable(_))
        ));
    }
}
