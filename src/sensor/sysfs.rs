//! Linux GPIO access through the sysfs interface (`/sys/class/gpio`).
//!
//! Each claimed line is exported on demand and unexported again on close.

use crate::sensor::types::{GpioChip, Level, SensorError};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

const SYSFS_GPIO_ROOT: &str = "/sys/class/gpio";

/// GPIO chip backed by sysfs files.
#[derive(Debug)]
pub struct SysfsGpio {
    root: PathBuf,
    exported: Vec<u32>,
}

impl SysfsGpio {
    /// Open the system GPIO class directory.
    pub fn open() -> Result<Self, SensorError> {
        Self::with_root(SYSFS_GPIO_ROOT)
    }

    /// Open a GPIO class directory at a custom location.
    pub fn with_root(root: impl AsRef<Path>) -> Result<Self, SensorError> {
        let root = root.as_ref().to_path_buf();
        if !root.join("export").exists() {
            return Err(SensorError::Unavailable(format!(
                "GPIO sysfs interface not found at {}",
                root.display()
            )));
        }
        Ok(Self {
            root,
            exported: Vec::new(),
        })
    }

    fn line_dir(&self, pin: u32) -> PathBuf {
        self.root.join(format!("gpio{pin}"))
    }

    fn export(&mut self, pin: u32, direction: &str) -> Result<(), SensorError> {
        let dir = self.line_dir(pin);
        if !dir.exists() {
            fs::write(self.root.join("export"), pin.to_string()).map_err(|e| {
                SensorError::Unavailable(format!("failed to export GPIO {pin}: {e}"))
            })?;
        }
        fs::write(dir.join("direction"), direction).map_err(|e| {
            SensorError::Unavailable(format!("failed to set GPIO {pin} direction: {e}"))
        })?;
        if !self.exported.contains(&pin) {
            self.exported.push(pin);
        }
        Ok(())
    }
}

impl GpioChip for SysfsGpio {
    fn claim_output(&mut self, pin: u32, initial: Level) -> Result<(), SensorError> {
        // "low"/"high" set direction and initial value in one write
        let direction = match initial {
            Level::Low => "low",
            Level::High => "high",
        };
        self.export(pin, direction)
    }

    fn claim_input(&mut self, pin: u32) -> Result<(), SensorError> {
        self.export(pin, "in")
    }

    fn write(&mut self, pin: u32, level: Level) -> Result<(), SensorError> {
        let value = match level {
            Level::Low => "0",
            Level::High => "1",
        };
        fs::write(self.line_dir(pin).join("value"), value)
            .map_err(|e| SensorError::Bus(format!("GPIO {pin} write failed: {e}")))
    }

    fn read(&mut self, pin: u32) -> Result<Level, SensorError> {
        let raw = fs::read_to_string(self.line_dir(pin).join("value"))
            .map_err(|e| SensorError::Bus(format!("GPIO {pin} read failed: {e}")))?;
        Ok(Level::from(raw.trim() == "1"))
    }

    fn close(&mut self) {
        for pin in self.exported.drain(..) {
            if let Err(e) = fs::write(self.root.join("unexport"), pin.to_string()) {
                debug!("failed to unexport GPIO {pin}: {e}");
            }
        }
    }
}

impl Drop for SysfsGpio {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_class_dir(pins: &[u32]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("export"), "").unwrap();
        fs::write(dir.path().join("unexport"), "").unwrap();
        for pin in pins {
            let line = dir.path().join(format!("gpio{pin}"));
            fs::create_dir(&line).unwrap();
            fs::write(line.join("direction"), "in").unwrap();
            fs::write(line.join("value"), "0").unwrap();
        }
        dir
    }

    #[test]
    fn test_missing_sysfs_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            SysfsGpio::with_root(dir.path()),
            Err(SensorError::Unavailable(_))
        ));
    }

    #[test]
    fn test_claim_sets_direction() {
        let dir = fake_class_dir(&[23, 24]);
        let mut gpio = SysfsGpio::with_root(dir.path()).unwrap();

        gpio.claim_output(23, Level::Low).unwrap();
        gpio.claim_input(24).unwrap();

        let out = fs::read_to_string(dir.path().join("gpio23/direction")).unwrap();
        let inp = fs::read_to_string(dir.path().join("gpio24/direction")).unwrap();
        assert_eq!(out, "low");
        assert_eq!(inp, "in");
    }

    #[test]
    fn test_write_then_read_value() {
        let dir = fake_class_dir(&[23]);
        let mut gpio = SysfsGpio::with_root(dir.path()).unwrap();
        gpio.claim_output(23, Level::Low).unwrap();

        gpio.write(23, Level::High).unwrap();
        assert_eq!(gpio.read(23).unwrap(), Level::High);

        gpio.write(23, Level::Low).unwrap();
        assert_eq!(gpio.read(23).unwrap(), Level::Low);
    }

    #[test]
    fn test_close_unexports_claimed_lines() {
        let dir = fake_class_dir(&[24]);
        let mut gpio = SysfsGpio::with_root(dir.path()).unwrap();
        gpio.claim_input(24).unwrap();

        gpio.close();
        let unexported = fs::read_to_string(dir.path().join("unexport")).unwrap();
        assert_eq!(unexported, "24");
    }
}
