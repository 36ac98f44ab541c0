//! Ultrasonic rangefinder driven over two GPIO lines.
//!
//! A measurement pulses the trigger line, then times how long the echo line
//! stays high. Each of the two echo waits has its own timeout so a missing
//! or stuck sensor degrades to a failed sample instead of a hang.

use crate::sensor::types::{EchoEdge, GpioChip, Level, RangeSampler, Reading, SensorError, SensorKind};
use std::time::{Duration, Instant};
use tracing::debug;

/// Half the speed of sound in cm/s (343 m/s, round trip).
pub const HALF_SPEED_OF_SOUND_CM_PER_S: f64 = 17_150.0;

/// Closest distance the sensor reports reliably.
pub const MIN_DISTANCE_CM: f64 = 2.0;

/// Furthest distance the sensor reports reliably.
pub const MAX_DISTANCE_CM: f64 = 400.0;

/// Independent timeout for each echo wait.
pub const ECHO_TIMEOUT: Duration = Duration::from_millis(100);

const SETTLE_LOW: Duration = Duration::from_micros(2);
const TRIGGER_PULSE: Duration = Duration::from_micros(10);

/// GPIO line numbers for the trigger and echo pins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangefinderPins {
    pub trigger: u32,
    pub echo: u32,
}

impl Default for RangefinderPins {
    fn default() -> Self {
        Self {
            trigger: 23,
            echo: 24,
        }
    }
}

/// Convert an echo pulse width into a distance in centimetres.
pub fn distance_cm(pulse: Duration) -> f64 {
    pulse.as_secs_f64() * HALF_SPEED_OF_SOUND_CM_PER_S
}

/// Keep a distance only if it lies inside the trustworthy window.
pub fn plausible_distance(cm: f64) -> Option<f64> {
    (MIN_DISTANCE_CM..=MAX_DISTANCE_CM).contains(&cm).then_some(cm)
}

/// Rangefinder over any GPIO backend.
pub struct Rangefinder<G: GpioChip> {
    chip: G,
    pins: RangefinderPins,
    echo_timeout: Duration,
    released: bool,
}

impl<G: GpioChip> Rangefinder<G> {
    /// Claim the trigger and echo lines on an opened chip.
    ///
    /// On failure the chip is closed before the error is returned.
    pub fn open(mut chip: G, pins: RangefinderPins) -> Result<Self, SensorError> {
        let claimed = chip
            .claim_output(pins.trigger, Level::Low)
            .and_then(|_| chip.claim_input(pins.echo));

        if let Err(e) = claimed {
            chip.close();
            return Err(match e {
                SensorError::Unavailable(msg) => SensorError::Unavailable(msg),
                other => SensorError::Unavailable(other.to_string()),
            });
        }

        Ok(Self {
            chip,
            pins,
            echo_timeout: ECHO_TIMEOUT,
            released: false,
        })
    }

    /// Override the per-edge echo timeout.
    pub fn with_echo_timeout(mut self, timeout: Duration) -> Self {
        self.echo_timeout = timeout;
        self
    }

    /// Fire the trigger and return the measured echo pulse width.
    pub fn measure_pulse(&mut self) -> Result<Duration, SensorError> {
        self.fire_trigger()?;

        let rise = self.wait_for(Level::High, EchoEdge::Rise, Instant::now())?;
        let fall = self.wait_for(Level::Low, EchoEdge::Fall, rise)?;

        Ok(fall.duration_since(rise))
    }

    fn fire_trigger(&mut self) -> Result<(), SensorError> {
        self.chip.write(self.pins.trigger, Level::Low)?;
        spin_for(SETTLE_LOW);
        self.chip.write(self.pins.trigger, Level::High)?;
        spin_for(TRIGGER_PULSE);
        self.chip.write(self.pins.trigger, Level::Low)
    }

    fn wait_for(
        &mut self,
        level: Level,
        edge: EchoEdge,
        since: Instant,
    ) -> Result<Instant, SensorError> {
        loop {
            if self.chip.read(self.pins.echo)? == level {
                return Ok(Instant::now());
            }
            if since.elapsed() > self.echo_timeout {
                return Err(SensorError::Timeout { edge });
            }
        }
    }
}

impl<G: GpioChip> RangeSampler for Rangefinder<G> {
    fn sample(&mut self) -> Result<Option<Reading>, SensorError> {
        if self.released {
            return Err(SensorError::Unavailable("rangefinder released".to_string()));
        }

        let pulse = self.measure_pulse()?;
        let cm = distance_cm(pulse);

        match plausible_distance(cm) {
            Some(cm) => Ok(Some(Reading::new(cm))),
            None => {
                debug!(distance_cm = cm, "discarding implausible rangefinder reading");
                Ok(None)
            }
        }
    }

    fn release(&mut self) {
        if !self.released {
            self.chip.close();
            self.released = true;
        }
    }

    fn kind(&self) -> SensorKind {
        SensorKind::Rangefinder
    }
}

/// Busy-wait for sub-scheduler-tick delays.
fn spin_for(duration: Duration) {
    let start = Instant::now();
    while start.elapsed() < duration {
        std::hint::spin_loop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    /// Echo line that rises `delay` after the trigger falls and stays high
    /// for `pulse`.
    struct ScriptedGpio {
        delay: Option<Duration>,
        pulse: Option<Duration>,
        trigger_high: bool,
        trigger_fell_at: Option<Instant>,
        fail_claim: bool,
        closed: Arc<AtomicBool>,
    }

    impl ScriptedGpio {
        fn echo(delay: Duration, pulse: Duration) -> Self {
            Self {
                delay: Some(delay),
                pulse: Some(pulse),
                trigger_high: false,
                trigger_fell_at: None,
                fail_claim: false,
                closed: Arc::new(AtomicBool::new(false)),
            }
        }

        fn silent() -> Self {
            Self {
                delay: None,
                ..Self::echo(Duration::ZERO, Duration::ZERO)
            }
        }

        fn stuck_high() -> Self {
            Self {
                pulse: None,
                ..Self::echo(Duration::ZERO, Duration::ZERO)
            }
        }
    }

    impl GpioChip for ScriptedGpio {
        fn claim_output(&mut self, _pin: u32, _initial: Level) -> Result<(), SensorError> {
            if self.fail_claim {
                return Err(SensorError::Unavailable("line busy".to_string()));
            }
            Ok(())
        }

        fn claim_input(&mut self, _pin: u32) -> Result<(), SensorError> {
            Ok(())
        }

        fn write(&mut self, _pin: u32, level: Level) -> Result<(), SensorError> {
            if self.trigger_high && level == Level::Low {
                self.trigger_fell_at = Some(Instant::now());
            }
            self.trigger_high = level == Level::High;
            Ok(())
        }

        fn read(&mut self, _pin: u32) -> Result<Level, SensorError> {
            let (Some(fell), Some(delay)) = (self.trigger_fell_at, self.delay) else {
                return Ok(Level::Low);
            };
            let elapsed = fell.elapsed();
            let high = match self.pulse {
                Some(pulse) => elapsed >= delay && elapsed < delay + pulse,
                None => elapsed >= delay,
            };
            Ok(Level::from(high))
        }

        fn close(&mut self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_distance_conversion() {
        let cm = distance_cm(Duration::from_millis(1));
        assert!((cm - 17.15).abs() < 1e-9);
    }

    #[test]
    fn test_plausibility_window() {
        assert_eq!(plausible_distance(1.99), None);
        assert_eq!(plausible_distance(2.0), Some(2.0));
        assert_eq!(plausible_distance(400.0), Some(400.0));
        assert_eq!(plausible_distance(400.01), None);
        assert_eq!(plausible_distance(-5.0), None);
    }

    #[test]
    fn test_sample_measures_echo_pulse() {
        // 100 cm round trip
        let pulse = Duration::from_micros(5_831);
        let gpio = ScriptedGpio::echo(Duration::from_micros(200), pulse);
        let mut sensor = Rangefinder::open(gpio, RangefinderPins::default()).unwrap();

        let reading = sensor.sample().unwrap().expect("reading in range");
        assert!(
            (reading.value - 100.0).abs() < 5.0,
            "unexpected distance {}",
            reading.value
        );
    }

    #[test]
    fn test_out_of_range_reading_is_discarded() {
        // ~500 cm
        let gpio = ScriptedGpio::echo(Duration::ZERO, Duration::from_micros(29_155));
        let mut sensor = Rangefinder::open(gpio, RangefinderPins::default()).unwrap();

        assert!(sensor.sample().unwrap().is_none());
    }

    #[test]
    fn test_missing_echo_times_out_on_rise() {
        let mut sensor = Rangefinder::open(ScriptedGpio::silent(), RangefinderPins::default())
            .unwrap()
            .with_echo_timeout(Duration::from_millis(5));

        match sensor.sample() {
            Err(SensorError::Timeout { edge }) => assert_eq!(edge, EchoEdge::Rise),
            other => panic!("expected rise timeout, got {other:?}"),
        }
    }

    #[test]
    fn test_stuck_echo_times_out_on_fall() {
        let mut sensor = Rangefinder::open(ScriptedGpio::stuck_high(), RangefinderPins::default())
            .unwrap()
            .with_echo_timeout(Duration::from_millis(5));

        match sensor.sample() {
            Err(SensorError::Timeout { edge }) => assert_eq!(edge, EchoEdge::Fall),
            other => panic!("expected fall timeout, got {other:?}"),
        }
    }

    #[test]
    fn test_claim_failure_closes_chip() {
        let mut gpio = ScriptedGpio::silent();
        gpio.fail_claim = true;
        let closed = gpio.closed.clone();

        let result = Rangefinder::open(gpio, RangefinderPins::default());
        assert!(matches!(result, Err(SensorError::Unavailable(_))));
        assert!(closed.load(Ordering::SeqCst));
    }

    #[test]
    fn test_release_closes_once_and_disables_sampling() {
        let gpio = ScriptedGpio::silent();
        let closed = gpio.closed.clone();
        let mut sensor = Rangefinder::open(gpio, RangefinderPins::default()).unwrap();

        sensor.release();
        assert!(closed.load(Ordering::SeqCst));
        assert!(matches!(sensor.sample(), Err(SensorError::Unavailable(_))));
    }
}
