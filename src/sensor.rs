//! Auxiliary presence sensors.
//!
//! A PIR (or ultrasonic) sensor gives the alert engine a second opinion
//! on occupancy. Readings are taken on their own sampler thread, never on
//! the frame-processing thread; the capture loop only ever looks at the
//! latest published reading.
//!
//! The built-in implementations are bench stubs. A GPIO-backed sensor is
//! an integration point: implement `PresenceSensor` or `RangeSensor` and
//! hand it to the sampler.

use anyhow::{anyhow, Result};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::control::{self, ControlStore};

/// Speed of sound used for echo-ranging, meters per second.
const SPEED_OF_SOUND_M_S: f64 = 340.0;
/// An echo pulse longer than this means the sensor is wedged.
const ECHO_TIMEOUT: Duration = Duration::from_secs(15);

const SAMPLE_INTERVAL: Duration = Duration::from_millis(200);

/// Binary presence sensor (PIR).
pub trait PresenceSensor: Send {
    fn read(&mut self) -> Result<bool>;
}

/// Distance sensor (ultrasonic). Readings in meters.
pub trait RangeSensor: Send {
    fn read(&mut self) -> Result<f64>;
}

/// Convert a round-trip echo pulse into a one-way distance in meters.
/// Errors on pulses past the timeout, which on real hardware means the
/// echo line never came back down.
pub fn distance_from_echo(pulse: Duration) -> Result<f64> {
    if pulse > ECHO_TIMEOUT {
        return Err(anyhow!(
            "echo pulse exceeded {}s, sensor not responding",
            ECHO_TIMEOUT.as_secs()
        ));
    }
    Ok(pulse.as_secs_f64() * SPEED_OF_SOUND_M_S / 2.0)
}

/// Fixed-answer presence sensor for tests and bench rigs. The answer can
/// be flipped from another thread.
pub struct StubPresenceSensor {
    state: Arc<AtomicBool>,
}

impl StubPresenceSensor {
    pub fn new(state: Arc<AtomicBool>) -> Self {
        Self { state }
    }
}

impl PresenceSensor for StubPresenceSensor {
    fn read(&mut self) -> Result<bool> {
        Ok(self.state.load(Ordering::Relaxed))
    }
}

/// Latest PIR reading, shared between the sampler and the capture loop.
/// Reads as `None` until the sampler has produced a value.
#[derive(Default)]
pub struct PirState {
    // 0 = no reading yet, 1 = clear, 2 = presence
    slot: AtomicU8,
}

impl PirState {
    pub fn latest(&self) -> Option<bool> {
        match self.slot.load(Ordering::Relaxed) {
            1 => Some(false),
            2 => Some(true),
            _ => None,
        }
    }

    fn publish(&self, reading: bool) {
        self.slot.store(if reading { 2 } else { 1 }, Ordering::Relaxed);
    }

    fn clear(&self) {
        self.slot.store(0, Ordering::Relaxed);
    }
}

/// Sampler thread: polls the sensor at a fixed interval while the
/// sensors control flag is on, publishing into a shared `PirState`.
pub struct SensorSampler {
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl SensorSampler {
    pub fn spawn(
        mut sensor: Box<dyn PresenceSensor>,
        state: Arc<PirState>,
        control: ControlStore,
    ) -> Result<Self> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let thread_shutdown = shutdown.clone();
        let join = thread::Builder::new()
            .name("pir-sampler".to_string())
            .spawn(move || {
                let mut failures = 0u32;
                while !thread_shutdown.load(Ordering::Relaxed) {
                    if control.flag(control::SENSORS_ENABLED) {
                        match sensor.read() {
                            Ok(reading) => {
                                failures = 0;
                                state.publish(reading);
                            }
                            Err(e) => {
                                failures += 1;
                                state.clear();
                                if failures == 1 {
                                    log::warn!("SensorSampler: read failed: {:#}", e);
                                }
                            }
                        }
                    } else {
                        state.clear();
                    }
                    thread::sleep(SAMPLE_INTERVAL);
                }
            })?;
        Ok(Self {
            shutdown,
            join: Some(join),
        })
    }

    pub fn stop(mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                log::warn!("SensorSampler: sampler thread panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn echo_distance_math() {
        // 10ms round trip at 340 m/s is 1.7m one way.
        let d = distance_from_echo(Duration::from_millis(10)).unwrap();
        assert!((d - 1.7).abs() < 1e-9);
    }

    #[test]
    fn echo_timeout_is_an_error() {
        assert!(distance_from_echo(Duration::from_secs(16)).is_err());
    }

    #[test]
    fn pir_state_starts_unknown() {
        let state = PirState::default();
        assert_eq!(state.latest(), None);
        state.publish(true);
        assert_eq!(state.latest(), Some(true));
        state.clear();
        assert_eq!(state.latest(), None);
    }

    #[test]
    fn sampler_publishes_when_enabled() {
        let raw = Arc::new(AtomicBool::new(true));
        let state = Arc::new(PirState::default());
        let flags = ControlStore::new();
        flags.set_flag(control::SENSORS_ENABLED, true);
        let sampler = SensorSampler::spawn(
            Box::new(StubPresenceSensor::new(raw.clone())),
            state.clone(),
            flags.clone(),
        )
        .unwrap();

        let mut seen = None;
        for _ in 0..50 {
            seen = state.latest();
            if seen.is_some() {
                break;
            }
            thread::sleep(Duration::from_millis(20));
        }
        assert_eq!(seen, Some(true));

        // Disabling the flag clears the published reading.
        flags.set_flag(control::SENSORS_ENABLED, false);
        for _ in 0..50 {
            if state.latest().is_none() {
                break;
            }
            thread::sleep(Duration::from_millis(20));
        }
        assert_eq!(state.latest(), None);
        sampler.stop();
    }
}
