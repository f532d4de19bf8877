//! # Device Actuator Adapter
//!
//! Translates a brightness percentage into the PWM backend's native duty range
//! and back. This is the only module that touches hardware state.
//!
//! ```text
//! Level (0..=100) ──► native = round(p / 100 * native_max) ──► Actuator
//! Level (0..=100) ◄── round(native / native_max * 100)     ◄── Actuator
//! ```
//!
//! The mapping is lossy: with a native range of 1023 a round trip lands within
//! one percent of the requested level. Callers always read the level back
//! after a write instead of echoing the requested value.

pub mod pwm;
pub mod simulated;

use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

pub use pwm::RppalPwm;
pub use simulated::SimulatedPwm;

/// Raw duty-cycle access to a PWM output.
///
/// Implementations never fail once constructed; hardware is assumed present for
/// the whole process lifetime.
pub trait Actuator: Send {
    /// Upper bound of the native duty range (inclusive)
    fn native_max(&self) -> u16;
    fn set_duty(&mut self, duty: u16);
    fn duty(&self) -> u16;
}

#[derive(Debug, Error)]
pub enum ActuatorError {
    #[error("PWM initialisation failed: {0}")]
    Pwm(#[from] rppal::pwm::Error),

    #[error("Invalid actuator configuration: {0}")]
    Config(String),
}

/// Brightness in percent, guaranteed to lie in `0..=100`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Level(u8);

impl Level {
    pub const MAX: Level = Level(100);

    /// Returns `None` for anything outside `0..=100`.
    pub fn new(percent: i64) -> Option<Self> {
        u8::try_from(percent)
            .ok()
            .filter(|p| *p <= Self::MAX.0)
            .map(Level)
    }

    pub fn percent(self) -> u8 {
        self.0
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Percent-level facade over an [`Actuator`].
pub struct LampAdapter {
    actuator: Box<dyn Actuator>,
    settle: Duration,
}

impl LampAdapter {
    pub fn new(actuator: Box<dyn Actuator>, settle: Duration) -> Self {
        info!(
            "Lamp adapter ready (native max {}, settle {:?})",
            actuator.native_max(),
            settle
        );
        Self { actuator, settle }
    }

    /// Applies `level` and waits for the output to settle, so a following
    /// [`LampAdapter::level`] reads the applied value.
    pub async fn set_level(&mut self, level: Level) {
        let native = to_native(level, self.actuator.native_max());
        debug!("Setting lamp to {}% (native duty {})", level, native);
        self.actuator.set_duty(native);
        tokio::time::sleep(self.settle).await;
    }

    pub fn level(&self) -> Level {
        from_native(self.actuator.duty(), self.actuator.native_max())
    }
}

fn to_native(level: Level, native_max: u16) -> u16 {
    let native = (f64::from(level.percent()) / 100.0 * f64::from(native_max)).round();
    native.clamp(0.0, f64::from(native_max)) as u16
}

fn from_native(duty: u16, native_max: u16) -> Level {
    if native_max == 0 {
        return Level::default();
    }
    let duty = duty.min(native_max);
    let percent = (f64::from(duty) / f64::from(native_max) * 100.0).round() as u8;
    Level(percent.min(Level::MAX.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter(native_max: u16) -> (LampAdapter, SimulatedPwm) {
        let pwm = SimulatedPwm::new(native_max);
        let adapter = LampAdapter::new(Box::new(pwm.clone()), Duration::from_millis(50));
        (adapter, pwm)
    }

    #[test]
    fn level_accepts_only_percent_range() {
        assert_eq!(Level::new(0).map(Level::percent), Some(0));
        assert_eq!(Level::new(100).map(Level::percent), Some(100));
        assert_eq!(Level::new(-1), None);
        assert_eq!(Level::new(101), None);
        assert_eq!(Level::new(i64::MAX), None);
    }

    #[test]
    fn native_mapping_hits_both_ends() {
        assert_eq!(to_native(Level(0), 1023), 0);
        assert_eq!(to_native(Level(100), 1023), 1023);
        assert_eq!(to_native(Level(50), 1023), 512);
        assert_eq!(from_native(1023, 1023), Level(100));
        assert_eq!(from_native(0, 1023), Level(0));
    }

    #[test]
    fn out_of_range_native_duty_clamps() {
        assert_eq!(from_native(4000, 1023), Level(100));
        assert_eq!(from_native(10, 0), Level(0));
    }

    #[tokio::test(start_paused = true)]
    async fn round_trip_stays_within_one_percent() {
        for native_max in [1023u16, 1024, 255, 100] {
            let (mut lamp, _) = adapter(native_max);
            for p in 0..=100 {
                let level = Level::new(p).unwrap();
                lamp.set_level(level).await;
                let read = i64::from(lamp.level().percent());
                assert!(
                    (read - p).abs() <= 1,
                    "native_max {native_max}: set {p} read back {read}"
                );
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn set_level_waits_for_settle_delay() {
        let (mut lamp, pwm) = adapter(1023);
        let started = tokio::time::Instant::now();
        lamp.set_level(Level::new(30).unwrap()).await;
        assert!(started.elapsed() >= Duration::from_millis(50));
        assert_eq!(pwm.writes(), 1);
        assert_eq!(pwm.current_duty(), 307);
    }
}
