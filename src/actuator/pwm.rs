use super::{Actuator, ActuatorError};
use rppal::pwm::{Channel, Polarity, Pwm};
use tracing::{error, info, warn};

/// Hardware PWM output on a Raspberry Pi, driven through rppal.
///
/// rppal works with a duty cycle fraction (`0.0..=1.0`); this backend exposes
/// it as an integer native range `0..=native_max` so the lamp adapter sees the
/// same quantisation as a microcontroller PWM peripheral.
pub struct RppalPwm {
    pwm: Pwm,
    native_max: u16,
    // Last duty written, reported when the sysfs read-back fails
    last_duty: u16,
}

impl RppalPwm {
    pub fn open(channel: u8, frequency_hz: f64, native_max: u16) -> Result<Self, ActuatorError> {
        let channel = match channel {
            0 => Channel::Pwm0,
            1 => Channel::Pwm1,
            other => {
                return Err(ActuatorError::Config(format!(
                    "PWM channel {other} does not exist (expected 0 or 1)"
                )))
            }
        };
        if native_max == 0 {
            return Err(ActuatorError::Config("native_max must be positive".to_string()));
        }

        info!(
            "Opening hardware PWM {:?} at {} Hz (native max {})",
            channel, frequency_hz, native_max
        );
        let pwm = Pwm::with_frequency(channel, frequency_hz, 0.0, Polarity::Normal, true)?;

        Ok(Self {
            pwm,
            native_max,
            last_duty: 0,
        })
    }
}

impl Actuator for RppalPwm {
    fn native_max(&self) -> u16 {
        self.native_max
    }

    fn set_duty(&mut self, duty: u16) {
        let duty = duty.min(self.native_max);
        let fraction = f64::from(duty) / f64::from(self.native_max);
        match self.pwm.set_duty_cycle(fraction) {
            Ok(()) => self.last_duty = duty,
            Err(e) => error!("Failed to write PWM duty cycle {}: {}", fraction, e),
        }
    }

    fn duty(&self) -> u16 {
        match self.pwm.duty_cycle() {
            Ok(fraction) => {
                let native = (fraction.clamp(0.0, 1.0) * f64::from(self.native_max)).round();
                native as u16
            }
            Err(e) => {
                warn!("Failed to read PWM duty cycle, reporting last write: {}", e);
                self.last_duty
            }
        }
    }
}
