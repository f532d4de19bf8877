use super::Actuator;
use std::sync::atomic::{AtomicU16, AtomicUsize, Ordering};
use std::sync::Arc;

/// In-memory PWM output for bench runs without hardware.
///
/// Clones share state, so a clone kept outside the lamp adapter works as a
/// probe for the applied duty and the number of writes.
#[derive(Debug, Clone)]
pub struct SimulatedPwm {
    native_max: u16,
    duty: Arc<AtomicU16>,
    writes: Arc<AtomicUsize>,
}

impl SimulatedPwm {
    pub fn new(native_max: u16) -> Self {
        Self {
            native_max,
            duty: Arc::new(AtomicU16::new(0)),
            writes: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn current_duty(&self) -> u16 {
        self.duty.load(Ordering::SeqCst)
    }

    /// Number of `set_duty` calls so far.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

impl Actuator for SimulatedPwm {
    fn native_max(&self) -> u16 {
        self.native_max
    }

    fn set_duty(&mut self, duty: u16) {
        self.duty.store(duty.min(self.native_max), Ordering::SeqCst);
        self.writes.fetch_add(1, Ordering::SeqCst);
    }

    fn duty(&self) -> u16 {
        self.current_duty()
    }
}
