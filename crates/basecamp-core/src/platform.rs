//! Hardware primitives consumed by the bring-up sequence.

use std::time::Duration;

use crate::boot::ResetCause;

/// The few hardware services bring-up needs.
///
/// On the ESP32 this is backed by ESP-IDF (`basecamp-esp32`); on a host the
/// [`SimulatedPlatform`] stands in for it.
pub trait Platform {
    /// Why the chip last reset.
    fn reset_cause(&self) -> ResetCause;

    /// Block for `duration`.
    fn delay(&mut self, duration: Duration);

    /// Restart the chip unconditionally. On hardware this never returns.
    fn restart(&mut self);

    /// Hardware entropy.
    fn random_u32(&mut self) -> u32;

    /// Factory MAC address.
    fn mac_address(&self) -> [u8; 6];
}

/// Platform for tests and the host simulator.
///
/// Restarts and delays are recorded instead of performed; randomness comes
/// from a seeded xorshift generator.
#[derive(Debug, Clone)]
pub struct SimulatedPlatform {
    pub cause: ResetCause,
    pub mac: [u8; 6],
    restarts: usize,
    delays: Vec<Duration>,
    state: u32,
}

impl SimulatedPlatform {
    pub fn new(cause: ResetCause) -> Self {
        Self::with_seed(cause, 0x2545_f491)
    }

    pub fn with_seed(cause: ResetCause, seed: u32) -> Self {
        Self {
            cause,
            mac: [0x24, 0x0a, 0xc4, 0x00, 0x00, 0x01],
            restarts: 0,
            delays: Vec::new(),
            // xorshift never leaves zero
            state: if seed == 0 { 1 } else { seed },
        }
    }

    pub fn restart_count(&self) -> usize {
        self.restarts
    }

    pub fn delays(&self) -> &[Duration] {
        &self.delays
    }
}

impl Platform for SimulatedPlatform {
    fn reset_cause(&self) -> ResetCause {
        self.cause
    }

    fn delay(&mut self, duration: Duration) {
        self.delays.push(duration);
    }

    fn restart(&mut self) {
        self.restarts += 1;
    }

    fn random_u32(&mut self) -> u32 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.state = x;
        x
    }

    fn mac_address(&self) -> [u8; 6] {
        self.mac
    }
}
