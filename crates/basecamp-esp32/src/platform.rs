//! ESP-IDF hardware primitives.

use std::time::Duration;

use basecamp_core::boot::ResetCause;
use basecamp_core::platform::Platform;
use esp_idf_svc::hal::delay::FreeRtos;
use esp_idf_svc::sys::{esp_efuse_mac_get_default, esp_random, esp_rom_get_reset_reason};
use log::error;

/// The running ESP32.
#[derive(Debug, Default, Clone, Copy)]
pub struct EspPlatform;

impl Platform for EspPlatform {
    fn reset_cause(&self) -> ResetCause {
        // ROM reason of the PRO CPU; the counted codes (1, 16) match the
        // RTC reset reasons of every ESP32 variant.
        let code = unsafe { esp_rom_get_reset_reason(0) };
        ResetCause::from_rom_code(code as u32)
    }

    fn delay(&mut self, duration: Duration) {
        FreeRtos::delay_ms(duration.as_millis() as u32);
    }

    fn restart(&mut self) {
        esp_idf_svc::hal::reset::restart();
    }

    fn random_u32(&mut self) -> u32 {
        unsafe { esp_random() }
    }

    fn mac_address(&self) -> [u8; 6] {
        let mut mac = [0u8; 6];
        let ret = unsafe { esp_efuse_mac_get_default(mac.as_mut_ptr()) };
        if ret != 0 {
            error!("failed to read factory MAC: {}", ret);
        }
        mac
    }
}
