//! NVS (Non-Volatile Storage) boot counter for ESP32.
//!
//! NVS is a separate flash partition from SPIFFS, so the counter stays
//! readable while the configuration file is corrupt or being rewritten, and
//! survives a SPIFFS format.

use basecamp_core::counter::{CounterError, CounterStore, COUNTER_KEY, COUNTER_NAMESPACE};
use esp_idf_svc::nvs::{EspDefaultNvsPartition, EspNvs, NvsDefault};
use esp_idf_svc::sys::EspError;
use log::error;

/// Boot counter stored as a `u32` under `basecamp`/`bootcounter`.
///
/// A namespace that fails to open is remembered rather than returned, so
/// the failure surfaces as [`CounterError::Unavailable`] on first use and the
/// bring-up sequence can report it.
pub struct NvsCounterStore {
    nvs: Result<EspNvs<NvsDefault>, EspError>,
}

impl NvsCounterStore {
    /// Open the `basecamp` namespace read-write.
    pub fn open(partition: EspDefaultNvsPartition) -> Self {
        let nvs = EspNvs::new(partition, COUNTER_NAMESPACE, true);
        if let Err(e) = &nvs {
            error!("failed to open NVS namespace '{}': {}", COUNTER_NAMESPACE, e);
        }
        Self { nvs }
    }

    fn nvs(&mut self) -> Result<&mut EspNvs<NvsDefault>, CounterError> {
        self.nvs
            .as_mut()
            .map_err(|e| CounterError::Unavailable(e.to_string()))
    }
}

impl CounterStore for NvsCounterStore {
    fn read(&mut self) -> Result<u32, CounterError> {
        self.nvs()?
            .get_u32(COUNTER_KEY)
            .map(|value| value.unwrap_or(0))
            .map_err(|e| CounterError::Unavailable(e.to_string()))
    }

    fn write(&mut self, value: u32) -> Result<(), CounterError> {
        // set_u32 commits before returning
        self.nvs()?
            .set_u32(COUNTER_KEY, value)
            .map_err(|e| CounterError::Write(e.to_string()))
    }
}
