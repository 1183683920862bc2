//! Boot resilience: the consecutive failed boot counter.
//!
//! Every power cycle or external reset counts as a boot attempt. Once the
//! device reaches the network, the WiFi layer calls
//! [`BootController::mark_boot_successful`] and the count drops back to
//! zero, so only *consecutive* failed boots accumulate.
//!
//! Evaluated once per boot:
//!
//! | reset cause           | counter after increment          | action                    |
//! |-----------------------|----------------------------------|---------------------------|
//! | software, watchdog... | -                                | counter := 0              |
//! | power-on / external   | > `reconfigure_after`            | WiFi unconfigured, reboot |
//! | power-on / external   | > `factory_reset_after`, no WiFi | format flash, reboot      |
//! | power-on / external   | otherwise                        | store counter, continue   |
//!
//! The second rule turns a stuck device back into an access point. The third
//! is a user gesture: power-cycling an unprovisioned device a few times in a
//! row wipes it.
//!
//! When the configuration could not be read, neither rule applies: the
//! device already runs without its settings and only counts the boot.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::Configuration;
use crate::counter::{CounterError, CounterStore};
use crate::fs::FileSystem;
use crate::keys::ConfigKey;

/// Failed boots tolerated before WiFi provisioning is forced again.
pub const RECONFIGURE_AFTER: u32 = 3;

/// Failed boots of an unprovisioned device before it is wiped.
pub const FACTORY_RESET_AFTER: u32 = 2;

/// Pause before a decided restart so pending flash writes settle.
pub const REBOOT_DELAY: Duration = Duration::from_millis(100);

/// Counter thresholds. Comparisons are strict: with `reconfigure_after = 3`
/// the fourth consecutive failed boot triggers reconfiguration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BootThresholds {
    pub reconfigure_after: u32,
    pub factory_reset_after: u32,
}

impl Default for BootThresholds {
    fn default() -> Self {
        Self {
            reconfigure_after: RECONFIGURE_AFTER,
            factory_reset_after: FACTORY_RESET_AFTER,
        }
    }
}

/// Why the chip last reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ResetCause {
    /// Power was applied.
    PowerOn,
    /// Reset from outside the firmware (EN button on most dev boards).
    ExternalReset,
    /// `esp_restart` or another deliberate software reset.
    Software,
    Watchdog,
    DeepSleep,
    Brownout,
    /// Any other ROM reset reason code.
    Other(u32),
}

impl ResetCause {
    /// Map an ESP32 ROM reset reason (`esp_rom_get_reset_reason`).
    pub fn from_rom_code(code: u32) -> Self {
        match code {
            1 => ResetCause::PowerOn,
            // RTC watchdog system reset, reported for the EN button
            16 => ResetCause::ExternalReset,
            3 | 12 => ResetCause::Software,
            5 => ResetCause::DeepSleep,
            7 | 8 | 9 | 11 | 13 => ResetCause::Watchdog,
            15 => ResetCause::Brownout,
            other => ResetCause::Other(other),
        }
    }

    /// Whether this boot may be the result of a boot loop the user is
    /// power-cycling through.
    pub fn counts_as_failed_boot(self) -> bool {
        matches!(self, ResetCause::PowerOn | ResetCause::ExternalReset)
    }
}

impl fmt::Display for ResetCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResetCause::PowerOn => f.write_str("power-on"),
            ResetCause::ExternalReset => f.write_str("external"),
            ResetCause::Software => f.write_str("software"),
            ResetCause::Watchdog => f.write_str("watchdog"),
            ResetCause::DeepSleep => f.write_str("deep-sleep"),
            ResetCause::Brownout => f.write_str("brownout"),
            ResetCause::Other(code) => write!(f, "{}", code),
        }
    }
}

/// Error returned for an unrecognized reset cause name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown reset cause: {0}")]
pub struct UnknownResetCause(pub String);

impl FromStr for ResetCause {
    type Err = UnknownResetCause;

    /// Accepts the [`fmt::Display`] names or a numeric ROM code.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "power-on" => Ok(ResetCause::PowerOn),
            "external" => Ok(ResetCause::ExternalReset),
            "software" => Ok(ResetCause::Software),
            "watchdog" => Ok(ResetCause::Watchdog),
            "deep-sleep" => Ok(ResetCause::DeepSleep),
            "brownout" => Ok(ResetCause::Brownout),
            other => other
                .parse::<u32>()
                .map(ResetCause::from_rom_code)
                .map_err(|_| UnknownResetCause(other.to_string())),
        }
    }
}

/// What to do with this boot. Recomputed every boot, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum ResetDecision {
    /// Not a counted reset: the counter is cleared.
    NormalBoot,
    /// Counted reset below every threshold.
    #[serde(rename_all = "camelCase")]
    IncrementAndContinue { boot_count: u32 },
    /// Too many failed boots: mark WiFi unconfigured and reboot.
    ForceReconfigure,
    /// Repeated resets of an unprovisioned device: wipe flash and reboot.
    FactoryReset,
}

impl ResetDecision {
    /// Counter value to persist for this decision.
    pub fn persisted_count(self) -> u32 {
        match self {
            ResetDecision::IncrementAndContinue { boot_count } => boot_count,
            _ => 0,
        }
    }

    pub fn requires_reboot(self) -> bool {
        matches!(
            self,
            ResetDecision::ForceReconfigure | ResetDecision::FactoryReset
        )
    }
}

/// Compute the decision for one boot.
///
/// `stored_count` is the counter as read from persistent storage, before
/// this boot is counted. `wifi_configured` is `None` when the configuration
/// could not be read; that state never reconfigures or wipes the device.
pub fn decide(
    cause: ResetCause,
    stored_count: u32,
    wifi_configured: Option<bool>,
    thresholds: &BootThresholds,
) -> ResetDecision {
    if !cause.counts_as_failed_boot() {
        return ResetDecision::NormalBoot;
    }

    let boot_count = stored_count.saturating_add(1);
    let Some(wifi_configured) = wifi_configured else {
        return ResetDecision::IncrementAndContinue { boot_count };
    };
    if boot_count > thresholds.reconfigure_after {
        ResetDecision::ForceReconfigure
    } else if boot_count > thresholds.factory_reset_after && !wifi_configured {
        ResetDecision::FactoryReset
    } else {
        ResetDecision::IncrementAndContinue { boot_count }
    }
}

/// Errors from the boot controller.
#[derive(Debug, Error)]
pub enum BootError {
    /// The counter region could not be opened. There is no fallback counter:
    /// treating this as a first boot would hide a storage fault.
    #[error("boot counter store unavailable: {0}")]
    CounterStoreUnavailable(#[source] CounterError),

    /// The counter could not be written.
    #[error("failed to persist boot counter: {0}")]
    CounterWriteFailure(#[source] CounterError),
}

/// Result of [`BootController::evaluate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BootOutcome {
    pub cause: ResetCause,
    pub decision: ResetDecision,
    /// The configuration write or format of this decision succeeded.
    pub action_applied: bool,
    /// The counter for this decision reached persistent storage.
    pub counter_persisted: bool,
}

impl BootOutcome {
    /// Reboot only when the decision reached flash: the configuration change
    /// was applied and the counter was reset. Otherwise the next boot would
    /// take the same path again and loop.
    pub fn reboot_required(&self) -> bool {
        self.decision.requires_reboot() && self.action_applied && self.counter_persisted
    }
}

/// Owns the counter store and applies [`decide`]'s decisions.
#[derive(Debug)]
pub struct BootController<C> {
    counter: C,
    thresholds: BootThresholds,
}

impl<C: CounterStore> BootController<C> {
    pub fn new(counter: C, thresholds: BootThresholds) -> Self {
        Self {
            counter,
            thresholds,
        }
    }

    pub fn thresholds(&self) -> &BootThresholds {
        &self.thresholds
    }

    /// Stored count of consecutive failed boots.
    pub fn boot_count(&mut self) -> Result<u32, BootError> {
        match self.counter.read() {
            Ok(count) => Ok(count),
            Err(CounterError::Corrupt(raw)) => {
                warn!("boot counter is corrupt ({}), treating it as 0", raw);
                Ok(0)
            }
            Err(e) => Err(BootError::CounterStoreUnavailable(e)),
        }
    }

    /// Evaluate this boot and apply the decision to `config` and the counter.
    ///
    /// The restart itself is left to the caller (see [`BootOutcome::reboot_required`]).
    /// A memory-only `config` means the stored settings are unknown, so the
    /// boot is only counted. A failed configuration write or format is logged
    /// and reported through [`BootOutcome::action_applied`]; the counter then
    /// keeps this boot so the next power cycle retries. A failed counter
    /// write is logged and reported through [`BootOutcome::counter_persisted`].
    pub fn evaluate<F: FileSystem>(
        &mut self,
        cause: ResetCause,
        config: &mut Configuration<F>,
    ) -> Result<BootOutcome, BootError> {
        debug!(%cause, "reset reason");
        let stored = self.boot_count()?;
        let wifi_configured = if config.is_mem_only() {
            warn!("configuration state unknown, boot is only counted");
            None
        } else {
            Some(config.is_flag_true(ConfigKey::WifiConfigured))
        };
        let decision = decide(cause, stored, wifi_configured, &self.thresholds);

        let action_applied = match decision {
            ResetDecision::NormalBoot => {
                debug!("reset not counted, clearing boot counter");
                true
            }
            ResetDecision::IncrementAndContinue { boot_count } => {
                info!("unsuccessful boots: {}", boot_count);
                true
            }
            ResetDecision::ForceReconfigure => {
                warn!("too many unsuccessful boots, resetting the WiFi configuration");
                config.set(ConfigKey::WifiConfigured, "False");
                match config.save() {
                    Ok(()) => true,
                    Err(e) => {
                        error!("failed to persist WiFi reconfiguration: {}", e);
                        false
                    }
                }
            }
            ResetDecision::FactoryReset => {
                warn!("factory reset was forced");
                match config.format_storage() {
                    Ok(()) => true,
                    Err(e) => {
                        error!("failed to format flash storage: {}", e);
                        false
                    }
                }
            }
        };

        let count = if action_applied {
            decision.persisted_count()
        } else {
            stored.saturating_add(1)
        };
        let counter_persisted = match self.counter.write(count) {
            Ok(()) => true,
            Err(e) => {
                error!("failed to persist boot counter, continuing boot: {}", e);
                false
            }
        };

        Ok(BootOutcome {
            cause,
            decision,
            action_applied,
            counter_persisted,
        })
    }

    /// Clear the counter once the device reached a running, connected state.
    pub fn mark_boot_successful(&mut self) -> Result<(), BootError> {
        debug!("boot successful, clearing boot counter");
        self.counter
            .write(0)
            .map_err(BootError::CounterWriteFailure)
    }

    pub fn counter(&self) -> &C {
        &self.counter
    }

    pub fn into_counter(self) -> C {
        self.counter
    }
}
