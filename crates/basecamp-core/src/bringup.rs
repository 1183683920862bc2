//! The device bring-up sequence.
//!
//! Runs once per boot, before any network task is started:
//!
//! 1. Load the configuration, recovering from a missing or corrupt file
//! 2. Evaluate the boot counter and restart if it asks for it
//! 3. Make sure the setup network has a secret
//! 4. Derive hostname and network mode for the collaborators
//!
//! # Load failures
//!
//! A missing file is a normal first boot and is initialized empty. A file
//! that fails to parse is read a second time; if it is still corrupt a copy
//! is kept next to it before it is replaced, so the user's settings can be
//! recovered by hand. When storage cannot be mounted or read, nothing is
//! written at all: the device runs on a memory-only configuration, the boot
//! counter never reconfigures or formats, and the device falls back to
//! access point mode.

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::boot::{BootController, BootError, BootOutcome, BootThresholds, REBOOT_DELAY};
use crate::config::{ConfigError, Configuration};
use crate::counter::CounterStore;
use crate::device::{
    clean_hostname, format_mac, generate_secret, setup_ap_name, SystemInfo,
    DEFAULT_SECRET_LENGTH, MIN_SECRET_LENGTH,
};
use crate::fs::FileSystem;
use crate::keys::ConfigKey;
use crate::platform::Platform;
use crate::settings::{MqttSettings, NetworkMode, OtaSettings, WifiSettings};

/// Whether the setup network is protected by the access point secret.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SetupModeEncryption {
    /// Open setup network.
    #[default]
    None,
    /// WPA2 with the stored access point secret.
    Secured,
}

/// What to do with a configuration file that still fails to parse after
/// being re-read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CorruptConfigPolicy {
    /// Copy the file aside before resetting. If the copy fails nothing is
    /// written and the device runs memory-only.
    #[default]
    Preserve,
    /// Reset without keeping a copy.
    Discard,
}

/// Bring-up options.
#[derive(Debug, Clone)]
pub struct BringUpOptions {
    pub thresholds: BootThresholds,
    pub setup_mode_encryption: SetupModeEncryption,
    /// Use this secret instead of a generated one. Must be at least
    /// [`MIN_SECRET_LENGTH`] characters; it also forces
    /// [`SetupModeEncryption::Secured`].
    pub fixed_ap_secret: Option<String>,
    pub corrupt_policy: CorruptConfigPolicy,
    /// Attempts at loading before a corrupt or unreadable file is given up on.
    pub load_attempts: u32,
}

impl Default for BringUpOptions {
    fn default() -> Self {
        Self {
            thresholds: BootThresholds::default(),
            setup_mode_encryption: SetupModeEncryption::None,
            fixed_ap_secret: None,
            corrupt_policy: CorruptConfigPolicy::Preserve,
            load_attempts: 2,
        }
    }
}

/// How the configuration was obtained.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum LoadOutcome {
    Loaded,
    /// No file yet; an empty one was written.
    FirstBoot,
    /// The file was corrupt and has been reset.
    #[serde(rename_all = "camelCase")]
    Recovered { backup: Option<String> },
    /// Storage unusable; running on a memory-only configuration.
    MemoryOnly,
}

/// Errors that stop bring-up.
#[derive(Debug, Error)]
pub enum BringUpError {
    /// The boot evaluation failed after the configuration was loaded.
    #[error("boot evaluation failed: {source}")]
    Boot {
        load: LoadOutcome,
        #[source]
        source: BootError,
    },
}

impl BringUpError {
    /// How the configuration was obtained before the failure.
    pub fn load(&self) -> &LoadOutcome {
        match self {
            BringUpError::Boot { load, .. } => load,
        }
    }
}

/// Everything the network collaborators need once bring-up finished.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BringUpReport {
    pub load: LoadOutcome,
    pub boot: Option<BootOutcome>,
    pub hostname: String,
    pub mode: NetworkMode,
    pub setup_mode_encryption: SetupModeEncryption,
    pub wifi: WifiSettings,
    pub mqtt: MqttSettings,
    pub ota: OtaSettings,
    pub system: SystemInfo,
}

impl BringUpReport {
    /// Build the report from the current configuration.
    ///
    /// Does not touch the access point secret; see [`finish`].
    pub fn assemble<F: FileSystem>(
        platform: &impl Platform,
        config: &Configuration<F>,
        encryption: SetupModeEncryption,
        load: LoadOutcome,
        boot: Option<BootOutcome>,
    ) -> Self {
        let hostname = clean_hostname(config.get(ConfigKey::DeviceName));
        let wifi = WifiSettings::from_config(config);
        let mac = platform.mac_address();
        let ap_secret = match encryption {
            SetupModeEncryption::Secured => {
                Some(config.get(ConfigKey::AccessPointSecret).to_string())
            }
            SetupModeEncryption::None => None,
        };

        Self {
            load,
            boot,
            mode: wifi.mode(),
            setup_mode_encryption: encryption,
            mqtt: MqttSettings::from_config(config),
            ota: OtaSettings::from_config(config),
            system: SystemInfo {
                hostname: hostname.clone(),
                mac: format_mac(&mac, ":"),
                setup_ap_name: setup_ap_name(&mac),
                ap_secret,
            },
            hostname,
            wifi,
        }
    }
}

/// Outcome of [`bring_up`].
#[derive(Debug, Clone)]
pub enum BringUp {
    /// The boot evaluation restarted the device. Only observable on
    /// platforms whose restart returns.
    Restarted(BootOutcome),
    Ready(BringUpReport),
}

/// Run the bring-up sequence.
///
/// Fails only when the boot counter store cannot be opened.
pub fn bring_up<P, F, C>(
    platform: &mut P,
    config: &mut Configuration<F>,
    boot: &mut BootController<C>,
    options: &BringUpOptions,
) -> Result<BringUp, BringUpError>
where
    P: Platform,
    F: FileSystem,
    C: CounterStore,
{
    let load = load_configuration(config, options);
    debug!(?load, "configuration ready");
    config.dump();

    let outcome = match boot.evaluate(platform.reset_cause(), config) {
        Ok(outcome) => outcome,
        Err(source) => return Err(BringUpError::Boot { load, source }),
    };
    if outcome.reboot_required() {
        info!(decision = ?outcome.decision, "rebooting");
        platform.delay(REBOOT_DELAY);
        platform.restart();
        return Ok(BringUp::Restarted(outcome));
    }

    Ok(BringUp::Ready(finish(platform, config, options, load, Some(outcome))))
}

/// Last bring-up steps: ensure the access point secret and build the report.
///
/// Called by [`bring_up`], and directly by firmware that has to start
/// without a boot evaluation after [`BringUpError::Boot`].
pub fn finish<P: Platform, F: FileSystem>(
    platform: &mut P,
    config: &mut Configuration<F>,
    options: &BringUpOptions,
    load: LoadOutcome,
    boot: Option<BootOutcome>,
) -> BringUpReport {
    let encryption = ensure_ap_secret(platform, config, options);
    let report = BringUpReport::assemble(&*platform, config, encryption, load, boot);
    info!(hostname = %report.hostname, mode = ?report.mode, "bring-up complete");
    report
}

/// Load the configuration, applying the recovery policy on failure.
pub fn load_configuration<F: FileSystem>(
    config: &mut Configuration<F>,
    options: &BringUpOptions,
) -> LoadOutcome {
    if config.is_mem_only() {
        return LoadOutcome::MemoryOnly;
    }

    let attempts = options.load_attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        let err = match config.load() {
            Ok(()) => return LoadOutcome::Loaded,
            Err(err) => err,
        };

        match &err {
            ConfigError::FileMissing(path) => {
                info!(%path, "no configuration yet, initializing");
                if let Err(e) = config.reset() {
                    warn!("failed to write initial configuration: {}", e);
                }
                return LoadOutcome::FirstBoot;
            }
            ConfigError::Parse { .. } | ConfigError::StorageUnavailable(_) | ConfigError::Unreadable(_)
                if attempt < attempts =>
            {
                warn!(attempt, "loading configuration failed, retrying: {}", err);
            }
            ConfigError::Parse { .. } => return recover_corrupt(config, options.corrupt_policy),
            other => {
                error!("configuration storage unusable, running memory-only: {}", other);
                config.set_mem_only();
                return LoadOutcome::MemoryOnly;
            }
        }
    }
}

fn recover_corrupt<F: FileSystem>(
    config: &mut Configuration<F>,
    policy: CorruptConfigPolicy,
) -> LoadOutcome {
    error!("configuration file is corrupt");

    let backup = match policy {
        CorruptConfigPolicy::Discard => None,
        CorruptConfigPolicy::Preserve => match config.preserve_corrupt_file() {
            Ok(backup) => Some(backup),
            Err(e) => {
                error!("could not keep a copy of the corrupt file, leaving it untouched: {}", e);
                config.set_mem_only();
                return LoadOutcome::MemoryOnly;
            }
        },
    };

    if let Err(e) = config.reset() {
        error!("failed to reset corrupt configuration: {}", e);
    }
    LoadOutcome::Recovered { backup }
}

/// Generate or adopt the setup network secret and return the effective
/// encryption mode.
///
/// The secret lives in the configuration so it survives a WiFi reset.
fn ensure_ap_secret<F: FileSystem>(
    platform: &mut impl Platform,
    config: &mut Configuration<F>,
    options: &BringUpOptions,
) -> SetupModeEncryption {
    let fixed = options
        .fixed_ap_secret
        .as_deref()
        .filter(|secret| !secret.is_empty());
    let valid_fixed = fixed.filter(|secret| secret.chars().count() >= MIN_SECRET_LENGTH);
    if fixed.is_some() && valid_fixed.is_none() {
        warn!("fixed access point secret is too short, refusing it");
    }

    if valid_fixed.is_some() || !config.is_key_set(ConfigKey::AccessPointSecret) {
        let secret = match valid_fixed {
            Some(secret) => {
                info!("using fixed access point secret");
                secret.to_string()
            }
            None => {
                info!("generating access point secret");
                generate_secret(DEFAULT_SECRET_LENGTH, || platform.random_u32())
            }
        };
        config.set(ConfigKey::AccessPointSecret, secret);
        if !config.is_mem_only() {
            if let Err(e) = config.save() {
                warn!("failed to persist access point secret: {}", e);
            }
        }
    }

    if valid_fixed.is_some() {
        SetupModeEncryption::Secured
    } else {
        options.setup_mode_encryption
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boot::{ResetCause, ResetDecision};
    use crate::config::CONFIG_PATH;
    use crate::counter::MemoryCounterStore;
    use crate::fs::MemoryFileSystem;
    use crate::platform::SimulatedPlatform;

    fn controller(count: u32) -> BootController<MemoryCounterStore> {
        BootController::new(MemoryCounterStore::with_value(count), BootThresholds::default())
    }

    fn ready(result: BringUp) -> BringUpReport {
        match result {
            BringUp::Ready(report) => report,
            BringUp::Restarted(outcome) => panic!("unexpected restart: {:?}", outcome),
        }
    }

    #[test]
    fn test_first_boot_initializes_configuration() {
        let mut platform = SimulatedPlatform::new(ResetCause::Software);
        let mut config = Configuration::new(MemoryFileSystem::new(), CONFIG_PATH);
        let mut boot = controller(0);

        let report = ready(
            bring_up(&mut platform, &mut config, &mut boot, &BringUpOptions::default()).unwrap(),
        );

        assert_eq!(report.load, LoadOutcome::FirstBoot);
        assert_eq!(report.mode, NetworkMode::AccessPoint);
        assert_eq!(report.hostname, "basecamp-device");
        assert_eq!(config.get(ConfigKey::AccessPointSecret).len(), DEFAULT_SECRET_LENGTH);
        let stored = config.filesystem().file(CONFIG_PATH).unwrap();
        assert!(stored.contains("APSecret"));
    }

    #[test]
    fn test_existing_secret_is_kept() {
        let fs = MemoryFileSystem::with_file(
            CONFIG_PATH,
            r#"{"APSecret":"keepme12","DeviceName":"Porch Light","WifiConfigured":"true"}"#,
        );
        let mut platform = SimulatedPlatform::new(ResetCause::PowerOn);
        let mut config = Configuration::new(fs, CONFIG_PATH);
        let mut boot = controller(0);

        let report = ready(
            bring_up(&mut platform, &mut config, &mut boot, &BringUpOptions::default()).unwrap(),
        );

        assert_eq!(report.load, LoadOutcome::Loaded);
        assert_eq!(report.hostname, "porch-light");
        assert_eq!(report.mode, NetworkMode::Client);
        assert_eq!(config.get(ConfigKey::AccessPointSecret), "keepme12");
        assert_eq!(config.filesystem().write_count(), 0);
        assert_eq!(boot.counter().value(), Some(1));
    }

    #[test]
    fn test_fixed_secret_forces_encryption() {
        let mut platform = SimulatedPlatform::new(ResetCause::Software);
        let mut config = Configuration::new(MemoryFileSystem::new(), CONFIG_PATH);
        let options = BringUpOptions {
            fixed_ap_secret: Some("correct-horse".to_string()),
            ..Default::default()
        };

        let report =
            ready(bring_up(&mut platform, &mut config, &mut controller(0), &options).unwrap());

        assert_eq!(report.setup_mode_encryption, SetupModeEncryption::Secured);
        assert_eq!(report.system.ap_secret.as_deref(), Some("correct-horse"));
        assert_eq!(config.get(ConfigKey::AccessPointSecret), "correct-horse");
    }

    #[test]
    fn test_short_fixed_secret_is_refused() {
        let mut platform = SimulatedPlatform::new(ResetCause::Software);
        let mut config = Configuration::new(MemoryFileSystem::new(), CONFIG_PATH);
        let options = BringUpOptions {
            fixed_ap_secret: Some("short".to_string()),
            ..Default::default()
        };

        let report =
            ready(bring_up(&mut platform, &mut config, &mut controller(0), &options).unwrap());

        assert_eq!(report.setup_mode_encryption, SetupModeEncryption::None);
        assert_ne!(config.get(ConfigKey::AccessPointSecret), "short");
        assert!(config.is_key_set(ConfigKey::AccessPointSecret));
    }

    #[test]
    fn test_force_reconfigure_restarts() {
        let fs = MemoryFileSystem::with_file(CONFIG_PATH, r#"{"WifiConfigured":"True"}"#);
        let mut platform = SimulatedPlatform::new(ResetCause::PowerOn);
        let mut config = Configuration::new(fs, CONFIG_PATH);
        let mut boot = controller(3);

        let result =
            bring_up(&mut platform, &mut config, &mut boot, &BringUpOptions::default()).unwrap();

        match result {
            BringUp::Restarted(outcome) => {
                assert_eq!(outcome.decision, ResetDecision::ForceReconfigure)
            }
            BringUp::Ready(_) => panic!("expected a restart"),
        }
        assert_eq!(platform.restart_count(), 1);
        assert_eq!(platform.delays(), &[REBOOT_DELAY]);
    }

    #[test]
    fn test_corrupt_file_is_backed_up_and_reset() {
        let fs = MemoryFileSystem::with_file(CONFIG_PATH, r#"{"WifiEssid":"ho"#);
        let mut config = Configuration::new(fs, CONFIG_PATH);

        let outcome = load_configuration(&mut config, &BringUpOptions::default());

        assert_eq!(
            outcome,
            LoadOutcome::Recovered {
                backup: Some("/basecamp.json.corrupt".to_string())
            }
        );
        assert_eq!(
            config.filesystem().file("/basecamp.json.corrupt"),
            Some(r#"{"WifiEssid":"ho"#)
        );
        assert_eq!(config.filesystem().file(CONFIG_PATH), Some("{}"));
    }

    #[test]
    fn test_corrupt_file_discard_policy() {
        let fs = MemoryFileSystem::with_file(CONFIG_PATH, "garbage");
        let mut config = Configuration::new(fs, CONFIG_PATH);
        let options = BringUpOptions {
            corrupt_policy: CorruptConfigPolicy::Discard,
            ..Default::default()
        };

        let outcome = load_configuration(&mut config, &options);

        assert_eq!(outcome, LoadOutcome::Recovered { backup: None });
        assert_eq!(config.filesystem().file("/basecamp.json.corrupt"), None);
    }

    #[test]
    fn test_unreadable_storage_is_never_overwritten() {
        let mut fs = MemoryFileSystem::with_file(CONFIG_PATH, r#"{"WifiEssid":"home"}"#);
        fs.fail_reads = true;
        let mut config = Configuration::new(fs, CONFIG_PATH);

        let outcome = load_configuration(&mut config, &BringUpOptions::default());

        assert_eq!(outcome, LoadOutcome::MemoryOnly);
        assert!(config.is_mem_only());
        assert_eq!(config.filesystem().write_count(), 0);
        assert_eq!(
            config.filesystem().file(CONFIG_PATH),
            Some(r#"{"WifiEssid":"home"}"#)
        );
    }

    #[test]
    fn test_counter_unavailable_fails_bring_up() {
        let mut platform = SimulatedPlatform::new(ResetCause::PowerOn);
        let mut config = Configuration::new(MemoryFileSystem::new(), CONFIG_PATH);
        let mut boot = BootController::new(
            MemoryCounterStore {
                unavailable: true,
                ..Default::default()
            },
            BootThresholds::default(),
        );

        let err = bring_up(&mut platform, &mut config, &mut boot, &BringUpOptions::default())
            .unwrap_err();
        assert!(matches!(
            err,
            BringUpError::Boot {
                source: BootError::CounterStoreUnavailable(_),
                ..
            }
        ));
        assert_eq!(err.load(), &LoadOutcome::FirstBoot);
        assert_eq!(platform.restart_count(), 0);
    }

    #[test]
    fn test_finish_without_counter_keeps_load_outcome_and_secret() {
        let mut platform = SimulatedPlatform::new(ResetCause::PowerOn);
        let mut config = Configuration::new(MemoryFileSystem::new(), CONFIG_PATH);
        let mut boot = BootController::new(
            MemoryCounterStore {
                unavailable: true,
                ..Default::default()
            },
            BootThresholds::default(),
        );
        let options = BringUpOptions::default();

        let err = bring_up(&mut platform, &mut config, &mut boot, &options).unwrap_err();
        let report = finish(&mut platform, &mut config, &options, err.load().clone(), None);

        assert_eq!(report.load, LoadOutcome::FirstBoot);
        assert!(report.boot.is_none());
        assert!(config.is_key_set(ConfigKey::AccessPointSecret));
        assert!(config
            .filesystem()
            .file(CONFIG_PATH)
            .is_some_and(|text| text.contains("APSecret")));
    }

    #[test]
    fn test_unreadable_storage_with_raised_counter_keeps_flash() {
        let mut fs = MemoryFileSystem::with_file(
            CONFIG_PATH,
            r#"{"WifiConfigured":"True","WifiEssid":"home","WifiPassword":"secret"}"#,
        );
        fs.fail_reads = true;
        let mut platform = SimulatedPlatform::new(ResetCause::PowerOn);
        let mut config = Configuration::new(fs, CONFIG_PATH);
        let mut boot = controller(2);

        let report = ready(
            bring_up(&mut platform, &mut config, &mut boot, &BringUpOptions::default()).unwrap(),
        );

        assert_eq!(report.load, LoadOutcome::MemoryOnly);
        assert_eq!(
            report.boot.map(|outcome| outcome.decision),
            Some(ResetDecision::IncrementAndContinue { boot_count: 3 })
        );
        assert_eq!(report.mode, NetworkMode::AccessPoint);
        assert_eq!(platform.restart_count(), 0);
        assert_eq!(config.filesystem().format_count(), 0);
        assert_eq!(config.filesystem().write_count(), 0);
        assert_eq!(
            config.filesystem().file(CONFIG_PATH),
            Some(r#"{"WifiConfigured":"True","WifiEssid":"home","WifiPassword":"secret"}"#)
        );
    }
}
