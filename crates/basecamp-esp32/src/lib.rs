//! ESP32-specific backends for Basecamp bring-up.
//!
//! This crate implements the storage and hardware traits of `basecamp-core`
//! on top of ESP-IDF:
//! - [`spiffs::SpiffsFileSystem`]: the configuration file on SPIFFS
//! - [`nvs::NvsCounterStore`]: the boot counter in NVS
//! - [`platform::EspPlatform`]: reset reason, restart, entropy, MAC
//! - [`wifi::start_network`]: client or setup access point
//!
//! # Example
//!
//! ```ignore
//! use basecamp_core::{bring_up, BootController, Configuration, CONFIG_PATH};
//! use basecamp_esp32::{nvs::NvsCounterStore, platform::EspPlatform, spiffs::SpiffsFileSystem};
//!
//! let mut config = Configuration::new(SpiffsFileSystem::default(), CONFIG_PATH);
//! let mut boot = BootController::new(NvsCounterStore::open(nvs_partition), Default::default());
//! let result = bring_up(&mut EspPlatform, &mut config, &mut boot, &Default::default())?;
//! ```

pub mod nvs;
pub mod platform;
pub mod spiffs;
pub mod wifi;
