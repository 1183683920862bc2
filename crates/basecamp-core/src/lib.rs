//! # basecamp-core
//!
//! Device bring-up core for ESP32-class IoT devices.
//!
//! This crate provides:
//! - A flat string-to-string configuration store persisted as JSON
//! - The boot-failure counter and its reset/reconfigure state machine
//! - The bring-up sequence tying both together
//! - Device identity helpers (hostname, access point name and secret)
//! - Typed settings views for the WiFi, MQTT and OTA collaborators
//!
//! This crate is intentionally runtime-agnostic and contains no async code.
//! Flash storage, the boot counter region and the reset/restart primitives are
//! reached through traits, so the same logic runs on ESP-IDF and on a host.

pub mod boot;
pub mod bringup;
pub mod config;
pub mod counter;
pub mod device;
pub mod fs;
pub mod keys;
pub mod platform;
pub mod settings;

pub use boot::{BootController, BootError, BootOutcome, BootThresholds, ResetCause, ResetDecision};
pub use bringup::{bring_up, finish, BringUp, BringUpError, BringUpOptions, BringUpReport};
pub use config::{ConfigAccess, ConfigError, Configuration, CONFIG_PATH};
pub use counter::{CounterError, CounterStore};
pub use fs::{FileSystem, FsError};
pub use keys::ConfigKey;
pub use platform::Platform;
pub use settings::{MqttSettings, NetworkMode, OtaSettings, WifiSettings};
