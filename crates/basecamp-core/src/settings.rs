//! Typed views of the configuration for the network collaborators.
//!
//! The WiFi, MQTT and OTA services only ever read the configuration through
//! [`ConfigAccess`]; these structs gather the keys each of them needs and
//! apply the defaulting rules in one place.

use serde::Serialize;

use crate::config::ConfigAccess;
use crate::keys::ConfigKey;

/// Broker port used when `MQTTPort` is unset, zero or not a number.
pub const DEFAULT_MQTT_PORT: u16 = 1883;

/// Whether a flag value reads as true (`"true"`, any case).
pub fn is_true(value: &str) -> bool {
    value.eq_ignore_ascii_case("true")
}

/// Whether a feature switch is on: only `"false"` (any case) turns it off.
pub fn is_enabled(value: &str) -> bool {
    !value.eq_ignore_ascii_case("false")
}

/// How the device joins a network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum NetworkMode {
    /// Join the configured network as a station.
    Client,
    /// Host the setup network for provisioning.
    AccessPoint,
}

/// WiFi client settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WifiSettings {
    pub essid: String,

    #[serde(skip_serializing)]
    pub password: String,

    /// The user completed provisioning.
    pub configured: bool,
}

impl WifiSettings {
    pub fn from_config(config: &impl ConfigAccess) -> Self {
        Self {
            essid: config.get(ConfigKey::WifiEssid.as_str()).to_string(),
            password: config.get(ConfigKey::WifiPassword.as_str()).to_string(),
            configured: is_true(config.get(ConfigKey::WifiConfigured.as_str())),
        }
    }

    /// Client mode only once provisioning finished.
    pub fn mode(&self) -> NetworkMode {
        if self.configured {
            NetworkMode::Client
        } else {
            NetworkMode::AccessPoint
        }
    }
}

/// MQTT broker settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MqttSettings {
    pub active: bool,
    pub host: String,
    pub port: u16,
    pub user: String,

    #[serde(skip_serializing)]
    pub password: String,
}

impl MqttSettings {
    pub fn from_config(config: &impl ConfigAccess) -> Self {
        let port = config
            .get(ConfigKey::MqttPort.as_str())
            .trim()
            .parse::<u16>()
            .ok()
            .filter(|port| *port != 0)
            .unwrap_or(DEFAULT_MQTT_PORT);

        Self {
            active: is_enabled(config.get(ConfigKey::MqttActive.as_str())),
            host: config.get(ConfigKey::MqttHost.as_str()).to_string(),
            port,
            user: config.get(ConfigKey::MqttUser.as_str()).to_string(),
            password: config.get(ConfigKey::MqttPass.as_str()).to_string(),
        }
    }

    /// User and password, only when a user name is stored.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        if self.user.is_empty() {
            None
        } else {
            Some((&self.user, &self.password))
        }
    }
}

/// Over-the-air update settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OtaSettings {
    pub active: bool,

    #[serde(skip_serializing)]
    pub password: String,
}

impl OtaSettings {
    pub fn from_config(config: &impl ConfigAccess) -> Self {
        Self {
            active: is_enabled(config.get(ConfigKey::OtaActive.as_str())),
            password: config.get(ConfigKey::OtaPass.as_str()).to_string(),
        }
    }

    /// Uploads need a password only when one is stored.
    pub fn requires_password(&self) -> bool {
        !self.password.is_empty()
    }
}
