//! Well-known configuration keys.
//!
//! The string spelling of each key is part of the persisted file format and
//! of the web UI form contract, so it must never change.

use std::fmt;
use std::str::FromStr;

/// Keys the bring-up sequence and its collaborators know about.
///
/// The store itself accepts any string key; this enum only pins the names
/// that have a meaning to the firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ConfigKey {
    DeviceName,
    AccessPointSecret,
    WifiConfigured,
    WifiEssid,
    WifiPassword,
    MqttActive,
    MqttHost,
    MqttPort,
    MqttUser,
    MqttPass,
    OtaActive,
    OtaPass,
}

impl ConfigKey {
    /// Every known key, in declaration order.
    pub const ALL: [ConfigKey; 12] = [
        ConfigKey::DeviceName,
        ConfigKey::AccessPointSecret,
        ConfigKey::WifiConfigured,
        ConfigKey::WifiEssid,
        ConfigKey::WifiPassword,
        ConfigKey::MqttActive,
        ConfigKey::MqttHost,
        ConfigKey::MqttPort,
        ConfigKey::MqttUser,
        ConfigKey::MqttPass,
        ConfigKey::OtaActive,
        ConfigKey::OtaPass,
    ];

    /// The key as it appears in the JSON file.
    pub const fn as_str(self) -> &'static str {
        match self {
            ConfigKey::DeviceName => "DeviceName",
            ConfigKey::AccessPointSecret => "APSecret",
            ConfigKey::WifiConfigured => "WifiConfigured",
            ConfigKey::WifiEssid => "WifiEssid",
            ConfigKey::WifiPassword => "WifiPassword",
            ConfigKey::MqttActive => "MQTTActive",
            ConfigKey::MqttHost => "MQTTHost",
            ConfigKey::MqttPort => "MQTTPort",
            ConfigKey::MqttUser => "MQTTUser",
            ConfigKey::MqttPass => "MQTTPass",
            ConfigKey::OtaActive => "OTAActive",
            ConfigKey::OtaPass => "OTAPass",
        }
    }

    /// Whether the value must be masked in logs.
    pub const fn is_secret(self) -> bool {
        matches!(
            self,
            ConfigKey::AccessPointSecret
                | ConfigKey::WifiPassword
                | ConfigKey::MqttPass
                | ConfigKey::OtaPass
        )
    }
}

impl AsRef<str> for ConfigKey {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a string does not name a known key.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown configuration key: {0}")]
pub struct UnknownKey(pub String);

impl FromStr for ConfigKey {
    type Err = UnknownKey;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ConfigKey::ALL
            .into_iter()
            .find(|key| key.as_str() == s)
            .ok_or_else(|| UnknownKey(s.to_string()))
    }
}
