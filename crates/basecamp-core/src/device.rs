//! Device identity: hostname, setup network name and setup network secret.

use std::fmt;

use serde::Serialize;

/// Hostname used while no device name is configured.
pub const DEFAULT_HOSTNAME: &str = "basecamp-device";

/// Shortest secret the ESP32 soft AP accepts for WPA2.
pub const MIN_SECRET_LENGTH: usize = 8;

/// Length of generated access point secrets.
pub const DEFAULT_SECRET_LENGTH: usize = 8;

/// Characters used for generated secrets. Look-alikes (`0`/`O`, `1`/`l`/`I`,
/// `i`) are left out so the secret can be typed from a serial console.
pub const SECRET_ALPHABET: &[u8] =
    b"abcdefghjkmnopqrstuvwxyzABCDEFGHJKMNPQRSTUVWXYZ23456789.-,:$/";

/// Derive a DHCP/OTA hostname from the user-facing device name.
///
/// The name is lowercased and every character that is not an ASCII letter
/// or digit becomes `-`.
pub fn clean_hostname(device_name: &str) -> String {
    if device_name.is_empty() {
        return DEFAULT_HOSTNAME.to_string();
    }
    device_name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect()
}

/// Format a MAC address as lowercase hex pairs joined by `delimiter`.
pub fn format_mac(mac: &[u8; 6], delimiter: &str) -> String {
    mac.iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(delimiter)
}

/// Name of the setup network, derived from the hardware MAC.
pub fn setup_ap_name(mac: &[u8; 6]) -> String {
    format!("ESP32_{}", format_mac(mac, ""))
}

/// Generate a random secret of at least [`MIN_SECRET_LENGTH`] characters.
///
/// `next_random` supplies raw entropy (`esp_random` on the device).
pub fn generate_secret(length: usize, mut next_random: impl FnMut() -> u32) -> String {
    let length = length.max(MIN_SECRET_LENGTH);
    (0..length)
        .map(|_| {
            let index = next_random() as usize % SECRET_ALPHABET.len();
            SECRET_ALPHABET[index] as char
        })
        .collect()
}

/// Summary printed once bring-up finishes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemInfo {
    pub hostname: String,
    pub mac: String,
    pub setup_ap_name: String,

    /// Shown on the console so the user can join the setup network.
    #[serde(skip_serializing)]
    pub ap_secret: Option<String>,
}

impl fmt::Display for SystemInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Hostname: {}", self.hostname)?;
        writeln!(f, "MAC-Address: {}", self.mac)?;
        writeln!(f, "Setup network: {}", self.setup_ap_name)?;
        if let Some(secret) = &self.ap_secret {
            writeln!(f, "*******************************************")?;
            writeln!(f, "* ACCESS POINT PASSWORD: {}", secret)?;
            writeln!(f, "*******************************************")?;
        }
        Ok(())
    }
}
