//! WiFi bring-up for ESP32.
//!
//! Joins the configured network in client mode, or opens the setup access
//! point while the device is unprovisioned. A successful connection clears
//! the boot counter, which is what closes the boot-loop detection.

use anyhow::{anyhow, bail, Result};
use basecamp_core::bringup::BringUpReport;
use basecamp_core::counter::CounterStore;
use basecamp_core::settings::{NetworkMode, WifiSettings};
use basecamp_core::BootController;
use esp_idf_svc::{
    eventloop::EspSystemEventLoop,
    hal::peripheral,
    wifi::{
        AccessPointConfiguration, AuthMethod, BlockingWifi, ClientConfiguration, Configuration,
        EspWifi,
    },
};
use log::{error, info, warn};

/// Start the network in the mode chosen by bring-up.
///
/// Returns the `EspWifi` instance, which must be kept alive for the
/// connection or access point to stay up.
pub fn start_network<C: CounterStore>(
    report: &BringUpReport,
    boot: &mut BootController<C>,
    modem: impl peripheral::Peripheral<P = esp_idf_svc::hal::modem::Modem> + 'static,
    sysloop: EspSystemEventLoop,
) -> Result<Box<EspWifi<'static>>> {
    let mut esp_wifi = EspWifi::new(modem, sysloop.clone(), None)?;
    esp_wifi.sta_netif_mut().set_hostname(&report.hostname)?;

    match report.mode {
        NetworkMode::Client => {
            connect_client(&mut esp_wifi, sysloop, &report.wifi)?;
            // Reaching the network means this boot succeeded.
            if let Err(e) = boot.mark_boot_successful() {
                error!("failed to clear boot counter: {}", e);
            }
        }
        NetworkMode::AccessPoint => {
            start_access_point(
                &mut esp_wifi,
                sysloop,
                &report.system.setup_ap_name,
                report.system.ap_secret.as_deref().unwrap_or(""),
            )?;
        }
    }

    Ok(Box::new(esp_wifi))
}

/// Connect to the configured network and wait for a DHCP lease.
fn connect_client(
    esp_wifi: &mut EspWifi<'static>,
    sysloop: EspSystemEventLoop,
    settings: &WifiSettings,
) -> Result<()> {
    if settings.essid.is_empty() {
        bail!("WiFi SSID cannot be empty");
    }

    let auth_method = if settings.password.is_empty() {
        info!("WiFi password is empty, using open network");
        AuthMethod::None
    } else {
        AuthMethod::WPA2Personal
    };

    let mut wifi = BlockingWifi::wrap(esp_wifi, sysloop)?;

    // Initial configuration for scanning
    wifi.set_configuration(&Configuration::Client(ClientConfiguration::default()))?;
    wifi.start()?;

    info!("Scanning for WiFi networks...");
    let channel = wifi
        .scan()?
        .into_iter()
        .find(|ap| ap.ssid == settings.essid.as_str())
        .map(|ap| {
            info!("Found '{}' on channel {}", settings.essid, ap.channel);
            ap.channel
        });

    if channel.is_none() {
        warn!("Network '{}' not found in scan, will try anyway", settings.essid);
    }

    wifi.set_configuration(&Configuration::Client(ClientConfiguration {
        ssid: settings
            .essid
            .as_str()
            .try_into()
            .map_err(|_| anyhow!("SSID too long (max 32 chars)"))?,
        password: settings
            .password
            .as_str()
            .try_into()
            .map_err(|_| anyhow!("Password too long (max 64 chars)"))?,
        channel,
        auth_method,
        ..Default::default()
    }))?;

    info!("Connecting to '{}'...", settings.essid);
    wifi.connect()?;

    info!("Waiting for DHCP lease...");
    wifi.wait_netif_up()?;

    let ip_info = wifi.wifi().sta_netif().get_ip_info()?;
    info!("WiFi connected!");
    info!("  IP address: {}", ip_info.ip);
    info!("  Gateway:    {}", ip_info.subnet.gateway);
    info!("  Netmask:    {}", ip_info.subnet.mask);
    Ok(())
}

/// Open the setup network. An empty secret starts an open network.
fn start_access_point(
    esp_wifi: &mut EspWifi<'static>,
    sysloop: EspSystemEventLoop,
    name: &str,
    secret: &str,
) -> Result<()> {
    let auth_method = if secret.is_empty() {
        AuthMethod::None
    } else {
        AuthMethod::WPA2Personal
    };

    let mut wifi = BlockingWifi::wrap(esp_wifi, sysloop)?;
    wifi.set_configuration(&Configuration::AccessPoint(AccessPointConfiguration {
        ssid: name
            .try_into()
            .map_err(|_| anyhow!("AP name too long (max 32 chars)"))?,
        password: secret
            .try_into()
            .map_err(|_| anyhow!("AP secret too long (max 64 chars)"))?,
        auth_method,
        ..Default::default()
    }))?;
    wifi.start()?;
    wifi.wait_netif_up()?;

    let ip_info = wifi.wifi().ap_netif().get_ip_info()?;
    info!("WiFi is NOT configured, setup network '{}' started", name);
    info!("  Setup address: {}", ip_info.ip);
    Ok(())
}
