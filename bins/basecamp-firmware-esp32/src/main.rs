//! Basecamp bring-up firmware for ESP32.
//!
//! This binary requires the ESP32 Rust toolchain.
//! It will not compile with the standard Rust toolchain.
//!
//! Boot order: configuration and boot counter first, then the network.
//! MQTT, OTA and the web UI are started by the application on top of the
//! settings in the bring-up report.

use basecamp_core::bringup::{BringUp, BringUpOptions};
use basecamp_core::{bring_up, finish, BootController, Configuration, CONFIG_PATH};
use basecamp_esp32::{
    nvs::NvsCounterStore, platform::EspPlatform, spiffs::SpiffsFileSystem, wifi::start_network,
};
use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_svc::hal::delay::FreeRtos;
use esp_idf_svc::hal::peripherals::Peripherals;
use esp_idf_svc::nvs::EspDefaultNvsPartition;
use log::{error, info, warn};

fn main() -> anyhow::Result<()> {
    esp_idf_svc::sys::link_patches();
    esp_idf_svc::log::EspLogger::initialize_default();

    info!("Basecamp ESP32 {}", env!("CARGO_PKG_VERSION"));

    let peripherals = Peripherals::take()?;
    let sysloop = EspSystemEventLoop::take()?;
    let nvs_partition = EspDefaultNvsPartition::take()?;

    let mut platform = EspPlatform;
    let mut config = Configuration::new(SpiffsFileSystem::default(), CONFIG_PATH);
    let options = BringUpOptions::default();
    let mut boot = BootController::new(NvsCounterStore::open(nvs_partition), options.thresholds);

    let report = match bring_up(&mut platform, &mut config, &mut boot, &options) {
        Ok(BringUp::Ready(report)) => report,
        Ok(BringUp::Restarted(_)) => unreachable!("esp_restart does not return"),
        Err(e) => {
            // no counter, no loop protection: come up with what loaded
            error!("{}", e);
            finish(&mut platform, &mut config, &options, e.load().clone(), None)
        }
    };

    info!("{}", report.system);

    let _wifi = match start_network(&report, &mut boot, peripherals.modem, sysloop) {
        Ok(wifi) => Some(wifi),
        Err(e) => {
            // The boot counter stays raised; enough power cycles will
            // reopen the setup network.
            error!("network start failed: {:#}", e);
            None
        }
    };

    if report.mqtt.active {
        info!("MQTT broker {}:{}", report.mqtt.host, report.mqtt.port);
    }
    if report.ota.active && !report.ota.requires_password() {
        warn!("OTA updates are enabled without a password");
    }

    loop {
        FreeRtos::delay_ms(1000);
    }
}
