//! Host simulator for the Basecamp bring-up sequence.
//!
//! Keeps the simulated flash filesystem and the boot counter in a state
//! directory, so consecutive invocations behave like consecutive boots:
//!
//! ```text
//! basecamp-host power-on                     # boot after a power cycle
//! basecamp-host software --network-up        # boot, then report a connection
//! basecamp-host software --set WifiEssid=home --set WifiConfigured=True
//! ```
//!
//! The state directory defaults to `./basecamp-state` and can be changed with
//! `--state-dir` or `BASECAMP_STATE_DIR`.

use std::path::PathBuf;

use anyhow::Context;
use basecamp_core::boot::ResetCause;
use basecamp_core::bringup::{BringUp, BringUpOptions};
use basecamp_core::counter::FileCounterStore;
use basecamp_core::fs::DirFileSystem;
use basecamp_core::platform::SimulatedPlatform;
use basecamp_core::{bring_up, BootController, Configuration, CONFIG_PATH};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "basecamp-host")]
#[command(about = "Simulate one Basecamp boot against a state directory")]
struct Args {
    /// Reset cause: power-on, external, software, watchdog, deep-sleep,
    /// brownout or a numeric ROM reset reason
    cause: ResetCause,

    /// Report a network connection after bring-up, clearing the boot counter
    #[arg(long)]
    network_up: bool,

    /// Store a setting after bring-up (repeatable)
    #[arg(long = "set", value_name = "KEY=VALUE", value_parser = parse_assignment)]
    assignments: Vec<(String, String)>,

    /// Directory holding the simulated flash and boot counter
    #[arg(long, env = "BASECAMP_STATE_DIR", default_value = "basecamp-state")]
    state_dir: PathBuf,
}

fn parse_assignment(pair: &str) -> Result<(String, String), String> {
    pair.split_once('=')
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .ok_or_else(|| format!("expected KEY=VALUE, got {:?}", pair))
}

/// Fold a random v4 UUID into a 32-bit RNG seed. All four words are mixed
/// so the seed does not come from the version and variant bits alone.
fn random_seed() -> u32 {
    let bits = uuid::Uuid::new_v4().as_u128();
    (0..4).fold(0u32, |seed, word| seed ^ (bits >> (32 * word)) as u32)
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,basecamp_core=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let state_dir = args.state_dir;
    std::fs::create_dir_all(&state_dir)
        .with_context(|| format!("creating {}", state_dir.display()))?;

    tracing::info!("Basecamp host simulator, state in {}", state_dir.display());

    let mut platform = SimulatedPlatform::with_seed(args.cause, random_seed());
    let mut config = Configuration::new(DirFileSystem::new(state_dir.join("spiffs")), CONFIG_PATH);
    let mut boot = BootController::new(
        FileCounterStore::new(state_dir.join("bootcounter")),
        Default::default(),
    );

    let report = match bring_up(&mut platform, &mut config, &mut boot, &BringUpOptions::default())
    {
        Ok(BringUp::Ready(report)) => report,
        Ok(BringUp::Restarted(outcome)) => {
            tracing::warn!("device restarted: {:?}", outcome.decision);
            println!("{}", serde_json::to_string_pretty(&outcome)?);
            return Ok(());
        }
        Err(e) => {
            tracing::error!("bring-up failed: {}", e);
            return Err(e.into());
        }
    };

    // Stand-in for the web UI's save handler.
    if !args.assignments.is_empty() {
        for (key, value) in &args.assignments {
            config.set(key, value.as_str());
        }
        config.save()?;
        tracing::info!("saved {} setting(s)", args.assignments.len());
    }

    // Stand-in for the WiFi layer obtaining an address.
    if args.network_up {
        boot.mark_boot_successful()?;
        tracing::info!("network up, boot counter cleared");
    }

    println!("{}", report.system);
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
