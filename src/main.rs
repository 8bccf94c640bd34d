// ------------------------------------------------------------
// Module declarations
// ------------------------------------------------------------
//
// Each module represents a well-defined responsibility:
//
// - config:    Configuration structs loaded from JSON
// - fields:    Field rules and extraction of the monitor payload
// - util:      Shared helpers (normalization, time, line protocol)
// - device:    Per-device session, transport and polling
// - collector: Accumulator contract and the gather orchestrator
// - metrics:   Runtime counters
//
mod config;
mod fields;
mod util;
mod device;
mod collector;
mod metrics;
// ------------------------------------------------------------
// External dependencies
// ------------------------------------------------------------

use rustls::crypto::{CryptoProvider, ring};

use config::Config;
use collector::{LineAccumulator, runner::BroadcastTools};
use metrics::METRICS;

use anyhow::Context;
use log::{info, warn};
use std::fs;
use std::time::Duration;
use tokio::time::sleep;

/// Time allowed for logging every device out on shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

// ------------------------------------------------------------
// Application entry point
// ------------------------------------------------------------
//
// Standalone host for the Broadcast Tools collector.
//
// Responsibilities:
// - Initialize cryptography backend (rustls)
// - Load configuration and set up logging
// - Gather on a fixed interval, writing line protocol to stdout
// - Log every device out on Ctrl-C
//
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --------------------------------------------------------
    // rustls >= 0.23 requires an explicit CryptoProvider
    // installation, once and before the first http client.
    // --------------------------------------------------------
    CryptoProvider::install_default(ring::default_provider())
        .expect("failed to install rustls CryptoProvider");

    let arg = std::env::args().nth(1);
    if arg.as_deref() == Some("--sample-config") {
        println!("// {}", BroadcastTools::DESCRIPTION);
        println!("{}", BroadcastTools::SAMPLE_CONFIG);
        return Ok(());
    }

    let config: Config = load_config(arg.as_deref().unwrap_or("config.json"))?;

    // RUST_LOG wins over the config flag
    let level = if config.debug() { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    if config.urls.is_empty() {
        warn!("no device urls configured, nothing will be gathered");
    }

    let mut plugin = BroadcastTools::from_config(&config)?;
    let acc = LineAccumulator;

    info!(
        "polling {} device(s) every {:?}",
        plugin.devices().len(),
        config.interval()
    );

    // --------------------------------------------------------
    // Periodic metrics reporter (low-noise)
    // --------------------------------------------------------
    tokio::spawn(async {
        loop {
            sleep(Duration::from_secs(60)).await;
            info!("[METRICS] {}", METRICS.summary());
        }
    });

    // --------------------------------------------------------
    // Gather loop
    //
    // A failed gather (initialization) is logged and retried on
    // the next tick. Ctrl-C also interrupts a cycle in progress.
    // --------------------------------------------------------
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("cannot listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    plugin
        .run(&acc, config.interval(), SHUTDOWN_GRACE, shutdown)
        .await;

    Ok(())
}

// ------------------------------------------------------------
// Configuration loader
// ------------------------------------------------------------
//
// Reads a JSON configuration file from disk and deserializes
// it into the strongly typed `Config` structure.
//
fn load_config(path: &str) -> anyhow::Result<Config> {
    let data = fs::read_to_string(path).with_context(|| format!("cannot read {path}"))?;
    let cfg = serde_json::from_str(&data).with_context(|| format!("invalid config {path}"))?;
    Ok(cfg)
}
