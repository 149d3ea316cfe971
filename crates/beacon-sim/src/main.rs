//! # beacon-sim
//!
//! Scenario runner for the beacon-bridge core.
//!
//! This binary:
//! - Loads the beacon-bridge configuration (file plus `BEACON_*` overrides)
//! - Drives the core against a simulated beacon subsystem
//! - Prints every consumer signal as a JSON line on stdout
//!
//! ## Running
//!
//! ```bash
//! # Default configuration path
//! cargo run --package beacon-sim
//!
//! # Explicit configuration, JSON logs
//! BEACON_CONFIG=./beacon.toml BEACON_LOGGING__FORMAT=json ./beacon-sim
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use beacon_core::mock::MockGateway;
use beacon_core::{BeaconConfig, BeaconCore};
use tracing::info;

mod logging;
mod report;
mod scenario;

use report::Reporter;
use scenario::Scenario;

/// Environment variable naming the configuration file.
const CONFIG_ENV: &str = "BEACON_CONFIG";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path =
        std::env::var_os(CONFIG_ENV).map_or_else(BeaconConfig::default_path, PathBuf::from);
    let config = BeaconConfig::load_or_default(&config_path)
        .with_context(|| format!("could not load {}", config_path.display()))?;

    logging::init(&config.logging)?;

    let mut reporter = Reporter::new(std::io::stdout().lock());
    info!(
        run_id = %reporter.run_id(),
        config = %config_path.display(),
        setting_timeout_secs = config.connection.setting_timeout_secs,
        "Starting beacon-sim"
    );

    let gateway = Arc::new(MockGateway::with_auto_connect());
    let core = BeaconCore::new(gateway.clone(), &config);

    let outcome = Scenario::new(&core, &gateway, &mut reporter).run().await;
    core.shutdown();
    outcome
}
