// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Headless data combining host.
//!
//! Loads host settings and persisted combiners from the config directory,
//! runs them against the in-memory reference fabric and optionally feeds
//! simulated tag values until Ctrl+C.

mod hub;
mod sim;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use edge_app_core::config::ConfigService;
use edge_app_core::events::EventLog;
use edge_app_core::settings::{HostSettings, HOST_SETTINGS_KEY};
use edge_combining::{CombinerRegistry, ConfigCombinerStore, Fabric};
use edge_config_fs::FsConfigStore;
use tokio::runtime::Handle;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::hub::MemoryFabric;
use crate::sim::TagSimulator;

#[derive(Parser, Debug)]
#[command(author, version, about = "Headless data combining host")]
struct Args {
    /// Directory holding the JSON config files (defaults to the platform config dir)
    #[arg(long)]
    config_dir: Option<PathBuf>,
    /// Log filter directive, e.g. `edge_combining=debug` (defaults to RUST_LOG, then `info`)
    #[arg(long)]
    log: Option<String>,
    /// Emit synthetic values for every tag referenced by a loaded combiner
    #[arg(long)]
    simulate_tags: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = match &args.log {
        Some(directive) => EnvFilter::try_new(directive).context("parse --log filter")?,
        None => EnvFilter::from_default_env().add_directive("info".parse()?),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let store = match &args.config_dir {
        Some(dir) => FsConfigStore::at(dir),
        None => FsConfigStore::new(),
    }
    .context("open config directory")?;
    info!(config_dir = %store.base().display(), "using config directory");

    // Settings are best-effort: a broken file falls back to defaults.
    let settings: HostSettings = ConfigService::new(store.clone())
        .load_or_init(HOST_SETTINGS_KEY)
        .unwrap_or_else(|err| {
            warn!(%err, "could not load host settings, using defaults");
            HostSettings::default()
        });

    let events = EventLog::new(settings.event_log_capacity);
    let hub = MemoryFabric::new();
    let fabric = Fabric::new(
        Arc::new(hub.clone()),
        Arc::new(hub.clone()),
        Arc::new(hub.clone()),
        Arc::new(hub.clone()),
        Handle::current(),
    )
    .with_client_id(settings.publisher_client_id.clone())
    .with_queue_read_max_bytes(settings.queue_read_max_bytes);

    let registry = CombinerRegistry::new(
        fabric,
        Arc::new(ConfigCombinerStore::new(store)),
        Arc::new(events.clone()),
    );
    registry
        .start()
        .await
        .context("restore persisted data combiners")?;
    let combiners = registry.get_all_combiners();
    info!(
        combiners = combiners.len(),
        tag_consumers = hub.tag_consumer_count(),
        "data combining host running"
    );

    let simulator = (args.simulate_tags || settings.simulate_tags).then(|| {
        let sim = TagSimulator::new(settings.simulate_interval_ms, &combiners);
        info!(tags = sim.tag_count(), "simulating tag traffic");
        tokio::spawn(sim.run(hub.clone()))
    });

    tokio::signal::ctrl_c()
        .await
        .context("install ctrl-c handler")?;
    info!("shutting down");

    if let Some(task) = simulator {
        task.abort();
    }
    registry.stop_all();
    for event in events.recent() {
        info!(
            severity = ?event.severity,
            source = %event.source,
            repeats = event.repeats,
            "{}",
            event.message
        );
    }
    Ok(())
}
