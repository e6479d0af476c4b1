//! EEA Agent binary - bootstrap and task wiring.
//!
//! The main task allocates the queues, replays any persisted bundle,
//! launches the supervisor and persistor threads and the broker worker
//! task, then idles until shutdown.

use anyhow::{Context, Result};
use clap::Parser;
use eea_agent::broker::BrokerWorker;
use eea_agent::observability::init_tracing;
use eea_agent::peripherals::SimulatedPeripherals;
use eea_agent::persist::{self, BundleStore, Persistor};
use eea_agent::supervisor::Supervisor;
use eea_core::{AgentConfig, bounded, slot};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Embedded edge agent: hosts compiled workflow bundles on the device.
#[derive(Parser)]
#[command(name = "eea-agent")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the agent configuration file (YAML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = init_tracing(cli.verbose)?;

    let config = match &cli.config {
        Some(path) => AgentConfig::from_yaml_file(path)?,
        None => AgentConfig::default(),
    };
    config.validate()?;
    let config = Arc::new(config);

    tracing::info!(
        device_id = %config.device_id,
        broker = %config.broker_host,
        port = config.broker_port,
        "starting embedded edge agent"
    );

    // The queues are the only state shared between tasks.
    let (out_tx, out_rx) = bounded("q_out", 10);
    let (in_tx, in_rx) = bounded("q_in", 10);
    let (bundle_tx, bundle_rx) = slot("q_bundle");
    let (persist_tx, persist_rx) = slot("q_persist");

    // Replay the persisted bundle (or announce a bare device) before the
    // supervisor takes its first tick.
    let store = BundleStore::new(&config.storage_dir);
    persist::bootstrap(&store, &bundle_tx, &out_tx, &config);

    let supervisor = Supervisor::new(
        Arc::clone(&config),
        in_rx,
        bundle_rx,
        out_tx.clone(),
        persist_tx,
        Arc::new(SimulatedPeripherals::default()),
    )?;
    supervisor.spawn().context("Failed to spawn supervisor thread")?;

    Persistor::new(
        store,
        persist_rx,
        Duration::from_millis(config.persist_interval_ms),
    )
    .spawn(config.persistor_stack_bytes)
    .context("Failed to spawn persistor thread")?;

    let worker = BrokerWorker::new(Arc::clone(&config), in_tx, bundle_tx, out_rx);
    tokio::spawn(worker.run());

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown requested");
    Ok(())
}
