//! Hardware isolation daemon entry point.
//!
//! Wires the file-backed collaborators to the reconciliation manager
//! and runs the single-threaded event loop until shutdown.

use anyhow::{Context, Result};
use std::path::PathBuf;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use hwisod::config::{DaemonConfig, DEFAULT_CONFIG_PATH};
use hwisod::eco::EcoCoreStore;
use hwisod::errorlog::PathErrorLogIndex;
use hwisod::manager::Manager;
use hwisod::policy::FilePolicy;
use hwisod::publisher::LogPublisher;
use hwisod::registry::EntryRegistry;
use hwisod::reporter::LogReporter;
use hwisod::resolver::TableResolver;
use hwisod::store::FileGuardStore;
use hwisod::watcher::GuardFileWatcher;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("hwisod v{} starting", env!("CARGO_PKG_VERSION"));

    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    let config = DaemonConfig::load(&config_path)?;

    let store = FileGuardStore::new(&config.guard_file);
    let resolver = TableResolver::load(&config.devtree_file)
        .with_context(|| format!("failed to load {}", config.devtree_file.display()))?;
    let registry = EntryRegistry::new(
        &config.persist_dir,
        config.entry_path_root.clone(),
        Box::new(LogPublisher),
    )?;
    let eco_cores = EcoCoreStore::load(&config.eco_file);
    let policy = FilePolicy::new(config.isolation_enabled, &config.chassis_state_file);
    let error_logs = PathErrorLogIndex::new(config.error_log_root.clone());

    let mut manager = Manager::new(
        Box::new(store),
        Box::new(resolver),
        registry,
        eco_cores,
        Box::new(policy),
        Box::new(error_logs),
        Box::new(LogReporter),
        config.debounce(),
    );

    if let Err(e) = manager.restore() {
        warn!("restore pass failed, starting with an empty registry: {e:#}");
    }

    let (change_tx, change_rx) = mpsc::unbounded_channel();
    let watcher = GuardFileWatcher::new(&config.guard_file, change_tx)?;
    manager.set_watcher(watcher);

    // Held open for the lifetime of the daemon; the transport that
    // feeds it is wired up by the platform glue.
    let (_command_tx, command_rx) = mpsc::unbounded_channel();

    info!("hwisod ready");

    tokio::select! {
        _ = manager.run(command_rx, change_rx) => {}
        _ = tokio::signal::ctrl_c() => {
            info!("shutting down gracefully");
        }
    }

    Ok(())
}
