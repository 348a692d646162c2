use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use shed::{ConnectionTracker, Coordinator, Listener};

mod config;
mod serve;
mod telemetry;

use config::{Cli, EchoConfig};
use serve::Acceptor;

fn main() -> Result<()> {
    let cli = Cli::parse();

    telemetry::init().map_err(|e| anyhow::anyhow!("Failed to init telemetry: {}", e))?;

    info!("shed-echo starting...");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!("Pid: {}", std::process::id());

    let config = EchoConfig::from_env().with_cli(&cli);
    config.log_config();

    // Inherited from the parent after a reload, otherwise bound fresh. Runs
    // before the runtime starts its worker threads since it clears LISTENER.
    let listener = shed::acquire(&config.addr)
        .with_context(|| format!("Failed to acquire listener for {}", config.addr))?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build Tokio runtime")?;

    runtime.block_on(serve_until_shutdown(config, listener))
}

async fn serve_until_shutdown(config: EchoConfig, listener: Listener) -> Result<()> {
    let mut signals = shed::install_signals().context("Failed to register signal handlers")?;

    // The coordinator owns the listener; the accept loop works on a duplicate
    // and stops when the coordinator releases the original.
    let acceptor = listener
        .try_clone()
        .and_then(Acceptor::from_listener)
        .context("Failed to prepare accept loop")?;
    let mut coordinator = Coordinator::new(config.addr.clone(), listener);

    let tracker = ConnectionTracker::new();
    let server = tokio::spawn(serve::run(
        acceptor,
        coordinator.stop_token(),
        tracker.clone(),
    ));

    let state = coordinator.run(&mut signals).await;
    info!(state = ?state, children = ?coordinator.children(), "Control loop exited");

    if let Err(e) = server.await {
        warn!(error = %e, "Accept loop task failed");
    }

    tracker.drain(config.drain_timeout).await;

    info!("shed-echo stopped");
    Ok(())
}
