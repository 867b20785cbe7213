//! Keyward Relay
//!
//! Brokers wallet capability requests from a page over an NDJSON stdio
//! link, opening an approver surface whenever a human has to decide.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};

use keyward_core::config::{PendingPolicy, default_database_path, load_config};
use keyward_relay::host::stdio;
use keyward_relay::price::HttpPriceSource;
use keyward_relay::relay::{RelayBuilder, RelaySettings};
use keyward_relay::storage::StateStore;
use keyward_relay::surface::ProcessLauncher;

#[derive(Parser, Debug)]
#[command(name = "keyward-relay")]
#[command(version, about = "Keyward relay - wallet request broker")]
struct Args {
    /// Settings file layered over the global settings
    #[arg(long, env = "KEYWARD_CONFIG")]
    config: Option<PathBuf>,

    /// Database file path
    #[arg(long, env = "KEYWARD_DB_PATH")]
    db_path: Option<PathBuf>,

    /// Log level filter for the relay (e.g. "info", "debug", "warn").
    #[arg(long, env = "KEYWARD_LOG_LEVEL")]
    log_level: Option<String>,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long, env = "KEYWARD_LOG_JSON")]
    log_json: bool,

    /// Program that renders the approver surface
    #[arg(long, env = "KEYWARD_SURFACE_COMMAND")]
    surface_command: Option<PathBuf>,

    /// What to do with a second request of a kind already awaiting approval
    #[arg(long, env = "KEYWARD_PENDING_POLICY", value_parser = ["supersede", "reject"])]
    pending_policy: Option<String>,

    /// Seconds of inactivity after which the session is no longer live
    #[arg(long, env = "KEYWARD_INACTIVITY_LIMIT_SECS")]
    inactivity_limit_secs: Option<u64>,
}

/// How long runtime shutdown waits on blocking work. A pending stdin read
/// never finishes on its own after a signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let result = runtime.block_on(serve(args));
    runtime.shutdown_timeout(SHUTDOWN_GRACE);
    result
}

async fn serve(args: Args) -> anyhow::Result<()> {

    let mut config = load_config(args.config.as_deref())?;
    if let Some(level) = args.log_level {
        config.relay.log_level = level;
    }
    if let Some(command) = args.surface_command {
        config.surface.command = command;
    }
    if let Some(policy) = args.pending_policy {
        config.pending.policy = policy.parse::<PendingPolicy>()?;
    }
    if let Some(secs) = args.inactivity_limit_secs {
        config.session.inactivity_limit_secs = secs;
    }

    keyward_core::tracing_init::init_tracing(
        &format!("keyward_relay={}", config.relay.log_level),
        args.log_json,
    );

    info!(
        version = env!("CARGO_PKG_VERSION"),
        surface = %config.surface.command.display(),
        policy = ?config.pending.policy,
        "Starting keyward-relay"
    );

    let db_path = match args.db_path.or_else(|| config.relay.database_path.clone()) {
        Some(path) => path,
        None => default_database_path()
            .ok_or_else(|| anyhow::anyhow!("Cannot determine home directory"))?,
    };
    let store = StateStore::open(&db_path).await?;

    let recovered = store.recover_stale_state().await?;
    if recovered.pending_discarded > 0 || recovered.surface_discarded {
        warn!(
            pending = recovered.pending_discarded,
            surface = recovered.surface_discarded,
            "Discarded state left by a previous relay"
        );
    }

    let launcher =
        ProcessLauncher::new(config.surface.command.clone(), config.surface.args.clone());
    let prices = HttpPriceSource::new(&config.exchange_rate)?;
    let settings = RelaySettings::from_config(&config, Some(db_path));
    let (relay, relay_task) =
        RelayBuilder::new(store, Arc::new(launcher), Arc::new(prices), settings).spawn();

    #[cfg(unix)]
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    #[cfg(unix)]
    let sigterm_future = sigterm.recv();
    #[cfg(not(unix))]
    let sigterm_future = std::future::pending::<Option<()>>();

    info!("Serving page link on stdio");
    let queue_capacity = config.relay.queue_capacity.max(1);

    tokio::select! {
        result = stdio::run(relay, tokio::io::stdin(), tokio::io::stdout(), queue_capacity) => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C shutdown signal");
        }
        _ = sigterm_future => {
            info!("Received SIGTERM shutdown signal");
        }
    }

    // Dropping the last handle stops the relay loop, which answers anything
    // still pending and closes the surface.
    let _ = relay_task.await;

    info!("Relay stopped");
    Ok(())
}
