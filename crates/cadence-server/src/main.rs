//! cadence server binary.
//!
//! Reads `cadence.toml` (or the path given with `--config`), opens the SQLite
//! store, and runs the lifecycle scheduler and consumers until interrupted.
//!
//! # Adding a user
//!
//! ```
//! cargo run -p cadence-server -- --add-user alice@example.com
//! ```

mod settings;

use std::{path::PathBuf, sync::Arc};

use anyhow::Context as _;
use cadence_core::store::EventStore as _;
use cadence_engine::{LifecycleConsumer, LifecycleScheduler, LogNotifier, MemoryTimeQueue};
use cadence_store_sqlite::SqliteStore;
use clap::Parser;
use tokio::sync::watch;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use crate::settings::ServerConfig;

#[derive(Parser)]
#[command(author, version, about = "Cadence event lifecycle server")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "cadence.toml")]
  config: PathBuf,

  /// Register a user with this email, print its id, and exit.
  #[arg(long, value_name = "EMAIL")]
  add_user: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();
  let cfg = ServerConfig::load(&cli.config)?;

  let store = SqliteStore::open(&cfg.store_path)
    .await
    .with_context(|| format!("failed to open store at {:?}", cfg.store_path))?;

  // Helper mode: register a user and exit.
  if let Some(email) = cli.add_user {
    let user = store
      .add_user(email)
      .await
      .context("failed to add user")?;
    println!("{}", user.user_id);
    return Ok(());
  }

  let store = Arc::new(store);
  let bus = Arc::new(store.signal_bus());
  let queue = Arc::new(MemoryTimeQueue::new());

  let scheduler = Arc::new(LifecycleScheduler::new(
    Arc::clone(&store),
    queue,
    Arc::clone(&bus),
    cfg.scheduler,
  ));
  let consumer = Arc::new(LifecycleConsumer::new(
    store,
    bus,
    Arc::new(LogNotifier),
    cfg.consumer,
    cfg.notify,
  ));

  let (shutdown_tx, shutdown_rx) = watch::channel(false);
  let mut handles = scheduler.spawn(shutdown_rx.clone());
  handles.extend(consumer.spawn(shutdown_rx));
  tracing::info!(store = ?cfg.store_path, "cadence running");

  tokio::signal::ctrl_c()
    .await
    .context("failed to listen for ctrl-c")?;
  tracing::info!("shutting down");
  shutdown_tx.send(true).ok();

  for handle in handles {
    handle.await.context("background task panicked")?;
  }
  Ok(())
}
