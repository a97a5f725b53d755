//! folio-sweepd: the loan maintenance daemon.
//!
//! Reads `folio.toml` (or the path given with `--config`), opens the shared
//! SQLite store, and runs the maintenance sweep on an interval: settling
//! overrun loans and sending due-soon and overdue reminders. `--once` runs
//! a single pass and exits, for cron-style deployments.

use std::{
  path::{Path, PathBuf},
  sync::Arc,
};

use anyhow::Context as _;
use clap::Parser;
use folio_core::{
  clock::SystemClock,
  collab::{Notification, Notifier},
};
use folio_engine::{Engine, EngineConfig};
use folio_store_sqlite::SqliteStore;
use serde::Deserialize;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "Folio loan maintenance daemon")]
struct Cli {
  /// TOML configuration file to load.
  #[arg(short, long, default_value = "folio.toml")]
  config: PathBuf,

  /// Run one sweep pass and exit.
  #[arg(long)]
  once: bool,
}

/// Runtime daemon configuration, deserialised from `folio.toml`.
#[derive(Debug, Clone, Deserialize)]
struct SweepdConfig {
  store_path: PathBuf,

  /// Seconds between sweep passes.
  #[serde(default = "default_interval_secs")]
  sweep_interval_secs: u64,

  #[serde(default)]
  engine: EngineConfig,
}

fn default_interval_secs() -> u64 { 300 }

/// Logs every notification instead of delivering it. Deployments that front
/// the engine with an application server wire a real sink there; the
/// daemon's reminders at least land in the logs.
struct LogNotifier;

impl Notifier for LogNotifier {
  fn notify(&self, notification: Notification) {
    tracing::info!(
      user = %notification.user_id,
      kind = notification.kind.as_str(),
      event_key = %notification.event_key,
      "{}: {}",
      notification.title,
      notification.body,
    );
  }
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

  let settings = config::Config::builder()
    .add_source(config::File::from(cli.config).required(false))
    .add_source(config::Environment::with_prefix("FOLIO"))
    .build()
    .context("failed to read config file")?;
  let cfg: SweepdConfig = settings
    .try_deserialize()
    .context("failed to deserialise SweepdConfig")?;

  let store_path = expand_tilde(&cfg.store_path);
  let store = SqliteStore::open(&store_path)
    .await
    .with_context(|| format!("failed to open store at {store_path:?}"))?;

  let engine = Engine::new(store, SystemClock)
    .with_config(cfg.engine)
    .with_notifier(Arc::new(LogNotifier));

  if cli.once {
    engine.sweep().await.context("sweep failed")?;
    return Ok(());
  }

  let period = std::time::Duration::from_secs(cfg.sweep_interval_secs.max(1));
  tracing::info!(?period, store = ?store_path, "sweeping on interval");
  let mut ticker = tokio::time::interval(period);
  ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
  loop {
    ticker.tick().await;
    // A failed pass is logged and retried next tick; the daemon stays up.
    if let Err(err) = engine.sweep().await {
      tracing::error!(error = %err, "sweep failed");
    }
  }
}

/// Resolve a leading `~` against `$HOME`.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}
