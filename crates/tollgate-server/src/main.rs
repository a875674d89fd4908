//! tollgated — the Tollgate hotspot server binary.
//!
//! Reads `config.toml` (or the path given with `--config`), opens the SQLite
//! store, connects the engine to the RouterOS access controller, spawns the
//! expiry sweeper, and serves the portal/admin API over HTTP.

use std::{
  path::{Path, PathBuf},
  sync::Arc,
};

use anyhow::Context as _;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use tollgate_engine::{Engine, run_sweeper};
use tollgate_routeros::RouterOsClient;
use tollgate_server::{AppState, ServerConfig};
use tollgate_store_sqlite::SqliteStore;

#[derive(Parser)]
#[command(author, version, about = "Tollgate hotspot server")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "config.toml")]
  config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  // Initialise tracing.
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();

  // Load configuration.
  let settings = config::Config::builder()
    .add_source(config::File::from(cli.config).required(false))
    .add_source(config::Environment::with_prefix("TOLLGATE").separator("__"))
    .build()
    .context("failed to read config file")?;

  let server_cfg: ServerConfig = settings
    .try_deserialize()
    .context("failed to deserialise ServerConfig")?;

  // Expand `~` in store path.
  let store_path = expand_tilde(&server_cfg.store_path);

  // Open SQLite store.
  let store = SqliteStore::open(&store_path)
    .await
    .with_context(|| format!("failed to open store at {store_path:?}"))?;

  // Wire the engine to the router.
  let controller = RouterOsClient::new(server_cfg.routeros.clone());
  let engine = Arc::new(Engine::new(
    store,
    controller,
    server_cfg.engine_config(),
  ));

  // The sweeper owns expiry; it runs for the life of the process.
  tokio::spawn(run_sweeper(engine.clone(), server_cfg.sweep_interval()));

  let state = AppState {
    engine,
    config: Arc::new(server_cfg.clone()),
  };

  let app = tollgate_server::router(state);
  let address = format!("{}:{}", server_cfg.host, server_cfg.port);

  tracing::info!("Listening on http://{address}");
  let listener = TcpListener::bind(&address)
    .await
    .with_context(|| format!("failed to bind {address}"))?;

  axum::serve(listener, app).await.context("server error")?;

  Ok(())
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}
