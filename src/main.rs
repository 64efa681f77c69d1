mod cache;
mod config;
mod event;
mod fetch;
mod kv;
mod mirror;
mod offline;
mod worker;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use crate::cache::{GenerationStore, SqliteStore};
use crate::fetch::{Fetcher, HttpFetcher, Request};
use crate::kv::SqliteKv;
use crate::mirror::{Category, OfflineMirror};
use crate::worker::{CacheController, WorkerConfig};

#[derive(Parser, Debug)]
#[command(name = "resq-offline")]
#[command(about = "Offline cache engine for the ResQHub disaster dashboard")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/resq-offline/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Precache the critical resource manifest into a fresh generation
  Install,
  /// Purge stale generations, leaving only the configured version
  Activate,
  /// Show cache generations, mirror contents and connectivity
  Status,
  /// Erase the offline data mirror
  Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let config = config::Config::load(args.config.as_deref())?;

  let _log_guard = init_tracing(&config)?;

  match args.command {
    Command::Install => {
      let controller = build_controller(&config)?;
      controller.on_install().await?;
      println!(
        "Installed generation {} ({} resources precached)",
        config.cache.version,
        config.cache.precache.len()
      );
    }
    Command::Activate => {
      let controller = build_controller(&config)?;
      controller.on_activate().await?;
      println!("Activated generation {}", config.cache.version);
    }
    Command::Status => {
      print_status(&config).await?;
    }
    Command::Clear => {
      let mirror = open_mirror(&config)?;
      mirror.clear_cache()?;
      println!("Offline data mirror cleared");
    }
  }

  Ok(())
}

fn init_tracing(config: &config::Config) -> Result<tracing_appender::non_blocking::WorkerGuard> {
  let dir = config.storage.data_dir()?;
  std::fs::create_dir_all(&dir)?;

  let appender = tracing_appender::rolling::never(&dir, "resq-offline.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);

  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .with_writer(writer)
    .with_ansi(false)
    .init();

  Ok(guard)
}

fn build_controller(config: &config::Config) -> Result<CacheController<SqliteStore>> {
  let store = SqliteStore::open_at(&config.storage.cache_db_path()?)?;
  let fetcher: Arc<dyn Fetcher> = Arc::new(HttpFetcher::new(&config.server.base_url)?);

  Ok(CacheController::new(
    store,
    fetcher,
    WorkerConfig {
      version: config.cache.version.clone(),
      precache: config.cache.precache.clone(),
      offline_fallback: config.cache.offline_fallback.clone(),
      data_endpoint: config.cache.data_endpoint.clone(),
    },
  ))
}

fn open_mirror(config: &config::Config) -> Result<OfflineMirror<SqliteKv>> {
  let store = SqliteKv::open_at(&config.storage.mirror_db_path()?)?;
  Ok(OfflineMirror::new(store))
}

async fn print_status(config: &config::Config) -> Result<()> {
  let store = SqliteStore::open_at(&config.storage.cache_db_path()?)?;

  println!("Configured version: {}", config.cache.version);
  let names = store.names()?;
  if names.is_empty() {
    println!("No cache generations (run `resq-offline install`)");
  } else {
    for name in names {
      let marker = if name == config.cache.version { "*" } else { " " };
      println!("{} {} ({} entries)", marker, name, store.len(&name)?);
    }
  }

  let mirror = open_mirror(config)?;
  for category in Category::ALL {
    println!(
      "mirror {}: {} records",
      category.storage_key(),
      mirror.get(category)?.len()
    );
  }

  // Probe the server root to report connectivity
  let fetcher = HttpFetcher::new(&config.server.base_url)?;
  match fetcher.fetch(Request::get("/")).await {
    Ok(response) => println!("Server reachable (status {})", response.status),
    Err(_) => println!("Server unreachable - offline"),
  }

  Ok(())
}
