mod cache;
mod config;
mod easytime;
mod sync;

use clap::Parser;
use color_eyre::Result;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "etsync")]
#[command(about = "Sync and reconcile attendance punches from EasyTime Pro terminals")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/etsync/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// How many transactions to request from the server
  #[arg(short, long, default_value_t = 500)]
  limit: usize,

  /// Print the full outcome as JSON
  #[arg(long)]
  json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("etsync=info")))
    .with_writer(std::io::stderr)
    .init();

  let args = Args::parse();

  let config = config::Config::load(args.config.as_deref())?;
  let password = config::Config::get_password()?;

  let client = easytime::EasyTimeClient::new(&config.easytime, password)?;
  let store = cache::JsonStore::open(config.cache_path.clone())?;
  let cache = cache::TransactionCache::open(store);

  let mut reconciler = sync::Reconciler::new(
    client,
    cache,
    chrono::Duration::days(config.retention_days),
  );

  let outcome = reconciler.fetch_and_reconcile(args.limit).await;

  if args.json {
    println!("{}", serde_json::to_string_pretty(&outcome)?);
  } else {
    println!(
      "{} punches ({} new, {} already cached, {} pruned)",
      outcome.count, outcome.new_transactions, outcome.cached_transactions, outcome.pruned
    );
    if let Some(note) = outcome.note() {
      println!("{}", note);
    }
  }

  Ok(())
}
