mod cache;
mod config;
mod error;
mod event;
mod leads;
mod logging;
mod sync;
#[cfg(test)]
mod testing;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;

use cache::{CacheSource, CacheStorage, MemoryStorage, NoopStorage, SqliteStorage};
use config::{Config, AUTO_REFRESH_RANGE};
use event::{EventHandler, SyncEvent};
use leads::{HttpLeadSource, Lead};
use sync::{RefreshTrigger, Session, SyncSettings};

#[derive(Parser, Debug)]
#[command(name = "leadsync")]
#[command(about = "Keep a local, change-tracked copy of your sales leads")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/leadsync/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Owner id to sync for
  #[arg(long, global = true)]
  owner_id: Option<String>,

  /// Owner email to sync for
  #[arg(long, global = true)]
  owner_email: Option<String>,

  /// Team scope
  #[arg(long, global = true)]
  team: Option<String>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Refresh once and report what changed
  Sync,
  /// Keep refreshing on a timer until Ctrl-C
  Watch,
  /// Print leads, from cache when it is fresh
  List,
  /// Print one lead
  Show { id: String },
  /// Delete all cached leads
  ClearCache,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _log_guard = logging::init()?;

  let mut config = Config::load(args.config.as_deref())?;
  if let Some(id) = args.owner_id {
    config.remote.owner_id = id;
  }
  if let Some(email) = args.owner_email {
    config.remote.owner_email = email;
  }
  if args.team.is_some() {
    config.remote.team = args.team;
  }

  let source = HttpLeadSource::from_config(&config)?;
  let session = Session::new(
    config.remote.owner(),
    Arc::new(source),
    open_storage(&config),
    SyncSettings::from(&config),
  );

  match args.command {
    Command::Sync => run_sync(session).await,
    Command::Watch => run_watch(session, &config).await,
    Command::List => run_list(session).await,
    Command::Show { id } => run_show(session, &id).await,
    Command::ClearCache => {
      session.end(true).await;
      println!("Cache cleared");
      Ok(())
    }
  }
}

/// SQLite when enabled, falling back to memory if the file can't be opened.
fn open_storage(config: &Config) -> Arc<dyn CacheStorage> {
  if !config.cache.enabled {
    return Arc::new(NoopStorage);
  }
  match config
    .cache_path()
    .map_err(|e| e.to_string())
    .and_then(|path| SqliteStorage::open(&path).map_err(|e| e.to_string()))
  {
    Ok(storage) => Arc::new(storage),
    Err(e) => {
      warn!(error = %e, "cache unavailable, keeping leads in memory only");
      Arc::new(MemoryStorage::new())
    }
  }
}

async fn run_sync(session: Session) -> Result<()> {
  let sync = session.sync().clone();
  sync.hydrate().await;
  let result = sync.refresh(RefreshTrigger::Manual).await;
  session.end(false).await;

  let outcome = result?;
  println!(
    "{} leads: {} new, {} modified, {} removed",
    outcome.total, outcome.new_count, outcome.modified_count, outcome.removed_count
  );
  if outcome.dropped_count > 0 {
    println!("{} records dropped (undecodable, missing or duplicate id)", outcome.dropped_count);
  }
  Ok(())
}

async fn run_watch(mut session: Session, config: &Config) -> Result<()> {
  let sync = session.sync().clone();
  let loaded = sync.load().await?;
  println!("{} leads ({})", loaded.data, source_label(loaded.source));

  let interval = config
    .sync
    .auto_refresh()
    .unwrap_or_else(|| std::time::Duration::from_secs(*AUTO_REFRESH_RANGE.start()));
  let mut events = EventHandler::new();
  session.start_timers(Some(interval), config.sync.countdown_tick(), events.sender());

  loop {
    tokio::select! {
      _ = tokio::signal::ctrl_c() => break,
      event = events.next() => match event {
        Some(event) => print_event(&event),
        None => break,
      },
    }
  }

  session.end(false).await;
  Ok(())
}

async fn run_list(session: Session) -> Result<()> {
  let sync = session.sync().clone();
  let result = sync.load().await;
  session.end(false).await;

  let loaded = result?;
  for lead in sync.store().snapshot().iter() {
    print_lead_row(lead);
  }
  println!("{} leads ({})", loaded.data, source_label(loaded.source));
  Ok(())
}

async fn run_show(session: Session, id: &str) -> Result<()> {
  let sync = session.sync().clone();
  sync.hydrate().await;
  let result = sync.lead(id).await;
  session.end(false).await;

  let lead = result.map_err(|e| eyre!("Failed to load lead {}: {}", id, e))?;
  println!("{}", serde_json::to_string_pretty(lead.as_ref())?);
  Ok(())
}

fn source_label(source: CacheSource) -> &'static str {
  match source {
    CacheSource::Network => "fetched",
    CacheSource::CacheFresh => "cached",
    CacheSource::Offline => "offline, cached",
  }
}

fn print_lead_row(lead: &Lead) {
  let marker = if lead.flags.is_new {
    "+"
  } else if lead.flags.is_modified {
    "~"
  } else {
    " "
  };
  println!(
    "{} {:<12} {:<14} {}",
    marker,
    lead.id,
    lead.status,
    lead.name
  );
}

fn print_event(event: &SyncEvent) {
  match event {
    SyncEvent::Refreshed(o) => println!(
      "refreshed: {} leads, {} new, {} modified, {} removed",
      o.total, o.new_count, o.modified_count, o.removed_count
    ),
    SyncEvent::Rejected(r) => println!("skipped: {}", r),
    SyncEvent::Failed(msg) => println!("refresh failed: {}", msg),
    SyncEvent::Countdown(remaining) => {
      println!("next manual refresh in {}s", remaining.as_millis().div_ceil(1000))
    }
    SyncEvent::Ready => println!("manual refresh available"),
  }
}
