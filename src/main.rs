mod cache;
mod config;
mod event;
mod fetch;
mod lifecycle;
mod net;
mod notify;
mod sync;
mod worker;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::error;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use cache::{CacheStorage, FetchRequest, MemoryStorage, RequestMode, SqliteStorage, SyncQueueStorage};
use event::WorkerEvent;
use worker::Worker;

#[derive(Parser, Debug)]
#[command(name = "offcache")]
#[command(about = "An offline-first cache and background-sync worker for web app shells")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/offcache/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Origin server URL to use instead of the configured one
  #[arg(long)]
  origin: Option<String>,

  /// Keep all state in memory instead of the SQLite database
  #[arg(long)]
  ephemeral: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Precache the app shell into the current-version cache store
  Install,
  /// Purge stale cache stores, keeping only the current version
  Activate,
  /// Resolve a request through the cache-first interceptor
  Fetch {
    /// Path or absolute URL to fetch
    url: String,
    /// Treat the request as a top-level document navigation
    #[arg(long)]
    document: bool,
  },
  /// Drain the pending offline queue to the origin server
  Sync {
    /// Signal tag (defaults to the configured one)
    #[arg(long)]
    tag: Option<String>,
  },
  /// Build a notification from a push message
  Push {
    /// Message text; omitted means the configured default body
    text: Option<String>,
  },
  /// Route a notification interaction
  NotificationClick {
    /// Action id ("explore", "close", or none for a body click)
    action: Option<String>,
  },
  /// Append a record to the pending offline queue
  Enqueue {
    /// JSON payload to queue
    payload: String,
  },
  /// List cache stores with entry counts
  Stores,
  /// Serve events from stdin, one per line, until the stream closes
  Run,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = config::Config::load(args.config.as_deref())?;

  // Override origin if specified on command line
  let config = if let Some(url) = args.origin {
    config::Config {
      origin: config::OriginConfig { url },
      ..config
    }
  } else {
    config
  };

  let data_dir = config.data_dir()?;
  let _guard = init_tracing(&data_dir)?;

  if args.ephemeral {
    run_command(config, Arc::new(MemoryStorage::new()), args.command).await
  } else {
    let storage = SqliteStorage::open_at(&data_dir.join("worker.db"))?;
    run_command(config, Arc::new(storage), args.command).await
  }
}

/// Log to stderr and a daily-rolling file under the data directory.
fn init_tracing(data_dir: &Path) -> Result<tracing_appender::non_blocking::WorkerGuard> {
  let log_dir = data_dir.join("logs");
  std::fs::create_dir_all(&log_dir)
    .map_err(|e| eyre!("Failed to create log directory: {}", e))?;

  let (file_writer, guard) =
    tracing_appender::non_blocking(tracing_appender::rolling::daily(log_dir, "offcache.log"));

  tracing_subscriber::registry()
    .with(EnvFilter::try_from_env("OFFCACHE_LOG").unwrap_or_else(|_| EnvFilter::new("info")))
    .with(fmt::layer().with_writer(std::io::stderr))
    .with(fmt::layer().with_ansi(false).with_writer(file_writer))
    .init();

  Ok(guard)
}

async fn run_command<S>(config: config::Config, storage: Arc<S>, command: Command) -> Result<()>
where
  S: CacheStorage + SyncQueueStorage + 'static,
{
  // Queue writes and store inspection talk to storage directly; every
  // other command dispatches through the worker as one host event
  match &command {
    Command::Enqueue { payload } => {
      let payload: serde_json::Value =
        serde_json::from_str(payload).map_err(|e| eyre!("Invalid JSON payload: {}", e))?;
      let record = storage.enqueue(&payload)?;
      println!("queued record {}", record.id);
      return Ok(());
    }
    Command::Stores => {
      let stores = storage.stores()?;
      if stores.is_empty() {
        println!("no cache stores");
      }
      for info in stores {
        let state = if info.complete { "complete" } else { "incomplete" };
        println!("{}  {} entries  {}", info.name, info.entries, state);
      }
      return Ok(());
    }
    _ => {}
  }

  let mut worker = Worker::new(config.clone(), storage)?;
  let event = match command {
    Command::Install => WorkerEvent::Install,
    Command::Activate => WorkerEvent::Activate,
    Command::Fetch { url, document } => {
      let url = worker.resolve(&url)?;
      let mode = if document {
        RequestMode::Document
      } else {
        RequestMode::Resource
      };
      WorkerEvent::Fetch(FetchRequest::get(url, mode))
    }
    Command::Sync { tag } => WorkerEvent::Sync {
      tag: tag.unwrap_or_else(|| config.sync.tag.clone()),
    },
    Command::Push { text } => WorkerEvent::Push { text },
    Command::NotificationClick { action } => WorkerEvent::NotificationClick { action },
    Command::Run => {
      let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
      spawn_stdin_reader(&config, tx)?;
      return worker.run(rx).await;
    }
    Command::Enqueue { .. } | Command::Stores => unreachable!(),
  };

  let outcome = worker.handle_event(event).await?;
  println!("{}", outcome);

  Ok(())
}

/// Feed stdin lines into the worker's event channel.
fn spawn_stdin_reader(
  config: &config::Config,
  tx: tokio::sync::mpsc::UnboundedSender<WorkerEvent>,
) -> Result<()> {
  let base = url::Url::parse(&config.origin.url)
    .map_err(|e| eyre!("Invalid origin URL {}: {}", config.origin.url, e))?;
  let sync_tag = config.sync.tag.clone();

  tokio::spawn(async move {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
      match parse_event_line(&base, &sync_tag, &line) {
        Ok(Some(event)) => {
          if tx.send(event).is_err() {
            break;
          }
        }
        Ok(None) => {}
        Err(e) => error!("ignoring event line: {}", e),
      }
    }
  });

  Ok(())
}

/// Parse one stdin line into an event.
///
/// Recognized forms: `install`, `activate`, `fetch [--document] <target>`,
/// `sync [tag]`, `push [text...]`, `click [action]`. Blank lines yield
/// nothing.
fn parse_event_line(
  base: &url::Url,
  sync_tag: &str,
  line: &str,
) -> Result<Option<WorkerEvent>> {
  let line = line.trim();
  if line.is_empty() {
    return Ok(None);
  }

  let mut parts = line.split_whitespace();
  let event = match parts.next() {
    Some("install") => WorkerEvent::Install,
    Some("activate") => WorkerEvent::Activate,
    Some("fetch") => {
      let mut target = parts.next().ok_or_else(|| eyre!("fetch needs a target"))?;
      let mut mode = RequestMode::Resource;
      if target == "--document" {
        mode = RequestMode::Document;
        target = parts.next().ok_or_else(|| eyre!("fetch needs a target"))?;
      }
      let url = base
        .join(target)
        .map_err(|e| eyre!("Invalid fetch target {}: {}", target, e))?;
      WorkerEvent::Fetch(FetchRequest::get(url, mode))
    }
    Some("sync") => WorkerEvent::Sync {
      tag: parts.next().unwrap_or(sync_tag).to_string(),
    },
    Some("push") => {
      let text = line.strip_prefix("push").unwrap_or_default().trim();
      WorkerEvent::Push {
        text: (!text.is_empty()).then(|| text.to_string()),
      }
    }
    Some("click") => WorkerEvent::NotificationClick {
      action: parts.next().map(String::from),
    },
    Some(other) => return Err(eyre!("Unknown event: {}", other)),
    None => return Ok(None),
  };

  Ok(Some(event))
}
