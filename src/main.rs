mod cache;
mod config;
mod datajud;
mod db;
mod logging;
mod sync;
mod upload;
mod views;

use chrono::Utc;
use clap::{Args as ClapArgs, Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use futures::StreamExt;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::cache::ViewCache;
use crate::config::Config;
use crate::datajud::types::ProcessId;
use crate::datajud::{DataJudClient, Router};
use crate::db::{Listing, Page, Store};
use crate::sync::{CancelToken, SyncEngine, SyncEvent, SyncOptions, SyncRequest};
use crate::views::{JoinedFilter, ViewService};

#[derive(Parser, Debug)]
#[command(name = "datajud-sync")]
#[command(about = "Keeps a local mirror of tracked court processes in sync with DataJud")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/datajud-sync/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Register a tracking list and synchronize every process in it
  Sync {
    /// Delimited export with a numeroProcesso column
    file: PathBuf,
    /// Fetch even processes whose local copy is fresh
    #[arg(long)]
    force: bool,
    /// Remote lookups in flight at once
    #[arg(long)]
    concurrency: Option<usize>,
    #[arg(short, long, default_value_t = ',')]
    delimiter: char,
  },
  /// Synchronize every process already on the tracking list
  Resync {
    #[arg(long)]
    force: bool,
    #[arg(long)]
    concurrency: Option<usize>,
  },
  /// Compare a tracking list with what is already tracked, without writing
  Check {
    file: PathBuf,
    #[arg(short, long, default_value_t = ',')]
    delimiter: char,
  },
  /// Court systems with stored processes
  Tribunals,
  /// Categories of tracked processes
  Categories,
  /// Processes grouped by age of their last court update
  Updates(FilterArgs),
  /// Every stored process with its latest movement
  Joined(FilterArgs),
  /// Counts by category and court system
  Summary,
  /// Store row counts
  Status,
  /// One page of processes with their latest movement
  Processes {
    #[command(flatten)]
    filter: FilterArgs,
    #[command(flatten)]
    page: PageArgs,
  },
  /// A process with its most recent movements
  Process { id: String },
  /// Movements of a process, newest first
  Movements {
    id: String,
    #[command(flatten)]
    page: PageArgs,
  },
  /// The tracking list, most recently included first
  Tracked {
    #[command(flatten)]
    page: PageArgs,
  },
  /// Delete every stored process, movement and tracking entry
  Clear {
    #[arg(long)]
    yes: bool,
  },
}

#[derive(ClapArgs, Debug)]
struct FilterArgs {
  #[arg(long)]
  tribunal: Option<String>,
  #[arg(long)]
  categoria: Option<String>,
  #[arg(long)]
  numero: Option<String>,
}

impl From<FilterArgs> for JoinedFilter {
  fn from(args: FilterArgs) -> Self {
    Self {
      id: args.numero,
      tribunal: args.tribunal,
      category: args.categoria,
    }
  }
}

#[derive(ClapArgs, Debug)]
struct PageArgs {
  #[arg(long)]
  limit: Option<i64>,
  #[arg(long)]
  offset: Option<i64>,
}

impl From<PageArgs> for Page {
  fn from(args: PageArgs) -> Self {
    Page::new(args.limit, args.offset)
  }
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let config = Config::load(args.config.as_deref())?;
  let _guard = logging::init(config.log_dir.as_deref())?;

  let store = Arc::new(Store::open(&config.database_path()?)?);
  let cache = if config.cache.enabled {
    ViewCache::memory()
  } else {
    ViewCache::disabled()
  };
  let views = ViewService::new(Arc::clone(&store), cache);

  let outcome = match args.command {
    Command::Sync {
      file,
      force,
      concurrency,
      delimiter,
    } => {
      let (client, router, requests) =
        stage_list(&config, &store, &file, delimiter_byte(delimiter)?)?;
      let options = sync_options(&config, force, concurrency);
      run_sync(&config, &store, &views, router, client, requests, options).await
    }
    Command::Resync { force, concurrency } => {
      let client = DataJudClient::new(&config.datajud, Config::get_api_key()?)?;
      let router = Arc::new(Router::from_config(&config.datajud)?);
      let requests: Vec<SyncRequest> = store
        .list_master_entries()?
        .iter()
        .map(SyncRequest::from)
        .collect();
      if requests.is_empty() {
        return Err(eyre!("Tracking list is empty; run sync with a list first"));
      }

      let options = sync_options(&config, force, concurrency);
      run_sync(&config, &store, &views, router, client, requests, options).await
    }
    Command::Check { file, delimiter } => {
      let router = Router::from_config(&config.datajud)?;
      let records = upload::read_list(&file, delimiter_byte(delimiter)?)?;
      let report = upload::reconcile(&records, &store.list_master_entries()?, &router);
      print_json(&report)
    }
    Command::Tribunals => print_json(&*views.tribunals()?),
    Command::Categories => print_json(&*views.categories()?),
    Command::Updates(filter) => print_json(&*views.updates_by_period(&filter.into())?),
    Command::Joined(filter) => print_json(&*views.joined(&filter.into())?),
    Command::Summary => print_json(&*views.summary()?),
    Command::Status => print_json(&store.counts()?),
    Command::Processes { filter, page } => {
      print_json(&views.list_processes(&filter.into(), page.into())?)
    }
    Command::Process { id } => {
      let id = ProcessId::parse(&id)?;
      let detail = store
        .process_detail(&id)?
        .ok_or_else(|| eyre!("Process {} not found", id.masked()))?;
      print_json(&detail)
    }
    Command::Movements { id, page } => {
      let id = ProcessId::parse(&id)?;
      let page: Page = page.into();
      let movements = store.movements(&id, page)?;
      print_json(&Listing::new(movements, page, store.movement_count(&id)?))
    }
    Command::Tracked { page } => print_json(&store.tracked_page(page.into())?),
    Command::Clear { yes } => {
      if !yes {
        return Err(eyre!("Refusing to clear the store without --yes"));
      }
      store.clear_all()?;
      info!("store cleared");
      Ok(())
    }
  };

  debug!(stats = ?views.cache_stats(), "view cache");
  outcome
}

/// Register an uploaded list once the remote side is reachable.
///
/// The API key is resolved before anything is written.
fn stage_list(
  config: &Config,
  store: &Store,
  file: &Path,
  delimiter: u8,
) -> Result<(DataJudClient, Arc<Router>, Vec<SyncRequest>)> {
  let client = DataJudClient::new(&config.datajud, Config::get_api_key()?)?;
  let router = Arc::new(Router::from_config(&config.datajud)?);

  let records = upload::read_list(file, delimiter)?;
  let report = upload::reconcile(&records, &store.list_master_entries()?, &router);
  let registered = store.register_uploads(&report.rows, Utc::now())?;
  info!(
    valid = report.valid,
    registered,
    invalid = report.invalid.len(),
    duplicates = report.duplicates.len(),
    "tracking list registered"
  );

  Ok((client, router, report.to_requests()))
}

fn sync_options(config: &Config, force: bool, concurrency: Option<usize>) -> SyncOptions {
  let mut options = SyncOptions::from_config(&config.sync);
  options.force = force;
  if let Some(n) = concurrency {
    options.concurrency = n.max(1);
  }
  options
}

async fn run_sync(
  config: &Config,
  store: &Arc<Store>,
  views: &ViewService,
  router: Arc<Router>,
  client: DataJudClient,
  requests: Vec<SyncRequest>,
  options: SyncOptions,
) -> Result<()> {
  info!(
    requests = requests.len(),
    court_systems = router.endpoints().len(),
    "resolving against DataJud"
  );
  let engine = SyncEngine::new(Arc::clone(store), router, client)
    .with_request_delay(config.datajud.request_delay());

  let cancel = CancelToken::new();
  let on_signal = cancel.clone();
  tokio::spawn(async move {
    if tokio::signal::ctrl_c().await.is_ok() {
      warn!("interrupt received, stopping after in-flight lookups");
      on_signal.cancel();
    }
  });

  let mut events = engine.synchronize(requests, options, cancel);
  let mut aborted = None;
  while let Some(event) = events.next().await {
    println!("{}", serde_json::to_string(&event)?);
    if let SyncEvent::Aborted { error, .. } = &event {
      aborted = Some(error.clone());
    }
  }

  if let Some(error) = aborted {
    return Err(eyre!("Sync aborted: {}", error));
  }

  let filters = views.filter_lists()?;
  println!(
    "{}",
    serde_json::to_string(&serde_json::json!({ "type": "filter_update", "filters": filters }))?
  );
  Ok(())
}

fn delimiter_byte(delimiter: char) -> Result<u8> {
  u8::try_from(delimiter)
    .ok()
    .filter(u8::is_ascii)
    .ok_or_else(|| eyre!("Delimiter must be a single ASCII character, got {:?}", delimiter))
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
  println!("{}", serde_json::to_string_pretty(value)?);
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io::Write;

  #[test]
  fn test_missing_api_key_registers_nothing() {
    std::env::remove_var("DATAJUD_SYNC_APIKEY");
    std::env::remove_var("DATAJUD_APIKEY");

    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "numeroProcesso").unwrap();
    writeln!(file, "00008323520184013202").unwrap();
    let store = Store::open_in_memory().unwrap();

    let err = stage_list(&Config::default(), &store, file.path(), b',').unwrap_err();
    assert!(err.to_string().contains("API key"));
    assert_eq!(store.counts().unwrap().tracked, 0);
  }

  #[test]
  fn test_sync_options_override_config() {
    let options = sync_options(&Config::default(), true, Some(0));
    assert!(options.force);
    assert_eq!(options.concurrency, 1);
  }
}
