use clap::{Parser, Subcommand, ValueEnum};
use color_eyre::{eyre::eyre, Result};
use navdata::{
  ActionOptions, ActionTracker, Config, DataContext, ItemRequest, PathOptions, QueryParams, SaveMode,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "navdata")]
#[command(about = "Query and edit nav-addressed REST collections through the navdata stores")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/navdata/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Answer from demo fixtures instead of the network
  #[arg(long)]
  demo: bool,

  /// Write logs to this file instead of stderr
  #[arg(long)]
  log_file: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Fetch one item by id
  Get {
    nav: String,
    id: String,
    /// Skip cached data
    #[arg(long)]
    refresh: bool,
  },
  /// Fetch a collection
  List {
    nav: String,
    #[arg(long)]
    refresh: bool,
    #[arg(long)]
    filter_by: Option<String>,
    #[arg(long)]
    sort_by: Option<String>,
    #[arg(long)]
    take: Option<u64>,
  },
  /// Create or update an item from a JSON object
  Save {
    nav: String,
    json: String,
    /// Defaults to edit when the object has an id
    #[arg(long, value_enum)]
    mode: Option<Mode>,
  },
  /// Delete an item by id
  Delete { nav: String, id: String },
  /// Restore a deleted item by id
  Restore { nav: String, id: String },
  /// GET a URL directly, bypassing the stores
  RawGet { url: String },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Mode {
  New,
  Edit,
}

impl From<Mode> for SaveMode {
  fn from(mode: Mode) -> Self {
    match mode {
      Mode::New => SaveMode::New,
      Mode::Edit => SaveMode::Edit,
    }
  }
}

fn init_tracing(log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
  let filter = EnvFilter::try_from_env("NAVDATA_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));

  match log_file {
    Some(path) => {
      let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
      let file_name = path
        .file_name()
        .ok_or_else(|| eyre!("Invalid log file path: {}", path.display()))?;
      let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, file_name));
      tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .init();
      Ok(Some(guard))
    }
    None => {
      tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
      Ok(None)
    }
  }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
  println!("{}", serde_json::to_string_pretty(value)?);
  Ok(())
}

async fn run(ctx: &DataContext, command: Command) -> Result<()> {
  let actions = ctx.actions();

  match command {
    Command::Get { nav, id, refresh } => {
      let result = actions
        .get_item(PathOptions::new(nav).with_id(id).with_refresh(refresh))
        .await?;
      print_json(&result)?;
    }
    Command::List {
      nav,
      refresh,
      filter_by,
      sort_by,
      take,
    } => {
      let params = QueryParams {
        filter_by,
        sort_by,
        take_amount: take,
        ..QueryParams::default()
      };
      let result = actions
        .get_all_items(PathOptions::new(nav).with_params(params).with_refresh(refresh))
        .await?;
      print_json(&result)?;
    }
    Command::Save { nav, json, mode } => {
      let data: serde_json::Value =
        serde_json::from_str(&json).map_err(|e| eyre!("Invalid JSON item: {}", e))?;
      let mut request = ItemRequest::new(PathOptions::new(nav).with_data(data));
      if let Some(mode) = mode {
        request = request.with_mode(mode.into());
      }
      let result = actions.save_item(request).await?;
      print_json(&result)?;
    }
    Command::Delete { nav, id } => {
      actions.delete_item(PathOptions::new(nav).with_id(id)).await?;
    }
    Command::Restore { nav, id } => {
      let result = actions.restore_item(PathOptions::new(nav).with_id(id)).await?;
      print_json(&result)?;
    }
    Command::RawGet { url } => {
      let result = actions.api_get(PathOptions::for_url(url)).await?;
      print_json(&result)?;
    }
  }

  Ok(())
}

/// The tracker's closing message. `Err` carries an error recorded during the command.
fn closing_message(tracker: &ActionTracker) -> std::result::Result<Option<String>, String> {
  match tracker.error_message() {
    Some(message) => Err(message),
    None => Ok(tracker.completion_message()),
  }
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let log_guard = init_tracing(args.log_file.as_deref())?;

  let config = Config::load(args.config.as_deref())?;
  let ctx = config.build_context(args.demo)?;

  // Failures are recorded on the tracker and reported below; 401s still propagate.
  let ctx = ctx.with_action_defaults(ActionOptions::new().with_throw_error(false));
  run(&ctx, args.command).await?;

  match closing_message(ctx.tracker()) {
    Err(message) => {
      eprintln!("Error: {}", message);
      // exit skips destructors, so flush the log writer first
      drop(log_guard);
      std::process::exit(1);
    }
    Ok(Some(message)) => eprintln!("{}", message),
    Ok(None) => {}
  }

  Ok(())
}
