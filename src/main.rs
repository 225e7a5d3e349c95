mod cache;
mod config;
mod logging;
mod net;
mod worker;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinSet;
use tracing::{info, warn};

use cache::{CacheSource, CacheStorage, MemoryStorage, SqliteStorage};
use config::{CacheConfig, Config};
use net::{HttpClient, Network, PingStatus, Request, Response};
use worker::{FetchOutcome, Router, ServiceWorker};

#[derive(Parser, Debug)]
#[command(name = "nmusic-offline")]
#[command(about = "Offline app-shell and API caching for the nmusic player")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/nmusic-offline/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Cache database location
  #[arg(long, global = true)]
  cache_db: Option<PathBuf>,

  /// Keep cache stores in memory; nothing is persisted
  #[arg(long, global = true, conflicts_with = "cache_db")]
  memory: bool,

  /// Write logs to this file instead of stderr
  #[arg(long, global = true)]
  log_file: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Wake the API host
  Ping,
  #[command(flatten)]
  Cache(CacheCommand),
}

/// Commands that need the cache stores
#[derive(Subcommand, Debug)]
enum CacheCommand {
  /// Precache the app shell
  Install,
  /// Delete cache stores left over from older versions
  Activate,
  /// Route one request through the cache policy
  Fetch {
    url: String,
    #[arg(short = 'X', long, default_value = "GET")]
    method: String,
    /// Extra request header, "Name: value"; may be repeated
    #[arg(short = 'H', long = "header")]
    headers: Vec<String>,
    /// Write the response body here
    #[arg(short, long)]
    output: Option<PathBuf>,
  },
  /// Install and activate, then route each request read from stdin ("[METHOD] URL" per line)
  Run,
  /// List cache stores with their entry counts
  Stores,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _log_guard = logging::init(args.log_file.as_deref())?;

  let config = Config::load(args.config.as_deref())?;

  // Override cache location if specified on command line
  let config = if let Some(path) = args.cache_db {
    Config {
      cache: CacheConfig { path: Some(path) },
      ..config
    }
  } else {
    config
  };

  let network = HttpClient::new(&config.network)?;

  let command = match args.command {
    Command::Ping => return ping(&config, &network).await,
    Command::Cache(command) => command,
  };

  if args.memory {
    execute(command, &config, Arc::new(MemoryStorage::new()), network).await
  } else {
    let storage = SqliteStorage::open(&config.cache_path()?)?;
    execute(command, &config, Arc::new(storage), network).await
  }
}

async fn execute<S: CacheStorage + 'static>(
  command: CacheCommand,
  config: &Config,
  storage: Arc<S>,
  network: HttpClient,
) -> Result<()> {
  let router = Router::new(config, Arc::clone(&storage), network)?;

  match command {
    CacheCommand::Install => {
      let count = router.on_install().await?;
      println!("Precached {} resources into {}", count, router.shell_store());
    }
    CacheCommand::Activate => {
      let report = router.on_activate()?;
      if report.deleted.is_empty() && report.failed.is_empty() {
        println!("No old caches");
      }
      for name in &report.deleted {
        println!("deleted {}", name);
      }
      for (name, reason) in &report.failed {
        println!("failed  {}: {}", name, reason);
      }
    }
    CacheCommand::Fetch {
      url,
      method,
      headers,
      output,
    } => {
      let mut request = Request::parse(&method, &url)?;
      for header in &headers {
        let (name, value) = parse_header(header)?;
        request = request.with_header(name, value);
      }
      let (response, source) = match router.on_fetch(&request).await? {
        FetchOutcome::Respond(result) => (result.response, Some(result.source)),
        FetchOutcome::PassThrough => (router.network().fetch(&request).await?, None),
      };
      print_response(&response, source, &request);

      if let Some(path) = output {
        std::fs::write(&path, response.into_body())
          .map_err(|e| eyre!("Failed to write {}: {}", path.display(), e))?;
      }
    }
    CacheCommand::Run => run(router).await?,
    CacheCommand::Stores => {
      for name in storage.keys()? {
        let count = storage.entries(&name)?.len();
        let current = name == router.shell_store() || name == router.api_store();
        println!(
          "{} {:<32} {}",
          if current { "*" } else { " " },
          name,
          count
        );
      }
    }
  }

  Ok(())
}

/// Boot a worker and feed it requests from stdin until EOF.
async fn run<S: CacheStorage + 'static>(router: Router<S, HttpClient>) -> Result<()> {
  let network = router.network().clone();
  let (handle, task) = ServiceWorker::spawn(router);

  let count = handle.install().await?;
  info!(count, "Worker installed");
  let report = handle.activate().await?;
  let state = handle.state().await?;
  info!(deleted = report.deleted.len(), %state, "Worker activated");

  let mut lines = BufReader::new(tokio::io::stdin()).lines();
  let mut fetches = JoinSet::new();

  while let Some(line) = lines.next_line().await? {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
      continue;
    }

    let (method, url) = match line.split_once(char::is_whitespace) {
      Some((method, url)) => (method, url.trim()),
      None => ("GET", line),
    };
    let request = match Request::parse(method, url) {
      Ok(request) => request,
      Err(e) => {
        warn!(line, error = %e, "Skipping invalid request");
        continue;
      }
    };

    let handle = handle.clone();
    let network = network.clone();
    fetches.spawn(async move {
      let outcome = match handle.fetch(request.clone()).await {
        Ok(FetchOutcome::Respond(result)) => Ok((result.response, Some(result.source))),
        Ok(FetchOutcome::PassThrough) => network.fetch(&request).await.map(|r| (r, None)),
        Err(e) => Err(e),
      };
      (request, outcome)
    });
  }

  while let Some(joined) = fetches.join_next().await {
    let (request, outcome) = joined?;
    match outcome {
      Ok((response, source)) => print_response(&response, source, &request),
      Err(e) => println!("ERR {} {}: {}", request.method, request.url, e),
    }
  }

  drop(handle);
  let state = task.await?;
  info!(%state, "Worker finished");

  Ok(())
}

/// One line per response. A missing source means the request was passed through.
fn print_response(response: &Response, source: Option<CacheSource>, request: &Request) {
  let source = source.map_or_else(|| "pass-through".to_string(), |s| s.to_string());
  let content_type = response.header("content-type").unwrap_or("-");
  println!(
    "{} {} {} ({}, {}, {} bytes)",
    response.status,
    request.method,
    request.url,
    source,
    content_type,
    response.body.len()
  );
}

/// Split a curl-style `Name: value` header argument.
fn parse_header(raw: &str) -> Result<(String, String)> {
  let (name, value) = raw
    .split_once(':')
    .ok_or_else(|| eyre!("Invalid header '{}', expected 'Name: value'", raw))?;
  let name = name.trim();
  if name.is_empty() {
    return Err(eyre!("Invalid header '{}', name is empty", raw));
  }
  Ok((name.to_string(), value.trim().to_string()))
}

async fn ping(config: &Config, network: &HttpClient) -> Result<()> {
  let url = config.ping_url()?;

  match net::ping(network.inner(), &url).await? {
    PingStatus::Alive(status) => println!("{} is awake ({})", url, status),
    PingStatus::Degraded {
      status,
      body_preview,
    } => {
      println!("{} answered with status {}, still awake", url, status);
      if !body_preview.is_empty() {
        println!("  {}", body_preview);
      }
    }
  }

  Ok(())
}
