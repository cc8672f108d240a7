//! sitecache - command-line host for the offline cache worker.
//!
//! Each command plays the part of the platform for one event: install and
//! activate a worker version, route a request through it, submit or queue a
//! form, and fire background sync tasks.

use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::{debug, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use sitecache_core::{
    Event, EventOutcome, FormFields, HostStatus, HttpFetcher, Request, Response,
    ServiceWorkerHost, SubmissionStore, SubmitOutcome, WorkerConfig,
};

// ============================================================================
// Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "sitecache", version)]
#[command(about = "Offline cache and background sync for a static site")]
struct Cli {
    /// Config file (JSON). Defaults to ~/.config/sitecache/config.json
    #[arg(long, global = true, env = "SITECACHE_CONFIG")]
    config: Option<PathBuf>,

    /// Directory holding caches, queued forms and registration state
    #[arg(long, global = true, env = "SITECACHE_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Also write logs to a daily-rolling file at this path
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Precache the configured version and activate it
    Install,
    /// Activate the installed version, purging other caches
    Activate,
    /// Install, activate and register the periodic content refresh
    Update,
    /// Route one request through the worker
    Fetch {
        /// Absolute URL, or a path on the configured origin
        target: String,
        #[arg(long, short = 'X', default_value = "GET")]
        method: String,
        /// Send as a page navigation (Accept: text/html)
        #[arg(long)]
        navigate: bool,
        /// Print only the status line
        #[arg(long)]
        head: bool,
    },
    /// Submit a form, queueing it for background sync when offline
    Submit {
        /// Form field as name=value; repeat a name for multi-value fields
        #[arg(long = "field", short = 'f', value_parser = parse_field, required = true)]
        fields: Vec<(String, String)>,
        /// Skip the direct attempt and queue straight away
        #[arg(long)]
        offline: bool,
    },
    /// Fire a one-shot sync task
    Sync {
        #[arg(long)]
        tag: Option<String>,
    },
    /// Fire a periodic sync task regardless of its interval
    PeriodicSync {
        #[arg(long)]
        tag: Option<String>,
    },
    /// Fire every pending one-shot task and every periodic task that is due
    Tick,
    /// Show registration, caches and pending work
    Status,
    /// Print queued submissions as JSON
    Queue,
}

fn parse_field(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .filter(|(name, _)| !name.is_empty())
        .ok_or_else(|| format!("expected name=value, got '{}'", raw))
}

// ============================================================================
// Setup
// ============================================================================

/// Initialize the tracing subscriber for logging.
///
/// Use RUST_LOG to control the level (e.g. RUST_LOG=sitecache_core=debug).
/// The returned guard flushes the file writer and must outlive `main`'s work.
fn init_tracing(log_file: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or(Path::new("."));
            let name = path
                .file_name()
                .map(|n| n.to_os_string())
                .unwrap_or_else(|| "sitecache.log".into());
            let (writer, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, name));
            (
                Some(fmt::layer().with_ansi(false).with_writer(writer)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();
    guard
}

fn build_host(cli: &Cli) -> Result<ServiceWorkerHost> {
    let config = WorkerConfig::load(cli.config.as_deref())?;
    let data_dir = match cli.data_dir {
        Some(ref dir) => dir.clone(),
        None => config.default_data_dir()?,
    };
    debug!(origin = %config.origin, data_dir = %data_dir.display(), "Using data directory");

    let network = HttpFetcher::new(config.origin.clone()).context("Failed to build HTTP client")?;
    Ok(ServiceWorkerHost::new(config, &data_dir, Arc::new(network)))
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let _guard = init_tracing(cli.log_file.as_deref());

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let host = build_host(&cli)?;
    info!(command = ?cli.command, "sitecache starting");

    match cli.command {
        Command::Install => {
            let outcome = host.dispatch(Event::Install).await.context("Install failed")?;
            print_outcome(&outcome);
        }
        Command::Activate => {
            let outcome = host.dispatch(Event::Activate).await.context("Activation failed")?;
            print_outcome(&outcome);
        }
        Command::Update => {
            let outcome = host.update().await.context("Update failed")?;
            print_outcome(&outcome);
        }
        Command::Fetch {
            target,
            method,
            navigate,
            head,
        } => {
            let request = build_request(host.config(), &target, &method, navigate)?;
            let response = host
                .fetch(&request)
                .await
                .with_context(|| format!("No response for {}", request.url))?;
            print_response(&response, head);
            if !response.ok() {
                return Ok(ExitCode::FAILURE);
            }
        }
        Command::Submit { fields, offline } => {
            let mut form = FormFields::new();
            for (name, value) in &fields {
                form.append(name, value);
            }
            let submitter = host.submitter();
            let outcome = if offline {
                submitter.queue(form).await
            } else {
                submitter.submit(form).await
            }
            .context("Form submission failed")?;
            match outcome {
                SubmitOutcome::Delivered { status } => println!("Delivered (HTTP {})", status),
                SubmitOutcome::Queued { id } => {
                    println!("Queued as {} - will be sent when the connection is back", id)
                }
            }
        }
        Command::Sync { tag } => {
            let tag = tag.unwrap_or_else(|| host.config().form_sync_tag.clone());
            let outcome = host
                .dispatch(Event::Sync { tag })
                .await
                .context("Sync failed")?;
            print_outcome(&outcome);
        }
        Command::PeriodicSync { tag } => {
            let tag = tag.unwrap_or_else(|| host.config().content_sync_tag.clone());
            let outcome = host
                .dispatch(Event::PeriodicSync { tag })
                .await
                .context("Periodic sync failed")?;
            print_outcome(&outcome);
        }
        Command::Tick => {
            let report = host.tick(Utc::now()).await.context("Scheduler pass failed")?;
            if report.fired.is_empty() && report.failed.is_empty() {
                println!("Nothing due");
            }
            for (tag, outcome) in &report.fired {
                print!("{}: ", tag);
                print_outcome(outcome);
            }
            for (tag, e) in &report.failed {
                println!("{}: failed: {}", tag, e);
            }
            if !report.failed.is_empty() {
                return Ok(ExitCode::FAILURE);
            }
        }
        Command::Status => {
            let status = host.status().await.context("Failed to read state")?;
            print_status(host.config(), host.data_dir(), &status);
        }
        Command::Queue => {
            let store = SubmissionStore::open(host.data_dir()).await?;
            let records = store.get_all().await?;
            println!("{}", serde_json::to_string_pretty(&records)?);
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn build_request(config: &WorkerConfig, target: &str, method: &str, navigate: bool) -> Result<Request> {
    let url = if target.starts_with('/') {
        config.resolve(target)?
    } else {
        Request::parse(method, target)?.url
    };
    let request = Request::new(&method.to_ascii_uppercase(), url);
    Ok(if navigate {
        request.with_header("accept", "text/html,application/xhtml+xml,*/*;q=0.8")
    } else {
        request
    })
}

// ============================================================================
// Output
// ============================================================================

fn print_outcome(outcome: &EventOutcome) {
    match outcome {
        EventOutcome::Installed { install, activated } => {
            println!("Installed {} ({} entries precached)", install.cache_name, install.precached);
            if let Some(activated) = activated {
                print_purged(&activated.purged);
            }
        }
        EventOutcome::Activated(activated) => {
            println!("Activated {}", activated.cache_name);
            print_purged(&activated.purged);
        }
        EventOutcome::Response(response) => print_response(response, true),
        EventOutcome::Synced(report) => println!(
            "Delivered {}, still queued {}",
            report.delivered.len(),
            report.still_queued.len()
        ),
        EventOutcome::Refreshed(report) => {
            println!("Refreshed {} pages", report.refreshed.len());
            for path in &report.failed {
                println!("  failed: {}", path);
            }
        }
        EventOutcome::Ignored => println!("Ignored (no handler)"),
    }
}

fn print_purged(purged: &[String]) {
    for name in purged {
        println!("  purged {}", name);
    }
}

fn print_response(response: &Response, head: bool) {
    let source = if response.from_cache { "cache" } else { "network" };
    println!("HTTP {} ({})", response.status, source);
    if !head {
        println!("{}", response.text());
    }
}

fn print_status(config: &WorkerConfig, data_dir: &Path, status: &HostStatus) {
    let reg = &status.registration;
    println!("Origin:    {}", config.origin);
    println!("Data dir:  {}", data_dir.display());
    println!("Configured version: {}", config.version);
    match (&reg.active, reg.activated_at) {
        (Some(version), Some(at)) => println!("Active:    {} (since {})", version, at.to_rfc3339()),
        (Some(version), None) => println!("Active:    {}", version),
        _ => println!("Active:    none"),
    }
    if let Some(ref waiting) = reg.waiting {
        println!("Waiting:   {}", waiting);
    }

    println!("Caches:");
    if status.caches.is_empty() {
        println!("  (none)");
    }
    for cache in &status.caches {
        println!("  {} - {} entries", cache.name, cache.entries);
    }

    println!("Queued submissions: {}", status.queued);
    for tag in &status.sync.one_shot {
        println!("Pending sync: {}", tag);
    }
    for (tag, task) in &status.sync.periodic {
        let last = task
            .last_run
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "never".to_string());
        println!(
            "Periodic sync: {} every {}h, last run {}",
            tag, task.min_interval_hours, last
        );
    }
}
