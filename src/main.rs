//! Binary entrypoint for the MeshViewer CLI.
//!
//! Commands:
//! - `init` - write a starter `config.toml` and create the data directory
//! - `start [--snapshot <path>]` - run the ingestion loop until Ctrl-C
//! - `poll [--snapshot <path>]` - run a single ingestion cycle
//! - `nodes [--all] [--snapshot <path>]` - print the current node listing
//! - `history [--hours <h>] [--node <id>]` - dump persisted samples as JSON
//! - `latest` - print the most recent batch record
//! - `status [--hours <h>]` - summary of the log plus process counters
//! - `trim [--days <n>]` - apply retention once
//!
//! See the library crate docs for module‑level details: `meshviewer::`.
use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use log::{info, warn};

use meshviewer::config::Config;
use meshviewer::meshtastic::{self, JsonFileProvider, NodeSnapshotProvider};
use meshviewer::metrics;
use meshviewer::monitor::{CycleOutcome, Monitor};
use meshviewer::storage::{format_timestamp, TelemetryStore};
use meshviewer::validation::normalize_node_id;

#[derive(Parser)]
#[command(name = "meshviewer")]
#[command(about = "Telemetry history for Meshtastic mesh networks")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (can be used before or after subcommand)
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: String,

    /// Verbose logging (-v, -vv for more; may appear before or after subcommand)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new configuration
    Init,
    /// Poll the mesh and persist telemetry until interrupted
    Start {
        /// Node-db JSON dump to read (overrides monitor.snapshot_file)
        #[arg(short, long)]
        snapshot: Option<String>,
    },
    /// Run one ingestion cycle and exit
    Poll {
        #[arg(short, long)]
        snapshot: Option<String>,
    },
    /// List nodes from the current snapshot
    Nodes {
        /// Include every node with telemetry, not only favorites
        #[arg(short, long)]
        all: bool,
        #[arg(short, long)]
        snapshot: Option<String>,
    },
    /// Print persisted samples as JSON
    History {
        /// Window in hours, fractions allowed
        #[arg(long, default_value_t = 24.0)]
        hours: f64,
        /// Restrict to one node (!hex, 0x-hex or decimal node number)
        #[arg(short, long)]
        node: Option<String>,
    },
    /// Print the most recent batch record
    Latest,
    /// Show log summary and counters
    Status {
        #[arg(long, default_value_t = 24.0)]
        hours: f64,
    },
    /// Drop data older than the retention horizon
    Trim {
        /// Overrides storage.retention_days
        #[arg(short, long)]
        days: Option<u32>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if matches!(cli.command, Commands::Init) {
        init_logging(&None, cli.verbose);
        info!("Initializing new MeshViewer configuration");
        Config::create_default(&cli.config).await?;
        info!("Configuration file created at {}", cli.config);
        let defaults = Config::default();
        let store = TelemetryStore::open(&defaults.storage.data_dir).await?;
        info!("Telemetry log ready in {}", store.data_dir().display());
        return Ok(());
    }

    let config = Config::load(&cli.config).await?;
    init_logging(&Some(config.clone()), cli.verbose);

    match cli.command {
        // Handled before the config is loaded
        Commands::Init => {}
        Commands::Start { snapshot } => {
            info!("Starting MeshViewer v{}", env!("CARGO_PKG_VERSION"));
            let provider = snapshot_provider(&config, snapshot);
            let mut monitor = Monitor::from_config(&config).await?;
            monitor.run(Box::new(provider)).await?;
        }
        Commands::Poll { snapshot } => {
            let mut provider = snapshot_provider(&config, snapshot);
            let mut monitor = Monitor::from_config(&config).await?;
            match monitor.run_cycle(&mut provider, chrono::Utc::now()).await {
                CycleOutcome::Completed { save, .. } if save.throttled => {
                    println!("Throttled: previous batch is too recent");
                }
                CycleOutcome::Completed { save, .. } => {
                    println!(
                        "Wrote {} node(s) ({} unchanged, {} without metrics)",
                        save.written, save.unchanged, save.without_metrics
                    );
                }
                CycleOutcome::ProviderUnavailable => {
                    return Err(anyhow!("No snapshot available from {}", provider.description()));
                }
                CycleOutcome::WriterBusy => println!("Writer busy, nothing done"),
                CycleOutcome::PersistenceFailed => {
                    return Err(anyhow!("Failed to persist telemetry; see log"));
                }
            }
        }
        Commands::Nodes { all, snapshot } => {
            let mut provider = snapshot_provider(&config, snapshot);
            let nodes = provider
                .snapshot()
                .map_err(|e| anyhow!("Failed to read {}: {}", provider.description(), e))?;
            let whole_mesh = all || config.monitor.show_all_nodes;
            let lines = meshtastic::listing(&nodes, whole_mesh);
            if lines.is_empty() {
                println!("No {} with telemetry", if whole_mesh { "nodes" } else { "favorite nodes" });
            }
            for line in lines {
                println!("{}", line);
            }
        }
        Commands::History { hours, node } => {
            let node = match node {
                Some(raw) => Some(
                    normalize_node_id(&raw).map_err(|e| anyhow!("Invalid --node '{}': {}", raw, e))?,
                ),
                None => None,
            };
            let store = TelemetryStore::open(&config.storage.data_dir).await?;
            let rows = store.history(hours, node.as_deref()).await?;
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
        Commands::Latest => {
            let store = TelemetryStore::open(&config.storage.data_dir).await?;
            let latest = store.latest().await?;
            println!("{}", serde_json::to_string_pretty(&latest)?);
        }
        Commands::Status { hours } => {
            let store = TelemetryStore::open(&config.storage.data_dir).await?;
            let summary = store.summary(hours).await?;
            println!("MeshViewer Status");
            println!("=================");
            println!("Data directory: {}", store.data_dir().display());
            println!("Window: last {} hour(s)", hours);
            println!("Records: {}", summary.record_count);
            println!("Nodes: {}", summary.unique_node_count);
            match summary.time_range {
                Some(range) => println!(
                    "Range: {} .. {}",
                    format_timestamp(&range.start),
                    format_timestamp(&range.end)
                ),
                None => println!("Range: (no data)"),
            }
            if let Some(latest) = summary.latest_timestamp {
                println!("Latest sample: {}", format_timestamp(&latest));
            }

            let counters = metrics::snapshot();
            println!();
            println!("Counters (this process)");
            println!("  polls: {}", counters.polls);
            println!("  provider failures: {}", counters.provider_failures);
            println!("  rows written: {}", counters.rows_written);
            println!("  throttled cycles: {}", counters.throttled_cycles);
            println!("  unchanged nodes: {}", counters.unchanged_nodes);
            println!("  io failures: {}", counters.io_failures);
            println!("  malformed skipped: {}", counters.malformed_skipped);
            println!("  rows trimmed: {}", counters.rows_trimmed);
        }
        Commands::Trim { days } => {
            let store = TelemetryStore::open(&config.storage.data_dir).await?;
            let days = days.unwrap_or(config.storage.retention_days);
            let report = store.trim(days).await?;
            println!(
                "Kept {} row(s) / {} batch(es); removed {} row(s) / {} batch(es)",
                report.rows_kept, report.records_kept, report.rows_removed, report.records_removed
            );
        }
    }

    Ok(())
}

/// File provider for `--snapshot`, falling back to the configured dump.
fn snapshot_provider(config: &Config, snapshot: Option<String>) -> JsonFileProvider {
    let path = snapshot.unwrap_or_else(|| config.monitor.snapshot_file.clone());
    if !std::path::Path::new(&path).exists() {
        warn!("Snapshot file {} does not exist yet", path);
    }
    JsonFileProvider::new(path)
}

fn init_logging(config: &Option<Config>, verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    // CLI verbosity overrides the configured level
    let base_level = match verbosity {
        0 => config
            .as_ref()
            .and_then(|c| c.logging.level_filter())
            .unwrap_or(log::LevelFilter::Info),
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(base_level);

    let log_file = config.as_ref().and_then(|c| c.logging.file.as_ref()).and_then(|file| {
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(file)
            .ok()
    });

    if let Some(f) = log_file {
        let file = std::sync::Arc::new(std::sync::Mutex::new(f));
        // Echo to the console only when attached to a terminal
        let is_tty = atty::is(atty::Stream::Stdout);
        builder.format(move |fmt, record| {
            let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
            let line = format!("{} [{}] {}", ts, record.level(), record.args());
            if let Ok(mut guard) = file.lock() {
                let _ = writeln!(guard, "{}", line);
            }
            if is_tty {
                writeln!(fmt, "{}", line)
            } else {
                Ok(())
            }
        });
    } else {
        builder.format(|fmt, record| {
            let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
            writeln!(fmt, "{} [{}] {}", ts, record.level(), record.args())
        });
    }
    let _ = builder.try_init();
}
