// crates/quanta-daemon/src/main.rs
//
// Binary entrypoint for the payout daemon.
//
// Loads configuration, initializes tracing, opens the configured store,
// and either runs the periodic reconcile loop or executes a single
// administrative job and prints its outcome as JSON.

mod config;
mod scheduler;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use config::DaemonConfig;
use scheduler::ReconcileScheduler;
use uuid::Uuid;

use quanta_core::ids::RecipientId;
use quanta_core::model::ClaimEntry;
use quanta_core::money::PayoutFraction;
use quanta_core::traits::LedgerStore;
use quanta_economics::{Job, JobRunner};
use quanta_store::{MemoryStore, RocksStore};

/// Survey payout daemon: apportions survey funds to recipients by vote.
#[derive(Parser, Debug)]
#[command(name = "quanta-daemon", version = "0.1.0", about = "Survey payout job runner")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "~/.quanta/config.toml")]
    config: String,

    /// Override the configured store backend ("rocksdb" or "memory").
    #[arg(long)]
    store: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Reconcile on the configured interval until ctrl-c.
    Run,
    /// Run one reconcile pass and print the payout statement.
    Reconcile,
    /// Exclude every recipient not listed in the eligibility file.
    Exclude {
        /// JSON array of eligible recipient ids.
        #[arg(long)]
        eligible: PathBuf,
        /// Resume an existing batch instead of starting a new one.
        #[arg(long)]
        batch: Option<Uuid>,
    },
    /// Restore the unsettled rows of an exclusion batch.
    Restore {
        #[arg(long)]
        batch: Uuid,
    },
    /// Split an exclusion batch's pool among weighted claims.
    Redistribute {
        #[arg(long)]
        batch: Uuid,
        /// JSON array of `{"claimant_id": ..., "weight": ...}` entries.
        #[arg(long)]
        claims: PathBuf,
    },
    /// Print a recipient's payable balance.
    Balance {
        #[arg(long)]
        recipient: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // The config decides the default log level, so it is read before the
    // subscriber exists and any load failure is reported right after.
    let loaded = DaemonConfig::load(&expand_tilde(&args.config));
    let default_level = loaded
        .as_ref()
        .map(|cfg| cfg.log_level.clone())
        .unwrap_or_else(|_| "info".to_string());

    // Initialize tracing subscriber for structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut daemon_config = match loaded {
        Ok(cfg) => {
            tracing::info!("Loaded configuration from {}", args.config);
            cfg
        }
        Err(e) => {
            tracing::warn!(
                "Could not load config from {}: {}. Using defaults.",
                args.config,
                e
            );
            DaemonConfig::default()
        }
    };

    // CLI --store flag overrides the config file value.
    if let Some(store) = args.store.clone() {
        daemon_config.store = store;
    }
    daemon_config.validate()?;
    let fraction = daemon_config.payout_fraction()?;

    tracing::info!("Quanta payout daemon v0.1.0");
    tracing::info!("Store backend: {}", daemon_config.store);
    tracing::info!("Payout fraction: {} bps", fraction.bps());

    match daemon_config.store.as_str() {
        "memory" => {
            let store = Arc::new(MemoryStore::new());
            execute(store, fraction, &daemon_config, args.command).await
        }
        _ => {
            let data_dir = expand_tilde(&daemon_config.data_dir);
            let rocksdb_path = format!("{}/rocksdb", data_dir);
            let store = Arc::new(
                RocksStore::open(&rocksdb_path)
                    .map_err(|e| format!("Failed to open RocksDB: {}", e))?,
            );
            tracing::info!("RocksDB opened at {}", rocksdb_path);
            execute(store, fraction, &daemon_config, args.command).await
        }
    }
}

async fn execute<S: LedgerStore + 'static>(
    store: Arc<S>,
    fraction: PayoutFraction,
    daemon_config: &DaemonConfig,
    command: Command,
) -> Result<(), Box<dyn std::error::Error>> {
    let runner = Arc::new(JobRunner::new(store, fraction));

    let job = match command {
        Command::Run => return run_daemon(runner, daemon_config).await,
        Command::Reconcile => Job::Reconcile,
        Command::Exclude { eligible, batch } => Job::Exclude {
            eligible: read_eligible(&eligible)?,
            batch_id: batch,
        },
        Command::Restore { batch } => Job::Restore { batch_id: batch },
        Command::Redistribute { batch, claims } => Job::Redistribute {
            batch_id: batch,
            claims: read_claims(&claims)?,
        },
        Command::Balance { recipient } => Job::Balance {
            recipient: RecipientId::new(recipient),
        },
    };

    let name = job.name();
    let outcome = runner.run(job).await?;
    tracing::info!("Job '{}' completed", name);
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}

/// Spawn the job runner and feed it scheduled reconciles until ctrl-c.
async fn run_daemon<S: LedgerStore + 'static>(
    runner: Arc<JobRunner<S>>,
    daemon_config: &DaemonConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let (job_tx, job_rx) = tokio::sync::mpsc::channel::<Job>(daemon_config.queue_depth);

    let worker_runner = runner.clone();
    let worker = tokio::spawn(async move {
        worker_runner.serve(job_rx).await;
    });

    let mut scheduler = ReconcileScheduler::new(
        Duration::from_secs(daemon_config.reconcile_interval_secs),
        job_tx,
    );
    let result = scheduler.run().await;

    // Dropping the scheduler closes the queue; the runner drains what is left.
    drop(scheduler);
    if let Err(e) = worker.await {
        tracing::error!("Job runner task failed: {}", e);
    }
    tracing::info!("Daemon stopped");
    result
}

fn read_eligible(path: &Path) -> Result<HashSet<RecipientId>, Box<dyn std::error::Error>> {
    let contents = std::fs::read_to_string(path)?;
    let ids: Vec<RecipientId> = serde_json::from_str(&contents)?;
    Ok(ids.into_iter().collect())
}

fn read_claims(path: &Path) -> Result<Vec<ClaimEntry>, Box<dyn std::error::Error>> {
    let contents = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
}

/// Expand a leading `~/` to the user's home directory.
fn expand_tilde(path: &str) -> String {
    if path.starts_with("~/") {
        if let Some(home) = dirs::home_dir() {
            return format!("{}{}", home.display(), &path[1..]);
        }
    }
    path.to_string()
}
