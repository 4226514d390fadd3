//! # DealNudge: scheduled marketplace notification sweeps
//!
//! Each invocation runs one job once; an external scheduler (cron, k8s
//! CronJob, systemd timer) decides when.
//!
//! Usage:
//!   dealnudge run draft-reminder            # One sweep
//!   dealnudge run weekly-digest --dry-run   # Log instead of send, no history writes
//!   dealnudge run profile-reminder --json   # Machine-readable outcome on stdout
//!   dealnudge list                          # Jobs and effective settings
//!   dealnudge unlock dealroom-inactivity    # Clear a lock left by a dead holder
//!   dealnudge seed fixtures.json            # Load candidates into the SQLite store

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dealnudge_channels::LogSender;
use dealnudge_core::config::LockBackendKind;
use dealnudge_core::{
    CandidateEntity, DealNudgeConfig, EntityStore, LockBackend, NotificationSender, SystemClock,
};
use dealnudge_db::{PgAdvisoryLock, SqliteStore};
use dealnudge_scheduler::{
    FileEntityStore, JobPolicy, JobRegistry, JobRunner, MemoryLockBackend, RunOutcome,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "dealnudge",
    version,
    about = "📬 DealNudge: lock-guarded, rate-limited notification sweeps"
)]
struct Cli {
    /// Config file (default: ~/.dealnudge/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one sweep of a job
    Run {
        /// Job name (see `dealnudge list`)
        job: String,
        /// Log notifications instead of sending them; history is left untouched
        #[arg(long)]
        dry_run: bool,
        /// Print the outcome as JSON
        #[arg(long)]
        json: bool,
        /// Read candidates from a JSON fixture file instead of the database
        #[arg(long)]
        fixtures: Option<PathBuf>,
    },
    /// List jobs with their effective settings
    List,
    /// Force-release a job's lock
    Unlock {
        job: String,
    },
    /// Load candidates from a JSON file into the SQLite store
    Seed {
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "dealnudge=debug,dealnudge_scheduler=debug,dealnudge_db=debug,dealnudge_channels=debug"
    } else {
        "dealnudge=info,dealnudge_scheduler=info,dealnudge_db=info,dealnudge_channels=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match execute(cli).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("❌ {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn execute(cli: Cli) -> Result<ExitCode> {
    let mut config = match &cli.config {
        Some(path) => DealNudgeConfig::load_from(path)?,
        None => DealNudgeConfig::load()?,
    };
    config.apply_env();
    let registry = JobRegistry::from_config(&config)?;

    match cli.command {
        Commands::Run {
            job,
            dry_run,
            json,
            fixtures,
        } => {
            let job = registry.get(&job)?;
            run(&config, job, dry_run, json, fixtures.as_deref()).await
        }
        Commands::List => {
            list(&registry);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Unlock { job } => {
            let job = registry.get(&job)?;
            let (store, lock) = backends(&config, None).await?;
            let runner = JobRunner::new(lock, store, Arc::new(LogSender::new()));
            if runner.force_unlock(job).await? {
                println!("🔓 Released lock {}", job.lock_key());
            } else {
                println!("No lock held for {}", job.lock_key());
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Seed { file } => {
            let json = std::fs::read_to_string(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            let entities: Vec<CandidateEntity> = serde_json::from_str(&json)?;
            let db_path = config.expanded_database_path();
            let store = SqliteStore::open(&db_path)?;
            for entity in &entities {
                store.upsert(entity)?;
            }
            println!("🌱 Loaded {} candidates into {}", entities.len(), db_path.display());
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Entity store and lock backend for this invocation.
async fn backends(
    config: &DealNudgeConfig,
    fixtures: Option<&Path>,
) -> Result<(Arc<dyn EntityStore>, Arc<dyn LockBackend>)> {
    if let Some(path) = fixtures {
        tracing::info!("📂 Using fixtures from {}", path.display());
        let store: Arc<dyn EntityStore> = Arc::new(FileEntityStore::open(path)?);
        let lock: Arc<dyn LockBackend> = Arc::new(MemoryLockBackend::new(Arc::new(SystemClock)));
        return Ok((store, lock));
    }

    let db_path = config.expanded_database_path();
    tracing::debug!("💾 Opening {}", db_path.display());
    let sqlite = Arc::new(SqliteStore::open(&db_path)?);
    let lock: Arc<dyn LockBackend> = match config.lock_backend {
        LockBackendKind::Sqlite => sqlite.clone(),
        LockBackendKind::Postgres => Arc::new(PgAdvisoryLock::connect(&config.postgres_url).await?),
    };
    let store: Arc<dyn EntityStore> = sqlite;
    Ok((store, lock))
}

/// `[prefix:]host:pid:nonce`, unique per process.
fn holder_id(config: &DealNudgeConfig) -> String {
    let host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown-host".into());
    let nonce = uuid::Uuid::new_v4().simple().to_string();
    let id = format!("{host}:{}:{}", std::process::id(), &nonce[..8]);
    match &config.holder_prefix {
        Some(prefix) => format!("{prefix}:{id}"),
        None => id,
    }
}

async fn run(
    config: &DealNudgeConfig,
    job: &dyn JobPolicy,
    dry_run: bool,
    json: bool,
    fixtures: Option<&Path>,
) -> Result<ExitCode> {
    let (store, lock) = backends(config, fixtures).await?;
    let sender: Arc<dyn NotificationSender> = if dry_run {
        Arc::new(LogSender::new())
    } else {
        dealnudge_channels::from_config(&config.sender)?
    };

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::warn!("🛑 Shutdown signal received, stopping after the current send");
        on_interrupt.cancel();
    });

    let holder = holder_id(config);
    let runner = JobRunner::new(lock, store, sender)
        .with_holder(&holder)
        .with_lease(Duration::from_secs(config.lease_secs))
        .with_cancellation(cancel)
        .dry_run(dry_run);

    tracing::info!(
        "📬 Running {}{} as {holder}",
        job.name(),
        if dry_run { " (dry run)" } else { "" }
    );
    let outcome = runner.run(job).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        print_outcome(&outcome);
    }
    Ok(ExitCode::SUCCESS)
}

/// Resolves on Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

fn print_outcome(outcome: &RunOutcome) {
    match outcome {
        RunOutcome::Skipped(skip) => println!("⏭️  Skipped: {}", skip.reason),
        RunOutcome::Completed(s) => {
            println!(
                "📊 {}: {} candidates, {} sent, {} skipped, {} errors (paced {:.1}s)",
                s.job,
                s.candidates,
                s.sent,
                s.skipped,
                s.errors,
                s.paced_ms as f64 / 1000.0
            );
            for (category, tally) in &s.by_category {
                println!(
                    "   {category}: {} sent, {} skipped, {} errors",
                    tally.sent, tally.skipped, tally.errors
                );
            }
            if s.history_write_failures > 0 {
                println!(
                    "   ⚠️  {} sends could not be recorded and may repeat next run",
                    s.history_write_failures
                );
            }
            if let Some(reason) = s.stopped {
                println!("   🛑 Stopped early: {reason:?}");
            }
            for msg in &s.error_messages {
                println!("   ❌ {msg}");
            }
        }
    }
}

fn list(registry: &JobRegistry) {
    println!("📋 {} jobs\n", registry.len());
    for job in registry.iter() {
        let s = job.settings();
        let max = s
            .max_notifications
            .map(|m| m.to_string())
            .unwrap_or_else(|| "unlimited".into());
        println!(
            "{} {} (lock {})",
            if s.enabled { "✅" } else { "⏸️ " },
            job.name(),
            s.lock_key
        );
        println!("   {}", job.description());
        println!(
            "   threshold {}d, every {}d, max {max}, {}/min, {:?}, {:?}\n",
            s.threshold_days, s.min_days_between, s.rate_limit_per_minute, s.batch_mode, s.pacing
        );
    }
}
