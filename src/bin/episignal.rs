//! CLI entrypoint: runs the fusion service, ingests observation files
//! into the offline buffer, and manages configuration.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use episignal::buffer::{EngineSyncTarget, EnqueueOutcome, OfflineBuffer, RecordType};
use episignal::config::{generate_commented_config_template, Config};
use episignal::engine::CorrelationEngine;
use episignal::persistence::sled_store::SledEventStore;
use episignal::persistence::EventStore;
use episignal::retention::lifecycle::LifecycleManager;
use episignal::retention::KeyVault;
use episignal::signal::{normalize, RawObservation};
use episignal::utils::logging::init_logging;

#[derive(Debug, Parser)]
#[command(name = "episignal", author, version, about = "Signal fusion core for disease surveillance", long_about = None)]
struct Args {
    /// Path to the configuration file (TOML)
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Log level (overridden by EPISIGNAL_LOG)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the fusion service: buffer sync loop plus retention scans
    Run,
    /// Normalize a JSON-lines observation file into the offline buffer
    Ingest {
        /// Path to the observations file (one JSON object per line)
        #[arg(long)]
        file: PathBuf,
    },
    /// Remove SYNCED buffer records older than the retention window
    Purge,
    /// Write a commented configuration template
    InitConfig {
        /// Output path for the config file
        #[arg(short, long, default_value = "config.toml")]
        output: String,
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level);

    if let Command::InitConfig { output, force } = &args.command {
        if Path::new(output).exists() && !force {
            anyhow::bail!("{} already exists, use --force to overwrite", output);
        }
        generate_commented_config_template(output)
            .with_context(|| format!("failed to write {}", output))?;
        println!("Wrote configuration template to {}", output);
        return Ok(());
    }

    let config = if Path::new(&args.config).exists() {
        Config::from_file(&args.config).context("failed to load configuration")?
    } else {
        log::warn!("configuration file '{}' not found, using defaults", args.config);
        Config::default()
    };
    config.validate().context("invalid configuration")?;

    match args.command {
        Command::Run => run_service(config).await,
        Command::Ingest { file } => ingest_file(&config, &file),
        Command::Purge => {
            let buffer = OfflineBuffer::open(config.buffer)?;
            let purged = buffer.purge_synced(Utc::now())?;
            println!("Purged {} synced records", purged);
            Ok(())
        }
        Command::InitConfig { .. } => unreachable!("handled above"),
    }
}

/// Read one JSON observation per line, normalize, and buffer each
/// signal durably for the next sync pass. Malformed lines are reported
/// and skipped.
fn ingest_file(config: &Config, path: &Path) -> Result<()> {
    let buffer = OfflineBuffer::open(config.buffer.clone())?;
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;

    let (mut buffered, mut duplicates, mut rejected) = (0usize, 0usize, 0usize);
    for (lineno, line) in contents.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let raw: RawObservation = match serde_json::from_str(line) {
            Ok(raw) => raw,
            Err(e) => {
                log::warn!("line {}: unparseable observation: {}", lineno + 1, e);
                rejected += 1;
                continue;
            }
        };
        let signal = match normalize(raw) {
            Ok(signal) => signal,
            Err(e) => {
                log::warn!("line {}: rejected observation: {}", lineno + 1, e);
                rejected += 1;
                continue;
            }
        };
        let observed_at = signal.observed_at;
        match buffer.enqueue(RecordType::Signal, bincode::serialize(&signal)?, observed_at)? {
            EnqueueOutcome::Buffered(_) => buffered += 1,
            EnqueueOutcome::Duplicate(_) => duplicates += 1,
        }
    }
    println!("Buffered {} signals ({} duplicates, {} rejected)", buffered, duplicates, rejected);
    Ok(())
}

async fn run_service(config: Config) -> Result<()> {
    log::info!("fusion service starting");

    let engine = Arc::new(CorrelationEngine::new(config.engine.clone()));
    let store: Arc<dyn EventStore> = Arc::new(SledEventStore::open(
        config.retention.db_path.clone().map(PathBuf::from),
    )?);
    let vault = Arc::new(KeyVault::open(
        config
            .retention
            .db_path
            .clone()
            .map(|p| PathBuf::from(p).join("vault")),
    )?);
    let buffer = Arc::new(OfflineBuffer::open(config.buffer.clone())?);
    let lifecycle = Arc::new(LifecycleManager::new(
        store.clone(),
        vault,
        config.retention.clone(),
    ));
    let target = EngineSyncTarget::new(engine.clone(), store);
    let cancel = CancellationToken::new();

    // Buffer sync loop: replay durable records into the engine.
    let sync_handle = {
        let buffer = buffer.clone();
        let engine = engine.clone();
        let cancel = cancel.clone();
        let interval = std::time::Duration::from_secs(config.buffer.sync_interval_secs);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let now = Utc::now();
                        if let Err(e) = buffer.run_sync_pass(&target, now, 256).await {
                            log::error!("sync pass failed: {}", e);
                        }
                        engine.sweep_expired(now);
                        if let Err(e) = buffer.purge_synced(now) {
                            log::error!("buffer purge failed: {}", e);
                        }
                    }
                }
            }
        })
    };

    // Retention loop: decay HOT records, shred expired COLD records.
    let retention_handle = {
        let lifecycle = lifecycle.clone();
        let cancel = cancel.clone();
        let interval = std::time::Duration::from_secs(config.retention.scan_interval_secs);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let now = Utc::now();
                        match lifecycle.decay_scan(now, &cancel).await {
                            Ok(report) if report.transitioned > 0 => {
                                log::info!("decay scan archived {} records", report.transitioned)
                            }
                            Ok(_) => {}
                            Err(e) => log::error!("decay scan failed: {}", e),
                        }
                        match lifecycle.expiry_scan(now, &cancel).await {
                            Ok(report) if report.transitioned > 0 => {
                                log::info!("expiry scan shredded {} records", report.transitioned)
                            }
                            Ok(_) => {}
                            Err(e) => log::error!("expiry scan failed: {}", e),
                        }
                    }
                }
            }
        })
    };

    tokio::signal::ctrl_c().await?;
    log::info!("shutdown signal received, stopping");
    cancel.cancel();
    let _ = sync_handle.await;
    let _ = retention_handle.await;

    let report = engine.report();
    log::info!(
        "session: {} ingested, {} duplicates, {} fused events, {} clusters opened",
        report.signals_ingested,
        report.duplicates,
        report.events_fused,
        report.clusters_opened
    );
    Ok(())
}
