//! tally CLI: operator interface to the batch coordinator.
//!
//! Flushed batches are written to stdout as JSON lines; logs go to stderr.

use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::path::PathBuf;
use tally_rs::config::{BatchConfig, Config};
use tally_rs::db::Db;
use tally_rs::delivery::JsonLinesSink;
use tally_rs::engine::Coordinator;
use tally_rs::model::{Action, Category, InteractionEvent};
use tally_rs::store::MemoryEventStore;
use tally_rs::telemetry::{TelemetryConfig, TelemetryGuard, init_telemetry};
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser)]
#[command(name = "tally", about = "Durable batching for analytics interaction events")]
struct Cli {
    /// TOML file with a [batch] table, applied over the environment
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Keep events in memory only (no database, nothing survives exit)
    #[arg(long, global = true)]
    ephemeral: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Read events as JSON lines from stdin and deliver batches to stdout
    Serve {
        /// Flush everything still pending before exiting
        #[arg(long)]
        flush_on_exit: bool,
    },
    /// Submit a single event
    Submit {
        /// Event category: asset | experience
        category: Category,
        /// Asset URL or experience identifier
        subject: String,
        /// Interaction: view | click
        #[arg(long, default_value = "view")]
        action: Action,
        /// Where the interaction happened
        #[arg(long)]
        location: Option<String>,
        /// JSON detail attached to the event
        #[arg(long)]
        detail: Option<String>,
    },
    /// Show pending batch state per category
    Status,
    /// Deliver everything pending now
    Flush,
    /// Discard everything pending without delivering it
    Clear,
}

/// One line of `serve` input.
#[derive(Deserialize)]
struct SubmitLine {
    category: Category,
    #[serde(flatten)]
    event: InteractionEvent,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let settings = if cli.ephemeral {
        None
    } else {
        Some(Config::from_env()?)
    };

    let mut batch = settings.as_ref().map(|s| s.batch).unwrap_or_default();
    if let Some(ref path) = cli.config {
        batch = batch.merge_file(path)?;
    }

    let telemetry = init_logging(settings.as_ref())?;
    let (coordinator, db) = start_coordinator(settings.as_ref(), batch).await?;

    let result = match cli.command {
        Command::Serve { flush_on_exit } => cmd_serve(&coordinator, flush_on_exit).await,
        Command::Submit {
            category,
            subject,
            action,
            location,
            detail,
        } => cmd_submit(&coordinator, category, subject, action, location, detail).await,
        Command::Status => cmd_status(&coordinator).await,
        Command::Flush => cmd_flush(&coordinator).await,
        Command::Clear => cmd_clear(&coordinator).await,
    };

    coordinator.shutdown().await;
    if let Some(db) = db {
        db.close().await;
    }
    telemetry.force_flush();
    result
}

fn init_logging(settings: Option<&Config>) -> anyhow::Result<TelemetryGuard> {
    let guard = init_telemetry(TelemetryConfig {
        endpoint: settings.and_then(|s| s.otel_endpoint.clone()),
        service_name: "tally".to_string(),
        default_filter: settings
            .map(|s| s.log_level.clone())
            .unwrap_or_else(|| "info".to_string()),
    })?;
    Ok(guard)
}

async fn start_coordinator(
    settings: Option<&Config>,
    batch: BatchConfig,
) -> anyhow::Result<(Coordinator, Option<Db>)> {
    let builder = Coordinator::builder()
        .config(batch)
        .sink(Category::Asset, JsonLinesSink::new(std::io::stdout()))
        .sink(Category::Experience, JsonLinesSink::new(std::io::stdout()));

    match settings {
        Some(settings) => {
            let db = Db::open(&settings.database_path).await?;
            db.migrate().await?;
            let coordinator = builder
                .store(Category::Asset, db.queue(Category::Asset.store_name()))
                .store(Category::Experience, db.queue(Category::Experience.store_name()))
                .start()
                .await?;
            Ok((coordinator, Some(db)))
        }
        None => {
            let coordinator = builder
                .store(Category::Asset, MemoryEventStore::new(Category::Asset.store_name()))
                .store(
                    Category::Experience,
                    MemoryEventStore::new(Category::Experience.store_name()),
                )
                .start()
                .await?;
            Ok((coordinator, None))
        }
    }
}

async fn cmd_serve(coordinator: &Coordinator, flush_on_exit: bool) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        let line = tokio::select! {
            _ = &mut ctrl_c => {
                tracing::info!("interrupted, stopping");
                break;
            }
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            tracing::info!("input closed, stopping");
            break;
        };
        if line.trim().is_empty() {
            continue;
        }

        let parsed: SubmitLine = match serde_json::from_str(&line) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!(error = %e, "skipping malformed input line");
                continue;
            }
        };
        if let Err(e) = coordinator.submit(parsed.category, parsed.event).await {
            tracing::warn!(error = %e, "event not accepted");
        }
    }

    if flush_on_exit {
        coordinator.flush().await;
    }
    Ok(())
}

async fn cmd_submit(
    coordinator: &Coordinator,
    category: Category,
    subject: String,
    action: Action,
    location: Option<String>,
    detail: Option<String>,
) -> anyhow::Result<()> {
    let mut event = InteractionEvent::new(subject, action);
    if let Some(location) = location {
        event = event.location(location);
    }
    if let Some(json) = detail {
        event = event.detail(serde_json::from_str(&json)?);
    }

    let id = coordinator.submit(category, event).await?;
    eprintln!("Accepted: {id} ({category})");
    Ok(())
}

async fn cmd_status(coordinator: &Coordinator) -> anyhow::Result<()> {
    let config = coordinator.config();
    println!(
        "batching: {}  max_batch_size: {}  max_wait: {:?}  flush_interval: {:?}",
        if config.batching_enabled { "on" } else { "off" },
        config.max_batch_size,
        config.max_wait,
        config.flush_interval,
    );
    println!("{:<12}  {:>7}  OLDEST", "CATEGORY", "PENDING");
    println!("{}", "-".repeat(48));

    for category in Category::ALL {
        let snapshot = coordinator.pending(category).await;
        let oldest = snapshot
            .first_event_at
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "-".to_string());
        println!("{:<12}  {:>7}  {}", category, snapshot.pending_count, oldest);
    }
    Ok(())
}

async fn cmd_flush(coordinator: &Coordinator) -> anyhow::Result<()> {
    let reports = coordinator.flush().await;
    if reports.is_empty() {
        eprintln!("Nothing pending.");
    }
    for report in reports {
        eprintln!(
            "Flushed {}: {} read, {} delivered, {} collapsed{}",
            report.category,
            report.read,
            report.delivered,
            report.collapsed,
            report
                .delivery_error
                .map(|e| format!(" (delivery failed: {e})"))
                .unwrap_or_default(),
        );
    }
    Ok(())
}

async fn cmd_clear(coordinator: &Coordinator) -> anyhow::Result<()> {
    coordinator.clear().await?;
    eprintln!("Cleared all pending events.");
    Ok(())
}
