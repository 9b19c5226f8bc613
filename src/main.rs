// Station Keeper - admin CLI
// One-shot operations against the stations database, without the HTTP server

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use station_keeper::{
    Reconciler, ReconcilerConfig, SqliteStationStore, StationService, StationUpdate, TickOutcome,
};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "station-keeper")]
#[command(about = "Inspect and modify the stations database", long_about = None)]
#[command(version)]
struct Cli {
    /// SQLite database file
    #[arg(short, long, env = "DATABASE_PATH", default_value = "stations.db")]
    database: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List all station ids
    List,

    /// Show the first station with this id
    Show { id: i64 },

    /// Create a station with random values
    Add,

    /// Set actual and/or date on a station
    Update {
        id: i64,

        #[arg(long)]
        actual: Option<i64>,

        /// RFC 3339 timestamp
        #[arg(long)]
        date: Option<DateTime<Utc>>,
    },

    /// Delete the first station with this id
    Delete { id: i64 },

    /// Run a single reconciliation pass
    Tick {
        #[arg(long, default_value_t = station_keeper::reconciler::DEFAULT_THRESHOLD)]
        threshold: usize,
    },
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let store = SqliteStationStore::open(&cli.database)?;
    let service = StationService::new(Arc::new(store));

    match cli.command {
        Command::List => print_json(&service.list_ids()?)?,
        Command::Show { id } => print_json(&service.get(id)?)?,
        Command::Add => print_json(&service.create()?)?,
        Command::Update { id, actual, date } => {
            print_json(&service.update(id, StationUpdate::new(actual, date))?)?
        }
        Command::Delete { id } => print_json(&service.delete(id)?)?,
        Command::Tick { threshold } => {
            let config = ReconcilerConfig {
                threshold,
                ..ReconcilerConfig::default()
            };
            let reconciler = Reconciler::new(service.clone(), config);
            let outcome = reconciler.tick().context("Reconciliation tick failed")?;

            match &outcome {
                TickOutcome::Added { previous_count, .. } => {
                    println!(
                        "✓ another Station was added ({} → {})",
                        previous_count,
                        previous_count + 1
                    )
                }
                TickOutcome::Purged { deleted, .. } => {
                    println!("✓ all Stations were deleted ({} removed)", deleted)
                }
            }
            print_json(outcome.station())?;
        }
    }

    Ok(())
}
