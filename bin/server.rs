// Station Keeper - Web Server
// REST API over the stations collection + the periodic reconciler

use anyhow::{Context, Result};
use clap::Parser;
use station_keeper::config::LoggingConfig;
use station_keeper::{create_app, AppConfig, Reconciler, SqliteStationStore, StationService};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "station-server")]
#[command(about = "Station CRUD API with a periodic reconciler", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "STATION_CONFIG")]
    config: Option<String>,

    /// Listen host (also used in the startup banner)
    #[arg(long, env = "HOST")]
    host: Option<String>,

    /// Listen port
    #[arg(short, long, env = "PORT")]
    port: Option<u16>,

    /// SQLite database file
    #[arg(long, env = "DATABASE_PATH")]
    database: Option<String>,

    /// Serve the API without running the reconciler
    #[arg(long)]
    no_reconciler: bool,

    /// Enable JSON logging
    #[arg(long)]
    json: bool,
}

fn init_tracing(logging: &LoggingConfig) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("{},tower_http=info", logging.level).into());

    if logging.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Shutdown signal received"),
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config =
        AppConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

    // CLI / well-known env vars win over the config file
    if let Some(host) = cli.host {
        config.server.host = host;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(database) = cli.database {
        config.database.path = database;
    }
    if cli.no_reconciler {
        config.reconciler.enabled = false;
    }
    if cli.json {
        config.logging.json = true;
    }

    init_tracing(&config.logging);

    println!("🌐 Station Keeper - Web Server");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let db_path = Path::new(&config.database.path);
    let store = SqliteStationStore::open(db_path)?;
    println!("✓ Database opened: {:?}", db_path);

    let service = StationService::new(Arc::new(store));

    // Reconciler runs in-process against the same service the API uses
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let reconciler_handle = if config.reconciler.enabled {
        let reconciler = Arc::new(Reconciler::new(service.clone(), config.reconciler_config()));
        println!(
            "✓ Reconciler: every {}s, threshold {}",
            config.reconciler.interval_secs, config.reconciler.threshold
        );
        Some(tokio::spawn(reconciler.run(shutdown_rx)))
    } else {
        println!("✓ Reconciler disabled");
        None
    };

    let app = create_app(
        service,
        Path::new(&config.server.static_dir),
        config.server.request_timeout(),
    );

    let addr = config.server.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    println!("\n🚀 Server running on http://{}", addr);
    println!("   API: http://{}/stations", addr);
    println!("   UI:  http://{}/", addr);
    println!("\n   Press Ctrl+C to stop\n");
    tracing::info!(%addr, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server failed")?;

    let _ = shutdown_tx.send(true);
    if let Some(handle) = reconciler_handle {
        if let Err(e) = handle.await {
            tracing::warn!(error = %e, "Reconciler task ended abnormally");
        }
    }

    println!("\n✅ Server stopped");
    Ok(())
}
