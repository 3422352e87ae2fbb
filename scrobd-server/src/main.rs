//! scrobd-server - Main entry point
//!
//! Personal media-activity tracker: ingests playback and activity events from
//! webhooks, file imports, and third-party APIs, and reconciles them into a
//! unified scrobble timeline.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use scrobd_common::clock::SystemClock;
use scrobd_common::config::resolve_root_folder;
use scrobd_common::db::init_database;
use scrobd_common::db::settings::get_setting;
use scrobd_common::events::EventBus;
use scrobd_common::policy::ReconciliationPolicy;
use scrobd_server::api;
use scrobd_server::engine::Reconciler;
use scrobd_server::jobs;

/// Command-line arguments for scrobd-server
#[derive(Parser, Debug)]
#[command(name = "scrobd-server")]
#[command(about = "Personal media-activity tracker")]
#[command(version)]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "5750", env = "SCROBD_PORT")]
    port: u16,

    /// Root folder holding the database
    #[arg(short, long, env = "SCROBD_ROOT_FOLDER")]
    root_folder: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "scrobd_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let root_folder = resolve_root_folder(args.root_folder.as_deref(), "SCROBD_ROOT_FOLDER")
        .context("Failed to resolve root folder")?;
    info!("Starting scrobd-server on port {}", args.port);
    info!("Root folder: {}", root_folder.display());

    let db = init_database(&root_folder.join("scrobd.db"))
        .await
        .context("Failed to initialize database")?;
    let policy = ReconciliationPolicy::load(&db)
        .await
        .context("Failed to load reconciliation policy")?;
    let sweep_interval: u64 = get_setting(&db, "zombie_sweep_interval_seconds")
        .await
        .context("Failed to read sweep interval")?
        .unwrap_or(3600);

    let engine = Arc::new(Reconciler::new(
        db,
        policy,
        Arc::new(SystemClock),
        EventBus::new(256),
    ));

    let sweep = jobs::spawn_sweep_loop(engine.clone(), sweep_interval);
    info!("Zombie sweep scheduled every {} seconds", sweep_interval);

    let app = api::create_router(api::AppState {
        engine,
        port: args.port,
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    sweep.abort();
    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
