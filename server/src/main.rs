//! dumpvaultd binary — thin CLI shell over the [`dumpvault_server`] library crate.

use axum::{
    routing::{delete, get, post},
    Router,
};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use dumpvault_core::{Config, Engine};
use dumpvault_server::api::{
    api_health, delete_item, events, ingest_file, ingest_link, ingest_text, list_items, search,
};
use dumpvault_server::AppState;

/// dumpvault daemon — local-first capture vault with a minimal HTTP+SSE surface.
#[derive(Parser)]
#[command(name = "dumpvaultd", version, about, long_about = None)]
struct Cli {
    /// Vault directory (default: platform data dir, see dumpvault.toml)
    #[arg(long)]
    vault_dir: Option<PathBuf>,

    /// Path to dumpvault.toml (default: platform config dir)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Bind to 0.0.0.0 instead of 127.0.0.1 (localhost)
    #[arg(long)]
    bind_all: bool,
}

// ---------------------------------------------------------------------------
// Graceful shutdown signal
// ---------------------------------------------------------------------------

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to register SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => info!("Received SIGINT, shutting down..."),
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.expect("failed to listen for Ctrl+C");
        info!("Received Ctrl+C, shutting down...");
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("dumpvault=info".parse().unwrap()),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref());
    if let Some(vault_dir) = &cli.vault_dir {
        config.vault_dir = Some(vault_dir.clone());
    }

    let engine = Engine::open(config).unwrap_or_else(|e| {
        error!(error = %e, "Failed to open vault");
        std::process::exit(1);
    });
    info!(vault = %engine.vault_dir().display(), "Vault opened");

    let state = AppState { engine: Arc::new(engine), start_time: std::time::Instant::now() };

    let app = Router::new()
        .route("/health", get(api_health))
        .route("/ingest/text", post(ingest_text))
        .route("/ingest/link", post(ingest_link))
        .route("/ingest/file", post(ingest_file))
        .route("/search", get(search))
        .route("/items", get(list_items))
        .route("/items/{id}", delete(delete_item))
        .route("/events", get(events))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .with_state(state);

    let bind_addr = if cli.bind_all { "0.0.0.0" } else { "127.0.0.1" };
    let explicit_port: Option<u16> = std::env::var("PORT").ok().and_then(|p| p.parse().ok());

    let listener = if let Some(port) = explicit_port {
        tokio::net::TcpListener::bind(format!("{bind_addr}:{port}")).await.unwrap_or_else(|e| {
            error!(port = port, error = %e, "Could not bind to port");
            eprintln!("  PORT={port} was set explicitly. Choose a different port.");
            std::process::exit(1);
        })
    } else {
        // Auto-scan a small fixed range rather than failing on the first busy port.
        const BASE: u16 = 8742;
        const RANGE: u16 = 10;
        let mut found = None;
        for port in BASE..BASE + RANGE {
            match tokio::net::TcpListener::bind(format!("{bind_addr}:{port}")).await {
                Ok(l) => {
                    found = Some(l);
                    break;
                }
                Err(_) => continue,
            }
        }
        found.unwrap_or_else(|| {
            error!(range_start = BASE, range_end = BASE + RANGE - 1, "No free port found");
            eprintln!("  Try: PORT=<port> dumpvaultd");
            std::process::exit(1);
        })
    };

    let port = listener.local_addr().unwrap().port();
    info!(port = port, "http://{bind_addr}:{port}");
    // Machine-readable line for scripts launching the overlay shell.
    eprintln!("DUMPVAULT_PORT={port}");

    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await.unwrap();
}
