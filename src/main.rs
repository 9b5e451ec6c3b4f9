use clap::{Parser, ValueEnum};
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use reelgate::cache::spawn_purger;
use reelgate::config::ReelgateConfig;
use reelgate::http::{AppState, HttpServer};
use reelgate::ratelimit::spawn_sweeper;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "reelgate", version, about = "Rate limited movie metadata gateway")]
struct Args {
    /// Path to a YAML configuration file
    #[arg(short, long, env = "REELGATE_CONFIG")]
    config: Option<PathBuf>,

    /// Override the listen address
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Log output format
    #[arg(long, value_enum, default_value = "pretty")]
    log_format: LogFormat,

    /// Print the effective configuration (secrets redacted) and exit
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match args.log_format {
        LogFormat::Pretty => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(true)
            .init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init(),
    }

    info!("Starting Reelgate");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config = ReelgateConfig::load(args.config.as_deref())?;
    if let Some(listen) = args.listen {
        config.server.listen_addr = listen;
    }

    if args.print_config {
        print!("{}", config.to_redacted_yaml()?);
        return Ok(());
    }

    info!(
        listen_addr = %config.server.listen_addr,
        upstream = %config.upstream.base_url,
        "Configuration loaded"
    );
    if config.upstream.api_key.is_none() {
        warn!("No upstream API key configured; upstream calls will likely be rejected");
    }
    if config.admin.token.is_none() {
        warn!("No admin token configured; admin endpoints will reject every request");
    }

    let shutdown = CancellationToken::new();
    let state = AppState::from_config(&config, shutdown.clone())?;

    let sweeper = spawn_sweeper(
        state.counters.clone(),
        config.limiter.sweep_interval(),
        config.limiter.max_tracked_keys,
        shutdown.clone(),
    );

    let purger = spawn_purger(
        state.cache.clone(),
        config.cache.purge_interval(),
        shutdown.clone(),
    );

    let server = HttpServer::new(config.server.listen_addr, state);
    let signal = shutdown.clone();
    server
        .serve_with_shutdown(async move {
            shutdown_signal().await;
            signal.cancel();
        })
        .await?;

    shutdown.cancel();
    let _ = sweeper.await;
    let _ = purger.await;

    info!("Reelgate stopped");
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
