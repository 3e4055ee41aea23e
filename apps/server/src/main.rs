//! Guildtune Server - standalone playback orchestrator.
//!
//! Wires the real external adapters (yt-dlp, ffmpeg, the channel endpoint
//! table, the temp-dir storage probe) into guildtune-core and serves the
//! HTTP/WebSocket API until Ctrl+C or SIGTERM.

mod config;
mod credentials;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use guildtune_core::{
    bootstrap_services, start_server, Collaborators, EndpointTransport, FfmpegLauncher,
    TaskSpawner, TempDirProbe, YtDlpResolver,
};
use tokio::signal;

use crate::config::ServerConfig;
use crate::credentials::check_credentials;

/// Guildtune Server - per-room music playback.
#[derive(Parser, Debug)]
#[command(name = "guildtune-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (YAML).
    #[arg(short, long, value_name = "FILE", env = "GUILDTUNE_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "GUILDTUNE_LOG_LEVEL")]
    log_level: log::LevelFilter,

    /// Bind port (overrides config file).
    #[arg(short = 'p', long)]
    port: Option<u16>,

    /// Credential file passed to the resolver (overrides config file).
    #[arg(long, value_name = "FILE")]
    cookies: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Initialize logging
    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    if let Err(e) = run(args).await {
        log::error!("Fatal: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    log::info!("Guildtune Server v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let mut config =
        ServerConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    // Apply CLI overrides
    if let Some(port) = args.port {
        config.bind_port = port;
    }
    if let Some(cookies) = args.cookies {
        config.cookies_file = cookies;
    }

    check_credentials(&config.cookies_file).context("Credential check failed")?;

    let transport = EndpointTransport::new(config.channels.clone());
    log::info!(
        "Configuration: bind={}, channels={:?}",
        config.bind_addr(),
        transport.channels()
    );
    if config.channels.is_empty() {
        log::warn!("No channels configured; every connect will fail");
    }

    let core_config = config.to_core_config();
    let spawner = TaskSpawner::current();
    let collaborators = Collaborators {
        resolver: Arc::new(YtDlpResolver::new(
            &config.ytdlp_path,
            Some(config.cookies_file.clone()),
            Duration::from_secs(config.resolver_timeout_secs),
        )),
        transport: Arc::new(transport),
        launcher: Arc::new(FfmpegLauncher::new(&config.ffmpeg_path, spawner.clone())),
        storage: Arc::new(TempDirProbe::system(&core_config)),
        spawner,
    };

    let services =
        bootstrap_services(core_config, collaborators).context("Failed to bootstrap services")?;
    log::info!("Services bootstrapped successfully");

    services.start_background_tasks();

    let mut server = tokio::spawn(start_server(services.app_state(), config.bind_addr()));

    // Wait for a shutdown signal, or for the server to fail on its own
    let server_failure = tokio::select! {
        _ = shutdown_signal() => {
            log::info!("Shutdown signal received, cleaning up...");
            None
        }
        result = &mut server => Some(result),
    };

    // Graceful shutdown
    if !services.shutdown().await {
        log::warn!("Some room tasks did not finish before the drain timeout");
    }

    match server_failure {
        Some(Ok(Err(e))) => return Err(e).context("HTTP server failed"),
        Some(Err(e)) => return Err(e).context("HTTP server task panicked"),
        Some(Ok(Ok(()))) => {}
        None => match server.await {
            Ok(result) => result.context("HTTP server failed")?,
            Err(e) => log::warn!("HTTP server task ended abnormally: {}", e),
        },
    }

    log::info!("Shutdown complete");
    Ok(())
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            log::error!("Failed to listen for Ctrl+C: {}", e);
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
                log::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
