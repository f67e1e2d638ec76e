#![doc = include_str!("../README.md")]

mod server;

use clap::Parser;
use quizrelay::{MemoryBackbone, MemoryStore, Relay};
use server::config::{CliArgs, ServerConfig};
use server::loopback::spawn_workers;
use server::telemetry::init_telemetry;
use tokio::{signal, time::timeout};
use tokio_util::sync::CancellationToken;

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = ServerConfig::try_from(args)?;

    let providers = init_telemetry()?;
    log_startup_info(&config);

    let backbone = MemoryBackbone::new();
    let relay = Relay::new(config.relay.clone(), backbone.clone(), MemoryStore::new())?;
    relay.start().await?;

    let workers_token = CancellationToken::new();
    let workers = match config.loopback {
        Some(latency) => spawn_workers(&relay, latency, workers_token.clone()),
        None => Vec::new(),
    };

    shutdown_signal().await;

    // 1. Stop the stand-in workers so nothing new lands on response channels
    workers_token.cancel();
    let wait = config.relay.shutdown_timeout;
    futures::future::join_all(workers.into_iter().map(|handle| timeout(wait, handle))).await;

    // 2. Stop listeners and the sweeper
    relay.shutdown().await;
    backbone.close();

    #[cfg(feature = "tracing")]
    tracing::info!("Service shut down successfully");

    providers.shutdown();
    Ok(())
}

fn log_startup_info(_config: &ServerConfig) {
    if cfg!(debug_assertions) {
        #[cfg(feature = "tracing")]
        tracing::info!("Starting relay with full config: {:#?}", _config);
    } else {
        #[cfg(feature = "tracing")]
        tracing::info!(
            "Starting relay with {} question and {} explanation workers (loopback: {})",
            _config.relay.question.pool_size,
            _config.relay.explanation.pool_size,
            _config.loopback.is_some()
        );
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    tokio::select! {
        () = ctrl_c => {
            #[cfg(feature = "tracing")]
            tracing::info!("Received Ctrl+C signal");
        },
        () = terminate => {
            #[cfg(feature = "tracing")]
            tracing::info!("Received SIGTERM signal");
        },
    }

    #[cfg(feature = "tracing")]
    tracing::info!("Shutdown signal received, terminating gracefully...");
}
