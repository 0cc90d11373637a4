//! Proxybench - Entry Point
//!
//! Runs the benchmark scheduler until Ctrl+C or SIGTERM.

use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use proxybench::services::LogReporter;
use proxybench::{Config, Scheduler};

#[tokio::main]
async fn main() -> proxybench::Result<()> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("proxybench={}", config.log.level).into());
    if config.json_logs() {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().pretty())
            .init();
    }

    info!("Starting proxybench");

    let overrides = config.overrides();
    if let Some(proxy) = overrides.testing_proxy() {
        info!("Testing mode: benchmarking only {}", proxy);
    }

    let handle = Scheduler::start(config.run_options(), overrides, LogReporter)?;

    // Wait for shutdown signal
    shutdown_signal().await;
    info!("Shutdown signal received");

    handle.shutdown();
    handle.join().await;

    info!("Proxybench stopped");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
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
                tracing::error!("Failed to install SIGTERM handler: {}", e);
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
