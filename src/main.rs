//! DNA serial processor.
//!
//! This is the entry point for the processor. It loads the configuration, sets
//! up logging and the optional metrics exporter, starts the pipeline and runs
//! until Ctrl+C or SIGTERM.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};

use dna_serial_processor::{
    accel::cpu_features, config::ProcessorConfig, logging::init_logging, telemetry, Processor,
};

fn config_path_from_args() -> Option<PathBuf> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-c" | "--config" => return args.next().map(PathBuf::from),
            other => {
                if let Some(path) = other.strip_prefix("--config=") {
                    return Some(PathBuf::from(path));
                }
            }
        }
    }
    None
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = match config_path_from_args() {
        Some(path) => ProcessorConfig::load_from(&path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => ProcessorConfig::load().context("loading configuration")?,
    };

    init_logging(&config.logging).context("initializing logging")?;
    let mut processor = Processor::new(config).context("creating processor")?;
    let config = processor.config();
    info!(
        "DNA serial processor {} starting with {} channels",
        env!("CARGO_PKG_VERSION"),
        config.channels.len()
    );
    info!("CPU features: {:?}", cpu_features());

    if let Some(listen) = &config.metrics_listen {
        let addr: SocketAddr = listen
            .parse()
            .with_context(|| format!("parsing metrics address '{}'", listen))?;
        telemetry::install_exporter(addr)?;
    }

    let stats_interval = Duration::from_secs(config.stats_interval_secs.max(1));
    let handle = processor
        .start()
        .context("starting processor")?
        .context("processor was already running")?;

    let mut ticker = tokio::time::interval(stats_interval);
    ticker.tick().await;
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = ticker.tick() => {
                let snapshot = processor.stats();
                info!("{}", snapshot);
                telemetry::record_snapshot(&snapshot);
                telemetry::record_thermal(processor.current_temperature(), processor.is_throttled());
                if processor.is_throttled() {
                    warn!(
                        "CPU thermal throttling: {:.1}°C",
                        processor.current_temperature().unwrap_or_default()
                    );
                }
                if let Some(pool) = processor.pool_stats() {
                    telemetry::record_pool_stats(&pool);
                }
            }
        }
    }

    handle.request_stop();
    // Joining the workers blocks; keep it off the async executor threads
    let processor = tokio::task::spawn_blocking(move || {
        processor.stop();
        processor
    })
    .await
    .context("joining shutdown task")?;

    let snapshot = processor.stats();
    println!("Final statistics:\n{}", snapshot);
    Ok(())
}
