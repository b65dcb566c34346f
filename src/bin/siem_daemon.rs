use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use siem_pipeline::config::{Config, PipelineMode};
use siem_pipeline::ingress::http;
use siem_pipeline::Pipeline;
use tokio::net::TcpListener;
use tokio::sync::watch;

/// Pipeline daemon: HTTP ingress, event indexer and alert writer
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    log::info!("Starting SIEM pipeline daemon...");

    // Load configuration
    let config_path = env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = if config_path.exists() {
        Config::from_file(&config_path)?
    } else {
        log::warn!("Config file not found, using defaults");
        Config::default()
    }
    .apply_env()?;

    if config.pipeline.mode == PipelineMode::Hardened {
        log::info!("Running in hardened mode");
    }

    // Setup graceful shutdown signal handling
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    ctrlc::set_handler(move || {
        log::info!("Received shutdown signal, gracefully stopping...");
        let _ = shutdown_tx.send(true);
    })?;

    let listener = TcpListener::bind(&config.ingress.listen_address).await?;
    let pipeline = Arc::new(Pipeline::from_config(config)?);

    let ingress = {
        let ingestor = pipeline.ingestor();
        let mut rx = shutdown_rx.clone();
        tokio::spawn(async move {
            let shutdown = async move {
                let _ = rx.changed().await;
            };
            if let Err(e) = http::serve(listener, ingestor, shutdown).await {
                log::error!("Ingress server failed: {}", e);
            }
        })
    };

    let indexer = {
        let pipeline = Arc::clone(&pipeline);
        tokio::spawn(async move {
            if let Err(e) = pipeline.run_event_indexer().await {
                log::error!("Event indexer stopped: {}", e);
            }
        })
    };

    // The alert writer runs on the main path: in legacy mode its read
    // errors end the process and the supervisor restarts it.
    let outcome = tokio::select! {
        result = pipeline.run_alert_writer() => result,
        _ = shutdown_rx.changed() => Ok(()),
    };

    pipeline.close();
    indexer.abort();
    if outcome.is_err() {
        ingress.abort();
    }
    let _ = ingress.await;

    match outcome {
        Ok(()) => {
            log::info!("SIEM pipeline daemon stopped");
            Ok(())
        }
        Err(e) => {
            log::error!("Alert writer exited: {}", e);
            Err(e.into())
        }
    }
}
