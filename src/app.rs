use crate::config::Config;
use crate::detector::{Detector, HttpDetector};
use crate::generation::{ChatGenerator, TextGenerator};
use crate::server::{HttpServer, SharedState};
use crate::telemetry::Metrics;

use std::{error::Error, sync::Arc};
use tokio::{signal, sync::broadcast};

pub async fn start_app(config: Config) -> Result<(), Box<dyn Error>> {
    let detector: Arc<dyn Detector> = match HttpDetector::new(&config.detection) {
        Ok(detector) => Arc::new(detector),
        Err(e) => {
            tracing::error!("Failed to initialize detection client: {:?}", e);
            return Err(Box::new(e));
        }
    };

    let generator: Option<Arc<dyn TextGenerator>> = match &config.generation {
        Some(generation_config) => match ChatGenerator::new(generation_config) {
            Ok(generator) => Some(Arc::new(generator)),
            Err(e) => {
                tracing::error!("Failed to initialize text generation client: {:?}", e);
                return Err(Box::new(e));
            }
        },
        None => {
            tracing::info!("No generation section configured, descriptions are disabled");
            None
        }
    };

    let state = SharedState {
        detector,
        generator,
        metrics: Arc::new(Metrics::new()?),
    };

    let server = HttpServer::new(state, &config.server.get_address()).await?;

    let (shutdown_tx, _) = broadcast::channel(1);
    let server_handle = server.run(shutdown_tx.subscribe()).await?;

    shutdown_signal().await;
    tracing::info!("Shutdown signal received, starting graceful shutdown.");

    let _ = shutdown_tx.send(());
    match server_handle.await {
        Ok(Err(e)) => tracing::error!("Server stopped with error: {:?}", e),
        Err(e) => tracing::error!("Server task failed: {:?}", e),
        Ok(Ok(())) => {}
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
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
