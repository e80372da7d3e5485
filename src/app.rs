use crate::{
    classifier::Classifier,
    config::Config,
    labels::LabelTable,
    layers::LayerRegistry,
    ort_service::OrtModelService,
    server::HttpServer,
    telemetry::Metrics,
};
use anyhow::Context;
use std::sync::Arc;
use tokio::{signal, sync::broadcast};

/// Loads the label table and model, checks they agree, then serves until
/// SIGINT or SIGTERM. Nothing is bound if any startup step fails.
pub async fn start_app(config: Config) -> anyhow::Result<()> {
    tracing::info!(
        model = ?config.model.model_dir.join(&config.model.onnx_file),
        labels_dir = ?config.labels.labels_dir,
        "Starting classifier service"
    );

    let labels = LabelTable::from_dir(&config.labels.labels_dir)
        .inspect_err(|e| tracing::error!("Failed to build label table: {}", e))?;

    let registry = LayerRegistry::default();
    let model_service = OrtModelService::new(&config.model, &registry)
        .inspect_err(|e| tracing::error!("Failed to load model: {}", e))?;

    let classifier = Classifier::new(model_service, labels)
        .inspect_err(|e| tracing::error!("Model and label table disagree: {}", e))?;

    let metrics = Metrics::new().context("failed to initialize metrics")?;

    let server =
        HttpServer::new(Arc::new(classifier), Arc::new(metrics), &config.server).await?;

    let (shutdown_tx, _) = broadcast::channel(1);
    let server_handle = server.run(shutdown_tx.subscribe()).await?;

    shutdown_signal().await;
    tracing::info!("Shutdown signal received, starting graceful shutdown.");

    let _ = shutdown_tx.send(());
    server_handle.await??;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
