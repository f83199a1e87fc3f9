use anyhow::{Context, Result};
use std::sync::Arc;
use telemetry_service::config::ServiceConfig;
use telemetry_service::{
    describe_metrics, start_api_server, AppState, Config, CredentialInjector, S3ClientFactory,
    SecretResolver, UploadPipeline,
};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service);

    info!(
        service = %config.service.name,
        version = env!("CARGO_PKG_VERSION"),
        "Starting Nier Telemetry Service"
    );

    // Initialize metrics
    init_metrics(&config.service)?;

    // Initialize components
    let staging_dir = config.staging_dir();
    tokio::fs::create_dir_all(&staging_dir)
        .await
        .with_context(|| format!("Failed to create staging dir {}", staging_dir.display()))?;

    let api_state = AppState {
        injector: CredentialInjector::new(SecretResolver::from_config(&config)),
        client_factory: Arc::new(S3ClientFactory::new(&config.object_store)),
        pipeline: UploadPipeline::new(staging_dir),
    };

    // Spawn API server task
    let api_config = config.api.clone();
    let api_handle = tokio::spawn(async move {
        if let Err(e) = start_api_server(api_state, &api_config).await {
            error!(error = %e, "API server error");
        }
    });

    info!("Telemetry service started successfully");

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutting down telemetry service");

    api_handle.abort();

    info!("Telemetry service stopped");

    Ok(())
}

/// JSON logs; each event carries the request span so `request_id` is on every line
fn init_tracing(service: &ServiceConfig) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&service.log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .json()
                .with_current_span(true)
                .with_span_list(false),
        )
        .init();
}

/// Prometheus exporter, every series labelled with the service name
fn init_metrics(service: &ServiceConfig) -> Result<()> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], service.metrics_port))
        .add_global_label("service", &service.name)
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    describe_metrics();

    info!(port = service.metrics_port, "Prometheus metrics exporter started");

    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
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
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
