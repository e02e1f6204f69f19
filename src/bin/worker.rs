use metrics_exporter_prometheus::PrometheusBuilder;
use product_renewal::{
    app_state::AppState,
    config::AppConfig,
    models::renewal::DrainReport,
    routes,
    services::coordinator::{RenewalCoordinator, RenewalError},
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting product renewal worker");

    let config = AppConfig::from_env()?;

    let prometheus_handle = Arc::new(PrometheusBuilder::new().install_recorder()?);
    describe_metrics();

    let state = AppState::connect(&config).await?;

    let app = routes::router(state.clone(), prometheus_handle);
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("Health and metrics listening on {}", config.bind_addr);
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "Health server stopped");
        }
    });

    let poll_interval = Duration::from_secs(config.worker_poll_secs);
    let suspend_backoff = Duration::from_secs(config.suspend_backoff_secs);

    tracing::info!("Worker ready, starting renewal loop");

    loop {
        let pause = match run_once(&state.coordinator).await {
            Ok(Some(report)) if report.suspended() => {
                tracing::warn!(
                    backoff_secs = suspend_backoff.as_secs(),
                    "Renewal suspended by product source, backing off"
                );
                suspend_backoff
            }
            Ok(_) => poll_interval,
            Err(e) => {
                tracing::error!(error = %e, "Renewal run failed, will retry");
                poll_interval
            }
        };

        tokio::select! {
            _ = sleep(pause) => {}
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutdown requested, stopping worker");
                return Ok(());
            }
        }
    }
}

fn describe_metrics() {
    metrics::describe_counter!("renewal_items_total", "Queue items processed, by outcome");
    metrics::describe_counter!(
        "renewal_items_abandoned_total",
        "Queue items dropped after max attempts or unexpected errors"
    );
    metrics::describe_counter!(
        "renewal_items_deferred_total",
        "Queue items left claimed after an unexpected error"
    );
    metrics::describe_histogram!("renewal_drain_seconds", "Time to drain the renewal queue");
    metrics::describe_gauge!("renewal_queue_depth", "Pending plus claimed renewal queue items");
    metrics::describe_gauge!("renewal_stale_products", "Products due for renewal");
}

/// One renewal tick. Returns the drain report when the queue was drained.
///
/// Stale products are only swept into the queue once the previous work is
/// gone, so a slow or suspended source does not pile up duplicates.
async fn run_once(coordinator: &RenewalCoordinator) -> Result<Option<DrainReport>, RenewalError> {
    let depth = coordinator.queue_depth().await?;
    let stale = coordinator.count_stale().await?;
    metrics::gauge!("renewal_queue_depth").set(depth.total() as f64);
    metrics::gauge!("renewal_stale_products").set(stale as f64);

    if depth.is_empty() {
        if stale == 0 {
            tracing::debug!("Nothing to renew");
            return Ok(None);
        }
        coordinator.queue_renewal_sweep(None).await?;
    }

    let report = coordinator.drain_queue().await?;
    Ok(Some(report))
}
