use std::future::ready;

use axum::{routing::get, Router};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

pub const MESSAGES_PROCESSED: &str = "checkpoint_consumer_messages_processed_total";
pub const CONTINUITY_GAPS: &str = "checkpoint_consumer_continuity_gaps_total";
pub const CLIENT_ERRORS: &str = "checkpoint_consumer_client_errors_total";
pub const PROCESSING_DURATION: &str = "checkpoint_consumer_processing_duration_seconds";

/// Bind a `TcpListener` on the provided bind address to serve a `Router` on it.
pub async fn serve(router: Router, bind: &str) -> Result<(), std::io::Error> {
    let listener = tokio::net::TcpListener::bind(bind).await?;

    axum::serve(listener, router).await?;

    Ok(())
}

/// Build a Router exposing the prometheus endpoint and a liveness probe.
pub fn setup_metrics_router(recorder_handle: PrometheusHandle) -> Router {
    Router::new()
        .route("/_liveness", get(|| ready("ok")))
        .route(
            "/metrics",
            get(move || ready(recorder_handle.render())),
        )
}

pub fn setup_metrics_recorder() -> Result<PrometheusHandle, metrics_exporter_prometheus::BuildError> {
    const EXPONENTIAL_SECONDS: &[f64] = &[
        0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
    ];

    PrometheusBuilder::new()
        .set_buckets(EXPONENTIAL_SECONDS)?
        .install_recorder()
}
