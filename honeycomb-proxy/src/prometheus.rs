// prometheus exporter setup

use std::time::Instant;

use axum::body::Body;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::IntoResponse;
use metrics::counter;
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};

use crate::multiplexer::RouteKind;

pub const PROXY_FORWARD_ERRORS_TOTAL: &str = "proxy_forward_errors_total";
pub const PROXY_INGEST_ERRORS_TOTAL: &str = "proxy_ingest_errors_total";

pub fn report_forward_error(cause: &'static str) {
    counter!(PROXY_FORWARD_ERRORS_TOTAL, "cause" => cause).increment(1);
}

pub fn report_ingest_error(cause: &'static str) {
    counter!(PROXY_INGEST_ERRORS_TOTAL, "cause" => cause).increment(1);
}

pub fn setup_metrics_recorder() -> anyhow::Result<PrometheusHandle> {
    const EXPONENTIAL_SECONDS: &[f64] = &[
        0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
    ];
    const BATCH_SIZES: &[f64] = &[
        1.0, 10.0, 25.0, 50.0, 75.0, 100.0, 250.0, 500.0, 750.0, 1000.0,
    ];

    let handle = PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full("http_requests_duration_seconds".to_string()),
            EXPONENTIAL_SECONDS,
        )?
        .set_buckets_for_metric(Matcher::Suffix("_batch_size".to_string()), BATCH_SIZES)?
        .install_recorder()?;

    Ok(handle)
}

/// Middleware to record some common HTTP metrics.
///
/// Every path is proxied, so requests are labelled by endpoint kind rather
/// than by raw path, which would carry dataset names.
pub async fn track_metrics(req: Request<Body>, next: Next) -> impl IntoResponse {
    let start = Instant::now();

    let route = RouteKind::from_path(req.uri().path()).as_str();
    let method = req.method().clone();

    let response = next.run(req).await;

    let latency = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    let labels = [
        ("method", method.to_string()),
        ("route", route.to_string()),
        ("status", status),
    ];

    metrics::counter!("http_requests_total", &labels).increment(1);
    metrics::histogram!("http_requests_duration_seconds", &labels).record(latency);

    response
}
