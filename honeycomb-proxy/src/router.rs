use std::future::ready;
use std::sync::Arc;

use axum::{routing::get, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::trace::TraceLayer;

use crate::multiplexer::{self, Multiplexer};
use crate::prometheus::track_metrics;

#[derive(Clone)]
pub struct State {
    pub multiplexer: Arc<Multiplexer>,
}

async fn index() -> &'static str {
    "honeycomb-proxy"
}

/// Every path belongs to the origin, so the multiplexer is mounted as the
/// fallback instead of on individual routes.
pub fn router(multiplexer: Multiplexer) -> Router {
    let state = State {
        multiplexer: Arc::new(multiplexer),
    };

    Router::new()
        .fallback(multiplexer::multiplex)
        .layer(TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn(track_metrics))
        .with_state(state)
}

/// Operational endpoints, served on their own listener.
pub fn metrics_router(recorder_handle: PrometheusHandle) -> Router {
    Router::new()
        .route("/_liveness", get(index))
        .route("/metrics", get(move || ready(recorder_handle.render())))
}
