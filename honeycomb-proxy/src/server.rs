use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;

use crate::config::Config;
use crate::forward::Forwarder;
use crate::multiplexer::Multiplexer;
use crate::prometheus::setup_metrics_recorder;
use crate::router;
use crate::sinks::http::HttpIngestClient;
use crate::sinks::print::PrintSink;
use crate::sinks::IngestClient;

pub fn create_ingest_client(
    config: &Config,
) -> anyhow::Result<Arc<dyn IngestClient + Send + Sync>> {
    if config.print_sink {
        // Print sink is only used for local debug
        tracing::warn!("PRINT_SINK is set, events will be logged instead of ingested");
        return Ok(Arc::new(PrintSink {}));
    }

    if config.ingest_token.is_empty() {
        tracing::warn!("INGEST_TOKEN is empty, the ingest API will likely reject every batch");
    }

    let client = HttpIngestClient::new(
        &config.ingest_url,
        config.ingest_token.clone(),
        config.ingest_org_id.clone(),
        config.ingest_timeout(),
    )
    .context("failed to create ingest client")?;

    Ok(Arc::new(client))
}

pub fn create_multiplexer(
    config: &Config,
    ingest: Arc<dyn IngestClient + Send + Sync>,
) -> anyhow::Result<Multiplexer> {
    let forwarder = if config.is_bypass() {
        tracing::warn!("ORIGIN_URL is empty, running in bypass mode: nothing is forwarded");
        None
    } else {
        let forwarder = Forwarder::new(config.origin_url.trim(), config.forward_timeout())
            .context("failed to create forwarder")?;
        Some(forwarder)
    };

    Ok(Multiplexer::new(
        forwarder,
        ingest,
        config.ingest_timeout(),
        config.max_body_bytes,
    ))
}

async fn serve_metrics(config: &Config) -> anyhow::Result<()> {
    let Some(address) = config.metrics_address else {
        if config.export_prometheus {
            tracing::info!("METRICS_ADDRESS is not set, not exporting metrics");
        }
        return Ok(());
    };
    if !config.export_prometheus {
        return Ok(());
    }

    let handle = setup_metrics_recorder()?;
    let listener = TcpListener::bind(address)
        .await
        .with_context(|| format!("could not bind metrics port {address}"))?;
    tracing::info!("serving metrics on {:?}", listener.local_addr()?);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router::metrics_router(handle)).await {
            tracing::error!("metrics server stopped: {}", e);
        }
    });

    Ok(())
}

pub async fn serve<F>(config: Config, listener: TcpListener, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let ingest = create_ingest_client(&config)?;
    let multiplexer = create_multiplexer(&config, ingest)?;
    let app = router::router(multiplexer);

    serve_metrics(&config).await?;

    tracing::info!("listening on {:?}", listener.local_addr()?);
    tracing::info!(
        "config: origin == {:?} ; ingest == {:?}",
        config.origin_url,
        config.ingest_url
    );

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await?;

    tracing::info!("HTTP server graceful shutdown completed");
    Ok(())
}
