use std::time::Duration;

use async_trait::async_trait;
use metrics::{counter, histogram};
use reqwest::Client;
use tracing::{info_span, Instrument, Span};
use url::Url;

use crate::api::{IngestStatus, ProxyError};
use crate::event::{Dataset, Event};
use crate::sinks::IngestClient;

const ORG_ID_HEADER: &str = "X-Axiom-Org-Id";
const MAX_ERROR_BODY_CHARS: usize = 1024;

/// Ships events to an `/v1/datasets/{dataset}/ingest` style HTTP API.
pub struct HttpIngestClient {
    client: Client,
    base_url: Url,
    token: String,
    org_id: Option<String>,
    span: Span,
}

impl HttpIngestClient {
    pub fn new(
        base_url: &str,
        token: String,
        org_id: Option<String>,
        timeout: Duration,
    ) -> anyhow::Result<HttpIngestClient> {
        let base_url = Url::parse(base_url)?;
        if base_url.cannot_be_a_base() {
            anyhow::bail!("ingest url {} cannot be used as a base", base_url);
        }

        let client = Client::builder()
            .user_agent(concat!("honeycomb-proxy/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;

        let span = info_span!("ingest_client", url = %base_url);

        Ok(HttpIngestClient {
            client,
            base_url,
            token,
            org_id: org_id.filter(|id| !id.is_empty()),
            span,
        })
    }

    fn ingest_url(&self, dataset: &Dataset) -> Url {
        let mut url = self.base_url.clone();
        // cannot_be_a_base was rejected in new()
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .extend(["v1", "datasets", dataset.as_str(), "ingest"]);
        }
        url
    }

    async fn send(&self, dataset: &Dataset, events: Vec<Event>) -> Result<IngestStatus, ProxyError> {
        let count = events.len();
        let mut request = self
            .client
            .post(self.ingest_url(dataset))
            .bearer_auth(&self.token)
            .json(&events);
        if let Some(org_id) = &self.org_id {
            request = request.header(ORG_ID_HEADER, org_id);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ProxyError::Upstream(format!("request timed out: {e}"))
            } else {
                ProxyError::Upstream(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let body: String = body.chars().take(MAX_ERROR_BODY_CHARS).collect();
            return Err(ProxyError::Upstream(format!("{status}: {body}")));
        }

        let ingest_status = response
            .json::<IngestStatus>()
            .await
            .map_err(|e| ProxyError::Upstream(format!("invalid ingest status: {e}")))?;

        histogram!("proxy_ingest_batch_size").record(count as f64);
        counter!("proxy_events_ingested_total").increment(count as u64);

        Ok(ingest_status)
    }
}

#[async_trait]
impl IngestClient for HttpIngestClient {
    async fn ingest(
        &self,
        dataset: &Dataset,
        events: Vec<Event>,
    ) -> Result<IngestStatus, ProxyError> {
        self.send(dataset, events)
            .instrument(self.span.clone())
            .await
    }
}
