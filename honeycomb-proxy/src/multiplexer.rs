use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::header::{CONTENT_ENCODING, CONTENT_TYPE};
use axum::http::request::Parts;
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::{Buf, Bytes};
use http_body_util::LengthLimitError;
use tracing::{info_span, Instrument, Span};

use crate::api::{IngestStatus, ProxyError};
use crate::decompress;
use crate::event::{self, Dataset, Event, EVENT_TIME_HEADER};
use crate::forward::Forwarder;
use crate::prometheus::{report_forward_error, report_ingest_error};
use crate::router;
use crate::sinks::IngestClient;

pub const EVENTS_PATH_PREFIX: &str = "/1/events/";
pub const BATCH_PATH_PREFIX: &str = "/1/batch/";

// How far a compressed body may expand, relative to MAX_BODY_BYTES.
const DECODED_BODY_FACTOR: u64 = 5;

/// Which Honeycomb endpoint a path belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteKind {
    Events,
    Batch,
    Passthrough,
}

impl RouteKind {
    pub fn from_path(path: &str) -> RouteKind {
        if path.starts_with(EVENTS_PATH_PREFIX) {
            RouteKind::Events
        } else if path.starts_with(BATCH_PATH_PREFIX) {
            RouteKind::Batch
        } else {
            RouteKind::Passthrough
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RouteKind::Events => "events",
            RouteKind::Batch => "batch",
            RouteKind::Passthrough => "passthrough",
        }
    }
}

/// Sends every request to the origin (when there is one) and, for event
/// submissions, to the ingest client as well.
///
/// The two destinations never see each other's result: the client gets the
/// origin's response, or in bypass mode a response built from the ingest
/// outcome alone.
pub struct Multiplexer {
    forwarder: Option<Forwarder>,
    ingest: Arc<dyn IngestClient + Send + Sync>,
    ingest_timeout: Duration,
    max_body_bytes: usize,
    span: Span,
}

impl Multiplexer {
    pub fn new(
        forwarder: Option<Forwarder>,
        ingest: Arc<dyn IngestClient + Send + Sync>,
        ingest_timeout: Duration,
        max_body_bytes: usize,
    ) -> Multiplexer {
        let span = match &forwarder {
            Some(forwarder) => info_span!("multiplexer", origin = %forwarder.origin()),
            None => info_span!("multiplexer", origin = "bypass"),
        };

        Multiplexer {
            forwarder,
            ingest,
            ingest_timeout,
            max_body_bytes,
            span,
        }
    }

    pub async fn handle(&self, request: Request, client_addr: Option<SocketAddr>) -> Response {
        let span = info_span!(
            parent: &self.span,
            "request",
            method = %request.method(),
            path = %request.uri().path(),
        );
        self.dispatch(request, client_addr).instrument(span).await
    }

    async fn dispatch(&self, request: Request, client_addr: Option<SocketAddr>) -> Response {
        let (parts, body) = request.into_parts();

        // One immutable buffer, read through separate cursors by both paths.
        let body = match self.buffer(body).await {
            Ok(body) => body,
            Err(err) => {
                tracing::warn!("rejected request body: {}", err);
                return err.into_response();
            }
        };

        let submission = parts.method == Method::POST
            && RouteKind::from_path(parts.uri.path()) != RouteKind::Passthrough;

        let forward = async {
            match &self.forwarder {
                Some(forwarder) => {
                    Some(forwarder.forward(&parts, body.clone(), client_addr).await)
                }
                None => None,
            }
        };
        let ingest = async {
            if submission {
                Some(self.ingest_events(&parts, body.clone()).await)
            } else {
                None
            }
        };

        let (forwarded, ingested) = tokio::join!(forward, ingest);

        let ingest_error = match ingested {
            Some(Ok((dataset, status))) => {
                log_ingest_status(&dataset, &status);
                None
            }
            Some(Err(err)) => {
                report_ingest_error(err.cause());
                tracing::error!(cause = err.cause(), "ingest path failed: {}", err);
                Some(err)
            }
            None => None,
        };

        match forwarded {
            Some(Ok(response)) => {
                if !response.status().is_success() {
                    let err =
                        ProxyError::Forward(format!("origin answered {}", response.status()));
                    report_forward_error("status");
                    tracing::warn!("{}", err);
                }
                response
            }
            Some(Err(err)) => {
                report_forward_error(err.cause());
                tracing::error!("forward path failed: {}", err);
                err.into_response()
            }
            None => match ingest_error {
                Some(err) => err.into_response(),
                None => {
                    (StatusCode::OK, [(CONTENT_TYPE, "application/json")], "{}").into_response()
                }
            },
        }
    }

    async fn buffer(&self, body: Body) -> Result<Bytes, ProxyError> {
        axum::body::to_bytes(body, self.max_body_bytes)
            .await
            .map_err(|err| {
                let err = err.into_inner();
                if err.is::<LengthLimitError>() {
                    ProxyError::PayloadTooLarge(self.max_body_bytes)
                } else {
                    ProxyError::Decode(format!("failed to read request body: {err}"))
                }
            })
    }

    async fn ingest_events(
        &self,
        parts: &Parts,
        body: Bytes,
    ) -> Result<(Dataset, IngestStatus), ProxyError> {
        let limit = (self.max_body_bytes as u64).saturating_mul(DECODED_BODY_FACTOR);
        let (events, dataset) = decode_events(parts, body, limit)?;

        let deadline = self.ingest_timeout;
        let status = tokio::time::timeout(deadline, self.ingest.ingest(&dataset, events))
            .await
            .map_err(|_| {
                ProxyError::Upstream(format!(
                    "no answer within {}ms",
                    self.ingest_timeout.as_millis()
                ))
            })??;

        Ok((dataset, status))
    }
}

/// Catch-all handler: every request, whatever its method or path, goes through here.
pub async fn multiplex(
    state: State<router::State>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    request: Request,
) -> Response {
    let client_addr = connect_info.map(|ConnectInfo(addr)| addr);
    state.multiplexer.handle(request, client_addr).await
}

fn decode_events(
    parts: &Parts,
    body: Bytes,
    limit: u64,
) -> Result<(Vec<Event>, Dataset), ProxyError> {
    let encoding = header_str(&parts.headers, CONTENT_ENCODING.as_str()).unwrap_or_default();
    let content_type = header_str(&parts.headers, CONTENT_TYPE.as_str()).unwrap_or_default();
    let event_time = header_str(&parts.headers, EVENT_TIME_HEADER);

    let reader = decompress::decode(body.reader(), encoding, limit)?;
    event::normalize(reader, content_type, event_time, parts.uri.path())
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn log_ingest_status(dataset: &Dataset, status: &IngestStatus) {
    match serde_json::to_string(status) {
        Ok(status) => tracing::info!(dataset = %dataset, status = %status, "ingested events"),
        Err(err) => tracing::warn!(dataset = %dataset, "failed to encode ingest status: {}", err),
    }
}
