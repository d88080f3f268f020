#![allow(dead_code)]

use std::collections::HashMap;
use std::io::Write;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::{Request, State};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::IntoResponse;
use axum::Router;
use envconfig::Envconfig;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::Notify;

use honeycomb_proxy::api::{IngestStatus, ProxyError};
use honeycomb_proxy::config::Config;
use honeycomb_proxy::event::{Dataset, Event};
use honeycomb_proxy::router::router;
use honeycomb_proxy::server::create_multiplexer;
use honeycomb_proxy::sinks::IngestClient;

static TRACING_INIT: Once = Once::new();
pub fn setup_tracing() {
    TRACING_INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_writer(tracing_subscriber::fmt::TestWriter::new())
            .init()
    });
}

pub fn config(origin_url: &str, ingest_timeout_ms: u64) -> Config {
    let env = HashMap::from([
        ("ADDRESS".to_string(), "127.0.0.1:0".to_string()),
        ("ORIGIN_URL".to_string(), origin_url.to_string()),
        ("FORWARD_TIMEOUT_MS".to_string(), "3000".to_string()),
        (
            "INGEST_TIMEOUT_MS".to_string(),
            ingest_timeout_ms.to_string(),
        ),
        ("EXPORT_PROMETHEUS".to_string(), "false".to_string()),
    ]);
    Config::init_from_hashmap(&env).unwrap()
}

pub fn compress_gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

pub fn compress_zstd(data: &[u8]) -> Vec<u8> {
    zstd::encode_all(data, 3).unwrap()
}

/// One request as the origin saw it.
#[derive(Debug, Clone)]
pub struct Received {
    pub method: Method,
    pub path_and_query: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

#[derive(Clone)]
struct OriginState {
    received: Arc<Mutex<Vec<Received>>>,
    status: StatusCode,
    body: &'static str,
}

async fn record(State(state): State<OriginState>, request: Request) -> impl IntoResponse {
    let (parts, body) = request.into_parts();
    let body = axum::body::to_bytes(body, usize::MAX).await.unwrap();
    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.to_string())
        .unwrap_or_default();

    state.received.lock().unwrap().push(Received {
        method: parts.method,
        path_and_query,
        headers: parts.headers,
        body,
    });

    (state.status, state.body)
}

/// Stand-in for the vendor's API: records what it receives and answers
/// every request with a fixed status and body.
pub struct RecordingOrigin {
    pub addr: SocketAddr,
    received: Arc<Mutex<Vec<Received>>>,
    shutdown: Arc<Notify>,
}

impl RecordingOrigin {
    pub async fn start(status: StatusCode, body: &'static str) -> Self {
        let received = Arc::new(Mutex::new(Vec::new()));
        let app = Router::new().fallback(record).with_state(OriginState {
            received: received.clone(),
            status,
            body,
        });

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let notify = Arc::new(Notify::new());
        let shutdown = notify.clone();

        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { notify.notified().await })
                .await
        });

        Self {
            addr,
            received,
            shutdown,
        }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn received(&self) -> Vec<Received> {
        self.received.lock().unwrap().clone()
    }
}

impl Drop for RecordingOrigin {
    fn drop(&mut self) {
        self.shutdown.notify_one()
    }
}

/// Keeps every batch in memory. With `hang` set, never answers.
#[derive(Clone, Default)]
pub struct MemoryIngest {
    batches: Arc<Mutex<Vec<(String, Vec<Event>)>>>,
    hang: bool,
}

impl MemoryIngest {
    pub fn hanging() -> Self {
        Self {
            hang: true,
            ..Default::default()
        }
    }

    pub fn batches(&self) -> Vec<(String, Vec<Event>)> {
        self.batches.lock().unwrap().clone()
    }
}

#[async_trait]
impl IngestClient for MemoryIngest {
    async fn ingest(
        &self,
        dataset: &Dataset,
        events: Vec<Event>,
    ) -> Result<IngestStatus, ProxyError> {
        if self.hang {
            futures::future::pending::<()>().await;
        }
        let count = events.len();
        self.batches
            .lock()
            .unwrap()
            .push((dataset.to_string(), events));
        Ok(IngestStatus(json!({ "ingested": count, "failed": 0 })))
    }
}

pub struct ServerHandle {
    pub addr: SocketAddr,
    shutdown: Arc<Notify>,
    client: reqwest::Client,
}

impl ServerHandle {
    pub async fn for_config(config: Config, ingest: MemoryIngest) -> Self {
        let multiplexer = create_multiplexer(&config, Arc::new(ingest)).unwrap();
        let app = router(multiplexer);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let notify = Arc::new(Notify::new());
        let shutdown = notify.clone();

        tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move { notify.notified().await })
            .await
        });

        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(5000))
            .build()
            .unwrap();

        Self {
            addr,
            shutdown,
            client,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub async fn post<T: Into<reqwest::Body>>(
        &self,
        path: &str,
        headers: &[(&str, &str)],
        body: T,
    ) -> reqwest::Response {
        let mut request = self.client.post(self.url(path)).body(body);
        for (name, value) in headers {
            request = request.header(*name, *value);
        }
        request.send().await.expect("failed to send request")
    }

    pub async fn get(&self, path: &str) -> reqwest::Response {
        self.client
            .get(self.url(path))
            .send()
            .await
            .expect("failed to send request")
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.shutdown.notify_one()
    }
}
