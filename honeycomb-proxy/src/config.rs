use std::net::SocketAddr;
use std::time::Duration;

use envconfig::Envconfig;

#[derive(Debug, PartialEq, Clone, Copy)]
pub enum LogFormat {
    Text,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_ref() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            _ => Err(format!("Unknown log format: {s}")),
        }
    }
}

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(default = "0.0.0.0:8080")]
    pub address: SocketAddr,

    // Empty means bypass mode: nothing is forwarded.
    #[envconfig(default = "https://api.honeycomb.io")]
    pub origin_url: String,

    #[envconfig(default = "30000")]
    pub forward_timeout_ms: u64,

    #[envconfig(default = "https://api.axiom.co")]
    pub ingest_url: String,

    #[envconfig(default = "")]
    pub ingest_token: String,

    pub ingest_org_id: Option<String>,

    #[envconfig(default = "10000")]
    pub ingest_timeout_ms: u64,

    #[envconfig(default = "false")]
    pub print_sink: bool,

    #[envconfig(default = "20971520")] // 20MB
    pub max_body_bytes: usize,

    // /metrics and /_liveness live on their own listener, so that the
    // proxied namespace is left untouched
    pub metrics_address: Option<SocketAddr>,

    #[envconfig(default = "true")]
    pub export_prometheus: bool,

    #[envconfig(default = "text")]
    pub log_format: LogFormat,

    pub otel_url: Option<String>,

    #[envconfig(default = "1.0")]
    pub otel_sampling_rate: f64,

    #[envconfig(default = "honeycomb-proxy")]
    pub otel_service_name: String,
}

impl Config {
    pub fn is_bypass(&self) -> bool {
        self.origin_url.trim().is_empty()
    }

    pub fn forward_timeout(&self) -> Duration {
        Duration::from_millis(self.forward_timeout_ms)
    }

    pub fn ingest_timeout(&self) -> Duration {
        Duration::from_millis(self.ingest_timeout_ms)
    }
}
