use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("{0}")]
    Validation(String),
    #[error("failed to decode request: {0}")]
    Decode(String),
    #[error("unexpected event type {0}")]
    Type(String),
    #[error("ingest failed: {0}")]
    Upstream(String),
    #[error("forward failed: {0}")]
    Forward(String),
    #[error("request body exceeds {0} bytes")]
    PayloadTooLarge(usize),
}

impl ProxyError {
    /// Short label used to tag error metrics.
    pub fn cause(&self) -> &'static str {
        match self {
            ProxyError::Validation(_) => "validation",
            ProxyError::Decode(_) => "decode",
            ProxyError::Type(_) => "type",
            ProxyError::Upstream(_) => "upstream",
            ProxyError::Forward(_) => "forward",
            ProxyError::PayloadTooLarge(_) => "payload_too_large",
        }
    }
}

impl From<serde_json::Error> for ProxyError {
    fn from(err: serde_json::Error) -> Self {
        ProxyError::Decode(err.to_string())
    }
}

impl From<rmp_serde::decode::Error> for ProxyError {
    fn from(err: rmp_serde::decode::Error) -> Self {
        ProxyError::Decode(err.to_string())
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        match self {
            ProxyError::Validation(_)
            | ProxyError::Decode(_)
            | ProxyError::Type(_)
            | ProxyError::Upstream(_) => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()),

            ProxyError::Forward(_) => (StatusCode::BAD_GATEWAY, self.to_string()),

            ProxyError::PayloadTooLarge(_) => (StatusCode::PAYLOAD_TOO_LARGE, self.to_string()),
        }
        .into_response()
    }
}

/// Whatever the ingest backend answered. Only ever logged.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct IngestStatus(pub Value);
