use std::net::SocketAddr;
use std::time::Duration;

use axum::body::Body;
use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue};
use axum::http::request::Parts;
use axum::http::Uri;
use axum::response::Response;
use bytes::Bytes;
use reqwest::{redirect, Client};
use tracing::{info_span, Instrument, Span};
use url::Url;

use crate::api::ProxyError;

const X_FORWARDED_FOR: &str = "x-forwarded-for";

// Connection-scoped headers, never relayed in either direction.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "proxy-connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Relays requests to the origin, touching nothing but scheme and authority.
pub struct Forwarder {
    client: Client,
    origin: Url,
    span: Span,
}

impl Forwarder {
    pub fn new(origin: &str, timeout: Duration) -> anyhow::Result<Forwarder> {
        let origin = Url::parse(origin)?;
        if origin.host_str().is_none() {
            anyhow::bail!("origin url {} has no host", origin);
        }

        // Redirects and compressed responses go back to the client as-is.
        let client = Client::builder()
            .redirect(redirect::Policy::none())
            .timeout(timeout)
            .build()?;

        let span = info_span!("forwarder", origin = %origin);

        Ok(Forwarder {
            client,
            origin,
            span,
        })
    }

    pub fn origin(&self) -> &Url {
        &self.origin
    }

    fn target_url(&self, uri: &Uri) -> Url {
        let mut url = self.origin.clone();
        url.set_path(uri.path());
        url.set_query(uri.query());
        url
    }

    /// Sends `body` to the origin with the inbound method, path, query and headers,
    /// and hands back the origin's response with its body still streaming.
    ///
    /// Only transport failures are errors. Whatever status the origin answers
    /// with is the caller's to judge.
    pub async fn forward(
        &self,
        parts: &Parts,
        body: Bytes,
        client_addr: Option<SocketAddr>,
    ) -> Result<Response, ProxyError> {
        self.relay(parts, body, client_addr)
            .instrument(self.span.clone())
            .await
    }

    async fn relay(
        &self,
        parts: &Parts,
        body: Bytes,
        client_addr: Option<SocketAddr>,
    ) -> Result<Response, ProxyError> {
        let url = self.target_url(&parts.uri);
        let mut headers = strip_hop_by_hop(&parts.headers);
        headers.remove(header::HOST);
        headers.remove(header::CONTENT_LENGTH);
        if let Some(addr) = client_addr {
            append_forwarded_for(&mut headers, addr);
        }

        tracing::debug!(method = %parts.method, url = %url, len = body.len(), "forwarding request");

        let mut request = self
            .client
            .request(parts.method.clone(), url)
            .headers(headers);
        if !body.is_empty() {
            request = request.body(body);
        }

        let upstream = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ProxyError::Forward(format!("origin timed out: {e}"))
            } else {
                ProxyError::Forward(e.to_string())
            }
        })?;

        let status = upstream.status();
        let headers = strip_hop_by_hop(upstream.headers());

        let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
        *response.status_mut() = status;
        *response.headers_mut() = headers;

        Ok(response)
    }
}

fn strip_hop_by_hop(headers: &HeaderMap) -> HeaderMap {
    // Connection may name further headers that only apply to this hop.
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    let mut stripped = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if HOP_BY_HOP.contains(&name.as_str()) || listed.contains(name) {
            continue;
        }
        stripped.append(name.clone(), value.clone());
    }
    stripped
}

fn append_forwarded_for(headers: &mut HeaderMap, addr: SocketAddr) {
    let ip = addr.ip().to_string();
    let value = match headers.get(X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
        Some(prior) if !prior.trim().is_empty() => format!("{prior}, {ip}"),
        _ => ip,
    };
    if let Ok(value) = HeaderValue::from_str(&value) {
        headers.insert(X_FORWARDED_FOR, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrites_only_scheme_and_authority() {
        let forwarder =
            Forwarder::new("https://api.honeycomb.io/ignored", Duration::from_secs(1)).unwrap();

        let uri: Uri = "/1/batch/ds1?foo=bar".parse().unwrap();
        assert_eq!(
            forwarder.target_url(&uri).as_str(),
            "https://api.honeycomb.io/1/batch/ds1?foo=bar"
        );

        let uri: Uri = "/1/events/ds1".parse().unwrap();
        assert_eq!(
            forwarder.target_url(&uri).as_str(),
            "https://api.honeycomb.io/1/events/ds1"
        );
    }

    #[test]
    fn keeps_origin_port() {
        let forwarder = Forwarder::new("http://127.0.0.1:9999", Duration::from_secs(1)).unwrap();
        let uri: Uri = "/1/auth".parse().unwrap();
        assert_eq!(
            forwarder.target_url(&uri).as_str(),
            "http://127.0.0.1:9999/1/auth"
        );
    }

    #[test]
    fn rejects_origin_without_host() {
        assert!(Forwarder::new("unix:/var/run/origin.sock", Duration::from_secs(1)).is_err());
        assert!(Forwarder::new("not a url", Duration::from_secs(1)).is_err());
    }

    #[test]
    fn drops_hop_by_hop_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("x-honeycomb-team", HeaderValue::from_static("key"));
        headers.insert("content-encoding", HeaderValue::from_static("gzip"));
        headers.insert("connection", HeaderValue::from_static("keep-alive, x-trace-hop"));
        headers.insert("keep-alive", HeaderValue::from_static("timeout=5"));
        headers.insert("transfer-encoding", HeaderValue::from_static("chunked"));
        headers.insert("x-trace-hop", HeaderValue::from_static("1"));

        let stripped = strip_hop_by_hop(&headers);
        assert_eq!(stripped.len(), 2);
        assert_eq!(stripped["x-honeycomb-team"], "key");
        assert_eq!(stripped["content-encoding"], "gzip");
    }

    #[test]
    fn appends_client_address() {
        let addr: SocketAddr = "10.0.0.7:41000".parse().unwrap();

        let mut headers = HeaderMap::new();
        append_forwarded_for(&mut headers, addr);
        assert_eq!(headers[X_FORWARDED_FOR], "10.0.0.7");

        let mut headers = HeaderMap::new();
        headers.insert(X_FORWARDED_FOR, HeaderValue::from_static("203.0.113.9"));
        append_forwarded_for(&mut headers, addr);
        assert_eq!(headers[X_FORWARDED_FOR], "203.0.113.9, 10.0.0.7");
    }
}
