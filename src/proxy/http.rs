//! HTTP forwarder: proxies unary requests to the backend
//!
//! One forward attempt per request, no retries; backend unavailability
//! maps to `GatewayError::BackendUnavailable` so the server can answer
//! with the 503 JSON contract instead of hanging the client.

use crate::config::GatewayConfig;
use crate::error::{GatewayError, Result};
use bytes::Bytes;
use std::net::IpAddr;
use std::time::Duration;

/// Forwards HTTP requests to the configured backend
pub struct HttpForwarder {
    client: reqwest::Client,
    base: String,
    host: String,
    timeout: Duration,
}

impl HttpForwarder {
    /// Create a forwarder bound to the configured backend
    pub fn new(config: &GatewayConfig) -> Self {
        // Redirects are the backend's to issue; the client follows them,
        // never the gateway.
        let client = reqwest::Client::builder()
            .timeout(config.forward_timeout)
            .pool_max_idle_per_host(32)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .unwrap_or_default();

        Self {
            client,
            base: config.backend_http_base(),
            host: config.backend_authority(),
            timeout: config.forward_timeout,
        }
    }

    /// Forward one request against the rewritten target path.
    ///
    /// `target` is the prefix-stripped path with its query, e.g. `/status`
    /// or `/api/items?page=2`.
    pub async fn forward(
        &self,
        method: http::Method,
        target: &str,
        headers: &http::HeaderMap,
        body: Bytes,
        client_ip: IpAddr,
    ) -> Result<ForwardedResponse> {
        let url = format!("{}{}", self.base, target);
        let mut req = self.client.request(method, &url);

        for (key, value) in headers.iter() {
            if key == http::header::HOST || is_hop_by_hop(key.as_str()) {
                continue;
            }
            req = req.header(key.clone(), value.clone());
        }
        req = req
            .header(http::header::HOST, self.host.as_str())
            .header("x-forwarded-for", client_ip.to_string())
            .header("x-forwarded-proto", "http")
            .body(body);

        let response = req.send().await.map_err(|e| {
            if e.is_timeout() {
                GatewayError::BackendUnavailable(format!(
                    "backend timed out after {}s",
                    self.timeout.as_secs()
                ))
            } else if e.is_connect() {
                GatewayError::BackendUnavailable(format!("cannot connect to {}: {}", self.host, e))
            } else {
                GatewayError::Http(e)
            }
        })?;

        let status = response.status();
        let mut resp_headers = response.headers().clone();
        // The relayed body is re-framed by our server, so the backend's
        // framing headers must not leak through.
        resp_headers.remove(http::header::CONTENT_LENGTH);
        for name in HOP_BY_HOP {
            resp_headers.remove(*name);
        }
        let body = response
            .bytes()
            .await
            .map_err(|e| GatewayError::BackendUnavailable(format!("backend reset: {}", e)))?;

        Ok(ForwardedResponse {
            status,
            headers: resp_headers,
            body,
        })
    }
}

/// Response from the backend, returned verbatim to the client
#[derive(Debug)]
pub struct ForwardedResponse {
    pub status: http::StatusCode,
    pub headers: http::HeaderMap,
    pub body: Bytes,
}

const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

/// Check if a header is a hop-by-hop header that should not be forwarded
fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP
        .iter()
        .any(|h| h.eq_ignore_ascii_case(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hop_by_hop_headers() {
        assert!(is_hop_by_hop("Connection"));
        assert!(is_hop_by_hop("connection"));
        assert!(is_hop_by_hop("Keep-Alive"));
        assert!(is_hop_by_hop("Transfer-Encoding"));
        assert!(is_hop_by_hop("Upgrade"));
        assert!(is_hop_by_hop("Proxy-Authorization"));

        assert!(!is_hop_by_hop("Content-Type"));
        assert!(!is_hop_by_hop("Authorization"));
        assert!(!is_hop_by_hop("X-Custom-Header"));
        assert!(!is_hop_by_hop("Host"));
    }

    #[test]
    fn test_forwarder_targets_backend() {
        let config = GatewayConfig {
            backend_host: "10.0.0.5".to_string(),
            backend_port: 9000,
            ..GatewayConfig::default()
        };
        let forwarder = HttpForwarder::new(&config);
        assert_eq!(forwarder.base, "http://10.0.0.5:9000");
        assert_eq!(forwarder.host, "10.0.0.5:9000");
    }

    #[tokio::test]
    async fn test_connect_failure_is_backend_unavailable() {
        // Nothing listens on this port
        let config = GatewayConfig {
            backend_port: 1,
            forward_timeout: Duration::from_secs(2),
            ..GatewayConfig::default()
        };
        let forwarder = HttpForwarder::new(&config);
        let err = forwarder
            .forward(
                http::Method::GET,
                "/status",
                &http::HeaderMap::new(),
                Bytes::new(),
                "127.0.0.1".parse().unwrap(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::BackendUnavailable(_)));
    }
}
