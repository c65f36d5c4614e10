//! Gateway router: classifies each inbound request exactly once
//!
//! Matching order: proxy prefix (WebSocket upgrade or plain HTTP), then
//! an existing static file under the asset root, then the SPA fallback.

use crate::assets::AssetServer;
use http::HeaderMap;
use std::path::PathBuf;

/// Where a single inbound request is dispatched
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteDecision {
    /// Serve an existing file under the asset root
    StaticAsset(PathBuf),
    /// Forward a unary HTTP request to the backend at the rewritten path
    ProxyHttp(String),
    /// Open a WebSocket tunnel to the backend at the rewritten path
    ProxyWebSocket(String),
    /// Serve the entry document with a 200
    SpaFallback,
}

impl RouteDecision {
    /// Short label for access logging
    pub fn label(&self) -> &'static str {
        match self {
            Self::StaticAsset(_) => "static",
            Self::ProxyHttp(_) => "proxy-http",
            Self::ProxyWebSocket(_) => "proxy-ws",
            Self::SpaFallback => "spa-fallback",
        }
    }
}

/// Classify one inbound request. Total and deterministic: every path
/// matches exactly one branch.
pub fn decide(
    path: &str,
    query: Option<&str>,
    headers: &HeaderMap,
    assets: &AssetServer,
    proxy_prefix: &str,
) -> RouteDecision {
    if let Some(target) = rewrite_path(path, query, proxy_prefix) {
        if is_websocket_upgrade(headers) {
            return RouteDecision::ProxyWebSocket(target);
        }
        return RouteDecision::ProxyHttp(target);
    }
    if let Some(file) = assets.resolve(path) {
        return RouteDecision::StaticAsset(file);
    }
    RouteDecision::SpaFallback
}

/// Check if an HTTP request carries a WebSocket upgrade header
pub fn is_websocket_upgrade(headers: &HeaderMap) -> bool {
    headers
        .get(http::header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false)
}

/// Strip the proxy prefix off a backend-bound path, preserving the query.
///
/// Returns `None` when the path is not under the prefix. Matching is
/// segment-aware: `/__gw__x` is not backend-bound for prefix `/__gw__`.
pub fn rewrite_path(path: &str, query: Option<&str>, prefix: &str) -> Option<String> {
    let rest = path.strip_prefix(prefix)?;
    if !rest.is_empty() && !rest.starts_with('/') {
        return None;
    }
    let new_path = if rest.is_empty() {
        "/".to_string()
    } else {
        rest.to_string()
    };
    Some(match query {
        Some(q) => format!("{}?{}", new_path, q),
        None => new_path,
    })
}
