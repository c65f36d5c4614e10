//! Centralized error types for the dashboard gateway

use thiserror::Error;

/// Gateway error types
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Invalid configuration detected at startup; fatal before accept
    #[error("configuration error: {0}")]
    Config(String),

    /// The backend could not be reached (connect failure, timeout, reset)
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Malformed client request, e.g. a broken upgrade handshake
    #[error("client protocol error: {0}")]
    ClientProtocol(String),

    /// HTTP forward failed for a reason other than availability
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// WebSocket handshake or frame error
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience Result type alias
pub type Result<T> = std::result::Result<T, GatewayError>;
