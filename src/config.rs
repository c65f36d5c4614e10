//! Gateway configuration
//!
//! Built once at startup from CLI arguments and environment variables,
//! validated, then shared immutably across all components.

use crate::error::{GatewayError, Result};
use std::path::PathBuf;
use std::time::Duration;

/// Immutable, process-lifetime gateway configuration
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Port the gateway listens on
    pub listen_port: u16,
    /// Backend host the proxied traffic is forwarded to
    pub backend_host: String,
    /// Backend port
    pub backend_port: u16,
    /// Directory containing the built dashboard assets
    pub asset_root: PathBuf,
    /// Path prefix under which all traffic is backend-bound
    pub proxy_prefix: String,
    /// Entry document served for unmatched paths (SPA fallback)
    pub index_file: String,
    /// Per-request timeout for forwarded HTTP calls
    pub forward_timeout: Duration,
    /// Timeout for dialing the backend WebSocket endpoint
    pub dial_timeout: Duration,
    /// How long shutdown waits for in-flight work to drain
    pub shutdown_grace: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_port: 8080,
            backend_host: "127.0.0.1".to_string(),
            backend_port: 18789,
            asset_root: PathBuf::from("dist"),
            proxy_prefix: "/__gw__".to_string(),
            index_file: "index.html".to_string(),
            forward_timeout: Duration::from_secs(30),
            dial_timeout: Duration::from_secs(10),
            shutdown_grace: Duration::from_secs(30),
        }
    }
}

impl GatewayConfig {
    /// Validate the configuration for consistency.
    ///
    /// Any failure here is fatal: the process must exit before
    /// accepting a single connection.
    pub fn validate(&self) -> Result<()> {
        if self.listen_port == 0 {
            return Err(GatewayError::Config(
                "listen port must be non-zero".to_string(),
            ));
        }
        if self.backend_host.is_empty() {
            return Err(GatewayError::Config(
                "backend host must not be empty".to_string(),
            ));
        }
        if self.backend_port == 0 {
            return Err(GatewayError::Config(
                "backend port must be non-zero".to_string(),
            ));
        }
        if !self.proxy_prefix.starts_with('/') || self.proxy_prefix.len() < 2 {
            return Err(GatewayError::Config(format!(
                "proxy prefix '{}' must start with '/' and name a path segment",
                self.proxy_prefix
            )));
        }
        // A trailing slash would make the segment check reject every sub-path
        if self.proxy_prefix.ends_with('/') {
            return Err(GatewayError::Config(format!(
                "proxy prefix '{}' must not end with '/'",
                self.proxy_prefix
            )));
        }
        let meta = std::fs::metadata(&self.asset_root).map_err(|e| {
            GatewayError::Config(format!(
                "asset root {} is not readable: {}",
                self.asset_root.display(),
                e
            ))
        })?;
        if !meta.is_dir() {
            return Err(GatewayError::Config(format!(
                "asset root {} is not a directory",
                self.asset_root.display()
            )));
        }
        Ok(())
    }

    /// Backend authority as `host:port`
    pub fn backend_authority(&self) -> String {
        format!("{}:{}", self.backend_host, self.backend_port)
    }

    /// Base URL for forwarded HTTP requests
    pub fn backend_http_base(&self) -> String {
        format!("http://{}", self.backend_authority())
    }

    /// Base URL for backend WebSocket dials
    pub fn backend_ws_base(&self) -> String {
        format!("ws://{}", self.backend_authority())
    }
}
