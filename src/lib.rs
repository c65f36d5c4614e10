//! # Dashboard Gateway
//!
//! A single process that serves a prebuilt single-page dashboard and
//! transparently reverse-proxies both HTTP requests and WebSocket
//! connections under a path prefix to an internal backend.
//!
//! ## Architecture
//!
//! ```text
//! Listener → Router ─┬─ proxy prefix ─┬─ upgrade → WebSocket Tunnel
//!                    │                └─ unary   → HTTP Forwarder
//!                    ├─ existing file → Static Assets
//!                    └─ anything else → SPA entry document (200)
//! ```
//!
//! Backend unavailability surfaces as a 503 with a JSON `error` body for
//! HTTP, and as an unavailable close code for WebSocket upgrades; it
//! never crashes the gateway. A termination signal stops the accept loop
//! immediately and drains in-flight work within a grace period.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use dashboard_gateway::{config::GatewayConfig, Gateway};
//!
//! #[tokio::main]
//! async fn main() -> dashboard_gateway::Result<()> {
//!     let gateway = Gateway::new(GatewayConfig::default())?;
//!     gateway.start().await?;
//!     gateway.wait_for_shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod assets;
pub mod config;
pub mod error;
pub mod router;
pub(crate) mod proxy;
mod server;

// Re-export main types
pub use error::{GatewayError, Result};
pub use server::Gateway;

use serde::{Deserialize, Serialize};

/// Gateway runtime state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum GatewayState {
    /// Gateway has been created but not yet started
    #[default]
    Created,
    /// Gateway is binding its listener
    Starting,
    /// Gateway is actively accepting and proxying
    Running,
    /// Gateway is draining connections
    Stopping,
    /// Gateway has fully stopped
    Stopped,
}

impl std::fmt::Display for GatewayState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Starting => write!(f, "starting"),
            Self::Running => write!(f, "running"),
            Self::Stopping => write!(f, "stopping"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Gateway health status snapshot
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HealthStatus {
    /// Current gateway state
    pub state: GatewayState,
    /// Uptime in seconds since the gateway was created
    pub uptime_secs: u64,
    /// Connections and tunnels currently in flight
    pub active_connections: usize,
    /// Total requests handled since start
    pub total_requests: u64,
}
