use clap::Parser;
use dashboard_gateway::config::GatewayConfig;
use dashboard_gateway::Gateway;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Serves the built dashboard and proxies backend traffic
#[derive(Parser)]
#[command(name = "dashboard-gateway", version, about)]
struct Cli {
    /// Port to listen on
    #[arg(short, long, env = "PORT", default_value_t = 8080)]
    port: u16,

    /// Backend host the proxy prefix forwards to
    #[arg(long, env = "BACKEND_HOST", default_value = "127.0.0.1")]
    backend_host: String,

    /// Backend port
    #[arg(long, env = "BACKEND_PORT", default_value_t = 18789)]
    backend_port: u16,

    /// Directory containing the built dashboard assets
    #[arg(long, env = "ASSET_ROOT", default_value = "dist")]
    asset_root: PathBuf,

    /// Path prefix under which traffic is forwarded to the backend
    #[arg(long, env = "PROXY_PREFIX", default_value = "/__gw__")]
    proxy_prefix: String,

    /// Seconds to wait for in-flight connections to drain on shutdown
    #[arg(long, default_value_t = 30)]
    shutdown_grace_secs: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> dashboard_gateway::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .init();

    tracing::info!("Dashboard gateway v{}", env!("CARGO_PKG_VERSION"));

    let config = GatewayConfig {
        listen_port: cli.port,
        backend_host: cli.backend_host,
        backend_port: cli.backend_port,
        asset_root: cli.asset_root,
        proxy_prefix: cli.proxy_prefix,
        shutdown_grace: Duration::from_secs(cli.shutdown_grace_secs),
        ..GatewayConfig::default()
    };

    let gateway = Gateway::new(config)?;
    gateway.start().await?;

    tracing::info!("Gateway ready, press Ctrl+C to stop");
    gateway.wait_for_shutdown().await;

    Ok(())
}
