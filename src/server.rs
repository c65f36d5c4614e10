//! Gateway server: listener lifecycle and per-request dispatch
//!
//! Owns the listening socket, classifies every inbound request through
//! the router, and coordinates graceful shutdown: the accept loop stops
//! immediately, in-flight HTTP requests finish naturally, and tunnels
//! are told to close within the configured grace period.

use crate::assets::AssetServer;
use crate::config::GatewayConfig;
use crate::error::{GatewayError, Result};
use crate::proxy::{websocket, HttpForwarder};
use crate::router::{self, RouteDecision};
use crate::{GatewayState, HealthStatus};
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::watch;

/// Bound on tunnel leg teardown once the peer leg has gone away
const TUNNEL_CLOSE_GRACE: Duration = Duration::from_secs(5);

/// Reserved path answered by the gateway itself, never proxied
const HEALTH_PATH: &str = "/healthz";

/// Shared state for request handling
struct ServerState {
    config: Arc<GatewayConfig>,
    assets: AssetServer,
    forwarder: HttpForwarder,
    gw_state: RwLock<GatewayState>,
    start_time: Instant,
    active: AtomicUsize,
    total_requests: AtomicU64,
    shutdown_rx: watch::Receiver<bool>,
}

impl ServerState {
    fn state(&self) -> GatewayState {
        self.gw_state.read().unwrap().clone()
    }

    fn set_state(&self, next: GatewayState) {
        let mut state = self.gw_state.write().unwrap();
        tracing::debug!(from = %*state, to = %next, "State transition");
        *state = next;
    }

    fn is_draining(&self) -> bool {
        *self.shutdown_rx.borrow()
    }

    fn health(&self) -> HealthStatus {
        HealthStatus {
            state: self.state(),
            uptime_secs: self.start_time.elapsed().as_secs(),
            active_connections: self.active.load(Ordering::SeqCst),
            total_requests: self.total_requests.load(Ordering::Relaxed),
        }
    }
}

/// Tracks one in-flight connection or tunnel for the drain accounting
struct ConnGuard {
    state: Arc<ServerState>,
}

impl ConnGuard {
    fn new(state: Arc<ServerState>) -> Self {
        state.active.fetch_add(1, Ordering::SeqCst);
        Self { state }
    }
}

impl Drop for ConnGuard {
    fn drop(&mut self) {
        self.state.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// The gateway: binds the listener, dispatches requests, drains on shutdown
pub struct Gateway {
    inner: Arc<ServerState>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_flag: AtomicBool,
    accept_handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl Gateway {
    /// Create a new gateway from configuration.
    ///
    /// Validation failures are fatal; the process must exit before
    /// accepting any connection.
    pub fn new(config: GatewayConfig) -> Result<Self> {
        config.validate()?;
        let assets = AssetServer::new(&config.asset_root, config.index_file.clone())?;
        let forwarder = HttpForwarder::new(&config);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Ok(Self {
            inner: Arc::new(ServerState {
                config: Arc::new(config),
                assets,
                forwarder,
                gw_state: RwLock::new(GatewayState::Created),
                start_time: Instant::now(),
                active: AtomicUsize::new(0),
                total_requests: AtomicU64::new(0),
                shutdown_rx,
            }),
            shutdown_tx,
            shutdown_flag: AtomicBool::new(false),
            accept_handle: Mutex::new(None),
        })
    }

    /// Bind the listener and start accepting connections
    pub async fn start(&self) -> Result<()> {
        self.inner.set_state(GatewayState::Starting);

        let addr: SocketAddr = ([0, 0, 0, 0], self.inner.config.listen_port).into();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| GatewayError::Config(format!("failed to bind {}: {}", addr, e)))?;

        tracing::info!(
            address = %addr,
            backend = self.inner.config.backend_authority(),
            asset_root = %self.inner.config.asset_root.display(),
            proxy_prefix = self.inner.config.proxy_prefix,
            "Gateway listening"
        );

        let state = self.inner.clone();
        let mut shutdown_rx = self.inner.shutdown_rx.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => {
                        tracing::info!("Stopped accepting new connections");
                        break;
                    }
                    conn = listener.accept() => {
                        let (stream, remote_addr) = match conn {
                            Ok(c) => c,
                            Err(e) => {
                                tracing::error!(error = %e, "Failed to accept connection");
                                continue;
                            }
                        };

                        let state = state.clone();
                        tokio::spawn(async move {
                            let _guard = ConnGuard::new(state.clone());
                            let io = TokioIo::new(stream);
                            let service = service_fn({
                                let state = state.clone();
                                move |req| handle_request(req, remote_addr, state.clone())
                            });
                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .with_upgrades()
                                .await
                            {
                                tracing::debug!(error = %e, remote = %remote_addr, "Connection ended");
                            }
                        });
                    }
                }
            }
        });

        *self.accept_handle.lock().unwrap() = Some(handle);
        self.inner.set_state(GatewayState::Running);
        Ok(())
    }

    /// Initiate graceful shutdown: stop accepting, drain in-flight work,
    /// force-close what remains after the grace period.
    pub async fn shutdown(&self) {
        if self.shutdown_flag.swap(true, Ordering::SeqCst) {
            return; // already shutting down
        }

        self.inner.set_state(GatewayState::Stopping);
        tracing::info!(
            grace_secs = self.inner.config.shutdown_grace.as_secs(),
            "Gateway shutting down"
        );
        let _ = self.shutdown_tx.send(true);

        let handle = self.accept_handle.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }

        let deadline = Instant::now() + self.inner.config.shutdown_grace;
        while self.inner.active.load(Ordering::SeqCst) > 0 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        let remaining = self.inner.active.load(Ordering::SeqCst);
        if remaining > 0 {
            // Degraded but not fatal; the process still exits 0
            tracing::warn!(
                connections = remaining,
                "Shutdown grace elapsed, force-closing remaining connections"
            );
        }

        self.inner.set_state(GatewayState::Stopped);
        tracing::info!("Gateway stopped");
    }

    /// Wait for a termination signal (SIGTERM or Ctrl+C), then shut down
    pub async fn wait_for_shutdown(&self) {
        wait_for_signal().await;
        self.shutdown().await;
    }

    /// Current gateway state
    pub fn state(&self) -> GatewayState {
        self.inner.state()
    }

    /// Health status snapshot
    pub fn health(&self) -> HealthStatus {
        self.inner.health()
    }

    /// Check if the gateway is running
    pub fn is_running(&self) -> bool {
        self.state() == GatewayState::Running
    }

    /// Check if shutdown has been requested
    pub fn is_shutdown(&self) -> bool {
        self.shutdown_flag.load(Ordering::Relaxed)
    }

    /// The configuration the gateway was built with
    pub fn config(&self) -> &GatewayConfig {
        &self.inner.config
    }
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

/// Handle an individual HTTP request
async fn handle_request(
    req: Request<Incoming>,
    remote_addr: SocketAddr,
    state: Arc<ServerState>,
) -> std::result::Result<Response<Full<Bytes>>, Infallible> {
    let started = Instant::now();
    state.total_requests.fetch_add(1, Ordering::Relaxed);

    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let query = req.uri().query().map(|q| q.to_string());

    // The gateway's own health surface, answered before any routing
    if path == HEALTH_PATH {
        let body = serde_json::to_string(&state.health()).unwrap_or_default();
        return Ok(json_response(StatusCode::OK, body));
    }

    let decision = router::decide(
        &path,
        query.as_deref(),
        req.headers(),
        &state.assets,
        &state.config.proxy_prefix,
    );
    let label = decision.label();

    let response = match decision {
        RouteDecision::ProxyWebSocket(target) => handle_ws_upgrade(req, target, &state),
        RouteDecision::ProxyHttp(target) => {
            handle_http_forward(req, target, remote_addr, &state).await
        }
        RouteDecision::StaticAsset(file) => match state.assets.serve(&file).await {
            Ok(resp) => resp,
            // The file existed at classification time; a read failure
            // degrades to the fallback, never to a client-visible error
            Err(e) => {
                tracing::debug!(error = %e, path = path, "Static read failed, falling back");
                serve_fallback(&state).await
            }
        },
        RouteDecision::SpaFallback => serve_fallback(&state).await,
    };

    tracing::info!(
        method = %method,
        path = path,
        decision = label,
        status = response.status().as_u16(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        remote = %remote_addr,
        "Request"
    );

    Ok(response)
}

/// Accept a client upgrade and spawn the tunnel task
fn handle_ws_upgrade(
    req: Request<Incoming>,
    target: String,
    state: &Arc<ServerState>,
) -> Response<Full<Bytes>> {
    if state.is_draining() {
        return error_response(StatusCode::SERVICE_UNAVAILABLE, "gateway shutting down");
    }

    let response = match websocket::upgrade_response(req.headers()) {
        Ok(resp) => resp,
        Err(e) => {
            tracing::debug!(error = %e, "Rejected malformed upgrade request");
            return error_response(StatusCode::BAD_REQUEST, &e.to_string());
        }
    };
    let backend_req =
        match websocket::backend_request(&state.config.backend_ws_base(), &target, req.headers()) {
            Ok(r) => r,
            Err(e) => {
                tracing::debug!(error = %e, "Could not build backend upgrade request");
                return error_response(StatusCode::BAD_REQUEST, &e.to_string());
            }
        };

    let guard = ConnGuard::new(state.clone());
    let dial_timeout = state.config.dial_timeout;
    let shutdown = state.shutdown_rx.clone();
    tokio::spawn(async move {
        let _guard = guard;
        websocket::run_tunnel(req, backend_req, dial_timeout, TUNNEL_CLOSE_GRACE, shutdown).await;
    });

    response
}

/// Forward a unary request and translate failures into the 503 contract
async fn handle_http_forward(
    req: Request<Incoming>,
    target: String,
    remote_addr: SocketAddr,
    state: &Arc<ServerState>,
) -> Response<Full<Bytes>> {
    let (parts, body) = req.into_parts();
    // A body that cannot be read in full must never reach the backend
    let body_bytes = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            tracing::debug!(target = target, error = %e, "Client body read failed");
            return error_response(StatusCode::BAD_REQUEST, "client body incomplete");
        }
    };

    match state
        .forwarder
        .forward(
            parts.method,
            &target,
            &parts.headers,
            body_bytes,
            remote_addr.ip(),
        )
        .await
    {
        Ok(forwarded) => {
            let mut builder = Response::builder().status(forwarded.status);
            for (key, value) in forwarded.headers.iter() {
                builder = builder.header(key, value);
            }
            builder.body(Full::new(forwarded.body)).unwrap()
        }
        Err(GatewayError::BackendUnavailable(reason)) => {
            tracing::warn!(target = target, reason = reason, "Backend unavailable");
            error_response(StatusCode::SERVICE_UNAVAILABLE, &reason)
        }
        Err(e) => {
            tracing::error!(target = target, error = %e, "Forward failed");
            error_response(StatusCode::BAD_GATEWAY, &e.to_string())
        }
    }
}

/// Serve the SPA entry document; 404 only when it no longer exists
async fn serve_fallback(state: &Arc<ServerState>) -> Response<Full<Bytes>> {
    match state.assets.serve_index().await {
        Ok(resp) => resp,
        Err(e) => {
            tracing::error!(error = %e, "Entry document unreadable");
            Response::builder()
                .status(StatusCode::NOT_FOUND)
                .body(Full::new(Bytes::from("not found")))
                .unwrap()
        }
    }
}

fn json_response(status: StatusCode, body: String) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(Full::new(Bytes::from(body)))
        .unwrap()
}

fn error_response(status: StatusCode, reason: &str) -> Response<Full<Bytes>> {
    json_response(status, serde_json::json!({ "error": reason }).to_string())
}
