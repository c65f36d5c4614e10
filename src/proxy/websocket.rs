//! WebSocket tunnel: bidirectional frame relay between client and backend
//!
//! Each accepted upgrade becomes one `TunnelSession` with an explicit
//! lifecycle. Frames are forwarded verbatim, one in flight per direction,
//! so memory per session stays bounded and a slow reader stalls the
//! opposite leg instead of buffering unboundedly. Closing either leg
//! closes the other within a bounded grace period.

use crate::error::{GatewayError, Result};
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use http::HeaderMap;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Role};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, WebSocketStream};

/// Upgrade request toward the backend
pub type BackendRequest = tokio_tungstenite::tungstenite::handshake::client::Request;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Lifecycle of one tunnel session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelState {
    /// Client upgrade request received, not yet accepted
    Pending,
    /// Client upgrade accepted; dialing the backend
    Connecting,
    /// Both legs open, frames flowing
    Relaying,
    /// Either leg observed a close, EOF, or error
    Closing,
    /// Terminal; both legs closed
    Closed,
}

impl std::fmt::Display for TunnelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Connecting => write!(f, "connecting"),
            Self::Relaying => write!(f, "relaying"),
            Self::Closing => write!(f, "closing"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// One active WebSocket relay with frame/byte counters for diagnostics
pub struct TunnelSession {
    id: u64,
    state: TunnelState,
    frames_client_to_backend: u64,
    frames_backend_to_client: u64,
    bytes_client_to_backend: u64,
    bytes_backend_to_client: u64,
}

impl TunnelSession {
    pub fn new() -> Self {
        Self {
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            state: TunnelState::Pending,
            frames_client_to_backend: 0,
            frames_backend_to_client: 0,
            bytes_client_to_backend: 0,
            bytes_backend_to_client: 0,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> TunnelState {
        self.state
    }

    fn set_state(&mut self, next: TunnelState) {
        tracing::debug!(session = self.id, from = %self.state, to = %next, "Tunnel state transition");
        self.state = next;
    }

    fn count_client_to_backend(&mut self, msg: &Message) {
        self.frames_client_to_backend += 1;
        self.bytes_client_to_backend += msg.len() as u64;
    }

    fn count_backend_to_client(&mut self, msg: &Message) {
        self.frames_backend_to_client += 1;
        self.bytes_backend_to_client += msg.len() as u64;
    }
}

impl Default for TunnelSession {
    fn default() -> Self {
        Self::new()
    }
}

/// Build the `101 Switching Protocols` response for a client upgrade.
///
/// A missing `Sec-WebSocket-Key` is a client protocol error; the server
/// maps it to a 400 without touching the backend.
pub fn upgrade_response(headers: &HeaderMap) -> Result<Response<Full<Bytes>>> {
    let key = headers
        .get(http::header::SEC_WEBSOCKET_KEY)
        .ok_or_else(|| GatewayError::ClientProtocol("missing Sec-WebSocket-Key".to_string()))?;
    let accept = derive_accept_key(key.as_bytes());

    let mut builder = Response::builder()
        .status(StatusCode::SWITCHING_PROTOCOLS)
        .header(http::header::CONNECTION, "Upgrade")
        .header(http::header::UPGRADE, "websocket")
        .header(http::header::SEC_WEBSOCKET_ACCEPT, accept);

    // The backend dial has not happened yet, so echo the client's first
    // offered subprotocol; the full offer is forwarded on the dial.
    if let Some(proto) = first_subprotocol(headers) {
        builder = builder.header(http::header::SEC_WEBSOCKET_PROTOCOL, proto);
    }

    builder
        .body(Full::new(Bytes::new()))
        .map_err(|e| GatewayError::ClientProtocol(e.to_string()))
}

/// Build the upgrade request the gateway dials the backend with
pub fn backend_request(ws_base: &str, target: &str, headers: &HeaderMap) -> Result<BackendRequest> {
    let url = format!("{}{}", ws_base.trim_end_matches('/'), target);
    let mut request = url
        .as_str()
        .into_client_request()
        .map_err(GatewayError::WebSocket)?;
    if let Some(proto) = headers.get(http::header::SEC_WEBSOCKET_PROTOCOL) {
        request
            .headers_mut()
            .insert(http::header::SEC_WEBSOCKET_PROTOCOL, proto.clone());
    }
    Ok(request)
}

fn first_subprotocol(headers: &HeaderMap) -> Option<String> {
    headers
        .get(http::header::SEC_WEBSOCKET_PROTOCOL)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Drive one tunnel session to completion.
///
/// Runs in its own task after the 101 response has been sent. Owns both
/// legs for the session's whole lifetime; returns only once the session
/// is `Closed`.
pub async fn run_tunnel(
    req: Request<Incoming>,
    backend_req: BackendRequest,
    dial_timeout: Duration,
    close_grace: Duration,
    shutdown: watch::Receiver<bool>,
) {
    let mut session = TunnelSession::new();

    let upgraded = match hyper::upgrade::on(req).await {
        Ok(upgraded) => upgraded,
        Err(e) => {
            tracing::debug!(session = session.id, error = %e, "Client upgrade never completed");
            session.set_state(TunnelState::Closed);
            return;
        }
    };
    let mut client =
        WebSocketStream::from_raw_socket(TokioIo::new(upgraded), Role::Server, None).await;
    session.set_state(TunnelState::Connecting);

    let backend_url = backend_req.uri().to_string();
    let backend = match timeout(dial_timeout, connect_async(backend_req)).await {
        Ok(Ok((stream, _response))) => stream,
        Ok(Err(e)) => {
            tracing::warn!(session = session.id, url = backend_url, error = %e, "Backend dial failed");
            close_leg(&mut client, CloseCode::Again, "backend unavailable", close_grace).await;
            session.set_state(TunnelState::Closed);
            return;
        }
        Err(_) => {
            tracing::warn!(
                session = session.id,
                url = backend_url,
                timeout_secs = dial_timeout.as_secs(),
                "Backend dial timed out"
            );
            close_leg(&mut client, CloseCode::Again, "backend unavailable", close_grace).await;
            session.set_state(TunnelState::Closed);
            return;
        }
    };

    session.set_state(TunnelState::Relaying);
    tracing::info!(session = session.id, url = backend_url, "Tunnel established");

    relay(client, backend, &mut session, close_grace, shutdown).await;

    session.set_state(TunnelState::Closed);
    tracing::info!(
        session = session.id,
        frames_in = session.frames_client_to_backend,
        frames_out = session.frames_backend_to_client,
        bytes_in = session.bytes_client_to_backend,
        bytes_out = session.bytes_backend_to_client,
        "Tunnel closed"
    );
}

/// Relay frames in both directions until either leg closes or the
/// gateway shuts down, then close both legs within the grace period.
async fn relay<C, B>(
    mut client: WebSocketStream<C>,
    mut backend: WebSocketStream<B>,
    session: &mut TunnelSession,
    grace: Duration,
    mut shutdown: watch::Receiver<bool>,
) where
    C: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        tokio::select! {
            msg = client.next() => {
                match msg {
                    Some(Ok(Message::Close(frame))) => {
                        session.set_state(TunnelState::Closing);
                        let _ = timeout(grace, backend.close(frame)).await;
                        break;
                    }
                    Some(Ok(msg)) => {
                        session.count_client_to_backend(&msg);
                        if backend.send(msg).await.is_err() {
                            session.set_state(TunnelState::Closing);
                            close_leg(&mut client, CloseCode::Error, "backend write failed", grace).await;
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        tracing::debug!(session = session.id, error = %e, "Client leg error");
                        session.set_state(TunnelState::Closing);
                        close_leg(&mut backend, CloseCode::Error, "client connection error", grace).await;
                        break;
                    }
                    None => {
                        session.set_state(TunnelState::Closing);
                        close_leg(&mut backend, CloseCode::Error, "client disconnected", grace).await;
                        break;
                    }
                }
            }
            msg = backend.next() => {
                match msg {
                    Some(Ok(Message::Close(frame))) => {
                        session.set_state(TunnelState::Closing);
                        let _ = timeout(grace, client.close(frame)).await;
                        break;
                    }
                    Some(Ok(msg)) => {
                        session.count_backend_to_client(&msg);
                        if client.send(msg).await.is_err() {
                            session.set_state(TunnelState::Closing);
                            close_leg(&mut backend, CloseCode::Error, "client write failed", grace).await;
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        tracing::debug!(session = session.id, error = %e, "Backend leg error");
                        session.set_state(TunnelState::Closing);
                        close_leg(&mut client, CloseCode::Error, "backend connection error", grace).await;
                        break;
                    }
                    None => {
                        session.set_state(TunnelState::Closing);
                        close_leg(&mut client, CloseCode::Error, "backend disconnected", grace).await;
                        break;
                    }
                }
            }
            _ = shutdown.changed() => {
                session.set_state(TunnelState::Closing);
                close_leg(&mut client, CloseCode::Away, "gateway shutting down", grace).await;
                close_leg(&mut backend, CloseCode::Away, "gateway shutting down", grace).await;
                break;
            }
        }
    }

    // Both legs confirmed closed before the session is Closed
    let _ = timeout(grace, client.close(None)).await;
    let _ = timeout(grace, backend.close(None)).await;
}

/// Send a close frame with the given code, bounded by the grace period
async fn close_leg<S>(ws: &mut WebSocketStream<S>, code: CloseCode, reason: &str, grace: Duration)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let frame = CloseFrame {
        code,
        reason: reason.to_string().into(),
    };
    let _ = timeout(grace, ws.close(Some(frame))).await;
}
