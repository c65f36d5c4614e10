//! Proxy components: HTTP forwarding and WebSocket tunneling

pub mod http;
pub mod websocket;

pub use http::HttpForwarder;
